//! Shared bridge infrastructure for SurfChan
//!
//! This crate provides:
//! - Wire codec and typed messages for bridge <-> game frames
//! - Transport abstractions (AsyncReader/AsyncWriter traits)
//! - Newline or datagram framed TCP transport
//! - The pending-waiter table and the frame dispatcher
//! - A single-resolution signal for shutdown and the operator gate

pub mod protocol;
pub mod signal;
pub mod tcp;
pub mod transport;
pub mod waiter;

pub use protocol::{BridgeMessage, Frame, FrameKind, PeerMessage, decode, encode};
pub use signal::Signal;
pub use transport::{AsyncReader, AsyncWriter, Dispatcher, PeerHandler};
pub use waiter::{PendingWaiter, WaitOutcome, WaiterTable};
