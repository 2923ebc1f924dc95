//! # surfchan-core
//!
//! Core types shared by the SurfChan bridge crates:
//! - Error taxonomy
//! - Map geometry and primary axis
//! - Step actions and button masks
//! - Telemetry, captured images and observations
//! - Bridge configuration

pub mod action;
pub mod config;
pub mod error;
pub mod map;
pub mod observation;

pub use action::{Button, Buttons, StepAction};
pub use config::{BridgeConfig, Framing, MapSpec};
pub use error::{DecodeError, Result, SurfError};
pub use map::Map;
pub use observation::{Image, Observation, Telemetry};
