//! Transport abstractions and the frame dispatcher
//!
//! Provides AsyncReader/AsyncWriter traits that the TCP wrappers implement,
//! and the dispatcher that drains a reader, decodes frames and routes them.

use crate::protocol::{PeerMessage, decode};
use crate::waiter::WaiterTable;
use async_trait::async_trait;
use std::sync::Arc;
use surfchan_core::{DecodeError, Result};
use tracing::{debug, info, warn};

/// Trait for async reading from a transport
#[async_trait]
pub trait AsyncReader: Send {
    /// Read one complete frame body from the transport
    async fn read_message(&mut self) -> Result<Vec<u8>>;
}

/// Trait for async writing to a transport
#[async_trait]
pub trait AsyncWriter: Send + Sync {
    /// Write one frame body, adding whatever framing the transport needs
    async fn write_message(&mut self, data: &[u8]) -> Result<()>;
}

/// Side effects the dispatcher triggers for frames nobody is waiting on
#[async_trait]
pub trait PeerHandler: Send + Sync {
    /// The server plugin sent `Init` with the address the client should join
    async fn peer_announced(&self, address: String);

    /// The connection ended (EOF or transport error)
    async fn peer_disconnected(&self) {}
}

/// Routes decoded frames to waiters or to the peer handler
#[derive(Clone)]
pub struct Dispatcher {
    waiters: Arc<WaiterTable>,
    handler: Arc<dyn PeerHandler>,
}

impl Dispatcher {
    pub fn new(waiters: Arc<WaiterTable>, handler: Arc<dyn PeerHandler>) -> Self {
        Self { waiters, handler }
    }

    /// Drain `reader` until it fails or reaches end of stream.
    ///
    /// Decode errors are logged and skipped; only transport errors end the
    /// loop.
    pub async fn run<R: AsyncReader>(&self, mut reader: R) {
        loop {
            let data = match reader.read_message().await {
                Ok(data) => data,
                Err(e) => {
                    info!("Read loop ended: {}", e);
                    return;
                }
            };

            let preview: String = String::from_utf8_lossy(&data).chars().take(200).collect();
            debug!("[Game→Bridge] len={} frame={}", data.len(), preview);

            self.dispatch(&data).await;
        }
    }

    /// Decode one frame body and route it
    pub async fn dispatch(&self, data: &[u8]) {
        let frame = match decode(data) {
            Ok(frame) => frame,
            Err(DecodeError::Empty) => {
                debug!("Empty frame received");
                return;
            }
            Err(e) => {
                warn!("Dropping frame: {}", e);
                return;
            }
        };

        let msg = match PeerMessage::try_from(frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Dropping frame: {}", e);
                return;
            }
        };

        match self.waiters.resolve(msg) {
            Ok(()) => {}
            Err(PeerMessage::Init { address }) => {
                info!("Peer announced itself at {}", address);
                self.handler.peer_announced(address).await;
            }
            Err(msg) => self.waiters.buffer(msg),
        }
    }

    /// Tear down per-connection state after the read loop ends
    pub async fn connection_closed(&self) {
        self.waiters.cancel_all();
        self.handler.peer_disconnected().await;
    }
}
