//! Socket session
//!
//! Accepts one game connection at a time, owns its write half and runs the
//! dispatcher over its read half. State moves
//! `Listening -> Connected -> Draining -> Closed` and back to `Listening`
//! for the next peer, until shutdown.

use std::sync::Arc;
use surfchan_bridge::tcp::{TcpReadWrapper, TcpWriteWrapper};
use surfchan_bridge::{AsyncWriter, BridgeMessage, Dispatcher, Signal};
use surfchan_core::{Framing, Result, SurfError};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Listening,
    Connected,
    Draining,
    Closed,
}

/// The single active peer connection
pub struct Session {
    writer: Mutex<Option<Box<dyn AsyncWriter>>>,
    state: watch::Sender<SessionState>,
    framing: Framing,
}

impl Session {
    pub fn new(framing: Framing) -> Self {
        let (state, _) = watch::channel(SessionState::Closed);
        Self {
            writer: Mutex::new(None),
            state,
            framing,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Session {:?} -> {:?}", previous, state);
        }
    }

    /// Send one message to the game.
    ///
    /// Without a connection this is a no-op and returns false. A failed write
    /// drops the writer; the read loop notices the broken connection on its
    /// own.
    pub async fn send(&self, msg: &BridgeMessage) -> bool {
        let data = msg.to_frame().encode();

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            debug!("Not connected, dropping {:?} frame", msg.kind());
            return false;
        };

        let preview: String = String::from_utf8_lossy(&data).chars().take(200).collect();
        debug!("[Bridge→Game] len={} frame={}", data.len(), preview);

        match writer.write_message(&data).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Send failed, dropping writer: {}", e);
                *guard = None;
                false
            }
        }
    }

    /// Wait until a peer is connected. Fails with `Cancelled` if `shutdown`
    /// fires first.
    pub async fn wait_connected(&self, shutdown: &Signal) -> Result<()> {
        let mut rx = self.state.subscribe();
        tokio::select! {
            _ = shutdown.fired() => Err(SurfError::Cancelled),
            res = rx.wait_for(|s| *s == SessionState::Connected) => res
                .map(|_| ())
                .map_err(|_| SurfError::IpcError("session dropped".into())),
        }
    }

    /// Drop the write half. Later sends are no-ops.
    pub async fn close(&self) {
        self.writer.lock().await.take();
    }

    /// Accept loop. Serves one connection at a time until `shutdown` fires,
    /// then drops the listener.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        dispatcher: Dispatcher,
        shutdown: Signal,
    ) {
        loop {
            self.set_state(SessionState::Listening);

            let (stream, peer) = tokio::select! {
                _ = shutdown.fired() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        continue;
                    }
                },
            };
            info!("Game connected from {}", peer);

            // Frames are tiny and latency bound
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY: {}", e);
            }

            let (read_half, write_half) = stream.into_split();
            *self.writer.lock().await = Some(Box::new(TcpWriteWrapper::new(write_half, self.framing)));
            self.set_state(SessionState::Connected);

            tokio::select! {
                _ = shutdown.fired() => {}
                _ = dispatcher.run(TcpReadWrapper::new(read_half, self.framing)) => {
                    info!("Game at {} disconnected", peer);
                }
            }

            self.set_state(SessionState::Draining);
            self.close().await;
            self.set_state(SessionState::Closed);
            dispatcher.connection_closed().await;

            if shutdown.is_fired() {
                break;
            }
        }

        self.set_state(SessionState::Closed);
        debug!("Listener closed");
    }
}
