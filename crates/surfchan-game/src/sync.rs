//! Blocking front end for the training loop
//!
//! A current-thread tokio runtime runs on its own OS thread and owns the
//! socket and all frame dispatch. Each call schedules the matching
//! [`GameBridge`] operation onto that runtime and blocks the calling thread
//! on a channel until it completes.

use crate::bridge::GameBridge;
use crate::screen::Screen;
use crate::timing::StepTimings;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError};
use std::thread::JoinHandle;
use surfchan_bridge::Signal;
use surfchan_core::{BridgeConfig, Map, Observation, Result, StepAction, SurfError};
use tokio::runtime::{Builder, Handle};
use tracing::{debug, warn};

/// Synchronous step bridge
pub struct SyncBridge {
    handle: Handle,
    bridge: Arc<GameBridge>,
    /// Releases the runtime thread once teardown has run on it
    stopped: Signal,
    thread: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SyncBridge {
    /// Start the background runtime thread
    pub fn start(config: BridgeConfig, screen: Arc<dyn Screen>) -> Result<Self> {
        let bridge = GameBridge::new(config, screen);
        let stopped = Signal::new();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let thread = {
            let stopped = stopped.clone();
            std::thread::Builder::new()
                .name("surfchan-bridge".into())
                .spawn(move || {
                    let runtime = match Builder::new_current_thread().enable_all().build() {
                        Ok(runtime) => runtime,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(runtime.handle().clone()));
                    runtime.block_on(stopped.fired());
                    debug!("Bridge runtime stopped");
                })
                .map_err(|e| SurfError::IpcError(format!("Failed to spawn bridge thread: {}", e)))?
        };

        let handle = ready_rx
            .recv()
            .map_err(|_| SurfError::IpcError("Bridge thread exited during startup".into()))?
            .map_err(|e| SurfError::IpcError(format!("Failed to build runtime: {}", e)))?;

        Ok(Self {
            handle,
            bridge,
            stopped,
            thread: std::sync::Mutex::new(Some(thread)),
        })
    }

    /// Run `f` on the bridge runtime and block until it completes
    fn call<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<GameBridge>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.stopped.is_fired() {
            return Err(SurfError::Cancelled);
        }
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        let fut = f(self.bridge.clone());
        self.handle.spawn(async move {
            let _ = tx.send(fut.await);
        });
        rx.recv()
            .map_err(|_| SurfError::IpcError("Bridge runtime is not running".into()))?
    }

    pub fn bridge(&self) -> &Arc<GameBridge> {
        &self.bridge
    }

    /// Bind the listener without waiting for the game
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.call(|bridge| async move { bridge.listen().await })
    }

    /// Block until the game is connected, handshaken, started and its window
    /// located
    pub fn init(&self, map_name: &str) -> Result<()> {
        let map_name = map_name.to_string();
        self.call(|bridge| async move { bridge.init(&map_name).await })
    }

    /// Block until the game answers `action` with telemetry, then capture
    pub fn step(&self, action: StepAction) -> Result<Observation> {
        self.call(|bridge| async move { bridge.step(action).await })
    }

    pub fn reset(&self) -> Result<()> {
        self.call(|bridge| async move { bridge.reset().await })
    }

    pub fn change_map(&self, map_name: &str) -> Result<Map> {
        self.bridge.change_map(map_name)
    }

    pub fn start_trigger(&self) -> Signal {
        self.bridge.start_trigger()
    }

    pub fn timings(&self) -> StepTimings {
        self.bridge.timings()
    }

    /// Cancel pending calls from another thread
    pub fn interrupt(&self) {
        self.bridge.interrupt();
    }

    pub fn watch_ctrl_c(&self) {
        let _guard = self.handle.enter();
        self.bridge.watch_ctrl_c();
    }

    /// Tear down the bridge and stop the runtime thread. Idempotent.
    ///
    /// From inside another async runtime the caller cannot block, so pending
    /// calls are interrupted and teardown finishes on the bridge thread in
    /// the background.
    pub fn close(&self) -> Result<()> {
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(thread) = thread else {
            return Ok(());
        };

        if Handle::try_current().is_ok() {
            debug!("Closing from inside a runtime, detaching bridge thread");
            self.bridge.interrupt();
            let bridge = self.bridge.clone();
            let stopped = self.stopped.clone();
            self.handle.spawn(async move {
                bridge.close().await;
                stopped.fire();
            });
            drop(thread);
            return Ok(());
        }

        let closed = self.call(|bridge| async move {
            bridge.close().await;
            Ok(())
        });
        self.stopped.fire();

        if thread.join().is_err() {
            warn!("Bridge thread panicked");
        }
        closed
    }
}

impl Drop for SyncBridge {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Bridge teardown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::HeadlessScreen;
    use std::time::Duration;

    fn config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.listen.port = 0;
        config.server.launch = false;
        config.client.launch = false;
        config
    }

    #[test]
    fn test_start_and_close() {
        let bridge = SyncBridge::start(config(), Arc::new(HeadlessScreen::default())).unwrap();
        let addr = bridge.listen_addr().unwrap();
        assert_eq!(bridge.listen_addr().unwrap(), addr);

        bridge.close().unwrap();
        bridge.close().unwrap();
        assert!(bridge.step(StepAction::idle()).is_err());
        assert!(std::net::TcpStream::connect(addr).is_err());
    }

    #[tokio::test]
    async fn test_drop_inside_runtime_detaches() {
        let bridge = SyncBridge::start(config(), Arc::new(HeadlessScreen::default())).unwrap();
        let addr = bridge.listen_addr().unwrap();
        let shutdown = bridge.bridge().shutdown_signal();

        drop(bridge);
        assert!(shutdown.is_fired());

        tokio_test::assert_ok!(
            tokio::time::timeout(Duration::from_secs(5), async {
                while tokio::net::TcpStream::connect(addr).await.is_ok() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
        );
    }

    #[test]
    fn test_unknown_map() {
        let bridge = SyncBridge::start(config(), Arc::new(HeadlessScreen::default())).unwrap();
        assert!(matches!(
            bridge.init("nope"),
            Err(SurfError::ConfigError(_))
        ));
    }
}
