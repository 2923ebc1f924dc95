//! Bridge to Counter-Strike: Source via the server plugin's TCP connection
//!
//! [`GameBridge`] owns everything one training session needs: the socket
//! session, the waiter table, the game processes, the located screen region
//! and the active map. It is async and lives on the background runtime; see
//! [`crate::sync::SyncBridge`] for the blocking front end.

use crate::lifecycle::ProcessManager;
use crate::screen::{Screen, ScreenLocator, ScreenRegion};
use crate::session::{Session, SessionState};
use crate::timing::StepTimings;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use surfchan_bridge::{
    BridgeMessage, Dispatcher, FrameKind, PeerHandler, PeerMessage, PendingWaiter, Signal,
    WaiterTable,
};
use surfchan_core::{BridgeConfig, Image, Map, Observation, Result, StepAction, SurfError};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Async bridge context
pub struct GameBridge {
    config: BridgeConfig,
    session: Arc<Session>,
    waiters: Arc<WaiterTable>,
    processes: Mutex<ProcessManager>,
    screen: Arc<dyn Screen>,
    locator: ScreenLocator,
    /// Capture region, None until the client window is found
    region: Arc<watch::Sender<Option<ScreenRegion>>>,
    /// Window search for the current connection
    locating: std::sync::Mutex<Option<JoinHandle<()>>>,
    /// Connect address announced by the peer on the current connection
    peer: watch::Sender<Option<String>>,
    announcements: AtomicU64,
    /// Set when launching the client from the dispatcher fails
    launch_error: std::sync::Mutex<Option<String>>,
    map: RwLock<Option<Map>>,
    timings: std::sync::Mutex<StepTimings>,
    operator_gate: Signal,
    shutdown: Signal,
    listener: Mutex<Option<(SocketAddr, JoinHandle<()>)>>,
}

impl GameBridge {
    pub fn new(config: BridgeConfig, screen: Arc<dyn Screen>) -> Arc<Self> {
        let (region, _) = watch::channel(None);
        let (peer, _) = watch::channel(None);

        Arc::new(Self {
            session: Arc::new(Session::new(config.listen.framing)),
            waiters: Arc::new(WaiterTable::new(config.max_buffered_frames)),
            processes: Mutex::new(ProcessManager::new(&config)),
            locator: ScreenLocator::new(screen.clone(), config.window.clone(), &config.observation),
            screen,
            region: Arc::new(region),
            locating: std::sync::Mutex::new(None),
            peer,
            announcements: AtomicU64::new(0),
            launch_error: std::sync::Mutex::new(None),
            map: RwLock::new(None),
            timings: std::sync::Mutex::new(StepTimings::default()),
            operator_gate: Signal::new(),
            shutdown: Signal::new(),
            listener: Mutex::new(None),
            config,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// Fired by the operator to let `init` proceed past the start gate
    pub fn start_trigger(&self) -> Signal {
        self.operator_gate.clone()
    }

    pub fn shutdown_signal(&self) -> Signal {
        self.shutdown.clone()
    }

    /// Number of `Init` announcements handled so far
    pub fn announcements(&self) -> u64 {
        self.announcements.load(Ordering::SeqCst)
    }

    pub fn peer_address(&self) -> Option<String> {
        self.peer.borrow().clone()
    }

    pub fn region(&self) -> Option<ScreenRegion> {
        *self.region.borrow()
    }

    pub fn map(&self) -> Option<Map> {
        self.map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn timings(&self) -> StepTimings {
        *self.timings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn waiters(&self) -> &WaiterTable {
        &self.waiters
    }

    /// Bind the listener and start the accept loop. Idempotent; returns the
    /// bound address.
    pub async fn listen(self: &Arc<Self>) -> Result<SocketAddr> {
        let mut guard = self.listener.lock().await;
        if let Some((addr, _)) = guard.as_ref() {
            return Ok(*addr);
        }
        self.ensure_running()?;

        let addr = self.config.listen.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| SurfError::IpcError(format!("Failed to bind {}: {}", addr, e)))?;
        let local = listener
            .local_addr()
            .map_err(|e| SurfError::IpcError(format!("Failed to read local address: {}", e)))?;
        info!("Listening for the game on {}", local);

        let dispatcher = Dispatcher::new(self.waiters.clone(), self.clone());
        let task = tokio::spawn(
            self.session
                .clone()
                .serve(listener, dispatcher, self.shutdown.clone()),
        );
        *guard = Some((local, task));
        Ok(local)
    }

    /// Resolve `map_name` and make it the active map
    pub fn change_map(&self, map_name: &str) -> Result<Map> {
        let map = self.config.map(map_name)?;
        info!("Active map: {} (axis {})", map.full_name(), map.axis());
        *self.map.write().unwrap_or_else(PoisonError::into_inner) = Some(map.clone());
        Ok(map)
    }

    /// Bring the game up on `map_name` and wait until it is ready for steps.
    ///
    /// Launches the server (if configured), waits for the plugin to connect,
    /// performs the `Init` handshake, passes the operator gate, sends `Start`
    /// and waits for the client window. Every wait is cancelled by shutdown.
    pub async fn init(self: &Arc<Self>, map_name: &str) -> Result<()> {
        self.ensure_running()?;
        let map = self.change_map(map_name)?;

        if self.config.server.launch {
            let mut processes = self.processes.lock().await;
            if processes.server().is_none() {
                processes.start_server(&map)?;
            }
        }

        self.listen().await?;
        info!("Waiting for the game to connect...");
        self.session.wait_connected(&self.shutdown).await?;

        self.session
            .send(&BridgeMessage::Init {
                tick_rate: self.config.tick_rate,
            })
            .await;
        let address = self.wait_announced().await?;
        info!("Handshake complete, game at {}", address);

        if self.config.operator_start && !self.operator_gate.is_fired() {
            info!("Waiting for operator to start...");
            tokio::select! {
                _ = self.shutdown.fired() => return Err(self.cancelled()),
                _ = self.operator_gate.fired() => {}
            }
        }

        self.session.send(&BridgeMessage::start_for(&map)).await;
        let region = self.wait_region().await?;
        info!("Ready: capturing {:?}", region);
        Ok(())
    }

    /// Apply `action` for one tick and return the resulting observation
    pub async fn step(&self, action: StepAction) -> Result<Observation> {
        self.ensure_running()?;
        let started = Instant::now();

        let waiter = self.register(FrameKind::Step)?;
        self.session.send(&BridgeMessage::Step(action)).await;
        let telemetry = match self.await_reply(waiter).await? {
            PeerMessage::Step(telemetry) => telemetry,
            other => {
                return Err(SurfError::ProtocolError(format!(
                    "expected Step reply, got {:?}",
                    other
                )));
            }
        };

        let image = self.capture().await?;
        self.timings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(started.elapsed());

        Ok(Observation { telemetry, image })
    }

    /// Ask the game to reset the episode. Does not wait for a reply.
    pub async fn reset(&self) -> Result<()> {
        self.ensure_running()?;
        self.session.send(&BridgeMessage::Reset).await;
        Ok(())
    }

    /// Cancel every pending wait. The bridge cannot be used afterwards.
    pub fn interrupt(&self) {
        if !self.shutdown.is_fired() {
            info!("Interrupting bridge");
        }
        self.shutdown.fire();
        self.waiters.cancel_all();
    }

    /// Tear everything down: pending waits, the connection, the listener and
    /// the game processes. Idempotent.
    pub async fn close(&self) {
        self.interrupt();
        self.session.close().await;

        let task = self.listener.lock().await.take();
        if let Some((_, task)) = task {
            if let Err(e) = task.await {
                warn!("Accept loop ended abnormally: {}", e);
            }
        }

        self.processes.lock().await.shutdown().await;
        info!("Bridge closed ({})", self.timings());
    }

    /// Interrupt the bridge on Ctrl-C
    pub fn watch_ctrl_c(self: &Arc<Self>) {
        let bridge = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = bridge.shutdown.fired() => {}
                res = tokio::signal::ctrl_c() => match res {
                    Ok(()) => {
                        warn!("Ctrl-C received");
                        bridge.interrupt();
                    }
                    Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
                },
            }
        });
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutdown.is_fired() {
            Err(self.cancelled())
        } else {
            Ok(())
        }
    }

    /// The error a cancelled wait reports: a failed client launch if that is
    /// what tore the bridge down, `Cancelled` otherwise
    fn locating_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.locating.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancelled(&self) -> SurfError {
        match self
            .launch_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            Some(msg) => SurfError::ProcessError(msg),
            None => SurfError::Cancelled,
        }
    }

    fn register(&self, kind: FrameKind) -> Result<PendingWaiter> {
        let waiter = self.waiters.register(kind)?;
        // `interrupt` fires before cancelling, so a waiter registered after
        // the cancel sweep is caught here
        self.ensure_running()?;
        Ok(waiter)
    }

    async fn await_reply(&self, waiter: PendingWaiter) -> Result<PeerMessage> {
        waiter.wait().await.map_err(|e| match e {
            SurfError::Cancelled => self.cancelled(),
            other => other,
        })
    }

    /// Wait for the peer's `Init` announcement on the current connection
    async fn wait_announced(&self) -> Result<String> {
        let mut peer = self.peer.subscribe();
        let mut state = self.session.subscribe();
        tokio::select! {
            _ = self.shutdown.fired() => Err(self.cancelled()),
            _ = state.wait_for(|s| *s != SessionState::Connected) => {
                warn!("Game disconnected during handshake");
                Err(self.cancelled())
            }
            res = peer.wait_for(Option::is_some) => match res {
                Ok(address) => Ok(address.clone().unwrap_or_default()),
                Err(_) => Err(SurfError::IpcError("peer channel closed".into())),
            },
        }
    }

    async fn wait_region(&self) -> Result<ScreenRegion> {
        let mut region = self.region.subscribe();
        tokio::select! {
            _ = self.shutdown.fired() => Err(self.cancelled()),
            res = region.wait_for(Option::is_some) => match res {
                Ok(region) => (*region)
                    .ok_or_else(|| SurfError::CaptureError("screen region missing".into())),
                Err(_) => Err(SurfError::CaptureError("region channel closed".into())),
            },
        }
    }

    /// Grab the located region, resampled to the observation size
    async fn capture(&self) -> Result<Image> {
        let region = self
            .region()
            .ok_or_else(|| SurfError::CaptureError("client window not located yet".into()))?;

        let screen = self.screen.clone();
        let image = tokio::task::spawn_blocking(move || screen.grab(&region))
            .await
            .map_err(|e| SurfError::CaptureError(format!("capture task failed: {}", e)))??;

        let size = self.config.observation.size;
        if image.width() != size || image.height() != size {
            debug!(
                "Resampling {}x{} capture to {}x{}",
                image.width(),
                image.height(),
                size,
                size
            );
            return Ok(image.resample(size, size));
        }
        Ok(image)
    }
}

#[async_trait]
impl PeerHandler for GameBridge {
    async fn peer_announced(&self, address: String) {
        let count = self.announcements.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Announcement #{} from {}", count, address);

        if self.config.client.launch {
            let launched = self
                .processes
                .lock()
                .await
                .start_client(&address, self.config.window.size)
                .map(|_| ());
            if let Err(e) = launched {
                error!("Failed to launch client: {}", e);
                *self
                    .launch_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(e.to_string());
                self.interrupt();
                return;
            }
        }

        let locator = self.locator.clone();
        let region = self.region.clone();
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(async move {
            if let Some(found) = locator.locate(&shutdown).await {
                region.send_replace(Some(found));
            }
        });
        if let Some(stale) = self.locating_slot().replace(task) {
            stale.abort();
        }

        self.peer.send_replace(Some(address));
    }

    async fn peer_disconnected(&self) {
        if let Some(task) = self.locating_slot().take() {
            task.abort();
        }
        self.peer.send_replace(None);
        self.region.send_replace(None);
        if self.shutdown.is_fired() {
            return;
        }

        warn!("Game disconnected; call init again once it is back");
        self.processes.lock().await.release_client().await;
    }
}
