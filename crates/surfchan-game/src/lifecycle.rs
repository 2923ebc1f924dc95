//! Game process lifecycle
//!
//! Stages config and map assets into the server and client install
//! directories, spawns both processes, and terminates them on shutdown
//! according to their close policy.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use surfchan_core::config::{ClientConfig, ServerConfig};
use surfchan_core::{BridgeConfig, Map, Result, SurfError};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Which game process a handle belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    Server,
    Client,
}

/// What happens to a process when the bridge shuts down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosePolicy {
    KillOnClose,
    LeaveRunning,
}

impl ClosePolicy {
    pub fn from_flag(close_on_shutdown: bool) -> Self {
        if close_on_shutdown {
            ClosePolicy::KillOnClose
        } else {
            ClosePolicy::LeaveRunning
        }
    }
}

/// A spawned game process
#[derive(Debug)]
pub struct ProcessHandle {
    role: ProcessRole,
    close_policy: ClosePolicy,
    child: Child,
}

impl ProcessHandle {
    /// Spawn `program` with `args`, running in `working_dir`
    pub fn spawn(
        role: ProcessRole,
        program: &Path,
        args: &[String],
        working_dir: &Path,
        close_policy: ClosePolicy,
    ) -> Result<Self> {
        debug!("Spawning {:?}: {} {}", role, program.display(), args.join(" "));
        let child = Command::new(program)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| {
                SurfError::ProcessError(format!(
                    "failed to launch {:?} ({}): {}",
                    role,
                    program.display(),
                    e
                ))
            })?;

        Ok(Self {
            role,
            close_policy,
            child,
        })
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    pub fn close_policy(&self) -> ClosePolicy {
        self.close_policy
    }

    /// OS process id, None once the process has been reaped
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill the process if it is still running
    pub async fn terminate(&mut self) -> Result<()> {
        if !self.is_running() {
            debug!("{:?} process already exited", self.role);
            return Ok(());
        }
        self.child.kill().await.map_err(|e| {
            SurfError::ProcessError(format!("failed to kill {:?}: {}", self.role, e))
        })
    }
}

/// How [`stage_file`] treats an existing destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageMode {
    Overwrite,
    SkipExisting,
}

/// Copy one file, creating the destination directory. Returns whether a
/// copy happened.
pub fn stage_file(src: &Path, dst: &Path, mode: StageMode) -> Result<bool> {
    if mode == StageMode::SkipExisting && dst.exists() {
        return Ok(false);
    }
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            SurfError::AssetError(format!("failed to create {}: {}", parent.display(), e))
        })?;
    }
    std::fs::copy(src, dst).map_err(|e| {
        SurfError::AssetError(format!(
            "failed to copy {} to {}: {}",
            src.display(),
            dst.display(),
            e
        ))
    })?;
    Ok(true)
}

/// Copy every file in `src_dir` into `dst_dir`, skipping files that already
/// exist. Returns the number of files copied.
pub fn stage_dir(src_dir: &Path, dst_dir: &Path) -> Result<usize> {
    let entries = std::fs::read_dir(src_dir).map_err(|e| {
        SurfError::AssetError(format!("failed to read {}: {}", src_dir.display(), e))
    })?;

    let mut copied = 0;
    for entry in entries {
        let entry = entry.map_err(|e| SurfError::AssetError(e.to_string()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if stage_file(&path, &dst_dir.join(entry.file_name()), StageMode::SkipExisting)? {
            copied += 1;
        }
    }
    Ok(copied)
}

/// Owns the server and client processes
pub struct ProcessManager {
    server: ServerConfig,
    client: ClientConfig,
    assets_dir: PathBuf,
    tick_rate: u32,
    max_players: u32,
    server_handle: Option<ProcessHandle>,
    client_handle: Option<ProcessHandle>,
}

impl ProcessManager {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            server: config.server.clone(),
            client: config.client.clone(),
            assets_dir: config.assets_dir.clone(),
            tick_rate: config.tick_rate,
            max_players: config.max_players,
            server_handle: None,
            client_handle: None,
        }
    }

    pub fn server(&self) -> Option<&ProcessHandle> {
        self.server_handle.as_ref()
    }

    pub fn client(&self) -> Option<&ProcessHandle> {
        self.client_handle.as_ref()
    }

    fn server_game_dir(&self) -> PathBuf {
        self.server.root.join(&self.server.game_dir)
    }

    fn client_game_dir(&self) -> PathBuf {
        self.client.root.join(&self.client.game_dir)
    }

    /// Copy server configs (always refreshed) and maps (only missing ones)
    pub fn stage_server_assets(&self) -> Result<()> {
        let cfg_dir = self.server_game_dir().join("cfg");
        for (src, dst) in [
            ("mapcycle.txt", "mapcycle.txt"),
            ("server.cfg", "server.cfg"),
            ("autoexec_server.cfg", "autoexec.cfg"),
        ] {
            stage_file(
                &self.assets_dir.join(src),
                &cfg_dir.join(dst),
                StageMode::Overwrite,
            )?;
        }

        let copied = stage_dir(
            &self.assets_dir.join("maps"),
            &self.server_game_dir().join("maps"),
        )?;
        debug!("Staged server assets ({} new maps)", copied);
        Ok(())
    }

    /// Copy the client autoexec and any missing maps
    pub fn stage_client_assets(&self) -> Result<()> {
        stage_file(
            &self.assets_dir.join("autoexec_css.cfg"),
            &self.client_game_dir().join("cfg").join("autoexec.cfg"),
            StageMode::Overwrite,
        )?;
        let copied = stage_dir(
            &self.assets_dir.join("maps"),
            &self.client_game_dir().join("maps"),
        )?;
        debug!("Staged client assets ({} new maps)", copied);
        Ok(())
    }

    pub fn server_args(&self, map: &Map) -> Vec<String> {
        vec![
            "-console".into(),
            "-game".into(),
            self.server.game_dir.clone(),
            "-insecure".into(),
            "-tickrate".into(),
            self.tick_rate.to_string(),
            "+maxplayers".into(),
            self.max_players.to_string(),
            "+map".into(),
            map.full_name(),
        ]
    }

    pub fn client_args(&self, connect_address: &str, window_size: u32) -> Vec<String> {
        let size = window_size.to_string();
        vec![
            "-game".into(),
            self.client.game_dir.clone(),
            "-windowed".into(),
            "-novid".into(),
            "-exec".into(),
            "autoexec".into(),
            "+connect".into(),
            connect_address.to_string(),
            "-w".into(),
            size.clone(),
            "-h".into(),
            size,
        ]
    }

    /// Stage assets and launch the dedicated server for `map`.
    ///
    /// Staging and launch failures are fatal: a missing install cannot heal
    /// itself.
    pub fn start_server(&mut self, map: &Map) -> Result<&ProcessHandle> {
        self.stage_server_assets()?;

        info!("Starting server on {}...", map.full_name());
        let handle = ProcessHandle::spawn(
            ProcessRole::Server,
            &self.server.root.join(&self.server.executable),
            &self.server_args(map),
            &self.server.root,
            ClosePolicy::from_flag(self.server.close_on_shutdown),
        )?;
        Ok(&*self.server_handle.insert(handle))
    }

    /// Launch the game client and connect it to `connect_address`.
    ///
    /// Assets were staged at startup, so a staging failure here only logs.
    /// A client that is still running is reused.
    pub fn start_client(&mut self, connect_address: &str, window_size: u32) -> Result<&ProcessHandle> {
        let running = self
            .client_handle
            .as_mut()
            .is_some_and(ProcessHandle::is_running);
        if running {
            info!("Client already running, not relaunching");
        } else {
            if let Err(e) = self.stage_client_assets() {
                warn!("Client asset staging failed, continuing: {}", e);
            }

            info!("Starting client, connecting to {}...", connect_address);
            let handle = ProcessHandle::spawn(
                ProcessRole::Client,
                &self.client.root.join(&self.client.executable),
                &self.client_args(connect_address, window_size),
                &self.client.root,
                ClosePolicy::from_flag(self.client.close_on_shutdown),
            )?;
            self.client_handle = Some(handle);
        }

        self.client_handle
            .as_ref()
            .ok_or_else(|| SurfError::ProcessError("client handle missing".into()))
    }

    /// Drop the client after its server went away, killing it if configured
    pub async fn release_client(&mut self) {
        if let Some(handle) = self.client_handle.take() {
            Self::close(handle).await;
        }
    }

    /// Terminate processes according to their close policy. Idempotent.
    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.client_handle.take() {
            Self::close(handle).await;
        }
        if let Some(handle) = self.server_handle.take() {
            Self::close(handle).await;
        }
    }

    async fn close(mut handle: ProcessHandle) {
        match handle.close_policy() {
            ClosePolicy::KillOnClose => {
                info!("Stopping {:?} process", handle.role());
                if let Err(e) = handle.terminate().await {
                    warn!("{}", e);
                }
            }
            ClosePolicy::LeaveRunning => {
                info!("Leaving {:?} process running", handle.role());
            }
        }
    }
}
