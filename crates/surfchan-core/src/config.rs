//! Bridge configuration
//!
//! Every section has defaults, so a config file only needs to name what it
//! changes. Files are JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SurfError};
use crate::map::Map;

/// How frames are delimited on the TCP stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Each frame is terminated by `\n`
    #[default]
    Newline,
    /// Each transport read is one frame (legacy peers that send no terminator)
    Datagram,
}

/// Top-level bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub listen: ListenConfig,
    pub server: ServerConfig,
    pub client: ClientConfig,
    /// Directory holding `server.cfg`, `mapcycle.txt`, the autoexec files and `maps/`
    pub assets_dir: PathBuf,
    pub window: WindowConfig,
    pub observation: ObservationConfig,
    pub maps: HashMap<String, MapSpec>,
    /// Server tick rate, passed to the server and sent with `Init`
    pub tick_rate: u32,
    pub max_players: u32,
    /// Wait for an operator signal before sending `Start`
    pub operator_start: bool,
    /// Unconsumed frames kept per kind before the oldest is dropped
    pub max_buffered_frames: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            server: ServerConfig::default(),
            client: ClientConfig::default(),
            assets_dir: PathBuf::from("assets"),
            window: WindowConfig::default(),
            observation: ObservationConfig::default(),
            maps: HashMap::new(),
            tick_rate: 66,
            max_players: 2,
            operator_start: true,
            max_buffered_frames: 256,
        }
    }
}

impl BridgeConfig {
    /// Load a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SurfError::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| SurfError::ConfigError(e.to_string()))
    }

    /// Resolve a map by name
    pub fn map(&self, name: &str) -> Result<Map> {
        self.maps
            .get(name)
            .map(|spec| Map::from_spec(name, spec))
            .ok_or_else(|| SurfError::ConfigError(format!("unknown map: {}", name)))
    }
}

/// Where the bridge listens for the game server plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub host: String,
    /// 0 picks a free port
    pub port: u16,
    pub framing: Framing,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 27050,
            framing: Framing::Newline,
        }
    }
}

impl ListenConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Dedicated server process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Spawn the server; disable when it is managed elsewhere
    pub launch: bool,
    pub root: PathBuf,
    /// Executable, relative to `root`
    pub executable: PathBuf,
    pub game_dir: String,
    pub close_on_shutdown: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            launch: true,
            root: PathBuf::from("css_server/server"),
            executable: PathBuf::from("srcds.exe"),
            game_dir: "cstrike".into(),
            close_on_shutdown: true,
        }
    }
}

/// Game client process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Spawn the client once the server announces its address
    pub launch: bool,
    pub root: PathBuf,
    /// Executable, relative to `root`
    pub executable: PathBuf,
    pub game_dir: String,
    pub close_on_shutdown: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            launch: true,
            root: PathBuf::from("css"),
            executable: PathBuf::from("hl2.exe"),
            game_dir: "cstrike".into(),
            close_on_shutdown: true,
        }
    }
}

/// Client window lookup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    /// Requested client window width and height in pixels
    pub size: u32,
    /// Offset from the window's outer rect to the rendered area
    pub border_left: i32,
    pub border_top: i32,
    pub poll_interval_ms: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Counter-Strike Source".into(),
            size: 128,
            border_left: 3,
            border_top: 26,
            poll_interval_ms: 250,
        }
    }
}

impl WindowConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Observation image settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationConfig {
    /// Observation images are `size` x `size`
    pub size: u32,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self { size: 128 }
    }
}

/// Map entry in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapSpec {
    pub start: [f64; 3],
    #[serde(default)]
    pub start_angle: f64,
    pub finish: [f64; 3],
    #[serde(default)]
    pub ground_level: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let json = r#"{
            "listen": { "port": 0, "framing": "datagram" },
            "client": { "launch": false },
            "maps": {
                "beginner": { "start": [0, -128, 336], "start_angle": 90, "finish": [0, 6000, -1200] }
            }
        }"#;
        let config = BridgeConfig::from_json(json).unwrap();

        assert_eq!(config.listen.host, "127.0.0.1");
        assert_eq!(config.listen.port, 0);
        assert_eq!(config.listen.framing, Framing::Datagram);
        assert!(!config.client.launch);
        assert_eq!(config.client.executable, PathBuf::from("hl2.exe"));
        assert!(config.server.launch);
        assert_eq!(config.tick_rate, 66);

        let map = config.map("beginner").unwrap();
        assert_eq!(map.axis(), 1);
        assert_eq!(map.ground_level(), 0.0);
    }

    #[test]
    fn test_unknown_map() {
        let config = BridgeConfig::default();
        assert!(matches!(config.map("nope"), Err(SurfError::ConfigError(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = BridgeConfig::from_file("/nonexistent/surfchan.json").unwrap_err();
        assert!(matches!(err, SurfError::ConfigError(_)));
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        for text in ["{", r#"{"tick_rate": "fast"}"#, r#"{"listen": {"framing": "smoke"}}"#] {
            let err = BridgeConfig::from_json(text).unwrap_err();
            assert!(matches!(err, SurfError::ConfigError(_)), "{}: {:?}", text, err);
        }
    }
}
