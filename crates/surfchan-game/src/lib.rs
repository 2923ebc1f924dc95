//! Bridge between a reinforcement-learning loop and Counter-Strike: Source
//!
//! This crate provides:
//! - Process lifecycle for the dedicated server and the game client
//! - The socket session that accepts the server plugin's connection
//! - [`GameBridge`], the async context driving init/step/reset
//! - [`SyncBridge`], a blocking front end running the bridge on its own thread
//! - Client window lookup and per-step screen capture

pub mod bridge;
pub mod desktop;
pub mod lifecycle;
pub mod screen;
pub mod session;
pub mod sync;
pub mod timing;

pub use bridge::GameBridge;
#[cfg(feature = "desktop")]
pub use desktop::DesktopScreen;
pub use lifecycle::{ClosePolicy, ProcessHandle, ProcessManager, ProcessRole};
pub use screen::{HeadlessScreen, Screen, ScreenLocator, ScreenRegion, WindowRect};
pub use session::{Session, SessionState};
pub use sync::SyncBridge;
pub use timing::StepTimings;
