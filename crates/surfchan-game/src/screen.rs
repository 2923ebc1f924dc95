//! Client window lookup and screen capture
//!
//! The OS-specific parts (finding a window by title, grabbing pixels) sit
//! behind [`Screen`]; see [`crate::desktop`] for the real display backend. [`ScreenLocator`] polls it until the client window shows
//! up and turns the window rect into the region captured on every step.

use std::sync::Arc;
use std::time::Duration;
use surfchan_bridge::Signal;
use surfchan_core::config::{ObservationConfig, WindowConfig};
use surfchan_core::{Image, Result};
use tracing::{debug, info};

/// Outer window rectangle in screen coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// Pixel rectangle captured for each observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenRegion {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl ScreenRegion {
    /// Skip the window border and title bar, then take a `size` square
    pub fn from_window(rect: WindowRect, window: &WindowConfig, size: u32) -> Self {
        Self {
            left: rect.left + window.border_left,
            top: rect.top + window.border_top,
            width: size,
            height: size,
        }
    }
}

/// Window lookup and pixel capture
pub trait Screen: Send + Sync {
    /// Outer rect of the first window titled `title`, if one exists
    fn find_window(&self, title: &str) -> Option<WindowRect>;

    /// Grab `region` as a BGRA image. May block.
    fn grab(&self, region: &ScreenRegion) -> Result<Image>;
}

/// Screen for machines without a game window: one window with a fixed rect
/// and blank frames
#[derive(Debug, Clone)]
pub struct HeadlessScreen {
    title: String,
    rect: WindowRect,
}

impl HeadlessScreen {
    pub fn new(title: impl Into<String>, rect: WindowRect) -> Self {
        Self {
            title: title.into(),
            rect,
        }
    }
}

impl Default for HeadlessScreen {
    fn default() -> Self {
        Self::new(
            WindowConfig::default().title,
            WindowRect {
                left: 0,
                top: 0,
                right: 128,
                bottom: 128,
            },
        )
    }
}

impl Screen for HeadlessScreen {
    fn find_window(&self, title: &str) -> Option<WindowRect> {
        (title == self.title).then_some(self.rect)
    }

    fn grab(&self, region: &ScreenRegion) -> Result<Image> {
        Ok(Image::blank(region.width, region.height))
    }
}

/// Resolves the client window into a [`ScreenRegion`]
#[derive(Clone)]
pub struct ScreenLocator {
    screen: Arc<dyn Screen>,
    window: WindowConfig,
    size: u32,
}

impl ScreenLocator {
    pub fn new(screen: Arc<dyn Screen>, window: WindowConfig, observation: &ObservationConfig) -> Self {
        Self {
            screen,
            window,
            size: observation.size,
        }
    }

    /// Poll for the window until it exists. Returns None if `shutdown` fires
    /// first.
    pub async fn locate(&self, shutdown: &Signal) -> Option<ScreenRegion> {
        let poll = self.window.poll_interval().max(Duration::from_millis(1));
        let mut attempts = 0u32;
        loop {
            if let Some(rect) = self.screen.find_window(&self.window.title) {
                let region = ScreenRegion::from_window(rect, &self.window, self.size);
                info!(
                    "Found '{}' window after {} attempt(s): {:?}",
                    self.window.title,
                    attempts + 1,
                    region
                );
                return Some(region);
            }
            attempts += 1;
            debug!("Window '{}' not found yet", self.window.title);

            tokio::select! {
                _ = shutdown.fired() => return None,
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }
}
