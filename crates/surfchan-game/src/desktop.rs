//! Desktop capture backend
//!
//! With the `desktop` feature, [`DesktopScreen`] finds the client window by
//! its exact title through `xcap` and grabs regions from the monitor it sits
//! on. Monitor frames come back as RGBA; [`crop_frame`] cuts the region out
//! and reorders the pixels to BGRA.

use crate::screen::ScreenRegion;
use surfchan_core::{Image, Result, SurfError};

/// Crop `region` (screen coordinates) out of an RGBA frame whose top-left
/// corner sits at `origin`, converting to BGRA.
///
/// Fails if any part of the region falls outside the frame.
pub fn crop_frame(
    rgba: &[u8],
    width: u32,
    height: u32,
    origin: (i32, i32),
    region: &ScreenRegion,
) -> Result<Image> {
    const BPP: usize = Image::BYTES_PER_PIXEL;

    if rgba.len() != width as usize * height as usize * BPP {
        return Err(SurfError::CaptureError(format!(
            "frame is {} bytes, expected {}x{} RGBA",
            rgba.len(),
            width,
            height
        )));
    }

    let left = i64::from(region.left) - i64::from(origin.0);
    let top = i64::from(region.top) - i64::from(origin.1);
    let fits = left >= 0
        && top >= 0
        && left + i64::from(region.width) <= i64::from(width)
        && top + i64::from(region.height) <= i64::from(height);
    if !fits {
        return Err(SurfError::CaptureError(format!(
            "{:?} is outside the {}x{} display at {:?}",
            region, width, height, origin
        )));
    }

    let (left, top) = (left as usize, top as usize);
    let stride = width as usize * BPP;
    let mut data = Vec::with_capacity(region.width as usize * region.height as usize * BPP);
    for y in 0..region.height as usize {
        let start = (top + y) * stride + left * BPP;
        let row = &rgba[start..start + region.width as usize * BPP];
        for px in row.chunks_exact(BPP) {
            data.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
        }
    }

    Image::from_raw(region.width, region.height, data)
        .ok_or_else(|| SurfError::CaptureError("cropped frame has the wrong size".into()))
}

#[cfg(feature = "desktop")]
pub use backend::DesktopScreen;

#[cfg(feature = "desktop")]
mod backend {
    use super::crop_frame;
    use crate::screen::{Screen, ScreenRegion, WindowRect};
    use surfchan_core::{Image, Result, SurfError};
    use tracing::warn;
    use xcap::{Monitor, Window};

    /// Windows and pixels of the local display
    #[derive(Debug, Clone, Copy, Default)]
    pub struct DesktopScreen;

    impl DesktopScreen {
        pub fn new() -> Self {
            Self
        }
    }

    impl Screen for DesktopScreen {
        fn find_window(&self, title: &str) -> Option<WindowRect> {
            let windows = match Window::all() {
                Ok(windows) => windows,
                Err(e) => {
                    warn!("Failed to list windows: {}", e);
                    return None;
                }
            };

            windows
                .iter()
                .find(|w| w.title() == title && !w.is_minimized())
                .map(|w| WindowRect {
                    left: w.x(),
                    top: w.y(),
                    right: w.x() + w.width() as i32,
                    bottom: w.y() + w.height() as i32,
                })
        }

        fn grab(&self, region: &ScreenRegion) -> Result<Image> {
            let monitor = Monitor::from_point(region.left, region.top).map_err(|e| {
                SurfError::CaptureError(format!("no monitor at {:?}: {}", region, e))
            })?;
            let frame = monitor
                .capture_image()
                .map_err(|e| SurfError::CaptureError(format!("monitor capture failed: {}", e)))?;

            crop_frame(
                frame.as_raw(),
                frame.width(),
                frame.height(),
                (monitor.x(), monitor.y()),
                region,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 4x3 frame where pixel (x, y) is RGBA `[x, y, 100, 255]`
    fn frame() -> Vec<u8> {
        let mut data = Vec::new();
        for y in 0..3u8 {
            for x in 0..4u8 {
                data.extend_from_slice(&[x, y, 100, 255]);
            }
        }
        data
    }

    fn region(left: i32, top: i32, width: u32, height: u32) -> ScreenRegion {
        ScreenRegion {
            left,
            top,
            width,
            height,
        }
    }

    #[test]
    fn test_crop_converts_to_bgra() {
        let image = crop_frame(&frame(), 4, 3, (0, 0), &region(1, 1, 2, 2)).unwrap();
        assert_eq!((image.width(), image.height()), (2, 2));
        assert_eq!(image.pixel(0, 0), &[100, 1, 1, 255]);
        assert_eq!(image.pixel(1, 0), &[100, 1, 2, 255]);
        assert_eq!(image.pixel(1, 1), &[100, 2, 2, 255]);
    }

    #[test]
    fn test_crop_on_offset_monitor() {
        // Second monitor to the right of a 1920 wide primary
        let image = crop_frame(&frame(), 4, 3, (1920, 0), &region(1923, 2, 1, 1)).unwrap();
        assert_eq!(image.pixel(0, 0), &[100, 2, 3, 255]);
    }

    #[test]
    fn test_crop_outside_frame_fails() {
        for bad in [
            region(-1, 0, 2, 2),
            region(3, 0, 2, 1),
            region(0, 2, 1, 2),
            region(1920, 0, 1, 1),
        ] {
            assert!(matches!(
                crop_frame(&frame(), 4, 3, (0, 0), &bad),
                Err(SurfError::CaptureError(_))
            ));
        }
        assert!(crop_frame(&frame()[..8], 4, 3, (0, 0), &region(0, 0, 1, 1)).is_err());
    }
}
