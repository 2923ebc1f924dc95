//! Telemetry and observation types

use std::str::FromStr;

use crate::error::SurfError;

/// Player state reported by the game once per tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    pub position: [f64; 3],
    /// Facing angle in degrees
    pub angle: f64,
    pub velocity: [f64; 3],
    /// Scalar speed as computed by the game
    pub speed: f64,
    pub crouching: bool,
}

impl Telemetry {
    const FIELD_COUNT: usize = 9;
}

impl FromStr for Telemetry {
    type Err = SurfError;

    /// Parse `x,y,z,angle,vx,vy,vz,speed,crouch_flag`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').map(str::trim).collect();
        if fields.len() != Self::FIELD_COUNT {
            return Err(SurfError::TelemetryError(format!(
                "expected {} fields, got {}: {}",
                Self::FIELD_COUNT,
                fields.len(),
                s
            )));
        }

        let float = |i: usize| -> Result<f64, SurfError> {
            fields[i].parse::<f64>().map_err(|e| {
                SurfError::TelemetryError(format!("field {} ({:?}): {}", i, fields[i], e))
            })
        };

        let crouching = match fields[8] {
            "1" | "true" => true,
            "0" | "false" => false,
            other => {
                return Err(SurfError::TelemetryError(format!(
                    "invalid crouch flag: {:?}",
                    other
                )));
            }
        };

        Ok(Self {
            position: [float(0)?, float(1)?, float(2)?],
            angle: float(3)?,
            velocity: [float(4)?, float(5)?, float(6)?],
            speed: float(7)?,
            crouching,
        })
    }
}

/// Captured screen pixels, tightly packed rows of 4-byte BGRA pixels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Image {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Wrap raw pixel data; returns None if the length does not match the size
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        let expected = width as usize * height as usize * Self::BYTES_PER_PIXEL;
        (data.len() == expected).then_some(Self {
            width,
            height,
            data,
        })
    }

    /// All-black image
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * Self::BYTES_PER_PIXEL],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let start = (y as usize * self.width as usize + x as usize) * Self::BYTES_PER_PIXEL;
        &self.data[start..start + Self::BYTES_PER_PIXEL]
    }

    /// Nearest-neighbour resample to `width` x `height`.
    ///
    /// Deterministic: the same input always maps to the same output.
    pub fn resample(&self, width: u32, height: u32) -> Image {
        if width == self.width && height == self.height {
            return self.clone();
        }
        if self.width == 0 || self.height == 0 {
            return Image::blank(width, height);
        }

        let mut data = Vec::with_capacity(width as usize * height as usize * Self::BYTES_PER_PIXEL);
        for y in 0..height {
            let src_y = (y as u64 * self.height as u64 / height as u64) as u32;
            for x in 0..width {
                let src_x = (x as u64 * self.width as u64 / width as u64) as u32;
                data.extend_from_slice(self.pixel(src_x, src_y));
            }
        }

        Image {
            width,
            height,
            data,
        }
    }
}

/// What a step returns to the training loop
#[derive(Debug, Clone)]
pub struct Observation {
    pub telemetry: Telemetry,
    pub image: Image,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_telemetry() {
        let t: Telemetry = "10.0,0.0,64.0,90.0,1.0,0.0,0.0,1.0,0".parse().unwrap();
        assert_eq!(t.position, [10.0, 0.0, 64.0]);
        assert_eq!(t.angle, 90.0);
        assert_eq!(t.velocity, [1.0, 0.0, 0.0]);
        assert_eq!(t.speed, 1.0);
        assert!(!t.crouching);
    }

    #[test]
    fn test_parse_telemetry_rejects_bad_payloads() {
        assert!("1,2,3".parse::<Telemetry>().is_err());
        assert!("a,0,0,0,0,0,0,0,0".parse::<Telemetry>().is_err());
        assert!("0,0,0,0,0,0,0,0,maybe".parse::<Telemetry>().is_err());
    }

    #[test]
    fn test_resample_nearest() {
        // 2x2 image, each pixel a distinct grey level
        let mut data = Vec::new();
        for level in [10u8, 20, 30, 40] {
            data.extend_from_slice(&[level, level, level, 255]);
        }
        let img = Image::from_raw(2, 2, data).unwrap();

        let up = img.resample(4, 4);
        assert_eq!(up.width(), 4);
        assert_eq!(up.data().len(), 4 * 4 * 4);
        assert_eq!(up.pixel(0, 0)[0], 10);
        assert_eq!(up.pixel(3, 0)[0], 20);
        assert_eq!(up.pixel(0, 3)[0], 30);
        assert_eq!(up.pixel(3, 3)[0], 40);

        let down = up.resample(2, 2);
        assert_eq!(down, img);
    }

    #[test]
    fn test_from_raw_checks_length() {
        assert!(Image::from_raw(2, 2, vec![0; 15]).is_none());
    }
}
