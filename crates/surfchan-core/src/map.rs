//! Per-episode map geometry

use crate::config::MapSpec;

/// Static geometry for the map being surfed.
///
/// The primary axis is derived once from the start and finish positions and
/// never changes afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Map {
    name: String,
    start_pos: [f64; 3],
    start_angle: f64,
    finish_pos: [f64; 3],
    ground_level: f64,
    axis: usize,
}

impl Map {
    /// Build a map and compute its primary axis
    pub fn new(
        name: impl Into<String>,
        start_pos: [f64; 3],
        start_angle: f64,
        finish_pos: [f64; 3],
        ground_level: f64,
    ) -> Self {
        Self {
            name: name.into(),
            start_pos,
            start_angle,
            finish_pos,
            ground_level,
            axis: primary_axis(&start_pos, &finish_pos),
        }
    }

    /// Build a map from its config entry
    pub fn from_spec(name: impl Into<String>, spec: &MapSpec) -> Self {
        Self::new(
            name,
            spec.start,
            spec.start_angle,
            spec.finish,
            spec.ground_level,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name the game server loads, e.g. `surf_beginner`
    pub fn full_name(&self) -> String {
        format!("surf_{}", self.name)
    }

    pub fn start_pos(&self) -> [f64; 3] {
        self.start_pos
    }

    pub fn start_angle(&self) -> f64 {
        self.start_angle
    }

    pub fn finish_pos(&self) -> [f64; 3] {
        self.finish_pos
    }

    pub fn ground_level(&self) -> f64 {
        self.ground_level
    }

    /// Coordinate index (0, 1 or 2) with the largest start-to-finish displacement
    pub fn axis(&self) -> usize {
        self.axis
    }

    /// Remaining distance to the finish along the primary axis
    pub fn distance_to_finish(&self, position: &[f64; 3]) -> f64 {
        (position[self.axis] - self.finish_pos[self.axis]).abs()
    }
}

/// Index of the largest absolute component of `finish - start`.
///
/// Ties resolve to the lowest index.
pub fn primary_axis(start: &[f64; 3], finish: &[f64; 3]) -> usize {
    let mut best = 0;
    let mut best_delta = f64::NEG_INFINITY;
    for axis in 0..3 {
        let delta = (finish[axis] - start[axis]).abs();
        if delta > best_delta {
            best = axis;
            best_delta = delta;
        }
    }
    best
}
