//! # Core Data Structures
//!
//! This module defines the fundamental data types used throughout the library:
//!
//! - **Vector2D**: 2D position/displacement vector with arithmetic operations
//! - **Axis**: the two coordinate axes, used for KD-tree splits
//! - **Agent**: complete state of a simulated agent (position, goal, radius, speed)
//! - **Config**: simulation tunables with production-tuned defaults

use std::ops::{Add, Div, Mul, Neg, Sub};

/// Magnitudes below this are treated as zero to avoid division blow-up.
pub(crate) const EPSILON: f64 = 1e-10;

/// One of the two coordinate axes. Keeping this a closed enum means an
/// invalid axis index is unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2D {
    pub x: f64,
    pub y: f64,
}

impl Vector2D {
    pub const ZERO: Vector2D = Vector2D { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Vector2D { x, y }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn sqr_magnitude(&self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    /// Unit vector in the same direction, or zero when the magnitude is
    /// below [`EPSILON`].
    pub fn normalized(&self) -> Vector2D {
        let mag = self.magnitude();
        if mag > EPSILON {
            *self / mag
        } else {
            Vector2D::ZERO
        }
    }

    pub fn dot(&self, other: &Vector2D) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// Rotation by 90 degrees: `(x, y)` -> `(-y, x)`.
    pub fn perpendicular(&self) -> Vector2D {
        Vector2D {
            x: -self.y,
            y: self.x,
        }
    }

    pub fn distance(&self, other: &Vector2D) -> f64 {
        (*self - *other).magnitude()
    }

    pub fn min(self, other: Vector2D) -> Vector2D {
        Vector2D {
            x: self.x.min(other.x),
            y: self.y.min(other.y),
        }
    }

    pub fn max(self, other: Vector2D) -> Vector2D {
        Vector2D {
            x: self.x.max(other.x),
            y: self.y.max(other.y),
        }
    }

    pub fn component(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
        }
    }

    pub fn set_component(&mut self, axis: Axis, value: f64) {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
        }
    }
}

impl Add for Vector2D {
    type Output = Vector2D;

    fn add(self, other: Vector2D) -> Vector2D {
        Vector2D {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }
}

impl Sub for Vector2D {
    type Output = Vector2D;

    fn sub(self, other: Vector2D) -> Vector2D {
        Vector2D {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }
}

impl Neg for Vector2D {
    type Output = Vector2D;

    fn neg(self) -> Vector2D {
        Vector2D {
            x: -self.x,
            y: -self.y,
        }
    }
}

impl Mul<f64> for Vector2D {
    type Output = Vector2D;

    fn mul(self, scalar: f64) -> Vector2D {
        Vector2D {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }
}

impl Div<f64> for Vector2D {
    type Output = Vector2D;

    fn div(self, scalar: f64) -> Vector2D {
        Vector2D {
            x: self.x / scalar,
            y: self.y / scalar,
        }
    }
}

/// A simulated circular agent. Owned by a [`Simulator`](crate::Simulator);
/// external code reads `position` and writes `goal`/`speed`/`radius` between
/// steps. The transient fields are rebuilt every fixing iteration and are not
/// part of the public surface.
#[derive(Debug, Clone)]
pub struct Agent {
    id: usize,
    pub radius: f64,
    pub goal: Vector2D,
    pub speed: f64,
    pub position: Vector2D,
    /// Slots of the agents returned by the latest neighbor query. May
    /// include the agent itself; the OA correction filters that out.
    pub(crate) neighbors: Vec<usize>,
    /// Subset of `neighbors` flagged as imminent conflicts this iteration.
    pub(crate) collisions: Vec<usize>,
    /// Displacement to apply at the end of the current sub-step.
    pub(crate) pending_move: Vector2D,
}

impl Agent {
    pub(crate) fn new(id: usize) -> Self {
        Agent {
            id,
            radius: 0.0,
            goal: Vector2D::ZERO,
            speed: 0.0,
            position: Vector2D::ZERO,
            neighbors: Vec::new(),
            collisions: Vec::new(),
            pending_move: Vector2D::ZERO,
        }
    }

    /// Identity, unique for the lifetime of the owning simulator.
    pub fn id(&self) -> usize {
        self.id
    }
}

/// Simulation tunables. Constructed once and handed to the simulator; not
/// mutated mid-run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Sub-divisions of `delta_time` per step.
    pub sub_steps: u32,
    /// Extra refinement iterations per sub-step.
    pub fixing_steps: u32,
    /// Max items per KD-tree leaf.
    pub leaf_size_max: usize,
    /// Lateral avoidance gain.
    pub horizontal_factor: f64,
    /// How far ahead to consider neighbors, scaled by speed.
    pub distance_ignore_factor: f64,
    /// Radius for the neighbor query.
    pub neighbor_factor: f64,
    /// Extra spacing margin between radii.
    pub space_factor: f64,
    /// Enables O(n^2) conflict sampling after every step.
    pub failure_recording: bool,
    /// Overlap fraction considered a failure.
    pub conflict_tolerance: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sub_steps: 2,
            fixing_steps: 2,
            leaf_size_max: 10,
            horizontal_factor: 18.0,
            distance_ignore_factor: 2.0,
            neighbor_factor: 8.5,
            space_factor: 0.01,
            failure_recording: false,
            conflict_tolerance: 0.01,
        }
    }
}
