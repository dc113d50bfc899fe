//! # Avoidance Core
//!
//! Real-time local collision avoidance for circular agents on a 2D plane.
//!
//! ## Algorithms
//!
//! - **KD-tree spatial index**: rebuildable radius-query structure with a
//!   pooled node arena, suited to the rebuild-every-frame pattern
//! - **Iterative lateral avoidance**: each step refines agent headings over
//!   a few fixing rounds, accumulating left/right steering biases away from
//!   imminent conflicts, then applies collision-limited displacements
//!
//! ## Usage
//!
//! ```
//! use avoidance_core::{Config, Simulator, Vector2D};
//!
//! let mut sim = Simulator::new(Config::default());
//! let id = {
//!     let agent = sim.create_agent();
//!     agent.position = Vector2D::new(0.0, 0.0);
//!     agent.goal = Vector2D::new(10.0, 0.0);
//!     agent.radius = 0.5;
//!     agent.speed = 1.0;
//!     agent.id()
//! };
//!
//! sim.step(0.1);
//! let agent = sim.get_agent(id).unwrap();
//! assert!(agent.position.x > 0.0);
//! ```
//!
//! With the `python` feature enabled the crate also builds as a Python
//! extension module exposing the same surface.

mod kdtree;
#[cfg(feature = "python")]
mod python;
mod simulator;
mod structs;

pub use kdtree::{KdNode, KdTree, Positioned};
pub use simulator::Simulator;
pub use structs::{Agent, Axis, Config, Vector2D};
