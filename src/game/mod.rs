//! Client-Side Game State
//!
//! The presentation loop's kinematic model. Owned by the main loop only;
//! the network session hands messages over through its queue.
//!
//! ## Module Structure
//!
//! - `controls`: Per-peer kinematics and movement intents
//! - `world`: Local player, remote peers, message application

pub mod controls;
pub mod world;

// Re-export key types
pub use controls::{Intent, TiltControls};
pub use world::LocalWorld;
