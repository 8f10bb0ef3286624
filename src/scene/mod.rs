//! Scene objects the cloth simulation reads from

mod collider;
mod transform;

pub use collider::*;
pub use transform::*;
