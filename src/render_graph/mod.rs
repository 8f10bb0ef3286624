//! Render Graph System
//!
//! A declarative system for defining GPU passes as a directed acyclic graph (DAG).
//! Passes declare which buffer ranges they read and write; the graph derives the
//! execution order and groups independent passes into stages.

pub mod executor;
pub mod graph;
pub mod pass;
pub mod resource;

pub use executor::*;
pub use graph::*;
pub use pass::*;
pub use resource::*;
