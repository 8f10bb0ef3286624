//! Cloth simulation
//!
//! Game side: [`ClothGridMesh`] derives a [`ClothParameterBlock`] every frame and sends it
//! through a [`ClothCommandSender`]. Render side: [`ClothSystem`] collects the commands in
//! a [`ClothSimulationRegistry`] and lets the [`ClothBatchDeformer`] simulate every
//! registered mesh in one batch.

pub mod buffers;
pub mod deformer;
pub mod deriver;
pub mod grid;
pub mod mesh;
pub mod parameters;
pub mod registry;
pub mod system;
pub mod wind;

pub use buffers::{ClothVertexBuffers, ClothWorkBuffers};
pub use deformer::ClothBatchDeformer;
pub use deriver::{ClothFrameParameterDeriver, DerivedFrame};
pub use grid::{ClothMaterial, ClothSettings, ClothTangent, GridMeshData};
pub use mesh::ClothGridMesh;
pub use parameters::*;
pub use registry::*;
pub use system::{ClothCommand, ClothCommandSender, ClothSystem, FrameReport};
pub use wind::ClothWind;
