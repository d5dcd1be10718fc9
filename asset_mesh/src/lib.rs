//! Mesh compilation: `.obj` sources into packed `.pkmesh` assets with a
//! meshlet LOD DAG.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod cluster;
pub mod meshlet;
pub mod pack;
pub mod writer;

mod tangent;

use std::io;

use thiserror::Error;

pub use writer::write_mesh;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to parse obj: {0}")]
    Obj(#[from] tobj::LoadError),
    #[error("mesh doesn't contain vertices")]
    EmptyMesh,
    #[error(transparent)]
    Meshopt(#[from] meshopt::Error),
    #[error("graph partitioning failed: {0}")]
    Partition(String),
    #[error("failed to calculate tangents")]
    Tangents,
    #[error(transparent)]
    Persist(#[from] asset_format::writer::Error),
}
