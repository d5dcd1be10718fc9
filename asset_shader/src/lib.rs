//! Shader compilation: the `.shader` dialect into packed `.pkshader` assets
//! with per-variant SPIR-V and reflection tables.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod compiler;
pub mod instancing;
pub mod preprocess;
pub mod reflect;
pub mod text;
pub mod writer;

use std::io;

use thiserror::Error;

pub use writer::write_shader;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("unsupported shader stage `{0}`")]
    UnknownStage(String),
    #[error("failed to initialize the shader compiler")]
    CompilerInit,
    #[error("shader compilation failed: {0}")]
    Compile(String),
    #[error("invalid spirv: {0}")]
    Reflect(String),
    #[error(transparent)]
    Persist(#[from] asset_format::writer::Error),
}
