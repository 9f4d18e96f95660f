//! Error types shared by the importer, the binding protocol and the renderer.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed mesh or material text. Fatal to the current load.
    #[error("{}:{line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("resource not found: {}", path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("shader '{name}' failed to compile: {message}")]
    ShaderCompile { name: String, message: String },

    /// The program was never linked; check `Shader::is_linked` before binding.
    #[error("shader '{0}' is not linked")]
    ShaderNotLinked(String),

    #[error("shader '{0}' is not the bound program")]
    ShaderNotBound(String),

    #[error("invalid uniform '{name}': {message}")]
    InvalidUniform { name: String, message: String },

    #[error("framebuffer {width}x{height} incomplete: {reason}")]
    FramebufferIncomplete {
        width: u32,
        height: u32,
        reason: String,
    },

    /// A camera no projection can be built for (bad field of view or planes).
    #[error("invalid camera: {0}")]
    InvalidCamera(String),

    #[error("invalid mesh: {0}")]
    InvalidMesh(String),

    #[error("unknown {0} handle")]
    UnknownResource(&'static str),

    #[error("texture error: {0}")]
    Texture(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    pub(crate) fn not_found(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::NotFound {
            path: path.into(),
            source,
        }
    }
}
