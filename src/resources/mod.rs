//! Loading meshes, materials and textures from external files.
//!
//! - [`obj`] turns Wavefront OBJ text into indexed meshes
//! - [`mtl`] parses material libraries and remembers which ones were loaded
//! - [`texture`] caches decoded textures by filename

use std::path::Path;

use crate::error::{Error, Result};

pub mod mtl;
pub mod obj;
pub mod texture;

pub fn load_string(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    std::fs::read_to_string(path).map_err(|e| io_error(path, e))
}

pub fn load_binary(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::not_found(path, e)
    } else {
        Error::Io(e)
    }
}
