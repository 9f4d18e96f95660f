//! Materials: named parameter maps following MTL conventions.
//!
//! Keys are MTL statement names (`Kd`, `Ks`, `Ns`, `d`, `illum`, `map_Kd`...).
//! Texture keys (`map_*`) hold a filename and resolve lazily to a GPU texture.
//! Reassigning a texture key marks it dirty; the renderer re-resolves dirty
//! keys when the material is prepared or bound.

use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet, HashMap},
    path::{Path, PathBuf},
    rc::Rc,
};

use crate::resources::texture::GpuTexture;

/// Materials are shared between meshes of the same library.
pub type MaterialRef = Rc<RefCell<Material>>;

#[derive(Clone, Debug, PartialEq)]
pub enum MaterialValue {
    Scalar(f32),
    Tuple(Vec<f32>),
    /// Texture map filename, relative to the material's `base_dir`.
    Map(String),
}

impl MaterialValue {
    pub fn floats(&self) -> Option<Vec<f32>> {
        match self {
            MaterialValue::Scalar(v) => Some(vec![*v]),
            MaterialValue::Tuple(vs) => Some(vs.clone()),
            MaterialValue::Map(_) => None,
        }
    }
}

impl From<f32> for MaterialValue {
    fn from(v: f32) -> Self {
        MaterialValue::Scalar(v)
    }
}

impl From<[f32; 3]> for MaterialValue {
    fn from(v: [f32; 3]) -> Self {
        MaterialValue::Tuple(v.to_vec())
    }
}

impl From<[f32; 4]> for MaterialValue {
    fn from(v: [f32; 4]) -> Self {
        MaterialValue::Tuple(v.to_vec())
    }
}

pub fn is_texture_key(key: &str) -> bool {
    key.starts_with("map_")
}

#[derive(Clone, Debug, Default)]
pub struct Material {
    pub name: String,
    /// Directory texture filenames are resolved against.
    pub base_dir: PathBuf,
    values: BTreeMap<String, MaterialValue>,
    textures: HashMap<String, Rc<GpuTexture>>,
    dirty: BTreeSet<String>,
}

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn shared(self) -> MaterialRef {
        Rc::new(RefCell::new(self))
    }

    pub fn with(mut self, key: &str, value: impl Into<MaterialValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&MaterialValue> {
        self.values.get(key)
    }

    pub fn floats(&self, key: &str) -> Option<Vec<f32>> {
        self.values.get(key).and_then(MaterialValue::floats)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Assign a value. A filename on a texture key flags it dirty, nothing is
    /// loaded here.
    pub fn set(&mut self, key: &str, value: impl Into<MaterialValue>) {
        let value = value.into();
        if is_texture_key(key) {
            self.textures.remove(key);
            if matches!(value, MaterialValue::Map(_)) {
                self.dirty.insert(key.to_string());
            } else {
                self.dirty.remove(key);
            }
        }
        self.values.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<MaterialValue> {
        self.textures.remove(key);
        self.dirty.remove(key);
        self.values.remove(key)
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Absolute path of a texture map, if the key names one.
    pub fn texture_path(&self, key: &str) -> Option<PathBuf> {
        match self.values.get(key) {
            Some(MaterialValue::Map(file)) => Some(resolve(&self.base_dir, file)),
            _ => None,
        }
    }

    /// Cached texture for a clean map key.
    pub fn texture(&self, key: &str) -> Option<&Rc<GpuTexture>> {
        if self.dirty.contains(key) {
            return None;
        }
        self.textures.get(key)
    }

    /// Map keys whose texture still needs resolving, with their paths.
    pub fn unresolved_maps(&self) -> Vec<(String, PathBuf)> {
        self.values
            .iter()
            .filter_map(|(key, value)| match value {
                MaterialValue::Map(file)
                    if self.dirty.contains(key) || !self.textures.contains_key(key) =>
                {
                    Some((key.clone(), resolve(&self.base_dir, file)))
                }
                _ => None,
            })
            .collect()
    }

    pub(crate) fn store_texture(&mut self, key: &str, texture: Rc<GpuTexture>) {
        self.dirty.remove(key);
        self.textures.insert(key.to_string(), texture);
    }
}

fn resolve(base: &Path, file: &str) -> PathBuf {
    base.join(file)
}

#[cfg(test)]
mod tests {
    use super::{Material, MaterialValue};

    #[test]
    fn only_filenames_dirty_a_texture_key() {
        let mut material = Material::new("m").with("map_Kd", MaterialValue::Map("a.png".into()));
        assert!(material.is_dirty());
        assert_eq!(material.unresolved_maps().len(), 1);

        material.set("map_Kd", 1.0);
        assert!(!material.is_dirty());
        assert!(material.unresolved_maps().is_empty());
    }
}
