//! Wavefront MTL material libraries.
//!
//! Statements are read by `tobj`; its typed fields and unknown parameters are
//! folded into the generic key map of [`Material`], keyed by MTL statement.

use std::{
    collections::{HashMap, HashSet},
    io::{BufReader, Cursor},
    path::{Path, PathBuf},
};

use crate::{
    data_structures::material::{Material, MaterialRef, MaterialValue, is_texture_key},
    error::{Error, Result},
    resources::load_string,
};

/// Parse MTL text. `path` names the file in errors and sets each material's
/// `base_dir` to its directory.
pub fn parse_mtl(source: &str, path: &Path) -> Result<Vec<Material>> {
    check_leading_statements(source, path)?;
    let (parsed, _) = load_mtl(source).map_err(|e| {
        Error::parse(path, failing_line(source), format!("invalid material statement: {e}"))
    })?;

    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    parsed
        .into_iter()
        .map(|m| {
            let mut material = from_tobj(&m, source, path)?;
            material.base_dir = base_dir.clone();
            Ok(material)
        })
        .collect()
}

fn load_mtl(source: &str) -> tobj::MTLLoadResult {
    tobj::load_mtl_buf(&mut BufReader::new(Cursor::new(source)))
}

/// tobj silently drops statements preceding the first `newmtl`.
fn check_leading_statements(source: &str, path: &Path) -> Result<()> {
    for (idx, line) in source.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        return match line.split_whitespace().next() {
            Some("newmtl") => Ok(()),
            Some(cmd) => Err(Error::parse(
                path,
                idx + 1,
                format!("'{cmd}' before the first newmtl statement"),
            )),
            None => Ok(()),
        };
    }
    Ok(())
}

/// tobj reports no position, so the first prefix that fails to load names
/// the offending line.
fn failing_line(source: &str) -> usize {
    let lines: Vec<&str> = source.lines().collect();
    (1..=lines.len())
        .find(|&n| load_mtl(&lines[..n].join("\n")).is_err())
        .unwrap_or(0)
}

fn from_tobj(m: &tobj::Material, source: &str, path: &Path) -> Result<Material> {
    let mut material = Material::new(m.name.as_str());
    let colours = [("Ka", m.ambient), ("Kd", m.diffuse), ("Ks", m.specular)];
    for (key, colour) in colours {
        if let Some(c) = colour {
            material.set(key, c);
        }
    }
    let scalars = [
        ("Ns", m.shininess),
        ("d", m.dissolve),
        ("Ni", m.optical_density),
        ("illum", m.illumination_model.map(f32::from)),
    ];
    for (key, value) in scalars {
        if let Some(v) = value {
            material.set(key, v);
        }
    }
    let maps = [
        ("map_Ka", &m.ambient_texture),
        ("map_Kd", &m.diffuse_texture),
        ("map_Ks", &m.specular_texture),
        ("map_Bump", &m.normal_texture),
        ("map_Ns", &m.shininess_texture),
        ("map_d", &m.dissolve_texture),
    ];
    for (key, file) in maps {
        if let Some(file) = file {
            material.set(key, map_value(file));
        }
    }

    // Sorted so errors and logs do not depend on hash order.
    let mut unknown: Vec<(&String, &String)> = m.unknown_param.iter().collect();
    unknown.sort();
    for (key, args) in unknown {
        if key.starts_with('#') {
            continue;
        }
        if is_texture_key(key) {
            material.set(key, map_value(args));
            continue;
        }
        let values = args
            .split_whitespace()
            .map(|a| a.parse::<f32>())
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|_| {
                Error::parse(
                    path,
                    statement_line(source, &m.name, key),
                    format!("invalid number in '{key} {args}'"),
                )
            })?;
        match values.as_slice() {
            [] => log::debug!("material '{}': {key} has no value, ignored", m.name),
            [v] => material.set(key, *v),
            _ => material.set(key, MaterialValue::Tuple(values)),
        }
    }
    Ok(material)
}

/// Line of the first `key` statement inside material `name`.
fn statement_line(source: &str, name: &str, key: &str) -> usize {
    let mut current = None;
    for (idx, line) in source.lines().enumerate() {
        let line = line.trim();
        match line.split_whitespace().next() {
            Some("newmtl") => current = line.get(6..).map(str::trim),
            Some(cmd) if cmd == key && current == Some(name) => return idx + 1,
            _ => {}
        }
    }
    0
}

/// Map options (`-blendu on` etc.) precede the filename.
fn map_value(args: &str) -> MaterialValue {
    let file = args.split_whitespace().last().unwrap_or(args);
    MaterialValue::Map(file.to_string())
}

/// All materials known to an importer, by name.
///
/// Each library file is read at most once; later `mtllib` statements naming
/// it again reuse the materials already loaded.
#[derive(Debug, Default)]
pub struct MaterialLibrary {
    loaded: HashSet<PathBuf>,
    materials: HashMap<String, MaterialRef>,
}

impl MaterialLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a library file unless it was loaded before.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if self.loaded.contains(path) {
            return Ok(());
        }
        let text = load_string(path)?;
        for material in parse_mtl(&text, path)? {
            self.insert(material);
        }
        log::debug!("loaded material library {}", path.display());
        self.loaded.insert(path.to_path_buf());
        Ok(())
    }

    pub fn is_loaded(&self, path: impl AsRef<Path>) -> bool {
        self.loaded.contains(path.as_ref())
    }

    /// Register a material, replacing any material of the same name.
    pub fn insert(&mut self, material: Material) -> MaterialRef {
        let name = material.name.clone();
        let material = material.shared();
        self.materials.insert(name, material.clone());
        material
    }

    pub fn get(&self, name: &str) -> Option<MaterialRef> {
        self.materials.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scalars_tuples_and_maps() {
        let text = "# comment\nnewmtl wood\nKd 0.5 0.25 0.125\nNs 10\nmap_Kd textures/wood.png\n\nnewmtl glass\nd 0.3\n";
        let materials = parse_mtl(text, Path::new("assets/lib.mtl")).unwrap();
        assert_eq!(materials.len(), 2);

        let wood = &materials[0];
        assert_eq!(wood.name, "wood");
        assert_eq!(wood.get("Kd"), Some(&MaterialValue::Tuple(vec![0.5, 0.25, 0.125])));
        assert_eq!(wood.get("Ns"), Some(&MaterialValue::Scalar(10.0)));
        assert_eq!(
            wood.texture_path("map_Kd"),
            Some(PathBuf::from("assets/textures/wood.png"))
        );
        assert_eq!(materials[1].get("d"), Some(&MaterialValue::Scalar(0.3)));
    }

    #[test]
    fn bad_number_reports_the_line() {
        let err = parse_mtl("newmtl a\nKd 1 x 1\n", Path::new("a.mtl")).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 2, .. }));
    }

    #[test]
    fn unknown_statements_keep_their_values() {
        let text = "newmtl lamp\nKe 0.1 0.2 0.3\nTr 0.5\nillum 2\nmap_Kd -blendu on glow.png\nmap_refl sky.png\n";
        let materials = parse_mtl(text, Path::new("lamp.mtl")).unwrap();
        let lamp = &materials[0];
        assert_eq!(lamp.get("Ke"), Some(&MaterialValue::Tuple(vec![0.1, 0.2, 0.3])));
        assert_eq!(lamp.get("Tr"), Some(&MaterialValue::Scalar(0.5)));
        assert_eq!(lamp.get("illum"), Some(&MaterialValue::Scalar(2.0)));
        assert_eq!(lamp.get("map_Kd"), Some(&MaterialValue::Map("glow.png".into())));
        assert_eq!(lamp.get("map_refl"), Some(&MaterialValue::Map("sky.png".into())));
    }

    #[test]
    fn bad_number_in_an_unknown_statement_reports_its_line() {
        let text = "newmtl a\nKd 1 1 1\nnewmtl b\nTf 1 x 1\n";
        let err = parse_mtl(text, Path::new("a.mtl")).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 4, .. }), "{err}");
    }
}
