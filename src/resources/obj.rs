//! Wavefront OBJ import.
//!
//! Import happens in two phases. Parsing collects faces into face groups,
//! material-contiguous runs closed by every `usemtl` that follows faces.
//! Each group then becomes one indexed [`Mesh`]: corners are deduplicated by
//! their `(position, texcoord, normal)` index triple in first-seen order, so
//! shared corners share one output vertex. Merging groups that use the same
//! material is left to [`Model::optimise`].
//!
//! Nothing here touches the GPU.

use std::{collections::HashMap, path::Path};

use crate::{
    data_structures::{
        material::MaterialRef,
        mesh::{DrawMode, Geometry, Mesh},
        model::Model,
    },
    error::{Error, Result},
    resources::{load_string, mtl::MaterialLibrary},
};

#[derive(Clone, Copy, Debug, Default)]
pub struct ObjOptions {
    /// Swap the y and z components of positions and normals.
    pub swap_yz: bool,
    /// Merge meshes sharing a draw mode and material after loading.
    pub optimise: bool,
}

/// Zero-based corner indices. Texcoord and normal are optional.
type CornerKey = (usize, Option<usize>, Option<usize>);

struct Face {
    line: usize,
    corners: Vec<CornerKey>,
}

struct FaceGroup {
    material: MaterialRef,
    name: Option<String>,
    faces: Vec<Face>,
}

#[derive(Default)]
struct Sources {
    positions: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    texcoords: Vec<[f32; 2]>,
}

/// Loads OBJ files, sharing one [`MaterialLibrary`] across every file it reads.
#[derive(Debug, Default)]
pub struct ObjImporter {
    pub options: ObjOptions,
    materials: MaterialLibrary,
}

impl ObjImporter {
    pub fn new(options: ObjOptions) -> Self {
        Self {
            options,
            materials: MaterialLibrary::new(),
        }
    }

    pub fn materials(&self) -> &MaterialLibrary {
        &self.materials
    }

    pub fn materials_mut(&mut self) -> &mut MaterialLibrary {
        &mut self.materials
    }

    /// Read and import an OBJ file into a model.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<Model> {
        let path = path.as_ref();
        let text = load_string(path)?;
        let mut model = Model::new(self.import(&text, path)?);
        if self.options.optimise {
            model.optimise();
        }
        log::debug!("imported {} ({} meshes)", path.display(), model.meshes.len());
        Ok(model)
    }

    /// Import OBJ text. `path` names the source in errors and `mtllib`
    /// statements are resolved against its directory.
    ///
    /// Every whitespace-separated `mtllib` argument names its own library, so
    /// library filenames cannot contain spaces.
    pub fn import(&mut self, source: &str, path: &Path) -> Result<Vec<Mesh>> {
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut sources = Sources::default();
        let mut groups: Vec<FaceGroup> = Vec::new();
        let mut current: Option<FaceGroup> = None;
        let mut material: Option<MaterialRef> = None;
        let mut object: Option<String> = None;

        for (idx, line) in source.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let Some(cmd) = tokens.next() else { continue };
            let args: Vec<&str> = tokens.collect();
            let err = |message: String| Error::parse(path, line_no, message);

            match cmd {
                "v" => {
                    let v = self.vector3(&args, path, line_no)?;
                    sources.positions.push(v);
                }
                "vn" => {
                    let n = self.vector3(&args, path, line_no)?;
                    sources.normals.push(n);
                }
                "vt" => {
                    let values = parse_floats(&args, path, line_no)?;
                    let uv = match values.as_slice() {
                        [] => return Err(err("vt without components".to_string())),
                        [u] => [*u, 0.0],
                        [u, v, ..] => [*u, *v],
                    };
                    sources.texcoords.push(uv);
                }
                "usemtl" | "usemat" => {
                    let name = args
                        .first()
                        .ok_or_else(|| err(format!("{cmd} without a material name")))?;
                    let next = self
                        .materials
                        .get(name)
                        .ok_or_else(|| err(format!("unknown material '{name}'")))?;
                    groups.extend(current.take());
                    material = Some(next);
                }
                "mtllib" => {
                    for file in &args {
                        self.materials.load(base_dir.join(file))?;
                    }
                }
                "o" => object = args.first().map(|s| s.to_string()),
                "f" => {
                    let corners = args
                        .iter()
                        .map(|corner| resolve_corner(corner, &sources, path, line_no))
                        .collect::<Result<Vec<_>>>()?;
                    if !(3..=4).contains(&corners.len()) {
                        return Err(err(format!(
                            "faces need 3 or 4 corners, got {}",
                            corners.len()
                        )));
                    }
                    if current.is_none() {
                        let material = material.clone().ok_or_else(|| {
                            err("face before any material was selected".to_string())
                        })?;
                        current = Some(FaceGroup {
                            material,
                            name: object.clone(),
                            faces: Vec::new(),
                        });
                    }
                    if let Some(group) = current.as_mut() {
                        group.faces.push(Face {
                            line: line_no,
                            corners,
                        });
                    }
                }
                other => log::debug!("{}:{line_no}: ignoring '{other}'", path.display()),
            }
        }
        groups.extend(current);

        groups
            .into_iter()
            .map(|group| build_mesh(group, &sources, path))
            .collect()
    }

    fn vector3(&self, args: &[&str], path: &Path, line: usize) -> Result<[f32; 3]> {
        let values = parse_floats(args, path, line)?;
        let [x, y, z] = match values.as_slice() {
            [x, y, z, ..] => [*x, *y, *z],
            _ => {
                return Err(Error::parse(
                    path,
                    line,
                    format!("expected 3 components, got {}", values.len()),
                ));
            }
        };
        Ok(if self.options.swap_yz {
            [x, z, y]
        } else {
            [x, y, z]
        })
    }
}

fn parse_floats(args: &[&str], path: &Path, line: usize) -> Result<Vec<f32>> {
    args.iter()
        .map(|a| {
            a.parse::<f32>()
                .map_err(|_| Error::parse(path, line, format!("invalid number '{a}'")))
        })
        .collect()
}

/// Parse one `v[/vt[/vn]]` corner. Negative indices count back from the
/// arrays as they stand at this line; positive ones may refer forward and
/// are range checked when the mesh is built.
fn resolve_corner(corner: &str, sources: &Sources, path: &Path, line: usize) -> Result<CornerKey> {
    let mut parts = corner.split('/');
    let mut index = |len: usize| -> Result<Option<usize>> {
        let Some(part) = parts.next().filter(|p| !p.is_empty()) else {
            return Ok(None);
        };
        let i: i64 = part
            .parse()
            .map_err(|_| Error::parse(path, line, format!("invalid index '{part}'")))?;
        match i {
            0 => Ok(None),
            i if i > 0 => Ok(Some(i as usize - 1)),
            i => {
                let back = i.unsigned_abs() as usize;
                len.checked_sub(back).map(Some).ok_or_else(|| {
                    Error::parse(path, line, format!("relative index {i} out of range"))
                })
            }
        }
    };
    let v = index(sources.positions.len())?
        .ok_or_else(|| Error::parse(path, line, format!("corner '{corner}' has no position")))?;
    let vt = index(sources.texcoords.len())?;
    let vn = index(sources.normals.len())?;
    Ok((v, vt, vn))
}

fn build_mesh(group: FaceGroup, sources: &Sources, path: &Path) -> Result<Mesh> {
    let quads = group.faces.iter().any(|f| f.corners.len() == 4);
    let mode = if quads { DrawMode::Quads } else { DrawMode::Triangles };
    let with_normals = !sources.normals.is_empty();
    let with_texcoords = !sources.texcoords.is_empty();

    let mut seen: HashMap<CornerKey, u32> = HashMap::new();
    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut texcoords = Vec::new();
    let mut indices = Vec::new();

    for face in &group.faces {
        let out_of_range = |what: &str, i: usize| {
            Error::parse(path, face.line, format!("{what} index {} out of range", i + 1))
        };
        // A triangle inside a quad group becomes a degenerate quad.
        let mut corners = face.corners.clone();
        if quads && corners.len() == 3 {
            corners.push(corners[2]);
        }
        for key in corners {
            let next = seen.len() as u32;
            let index = match seen.get(&key) {
                Some(&index) => index,
                None => {
                    let (v, vt, vn) = key;
                    let p = sources.positions.get(v).ok_or_else(|| out_of_range("position", v))?;
                    positions.extend_from_slice(p);
                    if with_normals {
                        let n = match vn {
                            Some(i) => *sources.normals.get(i).ok_or_else(|| out_of_range("normal", i))?,
                            None => [0.0; 3],
                        };
                        normals.extend_from_slice(&n);
                    }
                    if with_texcoords {
                        let t = match vt {
                            Some(i) => *sources.texcoords.get(i).ok_or_else(|| out_of_range("texcoord", i))?,
                            None => [0.0; 2],
                        };
                        texcoords.extend_from_slice(&t);
                    }
                    seen.insert(key, next);
                    next
                }
            };
            indices.push(index);
        }
    }

    let mesh = Mesh::new(
        mode,
        Geometry::new(positions, normals, texcoords, indices),
        group.material,
    )?;
    Ok(match group.name {
        Some(name) => mesh.with_name(name),
        None => mesh.with_name(path.display().to_string()),
    })
}

/// Convenience for callers that keep no importer around.
pub fn load_obj(path: impl AsRef<Path>, options: ObjOptions) -> Result<Model> {
    ObjImporter::new(options).load(path)
}
