use std::{
    cell::RefCell,
    fs,
    path::{Path, PathBuf},
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
};

use cgmath::{Matrix, Matrix4, Point3, SquareMatrix, Vector3, Vector4};
use image::RgbaImage;
use lumen_ngin::{
    context::Context,
    data_structures::scene_graph::Scene,
    device::{
        BlendMode, ProgramKey, UniformValue,
        recording::{DrawRecord, RecordingDevice},
    },
    pipelines::lighting::{LightWindow, Surface, irradiance},
    render::{Renderer, RendererConfig},
    resources::texture::TextureSource,
};

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Serves 2x2 images from memory and records every path it was asked for.
#[derive(Clone, Default)]
pub(crate) struct MemoryTextures {
    pub(crate) requests: Rc<RefCell<Vec<PathBuf>>>,
    pub(crate) missing: Rc<RefCell<Vec<PathBuf>>>,
}

impl TextureSource for MemoryTextures {
    fn load(&self, path: &Path) -> anyhow::Result<RgbaImage> {
        self.requests.borrow_mut().push(path.to_path_buf());
        if self.missing.borrow().iter().any(|p| p == path) {
            anyhow::bail!("no texture at {}", path.display());
        }
        Ok(RgbaImage::from_pixel(2, 2, image::Rgba([255, 0, 0, 255])))
    }
}

impl MemoryTextures {
    pub(crate) fn loads(&self, path: &str) -> usize {
        self.requests
            .borrow()
            .iter()
            .filter(|p| p.as_path() == Path::new(path))
            .count()
    }
}

pub(crate) fn recording_context() -> (Context, MemoryTextures) {
    init_logger();
    let textures = MemoryTextures::default();
    let ctx = Context::with_texture_source(RecordingDevice::new(), textures.clone());
    (ctx, textures)
}

pub(crate) fn recording_scene(config: RendererConfig) -> (Scene, MemoryTextures) {
    let (ctx, textures) = recording_context();
    let renderer = Renderer::new(ctx, config).expect("built-in shaders compile");
    (Scene::new(renderer), textures)
}

pub(crate) fn recorder(ctx: &mut Context) -> &mut RecordingDevice {
    ctx.device_as::<RecordingDevice>()
        .expect("context records")
}

/// Draws issued with `program`, in order.
pub(crate) fn draws_of(ctx: &mut Context, program: Option<ProgramKey>) -> Vec<DrawRecord> {
    recorder(ctx)
        .draws()
        .iter()
        .filter(|d| Some(d.program) == program)
        .cloned()
        .collect()
}

fn window_of(draw: &DrawRecord) -> LightWindow {
    let n = draw.int("num_lights").unwrap_or(0).max(0) as usize;
    let vec4s = |name: &str| -> Vec<[f32; 4]> {
        draw.uniform(name)
            .and_then(UniformValue::as_vec4s)
            .map(|v| v[..n].to_vec())
            .unwrap_or_default()
    };
    let floats = |name: &str| -> Vec<f32> {
        draw.uniform(name)
            .and_then(UniformValue::as_floats)
            .map(|v| v[..n].to_vec())
            .unwrap_or_default()
    };
    LightWindow {
        colours: vec4s("colours"),
        positions: vec4s("positions"),
        intensities: floats("intensities"),
        falloffs: floats("falloffs"),
    }
}

/// Replays lighting draws the way the blend states combine them on the GPU
/// and returns the accumulated rgb at a world point with a world normal.
pub(crate) fn replay_lighting(draws: &[DrawRecord], point: Point3<f32>, normal: Vector3<f32>) -> [f32; 3] {
    let mut total = [0.0; 3];
    for draw in draws {
        let model_view = draw.view * draw.model;
        let p = model_view * Vector4::new(point.x, point.y, point.z, 1.0);
        let normal_matrix = model_view.invert().unwrap_or_else(Matrix4::identity).transpose();
        let n = (normal_matrix * normal.extend(0.0)).truncate();
        let ambient = draw
            .uniform("ambient")
            .and_then(UniformValue::as_floats)
            .map(|v| [v[0], v[1], v[2]])
            .unwrap_or([0.0; 3]);
        let surface = Surface {
            specular: draw
                .uniform("specular")
                .and_then(UniformValue::as_floats)
                .map(|v| [v[0], v[1], v[2]])
                .unwrap_or([0.0; 3]),
            specular_exponent: draw.float("specular_exponent").unwrap_or(1.0),
            transmit: draw.float("transmit").unwrap_or(0.0),
        };
        let lit = irradiance(&window_of(draw), p.truncate(), n, &surface);
        let contribution = [0, 1, 2].map(|c| ambient[c] + lit[c]);
        match draw.state.blend {
            BlendMode::Overwrite => total = contribution,
            _ => {
                for c in 0..3 {
                    total[c] += contribution[c];
                }
            }
        }
    }
    total
}

/// A scratch directory removed again on drop.
pub(crate) struct TempAssets {
    pub(crate) dir: PathBuf,
}

static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

impl TempAssets {
    pub(crate) fn new(files: &[(&str, &str)]) -> Self {
        let dir = std::env::temp_dir().join(format!(
            "lumen-ngin-{}-{}",
            std::process::id(),
            NEXT_DIR.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&dir).expect("temp dir");
        for (name, content) in files {
            fs::write(dir.join(name), content).expect("temp file");
        }
        Self { dir }
    }

    pub(crate) fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl Drop for TempAssets {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}
