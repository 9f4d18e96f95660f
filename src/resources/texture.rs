use std::{
    cell::RefCell,
    collections::HashMap,
    path::{Path, PathBuf},
    rc::{Rc, Weak},
};

use image::{RgbaImage, imageops::FilterType};

use crate::{
    device::{GraphicsDevice, TextureData, TextureKey},
    error::{Error, Result},
    resources::load_binary,
};

/// Decodes texture files into RGBA images.
pub trait TextureSource {
    fn load(&self, path: &Path) -> anyhow::Result<RgbaImage>;
}

/// Reads and decodes images from disk with the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileTextureSource;

impl TextureSource for FileTextureSource {
    fn load(&self, path: &Path) -> anyhow::Result<RgbaImage> {
        let bytes = load_binary(path)?;
        let img = image::load_from_memory(&bytes)?;
        Ok(img.to_rgba8())
    }
}

/// A texture alive in the device.
///
/// Dropping the last handle queues the texture for release; the device
/// resource itself is freed by [`TextureCache::collect`].
#[derive(Debug)]
pub struct GpuTexture {
    key: TextureKey,
    size: (u32, u32),
    released: Rc<RefCell<Vec<TextureKey>>>,
}

impl GpuTexture {
    pub fn key(&self) -> TextureKey {
        self.key
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }
}

impl Drop for GpuTexture {
    fn drop(&mut self) {
        self.released.borrow_mut().push(self.key);
    }
}

/// Full mip chain of `img`, halving each level down to 1x1.
pub fn mip_chain(img: RgbaImage) -> Vec<RgbaImage> {
    let mut levels = vec![img];
    loop {
        let Some(last) = levels.last() else { break };
        let (w, h) = last.dimensions();
        if w <= 1 && h <= 1 {
            break;
        }
        let next = image::imageops::resize(last, (w / 2).max(1), (h / 2).max(1), FilterType::Triangle);
        levels.push(next);
    }
    levels
}

/// Filename keyed texture cache.
///
/// Entries are weak, so a texture lives exactly as long as some material
/// holds it.
pub struct TextureCache {
    source: Box<dyn TextureSource>,
    entries: HashMap<PathBuf, Weak<GpuTexture>>,
    released: Rc<RefCell<Vec<TextureKey>>>,
    white: Option<Rc<GpuTexture>>,
}

impl TextureCache {
    pub fn new(source: Box<dyn TextureSource>) -> Self {
        Self {
            source,
            entries: HashMap::new(),
            released: Rc::new(RefCell::new(Vec::new())),
            white: None,
        }
    }

    pub fn load(&mut self, device: &mut dyn GraphicsDevice, path: &Path) -> Result<Rc<GpuTexture>> {
        if let Some(texture) = self.entries.get(path).and_then(Weak::upgrade) {
            return Ok(texture);
        }
        log::debug!("loading texture {}", path.display());
        // Keep typed errors (a missing file stays `NotFound`) when the source passes them through.
        let img = self
            .source
            .load(path)
            .map_err(|e| e.downcast::<Error>().unwrap_or_else(Error::Texture))?;
        let texture = self.upload(device, path.display().to_string(), img)?;
        self.entries.insert(path.to_path_buf(), Rc::downgrade(&texture));
        Ok(texture)
    }

    /// 1x1 white texture bound in place of missing maps.
    pub fn white(&mut self, device: &mut dyn GraphicsDevice) -> Result<Rc<GpuTexture>> {
        if let Some(white) = &self.white {
            return Ok(white.clone());
        }
        let img = RgbaImage::from_pixel(1, 1, image::Rgba([255; 4]));
        let white = self.upload(device, "white".to_string(), img)?;
        self.white = Some(white.clone());
        Ok(white)
    }

    pub fn is_cached(&self, path: &Path) -> bool {
        self.entries
            .get(path)
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Destroy every texture whose last handle was dropped.
    pub fn collect(&mut self, device: &mut dyn GraphicsDevice) -> usize {
        let released: Vec<TextureKey> = self.released.borrow_mut().drain(..).collect();
        for key in &released {
            device.destroy_texture(*key);
        }
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        released.len()
    }

    fn upload(&self, device: &mut dyn GraphicsDevice, label: String, img: RgbaImage) -> Result<Rc<GpuTexture>> {
        let size = img.dimensions();
        let key = device.create_texture(&TextureData {
            label,
            levels: mip_chain(img),
        })?;
        Ok(Rc::new(GpuTexture {
            key,
            size,
            released: self.released.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_chain_ends_at_one_pixel() {
        let levels = mip_chain(RgbaImage::new(8, 2));
        let sizes: Vec<_> = levels.iter().map(|l| l.dimensions()).collect();
        assert_eq!(sizes, vec![(8, 2), (4, 1), (2, 1), (1, 1)]);
    }
}
