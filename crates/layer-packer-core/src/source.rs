use crate::error::{LayerPackerError, Result};
use image::{DynamicImage, RgbImage, RgbaImage};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error};

/// Channel layout of a decoded source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb,
    Rgba,
}

impl PixelFormat {
    pub fn from_channels(channels: u8) -> Result<Self> {
        match channels {
            3 => Ok(Self::Rgb),
            4 => Ok(Self::Rgba),
            other => Err(LayerPackerError::UnsupportedChannels(other)),
        }
    }

    pub fn channels(&self) -> u8 {
        match self {
            Self::Rgb => 3,
            Self::Rgba => 4,
        }
    }
}

/// Decoded pixels, rows top to bottom, tightly packed.
#[derive(Debug, Clone)]
pub struct SourceImage {
    width: u32,
    height: u32,
    channels: u8,
    pixels: Vec<u8>,
}

impl SourceImage {
    /// Wraps raw pixels. Fails if `pixels` is not exactly `width * height * channels` bytes.
    /// Any channel count is accepted here; uploads reject everything but 3 and 4.
    pub fn new(width: u32, height: u32, channels: u8, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * channels as usize;
        if pixels.len() != expected {
            return Err(LayerPackerError::InvalidConfig(format!(
                "pixel buffer is {} bytes, expected {expected} for {width}x{height}x{channels}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            pixels,
        })
    }

    pub fn from_rgba(img: RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            channels: 4,
            pixels: img.into_raw(),
        }
    }

    pub fn from_rgb(img: RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            channels: 3,
            pixels: img.into_raw(),
        }
    }

    /// Keeps RGB images as RGB; everything else becomes RGBA.
    pub fn from_dynamic(img: DynamicImage) -> Self {
        match img {
            DynamicImage::ImageRgb8(rgb) => Self::from_rgb(rgb),
            other if !other.color().has_alpha() => Self::from_rgb(other.to_rgb8()),
            other => Self::from_rgba(other.to_rgba8()),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn format(&self) -> Result<PixelFormat> {
        PixelFormat::from_channels(self.channels)
    }

    /// Pixel at (x, y) expanded to RGBA. Caller guarantees bounds and a 3/4 channel layout.
    pub fn rgba_at(&self, x: u32, y: u32) -> [u8; 4] {
        let c = self.channels as usize;
        let i = (y as usize * self.width as usize + x as usize) * c;
        let p = &self.pixels[i..i + c];
        if c == 4 {
            [p[0], p[1], p[2], p[3]]
        } else {
            [p[0], p[1], p[2], 255]
        }
    }
}

/// Supplies decoded images by key.
pub trait ImageLoader {
    fn load(&mut self, key: &str) -> Result<Arc<SourceImage>>;
}

/// Decodes image files with the `image` crate. Keys are paths, relative to `root` if set.
#[derive(Debug, Clone, Default)]
pub struct FsImageLoader {
    root: Option<PathBuf>,
}

impl FsImageLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(key),
            None => PathBuf::from(key),
        }
    }
}

impl ImageLoader for FsImageLoader {
    fn load(&mut self, key: &str) -> Result<Arc<SourceImage>> {
        let path = self.resolve(key);
        let img = image::open(&path).map_err(|e| {
            error!(path = %path.display(), error = %e, "unable to load image");
            LayerPackerError::ImageLoad {
                key: key.to_string(),
                reason: e.to_string(),
            }
        })?;
        debug!(path = %path.display(), w = img.width(), h = img.height(), "decoded image");
        Ok(Arc::new(SourceImage::from_dynamic(img)))
    }
}

/// Serves images registered up front. Counts loads so callers can observe caching.
#[derive(Debug, Clone, Default)]
pub struct MemoryImageLoader {
    images: HashMap<String, Arc<SourceImage>>,
    loads: usize,
}

impl MemoryImageLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, image: SourceImage) {
        self.images.insert(key.into(), Arc::new(image));
    }

    pub fn with_image(mut self, key: impl Into<String>, image: SourceImage) -> Self {
        self.insert(key, image);
        self
    }

    /// Number of successful `load` calls so far.
    pub fn load_count(&self) -> usize {
        self.loads
    }
}

impl ImageLoader for MemoryImageLoader {
    fn load(&mut self, key: &str) -> Result<Arc<SourceImage>> {
        match self.images.get(key) {
            Some(img) => {
                self.loads += 1;
                Ok(Arc::clone(img))
            }
            None => Err(LayerPackerError::ImageLoad {
                key: key.to_string(),
                reason: "no image registered under this key".into(),
            }),
        }
    }
}

impl<L: ImageLoader + ?Sized> ImageLoader for &mut L {
    fn load(&mut self, key: &str) -> Result<Arc<SourceImage>> {
        (**self).load(key)
    }
}
