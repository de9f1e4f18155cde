use crate::compositing::blit_source;
use crate::config::HardwareLimits;
use crate::error::{LayerPackerError, Result};
use crate::model::{ArrayHandle, Rect};
use crate::source::SourceImage;
use image::RgbaImage;
use std::collections::HashMap;
use tracing::{debug, error};

/// Copy of one source subregion into one layer of a texture array.
#[derive(Debug, Clone, Copy)]
pub struct SubregionUpload<'a> {
    /// Target layer (z offset).
    pub layer: u32,
    /// Destination top-left within the layer.
    pub dst_x: u32,
    pub dst_y: u32,
    /// Region of `image` to copy; its size is the destination size.
    pub src: Rect,
    pub image: &'a SourceImage,
}

/// Device that owns 2D-array textures bound to texture units.
///
/// `limits` is queried once per `Atlas`. Handles returned by `create_array` stay valid
/// until passed to `destroy_array`.
pub trait TextureBackend {
    fn limits(&self) -> HardwareLimits;
    fn create_array(&mut self, unit: u32, width: u32, height: u32, depth: u32)
    -> Result<ArrayHandle>;
    fn upload_subregion(
        &mut self,
        handle: ArrayHandle,
        unit: u32,
        upload: &SubregionUpload<'_>,
    ) -> Result<()>;
    fn destroy_array(&mut self, handle: ArrayHandle);
}

impl<B: TextureBackend + ?Sized> TextureBackend for &mut B {
    fn limits(&self) -> HardwareLimits {
        (**self).limits()
    }
    fn create_array(
        &mut self,
        unit: u32,
        width: u32,
        height: u32,
        depth: u32,
    ) -> Result<ArrayHandle> {
        (**self).create_array(unit, width, height, depth)
    }
    fn upload_subregion(
        &mut self,
        handle: ArrayHandle,
        unit: u32,
        upload: &SubregionUpload<'_>,
    ) -> Result<()> {
        (**self).upload_subregion(handle, unit, upload)
    }
    fn destroy_array(&mut self, handle: ArrayHandle) {
        (**self).destroy_array(handle)
    }
}

struct SoftArray {
    unit: u32,
    width: u32,
    height: u32,
    layers: Vec<RgbaImage>,
}

/// In-memory texture device: every array layer is an `RgbaImage`, cleared to transparent.
///
/// Enforces what a driver would reject: unit/size/depth limits on creation, one live
/// array per unit, and layer, bounds and pixel-format checks on upload.
pub struct SoftwareBackend {
    limits: HardwareLimits,
    arrays: HashMap<u32, SoftArray>,
    next_handle: u32,
    created: usize,
    destroyed: usize,
    outlines: bool,
}

impl SoftwareBackend {
    pub fn new(limits: HardwareLimits) -> Self {
        Self {
            limits,
            arrays: HashMap::new(),
            next_handle: 1,
            created: 0,
            destroyed: 0,
            outlines: false,
        }
    }

    /// Draw red outlines around uploaded regions (debug).
    pub fn with_outlines(mut self, v: bool) -> Self {
        self.outlines = v;
        self
    }

    /// Pixels of layer `z` of a live array.
    pub fn layer_image(&self, handle: ArrayHandle, z: u32) -> Option<&RgbaImage> {
        self.arrays
            .get(&handle.0)
            .and_then(|a| a.layers.get(z as usize))
    }

    /// (width, height, depth) of a live array.
    pub fn array_size(&self, handle: ArrayHandle) -> Option<(u32, u32, u32)> {
        self.arrays
            .get(&handle.0)
            .map(|a| (a.width, a.height, a.layers.len() as u32))
    }

    pub fn array_unit(&self, handle: ArrayHandle) -> Option<u32> {
        self.arrays.get(&handle.0).map(|a| a.unit)
    }

    pub fn is_live(&self, handle: ArrayHandle) -> bool {
        self.arrays.contains_key(&handle.0)
    }

    pub fn live_count(&self) -> usize {
        self.arrays.len()
    }

    pub fn created_count(&self) -> usize {
        self.created
    }

    pub fn destroyed_count(&self) -> usize {
        self.destroyed
    }

    fn reject(call: &'static str, reason: String) -> LayerPackerError {
        error!(call, %reason, "texture call rejected");
        LayerPackerError::Upload { call, reason }
    }
}

impl TextureBackend for SoftwareBackend {
    fn limits(&self) -> HardwareLimits {
        self.limits
    }

    fn create_array(
        &mut self,
        unit: u32,
        width: u32,
        height: u32,
        depth: u32,
    ) -> Result<ArrayHandle> {
        const CALL: &str = "create_array";
        if unit >= self.limits.max_texture_units {
            return Err(Self::reject(
                CALL,
                format!(
                    "unit {unit} out of range [0...{}]",
                    self.limits.max_texture_units.saturating_sub(1)
                ),
            ));
        }
        if self.arrays.values().any(|a| a.unit == unit) {
            return Err(Self::reject(CALL, format!("unit {unit} is already bound")));
        }
        if width == 0 || height == 0 || depth == 0 {
            return Err(Self::reject(
                CALL,
                format!("empty array {width}x{height}x{depth}"),
            ));
        }
        let max = self.limits.max_texture_size;
        if width > max || height > max {
            return Err(Self::reject(
                CALL,
                format!("{width}x{height} exceeds the maximum texture size {max}"),
            ));
        }
        if depth > self.limits.max_array_layers {
            return Err(Self::reject(
                CALL,
                format!(
                    "{depth} layers exceed the maximum {}",
                    self.limits.max_array_layers
                ),
            ));
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        let layers = (0..depth)
            .map(|_| RgbaImage::new(width, height))
            .collect();
        self.arrays.insert(
            handle,
            SoftArray {
                unit,
                width,
                height,
                layers,
            },
        );
        self.created += 1;
        debug!(handle, unit, width, height, depth, "created texture array");
        Ok(ArrayHandle(handle))
    }

    fn upload_subregion(
        &mut self,
        handle: ArrayHandle,
        unit: u32,
        upload: &SubregionUpload<'_>,
    ) -> Result<()> {
        const CALL: &str = "upload_subregion";
        let outlines = self.outlines;
        let Some(array) = self.arrays.get_mut(&handle.0) else {
            return Err(LayerPackerError::UnknownArray(handle.0));
        };
        if array.unit != unit {
            return Err(Self::reject(
                CALL,
                format!("array {} is bound to unit {}, not {unit}", handle.0, array.unit),
            ));
        }
        let depth = array.layers.len() as u32;
        if upload.layer >= depth {
            return Err(Self::reject(
                CALL,
                format!("layer {} out of range, array has {depth}", upload.layer),
            ));
        }
        let dst = Rect::new(upload.dst_x, upload.dst_y, upload.src.w, upload.src.h);
        if !dst.fits_within(array.width, array.height) {
            return Err(Self::reject(
                CALL,
                format!(
                    "{}x{} at ({}, {}) exceeds the {}x{} layer",
                    dst.w, dst.h, dst.x, dst.y, array.width, array.height
                ),
            ));
        }
        let img = upload.image;
        if !upload.src.fits_within(img.width(), img.height()) {
            return Err(Self::reject(
                CALL,
                format!(
                    "source region {:?} exceeds the {}x{} image",
                    upload.src,
                    img.width(),
                    img.height()
                ),
            ));
        }
        img.format()?;
        let canvas = &mut array.layers[upload.layer as usize];
        blit_source(img, &upload.src, canvas, dst.x, dst.y, outlines);
        Ok(())
    }

    fn destroy_array(&mut self, handle: ArrayHandle) {
        if self.arrays.remove(&handle.0).is_some() {
            self.destroyed += 1;
            debug!(handle = handle.0, "destroyed texture array");
        }
    }
}
