use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Axis-aligned rectangle (pixels). `x,y` is top-left; `w,h` are sizes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }
    /// Rectangle of size `w`x`h` anchored at the origin.
    pub fn sized(w: u32, h: u32) -> Self {
        Self { x: 0, y: 0, w, h }
    }
    /// True if the rectangle covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }
    pub fn area(&self) -> u64 {
        (self.w as u64) * (self.h as u64)
    }
    /// Returns true if `self` lies inside a `width`x`height` area anchored at the origin.
    /// Computed in u64 so huge offsets cannot wrap.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        (self.x as u64) + (self.w as u64) <= width as u64
            && (self.y as u64) + (self.h as u64) <= height as u64
    }
    /// Returns true if the two rectangles share at least one pixel.
    pub fn intersects(&self, other: &Rect) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        !(self.x >= other.x + other.w
            || other.x >= self.x + self.w
            || self.y >= other.y + other.h
            || other.y >= self.y + self.h)
    }
}

/// Identifier of a set of textures that must share one layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u32);

impl From<u32> for GroupId {
    fn from(v: u32) -> Self {
        GroupId(v)
    }
}

/// Ticket returned by `Atlas::add_request`, exchanged for a `PlacementResult` after a build.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestHandle(pub(crate) u64);

impl RequestHandle {
    /// Handle with an explicit id, for driving a `Planner` directly.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Hardware texture-array handle issued by a `TextureBackend`. Zero is never a valid handle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ArrayHandle(pub u32);

/// Normalized texture coordinates of a packed subimage within its layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct UvRect {
    pub u0: f32,
    pub v0: f32,
    pub u1: f32,
    pub v1: f32,
}

impl UvRect {
    /// Normalizes `rect` against a `width`x`height` layer.
    pub fn from_rect(rect: &Rect, width: u32, height: u32) -> Self {
        let (fw, fh) = (width.max(1) as f32, height.max(1) as f32);
        Self {
            u0: rect.x as f32 / fw,
            v0: rect.y as f32 / fh,
            u1: (rect.x + rect.w) as f32 / fw,
            v1: (rect.y + rect.h) as f32 / fh,
        }
    }

    /// Quad corners as (s, t) pairs: top-right, bottom-right, bottom-left, top-left.
    pub fn corners(&self) -> [[f32; 2]; 4] {
        [
            [self.u1, self.v1],
            [self.u1, self.v0],
            [self.u0, self.v0],
            [self.u0, self.v1],
        ]
    }
}

/// Where a request ended up after a successful build.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Placement {
    /// Index of the array in creation order.
    pub array: usize,
    /// Texture unit the array is bound to.
    pub unit: u32,
    /// Layer (z offset) within the array.
    pub layer: u32,
    /// Pixel rectangle within the layer.
    pub rect: Rect,
    /// `rect` normalized by `array_size`.
    pub uv: UvRect,
    /// Width/height the array was created with.
    pub array_size: (u32, u32),
}

/// Reason a request was left out of a build.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlacementFailure {
    #[error("{width}x{height} exceeds the maximum layer size {max}")]
    CapacityExceeded { width: u32, height: u32, max: u32 },
    #[error("all {units} texture units are full")]
    UnitsExhausted { units: u32 },
    #[error("group {group} does not fit on an empty layer")]
    GroupOverflow { group: u32 },
    #[error("subregion has zero area")]
    EmptyRegion,
    #[error("subregion {rect:?} lies outside the {image_width}x{image_height} image")]
    SourceOutOfBounds {
        rect: Rect,
        image_width: u32,
        image_height: u32,
    },
    #[error("image load failed: {reason}")]
    ImageLoad { reason: String },
    #[error("upload failed: {reason}")]
    Upload { reason: String },
}

/// Per-request outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum PlacementResult {
    /// Added but not built yet.
    Pending,
    Placed(Placement),
    Unplaced(PlacementFailure),
    /// The generation holding this request was destroyed.
    Released,
}

impl PlacementResult {
    pub fn is_placed(&self) -> bool {
        matches!(self, PlacementResult::Placed(_))
    }
    pub fn placement(&self) -> Option<&Placement> {
        match self {
            PlacementResult::Placed(p) => Some(p),
            _ => None,
        }
    }
    pub fn failure(&self) -> Option<&PlacementFailure> {
        match self {
            PlacementResult::Unplaced(f) => Some(f),
            _ => None,
        }
    }
}

/// One placed subimage in a built layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutEntry {
    pub handle: RequestHandle,
    /// Image key the subregion was read from.
    pub key: String,
    pub group: Option<GroupId>,
    /// Subregion within the source image.
    pub source: Rect,
    /// Destination within the layer.
    pub rect: Rect,
    pub uv: UvRect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerLayout {
    pub z: u32,
    pub entries: Vec<LayoutEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayLayout {
    pub index: usize,
    pub unit: u32,
    pub width: u32,
    pub height: u32,
    pub layers: Vec<LayerLayout>,
}

impl ArrayLayout {
    pub fn depth(&self) -> u32 {
        self.layers.len() as u32
    }
}

/// Snapshot of the arrays produced by the last build.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AtlasLayout {
    pub arrays: Vec<ArrayLayout>,
}

/// Statistics about how densely a build filled its arrays.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct BuildStats {
    /// Number of arrays (and therefore units) in use.
    pub num_arrays: usize,
    /// Total number of layers across all arrays.
    pub num_layers: usize,
    /// Number of placed subimages.
    pub num_placed: usize,
    /// Total area of all layers (array footprint * depth).
    pub total_layer_area: u64,
    /// Area covered by placed subimages.
    pub used_area: u64,
    /// Occupancy ratio: used_area / total_layer_area (0.0 to 1.0).
    pub occupancy: f64,
    /// Largest array footprint.
    pub max_array_width: u32,
    pub max_array_height: u32,
}

impl AtlasLayout {
    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// Computes packing statistics for this layout.
    pub fn stats(&self) -> BuildStats {
        let mut stats = BuildStats {
            num_arrays: self.arrays.len(),
            ..Default::default()
        };
        for array in &self.arrays {
            stats.num_layers += array.layers.len();
            stats.total_layer_area +=
                (array.width as u64) * (array.height as u64) * array.layers.len() as u64;
            stats.max_array_width = stats.max_array_width.max(array.width);
            stats.max_array_height = stats.max_array_height.max(array.height);
            for layer in &array.layers {
                stats.num_placed += layer.entries.len();
                stats.used_area += layer.entries.iter().map(|e| e.rect.area()).sum::<u64>();
            }
        }
        stats.occupancy = if stats.total_layer_area > 0 {
            stats.used_area as f64 / stats.total_layer_area as f64
        } else {
            0.0
        };
        stats
    }

    /// Finds the entry for `handle`, if it was placed.
    pub fn entry(&self, handle: RequestHandle) -> Option<(&ArrayLayout, &LayerLayout, &LayoutEntry)> {
        for array in &self.arrays {
            for layer in &array.layers {
                if let Some(e) = layer.entries.iter().find(|e| e.handle == handle) {
                    return Some((array, layer, e));
                }
            }
        }
        None
    }
}

impl BuildStats {
    /// Returns a human-readable summary of the statistics.
    pub fn summary(&self) -> String {
        format!(
            "Arrays: {}, Layers: {}, Placed: {}, Occupancy: {:.2}%, Layer Area: {} px², Used Area: {} px²",
            self.num_arrays,
            self.num_layers,
            self.num_placed,
            self.occupancy * 100.0,
            self.total_layer_area,
            self.used_area,
        )
    }
}

/// Outcome of `Atlas::build`.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Requests placed and uploaded.
    pub placed: usize,
    /// Requests left out, with the reason.
    pub failures: Vec<(RequestHandle, PlacementFailure)>,
    pub stats: BuildStats,
}

impl BuildReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}
