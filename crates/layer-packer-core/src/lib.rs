//! Core library for packing subimages into layered texture arrays.
//!
//! - Tracker: per-layer used/free grid with row-major first-fit search
//! - Planner: first fit over arrays and layers, transactional groups, growth bounded by texture units
//! - Atlas: buffers requests, plans, creates arrays at their minimal footprint and uploads subimages
//! - Collaborators are traits (`TextureBackend`, `ImageLoader`); an in-memory backend is included.
//!
//! Quick example:
//! ```ignore
//! use layer_packer_core::prelude::*;
//! # fn main() -> layer_packer_core::Result<()> {
//! let backend = SoftwareBackend::new(HardwareLimits::new(4, 16, 1024));
//! let mut atlas = Atlas::new(backend, FsImageLoader::new())?;
//! let a = atlas.add_request(None, "tiles.png", Rect::new(0, 0, 64, 64));
//! let b = atlas.add_request(Some(GroupId(1)), "ui.png", Rect::new(0, 0, 128, 32));
//! let c = atlas.add_request(Some(GroupId(1)), "ui.png", Rect::new(0, 32, 128, 32));
//! let report = atlas.build()?;
//! println!("{}", report.stats.summary());
//! assert_eq!(atlas.result(b).placement().map(|p| p.layer), atlas.result(c).placement().map(|p| p.layer));
//! # let _ = a;
//! # Ok(()) }
//! ```

pub mod atlas;
pub mod backend;
pub mod compositing;
pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod planner;
pub mod source;
pub mod tracker;

pub use atlas::*;
pub use backend::*;
pub use config::*;
pub use error::*;
pub use export::*;
pub use model::*;
pub use planner::*;
pub use source::*;
pub use tracker::*;

/// Convenience prelude for common types and functions.
/// Importing `layer_packer_core::prelude::*` brings the primary APIs into scope.
pub mod prelude {
    pub use crate::atlas::{Atlas, LiveArray};
    pub use crate::backend::{SoftwareBackend, SubregionUpload, TextureBackend};
    pub use crate::config::{AtlasConfig, AtlasConfigBuilder, HardwareLimits};
    pub use crate::model::{
        ArrayHandle, AtlasLayout, BuildReport, BuildStats, GroupId, Placement, PlacementFailure,
        PlacementResult, Rect, RequestHandle, UvRect,
    };
    pub use crate::planner::{PlacementRequest, Planner};
    pub use crate::source::{FsImageLoader, ImageLoader, MemoryImageLoader, PixelFormat, SourceImage};
    pub use crate::tracker::FreeRectTracker;
    pub use crate::to_json;
}
