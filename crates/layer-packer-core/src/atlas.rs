use crate::backend::{SubregionUpload, TextureBackend};
use crate::config::{AtlasConfig, HardwareLimits};
use crate::error::Result;
use crate::model::{
    ArrayHandle, ArrayLayout, AtlasLayout, BuildReport, GroupId, LayerLayout, LayoutEntry,
    Placement, PlacementFailure, PlacementResult, Rect, RequestHandle, UvRect,
};
use crate::planner::{ArrayPlan, PlacementRequest, Planner};
use crate::source::{ImageLoader, SourceImage};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, trace, warn};

/// A texture array created by the last build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveArray {
    pub handle: ArrayHandle,
    pub unit: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

type ImageCache = HashMap<String, std::result::Result<Arc<SourceImage>, String>>;

/// Packs subimages into 2D-array textures, one array per texture unit.
///
/// Requests are buffered by [`add_request`](Self::add_request) and realized together by
/// [`build`](Self::build), which first releases whatever the previous build created.
/// Each request's outcome is read back through [`result`](Self::result).
///
/// ```ignore
/// use layer_packer_core::prelude::*;
/// # fn main() -> layer_packer_core::Result<()> {
/// let backend = SoftwareBackend::new(HardwareLimits::default());
/// let mut atlas = Atlas::new(backend, FsImageLoader::new())?;
/// let hero = atlas.add_request(None, "hero.png", Rect::new(0, 0, 32, 32));
/// let _report = atlas.build()?;
/// if let PlacementResult::Placed(p) = atlas.result(hero) {
///     println!("unit {} layer {} uv {:?}", p.unit, p.layer, p.uv);
/// }
/// # Ok(()) }
/// ```
pub struct Atlas<B: TextureBackend, L: ImageLoader> {
    backend: B,
    loader: L,
    cfg: AtlasConfig,
    limits: HardwareLimits,
    next_id: u64,
    ungrouped: Vec<PlacementRequest>,
    groups: HashMap<GroupId, Vec<PlacementRequest>>,
    group_order: Vec<GroupId>,
    live_arrays: Vec<LiveArray>,
    results: HashMap<u64, PlacementResult>,
    layout: AtlasLayout,
}

impl<B: TextureBackend, L: ImageLoader> Atlas<B, L> {
    pub fn new(backend: B, loader: L) -> Result<Self> {
        Self::with_config(backend, loader, AtlasConfig::default())
    }

    /// Queries the backend limits once and narrows them by `cfg`.
    pub fn with_config(backend: B, loader: L, cfg: AtlasConfig) -> Result<Self> {
        cfg.validate()?;
        let limits = cfg.effective_limits(backend.limits());
        limits.validate()?;
        info!(
            units = limits.max_texture_units,
            layers = limits.max_array_layers,
            size = limits.max_texture_size,
            cell = cfg.cell_size,
            "texture array limits"
        );
        Ok(Self {
            backend,
            loader,
            cfg,
            limits,
            next_id: 0,
            ungrouped: Vec::new(),
            groups: HashMap::new(),
            group_order: Vec::new(),
            live_arrays: Vec::new(),
            results: HashMap::new(),
            layout: AtlasLayout::default(),
        })
    }

    /// Queues `subrect` of image `key` for the next build. `group` ties the request to every
    /// other request with the same id: they share one layer or all fail.
    pub fn add_request(
        &mut self,
        group: Option<GroupId>,
        key: impl Into<String>,
        subrect: Rect,
    ) -> RequestHandle {
        let handle = RequestHandle(self.next_id);
        self.next_id += 1;
        let req = PlacementRequest::new(handle, key.into(), subrect, group);
        trace!(id = handle.0, key = %req.key, ?subrect, ?group, "queued request");
        match group {
            None => self.ungrouped.push(req),
            Some(gid) => self
                .groups
                .entry(gid)
                .or_insert_with(|| {
                    self.group_order.push(gid);
                    Vec::new()
                })
                .push(req),
        }
        self.results.insert(handle.0, PlacementResult::Pending);
        handle
    }

    /// Releases the previous generation, then places and uploads every queued request.
    ///
    /// Ungrouped requests are fitted first in insertion order, then groups in the order
    /// their ids were first seen. Failures are per request: they are logged, reported and
    /// visible through [`result`](Self::result); the build itself only fails on invalid
    /// configuration.
    #[instrument(skip_all)]
    pub fn build(&mut self) -> Result<BuildReport> {
        self.destroy();
        let mut planner = Planner::new(self.limits, self.cfg.cell_size)?;
        let mut report = BuildReport::default();

        let ungrouped = std::mem::take(&mut self.ungrouped);
        let mut groups = std::mem::take(&mut self.groups);
        let order = std::mem::take(&mut self.group_order);
        info!(
            ungrouped = ungrouped.len(),
            groups = order.len(),
            "building texture arrays"
        );

        let grouped = order
            .into_iter()
            .filter_map(|gid| groups.remove(&gid).map(|reqs| (gid, reqs)));
        for (handle, failure) in fit_all(&mut planner, ungrouped, grouped) {
            self.fail(&mut report, handle, failure);
        }
        debug!(
            arrays = planner.arrays().len(),
            layers = planner.layer_count(),
            placed = planner.placed_count(),
            "plan complete"
        );

        self.commit(planner.into_arrays(), &mut report);
        report.stats = self.layout.stats();
        report.placed = report.stats.num_placed;
        info!(
            failed = report.failures.len(),
            summary = %report.stats.summary(),
            "build complete"
        );
        Ok(report)
    }

    /// Plans the queued requests without touching the backend or consuming the queue.
    ///
    /// Uses the same order and limits as [`build`](Self::build), so the returned layout is
    /// what a build would produce if every image loads and uploads.
    pub fn plan(&self) -> Result<(AtlasLayout, BuildReport)> {
        let mut planner = Planner::new(self.limits, self.cfg.cell_size)?;
        let grouped = self
            .group_order
            .iter()
            .filter_map(|gid| self.groups.get(gid).map(|reqs| (*gid, reqs.clone())));
        let failures = fit_all(&mut planner, self.ungrouped.iter().cloned(), grouped);
        let layout = planner.layout();
        let stats = layout.stats();
        debug!(
            placed = stats.num_placed,
            failed = failures.len(),
            "plan only"
        );
        let report = BuildReport {
            placed: stats.num_placed,
            failures,
            stats,
        };
        Ok((layout, report))
    }

    /// Creates each planned array at its minimal footprint and uploads its requests,
    /// layer by layer in placement order.
    fn commit(&mut self, arrays: Vec<ArrayPlan>, report: &mut BuildReport) {
        let mut cache = ImageCache::new();
        for array in arrays {
            let unit = array.unit();
            let (width, height, depth) = array.size();
            let handle = match self.backend.create_array(unit, width, height, depth) {
                Ok(handle) => handle,
                Err(e) => {
                    error!(unit, width, height, depth, error = %e, "unable to create texture array");
                    let failure = PlacementFailure::Upload {
                        reason: e.to_string(),
                    };
                    for layer in array.into_layers() {
                        for req in layer.into_requests() {
                            self.fail(report, req.handle, failure.clone());
                        }
                    }
                    continue;
                }
            };
            let index = self.live_arrays.len();
            self.live_arrays.push(LiveArray {
                handle,
                unit,
                width,
                height,
                depth,
            });
            let mut array_layout = ArrayLayout {
                index,
                unit,
                width,
                height,
                layers: Vec::with_capacity(depth as usize),
            };
            for (z, layer) in array.into_layers().into_iter().enumerate() {
                let z = z as u32;
                let mut entries = Vec::with_capacity(layer.requests().len());
                for req in layer.into_requests() {
                    let placed = self.upload(&mut cache, handle, index, unit, z, (width, height), &req);
                    match placed {
                        Ok(placement) => {
                            entries.push(LayoutEntry {
                                handle: req.handle,
                                key: req.key,
                                group: req.group,
                                source: req.subrect,
                                rect: placement.rect,
                                uv: placement.uv,
                            });
                            self.results
                                .insert(req.handle.0, PlacementResult::Placed(placement));
                        }
                        Err(failure) => self.fail(report, req.handle, failure),
                    }
                }
                array_layout.layers.push(LayerLayout { z, entries });
            }
            self.layout.arrays.push(array_layout);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn upload(
        &mut self,
        cache: &mut ImageCache,
        handle: ArrayHandle,
        index: usize,
        unit: u32,
        z: u32,
        array_size: (u32, u32),
        req: &PlacementRequest,
    ) -> std::result::Result<Placement, PlacementFailure> {
        let Some(rect) = req.dest_rect() else {
            return Err(PlacementFailure::Upload {
                reason: "request was never fitted".into(),
            });
        };
        if !cache.contains_key(&req.key) {
            let loaded = self.loader.load(&req.key).map_err(|e| e.to_string());
            cache.insert(req.key.clone(), loaded);
        }
        let image = match &cache[&req.key] {
            Ok(image) => Arc::clone(image),
            Err(reason) => {
                return Err(PlacementFailure::ImageLoad {
                    reason: reason.clone(),
                });
            }
        };
        if !req.subrect.fits_within(image.width(), image.height()) {
            return Err(PlacementFailure::SourceOutOfBounds {
                rect: req.subrect,
                image_width: image.width(),
                image_height: image.height(),
            });
        }
        if let Err(e) = image.format() {
            return Err(PlacementFailure::Upload {
                reason: e.to_string(),
            });
        }
        let upload = SubregionUpload {
            layer: z,
            dst_x: rect.x,
            dst_y: rect.y,
            src: req.subrect,
            image: &image,
        };
        self.backend
            .upload_subregion(handle, unit, &upload)
            .map_err(|e| PlacementFailure::Upload {
                reason: e.to_string(),
            })?;
        let (aw, ah) = array_size;
        Ok(Placement {
            array: index,
            unit,
            layer: z,
            rect,
            uv: UvRect::from_rect(&rect, aw, ah),
            array_size,
        })
    }

    fn fail(&mut self, report: &mut BuildReport, handle: RequestHandle, failure: PlacementFailure) {
        warn!(id = handle.0, %failure, "request left unplaced");
        self.results
            .insert(handle.0, PlacementResult::Unplaced(failure.clone()));
        report.failures.push((handle, failure));
    }

    /// Destroys every array of the last build and releases its results. Requests queued
    /// since then stay pending. Calling it with nothing built is a no-op.
    pub fn destroy(&mut self) {
        let count = self.live_arrays.len();
        for array in self.live_arrays.drain(..) {
            self.backend.destroy_array(array.handle);
        }
        self.results
            .retain(|_, r| matches!(r, PlacementResult::Pending));
        self.layout = AtlasLayout::default();
        if count > 0 {
            debug!(arrays = count, "released texture arrays");
        }
    }

    /// Outcome of a request. Handles from an earlier, destroyed generation read as `Released`.
    pub fn result(&self, handle: RequestHandle) -> PlacementResult {
        self.results
            .get(&handle.0)
            .cloned()
            .unwrap_or(PlacementResult::Released)
    }

    /// Requests queued for the next build.
    pub fn pending_count(&self) -> usize {
        self.ungrouped.len() + self.groups.values().map(Vec::len).sum::<usize>()
    }

    pub fn live_arrays(&self) -> &[LiveArray] {
        &self.live_arrays
    }

    /// Arrays, layers and entries of the last build.
    pub fn layout(&self) -> &AtlasLayout {
        &self.layout
    }

    /// Device limits after config overrides.
    pub fn limits(&self) -> HardwareLimits {
        self.limits
    }

    pub fn config(&self) -> &AtlasConfig {
        &self.cfg
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }
}

/// Fits ungrouped requests first, in order, then each group in the order given.
fn fit_all(
    planner: &mut Planner,
    ungrouped: impl IntoIterator<Item = PlacementRequest>,
    grouped: impl IntoIterator<Item = (GroupId, Vec<PlacementRequest>)>,
) -> Vec<(RequestHandle, PlacementFailure)> {
    let mut failures = Vec::new();
    for req in ungrouped {
        let handle = req.handle;
        if let Err(failure) = planner.fit_single(req) {
            failures.push((handle, failure));
        }
    }
    for (gid, reqs) in grouped {
        let handles: Vec<RequestHandle> = reqs.iter().map(|r| r.handle).collect();
        if let Err(failure) = planner.fit_group(gid, reqs) {
            failures.extend(handles.into_iter().map(|h| (h, failure.clone())));
        }
    }
    failures
}

impl<B: TextureBackend, L: ImageLoader> Drop for Atlas<B, L> {
    fn drop(&mut self) {
        self.destroy();
    }
}
