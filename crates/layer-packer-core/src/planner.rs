//! PLAN phase: fit requests into layers and grow arrays on demand.
//!
//! Placement is first fit, depth first: arrays in creation order, then layers in creation
//! order. When nothing admits a request one layer is added (to the first array under the
//! layer cap, otherwise to a new array on the next unit) and the request goes there.
//! Groups are transactional: every member lands on the same layer or none does.

use crate::config::HardwareLimits;
use crate::error::Result;
use crate::model::{
    ArrayLayout, AtlasLayout, GroupId, LayerLayout, LayoutEntry, PlacementFailure, Rect,
    RequestHandle, UvRect,
};
use crate::tracker::FreeRectTracker;
use tracing::{debug, error, warn};

/// A subregion waiting to be placed.
#[derive(Debug, Clone)]
pub struct PlacementRequest {
    pub handle: RequestHandle,
    /// Source image key.
    pub key: String,
    /// Region of the source image to copy.
    pub subrect: Rect,
    pub group: Option<GroupId>,
    /// Top-left corner within the layer once fitted.
    pub offset: Option<(u32, u32)>,
}

impl PlacementRequest {
    pub fn new(handle: RequestHandle, key: String, subrect: Rect, group: Option<GroupId>) -> Self {
        Self {
            handle,
            key,
            subrect,
            group,
            offset: None,
        }
    }

    /// Destination rectangle within the layer, if fitted.
    pub fn dest_rect(&self) -> Option<Rect> {
        self.offset
            .map(|(x, y)| Rect::new(x, y, self.subrect.w, self.subrect.h))
    }
}

/// One layer being planned: its free space and the requests placed on it, in upload order.
#[derive(Debug, Clone)]
pub struct LayerPlan {
    tracker: FreeRectTracker,
    requests: Vec<PlacementRequest>,
}

impl LayerPlan {
    pub fn tracker(&self) -> &FreeRectTracker {
        &self.tracker
    }

    pub fn requests(&self) -> &[PlacementRequest] {
        &self.requests
    }

    pub fn into_requests(self) -> Vec<PlacementRequest> {
        self.requests
    }

    fn try_place(&mut self, req: &mut PlacementRequest) -> bool {
        let Some((x, y)) = self.tracker.find_free(req.subrect.w, req.subrect.h) else {
            return false;
        };
        let rect = Rect::new(x, y, req.subrect.w, req.subrect.h);
        if self.tracker.mark_used(&rect).is_err() {
            return false;
        }
        req.offset = Some((x, y));
        true
    }

    /// Places every request or none. On a miss, placements already made on this layer
    /// are released in reverse order.
    fn try_place_all(&mut self, reqs: &mut [PlacementRequest]) -> bool {
        for i in 0..reqs.len() {
            if !self.try_place(&mut reqs[i]) {
                for done in reqs[..i].iter_mut().rev() {
                    if let Some(rect) = done.dest_rect() {
                        let freed = self.tracker.mark_free(&rect);
                        debug_assert!(freed.is_ok(), "undo of {rect:?} rejected");
                    }
                    done.offset = None;
                }
                return false;
            }
        }
        true
    }
}

/// One 2D-array texture being planned.
#[derive(Debug, Clone)]
pub struct ArrayPlan {
    unit: u32,
    layers: Vec<LayerPlan>,
}

impl ArrayPlan {
    pub fn unit(&self) -> u32 {
        self.unit
    }

    pub fn layers(&self) -> &[LayerPlan] {
        &self.layers
    }

    pub fn into_layers(self) -> Vec<LayerPlan> {
        self.layers
    }

    /// Footprint to allocate: componentwise max of the layers' used bounds (at least 1x1)
    /// and the layer count as depth.
    pub fn size(&self) -> (u32, u32, u32) {
        let (w, h) = self
            .layers
            .iter()
            .map(|l| l.tracker.used_bounds())
            .fold((0, 0), |(w, h), (lw, lh)| (w.max(lw), h.max(lh)));
        (w.max(1), h.max(1), self.layers.len() as u32)
    }
}

pub struct Planner {
    limits: HardwareLimits,
    blank: FreeRectTracker,
    arrays: Vec<ArrayPlan>,
}

impl Planner {
    /// Creates an empty plan. Layers are `max_texture_size` squares tracked at `cell_size`.
    pub fn new(limits: HardwareLimits, cell_size: u32) -> Result<Self> {
        limits.validate()?;
        let blank = FreeRectTracker::with_cell_size(
            limits.max_texture_size,
            limits.max_texture_size,
            cell_size,
        )?;
        Ok(Self {
            limits,
            blank,
            arrays: Vec::new(),
        })
    }

    pub fn limits(&self) -> HardwareLimits {
        self.limits
    }

    pub fn arrays(&self) -> &[ArrayPlan] {
        &self.arrays
    }

    pub fn into_arrays(self) -> Vec<ArrayPlan> {
        self.arrays
    }

    pub fn layer_count(&self) -> usize {
        self.arrays.iter().map(|a| a.layers.len()).sum()
    }

    pub fn placed_count(&self) -> usize {
        self.arrays
            .iter()
            .flat_map(|a| a.layers.iter())
            .map(|l| l.requests.len())
            .sum()
    }

    /// Layout of the current plan with every array at its minimal footprint.
    /// Nothing is uploaded, so this is what a build would produce if every upload succeeded.
    pub fn layout(&self) -> AtlasLayout {
        let arrays = self
            .arrays
            .iter()
            .enumerate()
            .map(|(index, array)| {
                let (width, height, _) = array.size();
                let layers = array
                    .layers
                    .iter()
                    .enumerate()
                    .map(|(z, layer)| LayerLayout {
                        z: z as u32,
                        entries: layer
                            .requests
                            .iter()
                            .filter_map(|r| {
                                let rect = r.dest_rect()?;
                                Some(LayoutEntry {
                                    handle: r.handle,
                                    key: r.key.clone(),
                                    group: r.group,
                                    source: r.subrect,
                                    rect,
                                    uv: UvRect::from_rect(&rect, width, height),
                                })
                            })
                            .collect(),
                    })
                    .collect();
                ArrayLayout {
                    index,
                    unit: array.unit,
                    width,
                    height,
                    layers,
                }
            })
            .collect();
        AtlasLayout { arrays }
    }

    fn check_size(&self, req: &PlacementRequest) -> std::result::Result<(), PlacementFailure> {
        if req.subrect.is_empty() {
            return Err(PlacementFailure::EmptyRegion);
        }
        let max = self.limits.max_texture_size;
        if req.subrect.w > max || req.subrect.h > max {
            error!(
                key = %req.key,
                w = req.subrect.w,
                h = req.subrect.h,
                max,
                "texture exceeds the maximum layer size"
            );
            return Err(PlacementFailure::CapacityExceeded {
                width: req.subrect.w,
                height: req.subrect.h,
                max,
            });
        }
        Ok(())
    }

    /// Adds one layer and returns its (array, layer) index.
    fn grow(&mut self) -> std::result::Result<(usize, usize), PlacementFailure> {
        let max_layers = self.limits.max_array_layers as usize;
        if let Some(a) = self.arrays.iter().position(|a| a.layers.len() < max_layers) {
            let array = &mut self.arrays[a];
            array.layers.push(LayerPlan {
                tracker: self.blank.clone(),
                requests: Vec::new(),
            });
            debug!(unit = array.unit, depth = array.layers.len(), "added layer");
            return Ok((a, array.layers.len() - 1));
        }
        let units = self.limits.max_texture_units;
        if self.arrays.len() as u32 >= units {
            warn!(units, max_layers, "all texture units are full");
            return Err(PlacementFailure::UnitsExhausted { units });
        }
        let unit = self.arrays.len() as u32;
        self.arrays.push(ArrayPlan {
            unit,
            layers: vec![LayerPlan {
                tracker: self.blank.clone(),
                requests: Vec::new(),
            }],
        });
        debug!(unit, "added array");
        Ok((self.arrays.len() - 1, 0))
    }

    /// Places one request on the first layer with room, growing capacity if none has.
    pub fn fit_single(&mut self, mut req: PlacementRequest) -> std::result::Result<(), PlacementFailure> {
        self.check_size(&req)?;
        for array in &mut self.arrays {
            for layer in &mut array.layers {
                if layer.try_place(&mut req) {
                    layer.requests.push(req);
                    return Ok(());
                }
            }
        }
        let (a, l) = self.grow()?;
        let layer = &mut self.arrays[a].layers[l];
        if layer.try_place(&mut req) {
            layer.requests.push(req);
            return Ok(());
        }
        // An empty layer always admits a rectangle within max_texture_size.
        Err(PlacementFailure::CapacityExceeded {
            width: req.subrect.w,
            height: req.subrect.h,
            max: self.limits.max_texture_size,
        })
    }

    /// Places all of `reqs` on one layer, or none of them.
    ///
    /// Existing layers are tried first; otherwise a single fresh layer is added and tried
    /// once. If even that fails the fresh layer is removed again.
    pub fn fit_group(
        &mut self,
        group: GroupId,
        mut reqs: Vec<PlacementRequest>,
    ) -> std::result::Result<(), PlacementFailure> {
        if reqs.is_empty() {
            return Ok(());
        }
        for req in &reqs {
            self.check_size(req)?;
        }
        for array in &mut self.arrays {
            for layer in &mut array.layers {
                if layer.try_place_all(&mut reqs) {
                    layer.requests.append(&mut reqs);
                    return Ok(());
                }
            }
        }
        let (a, l) = self.grow()?;
        let layer = &mut self.arrays[a].layers[l];
        if layer.try_place_all(&mut reqs) {
            layer.requests.append(&mut reqs);
            return Ok(());
        }
        self.arrays[a].layers.pop();
        if self.arrays[a].layers.is_empty() {
            self.arrays.remove(a);
        }
        error!(
            group = group.0,
            count = reqs.len(),
            "group does not fit on an empty layer"
        );
        Err(PlacementFailure::GroupOverflow { group: group.0 })
    }
}
