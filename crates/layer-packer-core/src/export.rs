use crate::config::HardwareLimits;
use crate::model::AtlasLayout;
use serde_json::{Value, json};

/// Serialize a built layout as `{ arrays, meta }`.
///
/// Each array lists its unit, footprint and layers; each layer lists its entries with the
/// source subregion, the destination rectangle and the UV rectangle.
pub fn to_json(layout: &AtlasLayout, limits: &HardwareLimits) -> Value {
    let arrays_val = layout
        .arrays
        .iter()
        .map(|a| {
            let layers_val: Vec<Value> = a
                .layers
                .iter()
                .map(|l| {
                    let entries: Vec<Value> = l
                        .entries
                        .iter()
                        .map(|e| {
                            json!({
                                "id": e.handle.id(),
                                "key": e.key,
                                "group": e.group.map(|g| g.0),
                                "source": {"x": e.source.x, "y": e.source.y, "w": e.source.w, "h": e.source.h},
                                "frame": {"x": e.rect.x, "y": e.rect.y, "w": e.rect.w, "h": e.rect.h},
                                "uv": {"u0": e.uv.u0, "v0": e.uv.v0, "u1": e.uv.u1, "v1": e.uv.v1},
                            })
                        })
                        .collect();
                    json!({"z": l.z, "entries": entries})
                })
                .collect();
            json!({
                "index": a.index,
                "unit": a.unit,
                "width": a.width,
                "height": a.height,
                "depth": a.depth(),
                "layers": layers_val,
            })
        })
        .collect::<Vec<_>>();
    let stats = layout.stats();
    json!({
        "arrays": arrays_val,
        "meta": {
            "app": "layer-packer",
            "version": env!("CARGO_PKG_VERSION"),
            "format": "RGBA8888",
            "limits": limits,
            "stats": stats,
        }
    })
}
