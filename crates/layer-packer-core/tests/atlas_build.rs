use image::{Rgb, RgbImage, Rgba, RgbaImage};
use layer_packer_core::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

fn solid(w: u32, h: u32, rgba: [u8; 4]) -> SourceImage {
    SourceImage::from_rgba(RgbaImage::from_pixel(w, h, Rgba(rgba)))
}

fn placed(atlas: &Atlas<impl TextureBackend, impl ImageLoader>, h: RequestHandle) -> Placement {
    match atlas.result(h) {
        PlacementResult::Placed(p) => p,
        other => panic!("expected Placed, got {other:?}"),
    }
}

#[test]
fn places_and_uploads_two_images() {
    let loader = MemoryImageLoader::new()
        .with_image("red", solid(64, 64, [255, 0, 0, 255]))
        .with_image("green", solid(32, 32, [0, 255, 0, 255]));
    let backend = SoftwareBackend::new(HardwareLimits::new(4, 16, 256));
    let mut atlas = Atlas::new(backend, loader).unwrap();
    let a = atlas.add_request(None, "red", Rect::sized(64, 64));
    let b = atlas.add_request(None, "green", Rect::sized(32, 32));

    let report = atlas.build().unwrap();
    assert!(report.is_complete());
    assert_eq!(report.placed, 2);

    let pa = placed(&atlas, a);
    let pb = placed(&atlas, b);
    assert_eq!(pa.rect, Rect::new(0, 0, 64, 64));
    assert_eq!(pb.rect, Rect::new(64, 0, 32, 32));
    assert_eq!((pa.unit, pa.layer), (0, 0));
    assert_eq!((pb.unit, pb.layer), (0, 0));
    assert_eq!(pb.array_size, (96, 64));
    assert!((pb.uv.u0 - 64.0 / 96.0).abs() < 1e-6);
    assert_eq!(pb.uv.v0, 0.0);
    assert_eq!(pb.uv.u1, 1.0);
    assert_eq!(pb.uv.v1, 0.5);

    let live = atlas.live_arrays();
    assert_eq!(live.len(), 1);
    assert_eq!((live[0].width, live[0].height, live[0].depth), (96, 64, 1));
    let layer = atlas.backend().layer_image(live[0].handle, 0).unwrap();
    assert_eq!(layer.dimensions(), (96, 64));
    assert_eq!(layer.get_pixel(10, 10).0, [255, 0, 0, 255]);
    assert_eq!(layer.get_pixel(70, 10).0, [0, 255, 0, 255]);
    // Below the green tile nothing was uploaded.
    assert_eq!(layer.get_pixel(70, 40).0, [0, 0, 0, 0]);
}

#[test]
fn copies_only_the_requested_subregion() {
    let mut img = RgbaImage::new(4, 4);
    for (x, y, p) in img.enumerate_pixels_mut() {
        *p = Rgba([x as u8 * 10, y as u8 * 10, 0, 255]);
    }
    let loader = MemoryImageLoader::new().with_image("grid", SourceImage::from_rgba(img));
    let mut atlas = Atlas::new(SoftwareBackend::new(HardwareLimits::new(1, 1, 16)), loader).unwrap();
    let h = atlas.add_request(None, "grid", Rect::new(1, 2, 2, 2));
    atlas.build().unwrap();

    let p = placed(&atlas, h);
    assert_eq!(p.rect, Rect::new(0, 0, 2, 2));
    assert_eq!(p.array_size, (2, 2));
    let layer = atlas
        .backend()
        .layer_image(atlas.live_arrays()[0].handle, 0)
        .unwrap();
    assert_eq!(layer.get_pixel(0, 0).0, [10, 20, 0, 255]);
    assert_eq!(layer.get_pixel(1, 1).0, [20, 30, 0, 255]);

    let entry = atlas.layout().entry(h).map(|(_, _, e)| e.source);
    assert_eq!(entry, Some(Rect::new(1, 2, 2, 2)));
}

#[test]
fn offset_placement_reports_corner_uvs() {
    let loader = MemoryImageLoader::new()
        .with_image("top", solid(100, 20, [255, 0, 0, 255]))
        .with_image("strip", solid(10, 80, [0, 255, 0, 255]))
        .with_image("tile", solid(30, 40, [0, 0, 255, 255]));
    let mut atlas = Atlas::new(SoftwareBackend::new(HardwareLimits::new(1, 1, 100)), loader).unwrap();
    atlas.add_request(None, "top", Rect::sized(100, 20));
    atlas.add_request(None, "strip", Rect::sized(10, 80));
    let h = atlas.add_request(None, "tile", Rect::sized(30, 40));
    atlas.build().unwrap();

    let p = placed(&atlas, h);
    assert_eq!(p.rect, Rect::new(10, 20, 30, 40));
    assert_eq!(p.array_size, (100, 100));
    let (u0, v0) = (10.0_f32 / 100.0, 20.0_f32 / 100.0);
    let (u1, v1) = (40.0_f32 / 100.0, 60.0_f32 / 100.0);
    assert_eq!(p.uv.corners(), [[u1, v1], [u1, v0], [u0, v0], [u0, v1]]);
    for (got, want) in p
        .uv
        .corners()
        .iter()
        .zip([[0.4, 0.6], [0.4, 0.2], [0.1, 0.2], [0.1, 0.6]])
    {
        assert!((got[0] - want[0]).abs() < 1e-6 && (got[1] - want[1]).abs() < 1e-6);
    }
}

#[test]
fn plan_matches_build_without_touching_the_device() {
    let loader = MemoryImageLoader::new()
        .with_image("a", solid(40, 40, [255, 0, 0, 255]))
        .with_image("b", solid(24, 24, [0, 255, 0, 255]));
    let mut atlas = Atlas::new(SoftwareBackend::new(HardwareLimits::new(2, 1, 64)), loader).unwrap();
    let a = atlas.add_request(None, "a", Rect::sized(40, 40));
    let g0 = atlas.add_request(Some(GroupId(1)), "b", Rect::sized(24, 24));
    let g1 = atlas.add_request(Some(GroupId(1)), "b", Rect::sized(24, 24));
    let big = atlas.add_request(Some(GroupId(2)), "a", Rect::sized(40, 40));
    let huge = atlas.add_request(Some(GroupId(2)), "a", Rect::sized(40, 40));

    let (layout, report) = atlas.plan().unwrap();
    assert_eq!(atlas.backend().created_count(), 0);
    assert_eq!(atlas.pending_count(), 5);
    assert!(matches!(atlas.result(a), PlacementResult::Pending));
    assert_eq!(report.placed, 3);
    let failed: Vec<RequestHandle> = report.failures.iter().map(|(h, _)| *h).collect();
    assert_eq!(failed, vec![big, huge]);

    let built = atlas.build().unwrap();
    assert_eq!(built.placed, report.placed);
    assert_eq!(built.failures, report.failures);
    for h in [a, g0, g1] {
        let (array, layer, entry) = layout.entry(h).unwrap();
        let p = placed(&atlas, h);
        assert_eq!((array.unit, layer.z, entry.rect), (p.unit, p.layer, p.rect));
    }
    assert!(layout.entry(big).is_none());
}

#[test]
fn rgb_sources_become_opaque() {
    let rgb = SourceImage::from_rgb(RgbImage::from_pixel(2, 2, Rgb([1, 2, 3])));
    assert_eq!(rgb.format().unwrap(), PixelFormat::Rgb);
    let loader = MemoryImageLoader::new().with_image("rgb", rgb);
    let mut atlas = Atlas::new(SoftwareBackend::new(HardwareLimits::new(1, 1, 8)), loader).unwrap();
    atlas.add_request(None, "rgb", Rect::sized(2, 2));
    atlas.build().unwrap();
    let layer = atlas
        .backend()
        .layer_image(atlas.live_arrays()[0].handle, 0)
        .unwrap();
    assert_eq!(layer.get_pixel(1, 1).0, [1, 2, 3, 255]);
}

#[test]
fn per_request_failures_do_not_abort_the_build() {
    let two_channel = SourceImage::new(2, 2, 2, vec![0; 8]).unwrap();
    let loader = MemoryImageLoader::new()
        .with_image("ok", solid(4, 4, [9, 9, 9, 255]))
        .with_image("gray_alpha", two_channel);
    let mut atlas = Atlas::new(SoftwareBackend::new(HardwareLimits::new(2, 2, 16)), loader).unwrap();

    let ok = atlas.add_request(None, "ok", Rect::sized(4, 4));
    let channels = atlas.add_request(None, "gray_alpha", Rect::sized(2, 2));
    let missing = atlas.add_request(None, "nope", Rect::sized(2, 2));
    let outside = atlas.add_request(None, "ok", Rect::new(2, 2, 4, 4));
    let empty = atlas.add_request(None, "ok", Rect::new(0, 0, 0, 3));
    let huge = atlas.add_request(None, "ok", Rect::sized(17, 1));

    let report = atlas.build().unwrap();
    assert!(atlas.result(ok).is_placed());
    assert_eq!(report.placed, 1);
    assert_eq!(report.failures.len(), 5);

    assert!(matches!(
        atlas.result(channels),
        PlacementResult::Unplaced(PlacementFailure::Upload { .. })
    ));
    assert!(matches!(
        atlas.result(missing),
        PlacementResult::Unplaced(PlacementFailure::ImageLoad { .. })
    ));
    assert_eq!(
        atlas.result(outside).failure(),
        Some(&PlacementFailure::SourceOutOfBounds {
            rect: Rect::new(2, 2, 4, 4),
            image_width: 4,
            image_height: 4,
        })
    );
    assert_eq!(atlas.result(empty).failure(), Some(&PlacementFailure::EmptyRegion));
    assert_eq!(
        atlas.result(huge).failure(),
        Some(&PlacementFailure::CapacityExceeded {
            width: 17,
            height: 1,
            max: 16
        })
    );
    // Failed uploads leave no entries behind.
    assert_eq!(atlas.layout().stats().num_placed, 1);
}

#[test]
fn oversized_group_fails_as_a_whole() {
    let mut backend = SoftwareBackend::new(HardwareLimits::new(4, 4, 1024));
    {
        let loader = MemoryImageLoader::new().with_image("big", solid(600, 600, [1, 1, 1, 255]));
        let mut atlas = Atlas::new(&mut backend, loader).unwrap();
        let a = atlas.add_request(Some(GroupId(7)), "big", Rect::sized(600, 600));
        let b = atlas.add_request(Some(GroupId(7)), "big", Rect::sized(600, 600));
        let report = atlas.build().unwrap();

        let expected = PlacementFailure::GroupOverflow { group: 7 };
        assert_eq!(atlas.result(a).failure(), Some(&expected));
        assert_eq!(atlas.result(b).failure(), Some(&expected));
        assert_eq!(report.failures.len(), 2);
        assert!(atlas.layout().is_empty());
        assert!(atlas.live_arrays().is_empty());
    }
    assert_eq!(backend.created_count(), 0);
}

#[test]
fn rebuild_destroys_previous_generation_first() {
    let mut backend = SoftwareBackend::new(HardwareLimits::new(4, 1, 64));
    {
        let loader = MemoryImageLoader::new().with_image("tile", solid(64, 64, [5, 5, 5, 255]));
        let mut atlas = Atlas::new(&mut backend, loader).unwrap();
        let first: Vec<_> = (0..3)
            .map(|_| atlas.add_request(None, "tile", Rect::sized(64, 64)))
            .collect();
        atlas.build().unwrap();
        let units: Vec<u32> = first.iter().map(|h| placed(&atlas, *h).unit).collect();
        assert_eq!(units, vec![0, 1, 2]);
        assert_eq!(atlas.backend().live_count(), 3);

        let again = atlas.add_request(None, "tile", Rect::sized(32, 32));
        assert_eq!(atlas.result(again), PlacementResult::Pending);
        // Unit 0 is still bound until the rebuild releases it.
        atlas.build().unwrap();
        assert_eq!(atlas.backend().destroyed_count(), 3);
        assert_eq!(atlas.backend().live_count(), 1);
        for h in &first {
            assert_eq!(atlas.result(*h), PlacementResult::Released);
        }
        let p = placed(&atlas, again);
        assert_eq!((p.unit, p.layer, p.array_size), (0, 0, (32, 32)));
    }
    assert_eq!(backend.created_count(), 4);
    assert_eq!(backend.destroyed_count(), 4);
    assert_eq!(backend.live_count(), 0);
}

#[test]
fn destroy_is_idempotent_and_runs_on_drop() {
    let mut backend = SoftwareBackend::new(HardwareLimits::new(2, 2, 32));
    {
        let loader = MemoryImageLoader::new().with_image("t", solid(8, 8, [1, 2, 3, 4]));
        let mut atlas = Atlas::new(&mut backend, loader).unwrap();
        let h = atlas.add_request(None, "t", Rect::sized(8, 8));

        // Nothing built yet.
        atlas.destroy();
        assert_eq!(atlas.result(h), PlacementResult::Pending);
        assert_eq!(atlas.pending_count(), 1);

        atlas.build().unwrap();
        assert_eq!(atlas.pending_count(), 0);
        atlas.destroy();
        atlas.destroy();
        assert_eq!(atlas.backend().destroyed_count(), 1);
        assert_eq!(atlas.result(h), PlacementResult::Released);
        assert!(atlas.layout().is_empty());

        atlas.add_request(None, "t", Rect::sized(8, 8));
        atlas.build().unwrap();
        assert_eq!(atlas.backend().live_count(), 1);
    }
    assert_eq!(backend.live_count(), 0);
    assert_eq!(backend.destroyed_count(), 2);
}

#[test]
fn unknown_handles_read_as_released() {
    let atlas = Atlas::new(
        SoftwareBackend::new(HardwareLimits::default()),
        MemoryImageLoader::new(),
    )
    .unwrap();
    assert_eq!(atlas.result(RequestHandle::new(999)), PlacementResult::Released);
}

#[test]
fn each_key_is_loaded_once_per_build() {
    let loader = MemoryImageLoader::new().with_image("sheet", solid(64, 64, [7, 7, 7, 255]));
    let mut atlas = Atlas::new(SoftwareBackend::new(HardwareLimits::new(1, 2, 64)), loader).unwrap();
    for i in 0..4 {
        atlas.add_request(None, "sheet", Rect::new(i * 16, 0, 16, 16));
    }
    atlas.build().unwrap();
    assert_eq!(atlas.loader().load_count(), 1);
}

#[test]
fn units_exhausted_is_reported_for_ungrouped_requests() {
    let loader = MemoryImageLoader::new().with_image("t", solid(16, 16, [0, 0, 0, 255]));
    let mut atlas = Atlas::new(SoftwareBackend::new(HardwareLimits::new(1, 1, 16)), loader).unwrap();
    let a = atlas.add_request(None, "t", Rect::sized(16, 16));
    let b = atlas.add_request(None, "t", Rect::sized(16, 16));
    let report = atlas.build().unwrap();
    assert!(atlas.result(a).is_placed());
    assert_eq!(
        atlas.result(b).failure(),
        Some(&PlacementFailure::UnitsExhausted { units: 1 })
    );
    assert_eq!(report.failures, vec![(b, PlacementFailure::UnitsExhausted { units: 1 })]);
}

#[test]
fn group_members_share_a_layer() {
    let loader = MemoryImageLoader::new().with_image("t", solid(64, 64, [3, 3, 3, 255]));
    let mut atlas = Atlas::new(SoftwareBackend::new(HardwareLimits::new(2, 4, 64)), loader).unwrap();
    let wall = atlas.add_request(None, "t", Rect::sized(48, 48));
    let members: Vec<_> = (0..3)
        .map(|_| atlas.add_request(Some(GroupId(1)), "t", Rect::sized(16, 24)))
        .collect();
    atlas.build().unwrap();

    let where_ = |h| {
        let p = placed(&atlas, h);
        (p.unit, p.layer)
    };
    let first = where_(members[0]);
    for h in &members {
        assert_eq!(where_(*h), first);
    }
    // The three 16x24 tiles cannot share the strip beside the wall, so they move up a layer.
    assert_eq!(where_(wall), (0, 0));
    assert_eq!(first, (0, 1));
}

#[test]
fn config_overrides_narrow_the_device() {
    let cfg = AtlasConfig::builder().max_texture_size(32).cell_size(8).build();
    let loader = MemoryImageLoader::new().with_image("t", solid(64, 64, [0, 0, 0, 255]));
    let mut atlas =
        Atlas::with_config(SoftwareBackend::new(HardwareLimits::new(2, 2, 256)), loader, cfg).unwrap();
    assert_eq!(atlas.limits().max_texture_size, 32);
    assert_eq!(atlas.config().cell_size, 8);

    let big = atlas.add_request(None, "t", Rect::sized(40, 40));
    let a = atlas.add_request(None, "t", Rect::sized(10, 10));
    let b = atlas.add_request(None, "t", Rect::sized(4, 4));
    atlas.build().unwrap();
    assert_eq!(
        atlas.result(big).failure(),
        Some(&PlacementFailure::CapacityExceeded {
            width: 40,
            height: 40,
            max: 32
        })
    );
    assert_eq!(placed(&atlas, a).rect.x, 0);
    // 10px occupies two 8px cells.
    assert_eq!(placed(&atlas, b).rect, Rect::new(16, 0, 4, 4));
}

#[test]
fn bound_unit_fails_its_requests() {
    let mut backend = SoftwareBackend::new(HardwareLimits::new(1, 1, 16));
    let foreign = backend.create_array(0, 4, 4, 1).unwrap();
    {
        let loader = MemoryImageLoader::new().with_image("t", solid(4, 4, [0, 0, 0, 255]));
        let mut atlas = Atlas::new(&mut backend, loader).unwrap();
        let h = atlas.add_request(None, "t", Rect::sized(4, 4));
        let report = atlas.build().unwrap();
        assert!(matches!(
            atlas.result(h),
            PlacementResult::Unplaced(PlacementFailure::Upload { .. })
        ));
        assert_eq!(report.placed, 0);
        assert!(atlas.live_arrays().is_empty());
    }
    // The atlas only releases what it created.
    assert!(backend.is_live(foreign));
}

#[test]
fn random_builds_are_disjoint_and_groups_atomic() {
    let mut rng = StdRng::seed_from_u64(42);
    for _round in 0..8 {
        let limits = HardwareLimits::new(3, 3, 128);
        let loader = MemoryImageLoader::new().with_image("sheet", solid(128, 128, [200, 100, 50, 255]));
        let mut atlas = Atlas::new(SoftwareBackend::new(limits), loader).unwrap();

        let mut groups: HashMap<RequestHandle, Option<u32>> = HashMap::new();
        for _ in 0..rng.gen_range(10..60) {
            let (w, h) = (rng.gen_range(1..=64), rng.gen_range(1..=64));
            let group = if rng.gen_bool(0.3) {
                Some(rng.gen_range(0..4))
            } else {
                None
            };
            let handle = atlas.add_request(group.map(GroupId), "sheet", Rect::sized(w, h));
            groups.insert(handle, group);
        }
        let total = groups.len();
        let report = atlas.build().unwrap();
        assert_eq!(report.placed + report.failures.len(), total);

        let mut by_layer: HashMap<(u32, u32), Vec<Rect>> = HashMap::new();
        let mut group_layers: HashMap<u32, Vec<Option<(u32, u32)>>> = HashMap::new();
        for (handle, group) in &groups {
            let res = atlas.result(*handle);
            assert!(!matches!(res, PlacementResult::Pending | PlacementResult::Released));
            let loc = res.placement().map(|p| {
                assert!(p.unit < limits.max_texture_units);
                assert!(p.layer < limits.max_array_layers);
                assert!(p.rect.fits_within(p.array_size.0, p.array_size.1));
                by_layer.entry((p.unit, p.layer)).or_default().push(p.rect);
                (p.unit, p.layer)
            });
            if let Some(g) = group {
                group_layers.entry(*g).or_default().push(loc);
            }
        }
        for rects in by_layer.values() {
            assert!(disjoint(rects));
        }
        for (g, locs) in &group_layers {
            let first = locs[0];
            assert!(
                locs.iter().all(|l| *l == first),
                "group {g} split or partially placed: {locs:?}"
            );
        }
    }
}

fn disjoint(rects: &[Rect]) -> bool {
    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if rects[i].intersects(&rects[j]) {
                return false;
            }
        }
    }
    true
}
