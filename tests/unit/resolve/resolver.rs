use super::*;
use crate::animation::spline::{Extrapolation, Knot, LoopParams, Spline};
use crate::foundation::core::LayerOffset;
use crate::foundation::path::Path;
use crate::layer::model::{Layer, PrimSpec, Reference, SublayerRef};
use crate::stage::config::StageConfig;
use crate::stage::facade::Stage;

fn p(s: &str) -> Path {
    Path::parse(s).unwrap()
}

fn get(stage: &Stage, path: &str, time: impl Into<TimeCode>) -> Option<Value> {
    stage.resolve(&p(path), time).unwrap()
}

#[test]
fn strongest_default_wins_and_timed_query_uses_strongest_opinion() {
    let stage = Stage::from_layers(
        "root.json",
        vec![
            Layer::new("root.json")
                .sublayer(SublayerRef::new("anim.json"))
                .prim(p("/A"), PrimSpec::def().property("x", PropertySpec::default())),
            Layer::new("anim.json").prim(
                p("/A"),
                PrimSpec::over().property(
                    "x",
                    PropertySpec::with_default(1.0)
                        .sample(0.0, 0.0)
                        .unwrap()
                        .sample(10.0, 10.0)
                        .unwrap(),
                ),
            ),
        ],
        StageConfig::default(),
    )
    .unwrap();
    assert_eq!(get(&stage, "/A.x", TimeCode::Default), Some(Value::Double(1.0)));
    assert_eq!(get(&stage, "/A.x", 2.5), Some(Value::Double(2.5)));
    assert_eq!(get(&stage, "/A.x", -4.0), Some(Value::Double(0.0)));
    assert_eq!(get(&stage, "/A.x", 40.0), Some(Value::Double(10.0)));
    assert_eq!(get(&stage, "/A.y", 0.0), None);
}

#[test]
fn stronger_default_hides_weaker_samples() {
    let stage = Stage::from_layers(
        "root.json",
        vec![
            Layer::new("root.json")
                .sublayer(SublayerRef::new("anim.json"))
                .prim(p("/A"), PrimSpec::def().property("x", PropertySpec::with_default(7.0))),
            Layer::new("anim.json").prim(
                p("/A"),
                PrimSpec::over().property("x", PropertySpec::default().sample(0.0, 1.0).unwrap()),
            ),
        ],
        StageConfig::default(),
    )
    .unwrap();
    assert_eq!(get(&stage, "/A.x", 0.0), Some(Value::Double(7.0)));
}

#[test]
fn offsets_remap_stage_time_into_site_time() {
    let stage = Stage::from_layers(
        "root.json",
        vec![
            Layer::new("root.json").prim(
                p("/World"),
                PrimSpec::def().reference(
                    Reference::external("clip.json", p("/Clip"))
                        .with_offset(LayerOffset::new(100.0, 2.0).unwrap()),
                ),
            ),
            Layer::new("clip.json")
                .sublayer(SublayerRef {
                    asset_path: "inner.json".into(),
                    offset: LayerOffset::new(5.0, 1.0).unwrap(),
                })
                .prim(p("/Clip"), PrimSpec::def()),
            Layer::new("inner.json").prim(
                p("/Clip"),
                PrimSpec::over().property(
                    "t",
                    PropertySpec::default()
                        .sample(0.0, 0.0)
                        .unwrap()
                        .sample(10.0, 10.0)
                        .unwrap(),
                ),
            ),
        ],
        StageConfig::default(),
    )
    .unwrap();
    // stage = 100 + 2 * (5 + local)
    assert_eq!(get(&stage, "/World.t", 120.0), Some(Value::Double(5.0)));
    assert_eq!(get(&stage, "/World.t", 110.0), Some(Value::Double(0.0)));
}

#[test]
fn held_interpolation_comes_from_config() {
    let layers = vec![Layer::new("root.json").prim(
        p("/A"),
        PrimSpec::def().property(
            "x",
            PropertySpec::default()
                .sample(0.0, 0.0)
                .unwrap()
                .sample(10.0, 10.0)
                .unwrap(),
        ),
    )];
    let config = StageConfig {
        interpolation: Interpolation::Held,
        ..StageConfig::default()
    };
    let stage = Stage::from_layers("root.json", layers, config).unwrap();
    assert_eq!(get(&stage, "/A.x", 9.0), Some(Value::Double(0.0)));
}

#[test]
fn spline_beats_samples_and_loops() {
    let spline = Spline::new(vec![Knot::new(1.0, 5.0)])
        .unwrap()
        .with_inner_loops(LoopParams {
            proto_start: 1.0,
            proto_end: 10.0,
            num_pre_loops: 0,
            num_post_loops: 1,
            value_offset: 0.0,
        })
        .unwrap();
    let stage = Stage::from_layers(
        "root.json",
        vec![Layer::new("root.json").prim(
            p("/A"),
            PrimSpec::def().property(
                "x",
                PropertySpec::default()
                    .sample(0.0, 100.0)
                    .unwrap()
                    .spline(spline),
            ),
        )],
        StageConfig::default(),
    )
    .unwrap();
    for t in [1.0, 10.0, 19.0, 28.0] {
        assert_eq!(get(&stage, "/A.x", t), Some(Value::Double(5.0)));
    }
}

#[test]
fn value_blocked_spline_resolves_to_none() {
    let spline = Spline::new(vec![Knot::new(0.0, 1.0), Knot::new(1.0, 2.0)])
        .unwrap()
        .with_extrapolation(Extrapolation::ValueBlock, Extrapolation::Held);
    let stage = Stage::from_layers(
        "root.json",
        vec![Layer::new("root.json").prim(
            p("/A"),
            PrimSpec::def().property("x", PropertySpec::with_default(9.0).spline(spline)),
        )],
        StageConfig::default(),
    )
    .unwrap();
    assert_eq!(get(&stage, "/A.x", -1.0), None);
    assert_eq!(get(&stage, "/A.x", 5.0), Some(Value::Double(2.0)));
    assert_eq!(get(&stage, "/A.x", TimeCode::Default), Some(Value::Double(9.0)));
}

#[test]
fn resolve_info_records_winning_sites() {
    let stage = Stage::from_layers(
        "root.json",
        vec![
            Layer::new("root.json")
                .sublayer(SublayerRef::new("anim.json"))
                .prim(p("/A"), PrimSpec::def()),
            Layer::new("anim.json").prim(
                p("/A"),
                PrimSpec::over().property("x", PropertySpec::with_default(1.0)),
            ),
        ],
        StageConfig::default(),
    )
    .unwrap();
    let index = stage.prim_index(&p("/A")).unwrap();
    let info = compute_resolve_info(&stage, &index, "x");
    assert_eq!(info.default_site.as_ref().unwrap().layer, "anim.json");
    assert_eq!(info.default_site, info.time_site);
    assert!(compute_resolve_info(&stage, &index, "y").time_site.is_none());
}
