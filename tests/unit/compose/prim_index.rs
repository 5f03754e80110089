use super::*;
use crate::layer::model::{PrimSpec, PropertySpec};
use crate::stage::config::StageConfig;
use crate::stage::facade::Stage;

fn p(s: &str) -> Path {
    Path::parse(s).unwrap()
}

fn stage(layers: Vec<Layer>) -> Stage {
    Stage::from_layers("root.json", layers, StageConfig::default()).unwrap()
}

fn summary(index: &PrimIndex) -> Vec<(ArcType, String, String)> {
    index
        .nodes()
        .map(|n| (n.arc, n.stack.root.clone(), n.path.to_string()))
        .collect()
}

fn chair_layer() -> Layer {
    Layer::new("chair.json")
        .default_prim("Chair")
        .prim(
            p("/Chair"),
            PrimSpec::def().property("size", PropertySpec::with_default(1.0)),
        )
        .prim(p("/Chair/Leg"), PrimSpec::def())
}

#[test]
fn reference_adds_a_node_with_its_offset() {
    let stage = stage(vec![
        Layer::new("root.json").prim(
            p("/World/Chair"),
            PrimSpec::def().reference(
                Reference::external("chair.json", p("/Chair"))
                    .with_offset(LayerOffset::new(10.0, 2.0).unwrap()),
            ),
        ),
        chair_layer(),
    ]);
    let index = stage.prim_index(&p("/World/Chair")).unwrap();
    assert!(index.errors().is_empty());
    assert_eq!(
        summary(&index),
        vec![
            (ArcType::Root, "root.json".into(), "/World/Chair".into()),
            (ArcType::Reference, "chair.json".into(), "/Chair".into()),
        ]
    );
    let reference = index.node(index.strength_order()[1]);
    assert_eq!(reference.offset, LayerOffset { offset: 10.0, scale: 2.0 });
    assert_eq!(reference.parent, Some(NodeIdx(0)));
    assert_eq!(index.root_node().arc, ArcType::Root);
    assert_eq!(index.root_node().children, vec![index.strength_order()[1]]);

    let sites = index.property_sites(&stage, "size");
    assert_eq!(sites.len(), 1);
    assert_eq!(sites[0].layer, "chair.json");
}

#[test]
fn children_inherit_ancestral_reference_nodes() {
    let stage = stage(vec![
        Layer::new("root.json").prim(
            p("/World/Chair"),
            PrimSpec::def().reference(Reference::external("chair.json", p("/Chair"))),
        ),
        chair_layer(),
    ]);
    let index = stage.prim_index(&p("/World/Chair/Leg")).unwrap();
    assert_eq!(
        summary(&index),
        vec![
            (ArcType::Root, "root.json".into(), "/World/Chair/Leg".into()),
            (ArcType::Reference, "chair.json".into(), "/Chair/Leg".into()),
        ]
    );
    let sites = index.sites(&stage);
    assert_eq!(sites.len(), 1);
    assert_eq!(sites[0].path, p("/Chair/Leg"));
}

#[test]
fn missing_prim_path_uses_default_prim() {
    let stage = stage(vec![
        Layer::new("root.json").prim(
            p("/World"),
            PrimSpec::def().reference(Reference {
                asset_path: "chair.json".into(),
                ..Reference::default()
            }),
        ),
        chair_layer(),
    ]);
    let index = stage.prim_index(&p("/World")).unwrap();
    assert_eq!(index.node(index.strength_order()[1]).path, p("/Chair"));
}

#[test]
fn unresolved_targets_are_reported_and_dropped() {
    let stage = stage(vec![
        Layer::new("root.json").prim(
            p("/World"),
            PrimSpec::def()
                .reference(Reference::external("chair.json", p("/Table")))
                .reference(Reference::external("missing.json", p("/X")))
                .reference(Reference {
                    asset_path: "nodefault.json".into(),
                    ..Reference::default()
                }),
        ),
        chair_layer(),
        Layer::new("nodefault.json"),
    ]);
    let index = stage.prim_index(&p("/World")).unwrap();
    assert_eq!(index.nodes().count(), 1);
    let errors = index.errors();
    assert_eq!(errors.len(), 3);
    assert!(matches!(
        &errors[0],
        CompositionError::UnresolvedPrimPath { target, .. } if target == "/Table"
    ));
    assert!(matches!(
        &errors[1],
        CompositionError::UnresolvableAssetPath { asset_path, .. } if asset_path == "missing.json"
    ));
    assert!(matches!(
        &errors[2],
        CompositionError::UnresolvedPrimPath { target, .. } if target == "<default prim>"
    ));
}

#[test]
fn internal_reference_cycle_is_rejected() {
    let stage = stage(vec![
        Layer::new("root.json")
            .prim(p("/A"), PrimSpec::def().reference(Reference::internal(p("/B"))))
            .prim(p("/B"), PrimSpec::def().reference(Reference::internal(p("/A")))),
    ]);
    let index = stage.prim_index(&p("/A")).unwrap();
    assert_eq!(
        summary(&index),
        vec![
            (ArcType::Root, "root.json".into(), "/A".into()),
            (ArcType::Reference, "root.json".into(), "/B".into()),
        ]
    );
    assert!(matches!(
        index.errors(),
        [CompositionError::CyclicLayerReference { .. }]
    ));
}

#[test]
fn reference_to_own_namespace_is_cyclic() {
    let stage = stage(vec![
        Layer::new("root.json")
            .prim(p("/A"), PrimSpec::def().reference(Reference::internal(p("/A/Child"))))
            .prim(p("/A/Child"), PrimSpec::def()),
    ]);
    let index = stage.prim_index(&p("/A")).unwrap();
    assert_eq!(index.nodes().count(), 1);
    assert_eq!(index.errors().len(), 1);
}

#[test]
fn nested_negative_reference_scales_report_twice() {
    let negative = LayerOffset::new(0.0, -1.0).unwrap();
    let stage = stage(vec![
        Layer::new("root.json").prim(
            p("/World"),
            PrimSpec::def().reference(
                Reference::external("a.json", p("/A")).with_offset(negative),
            ),
        ),
        Layer::new("a.json").prim(
            p("/A"),
            PrimSpec::def().reference(
                Reference::external("b.json", p("/B")).with_offset(negative),
            ),
        ),
        Layer::new("b.json").prim(p("/B"), PrimSpec::def()),
    ]);
    let index = stage.prim_index(&p("/World")).unwrap();
    assert_eq!(index.nodes().count(), 1);
    assert_eq!(index.errors().len(), 2);
    assert!(
        index
            .errors()
            .iter()
            .all(|e| matches!(e, CompositionError::NegativeOffsetScale { .. }))
    );
}

#[test]
fn authored_selection_picks_variant_content() {
    let stage = stage(vec![
        Layer::new("root.json")
            .prim(
                p("/Model"),
                PrimSpec::def()
                    .variant_set("shading", &["red", "blue"])
                    .select("shading", "red"),
            )
            .prim(
                p("/Model{shading=red}"),
                PrimSpec::over().property("color", PropertySpec::with_default(1.0)),
            ),
    ]);
    let index = stage.prim_index(&p("/Model")).unwrap();
    assert_eq!(index.variant_selection("shading"), Some("red"));
    assert_eq!(
        summary(&index)[1],
        (ArcType::Variant, "root.json".into(), "/Model{shading=red}".into())
    );
    let sites = index.property_sites(&stage, "color");
    assert_eq!(sites[0].path, p("/Model{shading=red}"));
}

#[test]
fn fallback_applies_without_authored_selection() {
    let config = StageConfig {
        variant_fallbacks: [("shading".to_string(), vec!["green".into(), "blue".into()])].into(),
        ..StageConfig::default()
    };
    let stage = Stage::from_layers(
        "root.json",
        vec![
            Layer::new("root.json")
                .prim(p("/Model"), PrimSpec::def().variant_set("shading", &["red", "blue"])),
        ],
        config,
    )
    .unwrap();
    let index = stage.prim_index(&p("/Model")).unwrap();
    assert_eq!(index.variant_selection("shading"), Some("blue"));
}

#[test]
fn relocation_target_composes_source_opinions() {
    let stage = stage(vec![
        Layer::new("root.json")
            .relocate(p("/Char/Arm"), p("/Rig/Arm"))
            .prim(p("/Char/Arm"), PrimSpec::over().property("len", PropertySpec::with_default(3.0)))
            .prim(p("/Rig/Arm"), PrimSpec::def()),
    ]);
    let target = stage.prim_index(&p("/Rig/Arm")).unwrap();
    assert_eq!(
        summary(&target),
        vec![
            (ArcType::Root, "root.json".into(), "/Rig/Arm".into()),
            (ArcType::Relocate, "root.json".into(), "/Char/Arm".into()),
        ]
    );

    let source = stage.prim_index(&p("/Char/Arm")).unwrap();
    assert_eq!(source.path(), &p("/Char/Arm"));
    assert_eq!(source.composed_path(), &p("/Rig/Arm"));
    assert_eq!(source.property_sites(&stage, "len").len(), 1);
}

#[test]
fn crossing_relocations_still_compose() {
    let stage = stage(vec![
        Layer::new("root.json")
            .relocate(p("/A"), p("/B/C"))
            .relocate(p("/B"), p("/A/D"))
            .prim(p("/A"), PrimSpec::def())
            .prim(p("/B"), PrimSpec::def()),
    ]);
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::scope(|s| {
        s.spawn(|| {
            let index = stage.prim_index(&p("/A")).unwrap();
            let _ = tx.send(index.composed_path().clone());
        });
        let composed = rx
            .recv_timeout(std::time::Duration::from_secs(10))
            .expect("prim index of /A should finish");
        assert_eq!(composed, p("/B/C"));
    });
    assert!(
        stage
            .layer_stack()
            .errors()
            .iter()
            .any(|e| matches!(e, CompositionError::RelocationConflict { from, .. } if *from == p("/B")))
    );
}

#[test]
fn ancestral_arcs_are_stronger_than_local_ones() {
    let stage = stage(vec![
        Layer::new("root.json")
            .prim(p("/World"), PrimSpec::def().reference(Reference::external("a.json", p("/A"))))
            .prim(
                p("/World/Chair"),
                PrimSpec::def().reference(Reference::external("chair.json", p("/Chair"))),
            ),
        Layer::new("a.json")
            .prim(p("/A"), PrimSpec::def())
            .prim(p("/A/Chair"), PrimSpec::over()),
        chair_layer(),
    ]);
    let index = stage.prim_index(&p("/World/Chair")).unwrap();
    let paths: Vec<String> = index.nodes().map(|n| n.path.to_string()).collect();
    assert_eq!(paths, vec!["/World/Chair", "/A/Chair", "/Chair"]);
}

#[test]
fn recomposition_is_deterministic() {
    let layers = || {
        vec![
            Layer::new("root.json").prim(
                p("/World/Chair"),
                PrimSpec::def()
                    .reference(Reference::external("chair.json", p("/Chair")))
                    .reference(Reference::external("missing.json", p("/X"))),
            ),
            chair_layer(),
        ]
    };
    let a = stage(layers());
    let b = stage(layers());
    let ia = compute_prim_index(&a, a.root_stack_id(), &p("/World/Chair"));
    let ib = compute_prim_index(&b, b.root_stack_id(), &p("/World/Chair"));
    assert_eq!(ia, ib);
    assert_eq!(ia.fingerprint(), ib.fingerprint());
    assert_eq!(ia.errors(), ib.errors());

    let other = compute_prim_index(&a, a.root_stack_id(), &p("/World"));
    assert_ne!(ia.fingerprint(), other.fingerprint());
}

#[test]
fn map_to_stage_follows_reference_nodes() {
    let stage = stage(vec![
        Layer::new("root.json").prim(
            p("/World/Chair"),
            PrimSpec::def().reference(Reference::external("chair.json", p("/Chair"))),
        ),
        chair_layer(),
    ]);
    let index = stage.prim_index(&p("/World/Chair")).unwrap();
    let chair = LayerStackId::new("chair.json");
    assert_eq!(
        index.map_to_stage(&chair, &p("/Chair/Leg.height")),
        vec![p("/World/Chair/Leg.height")]
    );
    assert!(index.map_to_stage(&chair, &p("/Table")).is_empty());
    assert!(index.has_node_in_stack(&chair));
}
