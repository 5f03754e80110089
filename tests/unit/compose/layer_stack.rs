use super::*;
use crate::foundation::error::StratumResult;
use crate::layer::model::SublayerRef;
use crate::layer::store::{AnchoredResolver, LayerSource, MemorySource};

fn p(s: &str) -> Path {
    Path::parse(s).unwrap()
}

fn store_with(layers: Vec<Layer>) -> LayerStore {
    LayerStore::new(Arc::new(MemorySource::new(layers)))
}

fn compose(store: &LayerStore, root: &str) -> LayerStack {
    compose_layer_stack(store, &AnchoredResolver, &LayerStackId::new(root), &BTreeSet::new())
}

fn ids(stack: &LayerStack) -> Vec<&str> {
    stack.layers().iter().map(|l| l.identifier.as_str()).collect()
}

fn scaled(asset: &str, offset: f64, scale: f64) -> SublayerRef {
    SublayerRef {
        asset_path: asset.to_string(),
        offset: LayerOffset { offset, scale },
    }
}

#[test]
fn sublayers_expand_depth_first_with_accumulated_offsets() {
    let store = store_with(vec![
        Layer::new("root.json")
            .sublayer(scaled("./a.json", 10.0, 2.0))
            .sublayer(SublayerRef::new("b.json")),
        Layer::new("a.json").sublayer(scaled("c.json", 1.0, 1.0)),
        Layer::new("b.json"),
        Layer::new("c.json"),
    ]);
    let stack = compose(&store, "root.json");
    assert_eq!(ids(&stack), vec!["root.json", "a.json", "c.json", "b.json"]);
    assert!(stack.errors().is_empty());
    assert_eq!(stack.layers()[2].offset, LayerOffset { offset: 12.0, scale: 2.0 });
    assert!(stack.layers()[3].offset.is_identity());
}

#[test]
fn session_layer_is_strongest() {
    let store = store_with(vec![
        Layer::new("root.json").sublayer(SublayerRef::new("a.json")),
        Layer::new("a.json"),
        Layer::new("session.json"),
    ]);
    let id = LayerStackId {
        root: "root.json".to_string(),
        session: Some("session.json".to_string()),
    };
    let stack = compose_layer_stack(&store, &AnchoredResolver, &id, &BTreeSet::new());
    assert_eq!(ids(&stack), vec!["session.json", "root.json", "a.json"]);
    assert_eq!(id.to_string(), "@session.json@+@root.json@");
}

#[test]
fn sublayer_cycle_is_reported_and_skipped() {
    let store = store_with(vec![
        Layer::new("root.json").sublayer(SublayerRef::new("a.json")),
        Layer::new("a.json").sublayer(SublayerRef::new("b.json")),
        Layer::new("b.json").sublayer(SublayerRef::new("a.json")),
    ]);
    let stack = compose(&store, "root.json");
    assert_eq!(ids(&stack), vec!["root.json", "a.json", "b.json"]);
    assert_eq!(
        stack.errors(),
        &[CompositionError::CyclicLayerReference {
            layer: "b.json".to_string(),
            path: Path::absolute_root(),
            target: "a.json".to_string(),
        }]
    );
}

#[test]
fn nested_negative_scales_report_each_arc_and_contribute_nothing() {
    let store = store_with(vec![
        Layer::new("root.json").sublayer(scaled("a.json", 0.0, -1.0)),
        Layer::new("a.json").sublayer(scaled("b.json", 0.0, -1.0)),
        Layer::new("b.json"),
    ]);
    let stack = compose(&store, "root.json");
    assert_eq!(ids(&stack), vec!["root.json"]);
    assert_eq!(stack.errors().len(), 2);
    assert!(
        stack
            .errors()
            .iter()
            .all(|e| matches!(e, CompositionError::NegativeOffsetScale { scale, .. } if *scale == -1.0))
    );
    assert_eq!(stack.errors()[0].layer(), "root.json");
    assert_eq!(stack.errors()[1].layer(), "a.json");
}

#[test]
fn muted_layers_drop_their_subtree() {
    let store = store_with(vec![
        Layer::new("root.json")
            .sublayer(SublayerRef::new("a.json"))
            .sublayer(SublayerRef::new("b.json")),
        Layer::new("a.json").sublayer(SublayerRef::new("c.json")),
        Layer::new("b.json"),
        Layer::new("c.json"),
    ]);
    let muted = BTreeSet::from(["a.json".to_string()]);
    let stack = compose_layer_stack(
        &store,
        &AnchoredResolver,
        &LayerStackId::new("root.json"),
        &muted,
    );
    assert_eq!(ids(&stack), vec!["root.json", "b.json"]);
}

#[test]
fn missing_sublayer_is_unresolvable() {
    let store = store_with(vec![
        Layer::new("root.json").sublayer(SublayerRef::new("gone.json")),
    ]);
    let stack = compose(&store, "root.json");
    assert_eq!(ids(&stack), vec!["root.json"]);
    assert!(matches!(
        &stack.errors()[0],
        CompositionError::UnresolvableAssetPath { layer, asset_path, .. }
            if layer == "root.json" && asset_path == "gone.json"
    ));
}

struct BrokenSource;

impl LayerSource for BrokenSource {
    fn load(&self, identifier: &str) -> StratumResult<Layer> {
        match identifier {
            "root.json" => Ok(Layer::new("root.json")
                .sublayer(SublayerRef::new("bad.json"))
                .sublayer(SublayerRef::new("ok.json"))),
            "bad.json" => Err(StratumError::malformed("unexpected token")),
            _ => Ok(Layer::new(identifier)),
        }
    }
}

#[test]
fn malformed_layer_keeps_its_slot() {
    let store = LayerStore::new(Arc::new(BrokenSource));
    let stack = compose(&store, "root.json");
    assert_eq!(ids(&stack), vec!["root.json", "bad.json", "ok.json"]);
    assert_eq!(
        stack.errors(),
        &[CompositionError::MalformedLayerContent {
            layer: "bad.json".to_string(),
            reason: "unexpected token".to_string(),
        }]
    );
}

#[test]
fn relocation_maps_are_inverse_and_first_wins() {
    let store = store_with(vec![
        Layer::new("root.json")
            .sublayer(SublayerRef::new("a.json"))
            .relocate(p("/Char/Arm"), p("/Rig/Arm")),
        Layer::new("a.json")
            .relocate(p("/Other"), p("/Rig/Arm"))
            .relocate(p("/Prop"), p("/Set/Prop")),
    ]);
    let stack = compose(&store, "root.json");
    let forward = stack.relocates_source_to_target();
    let inverse = stack.relocates_target_to_source();
    assert_eq!(forward.len(), 2);
    for (source, target) in forward.iter() {
        assert_eq!(inverse.get(target), Some(source));
    }
    assert_eq!(forward.len(), inverse.len());
    assert_eq!(
        stack.errors(),
        &[CompositionError::RelocationConflict {
            layer: "a.json".to_string(),
            from: p("/Other"),
            to: p("/Rig/Arm"),
        }]
    );
}

#[test]
fn crossing_relocations_are_rejected() {
    let store = store_with(vec![
        Layer::new("root.json")
            .relocate(p("/A"), p("/B/C"))
            .relocate(p("/B"), p("/A/D")),
    ]);
    let stack = compose(&store, "root.json");
    assert_eq!(
        stack.relocates_source_to_target().as_ref(),
        &RelocationMap::from([(p("/A"), p("/B/C"))])
    );
    assert_eq!(stack.relocates_target_to_source().len(), 1);
    assert_eq!(
        stack.errors(),
        &[CompositionError::RelocationConflict {
            layer: "root.json".to_string(),
            from: p("/B"),
            to: p("/A/D"),
        }]
    );
}

#[test]
fn following_relocations_stops_on_a_reused_source() {
    let chain = RelocationMap::from([(p("/A"), p("/B")), (p("/B"), p("/C"))]);
    assert_eq!(follow_relocations(&chain, &p("/A/X")), Ok(Some(p("/C/X"))));
    assert_eq!(follow_relocations(&chain, &p("/Z")), Ok(None));

    let crossing = RelocationMap::from([(p("/A"), p("/B/C")), (p("/B"), p("/A/D"))]);
    assert_eq!(follow_relocations(&crossing, &p("/A")), Err(p("/A/D/C")));
}

#[test]
fn unchanged_relocations_keep_pointer_identity() {
    let store = store_with(vec![
        Layer::new("root.json").relocate(p("/A"), p("/B")),
    ]);
    let first = compose(&store, "root.json");
    let mut second = compose(&store, "root.json");
    assert!(!Arc::ptr_eq(
        first.relocates_source_to_target(),
        second.relocates_source_to_target()
    ));
    second.adopt_unchanged_relocations(&first);
    assert!(Arc::ptr_eq(
        first.relocates_source_to_target(),
        second.relocates_source_to_target()
    ));
    assert!(Arc::ptr_eq(
        first.relocates_target_to_source(),
        second.relocates_target_to_source()
    ));
    assert_eq!(first, second);
}

#[test]
fn has_spec_looks_through_every_layer() {
    use crate::layer::model::PrimSpec;
    let store = store_with(vec![
        Layer::new("root.json").sublayer(SublayerRef::new("a.json")),
        Layer::new("a.json").prim(p("/World"), PrimSpec::def()),
    ]);
    let stack = compose(&store, "root.json");
    assert!(stack.has_spec(&store, &p("/World")));
    assert!(!stack.has_spec(&store, &p("/Nope")));
    assert!(stack.contains_layer("a.json"));
}
