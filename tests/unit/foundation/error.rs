use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert_eq!(
        StratumError::validation("bad").to_string(),
        "validation error: bad"
    );
    assert_eq!(StratumError::not_found("x").to_string(), "not found: x");
    assert_eq!(
        StratumError::malformed("y").to_string(),
        "malformed layer content: y"
    );
}

#[test]
fn other_preserves_source() {
    let e: StratumError = anyhow::anyhow!("io broke").into();
    assert!(matches!(e, StratumError::Other(_)));
    assert_eq!(e.to_string(), "io broke");
}
