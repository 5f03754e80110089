use super::*;

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn looped_single_knot() -> Spline {
    Spline::new(vec![Knot::new(1.0, 5.0)])
        .unwrap()
        .with_inner_loops(LoopParams {
            proto_start: 1.0,
            proto_end: 10.0,
            num_pre_loops: 0,
            num_post_loops: 1,
            value_offset: 0.0,
        })
        .unwrap()
}

#[test]
fn single_knot_inner_loop_is_constant() {
    let s = looped_single_knot();
    for t in [0.0, 1.0, 10.0, 19.0, 28.0] {
        assert_eq!(s.eval(t), Some(5.0), "t = {t}");
    }
}

#[test]
fn inner_loop_echoes_accumulate_value_offset() {
    let s = Spline::new(vec![Knot::new(0.0, 0.0), Knot::new(5.0, 10.0)])
        .unwrap()
        .with_inner_loops(LoopParams {
            proto_start: 0.0,
            proto_end: 10.0,
            num_pre_loops: 1,
            num_post_loops: 1,
            value_offset: 100.0,
        })
        .unwrap();
    assert_eq!(s.eval(15.0), Some(110.0));
    assert_eq!(s.eval(-5.0), Some(-90.0));
    assert_eq!(s.eval(20.0), Some(200.0));
    // linear from the prototype's last knot (5, 10) to the echo (10, 100)
    assert_eq!(s.eval(7.5), Some(55.0));
}

#[test]
fn loops_without_a_knot_at_start_are_inert() {
    let s = Spline::new(vec![Knot::new(2.0, 1.0)])
        .unwrap()
        .with_inner_loops(LoopParams {
            proto_start: 0.0,
            proto_end: 4.0,
            num_pre_loops: 0,
            num_post_loops: 3,
            value_offset: 1.0,
        })
        .unwrap();
    assert_eq!(s.eval(14.0), Some(1.0));
}

#[test]
fn held_and_linear_segments() {
    let mut a = Knot::new(0.0, 0.0);
    a.interp = KnotInterp::Held;
    let s = Spline::new(vec![a, Knot::new(2.0, 4.0), Knot::new(4.0, 0.0)]).unwrap();
    assert_eq!(s.eval(1.5), Some(0.0));
    assert_eq!(s.eval(3.0), Some(2.0));
    assert_eq!(s.eval(2.0), Some(4.0));
}

#[test]
fn flat_tangent_curve_is_symmetric() {
    let mut a = Knot::new(0.0, 0.0);
    a.interp = KnotInterp::Curve;
    let s = Spline::new(vec![a, Knot::new(10.0, 10.0)]).unwrap();
    let mid = s.eval(5.0).unwrap();
    assert!(approx(mid, 5.0), "{mid}");
    let early = s.eval(1.0).unwrap();
    assert!(early < 1.0 && early > 0.0, "{early}");
}

#[test]
fn sloped_tangent_curve_matches_straight_line() {
    let mut a = Knot::new(0.0, 0.0);
    a.interp = KnotInterp::Curve;
    a.post_tangent.slope = 1.0;
    let mut b = Knot::new(3.0, 3.0);
    b.pre_tangent.slope = 1.0;
    let s = Spline::new(vec![a, b]).unwrap();
    assert!(approx(s.eval(1.2).unwrap(), 1.2));
}

#[test]
fn extrapolation_modes() {
    let knots = vec![Knot::new(0.0, 0.0), Knot::new(2.0, 4.0)];
    let base = Spline::new(knots).unwrap();

    let held = base.clone();
    assert_eq!(held.eval(-3.0), Some(0.0));
    assert_eq!(held.eval(5.0), Some(4.0));

    let linear = base
        .clone()
        .with_extrapolation(Extrapolation::Linear, Extrapolation::Linear);
    assert_eq!(linear.eval(-1.0), Some(-2.0));
    assert_eq!(linear.eval(3.0), Some(6.0));

    let sloped = base
        .clone()
        .with_extrapolation(Extrapolation::Sloped(-1.0), Extrapolation::ValueBlock);
    assert_eq!(sloped.eval(-2.0), Some(2.0));
    assert_eq!(sloped.eval(3.0), None);

    let repeat = base
        .clone()
        .with_extrapolation(Extrapolation::LoopRepeat, Extrapolation::LoopRepeat);
    assert_eq!(repeat.eval(3.0), Some(6.0));
    assert_eq!(repeat.eval(-1.0), Some(-2.0));

    let reset = base
        .clone()
        .with_extrapolation(Extrapolation::LoopReset, Extrapolation::LoopReset);
    assert_eq!(reset.eval(3.0), Some(2.0));

    let osc = base.with_extrapolation(Extrapolation::LoopOscillate, Extrapolation::LoopOscillate);
    assert_eq!(osc.eval(3.0), Some(2.0));
    assert_eq!(osc.eval(2.5), Some(3.0));
    assert_eq!(osc.eval(4.5), Some(1.0));
}

#[test]
fn duplicate_knot_times_are_rejected() {
    assert!(Spline::new(vec![Knot::new(1.0, 0.0), Knot::new(1.0, 2.0)]).is_err());
    assert!(
        Spline::default()
            .with_inner_loops(LoopParams {
                proto_start: 3.0,
                proto_end: 3.0,
                num_pre_loops: 0,
                num_post_loops: 0,
                value_offset: 0.0,
            })
            .is_err()
    );
}

#[test]
fn empty_spline_has_no_value() {
    assert_eq!(Spline::default().eval(0.0), None);
    assert!(!Spline::default().has_knots());
}

#[test]
fn json_form_round_trips_loops() {
    let s: Spline = serde_json::from_str(
        r#"{
            "knots": [{"time": 1.0, "value": 5.0}],
            "inner_loops": {"proto_start": 1.0, "proto_end": 10.0, "num_post_loops": 1}
        }"#,
    )
    .unwrap();
    assert_eq!(s, looped_single_knot());
    assert_eq!(s.eval(19.0), Some(5.0));
}
