//! Integration tests driving the full compile pipeline: registry and guard,
//! gate matrix, excursions, sweep planning, waveform synthesis and timing
//! compensation.

use assert_matches::assert_matches;
use indexmap::IndexMap;
use maplit::hashmap;
use ndarray::array;
use std::panic::{catch_unwind, AssertUnwindSafe};
use vgcompiler_backend::*;

fn assert_close(a: f64, b: f64) {
    assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
}

/// Two analog channels behind shared `SoftChannel` handles, bound to a
/// 2-gate matrix with the given weights.
fn gate_ctx(weights: ndarray::Array2<f64>) -> (GateContext, SoftChannel, SoftChannel) {
    let mut reg = ChannelRegistry::new();
    let ch0 = SoftChannel::new(0.0, -4.0, 4.0);
    let ch1 = SoftChannel::new(0.0, -4.0, 4.0);
    reg.register("awg1/ch0", (-2.0, 2.0), "V", Box::new(ch0.clone()))
        .unwrap();
    reg.register("awg1/ch1", (-2.0, 2.0), "V", Box::new(ch1.clone()))
        .unwrap();
    let matrix = GateMatrix::new(
        vec!["P1".to_string(), "P2".to_string()],
        vec!["awg1/ch0".to_string(), "awg1/ch1".to_string()],
        weights,
    )
    .unwrap();
    let ctx = GateContext::new(reg, matrix).unwrap();
    (ctx, ch0, ch1)
}

/// Same as [`gate_ctx`] plus two marker-capable lines for trigger/marker
/// placement.
fn synth_ctx() -> (GateContext, SoftChannel, SoftChannel) {
    let mut reg = ChannelRegistry::new();
    let ch0 = SoftChannel::new(0.0, -4.0, 4.0);
    let ch1 = SoftChannel::new(0.0, -4.0, 4.0);
    reg.register("awg1/ch0", (-2.0, 2.0), "V", Box::new(ch0.clone()))
        .unwrap();
    reg.register("awg1/ch1", (-2.0, 2.0), "V", Box::new(ch1.clone()))
        .unwrap();
    reg.register("awg1/mk0", (0.0, 5.0), "V", Box::new(SoftChannel::new(0.0, 0.0, 5.0)))
        .unwrap();
    reg.register("awg1/mk1", (0.0, 5.0), "V", Box::new(SoftChannel::new(0.0, 0.0, 5.0)))
        .unwrap();
    let matrix = GateMatrix::new(
        vec!["P1".to_string(), "P2".to_string()],
        vec!["awg1/ch0".to_string(), "awg1/ch1".to_string()],
        array![[1.0, 0.0], [0.0, 1.0]],
    )
    .unwrap();
    let ctx = GateContext::new(reg, matrix).unwrap();
    (ctx, ch0, ch1)
}

/// 1 kSa/s, 10-sample dwell, 4-sample ramp, 2-sample pulses.
fn base_synth(markers: IndexMap<MarkerEvent, MarkerAssignment>) -> SynthConfig {
    SynthConfig {
        sample_rate: 1000.0,
        point_time: 0.01,
        ramp_time: 0.004,
        trigger_channel: "awg1/mk0".to_string(),
        marker_width: 0.002,
        markers,
    }
}

// --- registry and boundary guard ---

#[test]
fn registry_rejects_bad_registrations() {
    let mut reg = ChannelRegistry::new();
    let soft = || Box::new(SoftChannel::new(0.0, -4.0, 4.0));
    assert_matches!(
        reg.register("bad name", (-1.0, 1.0), "V", soft()),
        Err(Error::Configuration(_))
    );
    reg.register("awg1/ch0", (-1.0, 1.0), "V", soft()).unwrap();
    assert_matches!(
        reg.register("awg1/ch0", (-1.0, 1.0), "V", soft()),
        Err(Error::Configuration(_))
    );
    // Registered bounds may not widen the hardware bounds.
    assert_matches!(
        reg.register("awg1/ch1", (-8.0, 8.0), "V", soft()),
        Err(Error::Configuration(_))
    );
    assert_matches!(
        reg.register("awg1/ch2", (1.0, 1.0), "V", soft()),
        Err(Error::Configuration(_))
    );
}

#[test]
fn bulk_write_is_all_or_nothing() {
    let mut reg = ChannelRegistry::new();
    reg.register("awg1/ch0", (-2.0, 2.0), "V", Box::new(SoftChannel::new(0.0, -4.0, 4.0)))
        .unwrap();
    reg.register("awg1/ch1", (-2.0, 2.0), "V", Box::new(SoftChannel::new(0.0, -4.0, 4.0)))
        .unwrap();

    let expected = hashmap! {
        "awg1/ch0" => 0.25,
        "awg1/ch1" => -0.5,
    };
    reg.write_many(&[
        ("awg1/ch0".to_string(), 0.25),
        ("awg1/ch1".to_string(), -0.5),
    ])
    .unwrap();
    for (name, value) in &expected {
        assert_close(reg.chan(name).unwrap().value().unwrap(), *value);
    }

    // One bad target leaves every channel untouched.
    let err = reg
        .write_many(&[
            ("awg1/ch0".to_string(), 1.0),
            ("awg1/ch1".to_string(), 3.0),
        ])
        .unwrap_err();
    assert_matches!(err, Error::BoundaryViolation(b) if b.len() == 1 && b[0].channel == "awg1/ch1");
    for (name, value) in &expected {
        assert_close(reg.chan(name).unwrap().value().unwrap(), *value);
    }
}

#[test]
fn guard_rejects_non_finite_values() {
    let mut reg = ChannelRegistry::new();
    reg.register("awg1/ch0", (-2.0, 2.0), "V", Box::new(SoftChannel::new(0.0, -4.0, 4.0)))
        .unwrap();
    assert_matches!(reg.write("awg1/ch0", f64::NAN), Err(Error::BoundaryViolation(_)));
    assert_matches!(
        reg.write("awg1/ch0", f64::INFINITY),
        Err(Error::BoundaryViolation(_))
    );
}

// --- gate matrix ---

#[test]
fn matrix_round_trip_with_cross_coupling() {
    let mut matrix = GateMatrix::new(
        vec!["P1".to_string(), "P2".to_string(), "B1".to_string()],
        vec![
            "awg1/ch0".to_string(),
            "awg1/ch1".to_string(),
            "awg1/ch2".to_string(),
        ],
        array![[1.0, 0.3, 0.1], [0.2, 1.0, 0.4], [0.0, 0.1, 1.0]],
    )
    .unwrap();
    let v = array![0.5, -0.3, 0.8];
    let c = matrix.to_channels(&v).unwrap();
    let back = matrix.to_virtual(&c).unwrap();
    for (a, b) in v.iter().zip(back.iter()) {
        assert_close(*a, *b);
    }
}

#[test]
fn singular_matrix_fails_construction() {
    let result = GateMatrix::new(
        vec!["P1".to_string(), "P2".to_string()],
        vec!["awg1/ch0".to_string(), "awg1/ch1".to_string()],
        array![[1.0, 1.0], [2.0, 2.0]],
    );
    assert_matches!(result, Err(Error::Configuration(_)));
}

#[test]
fn matrix_edit_invalidates_inverse() {
    let mut matrix = GateMatrix::new(
        vec!["P1".to_string(), "P2".to_string()],
        vec!["awg1/ch0".to_string(), "awg1/ch1".to_string()],
        array![[1.0, 0.0], [0.0, 1.0]],
    )
    .unwrap();
    matrix.set_matrix_entry("P1", "awg1/ch1", 0.5).unwrap();
    let c = matrix.to_channels(&array![1.0, 0.0]).unwrap();
    assert_close(c[1], 0.5);
    // The lazily recomputed inverse matches the edited weights.
    let back = matrix.to_virtual(&c).unwrap();
    assert_close(back[0], 1.0);
    assert_close(back[1], 0.0);

    // An edit that makes the matrix singular surfaces at the next read-back.
    matrix.set_matrix_entry("P1", "awg1/ch1", 0.0).unwrap();
    matrix.set_matrix_entry("P1", "awg1/ch0", 0.0).unwrap();
    assert_matches!(matrix.to_virtual(&array![0.0, 0.0]), Err(Error::Configuration(_)));
}

#[test]
fn out_of_bounds_virtual_write_changes_nothing() {
    let (mut ctx, ch0, ch1) = gate_ctx(array![[1.0, 0.0], [0.0, 1.0]]);
    let err = ctx.set_virtual("P1", 3.0).unwrap_err();
    assert_matches!(err, Error::BoundaryViolation(b) if b.len() == 1 && b[0].channel == "awg1/ch0");
    assert_close(ch0.raw_value(), 0.0);
    assert_close(ch1.raw_value(), 0.0);

    // Violations on several channels aggregate into one error.
    let err = ctx.apply_virtual(&array![3.0, -5.0]).unwrap_err();
    assert_matches!(err, Error::BoundaryViolation(b) if b.len() == 2);
}

#[test]
fn set_virtual_decouples_other_gates() {
    let (mut ctx, ch0, ch1) = gate_ctx(array![[1.0, 0.2], [0.1, 1.0]]);
    ctx.set_virtual("P1", 0.4).unwrap();
    assert_close(ctx.virtual_value("P1").unwrap(), 0.4);
    assert_close(ctx.virtual_value("P2").unwrap(), 0.0);
    // Both physical channels moved to compensate the coupling.
    assert_close(ch0.raw_value(), 0.4);
    assert_close(ch1.raw_value(), 0.08);

    ctx.set_virtual("P2", -0.3).unwrap();
    assert_close(ctx.virtual_value("P1").unwrap(), 0.4);
    assert_close(ctx.virtual_value("P2").unwrap(), -0.3);
}

#[test]
fn unknown_gate_and_channel_report_not_found() {
    let (mut ctx, _, _) = gate_ctx(array![[1.0, 0.0], [0.0, 1.0]]);
    assert_matches!(ctx.set_virtual("nope", 0.1), Err(Error::NotFound(_)));
    assert_matches!(ctx.registry().chan("awg9/ch9"), Err(Error::NotFound(_)));
}

// --- excursions ---

#[test]
fn excursion_restores_on_end() {
    let (mut ctx, ch0, _) = gate_ctx(array![[1.0, 0.0], [0.0, 1.0]]);
    ctx.set_virtual("P1", 0.2).unwrap();
    {
        let mut exc = ctx.excursion(&["P1"]).unwrap();
        exc.set_virtual("P1", 1.5).unwrap();
        assert_close(ch0.raw_value(), 1.5);
        exc.end().unwrap();
    }
    assert_close(ctx.virtual_value("P1").unwrap(), 0.2);
    assert_close(ch0.raw_value(), 0.2);
}

#[test]
fn excursion_restores_on_drop() {
    let (mut ctx, ch0, _) = gate_ctx(array![[1.0, 0.0], [0.0, 1.0]]);
    {
        let mut exc = ctx.excursion(&["P1"]).unwrap();
        exc.set_virtual("P1", 1.0).unwrap();
        // Early exit without end(): the guard restores.
    }
    assert_close(ch0.raw_value(), 0.0);
}

#[test]
fn nested_excursions_unwind_in_reverse_order() {
    let (mut ctx, ch0, ch1) = gate_ctx(array![[1.0, 0.0], [0.0, 1.0]]);
    {
        let mut outer = ctx.excursion(&["P1"]).unwrap();
        outer.set_virtual("P1", 0.5).unwrap();
        {
            let mut inner = outer.excursion(&["P2"]).unwrap();
            inner.set_virtual("P2", -0.5).unwrap();
            inner.end().unwrap();
        }
        assert_close(ch1.raw_value(), 0.0);
        assert_close(ch0.raw_value(), 0.5);
        outer.end().unwrap();
    }
    assert_close(ch0.raw_value(), 0.0);
}

#[test]
fn excursion_restores_through_panic() {
    let (mut ctx, ch0, _) = gate_ctx(array![[1.0, 0.0], [0.0, 1.0]]);
    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut exc = ctx.excursion(&["P1"]).unwrap();
        exc.set_virtual("P1", 1.2).unwrap();
        panic!("measurement blew up");
    }));
    assert!(result.is_err());
    assert_close(ch0.raw_value(), 0.0);
}

// --- sweep planning ---

#[test]
fn axis_expands_to_exact_samples() {
    let plan = SweepPlan::new(vec![SweepAxis::new("P1", -1.0, 1.0, 0.5)]).unwrap();
    let values: Vec<f64> = plan.coords().iter().map(|c| c[0]).collect();
    assert_eq!(values, vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
    assert_eq!(plan.shape(), &[5]);
    assert_eq!(plan.line_len(), 5);
    assert_eq!(plan.n_lines(), 1);
}

#[test]
fn plan_rejects_degenerate_axes() {
    assert_matches!(SweepPlan::new(vec![]), Err(Error::Configuration(_)));
    assert_matches!(
        SweepPlan::new(vec![SweepAxis::new("P1", 0.0, 1.0, 0.0)]),
        Err(Error::Configuration(_))
    );
    // Step sign fighting the sweep direction.
    assert_matches!(
        SweepPlan::new(vec![SweepAxis::new("P1", 0.0, 1.0, -0.5)]),
        Err(Error::Configuration(_))
    );
    assert_matches!(
        SweepPlan::new(vec![
            SweepAxis::new("P1", 0.0, 1.0, 0.5),
            SweepAxis::new("P1", 0.0, 1.0, 0.5),
        ]),
        Err(Error::Configuration(_))
    );
}

#[test]
fn two_dim_plan_is_row_major_first_axis_slowest() {
    let plan = SweepPlan::new(vec![
        SweepAxis::new("P1", 0.0, 1.0, 1.0),
        SweepAxis::new("P2", 0.0, 2.0, 1.0),
    ])
    .unwrap();
    assert_eq!(plan.shape(), &[2, 3]);
    assert_eq!(plan.line_len(), 3);
    assert_eq!(plan.n_lines(), 2);
    assert_eq!(
        plan.coords(),
        &[
            vec![0.0, 0.0],
            vec![0.0, 1.0],
            vec![0.0, 2.0],
            vec![1.0, 0.0],
            vec![1.0, 1.0],
            vec![1.0, 2.0],
        ]
    );
}

#[test]
fn single_point_axis_is_allowed() {
    let plan = SweepPlan::new(vec![SweepAxis::new("P1", 0.25, 0.25, 0.5)]).unwrap();
    assert_eq!(plan.len(), 1);
    assert_close(plan.coords()[0][0], 0.25);
}

// --- waveform synthesis ---

#[test]
fn synthesis_produces_equal_length_segments() {
    let (mut ctx, _, _) = synth_ctx();
    let plan = SweepPlan::new(vec![SweepAxis::new("P1", 0.0, 1.0, 0.5)]).unwrap();
    let synth = WaveformSynthesizer::new(base_synth(IndexMap::new()));
    let program = synth.synthesize(&plan, &mut ctx).unwrap();

    // 3 points x (4-sample ramp + 10-sample dwell).
    assert_eq!(program.point_samps, 14);
    assert_eq!(program.total_samps(), 42);
    assert_eq!(program.segments.len(), 2);
    for segment in program.segments.values() {
        assert_eq!(segment.n_samps(), 42);
    }

    // ch0 follows P1, ch1 stays at its base value.
    let ch0 = program.segments["awg1/ch0"].sample();
    assert_close(ch0[0], 0.0);
    assert_close(ch0[13], 0.0);
    assert_close(ch0[14], 0.125); // first ramp sample
    assert_close(ch0[17], 0.5); // ramp hits the target at its last sample
    assert_close(ch0[27], 0.5);
    assert_close(ch0[28], 0.625);
    assert_close(ch0[41], 1.0);
    let ch1 = program.segments["awg1/ch1"].sample();
    assert!(ch1.iter().all(|&x| x == 0.0));

    // One master trigger per line.
    assert_eq!(program.trigger_pulses, vec![TriggerPulse { start: 0, len: 2 }]);
    assert!(program.marker_pulses.is_empty());
}

#[test]
fn zero_ramp_time_degenerates_to_steps() {
    let (mut ctx, _, _) = synth_ctx();
    let plan = SweepPlan::new(vec![SweepAxis::new("P1", 0.0, 1.0, 0.5)]).unwrap();
    let mut cfg = base_synth(IndexMap::new());
    cfg.ramp_time = 0.0;
    let program = WaveformSynthesizer::new(cfg).synthesize(&plan, &mut ctx).unwrap();
    assert_eq!(program.point_samps, 10);
    let entries = program.segments["awg1/ch0"].entries();
    assert_eq!(entries.len(), 3);
    assert!(entries
        .iter()
        .all(|e| matches!(e.shape, SegmentShape::Const(_)) && e.n_samps == 10));
}

#[test]
fn point_start_marker_pulses_per_point() {
    let (mut ctx, _, _) = synth_ctx();
    let plan = SweepPlan::new(vec![SweepAxis::new("P1", 0.0, 1.0, 0.5)]).unwrap();
    let markers = IndexMap::from([(
        MarkerEvent::PointStart,
        MarkerAssignment::new("awg1/mk1"),
    )]);
    let program = WaveformSynthesizer::new(base_synth(markers))
        .synthesize(&plan, &mut ctx)
        .unwrap();
    let starts: Vec<usize> = program.marker_pulses.iter().map(|p| p.start).collect();
    assert_eq!(starts, vec![0, 14, 28]);
    assert!(program.marker_pulses.iter().all(|p| p.channel == "awg1/mk1" && p.len == 2));
}

#[test]
fn line_start_markers_follow_the_outer_axis() {
    let (mut ctx, _, _) = synth_ctx();
    let plan = SweepPlan::new(vec![
        SweepAxis::new("P1", 0.0, 1.0, 1.0),
        SweepAxis::new("P2", 0.0, 1.0, 0.5),
    ])
    .unwrap();
    let markers = IndexMap::from([(
        MarkerEvent::LineStart,
        MarkerAssignment::new("awg1/mk1"),
    )]);
    let program = WaveformSynthesizer::new(base_synth(markers))
        .synthesize(&plan, &mut ctx)
        .unwrap();
    // 2 lines of 3 points, 14 samples per point.
    let starts: Vec<usize> = program.marker_pulses.iter().map(|p| p.start).collect();
    assert_eq!(starts, vec![0, 42]);
    let trig: Vec<usize> = program.trigger_pulses.iter().map(|p| p.start).collect();
    assert_eq!(trig, vec![0, 42]);
}

#[test]
fn plan_exceeding_bounds_aborts_with_all_breaches() {
    let (mut ctx, ch0, _) = synth_ctx();
    // P1 up to 5 V drives awg1/ch0 past its 2 V bound at 3, 4 and 5.
    let plan = SweepPlan::new(vec![SweepAxis::new("P1", 0.0, 5.0, 1.0)]).unwrap();
    let err = WaveformSynthesizer::new(base_synth(IndexMap::new()))
        .synthesize(&plan, &mut ctx)
        .unwrap_err();
    assert_matches!(err, Error::BoundaryViolation(b) if b.len() == 3);
    assert_close(ch0.raw_value(), 0.0);
}

#[test]
fn marker_on_analog_line_is_rejected() {
    let (mut ctx, _, _) = synth_ctx();
    let plan = SweepPlan::new(vec![SweepAxis::new("P1", 0.0, 1.0, 0.5)]).unwrap();
    let markers = IndexMap::from([(
        MarkerEvent::PointStart,
        MarkerAssignment::new("awg1/ch1"),
    )]);
    let err = WaveformSynthesizer::new(base_synth(markers))
        .synthesize(&plan, &mut ctx)
        .unwrap_err();
    assert_matches!(err, Error::Configuration(_));
}

#[test]
fn shared_marker_line_needs_disjoint_windows() {
    let (mut ctx, _, _) = synth_ctx();
    let plan = SweepPlan::new(vec![SweepAxis::new("P1", 0.0, 1.0, 0.5)]).unwrap();

    // Two events on one line with no windows: unresolvable.
    let markers = IndexMap::from([
        (MarkerEvent::LineStart, MarkerAssignment::new("awg1/mk1")),
        (MarkerEvent::PointStart, MarkerAssignment::new("awg1/mk1")),
    ]);
    let err = WaveformSynthesizer::new(base_synth(markers))
        .synthesize(&plan, &mut ctx)
        .unwrap_err();
    assert_matches!(err, Error::MarkerConflict(_));

    // Overlapping windows: still a conflict.
    let markers = IndexMap::from([
        (
            MarkerEvent::LineStart,
            MarkerAssignment::windowed("awg1/mk1", (0.0, 0.006)),
        ),
        (
            MarkerEvent::PointStart,
            MarkerAssignment::windowed("awg1/mk1", (0.004, 0.010)),
        ),
    ]);
    let err = WaveformSynthesizer::new(base_synth(markers))
        .synthesize(&plan, &mut ctx)
        .unwrap_err();
    assert_matches!(err, Error::MarkerConflict(_));

    // Disjoint windows resolve; the second event's pulses shift by its
    // window start (6 samples).
    let markers = IndexMap::from([
        (
            MarkerEvent::LineStart,
            MarkerAssignment::windowed("awg1/mk1", (0.0, 0.004)),
        ),
        (
            MarkerEvent::PointStart,
            MarkerAssignment::windowed("awg1/mk1", (0.006, 0.012)),
        ),
    ]);
    let program = WaveformSynthesizer::new(base_synth(markers))
        .synthesize(&plan, &mut ctx)
        .unwrap();
    let point_starts: Vec<usize> = program
        .marker_pulses
        .iter()
        .filter(|p| p.event == MarkerEvent::PointStart)
        .map(|p| p.start)
        .collect();
    assert_eq!(point_starts, vec![6, 20, 34]);
}

#[test]
fn degenerate_timing_is_rejected() {
    let (mut ctx, _, _) = synth_ctx();
    let plan = SweepPlan::new(vec![SweepAxis::new("P1", 0.0, 1.0, 0.5)]).unwrap();
    let mut cfg = base_synth(IndexMap::new());
    cfg.point_time = 1e-7; // below one sample at 1 kSa/s
    assert_matches!(
        WaveformSynthesizer::new(cfg).synthesize(&plan, &mut ctx),
        Err(Error::Configuration(_))
    );
    let mut cfg = base_synth(IndexMap::new());
    cfg.sample_rate = 0.0;
    assert_matches!(
        WaveformSynthesizer::new(cfg).synthesize(&plan, &mut ctx),
        Err(Error::Configuration(_))
    );
}

// --- timing compensation ---

#[test]
fn rearm_padding_stretches_every_channel_equally() {
    let (mut ctx, _, _) = synth_ctx();
    let plan = SweepPlan::new(vec![SweepAxis::new("P1", 0.0, 1.0, 0.5)]).unwrap();
    let markers = IndexMap::from([(
        MarkerEvent::PointStart,
        MarkerAssignment::new("awg1/mk1"),
    )]);
    let mut program = WaveformSynthesizer::new(base_synth(markers))
        .synthesize(&plan, &mut ctx)
        .unwrap();

    // Per-point acquisition with a 20-sample re-arm needs a 20-sample
    // period; the 14-sample period gains 6 samples of dwell per point.
    TimingCompensator::new(TimingConfig {
        rearm_time: 0.02,
        marker_dead_time: 0.0,
    })
    .compensate(&mut program)
    .unwrap();

    assert_eq!(program.point_samps, 20);
    assert_eq!(program.total_samps(), 60);
    for segment in program.segments.values() {
        assert_eq!(segment.n_samps(), 60);
    }
    // Only the point-closing dwells stretched; the ramps kept their shape.
    let entries = program.segments["awg1/ch0"].entries();
    assert_eq!(entries[0].n_samps, 20);
    assert_matches!(entries[1].shape, SegmentShape::Ramp { .. });
    assert_eq!(entries[1].n_samps, 4);
    assert_eq!(entries[2].n_samps, 16);

    // Pulses re-spaced onto the stretched time base, voltages untouched.
    let starts: Vec<usize> = program.marker_pulses.iter().map(|p| p.start).collect();
    assert_eq!(starts, vec![0, 20, 40]);
    assert_eq!(program.trigger_pulses[0].start, 0);
    let ch0 = program.segments["awg1/ch0"].sample();
    assert_close(ch0[19], 0.0);
    assert_close(ch0[23], 0.5);
    assert_close(ch0[59], 1.0);
}

#[test]
fn per_line_cadence_often_needs_no_padding() {
    let (mut ctx, _, _) = synth_ctx();
    let plan = SweepPlan::new(vec![SweepAxis::new("P1", 0.0, 1.0, 0.5)]).unwrap();
    let mut program = WaveformSynthesizer::new(base_synth(IndexMap::new()))
        .synthesize(&plan, &mut ctx)
        .unwrap();
    // No PointStart marker: cadence is one trigger per 3-point line, so a
    // 20-sample re-arm fits the 42-sample line with room to spare.
    TimingCompensator::new(TimingConfig {
        rearm_time: 0.02,
        marker_dead_time: 0.0,
    })
    .compensate(&mut program)
    .unwrap();
    assert_eq!(program.point_samps, 14);
}

#[test]
fn markers_sharing_the_trigger_line_are_serialized() {
    let (mut ctx, _, _) = synth_ctx();
    let plan = SweepPlan::new(vec![SweepAxis::new("P1", 0.0, 1.0, 0.5)]).unwrap();
    // LineStart rides the trigger line itself; both pulse at sample 0.
    let markers = IndexMap::from([(
        MarkerEvent::LineStart,
        MarkerAssignment::new("awg1/mk0"),
    )]);
    let mut program = WaveformSynthesizer::new(base_synth(markers))
        .synthesize(&plan, &mut ctx)
        .unwrap();
    TimingCompensator::new(TimingConfig {
        rearm_time: 0.0,
        marker_dead_time: 0.001,
    })
    .compensate(&mut program)
    .unwrap();
    // The trigger stays put; the marker moves behind it plus the dead gap.
    assert_eq!(program.trigger_pulses[0].start, 0);
    assert_eq!(program.marker_pulses[0].start, 3);
}

#[test]
fn unfittable_marker_serialization_is_a_conflict() {
    let (mut ctx, _, _) = synth_ctx();
    let plan = SweepPlan::new(vec![SweepAxis::new("P1", 0.25, 0.25, 0.5)]).unwrap();
    let markers = IndexMap::from([(
        MarkerEvent::LineStart,
        MarkerAssignment::new("awg1/mk0"),
    )]);
    let mut cfg = base_synth(markers);
    cfg.marker_width = 0.012; // 12 of the 14 samples in the only point
    let mut program = WaveformSynthesizer::new(cfg)
        .synthesize(&plan, &mut ctx)
        .unwrap();
    let err = TimingCompensator::new(TimingConfig {
        rearm_time: 0.0,
        marker_dead_time: 0.001,
    })
    .compensate(&mut program)
    .unwrap_err();
    assert_matches!(err, Error::MarkerConflict(_));
}

#[test]
fn negative_latencies_are_rejected() {
    let (mut ctx, _, _) = synth_ctx();
    let plan = SweepPlan::new(vec![SweepAxis::new("P1", 0.0, 1.0, 0.5)]).unwrap();
    let mut program = WaveformSynthesizer::new(base_synth(IndexMap::new()))
        .synthesize(&plan, &mut ctx)
        .unwrap();
    let err = TimingCompensator::new(TimingConfig {
        rearm_time: -0.1,
        marker_dead_time: 0.0,
    })
    .compensate(&mut program)
    .unwrap_err();
    assert_matches!(err, Error::Configuration(_));
}
