//! Waveform synthesis: turning a sweep plan into per-channel segment lists
//! with trigger and marker pulses.
//!
//! Every plan coordinate becomes one *point period* of `ramp + dwell`
//! samples on every involved channel, so total duration is identical across
//! channels by construction. Ramps are linear interpolations from the
//! previous channel value; a zero ramp time degenerates to a step. All
//! channel targets for the whole plan are guard-checked *before* a single
//! segment entry is emitted, aggregating every violation.
//!
//! Trigger and marker events land on marker-capable (`mk`) lines:
//!
//! - the configured trigger channel carries one master trigger pulse per
//!   line boundary;
//! - each configured [`MarkerEvent`] yields one pulse per occurrence
//!   (`LineStart` per line, `PointStart` per point) on its assigned channel.
//!
//! Two marker events may share one physical channel only when the caller
//! provides disjoint time windows inside the point period; anything else is
//! a marker conflict, raised here, before any upload.

use indexmap::IndexMap;
use ndarray::{s, Array1, ArrayViewMut1};

use crate::channel::{marker_capable, BoundaryGuard};
use crate::error::{Error, Result};
use crate::matrix::GateContext;
use crate::sweep::SweepPlan;
use crate::utils::samps;

/// Shape of one waveform segment entry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SegmentShape {
    /// Hold a constant level.
    Const(f64),
    /// Linear ramp; reaches `to` exactly at the entry's last sample.
    Ramp { from: f64, to: f64 },
}

/// One (duration, shape) entry of a channel waveform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentEntry {
    pub n_samps: usize,
    pub shape: SegmentShape,
}

/// Ordered waveform of a single physical channel.
#[derive(Debug)]
pub struct WaveformSegment {
    channel: String,
    entries: Vec<SegmentEntry>,
}

impl WaveformSegment {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn entries(&self) -> &[SegmentEntry] {
        &self.entries
    }

    pub(crate) fn entries_(&mut self) -> &mut Vec<SegmentEntry> {
        &mut self.entries
    }

    /// Total sample count.
    pub fn n_samps(&self) -> usize {
        self.entries.iter().map(|e| e.n_samps).sum()
    }

    /// Channel value at the end of the segment.
    pub fn final_value(&self) -> f64 {
        match self.entries.last() {
            Some(SegmentEntry {
                shape: SegmentShape::Const(v),
                ..
            }) => *v,
            Some(SegmentEntry {
                shape: SegmentShape::Ramp { to, .. },
                ..
            }) => *to,
            None => 0.0,
        }
    }

    /// Renders the segment into a caller buffer of exactly `n_samps()`
    /// samples. Ramp entries interpolate linearly and hit `to` on their last
    /// sample.
    pub fn sample_into(&self, buffer: &mut ArrayViewMut1<f64>) {
        assert_eq!(
            buffer.len(),
            self.n_samps(),
            "buffer length mismatch for channel {}",
            self.channel
        );
        let mut pos = 0;
        for entry in &self.entries {
            let mut slice = buffer.slice_mut(s![pos..pos + entry.n_samps]);
            match entry.shape {
                SegmentShape::Const(v) => slice.fill(v),
                SegmentShape::Ramp { from, to } => {
                    let n = entry.n_samps as f64;
                    for (i, x) in slice.iter_mut().enumerate() {
                        *x = from + (to - from) * ((i + 1) as f64 / n);
                    }
                }
            }
            pos += entry.n_samps;
        }
    }

    /// Convenience wrapper allocating the output buffer.
    pub fn sample(&self) -> Array1<f64> {
        let mut out = Array1::zeros(self.n_samps());
        self.sample_into(&mut out.view_mut());
        out
    }
}

/// Logical timing events a marker line can signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MarkerEvent {
    /// Start of each innermost-axis line.
    LineStart,
    /// Start of each point period (typically triggers the digitizer).
    PointStart,
}

/// Caller-side placement of a marker event: the physical `mk` line and an
/// optional time window (seconds, relative to the point period) the pulse
/// must stay inside. Windows are what make sharing a line resolvable.
#[derive(Clone, Debug)]
pub struct MarkerAssignment {
    pub channel: String,
    pub window: Option<(f64, f64)>,
}

impl MarkerAssignment {
    pub fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            window: None,
        }
    }

    pub fn windowed(channel: &str, window: (f64, f64)) -> Self {
        Self {
            channel: channel.to_string(),
            window: Some(window),
        }
    }
}

/// One emitted marker pulse, in samples.
#[derive(Clone, Debug, PartialEq)]
pub struct MarkerPulse {
    pub channel: String,
    pub event: MarkerEvent,
    pub start: usize,
    pub len: usize,
}

/// One master trigger pulse on the trigger channel, in samples.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriggerPulse {
    pub start: usize,
    pub len: usize,
}

/// Synthesis parameters.
#[derive(Clone, Debug)]
pub struct SynthConfig {
    /// AWG sample rate in Sa/s.
    pub sample_rate: f64,
    /// Dwell time per plan coordinate, seconds.
    pub point_time: f64,
    /// Ramp time between coordinates, seconds; zero means step transitions.
    pub ramp_time: f64,
    /// Marker-capable line carrying the master trigger at line boundaries.
    pub trigger_channel: String,
    /// Width of trigger and marker pulses, seconds.
    pub marker_width: f64,
    /// Logical event placements.
    pub markers: IndexMap<MarkerEvent, MarkerAssignment>,
}

/// The synthesized program: per-channel segments plus trigger/marker pulses,
/// all sharing one time base.
#[derive(Debug)]
pub struct WaveformProgram {
    pub segments: IndexMap<String, WaveformSegment>,
    pub trigger_channel: String,
    pub trigger_pulses: Vec<TriggerPulse>,
    pub marker_pulses: Vec<MarkerPulse>,
    pub sample_rate: f64,
    /// Samples per point period (ramp + dwell).
    pub point_samps: usize,
    pub line_len: usize,
    pub n_lines: usize,
}

impl WaveformProgram {
    pub fn n_points(&self) -> usize {
        self.line_len * self.n_lines
    }

    pub fn total_samps(&self) -> usize {
        self.n_points() * self.point_samps
    }
}

/// Converts sweep plans into [`WaveformProgram`]s through a [`GateContext`].
pub struct WaveformSynthesizer {
    cfg: SynthConfig,
}

impl WaveformSynthesizer {
    pub fn new(cfg: SynthConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &SynthConfig {
        &self.cfg
    }

    /// Synthesizes the waveform set for `plan`.
    ///
    /// Gates not on a plan axis stay at their current derived value. The
    /// entire plan is forward-mapped and guard-checked first; a boundary
    /// violation anywhere aborts synthesis with every breach aggregated and
    /// nothing emitted.
    pub fn synthesize(&self, plan: &SweepPlan, ctx: &mut GateContext) -> Result<WaveformProgram> {
        let (ramp_samps, dwell_samps, width_samps) = self.validated_timing()?;
        self.validate_marker_channels(ctx)?;
        self.check_marker_windows()?;
        let period = ramp_samps + dwell_samps;

        // Plan gates -> matrix gate indices.
        let gate_idx: Vec<usize> = plan
            .gate_names()
            .iter()
            .map(|g| ctx.matrix().gate_index(g))
            .collect::<Result<Vec<_>>>()?;

        // Forward-map and guard-check every coordinate before emitting
        // anything.
        let base = ctx.virtual_values()?;
        let channel_names: Vec<String> = ctx.matrix().channel_names().to_vec();
        let mut per_point: Vec<Vec<f64>> = Vec::with_capacity(plan.len());
        let mut breaches = Vec::new();
        for coord in plan.coords() {
            let mut v = base.clone();
            for (axis, &idx) in gate_idx.iter().enumerate() {
                v[idx] = coord[axis];
            }
            let c = ctx.matrix().to_channels(&v)?;
            for (name, value) in channel_names.iter().zip(c.iter()) {
                if let Some(b) = BoundaryGuard::breach(ctx.registry().chan(name)?, *value) {
                    breaches.push(b);
                }
            }
            per_point.push(c.to_vec());
        }
        if !breaches.is_empty() {
            return Err(Error::BoundaryViolation(breaches));
        }

        // Per-channel segment lists; identical entry timing across channels.
        let mut segments = IndexMap::new();
        for (ch_idx, name) in channel_names.iter().enumerate() {
            let mut entries = Vec::with_capacity(2 * plan.len());
            let mut prev = per_point[0][ch_idx];
            for (k, point) in per_point.iter().enumerate() {
                let target = point[ch_idx];
                if k == 0 || ramp_samps == 0 {
                    entries.push(SegmentEntry {
                        n_samps: period,
                        shape: SegmentShape::Const(target),
                    });
                } else {
                    entries.push(SegmentEntry {
                        n_samps: ramp_samps,
                        shape: SegmentShape::Ramp { from: prev, to: target },
                    });
                    entries.push(SegmentEntry {
                        n_samps: dwell_samps,
                        shape: SegmentShape::Const(target),
                    });
                }
                prev = target;
            }
            segments.insert(
                name.clone(),
                WaveformSegment {
                    channel: name.clone(),
                    entries,
                },
            );
        }
        let total = plan.len() * period;
        debug_assert!(segments.values().all(|s| s.n_samps() == total));

        // Master trigger at each line boundary.
        let line_samps = plan.line_len() * period;
        let trigger_pulses: Vec<TriggerPulse> = (0..plan.n_lines())
            .map(|line| TriggerPulse {
                start: line * line_samps,
                len: width_samps,
            })
            .collect();

        // One pulse per event occurrence on the assigned lines.
        let mut marker_pulses = Vec::new();
        for (event, assignment) in &self.cfg.markers {
            let offset = assignment
                .window
                .map(|(w0, _)| samps(w0, self.cfg.sample_rate))
                .unwrap_or(0);
            let bases: Vec<usize> = match event {
                MarkerEvent::LineStart => {
                    (0..plan.n_lines()).map(|l| l * line_samps).collect()
                }
                MarkerEvent::PointStart => (0..plan.len()).map(|k| k * period).collect(),
            };
            for base in bases {
                marker_pulses.push(MarkerPulse {
                    channel: assignment.channel.clone(),
                    event: *event,
                    start: base + offset,
                    len: width_samps,
                });
            }
        }

        log::debug!(
            "synthesized {} channels x {} samples, {} trigger and {} marker pulses",
            segments.len(),
            total,
            trigger_pulses.len(),
            marker_pulses.len()
        );

        Ok(WaveformProgram {
            segments,
            trigger_channel: self.cfg.trigger_channel.clone(),
            trigger_pulses,
            marker_pulses,
            sample_rate: self.cfg.sample_rate,
            point_samps: period,
            line_len: plan.line_len(),
            n_lines: plan.n_lines(),
        })
    }

    /// Converts the configured times to samples, rejecting degenerate
    /// values.
    fn validated_timing(&self) -> Result<(usize, usize, usize)> {
        let sr = self.cfg.sample_rate;
        if !(sr.is_finite() && sr > 0.0) {
            return Err(Error::Configuration(format!(
                "sample rate must be positive, got {}",
                sr
            )));
        }
        if !(self.cfg.ramp_time >= 0.0 && self.cfg.ramp_time.is_finite()) {
            return Err(Error::Configuration(format!(
                "ramp time must be non-negative, got {}",
                self.cfg.ramp_time
            )));
        }
        let dwell = samps(self.cfg.point_time, sr);
        if dwell == 0 {
            return Err(Error::Configuration(format!(
                "point time {} is below one sample at {} Sa/s",
                self.cfg.point_time, sr
            )));
        }
        let width = samps(self.cfg.marker_width, sr);
        if width == 0 {
            return Err(Error::Configuration(format!(
                "marker width {} is below one sample at {} Sa/s",
                self.cfg.marker_width, sr
            )));
        }
        Ok((samps(self.cfg.ramp_time, sr), dwell, width))
    }

    /// Trigger and marker lines must exist and be marker-capable.
    fn validate_marker_channels(&self, ctx: &GateContext) -> Result<()> {
        let mut lines = vec![&self.cfg.trigger_channel];
        lines.extend(self.cfg.markers.values().map(|a| &a.channel));
        for name in lines {
            ctx.registry().chan(name)?;
            if !marker_capable(name) {
                return Err(Error::Configuration(format!(
                    "{} is not a marker-capable (mk) line",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Marker events sharing one physical line need disjoint caller windows
    /// that each fit the pulse width inside the point period.
    fn check_marker_windows(&self) -> Result<()> {
        let period = self.cfg.point_time + self.cfg.ramp_time;
        let assignments: Vec<(&MarkerEvent, &MarkerAssignment)> =
            self.cfg.markers.iter().collect();
        for (i, (event_a, a)) in assignments.iter().enumerate() {
            if let Some((w0, w1)) = a.window {
                if !(0.0 <= w0 && w0 < w1 && w1 <= period) {
                    return Err(Error::MarkerConflict(format!(
                        "window [{}, {}] for {:?} does not fit the {}s point period",
                        w0, w1, event_a, period
                    )));
                }
                if w1 - w0 < self.cfg.marker_width {
                    return Err(Error::MarkerConflict(format!(
                        "window [{}, {}] for {:?} is narrower than the {}s marker width",
                        w0, w1, event_a, self.cfg.marker_width
                    )));
                }
            }
            for (event_b, b) in assignments.iter().skip(i + 1) {
                if a.channel != b.channel {
                    continue;
                }
                match (a.window, b.window) {
                    (Some((a0, a1)), Some((b0, b1))) => {
                        if a0 < b1 && b0 < a1 {
                            return Err(Error::MarkerConflict(format!(
                                "{:?} and {:?} share {} with overlapping windows",
                                event_a, event_b, a.channel
                            )));
                        }
                    }
                    _ => {
                        return Err(Error::MarkerConflict(format!(
                            "{:?} and {:?} both requested on {} without disjoint windows",
                            event_a, event_b, a.channel
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
