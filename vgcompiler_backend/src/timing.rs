//! Timing compensation: re-arm latency padding and marker-line
//! serialization.
//!
//! The compensator is a pure timing transform over a synthesized
//! [`WaveformProgram`]: it lengthens dwells and moves pulses, but never
//! changes a voltage target. Both latency numbers are configuration — the
//! right values are instrument-specific and must come from the caller.

use crate::error::{Error, Result};
use crate::utils::samps;
use crate::waveform::{MarkerEvent, SegmentShape, WaveformProgram};

/// Instrument latency parameters.
#[derive(Clone, Copy, Debug)]
pub struct TimingConfig {
    /// Time the acquisition instrument needs between trigger events before
    /// it can trigger again, seconds.
    pub rearm_time: f64,
    /// Minimum gap inserted between two pulses serialized onto one marker
    /// line, seconds.
    pub marker_dead_time: f64,
}

/// Applies [`TimingConfig`] to a synthesized program.
pub struct TimingCompensator {
    cfg: TimingConfig,
}

impl TimingCompensator {
    pub fn new(cfg: TimingConfig) -> Self {
        Self { cfg }
    }

    /// Compensates `program` in place.
    ///
    /// 1. If the acquisition-trigger cadence is faster than the re-arm time,
    ///    every point period is padded at the leading edge of the next point
    ///    (its dwell is lengthened) until the digitizer can keep up. All
    ///    channels stretch together, so durations stay identical.
    /// 2. Pulses serialized onto one marker line are spaced by the dead-time
    ///    gap; if a moved pulse no longer fits inside the program, the
    ///    sharing is unresolvable and fails as a marker conflict.
    pub fn compensate(&self, program: &mut WaveformProgram) -> Result<()> {
        if !(self.cfg.rearm_time >= 0.0 && self.cfg.rearm_time.is_finite()) {
            return Err(Error::Configuration(format!(
                "re-arm time must be non-negative, got {}",
                self.cfg.rearm_time
            )));
        }
        if !(self.cfg.marker_dead_time >= 0.0 && self.cfg.marker_dead_time.is_finite()) {
            return Err(Error::Configuration(format!(
                "marker dead time must be non-negative, got {}",
                self.cfg.marker_dead_time
            )));
        }
        self.pad_for_rearm(program);
        self.serialize_shared_markers(program)
    }

    fn pad_for_rearm(&self, program: &mut WaveformProgram) {
        let rearm_samps = samps(self.cfg.rearm_time, program.sample_rate);
        // Acquisition cadence: per point when a PointStart marker drives the
        // digitizer, otherwise once per line via the master trigger.
        let cadence_points = if program
            .marker_pulses
            .iter()
            .any(|p| p.event == MarkerEvent::PointStart)
        {
            1
        } else {
            program.line_len
        };
        let needed_period = (rearm_samps + cadence_points - 1) / cadence_points;
        let old_period = program.point_samps;
        if needed_period <= old_period {
            return;
        }
        let pad = needed_period - old_period;

        // Lengthen the dwell that closes each point, on every channel.
        for segment in program.segments.values_mut() {
            let mut pos = 0;
            for entry in segment.entries_().iter_mut() {
                pos += entry.n_samps;
                if pos % old_period == 0 {
                    debug_assert!(matches!(entry.shape, SegmentShape::Const(_)));
                    entry.n_samps += pad;
                }
            }
        }

        // Re-space pulses onto the stretched time base.
        let respace = |start: usize| (start / old_period) * needed_period + start % old_period;
        for pulse in &mut program.trigger_pulses {
            pulse.start = respace(pulse.start);
        }
        for pulse in &mut program.marker_pulses {
            pulse.start = respace(pulse.start);
        }
        program.point_samps = needed_period;
        log::debug!(
            "re-arm padding: point period {} -> {} samples",
            old_period,
            needed_period
        );
    }

    fn serialize_shared_markers(&self, program: &mut WaveformProgram) -> Result<()> {
        let dead_samps = samps(self.cfg.marker_dead_time, program.sample_rate);
        let total = program.total_samps();

        // Channels carrying more than one pulse source; the master trigger
        // occupies its line as an immovable pulse train.
        let mut channels: Vec<String> = program
            .marker_pulses
            .iter()
            .map(|p| p.channel.clone())
            .collect();
        channels.sort();
        channels.dedup();

        for channel in channels {
            // (start, len, marker index or None for trigger pulses)
            let mut timeline: Vec<(usize, usize, Option<usize>)> = Vec::new();
            if channel == program.trigger_channel {
                for t in &program.trigger_pulses {
                    timeline.push((t.start, t.len, None));
                }
            }
            for (i, p) in program.marker_pulses.iter().enumerate() {
                if p.channel == channel {
                    timeline.push((p.start, p.len, Some(i)));
                }
            }
            if timeline.len() < 2 {
                continue;
            }
            timeline.sort_by_key(|&(start, _, _)| start);

            let mut prev_end = None;
            for (start, len, idx) in timeline {
                let mut start = start;
                if let Some(end) = prev_end {
                    if start < end {
                        match idx {
                            None => {
                                return Err(Error::MarkerConflict(format!(
                                    "master trigger on {} collides with a marker pulse",
                                    channel
                                )))
                            }
                            Some(i) => {
                                start = end + dead_samps;
                                if start + len > total {
                                    return Err(Error::MarkerConflict(format!(
                                        "dead-time gap pushes {:?} pulse on {} past the segment end",
                                        program.marker_pulses[i].event, channel
                                    )));
                                }
                                log::debug!(
                                    "serialized {:?} pulse on {} to sample {}",
                                    program.marker_pulses[i].event,
                                    channel,
                                    start
                                );
                                program.marker_pulses[i].start = start;
                            }
                        }
                    }
                }
                prev_end = Some(start + len);
            }
        }
        Ok(())
    }
}
