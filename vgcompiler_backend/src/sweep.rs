//! Sweep planning: ordered coordinate sequences in virtual-gate space.
//!
//! A [`SweepPlan`] is the Cartesian product of per-axis sample sequences in
//! row-major order with the *first axis varying slowest*. Downstream
//! waveform shaping depends on this ordering (the innermost axis forms the
//! fast "line" of the scan), so it is part of the contract, not an
//! implementation detail.

use crate::error::{Error, Result};

/// One scan axis: a virtual gate swept from `start` to `stop` in increments
/// of `step`.
#[derive(Clone, Debug, PartialEq)]
pub struct SweepAxis {
    pub gate: String,
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

impl SweepAxis {
    pub fn new(gate: &str, start: f64, stop: f64, step: f64) -> Self {
        Self {
            gate: gate.to_string(),
            start,
            stop,
            step,
        }
    }

    /// Sample count: `round((stop - start)/step) + 1`.
    fn count(&self) -> Result<usize> {
        if !self.step.is_finite() || self.step == 0.0 {
            return Err(Error::Configuration(format!(
                "axis {}: step must be finite and non-zero, got {}",
                self.gate, self.step
            )));
        }
        if (self.stop - self.start) * self.step < 0.0 {
            return Err(Error::Configuration(format!(
                "axis {}: step {} runs against the {} -> {} direction",
                self.gate, self.step, self.start, self.stop
            )));
        }
        Ok(((self.stop - self.start) / self.step).round() as usize + 1)
    }

    /// Axis samples, generated as `start + i*step` to avoid accumulation
    /// error. Monotonic, duplicate-free.
    fn samples(&self) -> Result<Vec<f64>> {
        let n = self.count()?;
        Ok((0..n).map(|i| self.start + i as f64 * self.step).collect())
    }
}

/// Ordered set of N-tuples defining a scan trajectory.
///
/// # Examples
///
/// ```
/// use vgcompiler_backend::sweep::{SweepAxis, SweepPlan};
///
/// let plan = SweepPlan::new(vec![SweepAxis::new("A", -1.0, 1.0, 0.5)]).unwrap();
/// let values: Vec<f64> = plan.coords().iter().map(|c| c[0]).collect();
/// assert_eq!(values, vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
/// ```
#[derive(Clone, Debug)]
pub struct SweepPlan {
    axes: Vec<SweepAxis>,
    shape: Vec<usize>,
    coords: Vec<Vec<f64>>,
}

impl SweepPlan {
    /// Expands `axes` into the full coordinate sequence.
    ///
    /// Fails with a configuration error on an empty axis list, a duplicate
    /// gate, a zero step, or a step whose sign fights the sweep direction.
    pub fn new(axes: Vec<SweepAxis>) -> Result<Self> {
        if axes.is_empty() {
            return Err(Error::Configuration(
                "sweep needs at least one axis".to_string(),
            ));
        }
        for (i, axis) in axes.iter().enumerate() {
            if axes[..i].iter().any(|a| a.gate == axis.gate) {
                return Err(Error::Configuration(format!(
                    "gate {} appears on more than one axis",
                    axis.gate
                )));
            }
        }
        let per_axis: Vec<Vec<f64>> = axes
            .iter()
            .map(|a| a.samples())
            .collect::<Result<Vec<_>>>()?;
        let shape: Vec<usize> = per_axis.iter().map(|s| s.len()).collect();

        // Row-major product, first axis slowest.
        let mut coords: Vec<Vec<f64>> = vec![Vec::new()];
        for samples in &per_axis {
            let mut next = Vec::with_capacity(coords.len() * samples.len());
            for prefix in &coords {
                for value in samples {
                    let mut coord = prefix.clone();
                    coord.push(*value);
                    next.push(coord);
                }
            }
            coords = next;
        }

        Ok(Self {
            axes,
            shape,
            coords,
        })
    }

    pub fn axes(&self) -> &[SweepAxis] {
        &self.axes
    }

    /// Gate name per axis, outermost first.
    pub fn gate_names(&self) -> Vec<String> {
        self.axes.iter().map(|a| a.gate.clone()).collect()
    }

    /// Points per axis, outermost first.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The ordered coordinate sequence.
    pub fn coords(&self) -> &[Vec<f64>] {
        &self.coords
    }

    /// Total point count.
    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Points per innermost-axis line.
    pub fn line_len(&self) -> usize {
        *self.shape.last().unwrap()
    }

    /// Number of innermost-axis lines in the scan.
    pub fn n_lines(&self) -> usize {
        self.len() / self.line_len()
    }
}
