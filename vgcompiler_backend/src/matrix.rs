//! The gate matrix: an invertible linear transform between virtual-gate
//! space and physical channel space, and the [`GateContext`] session object
//! that binds a matrix to a channel registry.
//!
//! ## Orientation
//!
//! The weight matrix `W` has one row per virtual gate and one column per
//! physical channel; row *i* holds the channel weights of gate *i*. The
//! forward map applies `W` as `c = Wᵀ·v`, the read-back map applies the
//! cached pseudo-inverse as `v = (Wᵀ)⁺·c`. Whenever `Wᵀ` has full column
//! rank, `to_virtual(to_channels(v)) == v` within floating tolerance.
//!
//! ## Inverse caching
//!
//! The pseudo-inverse is computed eagerly at construction (a singular matrix
//! never constructs) and cached behind a `fresh_inverse` flag. Any call to
//! [`GateMatrix::set_matrix_entry`] clears the flag; the next read-back
//! recomputes lazily and surfaces a configuration error if the edit made the
//! matrix singular.
//!
//! No linear-algebra backend is linked; inversion is a plain Gauss–Jordan
//! elimination with partial pivoting, with the tall/wide cases reduced to the
//! square case through the normal equations.

use ndarray::{Array1, Array2};

use crate::channel::{BoundaryGuard, ChannelRegistry};
use crate::error::{Error, Result};

/// Relative pivot threshold below which a matrix is treated as singular.
const SINGULAR_RTOL: f64 = 1e-12;

/// Inverts a square matrix by Gauss–Jordan elimination with partial
/// pivoting. Fails with a configuration error on a singular input.
fn invert_square(a: &Array2<f64>) -> Result<Array2<f64>> {
    let (n, m) = a.dim();
    assert_eq!(n, m, "invert_square requires a square matrix");
    let scale = a.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()));
    let tol = SINGULAR_RTOL * (1.0 + scale);

    let mut work = a.clone();
    let mut inv = Array2::<f64>::eye(n);

    for col in 0..n {
        // Partial pivot: bring the largest remaining entry into place.
        let mut pivot_row = col;
        for row in col + 1..n {
            if work[[row, col]].abs() > work[[pivot_row, col]].abs() {
                pivot_row = row;
            }
        }
        let pivot = work[[pivot_row, col]];
        if pivot.abs() <= tol {
            return Err(Error::Configuration(format!(
                "matrix is singular (pivot {:.3e} in column {})",
                pivot, col
            )));
        }
        if pivot_row != col {
            for j in 0..n {
                work.swap([pivot_row, j], [col, j]);
                inv.swap([pivot_row, j], [col, j]);
            }
        }
        let pivot = work[[col, col]];
        for j in 0..n {
            work[[col, j]] /= pivot;
            inv[[col, j]] /= pivot;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = work[[row, col]];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                work[[row, j]] -= factor * work[[col, j]];
                inv[[row, j]] -= factor * inv[[col, j]];
            }
        }
    }
    Ok(inv)
}

/// Moore–Penrose pseudo-inverse: direct inversion in the square case,
/// least-squares normal-equation forms otherwise.
fn pseudo_inverse(a: &Array2<f64>) -> Result<Array2<f64>> {
    let (rows, cols) = a.dim();
    if rows == cols {
        invert_square(a)
    } else if rows > cols {
        // Tall: (AᵀA)⁻¹Aᵀ
        let gram = a.t().dot(a);
        Ok(invert_square(&gram)?.dot(&a.t()))
    } else {
        // Wide: Aᵀ(AAᵀ)⁻¹
        let gram = a.dot(&a.t());
        Ok(a.t().dot(&invert_square(&gram)?))
    }
}

/// Linear transform between virtual-gate space and channel space.
///
/// # Examples
///
/// ```
/// use ndarray::{array, Array1};
/// use vgcompiler_backend::matrix::GateMatrix;
///
/// let mut matrix = GateMatrix::new(
///     vec!["P1".to_string(), "P2".to_string()],
///     vec!["awg1/ch0".to_string(), "awg1/ch1".to_string()],
///     array![[1.0, 0.2], [0.1, 1.0]],
/// )
/// .unwrap();
///
/// let v = array![0.5, -0.3];
/// let c = matrix.to_channels(&v).unwrap();
/// let back = matrix.to_virtual(&c).unwrap();
/// for (a, b) in v.iter().zip(back.iter()) {
///     assert!((a - b).abs() < 1e-9);
/// }
/// ```
#[derive(Debug)]
pub struct GateMatrix {
    gates: Vec<String>,
    channels: Vec<String>,
    weights: Array2<f64>,
    inverse: Option<Array2<f64>>,
    fresh_inverse: bool,
}

impl GateMatrix {
    /// Builds a gate matrix from ordered gate names (rows), ordered channel
    /// names (columns) and the weight matrix.
    ///
    /// The pseudo-inverse is computed here, so a rank-deficient matrix fails
    /// construction with a configuration error.
    pub fn new(gates: Vec<String>, channels: Vec<String>, weights: Array2<f64>) -> Result<Self> {
        if weights.dim() != (gates.len(), channels.len()) {
            return Err(Error::Configuration(format!(
                "weight matrix shape {:?} does not match {} gates x {} channels",
                weights.dim(),
                gates.len(),
                channels.len()
            )));
        }
        if gates.is_empty() || channels.is_empty() {
            return Err(Error::Configuration(
                "gate matrix needs at least one gate and one channel".to_string(),
            ));
        }
        for list in [&gates, &channels] {
            for (i, name) in list.iter().enumerate() {
                if list[..i].contains(name) {
                    return Err(Error::Configuration(format!("duplicate name {}", name)));
                }
            }
        }
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(Error::Configuration(
                "weight matrix contains non-finite entries".to_string(),
            ));
        }
        let inverse = pseudo_inverse(&weights.t().to_owned())?;
        Ok(Self {
            gates,
            channels,
            weights,
            inverse: Some(inverse),
            fresh_inverse: true,
        })
    }

    pub fn gate_names(&self) -> &[String] {
        &self.gates
    }
    pub fn channel_names(&self) -> &[String] {
        &self.channels
    }
    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }

    /// Index of a virtual gate by name.
    pub fn gate_index(&self, gate: &str) -> Result<usize> {
        self.gates
            .iter()
            .position(|g| g == gate)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "virtual gate {} unknown; defined gates are {:?}",
                    gate, self.gates
                ))
            })
    }

    /// The channel-weight row of one virtual gate.
    pub fn gate_weights(&self, gate: &str) -> Result<Array1<f64>> {
        let idx = self.gate_index(gate)?;
        Ok(self.weights.row(idx).to_owned())
    }

    /// Forward map: virtual-gate values to channel values, `c = Wᵀ·v`.
    ///
    /// Results still have to pass the boundary guard before they are
    /// applicable to hardware; [`GateContext::channel_targets`] is the
    /// checked path.
    pub fn to_channels(&self, virtual_values: &Array1<f64>) -> Result<Array1<f64>> {
        if virtual_values.len() != self.gates.len() {
            return Err(Error::Configuration(format!(
                "expected {} virtual values, got {}",
                self.gates.len(),
                virtual_values.len()
            )));
        }
        Ok(self.weights.t().dot(virtual_values))
    }

    /// Inverse map: channel values to virtual-gate values via the cached
    /// pseudo-inverse. Used for read-back and consistency checks.
    pub fn to_virtual(&mut self, channel_values: &Array1<f64>) -> Result<Array1<f64>> {
        if channel_values.len() != self.channels.len() {
            return Err(Error::Configuration(format!(
                "expected {} channel values, got {}",
                self.channels.len(),
                channel_values.len()
            )));
        }
        Ok(self.inverse()?.dot(channel_values))
    }

    /// Updates one weight and invalidates the cached inverse; the next
    /// read-back recomputes it.
    pub fn set_matrix_entry(&mut self, gate: &str, channel: &str, weight: f64) -> Result<()> {
        if !weight.is_finite() {
            return Err(Error::Configuration(format!(
                "non-finite weight for ({}, {})",
                gate, channel
            )));
        }
        let row = self.gate_index(gate)?;
        let col = self
            .channels
            .iter()
            .position(|c| c == channel)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "channel {} not a matrix column; columns are {:?}",
                    channel, self.channels
                ))
            })?;
        self.weights[[row, col]] = weight;
        self.fresh_inverse = false;
        self.inverse = None;
        Ok(())
    }

    /// Cached pseudo-inverse of `Wᵀ`, recomputed lazily after an edit.
    fn inverse(&mut self) -> Result<&Array2<f64>> {
        if !self.fresh_inverse {
            let inv = pseudo_inverse(&self.weights.t().to_owned())?;
            self.inverse = Some(inv);
            self.fresh_inverse = true;
        }
        // fresh_inverse == true implies the cache is populated
        Ok(self.inverse.as_ref().unwrap())
    }
}

/// Session object binding a [`ChannelRegistry`] and a [`GateMatrix`].
///
/// All components operate through a `GateContext` passed by reference; there
/// is no process-wide singleton. Construction validates that every matrix
/// column names a registered channel.
pub struct GateContext {
    registry: ChannelRegistry,
    matrix: GateMatrix,
}

impl GateContext {
    pub fn new(registry: ChannelRegistry, matrix: GateMatrix) -> Result<Self> {
        for name in matrix.channel_names() {
            registry.chan(name).map_err(|_| {
                Error::Configuration(format!(
                    "matrix column {} is not a registered channel",
                    name
                ))
            })?;
        }
        Ok(Self { registry, matrix })
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }
    pub fn registry_(&mut self) -> &mut ChannelRegistry {
        &mut self.registry
    }
    pub fn matrix(&self) -> &GateMatrix {
        &self.matrix
    }
    pub fn matrix_(&mut self) -> &mut GateMatrix {
        &mut self.matrix
    }

    /// Hardware read-back of all matrix channels, in column order.
    pub fn channel_values(&self) -> Result<Array1<f64>> {
        self.registry.values(self.matrix.channel_names())
    }

    /// Hardware read-back of all virtual gates through the inverse map.
    pub fn virtual_values(&mut self) -> Result<Array1<f64>> {
        let c = self.channel_values()?;
        self.matrix.to_virtual(&c)
    }

    /// Derived current value of one virtual gate.
    pub fn virtual_value(&mut self, gate: &str) -> Result<f64> {
        let idx = self.matrix.gate_index(gate)?;
        Ok(self.virtual_values()?[idx])
    }

    /// Forward-maps a full virtual vector and guard-checks every resulting
    /// channel value. Violations aggregate; nothing is written.
    pub fn channel_targets(&self, virtual_values: &Array1<f64>) -> Result<Vec<(String, f64)>> {
        let c = self.matrix.to_channels(virtual_values)?;
        let targets: Vec<(String, f64)> = self
            .matrix
            .channel_names()
            .iter()
            .cloned()
            .zip(c.iter().copied())
            .collect();
        let mut pairs = Vec::with_capacity(targets.len());
        for (name, value) in &targets {
            pairs.push((self.registry.chan(name)?, *value));
        }
        BoundaryGuard::check_all(pairs)?;
        Ok(targets)
    }

    /// Applies a full virtual vector atomically: all channel targets are
    /// validated first, then committed.
    pub fn apply_virtual(&mut self, virtual_values: &Array1<f64>) -> Result<()> {
        let targets = self.channel_targets(virtual_values)?;
        self.registry.write_many(&targets)
    }

    /// Moves a single virtual gate, decoupling the others: the channel
    /// deltas are solved so every other gate's derived value is unchanged.
    /// All-or-nothing through the boundary guard.
    pub fn set_virtual(&mut self, gate: &str, value: f64) -> Result<()> {
        let c = self.channel_values()?;
        let mut v = self.matrix.to_virtual(&c)?;
        let idx = self.matrix.gate_index(gate)?;
        v[idx] = value;
        self.apply_virtual(&v)
    }
}
