//! Physical channels, the channel registry, and the boundary guard.
//!
//! A [`Channel`] pairs a named hardware output with the inclusive safety
//! bounds and unit it was registered with. Channels are owned by a
//! [`ChannelRegistry`] and are only ever mutated through guard-checked write
//! paths: every value headed for hardware first passes
//! [`BoundaryGuard::check`], whether it originates from an interactive gate
//! write, the gate matrix, or the waveform synthesizer.
//!
//! The hardware itself sits behind the minimal [`ChannelCapability`] trait so
//! that vendor drivers stay outside this crate. [`SoftChannel`] is the
//! in-memory implementation used by tests and simulation.
//!
//! ## Channel naming
//!
//! Physical channel identifiers follow the `instrument/chN` or
//! `instrument/mkN` form (e.g. `awg1/ch0`, `awg1/mk1`). `ch` lines are analog
//! outputs; `mk` lines are marker-capable digital outputs used for trigger
//! and marker events. Capability is derived from the name form, the same way
//! NI-style `port0/line4` names encode port and line.

use indexmap::IndexMap;
use ndarray::Array1;
use regex::Regex;
use std::sync::{Arc, Mutex};

use crate::error::{BoundaryBreach, Error, Result};

/// Regular expression for valid physical channel identifiers.
pub const CHAN_NAME_PATTERN: &str = r"^[A-Za-z][A-Za-z0-9_]*/(ch|mk)[0-9]+$";

/// Returns `true` if `name` is a well-formed physical channel identifier.
pub fn valid_chan_name(name: &str) -> bool {
    Regex::new(CHAN_NAME_PATTERN).unwrap().is_match(name)
}

/// Returns `true` if `name` denotes a marker-capable (`mk`) line.
///
/// # Examples
///
/// ```
/// use vgcompiler_backend::channel::marker_capable;
///
/// assert!(marker_capable("awg1/mk0"));
/// assert!(!marker_capable("awg1/ch0"));
/// ```
pub fn marker_capable(name: &str) -> bool {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_]*/mk[0-9]+$")
        .unwrap()
        .is_match(name)
}

/// Minimal capability interface a hardware channel driver must provide.
///
/// Instrument drivers implement this outside the core; the core never talks
/// to vendor protocols directly.
pub trait ChannelCapability: Send {
    /// Reads the current output value.
    fn get(&self) -> Result<f64>;
    /// Commands a new output value. Callers must have guard-checked `value`.
    fn set(&mut self, value: f64) -> Result<()>;
    /// Hardware output limits, `(min, max)` inclusive.
    fn bounds(&self) -> (f64, f64);
}

#[derive(Debug)]
struct SoftChannelInner {
    value: f64,
    fail_writes: bool,
}

/// In-memory [`ChannelCapability`] used by tests and simulation.
///
/// Clones share state, so a test can keep a handle to a channel it has
/// registered and observe (or fault-inject) writes made through the registry.
#[derive(Clone, Debug)]
pub struct SoftChannel {
    inner: Arc<Mutex<SoftChannelInner>>,
    min: f64,
    max: f64,
}

impl SoftChannel {
    pub fn new(value: f64, min: f64, max: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SoftChannelInner {
                value,
                fail_writes: false,
            })),
            min,
            max,
        }
    }

    /// Makes every subsequent `set` report a hardware fault.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_writes = fail;
    }

    /// Reads the stored value directly, bypassing the registry.
    pub fn raw_value(&self) -> f64 {
        self.inner.lock().unwrap().value
    }
}

impl ChannelCapability for SoftChannel {
    fn get(&self) -> Result<f64> {
        Ok(self.inner.lock().unwrap().value)
    }

    fn set(&mut self, value: f64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_writes {
            return Err(Error::HardwareFailure(format!(
                "injected write fault (value {})",
                value
            )));
        }
        inner.value = value;
        Ok(())
    }

    fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }
}

/// A registered physical output: name, unit, registered `[min, max]` bounds,
/// and the hardware handle behind it.
///
/// Registered bounds may narrow, but never widen, the hardware bounds.
pub struct Channel {
    name: String,
    unit: String,
    min: f64,
    max: f64,
    hw: Box<dyn ChannelCapability>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("unit", &self.unit)
            .field("min", &self.min)
            .field("max", &self.max)
            .finish_non_exhaustive()
    }
}

impl Channel {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn unit(&self) -> &str {
        &self.unit
    }
    /// Registered safety bounds, `(min, max)` inclusive.
    pub fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }
    /// Current hardware value.
    pub fn value(&self) -> Result<f64> {
        self.hw.get()
    }

    /// Writes straight to hardware. Callers must have guard-checked `value`;
    /// the registry's `write`/`write_many` are the public paths.
    fn set_unchecked(&mut self, value: f64) -> Result<()> {
        self.hw.set(value)
    }
}

/// Validates proposed physical values against registered bounds.
///
/// Comparison is exact and inclusive; out-of-range values are rejected, never
/// clamped.
pub struct BoundaryGuard;

impl BoundaryGuard {
    /// Returns `value` unchanged, or a [`Error::BoundaryViolation`] naming
    /// the channel.
    pub fn check(chan: &Channel, value: f64) -> Result<f64> {
        match Self::breach(chan, value) {
            None => Ok(value),
            Some(breach) => Err(Error::BoundaryViolation(vec![breach])),
        }
    }

    /// Checks every `(channel, value)` pair and aggregates all violations
    /// into a single error. Nothing is mutated.
    pub fn check_all<'a, I>(pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a Channel, f64)>,
    {
        let breaches: Vec<BoundaryBreach> = pairs
            .into_iter()
            .filter_map(|(chan, value)| Self::breach(chan, value))
            .collect();
        if breaches.is_empty() {
            Ok(())
        } else {
            Err(Error::BoundaryViolation(breaches))
        }
    }

    /// Returns the breach record for an out-of-bounds `value`, or `None`.
    pub fn breach(chan: &Channel, value: f64) -> Option<BoundaryBreach> {
        let (min, max) = chan.bounds();
        if !value.is_finite() || value < min || value > max {
            Some(BoundaryBreach {
                channel: chan.name().to_string(),
                value,
                min,
                max,
            })
        } else {
            None
        }
    }
}

/// Ordered collection of named physical channels.
///
/// Registration order is preserved: the gate matrix refers to channels by
/// name, and bulk reads and waveform synthesis iterate in a stable order.
///
/// # Examples
///
/// ```
/// use vgcompiler_backend::channel::{ChannelRegistry, SoftChannel};
///
/// let mut reg = ChannelRegistry::new();
/// reg.register("awg1/ch0", (-2.0, 2.0), "V", Box::new(SoftChannel::new(0.0, -4.0, 4.0)))
///     .unwrap();
/// reg.write("awg1/ch0", 1.5).unwrap();
/// assert_eq!(reg.chan("awg1/ch0").unwrap().value().unwrap(), 1.5);
/// // Out-of-bounds writes are rejected, never clamped:
/// assert!(reg.write("awg1/ch0", 3.0).is_err());
/// ```
pub struct ChannelRegistry {
    channels: IndexMap<String, Channel>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            channels: IndexMap::new(),
        }
    }

    pub fn channels(&self) -> &IndexMap<String, Channel> {
        &self.channels
    }

    /// Registers a channel under `name` with the given safety bounds and
    /// unit.
    ///
    /// Fails with a configuration error on a duplicate or malformed name, or
    /// when the requested bounds are not contained in the hardware bounds.
    pub fn register(
        &mut self,
        name: &str,
        bounds: (f64, f64),
        unit: &str,
        hw: Box<dyn ChannelCapability>,
    ) -> Result<()> {
        if !valid_chan_name(name) {
            return Err(Error::Configuration(format!(
                "channel name {:?} does not match {}",
                name, CHAN_NAME_PATTERN
            )));
        }
        if self.channels.contains_key(name) {
            return Err(Error::Configuration(format!(
                "channel {} already registered; registered channels are {:?}",
                name,
                self.channels.keys().collect::<Vec<_>>()
            )));
        }
        let (min, max) = bounds;
        if !(min.is_finite() && max.is_finite() && min < max) {
            return Err(Error::Configuration(format!(
                "invalid bounds [{}, {}] for channel {}",
                min, max, name
            )));
        }
        let (hw_min, hw_max) = hw.bounds();
        if min < hw_min || max > hw_max {
            return Err(Error::Configuration(format!(
                "bounds [{}, {}] for channel {} exceed hardware bounds [{}, {}]",
                min, max, name, hw_min, hw_max
            )));
        }
        self.channels.insert(
            name.to_string(),
            Channel {
                name: name.to_string(),
                unit: unit.to_string(),
                min,
                max,
                hw,
            },
        );
        Ok(())
    }

    /// Shortcut to borrow a channel by name.
    pub fn chan(&self, name: &str) -> Result<&Channel> {
        self.channels.get(name).ok_or_else(|| self.not_found(name))
    }

    /// Shortcut to mutably borrow a channel by name.
    pub fn chan_(&mut self, name: &str) -> Result<&mut Channel> {
        if !self.channels.contains_key(name) {
            return Err(self.not_found(name));
        }
        Ok(self.channels.get_mut(name).unwrap())
    }

    fn not_found(&self, name: &str) -> Error {
        Error::NotFound(format!(
            "channel {} not registered; registered channels are {:?}",
            name,
            self.channels.keys().collect::<Vec<_>>()
        ))
    }

    /// Reads the named channels in order.
    pub fn values(&self, names: &[String]) -> Result<Array1<f64>> {
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            out.push(self.chan(name)?.value()?);
        }
        Ok(Array1::from_vec(out))
    }

    /// Guard-checked single write.
    pub fn write(&mut self, name: &str, value: f64) -> Result<()> {
        BoundaryGuard::check(self.chan(name)?, value)?;
        self.chan_(name)?.set_unchecked(value)
    }

    /// Guard-checked bulk write: every target is validated before any
    /// channel is touched, so an out-of-bounds target leaves all channels
    /// unchanged.
    pub fn write_many(&mut self, targets: &[(String, f64)]) -> Result<()> {
        let mut pairs = Vec::with_capacity(targets.len());
        for (name, value) in targets {
            pairs.push((self.chan(name)?, *value));
        }
        BoundaryGuard::check_all(pairs)?;
        for (name, value) in targets {
            self.chan_(name)?.set_unchecked(*value)?;
        }
        Ok(())
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
