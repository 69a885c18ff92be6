//! Scan execution on top of `vgcompiler_backend`.
//!
//! The compiler crate plans sweeps and synthesizes waveform programs; this
//! crate runs them. [`ExperimentSession`] wraps a shared [`GateContext`]
//! with channel-set leasing and drives the [`ScanExecutor`] state machine
//! against [`AwgDevice`]/[`Digitizer`] collaborators. Simulation drivers
//! ([`SimAwg`], [`SimDigitizer`]) let the full pipeline run without
//! instruments attached.
//!
//! [`GateContext`]: vgcompiler_backend::matrix::GateContext

pub mod executor;
pub mod hardware;
pub mod lease;
pub mod utils;

pub use executor::*;
pub use hardware::*;
pub use lease::*;
