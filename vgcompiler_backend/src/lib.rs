//! Virtual-gate mapping and sweep-waveform synthesis for multi-channel
//! analog instrumentation.
//!
//! This crate is the compilation half of the backend: it lets an
//! experimenter operate on physics-meaningful *virtual gates* while a linear
//! [`GateMatrix`] maps them onto physical output channels, and it turns
//! multi-dimensional [`SweepPlan`]s into guard-checked, trigger-annotated
//! [`WaveformProgram`]s. Nothing here spawns threads or talks to vendor
//! drivers; hardware sits behind the [`ChannelCapability`] trait and scan
//! execution lives in the companion `vgexpctrl_backend` crate.
//!
//! The pipeline: [`SweepPlan`] → [`WaveformSynthesizer`] (consulting
//! [`GateMatrix`] and [`BoundaryGuard`]) → [`TimingCompensator`] → an
//! executor driving the AWG/digitizer collaborators.

pub mod channel;
pub mod error;
pub mod excursion;
pub mod matrix;
pub mod sweep;
pub mod timing;
pub mod utils;
pub mod waveform;

pub use channel::*;
pub use error::*;
pub use excursion::*;
pub use matrix::*;
pub use sweep::*;
pub use timing::*;
pub use waveform::*;
