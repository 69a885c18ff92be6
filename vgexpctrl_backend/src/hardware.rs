//! Hardware capability traits consumed by the scan executor, plus in-process
//! simulation drivers.
//!
//! Real AWG and digitizer drivers live outside the core and implement
//! [`AwgDevice`]/[`Digitizer`]; the simulation types here stand in for them
//! in tests and bring-up. [`SimAwg`] enforces the upload → arm → trigger
//! ordering and, when handed shared [`SoftChannel`] handles, leaves each
//! channel at the final value of its uploaded segment on trigger — the state
//! real hardware would be in once the sweep has run.

use ndarray::Array1;
use std::thread;
use std::time::Duration;

use vgcompiler_backend::channel::SoftChannel;
use vgcompiler_backend::error::{Error, Result};
use vgcompiler_backend::waveform::WaveformProgram;

/// Arbitrary-waveform-generator capability.
pub trait AwgDevice: Send {
    /// Uploads the synthesized program to the instrument.
    fn upload(&mut self, program: &WaveformProgram) -> Result<()>;
    /// Arms the instrument for the next trigger.
    fn arm(&mut self) -> Result<()>;
    /// Fires the master trigger.
    fn trigger(&mut self) -> Result<()>;
}

/// Acquisition capability. `acquire` may block until all samples arrived;
/// the executor wraps it in a worker thread and applies its own deadline.
pub trait Digitizer: Send {
    fn acquire(&mut self, sample_count: usize) -> Result<Array1<f64>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SimAwgState {
    Idle,
    Loaded,
    Armed,
    Triggered,
}

/// In-process [`AwgDevice`].
pub struct SimAwg {
    state: SimAwgState,
    /// Shared handles to the physical channels this AWG drives; on trigger
    /// each is set to the final value of its uploaded segment.
    channels: Vec<(String, SoftChannel)>,
    final_values: Vec<(String, f64)>,
    uploaded_samps: Option<usize>,
    fail_upload: bool,
}

impl SimAwg {
    pub fn new() -> Self {
        Self {
            state: SimAwgState::Idle,
            channels: Vec::new(),
            final_values: Vec::new(),
            uploaded_samps: None,
            fail_upload: false,
        }
    }

    /// Attaches shared channel handles so a trigger moves the simulated
    /// outputs like a real sweep would.
    pub fn with_channels(channels: Vec<(String, SoftChannel)>) -> Self {
        Self {
            channels,
            ..Self::new()
        }
    }

    /// Makes the next upload report a hardware fault.
    pub fn fail_upload(&mut self, fail: bool) {
        self.fail_upload = fail;
    }

    /// Sample count of the last uploaded program.
    pub fn uploaded_samps(&self) -> Option<usize> {
        self.uploaded_samps
    }
}

impl Default for SimAwg {
    fn default() -> Self {
        Self::new()
    }
}

impl AwgDevice for SimAwg {
    fn upload(&mut self, program: &WaveformProgram) -> Result<()> {
        if self.fail_upload {
            return Err(Error::HardwareFailure(
                "simulated upload fault".to_string(),
            ));
        }
        self.final_values = program
            .segments
            .iter()
            .map(|(name, seg)| (name.clone(), seg.final_value()))
            .collect();
        self.uploaded_samps = Some(program.total_samps());
        self.state = SimAwgState::Loaded;
        Ok(())
    }

    fn arm(&mut self) -> Result<()> {
        if self.state != SimAwgState::Loaded {
            return Err(Error::HardwareFailure(format!(
                "arm requested in state {:?}, expected Loaded",
                self.state
            )));
        }
        self.state = SimAwgState::Armed;
        Ok(())
    }

    fn trigger(&mut self) -> Result<()> {
        if self.state != SimAwgState::Armed {
            return Err(Error::HardwareFailure(format!(
                "trigger requested in state {:?}, expected Armed",
                self.state
            )));
        }
        for (name, value) in &self.final_values {
            if let Some((_, soft)) = self.channels.iter_mut().find(|(n, _)| n == name) {
                use vgcompiler_backend::channel::ChannelCapability;
                soft.set(*value)?;
            }
        }
        self.state = SimAwgState::Triggered;
        Ok(())
    }
}

/// In-process [`Digitizer`] generating deterministic samples, with
/// configurable latency and fault injection for timeout/failure tests.
pub struct SimDigitizer {
    delay: Duration,
    fault: Option<String>,
    gen: Box<dyn FnMut(usize) -> f64 + Send>,
}

impl SimDigitizer {
    /// Samples are the running sample index as a float.
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            fault: None,
            gen: Box::new(|i| i as f64),
        }
    }

    pub fn with_generator(gen: Box<dyn FnMut(usize) -> f64 + Send>) -> Self {
        Self {
            gen,
            ..Self::new()
        }
    }

    /// Blocks `acquire` for `delay` before returning samples.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Makes `acquire` report a hardware fault.
    pub fn faulty(mut self, message: &str) -> Self {
        self.fault = Some(message.to_string());
        self
    }
}

impl Default for SimDigitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Digitizer for SimDigitizer {
    fn acquire(&mut self, sample_count: usize) -> Result<Array1<f64>> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if let Some(message) = &self.fault {
            return Err(Error::HardwareFailure(message.clone()));
        }
        Ok(Array1::from_iter((0..sample_count).map(|i| (self.gen)(i))))
    }
}
