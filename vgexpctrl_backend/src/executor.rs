//! Scan execution: the upload/arm/trigger/acquire state machine, the
//! session object callers interact with, safe-abort ramping, and
//! cancellation.
//!
//! [`ExperimentSession`] is the entry point. It owns the shared
//! [`GateContext`] behind a mutex plus the [`LeaseTable`], and exposes the
//! three core operations: interactive gate writes, scoped excursions, and
//! [`ExperimentSession::run_scan`]. A scan leases its channel set for the
//! whole run, so ad-hoc writes to those channels block until it finishes —
//! and vice versa.
//!
//! [`ScanExecutor`] walks Idle → Uploading → Armed → Running →
//! {Complete | Failed}. The blocking acquisition runs on a worker thread;
//! the executor waits on a crossbeam `select!` over the result channel, the
//! cancellation channel, and the deadline. Every failure path — timeout,
//! hardware fault, cancellation — runs the safe-abort ramp before the error
//! surfaces: channels are walked back to the last-known-safe virtual values
//! in small guard-checked steps, never jumped.

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use crossbeam::select;
use ndarray::{s, Array1};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use vgcompiler_backend::error::{Error, Result};
use vgcompiler_backend::matrix::GateContext;
use vgcompiler_backend::sweep::{SweepAxis, SweepPlan};
use vgcompiler_backend::timing::{TimingCompensator, TimingConfig};
use vgcompiler_backend::waveform::{SynthConfig, WaveformProgram, WaveformSynthesizer};

use crate::hardware::{AwgDevice, Digitizer};
use crate::lease::LeaseTable;
use crate::utils::TickTimer;

/// Scan life-cycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Uploading,
    Armed,
    Running,
    Complete,
    Failed,
}

/// Execution parameters of a single scan.
#[derive(Clone, Debug)]
pub struct ScanConfig {
    /// Deadline for the hardware to react to the master trigger.
    pub trigger_timeout: Duration,
    /// Deadline for the acquisition itself. The worker wait uses
    /// `trigger_timeout + acquire_timeout` since the digitizer's trigger
    /// wait happens inside its blocking `acquire`.
    pub acquire_timeout: Duration,
    /// Samples acquired per sweep point.
    pub samples_per_point: usize,
    /// Interpolation steps of the safe-abort ramp.
    pub abort_ramp_steps: usize,
    /// Settle pause between abort ramp steps.
    pub abort_step_settle: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            trigger_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(30),
            samples_per_point: 1,
            abort_ramp_steps: 16,
            abort_step_settle: Duration::from_millis(1),
        }
    }
}

/// Everything a scan needs: axes plus the synthesis, timing and execution
/// parameters.
#[derive(Clone, Debug)]
pub struct ScanRequest {
    pub axes: Vec<SweepAxis>,
    pub synth: SynthConfig,
    pub timing: TimingConfig,
    pub exec: ScanConfig,
}

/// Caller-side handle that cancels a running scan.
pub struct CancelToken {
    tx: Sender<()>,
}

impl CancelToken {
    pub fn cancel(&self) {
        // A full buffer means cancellation is already pending.
        let _ = self.tx.try_send(());
    }
}

/// Creates a cancellation token and the receiver handed to `run_scan`.
pub fn cancel_pair() -> (CancelToken, Receiver<()>) {
    let (tx, rx) = bounded(1);
    (CancelToken { tx }, rx)
}

/// Acquired measurement data indexed by virtual-gate coordinates.
#[derive(Debug)]
pub struct ScanData {
    gate_names: Vec<String>,
    coords: Vec<Vec<f64>>,
    samples: Vec<Array1<f64>>,
}

impl ScanData {
    /// Swept gate names, outermost axis first.
    pub fn gate_names(&self) -> &[String] {
        &self.gate_names
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Coordinate tuple and samples of one point.
    pub fn point(&self, idx: usize) -> (&[f64], &Array1<f64>) {
        (&self.coords[idx], &self.samples[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[f64], &Array1<f64>)> {
        self.coords
            .iter()
            .map(|c| c.as_slice())
            .zip(self.samples.iter())
    }
}

/// The upload/arm/trigger/acquire state machine.
pub struct ScanExecutor {
    state: ScanState,
    cfg: ScanConfig,
}

impl ScanExecutor {
    pub fn new(cfg: ScanConfig) -> Self {
        Self {
            state: ScanState::Idle,
            cfg,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    fn set_state(&mut self, next: ScanState) {
        log::info!("scan state: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Returns the executor to `Idle` after an abort completed.
    pub fn reset(&mut self) {
        self.set_state(ScanState::Idle);
    }

    /// Drives one scan to `Complete` or `Failed`. The caller performs the
    /// safe-abort ramp on failure; this method only guarantees the state
    /// transition and error surfacing.
    pub fn execute(
        &mut self,
        plan: &SweepPlan,
        program: &WaveformProgram,
        awg: &mut dyn AwgDevice,
        digitizer: Box<dyn Digitizer>,
        cancel: Option<&Receiver<()>>,
    ) -> Result<ScanData> {
        match self.run(plan, program, awg, digitizer, cancel) {
            Ok(data) => {
                self.set_state(ScanState::Complete);
                Ok(data)
            }
            Err(e) => {
                self.set_state(ScanState::Failed);
                Err(e)
            }
        }
    }

    fn run(
        &mut self,
        plan: &SweepPlan,
        program: &WaveformProgram,
        awg: &mut dyn AwgDevice,
        digitizer: Box<dyn Digitizer>,
        cancel: Option<&Receiver<()>>,
    ) -> Result<ScanData> {
        let mut timer = TickTimer::new();

        self.set_state(ScanState::Uploading);
        awg.upload(program)?;
        timer.tick_log("awg upload");

        self.set_state(ScanState::Armed);
        awg.arm()?;
        if cancel.map_or(false, |c| c.try_recv().is_ok()) {
            return Err(Error::Cancelled);
        }

        self.set_state(ScanState::Running);
        awg.trigger()?;
        timer.tick_log("arm + trigger");

        let spp = self.cfg.samples_per_point.max(1);
        let total = plan.len() * spp;
        let deadline = self.cfg.trigger_timeout + self.cfg.acquire_timeout;

        // The digitizer may block for the whole acquisition; run it on a
        // worker so timeout and cancellation stay responsive. On timeout the
        // worker is abandoned (it parks on the dead channel when it finally
        // returns).
        let (tx, rx) = bounded(1);
        let mut digitizer = digitizer;
        let worker = thread::spawn(move || {
            let _ = tx.send(digitizer.acquire(total));
        });

        let acquired: Result<Array1<f64>> = if let Some(cancel) = cancel {
            select! {
                recv(rx) -> msg => msg.unwrap_or_else(|_| {
                    Err(Error::HardwareFailure(
                        "acquisition worker disconnected".to_string(),
                    ))
                }),
                recv(cancel) -> _ => Err(Error::Cancelled),
                default(deadline) => Err(Error::HardwareTimeout {
                    phase: "acquire",
                    timeout: deadline,
                }),
            }
        } else {
            match rx.recv_timeout(deadline) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => Err(Error::HardwareTimeout {
                    phase: "acquire",
                    timeout: deadline,
                }),
                Err(RecvTimeoutError::Disconnected) => Err(Error::HardwareFailure(
                    "acquisition worker disconnected".to_string(),
                )),
            }
        };
        drop(worker);
        let samples = acquired?;
        timer.tick_log("acquisition");

        if samples.len() != total {
            return Err(Error::HardwareFailure(format!(
                "digitizer returned {} of {} samples",
                samples.len(),
                total
            )));
        }

        let per_point = (0..plan.len())
            .map(|k| samples.slice(s![k * spp..(k + 1) * spp]).to_owned())
            .collect();
        Ok(ScanData {
            gate_names: plan.gate_names(),
            coords: plan.coords().to_vec(),
            samples: per_point,
        })
    }
}

/// Shared session binding the gate context to the leasing and execution
/// machinery. Clones share state.
#[derive(Clone)]
pub struct ExperimentSession {
    ctx: Arc<Mutex<GateContext>>,
    leases: Arc<LeaseTable>,
}

impl ExperimentSession {
    pub fn new(ctx: GateContext) -> Self {
        Self {
            ctx: Arc::new(Mutex::new(ctx)),
            leases: Arc::new(LeaseTable::new()),
        }
    }

    /// Shared handle to the gate context (read-back, inspection).
    pub fn context(&self) -> Arc<Mutex<GateContext>> {
        self.ctx.clone()
    }

    pub fn leases(&self) -> &LeaseTable {
        &self.leases
    }

    /// The physical channel set governed by the gate matrix.
    pub fn channel_set(&self) -> Vec<String> {
        self.ctx.lock().matrix().channel_names().to_vec()
    }

    /// Interactive single-gate write; leases the channel set so it mutually
    /// excludes with any scan on the same channels.
    pub fn set_virtual_gate(&self, gate: &str, value: f64) -> Result<()> {
        let names = self.channel_set();
        let _lease = self.leases.acquire(&names);
        self.ctx.lock().set_virtual(gate, value)
    }

    /// Current derived value of one virtual gate.
    pub fn virtual_value(&self, gate: &str) -> Result<f64> {
        self.ctx.lock().virtual_value(gate)
    }

    /// Runs `body` inside a scoped excursion over `gates`. The captured
    /// values are restored on every exit path: normal return, an error
    /// propagated out of `body`, or a panic unwinding through it.
    pub fn with_excursion<R>(
        &self,
        gates: &[&str],
        body: impl FnOnce(&mut GateContext) -> Result<R>,
    ) -> Result<R> {
        let names = self.channel_set();
        let _lease = self.leases.acquire(&names);
        let mut ctx = self.ctx.lock();
        let mut excursion = ctx.excursion(gates)?;
        match body(&mut excursion) {
            Ok(value) => {
                excursion.end()?;
                Ok(value)
            }
            // The guard's Drop restores on the error path.
            Err(e) => Err(e),
        }
    }

    /// Plans, synthesizes, compensates and executes a scan, returning the
    /// dataset mapping each virtual-gate coordinate to its samples.
    ///
    /// Any failure state reached by the executor — upload fault, trigger
    /// fault, acquisition timeout, cancellation — first ramps all channels
    /// back to the last-known-safe virtual values, then surfaces the error.
    pub fn run_scan(
        &self,
        req: &ScanRequest,
        awg: &mut dyn AwgDevice,
        digitizer: Box<dyn Digitizer>,
        cancel: Option<Receiver<()>>,
    ) -> Result<ScanData> {
        let plan = SweepPlan::new(req.axes.clone())?;
        let names = self.channel_set();
        let _lease = self.leases.acquire(&names);

        // Synthesis and the safe-value snapshot hold the context lock;
        // the hardware phase below runs without it (the AWG owns the
        // channels while the scan runs).
        let (program, safe_virtual) = {
            let mut ctx = self.ctx.lock();
            let synthesizer = WaveformSynthesizer::new(req.synth.clone());
            let mut program = synthesizer.synthesize(&plan, &mut ctx)?;
            TimingCompensator::new(req.timing).compensate(&mut program)?;
            let safe_virtual = ctx.virtual_values()?;
            (program, safe_virtual)
        };

        let mut executor = ScanExecutor::new(req.exec.clone());
        match executor.execute(&plan, &program, awg, digitizer, cancel.as_ref()) {
            Ok(data) => Ok(data),
            Err(e) => {
                log::warn!("scan failed ({}); ramping channels to safe values", e);
                self.safe_abort(&safe_virtual, &req.exec);
                executor.reset();
                Err(e)
            }
        }
    }

    /// Ramps all matrix channels from their current values back to `safe`
    /// in small interpolated steps. Both endpoints were guard-validated, so
    /// every intermediate point is in bounds too; step failures are logged
    /// and the ramp continues toward safety.
    fn safe_abort(&self, safe: &Array1<f64>, cfg: &ScanConfig) {
        let mut ctx = self.ctx.lock();
        let current = match ctx.virtual_values() {
            Ok(v) => v,
            Err(e) => {
                log::error!("safe-abort read-back failed ({}); jumping to safe values", e);
                if let Err(e) = ctx.apply_virtual(safe) {
                    log::error!("safe-abort write failed: {}", e);
                }
                return;
            }
        };
        let steps = cfg.abort_ramp_steps.max(1);
        for i in 1..=steps {
            let frac = i as f64 / steps as f64;
            let target = &current + &((safe - &current) * frac);
            if let Err(e) = ctx.apply_virtual(&target) {
                log::error!("safe-abort ramp step {} failed: {}", i, e);
            }
            if i != steps {
                thread::sleep(cfg.abort_step_settle);
            }
        }
        log::info!("safe-abort ramp finished after {} steps", steps);
    }
}
