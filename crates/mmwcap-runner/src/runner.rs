//! Capture session lifecycle.
//!
//! A [`Runner`] owns one lane per enabled transport. Each lane pairs a
//! reassembler with the controller that arms and disarms the hardware
//! feeding it, and runs on its own OS thread while the session is running.
//!
//! ```text
//! Uninitialized --initialize--> Initialized --start--> Running --stop--> Stopped
//! ```
//!
//! `Stopped` is terminal. Shutdown is cooperative: a worker notices the stop
//! flag between units of work, and every unit is a single transport read
//! (one datagram, or one serial read feeding the message buffer). So
//! [`Runner::stop`] returns within the longest transport receive timeout;
//! the serial message timeout does not extend it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mmwcap_config::SessionConfig;
use mmwcap_frame::{
    AssemblerCounters, AssemblerStats, DetectedPointTable, FrameAssembler, LatestSlot,
    SampleCube, SerialCounters, SerialStats, SlotStats, TlvSynchronizer,
};
use mmwcap_transport::{ByteSource, DatagramSource};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::controller::Controller;
use crate::error::{Result, RunnerError};
use crate::worker::{run_worker, Reassembler, WorkerExit};

/// Lifecycle state of a [`Runner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunnerState::Uninitialized => "uninitialized",
            RunnerState::Initialized => "initialized",
            RunnerState::Running => "running",
            RunnerState::Stopped => "stopped",
        })
    }
}

enum LaneKind {
    Adc {
        slot: Arc<LatestSlot<SampleCube>>,
        counters: Arc<AssemblerCounters>,
    },
    Serial {
        slot: Arc<LatestSlot<DetectedPointTable>>,
        counters: Arc<SerialCounters>,
    },
}

/// One capture path: a reassembler, its output slot and an optional
/// hardware controller.
pub struct Lane {
    name: &'static str,
    kind: LaneKind,
    reassembler: Box<dyn Reassembler>,
    controller: Option<Box<dyn Controller>>,
}

impl Lane {
    /// ADC lane fed by the capture board's data stream.
    pub fn adc<S: DatagramSource + 'static>(assembler: FrameAssembler<S>) -> Self {
        let kind = LaneKind::Adc {
            slot: assembler.slot(),
            counters: assembler.counters(),
        };
        Self::new(kind, Box::new(assembler))
    }

    /// Telemetry lane fed by the sensor's serial data port.
    pub fn serial<S: ByteSource + 'static>(synchronizer: TlvSynchronizer<S>) -> Self {
        let kind = LaneKind::Serial {
            slot: synchronizer.slot(),
            counters: synchronizer.counters(),
        };
        Self::new(kind, Box::new(synchronizer))
    }

    fn new(kind: LaneKind, reassembler: Box<dyn Reassembler>) -> Self {
        Self {
            name: reassembler.lane(),
            kind,
            reassembler,
            controller: None,
        }
    }

    /// Arm `controller` before the worker starts and disarm it after it stops.
    pub fn with_controller(mut self, controller: impl Controller + 'static) -> Self {
        self.controller = Some(Box::new(controller));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lane")
            .field("name", &self.name)
            .field("controller", &self.controller.as_ref().map(|c| c.name().to_string()))
            .finish()
    }
}

type WorkerOutput = Option<(Box<dyn Reassembler>, WorkerExit)>;

enum Worker {
    Idle(Box<dyn Reassembler>),
    Running {
        stop: Arc<AtomicBool>,
        handle: JoinHandle<WorkerOutput>,
    },
    /// The worker panicked and took its reassembler with it.
    Lost,
}

struct LaneEntry {
    name: &'static str,
    kind: LaneKind,
    controller: Option<Box<dyn Controller>>,
    armed: bool,
    worker: Worker,
    last_exit: Option<WorkerExit>,
}

impl LaneEntry {
    fn from_lane(lane: Lane) -> Self {
        Self {
            name: lane.name,
            kind: lane.kind,
            controller: lane.controller,
            armed: false,
            worker: Worker::Idle(lane.reassembler),
            last_exit: None,
        }
    }

    /// Prepare, arm and spawn. On failure the lane is left idle and disarmed.
    fn start(&mut self) -> Result<()> {
        let mut reassembler = match std::mem::replace(&mut self.worker, Worker::Lost) {
            Worker::Idle(reassembler) => reassembler,
            running @ Worker::Running { .. } => {
                self.worker = running;
                return Ok(());
            }
            Worker::Lost => {
                return Err(RunnerError::InvalidLanes(format!(
                    "{} lane lost its worker",
                    self.name
                )))
            }
        };

        if let Err(err) = reassembler.prepare() {
            self.worker = Worker::Idle(reassembler);
            return Err(err.into());
        }
        if let Some(controller) = self.controller.as_mut() {
            if let Err(err) = controller.arm() {
                self.worker = Worker::Idle(reassembler);
                return Err(err);
            }
            self.armed = true;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let cell = Arc::new(Mutex::new(Some(reassembler)));
        let spawned = thread::Builder::new()
            .name(format!("mmwcap-{}", self.name))
            .spawn({
                let stop = Arc::clone(&stop);
                let cell = Arc::clone(&cell);
                move || -> WorkerOutput {
                    let mut reassembler =
                        cell.lock().unwrap_or_else(PoisonError::into_inner).take()?;
                    let exit = run_worker(reassembler.as_mut(), &stop);
                    Some((reassembler, exit))
                }
            });

        match spawned {
            Ok(handle) => {
                self.last_exit = None;
                self.worker = Worker::Running { stop, handle };
                debug!(lane = self.name, "worker spawned");
                Ok(())
            }
            Err(source) => {
                if let Some(reassembler) = cell.lock().unwrap_or_else(PoisonError::into_inner).take()
                {
                    self.worker = Worker::Idle(reassembler);
                }
                if let Err(err) = self.disarm() {
                    warn!(lane = self.name, error = %err, "disarm after failed spawn");
                }
                Err(RunnerError::Spawn {
                    lane: self.name,
                    source,
                })
            }
        }
    }

    fn signal_stop(&self) {
        if let Worker::Running { stop, .. } = &self.worker {
            stop.store(true, Ordering::Release);
        }
    }

    fn join(&mut self) {
        match std::mem::replace(&mut self.worker, Worker::Lost) {
            Worker::Running { handle, .. } => match handle.join() {
                Ok(Some((reassembler, exit))) => {
                    self.last_exit = Some(exit);
                    self.worker = Worker::Idle(reassembler);
                }
                Ok(None) => {
                    error!(lane = self.name, "worker started without a reassembler");
                }
                Err(_) => {
                    error!(lane = self.name, "worker panicked");
                    self.last_exit = Some(WorkerExit::Failed("worker panicked".to_string()));
                }
            },
            other => self.worker = other,
        }
    }

    fn disarm(&mut self) -> Result<()> {
        if !self.armed {
            return Ok(());
        }
        self.armed = false;
        match self.controller.as_mut() {
            Some(controller) => controller.disarm(),
            None => Ok(()),
        }
    }

    fn is_running(&self) -> bool {
        match &self.worker {
            Worker::Running { handle, .. } => !handle.is_finished(),
            _ => false,
        }
    }

    fn status(&self) -> LaneStatus {
        let stats = match &self.kind {
            LaneKind::Adc { slot, counters } => LaneStats::Adc {
                assembler: counters.snapshot(),
                slot: slot.stats(),
            },
            LaneKind::Serial { slot, counters } => LaneStats::Serial {
                synchronizer: counters.snapshot(),
                slot: slot.stats(),
            },
        };
        LaneStatus {
            name: self.name,
            running: self.is_running(),
            exit: self.last_exit.clone(),
            stats,
        }
    }
}

/// Per-lane counters in a [`RunnerStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LaneStats {
    Adc {
        assembler: AssemblerStats,
        slot: SlotStats,
    },
    Serial {
        synchronizer: SerialStats,
        slot: SlotStats,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaneStatus {
    pub name: &'static str,
    /// The worker thread is alive.
    pub running: bool,
    /// How the last worker run ended, once it has been joined.
    pub exit: Option<WorkerExit>,
    pub stats: LaneStats,
}

/// Point-in-time view of a [`Runner`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunnerStatus {
    pub state: RunnerState,
    pub lanes: Vec<LaneStatus>,
}

struct Inner {
    state: RunnerState,
    lanes: Vec<LaneEntry>,
    sensor: Option<Box<dyn Controller>>,
    sensor_armed: bool,
}

/// Orchestrates a capture session.
///
/// All methods take `&self`; a runner can be shared behind an `Arc` so that
/// a signal handler may call [`Runner::stop`] while another thread consumes
/// frames.
pub struct Runner {
    inner: Mutex<Inner>,
}

impl Runner {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RunnerState::Uninitialized,
                lanes: Vec::new(),
                sensor: None,
                sensor_armed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> RunnerState {
        self.lock().state
    }

    /// Open the hardware described by `config` and adopt its lanes.
    ///
    /// On failure nothing is kept open and the runner stays uninitialized.
    pub fn initialize(&self, config: &SessionConfig) -> Result<()> {
        let state = self.state();
        if state != RunnerState::Uninitialized {
            return Err(RunnerError::InvalidState {
                operation: "initialize",
                state,
            });
        }
        let session = crate::hardware::open_session(config)?;
        self.initialize_with(session.lanes, session.sensor)
    }

    /// Adopt pre-built lanes and an optional sensor controller.
    ///
    /// The sensor is armed after every lane is running and disarmed before
    /// any lane is.
    pub fn initialize_with(
        &self,
        lanes: Vec<Lane>,
        sensor: Option<Box<dyn Controller>>,
    ) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != RunnerState::Uninitialized {
            return Err(RunnerError::InvalidState {
                operation: "initialize",
                state: inner.state,
            });
        }
        if lanes.is_empty() {
            return Err(RunnerError::InvalidLanes("no lanes enabled".to_string()));
        }
        for (i, lane) in lanes.iter().enumerate() {
            if lanes[..i].iter().any(|other| other.name == lane.name) {
                return Err(RunnerError::InvalidLanes(format!(
                    "duplicate {} lane",
                    lane.name
                )));
            }
        }

        let names: Vec<&'static str> = lanes.iter().map(Lane::name).collect();
        inner.lanes = lanes.into_iter().map(LaneEntry::from_lane).collect();
        inner.sensor = sensor;
        inner.state = RunnerState::Initialized;
        info!(lanes = ?names, "runner initialized");
        Ok(())
    }

    /// Arm every lane and start its worker, then arm the sensor.
    ///
    /// Calling `start` on a running session does nothing. If any step fails,
    /// lanes started by this call are stopped and disarmed again and the
    /// runner stays initialized.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            RunnerState::Initialized => {}
            RunnerState::Running => return Ok(()),
            state => {
                return Err(RunnerError::InvalidState {
                    operation: "start",
                    state,
                })
            }
        }

        let mut started = Vec::new();
        if let Err(err) = start_all(&mut inner, &mut started) {
            error!(error = %err, "start failed; rolling back");
            for &i in &started {
                inner.lanes[i].signal_stop();
            }
            for &i in &started {
                let lane = &mut inner.lanes[i];
                lane.join();
                if let Err(disarm_err) = lane.disarm() {
                    warn!(lane = lane.name, error = %disarm_err, "disarm during rollback");
                }
            }
            return Err(err);
        }

        inner.state = RunnerState::Running;
        info!(lanes = started.len(), "runner started");
        Ok(())
    }

    /// Stop every worker, then disarm the sensor and the lanes.
    ///
    /// Idempotent and callable from any thread. Returns the first disarm
    /// error, after attempting every disarm.
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state == RunnerState::Stopped {
            return Ok(());
        }

        for lane in &inner.lanes {
            lane.signal_stop();
        }
        for lane in &mut inner.lanes {
            lane.join();
        }

        let mut first_err = None;
        if inner.sensor_armed {
            inner.sensor_armed = false;
            if let Some(sensor) = inner.sensor.as_mut() {
                if let Err(err) = sensor.disarm() {
                    warn!(controller = sensor.name(), error = %err, "disarm failed");
                    first_err.get_or_insert(err);
                }
            }
        }
        for lane in &mut inner.lanes {
            if let Err(err) = lane.disarm() {
                warn!(lane = lane.name, error = %err, "disarm failed");
                first_err.get_or_insert(err);
            }
        }

        inner.state = RunnerState::Stopped;
        info!("runner stopped");
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Wait up to `timeout` for a cube not yet returned by this call.
    ///
    /// Returns `None` at once if no ADC lane is configured.
    pub fn get_next_adc_cube(&self, timeout: Duration) -> Option<Arc<SampleCube>> {
        self.adc_slot()?.wait_fresh(timeout)
    }

    /// Wait up to `timeout` for a point table not yet returned by this call.
    ///
    /// Returns `None` at once if no serial lane is configured.
    pub fn get_next_detected_points(&self, timeout: Duration) -> Option<Arc<DetectedPointTable>> {
        self.point_slot()?.wait_fresh(timeout)
    }

    pub fn adc_slot(&self) -> Option<Arc<LatestSlot<SampleCube>>> {
        self.lock().lanes.iter().find_map(|lane| match &lane.kind {
            LaneKind::Adc { slot, .. } => Some(Arc::clone(slot)),
            LaneKind::Serial { .. } => None,
        })
    }

    pub fn point_slot(&self) -> Option<Arc<LatestSlot<DetectedPointTable>>> {
        self.lock().lanes.iter().find_map(|lane| match &lane.kind {
            LaneKind::Serial { slot, .. } => Some(Arc::clone(slot)),
            LaneKind::Adc { .. } => None,
        })
    }

    pub fn status(&self) -> RunnerStatus {
        let inner = self.lock();
        RunnerStatus {
            state: inner.state,
            lanes: inner.lanes.iter().map(LaneEntry::status).collect(),
        }
    }
}

fn start_all(inner: &mut Inner, started: &mut Vec<usize>) -> Result<()> {
    for (i, lane) in inner.lanes.iter_mut().enumerate() {
        if lane.is_running() {
            continue;
        }
        lane.start()?;
        started.push(i);
    }
    if let Some(sensor) = inner.sensor.as_mut() {
        sensor.arm()?;
        inner.sensor_armed = true;
    }
    Ok(())
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(error = %err, "stop on drop failed");
        }
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        let lanes: Vec<&str> = inner.lanes.iter().map(|lane| lane.name).collect();
        f.debug_struct("Runner")
            .field("state", &inner.state)
            .field("lanes", &lanes)
            .finish()
    }
}
