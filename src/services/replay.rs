//! Replay scheduler - time-driven playback of recorded simulation steps
//!
//! A run is created server-side; the scheduler owns its step queue and a
//! simulated clock advanced on a fixed tick. All steps whose time has been
//! reached are dispatched within the tick, in order, each exactly once.
//! Dispatch is fire-and-forget: a rejected step is reported but the clock
//! never rolls back.

use crate::domain::sim::{clamp_speed, RunPlan, RunState, SimulationStep};
use crate::io::backend::{BackendClient, BackendError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// External source of runs and sink for executed steps
#[async_trait]
pub trait ReplayBackend: Send + Sync {
    async fn create_run(&self, simulation_id: i64) -> Result<RunPlan, BackendError>;
    async fn dispatch_step(&self, run_id: i64, step: &SimulationStep)
        -> Result<(), BackendError>;
}

#[async_trait]
impl ReplayBackend for BackendClient {
    async fn create_run(&self, simulation_id: i64) -> Result<RunPlan, BackendError> {
        self.create_simulation_run(simulation_id).await
    }

    async fn dispatch_step(
        &self,
        run_id: i64,
        step: &SimulationStep,
    ) -> Result<(), BackendError> {
        BackendClient::dispatch_step(self, run_id, step).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

struct ReplayInner {
    state: RunState,
    run_id: Option<i64>,
    /// Simulated seconds since run start
    clock: f64,
    speed: f64,
    queue: VecDeque<SimulationStep>,
    ticker: Option<JoinHandle<()>>,
}

impl ReplayInner {
    fn cancel_ticker(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }
}

pub struct ReplayScheduler {
    inner: Arc<Mutex<ReplayInner>>,
    backend: Arc<dyn ReplayBackend>,
    tick_interval: Duration,
}

/// Advance the clock one tick and pull every step that became due, in
/// queue order. Transitions to Finished when the queue is empty after the
/// pull. Returns the steps to dispatch.
fn drain_due(inner: &mut ReplayInner, tick_interval: Duration) -> Vec<SimulationStep> {
    if inner.state != RunState::Running {
        return Vec::new();
    }

    inner.clock += inner.speed * tick_interval.as_millis() as f64 / 1000.0;

    let mut due = Vec::new();
    while inner.queue.front().is_some_and(|step| step.time <= inner.clock) {
        // Dequeued exactly once; never redispatched
        due.push(inner.queue.pop_front().expect("head checked"));
    }

    if inner.queue.is_empty() {
        inner.ticker = None;
        inner.state = RunState::Finished;
        info!(run_id = ?inner.run_id, clock = %inner.clock, "replay_finished");
    }

    due
}

impl ReplayScheduler {
    pub fn new(backend: Arc<dyn ReplayBackend>, tick_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ReplayInner {
                state: RunState::Stopped,
                run_id: None,
                clock: 0.0,
                speed: 1.0,
                queue: VecDeque::new(),
                ticker: None,
            })),
            backend,
            tick_interval,
        }
    }

    pub fn state(&self) -> RunState {
        self.inner.lock().state
    }

    pub fn speed(&self) -> f64 {
        self.inner.lock().speed
    }

    pub fn clock(&self) -> f64 {
        self.inner.lock().clock
    }

    pub fn run_id(&self) -> Option<i64> {
        self.inner.lock().run_id
    }

    pub fn remaining_steps(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Create a run for the simulation and begin playback.
    ///
    /// Only valid from Stopped; a Finished run must be stopped first. The
    /// clock starts one unit before the first step's time, so a step at 0
    /// is due on the first tick.
    pub async fn start(&self, simulation_id: i64) -> Result<i64, ReplayError> {
        {
            let inner = self.inner.lock();
            if inner.state != RunState::Stopped {
                return Err(ReplayError::InvalidState {
                    action: "start",
                    state: inner.state.as_str(),
                });
            }
        }

        let plan = self.backend.create_run(simulation_id).await?;
        let run_id = plan.run_id;

        {
            let mut inner = self.inner.lock();
            // A concurrent start may have raced us to the create call
            if inner.state != RunState::Stopped {
                return Err(ReplayError::InvalidState {
                    action: "start",
                    state: inner.state.as_str(),
                });
            }
            inner.run_id = Some(run_id);
            inner.queue = plan.steps.into();
            inner.clock = inner.queue.front().map_or(0.0, |step| step.time - 1.0);
            inner.state = RunState::Running;
            info!(
                run_id = %run_id,
                steps = %inner.queue.len(),
                clock = %inner.clock,
                "replay_started"
            );
        }

        self.arm_ticker();
        Ok(run_id)
    }

    /// Suspend playback; the clock and remaining queue are preserved
    pub fn pause(&self) -> Result<(), ReplayError> {
        let mut inner = self.inner.lock();
        if inner.state != RunState::Running {
            return Err(ReplayError::InvalidState {
                action: "pause",
                state: inner.state.as_str(),
            });
        }
        inner.cancel_ticker();
        inner.state = RunState::Paused;
        info!(run_id = ?inner.run_id, clock = %inner.clock, "replay_paused");
        Ok(())
    }

    /// Continue playback exactly where it left off; no time is caught up
    pub fn resume(&self) -> Result<(), ReplayError> {
        {
            let mut inner = self.inner.lock();
            if inner.state != RunState::Paused {
                return Err(ReplayError::InvalidState {
                    action: "resume",
                    state: inner.state.as_str(),
                });
            }
            inner.state = RunState::Running;
            info!(run_id = ?inner.run_id, clock = %inner.clock, "replay_resumed");
        }
        self.arm_ticker();
        Ok(())
    }

    /// Abandon the run: cancel the tick, discard the queue, clear the clock
    pub fn stop(&self) -> Result<(), ReplayError> {
        let mut inner = self.inner.lock();
        if inner.state == RunState::Stopped {
            return Err(ReplayError::InvalidState { action: "stop", state: "stopped" });
        }
        inner.cancel_ticker();
        let run_id = inner.run_id.take();
        inner.queue.clear();
        inner.clock = 0.0;
        inner.state = RunState::Stopped;
        info!(run_id = ?run_id, "replay_stopped");
        Ok(())
    }

    /// Clamp and set the speed multiplier; effective from the next tick
    pub fn set_speed(&self, multiplier: f64) -> f64 {
        let mut inner = self.inner.lock();
        inner.speed = clamp_speed(multiplier);
        debug!(speed = %inner.speed, "replay_speed_set");
        inner.speed
    }

    /// Double the speed, clamped to the maximum
    pub fn speed_up(&self) -> f64 {
        let current = self.speed();
        self.set_speed(current * 2.0)
    }

    /// Halve the speed, clamped to the minimum
    pub fn slow_down(&self) -> f64 {
        let current = self.speed();
        self.set_speed(current / 2.0)
    }

    /// Start the tick task, replacing any previous one
    fn arm_ticker(&self) {
        let inner_arc = self.inner.clone();
        let backend = self.backend.clone();
        let tick_interval = self.tick_interval;

        let mut inner = self.inner.lock();
        inner.cancel_ticker();
        inner.ticker = Some(tokio::spawn(async move {
            let mut timer = tokio::time::interval(tick_interval);
            // interval yields immediately; the first simulated tick must
            // come one full period after arming
            timer.tick().await;

            loop {
                timer.tick().await;

                let (due, run_id, finished) = {
                    let mut inner = inner_arc.lock();
                    let due = drain_due(&mut inner, tick_interval);
                    (due, inner.run_id, inner.state == RunState::Finished)
                };

                if let Some(run_id) = run_id {
                    for step in due {
                        // Dispatch without blocking the drain; the clock has
                        // already moved past the step and stays there even
                        // if the backend rejects it
                        let backend = backend.clone();
                        tokio::spawn(async move {
                            debug!(run_id = %run_id, time = %step.time, etype = %step.etype, "simstep_dispatched");
                            if let Err(e) = backend.dispatch_step(run_id, &step).await {
                                warn!(run_id = %run_id, time = %step.time, error = %e, "simstep_rejected");
                            }
                        });
                    }
                }

                if finished {
                    return;
                }
            }
        }));
    }
}
