//! Simulation playback types
//!
//! A simulation is a recorded, time-ordered sequence of steps. One playback
//! of it is a run, created server-side; the scheduler owns the step queue
//! for the run's lifetime.

use serde::{Deserialize, Serialize};

/// Slowest supported playback speed
pub const SPEED_MIN: f64 = 0.125;
/// Fastest supported playback speed
pub const SPEED_MAX: f64 = 8.0;

/// Clamp a speed multiplier into the supported range
pub fn clamp_speed(speed: f64) -> f64 {
    speed.clamp(SPEED_MIN, SPEED_MAX)
}

/// One recorded simulation event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationStep {
    pub id: i64,
    /// Seconds relative to run start, non-negative
    pub time: f64,
    /// Step kind: `scan` or `timemachine`
    pub etype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bibno: Option<i64>,
    /// Timing-machine position counter, present only for `timemachine` steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmpos: Option<i64>,
}

/// A run option as shown in the run selector; the first entry is the
/// newly created run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOption {
    pub label: String,
    pub value: i64,
}

/// What the run-creation endpoint returns: the new run plus its steps,
/// sorted ascending by time
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub run_id: i64,
    pub options: Vec<RunOption>,
    pub steps: Vec<SimulationStep>,
}

/// Replay scheduler state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    Paused,
    Finished,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Stopped => "stopped",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Finished => "finished",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_speed_bounds() {
        assert_eq!(clamp_speed(16.0), 8.0);
        assert_eq!(clamp_speed(0.0625), 0.125);
        assert_eq!(clamp_speed(1.0), 1.0);
    }

    #[test]
    fn test_speed_doubling_walk_clamps() {
        let mut speed = 1.0;
        for _ in 0..5 {
            speed = clamp_speed(speed * 2.0);
        }
        assert_eq!(speed, 8.0);
        for _ in 0..8 {
            speed = clamp_speed(speed / 2.0);
        }
        assert_eq!(speed, 0.125);
    }

    #[test]
    fn test_step_decode_timemachine() {
        let step: SimulationStep = serde_json::from_str(
            r#"{"id": 1, "time": 12.5, "etype": "timemachine", "bibno": 101, "tmpos": 3}"#,
        )
        .unwrap();
        assert_eq!(step.time, 12.5);
        assert_eq!(step.tmpos, Some(3));
    }

    #[test]
    fn test_step_decode_scan_without_tmpos() {
        let step: SimulationStep =
            serde_json::from_str(r#"{"id": 2, "time": 4.0, "etype": "scan", "bibno": 101}"#)
                .unwrap();
        assert_eq!(step.etype, "scan");
        assert_eq!(step.tmpos, None);
    }
}
