/// Facilitator discussion timer.
///
/// The state lives in the board settings blob (`facilitator.timer`) and is
/// broadcast to every viewer, so it is a plain serializable value. Driving the
/// per-second tick is the runtime's job; this module only defines the
/// transitions.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub total_seconds: u32,
    pub elapsed_seconds: u32,
    pub is_running: bool,
    pub is_paused: bool,
}

/// Result of advancing a running timer by one second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Timer is not running (stopped or paused); nothing changed.
    Idle,
    Running { remaining: u32 },
    /// This tick reached the total.
    Completed,
}

impl TimerState {
    pub fn new(total_seconds: u32) -> Self {
        Self {
            total_seconds,
            ..Self::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.is_running && self.elapsed_seconds >= self.total_seconds
    }

    /// Whether the ticker should be advancing this timer.
    pub fn is_ticking(&self) -> bool {
        self.is_running && !self.is_paused && !self.is_complete()
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.total_seconds.saturating_sub(self.elapsed_seconds)
    }

    /// Fraction elapsed in `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        if self.total_seconds == 0 {
            return 0.0;
        }
        (self.elapsed_seconds as f64 / self.total_seconds as f64).min(1.0)
    }

    /// Start a fresh countdown of `total_seconds`.
    pub fn start(&mut self, total_seconds: u32) {
        *self = Self {
            total_seconds,
            elapsed_seconds: 0,
            is_running: true,
            is_paused: false,
        };
    }

    pub fn pause(&mut self) {
        if self.is_running {
            self.is_paused = true;
        }
    }

    pub fn resume(&mut self) {
        if self.is_running && !self.is_complete() {
            self.is_paused = false;
        }
    }

    /// Stop and rewind, keeping the configured total.
    pub fn reset(&mut self) {
        *self = Self::new(self.total_seconds);
    }

    /// Extend the countdown. A completed timer picks up ticking again.
    pub fn add_time(&mut self, seconds: u32) {
        self.total_seconds = self.total_seconds.saturating_add(seconds);
    }

    pub fn tick(&mut self) -> Tick {
        if !self.is_ticking() {
            return Tick::Idle;
        }
        self.elapsed_seconds += 1;
        if self.is_complete() {
            Tick::Completed
        } else {
            Tick::Running {
                remaining: self.remaining_seconds(),
            }
        }
    }

    /// Remaining time as `MM:SS`.
    pub fn display(&self) -> String {
        format_clock(self.remaining_seconds())
    }
}

pub fn format_clock(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_countdown_to_completion() {
        let mut timer = TimerState::default();
        timer.start(3);
        assert_eq!(timer.tick(), Tick::Running { remaining: 2 });
        assert_eq!(timer.tick(), Tick::Running { remaining: 1 });
        assert_eq!(timer.tick(), Tick::Completed);
        assert!(timer.is_complete());
        assert_eq!(timer.tick(), Tick::Idle);
        assert_eq!(timer.elapsed_seconds, 3);
    }

    #[test]
    fn test_pause_stops_ticks() {
        let mut timer = TimerState::default();
        timer.start(10);
        timer.tick();
        timer.pause();
        assert_eq!(timer.tick(), Tick::Idle);
        assert_eq!(timer.elapsed_seconds, 1);
        timer.resume();
        assert_eq!(timer.tick(), Tick::Running { remaining: 8 });
    }

    #[test]
    fn test_not_complete_unless_running() {
        let timer = TimerState {
            total_seconds: 5,
            elapsed_seconds: 5,
            is_running: false,
            is_paused: false,
        };
        assert!(!timer.is_complete());
    }

    #[test]
    fn test_reset_keeps_total() {
        let mut timer = TimerState::default();
        timer.start(300);
        timer.tick();
        timer.reset();
        assert_eq!(timer, TimerState::new(300));
        assert_eq!(timer.display(), "05:00");
    }

    #[test]
    fn test_add_time_revives_completed_timer() {
        let mut timer = TimerState::default();
        timer.start(1);
        assert_eq!(timer.tick(), Tick::Completed);
        timer.add_time(60);
        assert!(timer.is_ticking());
        assert_eq!(timer.tick(), Tick::Running { remaining: 59 });
    }

    #[test]
    fn test_progress_and_format() {
        let mut timer = TimerState::default();
        timer.start(120);
        for _ in 0..30 {
            timer.tick();
        }
        assert!((timer.progress() - 0.25).abs() < f64::EPSILON);
        assert_eq!(timer.display(), "01:30");
        assert_eq!(TimerState::new(0).progress(), 0.0);
        assert_eq!(format_clock(3599), "59:59");
    }

    #[test]
    fn test_wire_shape() {
        let mut timer = TimerState::default();
        timer.start(90);
        let json = serde_json::to_value(timer).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "totalSeconds": 90,
                "elapsedSeconds": 0,
                "isRunning": true,
                "isPaused": false
            })
        );
    }
}
