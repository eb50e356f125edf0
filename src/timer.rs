//! Session timer state machine.
//!
//! Owns the in-memory session and its countdown. Progress is never stored:
//! it is derived from `(duration, remaining)` so a snapshot can't show a
//! time and a progress bar that disagree.

use crate::error::TimerError;
use serde::Serialize;
use std::fmt;

/// Lifecycle phase of the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerPhase {
    Idle,
    Active,
    Paused,
    Completed,
}

impl TimerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TimerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A meditation session while it is held in memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    /// Requested length in seconds, fixed at start
    pub duration: u32,
    pub completed: bool,
    pub mood: Option<String>,
    pub rating: Option<u8>,
    pub journal_text: Option<String>,
    /// Its row has been written; a retried completion must not insert it again
    pub persisted: bool,
}

impl Session {
    fn new(duration: u32) -> Self {
        Self {
            duration,
            completed: false,
            mood: None,
            rating: None,
            journal_text: None,
            persisted: false,
        }
    }
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not counting down (idle, paused or already completed)
    Ignored,
    Counted { remaining: u32 },
    /// Countdown reached zero on this tick
    Expired,
}

/// Consistent view of the runtime state, taken under one borrow
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimerSnapshot {
    pub phase: TimerPhase,
    pub duration: u32,
    pub remaining: u32,
    pub progress: f64,
}

impl TimerSnapshot {
    pub fn is_active(&self) -> bool {
        matches!(self.phase, TimerPhase::Active | TimerPhase::Paused)
    }

    pub fn is_paused(&self) -> bool {
        self.phase == TimerPhase::Paused
    }

    pub fn clock(&self) -> String {
        format_clock(self.remaining)
    }
}

#[derive(Debug, Clone)]
pub struct SessionTimer {
    phase: TimerPhase,
    duration: u32,
    remaining: u32,
    session: Option<Session>,
}

impl SessionTimer {
    /// Create an idle timer showing `default_duration` seconds
    pub fn new(default_duration: u32) -> Self {
        Self {
            phase: TimerPhase::Idle,
            duration: default_duration,
            remaining: default_duration,
            session: None,
        }
    }

    pub fn phase(&self) -> TimerPhase {
        self.phase
    }

    #[cfg(test)]
    pub fn duration(&self) -> u32 {
        self.duration
    }

    #[cfg(test)]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn progress(&self) -> f64 {
        progress_percent(self.duration, self.remaining)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            phase: self.phase,
            duration: self.duration,
            remaining: self.remaining,
            progress: self.progress(),
        }
    }

    /// Begin a new session. Allowed from idle, or from completed (which
    /// abandons the finished session).
    pub fn start(&mut self, duration: u32) -> Result<(), TimerError> {
        if duration == 0 {
            return Err(TimerError::InvalidDuration);
        }
        match self.phase {
            TimerPhase::Idle | TimerPhase::Completed => {
                self.duration = duration;
                self.remaining = duration;
                self.session = Some(Session::new(duration));
                self.phase = TimerPhase::Active;
                Ok(())
            }
            from => Err(TimerError::InvalidTransition {
                from,
                action: "start",
            }),
        }
    }

    /// Freeze the countdown. Pausing twice is a no-op.
    pub fn pause(&mut self) -> Result<(), TimerError> {
        match self.phase {
            TimerPhase::Active => {
                self.phase = TimerPhase::Paused;
                Ok(())
            }
            TimerPhase::Paused => Ok(()),
            from => Err(TimerError::InvalidTransition {
                from,
                action: "pause",
            }),
        }
    }

    /// Continue from the frozen remaining time. Resuming a running timer is a no-op.
    pub fn resume(&mut self) -> Result<(), TimerError> {
        match self.phase {
            TimerPhase::Paused => {
                self.phase = TimerPhase::Active;
                Ok(())
            }
            TimerPhase::Active => Ok(()),
            from => Err(TimerError::InvalidTransition {
                from,
                action: "resume",
            }),
        }
    }

    /// End the session early. Remaining time is kept until `reset`.
    pub fn stop(&mut self) -> Result<(), TimerError> {
        match self.phase {
            TimerPhase::Active | TimerPhase::Paused => {
                self.finish();
                Ok(())
            }
            TimerPhase::Completed => Ok(()),
            from => Err(TimerError::InvalidTransition {
                from,
                action: "stop",
            }),
        }
    }

    /// Return to idle from any phase, abandoning the in-memory session.
    pub fn reset(&mut self) {
        self.phase = TimerPhase::Idle;
        self.remaining = self.duration;
        self.session = None;
    }

    /// Advance the countdown by one second
    pub fn tick(&mut self) -> TickOutcome {
        if self.phase != TimerPhase::Active {
            return TickOutcome::Ignored;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.finish();
            TickOutcome::Expired
        } else {
            TickOutcome::Counted {
                remaining: self.remaining,
            }
        }
    }

    /// Note that the finished session's row has been written
    pub fn mark_persisted(&mut self) {
        if self.phase != TimerPhase::Completed {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.persisted = true;
        }
    }

    /// Hand the finished session over for persistence, leaving the timer idle
    pub fn take_completed(&mut self) -> Option<Session> {
        if self.phase != TimerPhase::Completed {
            return None;
        }
        let session = self.session.take();
        self.reset();
        session
    }

    fn finish(&mut self) {
        self.phase = TimerPhase::Completed;
        if let Some(session) = self.session.as_mut() {
            session.completed = true;
        }
    }
}

/// Percentage of `duration` already elapsed, clamped to [0, 100]
pub fn progress_percent(duration: u32, remaining: u32) -> f64 {
    if duration == 0 {
        return 0.0;
    }
    let elapsed = duration.saturating_sub(remaining) as f64;
    (elapsed * 100.0 / duration as f64).clamp(0.0, 100.0)
}

/// Render seconds as `MM:SS`
pub fn format_clock(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
