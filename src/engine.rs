//! Reconciliation of poll responses and push events into one operation view.
//!
//! The engine is synchronous and owns no timers. Every transition takes the
//! generation (and, for polls, the tick) the caller captured when it issued
//! the request, so results that belong to an older operation, or that arrive
//! after completion, are dropped here instead of at every call site.

use crate::log_lines::{self, LogEntry};
use crate::progress::compute_percent;
use crate::remote::{ActionKind, PushEvent, StatusResponse};
use crate::steps::{Step, StepSet};
use tracing::{debug, info};

pub const READY_TEXT: &str = "Ready.";
pub const DONE_TEXT: &str = "SUCCESS (done)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Start call in flight; no operation id yet.
    Starting,
    /// Polling (and listening for push events when available).
    Tracking,
    /// Backend reported `done`; waiting for the settle delay.
    Completing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationSnapshot {
    pub kind: Option<ActionKind>,
    pub operation_id: Option<String>,
    pub steps: Vec<Step>,
    pub progress_percent: u8,
    pub completion_flag: bool,
    pub logs_url: Option<String>,
}

/// Identifies one dispatched status request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTicket {
    pub generation: u64,
    pub tick: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ignored,
    Updated,
    Completed,
}

pub struct Reconciler {
    generation: u64,
    phase: Phase,
    kind: Option<ActionKind>,
    operation_id: Option<String>,
    steps: StepSet,
    completed: bool,
    logs_url: Option<String>,
    logs: Vec<LogEntry>,
    last_log_batch: Vec<String>,
    backend_state: Option<String>,
    status: String,
    next_tick: u64,
    last_applied_tick: u64,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            generation: 0,
            phase: Phase::Idle,
            kind: None,
            operation_id: None,
            steps: StepSet::default(),
            completed: false,
            logs_url: None,
            logs: Vec::new(),
            last_log_batch: Vec::new(),
            backend_state: None,
            status: READY_TEXT.to_string(),
            next_tick: 0,
            last_applied_tick: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Starting | Phase::Tracking)
    }

    pub fn operation_id(&self) -> Option<&str> {
        self.operation_id.as_deref()
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    pub fn progress(&self) -> u8 {
        compute_percent(self.steps.as_slice(), self.completed)
    }

    pub fn snapshot(&self) -> OperationSnapshot {
        OperationSnapshot {
            kind: self.kind,
            operation_id: self.operation_id.clone(),
            steps: self.steps.as_slice().to_vec(),
            progress_percent: self.progress(),
            completion_flag: self.completed,
            logs_url: self.logs_url.clone(),
        }
    }

    /// Status text outside an operation (validation and platform messages).
    pub fn set_status(&mut self, text: impl Into<String>) {
        self.status = text.into();
    }

    /// Seed a fresh operation. Anything still addressed to the previous
    /// generation is ignored from here on.
    pub fn begin(&mut self, kind: ActionKind, order: Vec<String>) -> u64 {
        self.generation += 1;
        self.phase = Phase::Starting;
        self.kind = Some(kind);
        self.operation_id = None;
        self.steps = StepSet::seed(&order);
        self.completed = false;
        self.logs_url = None;
        self.logs.clear();
        self.last_log_batch.clear();
        self.backend_state = None;
        self.status = kind.starting_text().to_string();
        self.next_tick = 0;
        self.last_applied_tick = 0;
        info!(
            "{} operation seeded (generation {}): {:?}",
            kind, self.generation, order
        );
        self.generation
    }

    pub fn started(&mut self, generation: u64, operation_id: &str, text: String) -> bool {
        if generation != self.generation || self.phase != Phase::Starting {
            debug!("Ignoring start result for stale generation {}", generation);
            return false;
        }
        self.phase = Phase::Tracking;
        self.operation_id = Some(operation_id.to_string());
        self.status = text;
        true
    }

    /// The start call was rejected; nothing is left running.
    pub fn start_failed(&mut self, generation: u64, message: &str) -> bool {
        if generation != self.generation || self.phase != Phase::Starting {
            return false;
        }
        self.phase = Phase::Idle;
        self.steps = StepSet::default();
        self.status = format!("Error: {message}");
        true
    }

    pub fn next_poll(&mut self, generation: u64) -> Option<PollTicket> {
        if generation != self.generation || self.phase != Phase::Tracking {
            return None;
        }
        self.next_tick += 1;
        Some(PollTicket {
            generation,
            tick: self.next_tick,
        })
    }

    pub fn apply_poll(&mut self, ticket: PollTicket, res: &StatusResponse) -> PollOutcome {
        if ticket.generation != self.generation || self.phase != Phase::Tracking {
            debug!(
                "Ignoring status response (generation {}, tick {})",
                ticket.generation, ticket.tick
            );
            return PollOutcome::Ignored;
        }
        if ticket.tick <= self.last_applied_tick {
            debug!(
                "Ignoring overtaken status response (tick {} <= {})",
                ticket.tick, self.last_applied_tick
            );
            return PollOutcome::Ignored;
        }
        self.last_applied_tick = ticket.tick;

        if let Some(url) = res.logs.as_ref().filter(|u| !u.trim().is_empty()) {
            self.logs_url = Some(url.clone());
        }
        for step in res.steps.iter().flatten() {
            self.steps.apply(&step.id, &step.status);
        }
        if let Some(events) = &res.events {
            self.replace_logs(events);
        }
        if let Some(state) = res.state.as_ref().filter(|s| !s.trim().is_empty()) {
            self.backend_state = Some(state.trim().to_string());
        }

        if res.done {
            self.completed = true;
            self.phase = Phase::Completing;
            self.status = DONE_TEXT.to_string();
            info!(
                "Operation {} complete",
                self.operation_id.as_deref().unwrap_or("?")
            );
            return PollOutcome::Completed;
        }

        self.refresh_status();
        PollOutcome::Updated
    }

    pub fn apply_push(&mut self, generation: u64, event: &PushEvent) -> bool {
        if generation != self.generation || self.phase != Phase::Tracking {
            return false;
        }
        if !event.step.is_empty() {
            self.steps.apply(&event.step, &event.status);
        }
        if let Some(all) = event.all_logs.as_ref().filter(|l| !l.is_empty()) {
            self.replace_logs(all);
        }
        self.refresh_status();
        true
    }

    /// A status request failed: stop tracking, leave the last known steps.
    pub fn poll_failed(&mut self, ticket: PollTicket, message: &str) -> bool {
        if ticket.generation != self.generation || self.phase != Phase::Tracking {
            return false;
        }
        self.phase = Phase::Idle;
        self.status = format!("Error polling status: {message}");
        true
    }

    pub fn settled(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.phase != Phase::Completing {
            return false;
        }
        self.phase = Phase::Idle;
        true
    }

    fn replace_logs(&mut self, batch: &[String]) {
        if batch == self.last_log_batch.as_slice() {
            return;
        }
        self.logs = log_lines::normalize(batch);
        self.last_log_batch = batch.to_vec();
    }

    fn refresh_status(&mut self) {
        let Some(kind) = self.kind else {
            return;
        };
        let mut text = format!(
            "{}: {}/{} steps finished",
            kind,
            self.steps.terminal_count(),
            self.steps.len()
        );
        if let Some(state) = &self.backend_state {
            text.push_str(&format!(" ({state})"));
        }
        self.status = text;
    }
}
