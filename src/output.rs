// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Renders plans, apply outcomes and status in normal, quiet (CI), and JSON modes.

use crate::apply::{OperationOutcome, OperationState, PartialApplyResult};
use crate::engine::ResourceStatus;
use crate::plan::{ChangePlan, Operation, OperationKind};
use serde::Serialize;
use std::time::Instant;

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output for CI (only final result)
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn duration(&self) -> Option<f64> {
        self.start_time.map(|_| self.elapsed_secs())
    }

    /// Print a progress message (suppressed in quiet/json mode).
    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            println!("{message}");
        }
    }

    /// Print a success message with optional timing.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => {
                let elapsed = self.elapsed_secs();
                if elapsed > 0.0 {
                    println!("{message} ({:.1}s)", elapsed);
                } else {
                    println!("{message}");
                }
            }
            OutputMode::Quiet => {
                // Print only the essential result
                println!("{message}");
            }
            OutputMode::Json => self.emit(&JsonEvent {
                duration_secs: self.duration(),
                ..JsonEvent::new("success", message)
            }),
        }
    }

    /// Print a non-fatal warning.
    pub fn warning(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => eprintln!("Warning: {message}"),
            OutputMode::Json => self.emit_err(&JsonEvent::new("warning", message)),
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                eprintln!("Error: {message}");
            }
            OutputMode::Json => self.emit_err(&JsonEvent {
                duration_secs: self.duration(),
                ..JsonEvent::new("error", message)
            }),
        }
    }

    /// Print the operations of a plan followed by its summary.
    pub fn plan(&self, plan: &ChangePlan) {
        if plan.is_empty() {
            self.success("No changes. The stack matches the snapshot.");
            return;
        }
        match self.mode {
            OutputMode::Normal => {
                for operation in plan {
                    println!("  {} {}", symbol(operation), operation);
                }
                println!();
                println!("Plan: {}", plan.summary());
            }
            OutputMode::Quiet => println!("Plan: {}", plan.summary()),
            OutputMode::Json => {
                for operation in plan {
                    self.emit(&OperationEvent::new("planned", operation, None));
                }
                let summary = plan.summary().to_string();
                self.emit(&JsonEvent::new("plan", &summary));
            }
        }
    }

    /// Print every operation of an apply with its final state.
    pub fn outcomes(&self, result: &PartialApplyResult) {
        match self.mode {
            OutputMode::Normal => {
                for outcome in result.outcomes() {
                    println!("  {} {}", state_symbol(outcome), outcome_line(outcome));
                }
            }
            OutputMode::Quiet => {}
            OutputMode::Json => {
                for outcome in result.outcomes() {
                    let state = outcome.state.to_string();
                    self.emit(&OperationEvent::new(
                        &state,
                        &outcome.operation,
                        outcome.elapsed.map(|d| d.as_secs_f64()),
                    ));
                }
            }
        }
    }

    /// Print the observed state of each recorded resource.
    pub fn status(&self, statuses: &[ResourceStatus]) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                if statuses.is_empty() {
                    println!("Nothing deployed.");
                }
                for status in statuses {
                    println!(
                        "  {:<32} {:<8} {}",
                        status.record.key().to_string(),
                        status.state.to_string(),
                        status.record.handle
                    );
                }
            }
            OutputMode::Json => {
                for status in statuses {
                    let target = status.record.key().to_string();
                    let state = status.state.to_string();
                    self.emit(&JsonEvent {
                        target: Some(&target),
                        state: Some(&state),
                        ..JsonEvent::new("status", status.record.handle.as_str())
                    });
                }
            }
        }
    }

    fn emit<T: Serialize>(&self, event: &T) {
        if let Ok(json) = serde_json::to_string(event) {
            println!("{json}");
        }
    }

    fn emit_err<T: Serialize>(&self, event: &T) {
        if let Ok(json) = serde_json::to_string(event) {
            eprintln!("{json}");
        }
    }
}

fn symbol(operation: &Operation) -> &'static str {
    match operation.kind {
        OperationKind::Create => "+",
        OperationKind::Update => "~",
        OperationKind::Destroy => "-",
    }
}

fn state_symbol(outcome: &OperationOutcome) -> &'static str {
    match outcome.state {
        OperationState::Committed => "✓",
        OperationState::Failed => "✗",
        OperationState::Pending => "·",
    }
}

fn outcome_line(outcome: &OperationOutcome) -> String {
    match (outcome.state, outcome.elapsed) {
        (state, Some(elapsed)) if state.is_terminal() => format!(
            "{} [{}, {:.1}s]",
            outcome.operation,
            outcome.state,
            elapsed.as_secs_f64()
        ),
        _ => format!("{} [{}]", outcome.operation, outcome.state),
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

impl<'a> JsonEvent<'a> {
    fn new(event: &'a str, message: &'a str) -> Self {
        Self {
            event,
            message,
            target: None,
            state: None,
            duration_secs: None,
        }
    }
}

#[derive(Serialize)]
struct OperationEvent<'a> {
    event: &'a str,
    operation: String,
    target: String,
    reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

impl<'a> OperationEvent<'a> {
    fn new(event: &'a str, operation: &Operation, duration_secs: Option<f64>) -> Self {
        Self {
            event,
            operation: operation.kind.to_string(),
            target: operation.target.to_string(),
            reason: operation.reason.to_string(),
            duration_secs,
        }
    }
}
