// ABOUTME: Health check shared by image layers (HEALTHCHECK) and services.
// ABOUTME: Renders to Dockerfile flags and to a canonical fingerprint value.

use super::ValidationError;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Healthcheck {
    pub command: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub retries: u32,
    pub start_period: Option<Duration>,
}

impl Healthcheck {
    /// Shell-form check with the defaults of `HEALTHCHECK` in most base images.
    pub fn new(command: &str) -> Result<Self, ValidationError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(ValidationError::invalid(
                "healthcheck",
                "command cannot be empty",
            ));
        }
        Ok(Self {
            command: command.to_string(),
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            retries: 3,
            start_period: None,
        })
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn start_period(mut self, start_period: Duration) -> Self {
        self.start_period = Some(start_period);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        if self.interval.is_zero() || self.timeout.is_zero() {
            return Err(ValidationError::invalid(
                "healthcheck",
                "interval and timeout must be positive",
            ));
        }
        if self.timeout > self.interval {
            return Err(ValidationError::invalid(
                "healthcheck",
                "timeout cannot exceed interval",
            ));
        }
        Ok(())
    }
}

fn secs(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

/// Dockerfile flag form: `--interval=30s --timeout=10s --retries=3 CMD curl -f ...`
impl fmt::Display for Healthcheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "--interval={} --timeout={}",
            secs(self.interval),
            secs(self.timeout)
        )?;
        if let Some(start) = self.start_period {
            write!(f, " --start-period={}", secs(start))?;
        }
        write!(f, " --retries={} CMD {}", self.retries, self.command)
    }
}
