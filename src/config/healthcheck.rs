// ABOUTME: Health check section shared by service and image declarations.
// ABOUTME: Durations use humantime; defaults match the HEALTHCHECK defaults.

use crate::fragment::Healthcheck;
use crate::fragment::ValidationError;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthcheckConfig {
    pub cmd: String,

    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default, with = "humantime_serde")]
    pub start_period: Option<Duration>,
}

impl HealthcheckConfig {
    pub fn to_healthcheck(&self) -> Result<Healthcheck, ValidationError> {
        let check = Healthcheck::new(&self.cmd)?
            .interval(self.interval)
            .timeout(self.timeout)
            .retries(self.retries);
        Ok(match self.start_period {
            Some(period) => check.start_period(period),
            None => check,
        })
    }
}

fn default_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_retries() -> u32 {
    3
}
