//! Machine configuration.
//!
//! A `MachineConfig` is everything that varies between simulated machines:
//! the scheduling policy, the PRNG seed, and whether the hardware timer
//! fires at all. It can be built in code or loaded from a JSON document.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Errors from loading a configuration document. This is the only
/// recoverable error surface in the crate; everything past boot is a
/// kernel assertion.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown scheduler `{0}`")]
    UnknownScheduler(String),
}

/// Which scheduling policy the kernel boots with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerKind {
    /// Plain FIFO time slicing.
    RoundRobin,
    /// Strict priorities 0..=7 with priority donation.
    Priority,
    /// Probabilistic tickets with ticket donation.
    Lottery,
}

impl SchedulerKind {
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name {
            "round-robin" => Ok(Self::RoundRobin),
            "priority" => Ok(Self::Priority),
            "lottery" => Ok(Self::Lottery),
            other => Err(ConfigError::UnknownScheduler(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round-robin",
            Self::Priority => "priority",
            Self::Lottery => "lottery",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MachineConfig {
    /// Scheduling policy, selected by name in documents.
    pub scheduler: SchedulerKind,
    /// Seed for the machine's PRNG.
    pub random_seed: u64,
    /// Whether the hardware timer fires. Turning it off removes
    /// preemption, which some deterministic tests rely on.
    pub timer_interrupts: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerKind::RoundRobin,
            random_seed: 0,
            timer_interrupts: true,
        }
    }
}

impl MachineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerKind) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    pub fn with_timer_interrupts(mut self, on: bool) -> Self {
        self.timer_interrupts = on;
        self
    }

    pub fn from_json(doc: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(doc)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = MachineConfig::new();
        assert_eq!(config.scheduler, SchedulerKind::RoundRobin);
        assert_eq!(config.random_seed, 0);
        assert!(config.timer_interrupts);
    }

    #[test]
    fn builder_chains() {
        let config = MachineConfig::new()
            .with_scheduler(SchedulerKind::Lottery)
            .with_random_seed(99)
            .with_timer_interrupts(false);
        assert_eq!(config.scheduler, SchedulerKind::Lottery);
        assert_eq!(config.random_seed, 99);
        assert!(!config.timer_interrupts);
    }

    #[test]
    fn parses_json_document() {
        let config =
            MachineConfig::from_json(r#"{"scheduler": "priority", "random_seed": 7}"#).unwrap();
        assert_eq!(config.scheduler, SchedulerKind::Priority);
        assert_eq!(config.random_seed, 7);
        assert!(config.timer_interrupts);
    }

    #[test]
    fn rejects_unknown_scheduler_name() {
        assert!(MachineConfig::from_json(r#"{"scheduler": "fair-share"}"#).is_err());
        assert!(matches!(
            SchedulerKind::from_name("fair-share"),
            Err(ConfigError::UnknownScheduler(_))
        ));
    }

    #[test]
    fn scheduler_names_round_trip() {
        for kind in [
            SchedulerKind::RoundRobin,
            SchedulerKind::Priority,
            SchedulerKind::Lottery,
        ] {
            assert_eq!(SchedulerKind::from_name(kind.name()).unwrap(), kind);
        }
    }
}
