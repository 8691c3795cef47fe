//! Configuration types and validation for the cycling workflow scheduling
//! engine: the validated settings tree consumed by the task-definition
//! registry, graph parser, and task pool. Parsed from TOML; the Jinja2/EmPy
//! templating layer of the original implementation is out of scope (see
//! SPEC_FULL.md §1/§6) — this is the tree that templating would produce.

use crate::defaults::*;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level engine configuration: `[scheduling]`, `[runtime]`, `[cylc]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub runtime: BTreeMap<String, NamespaceConfig>,
    #[serde(default)]
    pub cylc: CylcConfig,
}

/// `[scheduling]`: cycling mode, initial/final points, runahead policy, and
/// the sequence -> graph-text map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulingConfig {
    pub initial_cycle_point: String,
    #[serde(default)]
    pub final_cycle_point: Option<String>,
    #[serde(default = "default_cycling_mode")]
    pub cycling_mode: String,
    #[serde(default = "default_run_mode")]
    pub run_mode: String,
    /// A multiple-of-shortest-interval runahead policy (`"P3"`, meaning 3x
    /// the shortest declared sequence interval) or an absolute interval
    /// (`"PT6H"`).
    #[serde(default = "default_runahead_limit")]
    pub runahead_limit: String,
    #[serde(default = "default_max_active_cycle_points")]
    pub max_active_cycle_points: usize,
    #[serde(default = "default_queue_limit")]
    pub internal_queue_limit: usize,
    #[serde(default = "default_stall_handler_abort")]
    pub abort_on_stall: bool,
    /// Maps a recurrence-section header (e.g. `R1`, `P1D`, `T00`) to its
    /// graph body text.
    pub graphs: BTreeMap<String, String>,
    /// Maps an xtrigger label to its call spec, `function(args...)`.
    #[serde(default)]
    pub xtriggers: BTreeMap<String, String>,
    /// Parameter declarations, e.g. `i = "1..3"`.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// `[runtime.<namespace>]`: per-task or per-family settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NamespaceConfig {
    #[serde(default)]
    pub inherit: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub directives: BTreeMap<String, String>,
    #[serde(default = "default_retry_delays")]
    pub execution_retry_delays: Vec<String>,
    #[serde(default = "default_retry_delays")]
    pub submission_retry_delays: Vec<String>,
    #[serde(default = "default_execution_timeout_seconds")]
    pub execution_timeout_seconds: Option<u64>,
    #[serde(default = "default_submission_timeout_seconds")]
    pub submission_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub events: BTreeMap<String, String>,
    /// Offset from the instance's cycle point after which an unsubmitted
    /// task is considered expired.
    #[serde(default)]
    pub expire_offset: Option<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

/// `[cylc]`: scheduler-wide policy (events, mail, logging).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CylcConfig {
    #[serde(default)]
    pub events: BTreeMap<String, String>,
    #[serde(default)]
    pub mail_to: Option<String>,
    #[serde(default = "default_log_rotation_count")]
    pub log_rotation_count: u32,
    #[serde(default = "default_auto_shutdown")]
    pub auto_shutdown_when_empty: bool,
    #[serde(default = "default_job_runner")]
    pub job_runner: String,
    #[serde(default = "default_subprocess_pool_size")]
    pub subprocess_pool_size: usize,
    #[serde(default = "default_graceful_shutdown_timeout")]
    pub graceful_shutdown_timeout_seconds: u64,
    #[serde(default = "default_database_busy_timeout")]
    pub database_busy_timeout_seconds: u64,
    #[serde(default = "default_channel_buffer_size")]
    pub channel_buffer_size: usize,
    #[serde(default = "default_config_reload_check_interval")]
    pub config_reload_check_interval_seconds: u64,
}

impl Default for CylcConfig {
    fn default() -> Self {
        CylcConfig {
            events: BTreeMap::new(),
            mail_to: None,
            log_rotation_count: default_log_rotation_count(),
            auto_shutdown_when_empty: default_auto_shutdown(),
            job_runner: default_job_runner(),
            subprocess_pool_size: default_subprocess_pool_size(),
            graceful_shutdown_timeout_seconds: default_graceful_shutdown_timeout(),
            database_busy_timeout_seconds: default_database_busy_timeout(),
            channel_buffer_size: default_channel_buffer_size(),
            config_reload_check_interval_seconds: default_config_reload_check_interval(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(s).map_err(|e| ConfigError::Toml(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduling.validate()?;

        for (name, ns) in &self.runtime {
            for inherited in &ns.inherit {
                if inherited != "root" && !self.runtime.contains_key(inherited) {
                    return Err(ConfigError::InvalidValue {
                        key: format!("runtime.{}.inherit", name),
                        reason: format!("unknown parent namespace '{}'", inherited),
                    });
                }
            }
            for delay in ns.execution_retry_delays.iter().chain(&ns.submission_retry_delays) {
                if crate::cycling::Interval::parse_iso(delay).is_err() {
                    return Err(ConfigError::InvalidValue {
                        key: format!("runtime.{}.retry_delays", name),
                        reason: format!("invalid duration '{}'", delay),
                    });
                }
            }
        }

        if self.cylc.subprocess_pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "cylc.subprocess_pool_size".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

impl SchedulingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_cycle_point.is_empty() {
            return Err(ConfigError::MissingSetting("scheduling.initial_cycle_point".to_string()));
        }
        if self.cycling_mode != "iso8601" && self.cycling_mode != "integer" {
            return Err(ConfigError::InvalidValue {
                key: "scheduling.cycling_mode".to_string(),
                reason: format!("unknown cycling mode '{}'", self.cycling_mode),
            });
        }
        if self.graphs.is_empty() {
            return Err(ConfigError::MissingSetting("scheduling.graphs".to_string()));
        }
        if self.max_active_cycle_points == 0 {
            return Err(ConfigError::InvalidValue {
                key: "scheduling.max_active_cycle_points".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn cycling_mode(&self) -> crate::cycling::CyclingMode {
        match self.cycling_mode.as_str() {
            "integer" => crate::cycling::CyclingMode::Integer,
            _ => crate::cycling::CyclingMode::Iso8601,
        }
    }
}
