//! Default values for configuration parameters
//!
//! This module centralizes all default value functions used by the configuration
//! structures. These functions are used by serde when deserializing configuration
//! files that don't specify certain optional fields.

/// Default cycling mode: date-time cycling unless a workflow opts into
/// `integer`.
pub fn default_cycling_mode() -> String {
    "iso8601".to_string()
}

/// Default run mode (live job submission, as opposed to `dummy`/`simulation`).
pub fn default_run_mode() -> String {
    "live".to_string()
}

/// Default runahead limit: no repetitions ahead of the minimum active point.
pub fn default_runahead_limit() -> String {
    "P0".to_string()
}

/// Default maximum number of active cycle points held in the pool at once.
pub fn default_max_active_cycle_points() -> usize {
    3
}

/// Default submission queue size limit (0 = unlimited).
pub fn default_queue_limit() -> usize {
    0
}

/// Default submission-retry delay list (no retries).
pub fn default_retry_delays() -> Vec<String> {
    Vec::new()
}

/// Default execution timeout: none (wait indefinitely for completion).
pub fn default_execution_timeout_seconds() -> Option<u64> {
    None
}

/// Default submission timeout (60 seconds).
pub fn default_submission_timeout_seconds() -> Option<u64> {
    Some(60)
}

/// Default subprocess pool concurrency: one slot per available core.
pub fn default_subprocess_pool_size() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// Default job runner back-end.
pub fn default_job_runner() -> String {
    "background".to_string()
}

/// Default stall behaviour: log and keep running rather than abort.
pub fn default_stall_handler_abort() -> bool {
    false
}

/// Default contact-file API version.
pub fn default_contact_api_version() -> u32 {
    1
}

/// Default auto-shutdown-when-pool-empty behaviour.
pub fn default_auto_shutdown() -> bool {
    true
}

/// Default number of rotated scheduler log files to retain.
pub fn default_log_rotation_count() -> u32 {
    5
}

/// Default graceful shutdown timeout for in-flight jobs (seconds).
pub fn default_graceful_shutdown_timeout() -> u64 {
    30
}

/// Default run-database busy timeout (seconds).
pub fn default_database_busy_timeout() -> u64 {
    5
}

/// Default inbound message/command channel buffer size.
pub fn default_channel_buffer_size() -> usize {
    1000
}

/// Default config-file checksum recheck interval (seconds).
pub fn default_config_reload_check_interval() -> u64 {
    10
}

/// Default xtrigger polling interval when none is declared (seconds).
pub fn default_xtrigger_interval_seconds() -> u64 {
    60
}

/// Default query-surface listen address.
pub fn default_query_listen_address() -> String {
    "127.0.0.1:8080".to_string()
}
