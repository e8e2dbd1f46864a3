//! Compile-time configuration for the namespaced drivers.

/// Ticks an alarm's wake lock is held after the alarm fires.
pub const ALARM_WAKE_LOCK_TIMEOUT_TICKS: u64 = 5;

/// Prefix of each namespace's alarm wake lock; the init pid is appended.
pub const ALARM_WAKE_LOCK_PREFIX: &str = "alarm_";

/// Binder protocol version reported by `BINDER_VERSION`.
pub const BINDER_CURRENT_PROTOCOL_VERSION: i32 = 8;

/// Size of each log buffer in bytes.
pub const LOG_BUF_SIZE: usize = 256 * 1024;

/// Names of the log buffers, in device-node order.
pub const LOG_BUFFER_NAMES: [&str; 4] = ["main", "events", "radio", "system"];

/// Largest payload a single log record can carry.
pub const LOGGER_ENTRY_MAX_PAYLOAD: usize = 4076;

/// Group whose members may read every log record (`AID_LOG`).
pub const AID_LOG: u32 = 1007;

/// Maximum brightness assumed when a backlight driver does not set one.
pub const DEFAULT_MAX_BRIGHTNESS: u32 = 255;
