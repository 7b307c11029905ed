//! Centralised timing and sizing constants for the reconciliation core.
//!
//! Values are derived from a small set of **base constants** so the stall
//! window and toast lifetimes can be reasoned about together.
//!
//! | Constant                 | Production | Test   |
//! |--------------------------|-----------|--------|
//! | `BASE_STALL_WINDOW_SECS` | 120 s     | 6 s    |
//! | `BASE_TOAST_TTL_MS`      | 4000 ms   | 4000 ms|

// ── Base constants ──────────────────────────────────────────────────────────

/// Time a `Pending` invocation may wait for its confirmation before the UI
/// offers a retry.
#[cfg(not(test))]
pub const BASE_STALL_WINDOW_SECS: u64 = 120;
#[cfg(test)]
pub const BASE_STALL_WINDOW_SECS: u64 = 6;

/// Display lifetime of a transient notification.
pub const BASE_TOAST_TTL_MS: u64 = 4_000;

// ── Ledger sizing ───────────────────────────────────────────────────────────

/// Default number of tracked invocations kept in memory.
pub const DEFAULT_LEDGER_CAPACITY: usize = 50;

/// Upper bound accepted by configuration validation.
pub const MAX_LEDGER_CAPACITY: usize = 500;

/// Default number of rows handed to the rendering layer.
pub const DEFAULT_DISPLAY_LIMIT: usize = 50;

// ── Notifications ───────────────────────────────────────────────────────────

/// Toasts shown concurrently; the oldest is dropped beyond this.
pub const DEFAULT_MAX_VISIBLE_TOASTS: usize = 5;

/// Lifetime for every toast unless configured otherwise.
pub const DEFAULT_TOAST_TTL_MS: u64 = BASE_TOAST_TTL_MS;

/// Cap for external text (error strings, result references) rendered in a toast.
pub const MAX_NOTIFICATION_MESSAGE_CHARS: usize = 160;

// ── Stall detection ─────────────────────────────────────────────────────────

pub const DEFAULT_STALL_AFTER_SECS: u64 = BASE_STALL_WINDOW_SECS;
pub const DEFAULT_STALL_AFTER_NS: u64 = DEFAULT_STALL_AFTER_SECS * NANOS_PER_SEC;

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Wall-clock nanoseconds since the unix epoch, overridable from unit tests.
pub fn current_time_ns() -> u64 {
    #[cfg(test)]
    if let Some(override_ns) = TEST_TIME_OVERRIDE_NS.with(|slot| slot.get()) {
        return override_ns;
    }

    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_nanos().try_into().unwrap_or(u64::MAX))
        .unwrap_or_default()
}

pub fn current_time_ms() -> u64 {
    current_time_ns() / NANOS_PER_MILLI
}

pub const fn secs_to_ns(secs: u64) -> u64 {
    secs.saturating_mul(NANOS_PER_SEC)
}

#[cfg(test)]
thread_local! {
    static TEST_TIME_OVERRIDE_NS: std::cell::Cell<Option<u64>> = const { std::cell::Cell::new(None) };
}

#[cfg(test)]
pub fn set_test_time_ns(now_ns: u64) {
    TEST_TIME_OVERRIDE_NS.with(|slot| slot.set(Some(now_ns)));
}

#[cfg(test)]
pub fn clear_test_time_ns() {
    TEST_TIME_OVERRIDE_NS.with(|slot| slot.set(None));
}

pub const NANOS_PER_SEC: u64 = 1_000_000_000;
pub const NANOS_PER_MILLI: u64 = 1_000_000;

// ── Compile-time sanity checks ──────────────────────────────────────────────

const _: () = assert!(DEFAULT_LEDGER_CAPACITY <= MAX_LEDGER_CAPACITY);
const _: () = assert!(DEFAULT_MAX_VISIBLE_TOASTS > 0);
const _: () = assert!(DEFAULT_STALL_AFTER_NS.is_multiple_of(NANOS_PER_SEC));
