// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use std::time::Instant;

//==============================================================================
// Constants & Structures
//==============================================================================

/// Process-wide reference point. All `now_*` helpers below measure elapsed
/// time against this instant, giving us a monotonic microsecond clock
/// without depending on wall-clock time (mirrors the original's use of
/// `g_get_monotonic_time`).
static EPOCH: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Microseconds elapsed since the process epoch.
pub fn now_micros() -> i64 {
    epoch().elapsed().as_micros() as i64
}

/// Milliseconds elapsed since the process epoch.
pub fn now_millis() -> i64 {
    now_micros() / 1000
}
