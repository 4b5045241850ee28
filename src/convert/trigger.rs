// src/convert/trigger.rs
//! Edge search and record re-slicing
//!
//! The search runs on the converted voltage trace of the trigger source
//! channel. A rising trigger fires at the first index whose predecessor is
//! below the level and which itself is at or above it; falling is the
//! mirror. Re-slicing drops leading samples so the trigger event lands at
//! the configured pre-trigger proportion of the output.

use crate::spec::TriggerSlope;

/// First sample index satisfying the edge condition, if any.
pub fn find_edge(trace: &[f64], level_volts: f64, slope: TriggerSlope) -> Option<usize> {
    for i in 1..trace.len() {
        let crossed = match slope {
            TriggerSlope::Rising => trace[i - 1] < level_volts && trace[i] >= level_volts,
            TriggerSlope::Falling => trace[i - 1] > level_volts && trace[i] <= level_volts,
        };
        if crossed {
            return Some(i);
        }
    }
    None
}

/// Start index of the re-sliced record. `position` is the pre-trigger
/// share of the output; 0 puts the trigger event at index 0.
pub fn aligned_start(trigger_index: usize, position: f64, len: usize) -> usize {
    let pre_trigger = (position.clamp(0.0, 1.0) * len as f64).floor() as usize;
    trigger_index.saturating_sub(pre_trigger)
}
