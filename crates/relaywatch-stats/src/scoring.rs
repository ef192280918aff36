//! Relay health scoring.
//!
//! A relay's health is the product of three factors in `[0, 1]`:
//! - uptime: connection successes over attempts
//! - event share: recent events relative to the network median, capped at 2x
//! - latency: `1 / (1 + latency / 500ms)`, or 0.5 when never measured

use relaywatch_core::RelayHealthInputs;

/// Cap for the median-normalized event rate.
const EVENT_SHARE_CAP: f64 = 2.0;

/// Latency at which the latency factor drops to one half.
const LATENCY_REFERENCE_MS: f64 = 500.0;

/// Latency factor for relays without an estimate.
const UNKNOWN_LATENCY_FACTOR: f64 = 0.5;

/// Computed health of one relay.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthScore {
    pub url: String,
    pub score: f64,
    pub uptime: f64,
    pub event_share: f64,
    pub latency_factor: f64,
}

/// Score one relay against the median recent event count.
pub fn compute_health(inputs: &RelayHealthInputs, median_events: f64) -> HealthScore {
    let uptime = if inputs.connection_attempts == 0 {
        0.0
    } else {
        (inputs.connection_successes as f64 / inputs.connection_attempts as f64).clamp(0.0, 1.0)
    };

    // Avoid division by zero
    let median = if median_events > 0.0 { median_events } else { 1.0 };
    let event_share = (inputs.recent_events as f64 / median).min(EVENT_SHARE_CAP) / EVENT_SHARE_CAP;

    let latency_factor = match inputs.latency_ms {
        Some(ms) if ms >= 0.0 => 1.0 / (1.0 + ms / LATENCY_REFERENCE_MS),
        _ => UNKNOWN_LATENCY_FACTOR,
    };

    HealthScore {
        url: inputs.url.clone(),
        score: uptime * event_share * latency_factor,
        uptime,
        event_share,
        latency_factor,
    }
}

/// Score every relay. The median is taken over relays with recent events.
pub fn compute_health_scores(inputs: &[RelayHealthInputs]) -> Vec<HealthScore> {
    let mut volumes: Vec<f64> = inputs
        .iter()
        .filter(|i| i.recent_events > 0)
        .map(|i| i.recent_events as f64)
        .collect();
    let median = compute_median(&mut volumes);

    inputs.iter().map(|i| compute_health(i, median)).collect()
}

/// Compute the median of a slice of values.
pub fn compute_median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
