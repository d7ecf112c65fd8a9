//! Time-windowed availability and rollout generation tracking for tablet pods.

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use vtshard_core::{labels::OBSERVED_SHARD_GENERATION_ANNOTATION, ConditionStatus};
use vtshard_reconciler::Builder;

/// How long a pod must have been Ready before its tablet counts as available.
/// Routers need this long to notice a newly ready tablet.
pub const TABLET_AVAILABLE_SECS: u64 = 30;

pub fn is_pod_ready(pod: &Pod) -> bool {
    ready_condition(pod).map(|(ready, _)| ready).unwrap_or(false)
}

pub fn is_pod_running(pod: &Pod) -> bool {
    pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
}

fn ready_condition(pod: &Pod) -> Option<(bool, Option<DateTime<Utc>>)> {
    let cond = pod.status.as_ref()?.conditions.as_ref()?.iter().find(|c| c.type_ == "Ready")?;
    Some((cond.status == "True", cond.last_transition_time.as_ref().map(|t| t.0)))
}

/// Availability of a Ready pod at `now`. A pod that is Ready but not for long
/// enough yet asks for a recheck, since nothing else will trigger one.
pub fn tablet_available_status(pod: &Pod, now: DateTime<Utc>, builder: &mut Builder) -> ConditionStatus {
    // Terminating pods go unavailable right away, even while still Ready.
    if pod.metadata.deletion_timestamp.is_some() {
        return ConditionStatus::False;
    }
    let window = Duration::from_secs(TABLET_AVAILABLE_SECS);
    match ready_condition(pod) {
        // No transition time recorded: Ready since long ago.
        Some((true, None)) => return ConditionStatus::True,
        Some((true, Some(since))) => {
            let ready_for = (now - since).to_std().unwrap_or(Duration::ZERO);
            if ready_for >= window {
                return ConditionStatus::True;
            }
        }
        _ => {}
    }
    builder.requeue_after(window);
    ConditionStatus::False
}

/// Shard generation stamped on the pod, if present and well formed.
pub fn observed_generation(pod: &Pod) -> Option<i64> {
    pod.metadata.annotations.as_ref()?.get(OBSERVED_SHARD_GENERATION_ANNOTATION)?.parse().ok()
}
