//! Drain handshake. The drain itself is carried out by an external agent that
//! watches these annotations; we only request it and poll for completion.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Set on objects whose owner knows how to drain them. The value says what draining does.
pub const SUPPORTED_ANNOTATION: &str = "drain.planetscale.com/supported";
/// Set (with a reason) to request a drain.
pub const STARTED_ANNOTATION: &str = "drain.planetscale.com/started";
/// Set by the drain agent once the object can be removed.
pub const FINISHED_ANNOTATION: &str = "drain.planetscale.com/finished";

pub fn finished(meta: &ObjectMeta) -> bool {
    has(meta, FINISHED_ANNOTATION)
}

pub fn started(meta: &ObjectMeta) -> bool {
    has(meta, STARTED_ANNOTATION)
}

/// Request a drain. Returns false if one was already requested; the first
/// reason is kept in that case.
pub fn start(meta: &mut ObjectMeta, reason: &str) -> bool {
    let annotations = meta.annotations.get_or_insert_with(Default::default);
    if annotations.contains_key(STARTED_ANNOTATION) {
        return false;
    }
    annotations.insert(STARTED_ANNOTATION.to_string(), reason.to_string());
    true
}

fn has(meta: &ObjectMeta, key: &str) -> bool {
    meta.annotations.as_ref().map(|a| a.contains_key(key)).unwrap_or(false)
}
