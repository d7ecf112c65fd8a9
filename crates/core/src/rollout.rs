//! Rolling-recreate markers. A change that needs a restart is first
//! *scheduled* on the object; an external rollout driver *releases* it when
//! the object may be deleted and recreated.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

pub const SCHEDULED_ANNOTATION: &str = "rollout.planetscale.com/scheduled";
pub const RELEASED_ANNOTATION: &str = "rollout.planetscale.com/released";

/// Pending change description, if any.
pub fn scheduled(meta: &ObjectMeta) -> Option<&str> {
    meta.annotations.as_ref().and_then(|a| a.get(SCHEDULED_ANNOTATION)).map(String::as_str)
}

pub fn released(meta: &ObjectMeta) -> bool {
    meta.annotations.as_ref().map(|a| a.contains_key(RELEASED_ANNOTATION)).unwrap_or(false)
}

pub fn schedule(meta: &mut ObjectMeta, changes: &str) {
    meta.annotations
        .get_or_insert_with(Default::default)
        .insert(SCHEDULED_ANNOTATION.to_string(), changes.to_string());
}

/// Clear both markers once nothing is pending.
pub fn unschedule(meta: &mut ObjectMeta) {
    if let Some(a) = meta.annotations.as_mut() {
        a.remove(SCHEDULED_ANNOTATION);
        a.remove(RELEASED_ANNOTATION);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_then_unschedule() {
        let mut meta = ObjectMeta::default();
        assert_eq!(scheduled(&meta), None);
        schedule(&mut meta, "spec.containers");
        assert_eq!(scheduled(&meta), Some("spec.containers"));
        meta.annotations.as_mut().map(|a| a.insert(RELEASED_ANNOTATION.into(), "true".into()));
        assert!(released(&meta));
        unschedule(&mut meta);
        assert_eq!(scheduled(&meta), None);
        assert!(!released(&meta));
    }
}
