use std::collections::BTreeSet;

use serde_json::Value as Json;

/// Paths are reported at most this many segments deep.
const MAX_DEPTH: usize = 2;

/// Dotted paths (`spec.containers`, `metadata.annotations`) at which `target`
/// differs from `base`, sorted and deduplicated.
pub fn changed_paths(target: &Json, base: &Json) -> Vec<String> {
    fn walk(a: &Json, b: &Json, path: &mut Vec<String>, out: &mut BTreeSet<String>) {
        if a == b {
            return;
        }
        match (a, b) {
            (Json::Object(ao), Json::Object(bo)) if path.len() < MAX_DEPTH => {
                let keys: BTreeSet<&String> = ao.keys().chain(bo.keys()).collect();
                for k in keys {
                    let (av, bv) = (ao.get(k).unwrap_or(&Json::Null), bo.get(k).unwrap_or(&Json::Null));
                    path.push(k.clone());
                    walk(av, bv, path, out);
                    path.pop();
                }
            }
            _ => {
                out.insert(if path.is_empty() { ".".to_string() } else { path.join(".") });
            }
        }
    }
    let mut out = BTreeSet::new();
    walk(target, base, &mut Vec::new(), &mut out);
    out.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_adds_updates_and_removes_by_path() {
        let base = serde_json::json!({
            "metadata": { "annotations": { "a": "1" }, "labels": { "x": "1" } },
            "spec": { "containers": [ { "image": "v1" } ], "hostname": "h" }
        });
        let target = serde_json::json!({
            "metadata": { "annotations": { "a": "2" }, "labels": { "x": "1" } },
            "spec": { "containers": [ { "image": "v2" } ], "nodeSelector": { "z": "1" } }
        });
        assert_eq!(
            changed_paths(&target, &base),
            vec!["metadata.annotations", "spec.containers", "spec.hostname", "spec.nodeSelector"]
        );
    }

    #[test]
    fn equal_values_have_no_paths() {
        let v = serde_json::json!({ "spec": { "a": [1, 2] } });
        assert!(changed_paths(&v, &v).is_empty());
        assert_eq!(changed_paths(&serde_json::json!(1), &serde_json::json!(2)), vec!["."]);
    }
}
