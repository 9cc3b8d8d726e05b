//! Sparse tree diff over JSON values.
//!
//! Mappings are interior nodes, everything else is a leaf. The diff of `new`
//! against `old` contains only the leaves of `new` that are absent from or
//! different in `old`, at the same path they have in `new`. Removed keys are
//! not reported.

use serde_json::{Map, Value};

/// Diff two mappings key by key.
pub fn diff_maps(old: &Map<String, Value>, new: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in new {
        match (value, old.get(key)) {
            (Value::Object(new_child), Some(Value::Object(old_child))) => {
                let child = diff_maps(old_child, new_child);
                if !child.is_empty() {
                    out.insert(key.clone(), Value::Object(child));
                }
            }
            (value, previous) if previous != Some(value) => {
                out.insert(key.clone(), value.clone());
            }
            _ => {}
        }
    }
    out
}

/// Dotted paths of every changed leaf, in key order. Useful for logging.
pub fn changed_paths(diff: &Map<String, Value>) -> Vec<String> {
    let mut out = Vec::new();
    walk(diff, &mut Vec::new(), &mut out);
    out
}

fn walk<'a>(map: &'a Map<String, Value>, prefix: &mut Vec<&'a str>, out: &mut Vec<String>) {
    for (key, value) in map {
        prefix.push(key);
        match value {
            Value::Object(child) if !child.is_empty() => walk(child, prefix, out),
            _ => out.push(prefix.join(".")),
        }
        prefix.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected mapping"),
        }
    }

    #[test]
    fn changed_leaf_is_reported_at_full_path() {
        let old = map(json!({"unit1": {"x": 1, "y": 2}}));
        let new = map(json!({"unit1": {"x": 2, "y": 2}}));
        assert_eq!(diff_maps(&old, &new), map(json!({"unit1": {"x": 2}})));
    }

    #[test]
    fn new_keys_are_reported() {
        let old = map(json!({"unit1": {"x": 1}}));
        let new = map(json!({"unit1": {"x": 1, "bam": "a.bam"}, "unit2": {"x": 0}}));
        assert_eq!(
            diff_maps(&old, &new),
            map(json!({"unit1": {"bam": "a.bam"}, "unit2": {"x": 0}}))
        );
    }

    #[test]
    fn removed_keys_are_not_reported() {
        let old = map(json!({"unit1": {"x": 1, "tmp": "t"}}));
        let new = map(json!({"unit1": {"x": 1}}));
        assert!(diff_maps(&old, &new).is_empty());
    }

    #[test]
    fn deep_nesting_recurses() {
        let old = map(json!({"s": {"config": {"algorithm": {"aligner": "bwa", "trim": false}}}}));
        let new = map(json!({"s": {"config": {"algorithm": {"aligner": "bwa", "trim": true}}}}));
        assert_eq!(
            diff_maps(&old, &new),
            map(json!({"s": {"config": {"algorithm": {"trim": true}}}}))
        );
    }

    #[test]
    fn type_change_replaces_whole_value() {
        let old = map(json!({"s": {"regions": "chr1"}}));
        let new = map(json!({"s": {"regions": {"chr1": [0, 100]}}}));
        assert_eq!(diff_maps(&old, &new), new);
    }

    #[test]
    fn lists_are_leaves() {
        let old = map(json!({"s": {"variants": [1, 2]}}));
        let new = map(json!({"s": {"variants": [1, 2, 3]}}));
        assert_eq!(diff_maps(&old, &new), map(json!({"s": {"variants": [1, 2, 3]}})));
    }

    #[test]
    fn unchanged_maps_have_empty_diff() {
        let old = map(json!({"a": 1, "s": {"b": [1]}}));
        assert!(diff_maps(&old, &old.clone()).is_empty());
        assert_eq!(
            diff_maps(&map(json!({"a": 1})), &map(json!({"a": 1, "b": 2}))),
            map(json!({"b": 2}))
        );
    }

    #[test]
    fn changed_paths_are_dotted() {
        let diff = map(json!({"unit1": {"x": 2, "cfg": {"a": true}}, "unit2": 5}));
        assert_eq!(changed_paths(&diff), vec!["unit1.cfg.a", "unit1.x", "unit2"]);
    }
}
