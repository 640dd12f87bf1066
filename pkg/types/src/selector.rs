use std::collections::HashMap;

/// Label-selector predicate: a set of labels matches iff every selector key
/// is present with an equal value. An empty selector matches everything.
pub fn matches(selector: &HashMap<String, String>, labels: &HashMap<String, String>) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}
