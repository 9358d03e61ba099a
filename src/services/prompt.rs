use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Number of recommendations requested from the backend
pub const RECOMMENDATION_COUNT: usize = 5;

/// Builds the generation prompt
///
/// Pure and deterministic: preference keys are emitted in sorted order, so
/// identical inputs yield byte-identical prompts. An empty `candidates`
/// slice still produces a complete prompt with an empty catalog.
pub fn build(prefs: &Map<String, Value>, watch_history: &[String], candidates: &[String]) -> String {
    let sorted: BTreeMap<&String, &Value> = prefs.iter().collect();
    let prefs_json = serde_json::to_string(&sorted).unwrap_or_else(|_| "{}".to_string());
    let history_json = to_json_list(watch_history);
    let catalog_json = to_json_list(candidates);

    format!(
        "System: Recommend {count} titles from the provided catalog based on user preferences.\n\
         User: Preferences: {prefs_json}\n\
         Last watched: {history_json}\n\
         Catalog: {catalog_json}\n\
         Output: A JSON list of exactly {count} objects, each with the fields \"contentId\" (string), \
         \"score\" (number between 0 and 1) and \"reason\" (string). Respond with the JSON list only.\n",
        count = RECOMMENDATION_COUNT,
    )
}

fn to_json_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn prefs() -> Map<String, Value> {
        json!({"genres": ["scifi"], "language": "en"})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_build_is_deterministic() {
        let history = vec!["m-1".to_string()];
        let candidates = vec!["m-789".to_string(), "m-234".to_string()];

        let first = build(&prefs(), &history, &candidates);
        let second = build(&prefs(), &history, &candidates);
        assert_eq!(first, second);
    }

    #[test]
    fn test_build_independent_of_pref_insertion_order() {
        let mut a = Map::new();
        a.insert("genres".to_string(), json!(["scifi"]));
        a.insert("language".to_string(), json!("en"));
        let mut b = Map::new();
        b.insert("language".to_string(), json!("en"));
        b.insert("genres".to_string(), json!(["scifi"]));

        assert_eq!(build(&a, &[], &[]), build(&b, &[], &[]));
    }

    #[test]
    fn test_build_contains_all_sections() {
        let prompt = build(
            &prefs(),
            &["m-1".to_string()],
            &["m-789".to_string(), "m-234".to_string()],
        );

        assert!(prompt.starts_with("System: Recommend 5 titles"));
        assert!(prompt.contains(r#"Preferences: {"genres":["scifi"],"language":"en"}"#));
        assert!(prompt.contains(r#"Last watched: ["m-1"]"#));
        assert!(prompt.contains(r#"Catalog: ["m-789","m-234"]"#));
        assert!(prompt.contains("exactly 5 objects"));
        assert!(prompt.contains("\"contentId\""));
    }

    #[test]
    fn test_build_with_empty_candidates() {
        let prompt = build(&Map::new(), &[], &[]);
        assert!(prompt.contains("Preferences: {}"));
        assert!(prompt.contains("Last watched: []"));
        assert!(prompt.contains("Catalog: []"));
        assert!(prompt.contains("Output:"));
    }

    #[test]
    fn test_candidate_order_preserved() {
        let prompt = build(&Map::new(), &[], &["b".to_string(), "a".to_string()]);
        assert!(prompt.contains(r#"Catalog: ["b","a"]"#));
    }
}
