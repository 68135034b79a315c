//! Job-name filtering with glob-like patterns.
//!
//! Patterns support a single `*` wildcard: `*` alone matches everything,
//! `prefix*` matches by prefix, `*suffix` matches by suffix, anything else
//! is an exact comparison. No regex, no escaping.

/// Check whether `name` matches a single pattern.
pub fn matches_pattern(name: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if pattern.len() > 1 {
        if let Some(prefix) = pattern.strip_suffix('*') {
            return name.starts_with(prefix);
        }
        if let Some(suffix) = pattern.strip_prefix('*') {
            return name.ends_with(suffix);
        }
    }

    name == pattern
}

/// Evaluate a job name against ordered include/exclude pattern lists.
///
/// A non-empty include list requires at least one match. Exclude is
/// evaluated afterwards and a single match rejects the name, so exclude
/// always wins over include. An empty include list allows everything.
pub fn passes(name: &str, include: &[String], exclude: &[String]) -> bool {
    if !include.is_empty() && !include.iter().any(|p| matches_pattern(name, p)) {
        return false;
    }

    !exclude.iter().any(|p| matches_pattern(name, p))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(patterns: &[&str]) -> Vec<String> {
        patterns.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_star_matches_everything() {
        assert!(matches_pattern("Nightly ETL", "*"));
        assert!(matches_pattern("", "*"));
    }

    #[test]
    fn test_prefix_match() {
        assert!(matches_pattern("ETL Load Customers", "ETL*"));
        assert!(!matches_pattern("Load ETL Customers", "ETL*"));
    }

    #[test]
    fn test_suffix_match() {
        assert!(matches_pattern("Rebuild Index Backup", "*Backup"));
        assert!(!matches_pattern("Backup Rebuild Index", "*Backup"));
    }

    #[test]
    fn test_exact_match() {
        assert!(matches_pattern("Nightly ETL", "Nightly ETL"));
        assert!(!matches_pattern("Nightly ETL v2", "Nightly ETL"));
        assert!(!matches_pattern("nightly etl", "Nightly ETL"));
    }

    #[test]
    fn test_empty_pattern_is_literal() {
        assert!(matches_pattern("", ""));
        assert!(!matches_pattern("job", ""));
    }

    #[test]
    fn test_lone_star_prefix_and_suffix_edge() {
        // A pattern of just "*" is the wildcard; "a*" and "*a" are one-char
        // prefix/suffix patterns.
        assert!(matches_pattern("abc", "a*"));
        assert!(matches_pattern("cba", "*a"));
        assert!(!matches_pattern("bc", "a*"));
    }

    #[test]
    fn test_empty_include_allows_all() {
        assert!(passes("anything", &[], &[]));
    }

    #[test]
    fn test_include_is_an_or_over_patterns() {
        let include = list(&["ETL*", "Backup*"]);
        assert!(passes("ETL Load", &include, &[]));
        assert!(passes("Backup Full", &include, &[]));
        assert!(!passes("Reindex", &include, &[]));
    }

    #[test]
    fn test_exclude_rejects_match() {
        let exclude = list(&["*Test"]);
        assert!(!passes("ETL Test", &[], &exclude));
        assert!(passes("ETL Load", &[], &exclude));
    }

    #[test]
    fn test_exclude_overrides_include() {
        let include = list(&["ETL*"]);
        let exclude = list(&["ETL Staging*"]);
        assert!(passes("ETL Load Customers", &include, &exclude));
        assert!(!passes("ETL Staging Refresh", &include, &exclude));
    }

    #[test]
    fn test_include_all_with_specific_exclude() {
        let include = list(&["*"]);
        let exclude = list(&["Maintenance*"]);
        assert!(passes("Nightly ETL", &include, &exclude));
        assert!(!passes("Maintenance Cleanup", &include, &exclude));
    }
}
