//! Metadata filter semantics.

/// Filter for GetDbSchemas.
#[derive(Debug, Clone, Default)]
pub struct DbSchemaFilter {
    pub catalog: Option<String>,
    pub db_schema_pattern: Option<String>,
}

/// Filter for GetTables.
#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    pub catalog: Option<String>,
    pub db_schema_pattern: Option<String>,
    pub table_pattern: Option<String>,
    /// Table types to include; empty means every type.
    pub table_types: Vec<String>,
}

/// SQL LIKE matching: `%` matches any run of characters, `_` matches
/// exactly one.
pub fn like_match(pattern: &str, value: &str) -> bool {
    fn matches(pattern: &[char], value: &[char]) -> bool {
        match pattern.split_first() {
            None => value.is_empty(),
            Some(('%', rest)) => (0..=value.len()).any(|skip| matches(rest, &value[skip..])),
            Some(('_', rest)) => !value.is_empty() && matches(rest, &value[1..]),
            Some((c, rest)) => value.first() == Some(c) && matches(rest, &value[1..]),
        }
    }
    let pattern: Vec<char> = pattern.chars().collect();
    let value: Vec<char> = value.chars().collect();
    matches(&pattern, &value)
}

/// Catalog-field semantics: absent does not constrain, empty selects
/// entries with no catalog, anything else must match exactly.
pub fn catalog_matches(filter: &Option<String>, value: &Option<String>) -> bool {
    match filter.as_deref() {
        None => true,
        Some("") => value.is_none(),
        Some(expected) => value.as_deref() == Some(expected),
    }
}

/// Pattern-field semantics: absent does not constrain, otherwise LIKE.
pub fn pattern_matches(pattern: &Option<String>, value: &str) -> bool {
    match pattern.as_deref() {
        None => true,
        Some(pattern) => like_match(pattern, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_metacharacters() {
        assert!(like_match("INTTABLE", "INTTABLE"));
        assert!(like_match("INT%", "INTTABLE"));
        assert!(like_match("%TABLE", "INTTABLE"));
        assert!(like_match("I_TTABLE", "INTTABLE"));
        assert!(like_match("%", ""));
        assert!(!like_match("_", ""));
        assert!(!like_match("INT", "INTTABLE"));
        assert!(!like_match("INTTABLE", "inttable"));
    }

    #[test]
    fn catalog_three_valued_semantics() {
        let none: Option<String> = None;
        let empty = Some(String::new());
        let named = Some("main".to_string());

        assert!(catalog_matches(&none, &Some("main".to_string())));
        assert!(catalog_matches(&none, &None));
        assert!(catalog_matches(&empty, &None));
        assert!(!catalog_matches(&empty, &Some("main".to_string())));
        assert!(catalog_matches(&named, &Some("main".to_string())));
        assert!(!catalog_matches(&named, &None));
    }

    #[test]
    fn absent_pattern_does_not_constrain() {
        assert!(pattern_matches(&None, "anything"));
        assert!(pattern_matches(&Some("A%".to_string()), "APP"));
        assert!(!pattern_matches(&Some("A%".to_string()), "SYS"));
    }
}
