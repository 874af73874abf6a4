//! The closed set of test categories a module may declare.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Display metadata for one category.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CategoryMeta {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Configured categories keyed by slug.
///
/// When the configuration declares no categories at all, the built-in set is
/// used; once any category is configured, only the configured ones exist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct CategorySet(BTreeMap<String, CategoryMeta>);

impl CategorySet {
    /// The built-in category set.
    #[must_use]
    pub fn builtin() -> Self {
        [
            ("cognitive", "Cognitive", "Intelligence, memory and attention"),
            ("emotional", "Emotional", "Anxiety, mood and emotional regulation"),
            ("behavioral", "Behavioral", "Conduct and adaptive behavior"),
            ("social", "Social", "Peer relations and social skills"),
            ("personality", "Personality", "Temperament and personality traits"),
            ("developmental", "Developmental", "Developmental milestones"),
        ]
        .into_iter()
        .map(|(key, name, description)| {
            (
                key.to_string(),
                CategoryMeta {
                    name: name.to_string(),
                    description: description.to_string(),
                },
            )
        })
        .collect()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&CategoryMeta> {
        self.0.get(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, meta: CategoryMeta) {
        self.0.insert(key.into(), meta);
    }
}

impl FromIterator<(String, CategoryMeta)> for CategorySet {
    fn from_iter<I: IntoIterator<Item = (String, CategoryMeta)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_has_emotional() {
        let set = CategorySet::builtin();
        assert!(set.contains("emotional"));
        assert_eq!(set.get("emotional").unwrap().name, "Emotional");
        assert!(!set.contains("astrology"));
    }

    #[test]
    fn keys_are_sorted() {
        let set = CategorySet::builtin();
        let keys: Vec<&str> = set.keys().collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
    }
}
