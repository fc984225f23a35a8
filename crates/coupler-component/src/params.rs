//! Component parameters.
//!
//! The configuration parser hands every component a flat string → string
//! mapping. Interpretation (booleans, numbers, lists) happens here, on
//! demand, so a component only fails on parameters it actually reads.

use crate::ComponentError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Values recognised as boolean false. Everything else is true.
const FALSE_VALUES: &[&str] = &["false", "f", "no", "n", "0"];

/// Parameter mapping for one component.
///
/// # Example
///
/// ```
/// use coupler_component::Params;
///
/// let mut params = Params::new();
/// params.insert("clobber", "False");
/// params.insert("capability_reqs", "raw, derived");
///
/// assert_eq!(params.get_bool("clobber").unwrap(), Some(false));
/// assert_eq!(params.get_list("capability_reqs"), vec!["raw", "derived"]);
/// assert!(params.require("name").is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a parameter.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns the parameter or a [`ComponentError::MissingParameter`].
    pub fn require(&self, key: &str) -> Result<&str, ComponentError> {
        self.get(key).ok_or_else(|| ComponentError::MissingParameter {
            name: key.to_string(),
        })
    }

    /// Interprets a parameter as a boolean flag.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace.
    /// Only `false`, `f`, `no`, `n` and `0` are false; an empty value is an
    /// error because it almost always means a typo in the file.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ComponentError> {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        let value = raw.trim().to_ascii_lowercase();
        if value.is_empty() {
            return Err(ComponentError::invalid_parameter(key, "empty boolean"));
        }
        Ok(Some(!FALSE_VALUES.contains(&value.as_str())))
    }

    /// Interprets a parameter as an unsigned integer.
    pub fn get_u64(&self, key: &str) -> Result<Option<u64>, ComponentError> {
        self.get(key)
            .map(|raw| {
                raw.trim()
                    .parse::<u64>()
                    .map_err(|e| ComponentError::invalid_parameter(key, e.to_string()))
            })
            .transpose()
    }

    /// Splits a comma-separated parameter, dropping empty items.
    ///
    /// A missing parameter is an empty list.
    #[must_use]
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_values() {
        let params: Params = [
            ("a", "True"),
            ("b", " no "),
            ("c", "F"),
            ("d", "1"),
            ("e", "0"),
            ("f", "anything"),
        ]
        .into_iter()
        .collect();

        assert_eq!(params.get_bool("a").expect("valid"), Some(true));
        assert_eq!(params.get_bool("b").expect("valid"), Some(false));
        assert_eq!(params.get_bool("c").expect("valid"), Some(false));
        assert_eq!(params.get_bool("d").expect("valid"), Some(true));
        assert_eq!(params.get_bool("e").expect("valid"), Some(false));
        assert_eq!(params.get_bool("f").expect("valid"), Some(true));
        assert_eq!(params.get_bool("missing").expect("valid"), None);
    }

    #[test]
    fn empty_bool_is_invalid() {
        let params: Params = [("clobber", "  ")].into_iter().collect();
        assert!(matches!(
            params.get_bool("clobber"),
            Err(ComponentError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn integers() {
        let params: Params = [("finish_delay", "250"), ("bad", "-3")].into_iter().collect();
        assert_eq!(params.get_u64("finish_delay").expect("valid"), Some(250));
        assert!(params.get_u64("bad").is_err());
        assert_eq!(params.get_u64("absent").expect("valid"), None);
    }

    #[test]
    fn lists_skip_blanks() {
        let params: Params = [("reqs", "Carol, ,Bob,")].into_iter().collect();
        assert_eq!(params.get_list("reqs"), vec!["Carol", "Bob"]);
        assert!(params.get_list("nothing").is_empty());
    }

    #[test]
    fn require_names_missing_key() {
        let params = Params::new();
        let err = params.require("name").expect_err("name is absent");
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn insert_replaces() {
        let mut params = Params::new();
        params.insert("k", "1");
        params.insert("k", "2");
        assert_eq!(params.get("k"), Some("2"));
        assert_eq!(params.len(), 1);
    }
}
