//! Multi-field query representation.

use std::collections::HashMap;

use crate::config::BuildOptions;
use crate::error::{Error, Result};

/// A query against the indexed fields.
///
/// Mirrors the three input shapes spec'd for the public API: a single
/// string broadcast to every field, a positional list matched to the
/// configured field order, or a field-name map.
#[derive(Debug, Clone)]
pub enum Query {
    /// Applied identically to every configured field.
    Broadcast(String),
    /// One string per configured field, in declaration order.
    Positional(Vec<String>),
    /// Field name to query text.
    Named(HashMap<String, String>),
}

impl Query {
    /// Normalize into `(field_idx, text)` pairs over only the fields that
    /// actually have query text.
    pub(crate) fn normalize(&self, options: &BuildOptions) -> Result<Vec<(usize, String)>> {
        match self {
            Query::Broadcast(text) => Ok((0..options.fields.len())
                .map(|idx| (idx, text.clone()))
                .collect()),
            Query::Positional(texts) => {
                if texts.len() != options.fields.len() {
                    return Err(Error::Config(format!(
                        "positional query has {} entries but {} fields are configured",
                        texts.len(),
                        options.fields.len()
                    )));
                }
                Ok(texts.iter().cloned().enumerate().collect())
            }
            Query::Named(map) => {
                let mut out = Vec::with_capacity(map.len());
                for (field, text) in map {
                    let idx = options.field_index(field).ok_or_else(|| {
                        Error::Config(format!("query references unknown field: {field}"))
                    })?;
                    out.push((idx, text.clone()));
                }
                out.sort_by_key(|(idx, _)| *idx);
                Ok(out)
            }
        }
    }
}

/// Per-field score multipliers for a query. Fields not present default to
/// `1.0`.
#[derive(Debug, Clone, Default)]
pub struct BoostFactors(HashMap<String, f64>);

impl BoostFactors {
    /// Build boosts from field-name/weight pairs.
    pub fn new(weights: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self(weights.into_iter().collect())
    }

    pub(crate) fn for_field(&self, field: &str) -> f64 {
        self.0.get(field).copied().unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> BuildOptions {
        BuildOptions {
            fields: vec!["title".to_string(), "artist".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn broadcast_applies_to_every_field() {
        let pairs = Query::Broadcast("hello".to_string())
            .normalize(&opts())
            .unwrap();
        assert_eq!(
            pairs,
            vec![(0, "hello".to_string()), (1, "hello".to_string())]
        );
    }

    #[test]
    fn positional_requires_exact_arity() {
        let err = Query::Positional(vec!["only-one".to_string()]).normalize(&opts());
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn named_rejects_unknown_field() {
        let mut map = HashMap::new();
        map.insert("nope".to_string(), "x".to_string());
        let err = Query::Named(map).normalize(&opts());
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn named_sorts_by_field_index() {
        let mut map = HashMap::new();
        map.insert("artist".to_string(), "pink".to_string());
        map.insert("title".to_string(), "the".to_string());
        let pairs = Query::Named(map).normalize(&opts()).unwrap();
        assert_eq!(pairs, vec![(0, "the".to_string()), (1, "pink".to_string())]);
    }

    #[test]
    fn boost_factors_default_to_one() {
        let boosts = BoostFactors::new([("title".to_string(), 2.0)]);
        assert_eq!(boosts.for_field("title"), 2.0);
        assert_eq!(boosts.for_field("artist"), 1.0);
    }
}
