//! Attribute allow-lists.
//!
//! A layer style may restrict which attributes end up in a tile. Nested
//! attributes are flattened to dotted names (`address.city`) before they are
//! written, so a filter entry matches either the full dotted name or any of
//! its parents: allowing `address` keeps every `address.*` attribute.
//!
//! The geometry attribute is never written as a property, independent of the
//! filter.

use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PropertyFilter {
    /// Keep every attribute
    #[default]
    None,
    /// Keep only the listed attributes
    Include(HashSet<String>),
    /// Geometry only
    ExcludeAll,
}

impl PropertyFilter {
    pub fn include<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Include(fields.into_iter().map(|s| s.into()).collect())
    }

    /// Build from an optional allow-list, `None` meaning "everything".
    pub fn from_allow_list(allow_list: Option<&[String]>) -> Self {
        match allow_list {
            Some([]) => Self::ExcludeAll,
            Some(fields) => Self::include(fields.iter().cloned()),
            None => Self::None,
        }
    }

    /// Check a (possibly dotted) attribute name against the filter.
    pub fn should_include(&self, field_name: &str) -> bool {
        match self {
            Self::None => true,
            Self::Include(allowed) => name_and_parents(field_name).any(|n| allowed.contains(n)),
            Self::ExcludeAll => false,
        }
    }

    /// Attribute names a feature source should be asked for, `None` meaning all.
    ///
    /// `extra` names are always requested on top of the allow-list.
    pub fn query_names(&self, extra: &[String]) -> Option<Vec<String>> {
        match self {
            Self::None => None,
            Self::Include(allowed) => {
                let mut names: Vec<String> = allowed.iter().cloned().collect();
                names.extend(extra.iter().cloned());
                names.sort();
                names.dedup();
                Some(names)
            }
            Self::ExcludeAll => {
                let mut names = extra.to_vec();
                names.sort();
                names.dedup();
                Some(names)
            }
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// `a.b.c`, `a.b`, `a`
fn name_and_parents(name: &str) -> impl Iterator<Item = &str> {
    std::iter::once(name).chain(
        name.char_indices()
            .rev()
            .filter(|(_, c)| *c == '.')
            .map(move |(i, _)| &name[..i]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_filter_default_is_none() {
        assert_eq!(PropertyFilter::default(), PropertyFilter::None);
        assert!(!PropertyFilter::default().is_active());
    }

    #[test]
    fn test_include_filter_only_includes_allowed() {
        let filter = PropertyFilter::include(vec!["name", "population"]);
        assert!(filter.should_include("name"));
        assert!(filter.should_include("population"));
        assert!(!filter.should_include("internal_id"));
    }

    #[test]
    fn test_include_parent_allows_nested() {
        let filter = PropertyFilter::include(vec!["address"]);
        assert!(filter.should_include("address.city"));
        assert!(filter.should_include("address.geo.lat"));
        assert!(!filter.should_include("addressee"));

        let leaf_only = PropertyFilter::include(vec!["address.city"]);
        assert!(leaf_only.should_include("address.city"));
        assert!(!leaf_only.should_include("address.street"));
    }

    #[test]
    fn test_exclude_all_excludes_everything() {
        let filter = PropertyFilter::ExcludeAll;
        assert!(!filter.should_include("name"));
        assert!(filter.is_active());
    }

    #[test]
    fn test_from_allow_list() {
        let allow = vec!["kind".to_string()];
        assert_eq!(
            PropertyFilter::from_allow_list(Some(&allow)),
            PropertyFilter::include(vec!["kind"])
        );
        assert_eq!(PropertyFilter::from_allow_list(None), PropertyFilter::None);
        assert_eq!(
            PropertyFilter::from_allow_list(Some(&[])),
            PropertyFilter::ExcludeAll
        );
    }

    #[test]
    fn test_query_names_add_extras() {
        let filter = PropertyFilter::include(vec!["kind", "name"]);
        let names = filter.query_names(&["label".to_string(), "name".to_string()]);
        assert_eq!(
            names,
            Some(vec![
                "kind".to_string(),
                "label".to_string(),
                "name".to_string()
            ])
        );
        assert_eq!(PropertyFilter::None.query_names(&[]), None);
    }

    #[test]
    fn test_name_and_parents() {
        let parents: Vec<&str> = name_and_parents("a.b.c").collect();
        assert_eq!(parents, vec!["a.b.c", "a.b", "a"]);
    }
}
