//! Destination path templates.
//!
//! A template is a `/`-separated list of segments, each either a literal or a
//! `{placeholder}`:
//!
//! ```text
//! accounts/{account}/departments/{department}/terms/{id}
//! ```
//!
//! The final segment is always `{id}` (the record's own identifier). Every
//! other placeholder names an ancestor entity type whose identifier is
//! substituted at render time. Templates render forward (identifiers → path)
//! and capture backward (path → identifiers); capture is how ancestor
//! identifiers are recovered from markers written by earlier runs.

use std::collections::BTreeMap;
use std::fmt;

/// Placeholder for the record's own identifier.
pub const ID_PLACEHOLDER: &str = "id";

/// Errors from parsing or rendering a template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// The template contains an empty segment (or is empty).
    #[error("empty segment")]
    EmptySegment,
    /// A segment has unbalanced or misplaced braces.
    #[error("malformed segment '{0}'")]
    MalformedSegment(String),
    /// The final segment is not `{id}`.
    #[error("last segment must be {{id}}")]
    MissingId,
    /// `{id}` appears before the final segment.
    #[error("{{id}} may only appear as the last segment")]
    MisplacedId,
    /// A placeholder appears more than once.
    #[error("placeholder '{0}' appears more than once")]
    DuplicatePlaceholder(String),
    /// No value was supplied for a placeholder.
    #[error("no value for placeholder '{0}'")]
    MissingValue(String),
    /// A value cannot be used as a path segment.
    #[error("value '{value}' for '{name}' is not a valid path segment")]
    InvalidValue {
        /// Placeholder name.
        name: String,
        /// Offending value.
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed destination path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parses and validates a template.
    ///
    /// # Errors
    ///
    /// Returns a [`TemplateError`] describing the first grammar violation.
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for part in raw.split('/') {
            if part.is_empty() {
                return Err(TemplateError::EmptySegment);
            }
            let segment = if let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                let valid = !inner.is_empty()
                    && inner
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
                if !valid {
                    return Err(TemplateError::MalformedSegment(part.to_string()));
                }
                if !seen.insert(inner.to_string()) {
                    return Err(TemplateError::DuplicatePlaceholder(inner.to_string()));
                }
                Segment::Placeholder(inner.to_string())
            } else if part.contains(['{', '}']) || part == "." || part == ".." {
                return Err(TemplateError::MalformedSegment(part.to_string()));
            } else {
                Segment::Literal(part.to_string())
            };
            segments.push(segment);
        }

        match segments.last() {
            Some(Segment::Placeholder(name)) if name == ID_PLACEHOLDER => {}
            _ => return Err(TemplateError::MissingId),
        }
        let misplaced = segments[..segments.len() - 1]
            .iter()
            .any(|s| matches!(s, Segment::Placeholder(name) if name == ID_PLACEHOLDER));
        if misplaced {
            return Err(TemplateError::MisplacedId);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Returns the template text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the ancestor placeholders (every placeholder except `{id}`),
    /// in template order.
    pub fn ancestor_placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) if name != ID_PLACEHOLDER => Some(name.as_str()),
            _ => None,
        })
    }

    /// Returns the parent-collection pattern: the template without its final
    /// `{id}` segment, with placeholders replaced by `*`.
    ///
    /// Two entity types with equal patterns would write into the same
    /// collection.
    #[must_use]
    pub fn collection_pattern(&self) -> String {
        self.segments[..self.segments.len() - 1]
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => text.as_str(),
                Segment::Placeholder(_) => "*",
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Whether documents of `self` and `other` can land in the same
    /// collection.
    ///
    /// Collection segments overlap pairwise when they are equal literals or
    /// either side is a placeholder, so `departments/CS/terms/{id}` overlaps
    /// `departments/{department}/terms/{id}`.
    #[must_use]
    pub fn shares_collection(&self, other: &Self) -> bool {
        let ours = &self.segments[..self.segments.len() - 1];
        let theirs = &other.segments[..other.segments.len() - 1];
        ours.len() == theirs.len()
            && ours.iter().zip(theirs).all(|pair| match pair {
                (Segment::Literal(a), Segment::Literal(b)) => a == b,
                _ => true,
            })
    }

    /// Returns the literal segments before the first placeholder, joined and
    /// terminated with `/`. Every rendered path starts with this prefix.
    #[must_use]
    pub fn literal_prefix(&self) -> String {
        let mut prefix = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => {
                    prefix.push_str(text);
                    prefix.push('/');
                }
                Segment::Placeholder(_) => break,
            }
        }
        prefix
    }

    /// Returns the first segment if it is a literal.
    #[must_use]
    pub fn root_collection(&self) -> Option<&str> {
        match self.segments.first() {
            Some(Segment::Literal(text)) => Some(text),
            _ => None,
        }
    }

    /// Renders a path, substituting each placeholder from `values`.
    ///
    /// # Errors
    ///
    /// Returns `TemplateError::MissingValue` if a placeholder has no value and
    /// `TemplateError::InvalidValue` if a value is empty, contains `/`, or is
    /// a relative segment.
    pub fn render(&self, values: &BTreeMap<String, String>) -> Result<String, TemplateError> {
        let mut parts = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => parts.push(text.as_str()),
                Segment::Placeholder(name) => {
                    let value = values
                        .get(name)
                        .ok_or_else(|| TemplateError::MissingValue(name.clone()))?;
                    if value.is_empty() || value.contains('/') || value == "." || value == ".." {
                        return Err(TemplateError::InvalidValue {
                            name: name.clone(),
                            value: value.clone(),
                        });
                    }
                    parts.push(value.as_str());
                }
            }
        }
        Ok(parts.join("/"))
    }

    /// Matches `path` against the template, returning the placeholder values.
    ///
    /// Returns `None` if the path has a different shape or a literal differs.
    #[must_use]
    pub fn capture(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut values = BTreeMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(text) if text == part => {}
                Segment::Literal(_) => return None,
                Segment::Placeholder(_) if part.is_empty() => return None,
                Segment::Placeholder(name) => {
                    values.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(values)
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn parses_nested_template() {
        let t = PathTemplate::parse("accounts/{account}/departments/{department}/terms/{id}")
            .unwrap();
        assert_eq!(
            t.ancestor_placeholders().collect::<Vec<_>>(),
            vec!["account", "department"]
        );
        assert_eq!(t.collection_pattern(), "accounts/*/departments/*/terms");
        assert_eq!(t.literal_prefix(), "accounts/");
        assert_eq!(t.root_collection(), Some("accounts"));
    }

    #[test]
    fn rejects_grammar_violations() {
        assert_eq!(PathTemplate::parse(""), Err(TemplateError::EmptySegment));
        assert_eq!(
            PathTemplate::parse("departments//{id}"),
            Err(TemplateError::EmptySegment)
        );
        assert_eq!(
            PathTemplate::parse("departments/{name}"),
            Err(TemplateError::MissingId)
        );
        assert_eq!(
            PathTemplate::parse("{id}/terms/{id}"),
            Err(TemplateError::DuplicatePlaceholder("id".into()))
        );
        assert_eq!(
            PathTemplate::parse("x/{id}/y/{id2}"),
            Err(TemplateError::MissingId)
        );
        assert!(matches!(
            PathTemplate::parse("dep{artments/{id}"),
            Err(TemplateError::MalformedSegment(_))
        ));
        assert!(matches!(
            PathTemplate::parse("departments/{}/{id}"),
            Err(TemplateError::MalformedSegment(_))
        ));
    }

    #[test]
    fn renders_and_captures() {
        let t = PathTemplate::parse("accounts/{account}/departments/{id}").unwrap();
        let path = t
            .render(&values(&[("account", "u1"), ("id", "CS")]))
            .unwrap();
        assert_eq!(path, "accounts/u1/departments/CS");
        assert_eq!(
            t.capture(&path),
            Some(values(&[("account", "u1"), ("id", "CS")]))
        );
    }

    #[test]
    fn capture_rejects_other_shapes() {
        let t = PathTemplate::parse("accounts/{account}/departments/{id}").unwrap();
        assert!(t.capture("accounts/u1/terms/T1").is_none());
        assert!(t.capture("accounts/u1/departments/CS/terms/T1").is_none());
        assert!(t.capture("accounts/u1/departments").is_none());
    }

    #[test]
    fn render_rejects_unsafe_values() {
        let t = PathTemplate::parse("departments/{id}").unwrap();
        assert_eq!(
            t.render(&BTreeMap::new()),
            Err(TemplateError::MissingValue("id".into()))
        );
        assert!(matches!(
            t.render(&values(&[("id", "a/b")])),
            Err(TemplateError::InvalidValue { .. })
        ));
        assert!(matches!(
            t.render(&values(&[("id", "")])),
            Err(TemplateError::InvalidValue { .. })
        ));
    }

    #[test]
    fn overlapping_collections_are_shared() {
        let general = PathTemplate::parse("departments/{department}/terms/{id}").unwrap();
        let concrete = PathTemplate::parse("departments/CS/terms/{id}").unwrap();
        let other = PathTemplate::parse("departments/CS/units/{id}").unwrap();
        let deeper = PathTemplate::parse("departments/{department}/terms/{term}/units/{id}").unwrap();

        assert!(general.shares_collection(&concrete));
        assert!(concrete.shares_collection(&general));
        assert!(!general.shares_collection(&other));
        assert!(!general.shares_collection(&deeper));
    }

    #[test]
    fn root_template_has_empty_pattern_parts() {
        let t = PathTemplate::parse("{id}").unwrap();
        assert_eq!(t.collection_pattern(), "");
        assert_eq!(t.literal_prefix(), "");
        assert_eq!(t.root_collection(), None);
    }
}
