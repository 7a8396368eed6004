// docstore-core/src/path.rs
//! Parsed dotted field paths
//!
//! `"courses.$.grade"` parses once into `[Field("courses"), Positional, Field("grade")]`
//! and is resolved against documents at apply time.

use std::fmt;

use crate::error::{DocStoreError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Object key; also an array index when it is all digits and the
    /// value being traversed is an array
    Field(String),
    /// `$`: index of the array element matched by the query filter
    Positional,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<PathSegment>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(DocStoreError::InvalidPath {
                path: raw.to_string(),
                reason: "empty path".to_string(),
            });
        }

        let mut segments = Vec::new();
        for part in raw.split('.') {
            let segment = match part {
                "" => {
                    return Err(DocStoreError::InvalidPath {
                        path: raw.to_string(),
                        reason: "empty path segment".to_string(),
                    })
                }
                "$" => PathSegment::Positional,
                _ if part.starts_with('$') => {
                    return Err(DocStoreError::InvalidPath {
                        path: raw.to_string(),
                        reason: format!("unsupported path operator '{}'", part),
                    })
                }
                _ => PathSegment::Field(part.to_string()),
            };
            segments.push(segment);
        }

        Ok(FieldPath {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn has_positional(&self) -> bool {
        self.segments.contains(&PathSegment::Positional)
    }

    /// Top-level field name, if the path starts with one
    pub fn root(&self) -> Option<&str> {
        match self.segments.first() {
            Some(PathSegment::Field(name)) => Some(name),
            _ => None,
        }
    }

    /// Field names only; fails if the path contains `$`
    pub fn field_names(&self) -> Result<Vec<&str>> {
        self.segments
            .iter()
            .map(|segment| match segment {
                PathSegment::Field(name) => Ok(name.as_str()),
                PathSegment::Positional => Err(DocStoreError::InvalidPath {
                    path: self.raw.clone(),
                    reason: "positional '$' is only valid in update paths".to_string(),
                }),
            })
            .collect()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Array index encoded in a path segment ("0", "12")
pub(crate) fn segment_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}
