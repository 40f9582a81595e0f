use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when parsing a qualified module name.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QualifiedNameError {
    #[error("qualified name is empty")]
    Empty,

    #[error("qualified name '{0}' contains an empty segment")]
    EmptySegment(String),

    #[error("invalid character '{ch}' in segment '{segment}'")]
    InvalidCharacter { segment: String, ch: char },
}

/// Hierarchical, dot-separated module name such as `Standard.Base.Data.Vector`.
///
/// The last segment is the module item, everything before it is the path
/// (namespace and library).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QualifiedName {
    segments: Vec<String>,
}

impl QualifiedName {
    pub fn new<I, S>(segments: I) -> Result<Self, QualifiedNameError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(QualifiedNameError::Empty);
        }
        for segment in &segments {
            validate_segment(segment, &segments)?;
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// All segments except the last one.
    pub fn path(&self) -> &[String] {
        &self.segments[..self.segments.len() - 1]
    }

    /// The last segment.
    pub fn item(&self) -> &str {
        // A QualifiedName always has at least one segment.
        &self.segments[self.segments.len() - 1]
    }
}

fn validate_segment(segment: &str, all: &[String]) -> Result<(), QualifiedNameError> {
    if segment.is_empty() {
        return Err(QualifiedNameError::EmptySegment(all.join(".")));
    }
    if let Some(ch) = segment.chars().find(|c| !(c.is_alphanumeric() || *c == '_')) {
        return Err(QualifiedNameError::InvalidCharacter {
            segment: segment.to_string(),
            ch,
        });
    }
    Ok(())
}

impl FromStr for QualifiedName {
    type Err = QualifiedNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(QualifiedNameError::Empty);
        }
        Self::new(s.split('.'))
    }
}

impl TryFrom<String> for QualifiedName {
    type Error = QualifiedNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<QualifiedName> for String {
    fn from(name: QualifiedName) -> Self {
        name.to_string()
    }
}

impl std::fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}
