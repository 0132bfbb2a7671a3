//! Typed path steps.

use std::fmt;

/// One step in a path through a JSON-shaped tree.
///
/// Unlike a raw pointer token, a step distinguishes object keys from array
/// indices so that consumers (change records, node reconciliation) never
/// re-guess what a `"0"` token addressed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    /// Object member key.
    Key(String),
    /// Array element index.
    Index(usize),
    /// The `-` token: one past the end of an array.
    Append,
}

/// A full path from a tree root.
pub type Path = Vec<Step>;

impl Step {
    /// Convenience constructor for key steps.
    pub fn key(key: impl Into<String>) -> Self {
        Step::Key(key.into())
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Key(key) => write!(f, "{key}"),
            Step::Index(idx) => write!(f, "{idx}"),
            Step::Append => write!(f, "-"),
        }
    }
}

impl From<&str> for Step {
    fn from(key: &str) -> Self {
        Step::Key(key.to_string())
    }
}

impl From<String> for Step {
    fn from(key: String) -> Self {
        Step::Key(key)
    }
}

impl From<usize> for Step {
    fn from(index: usize) -> Self {
        Step::Index(index)
    }
}
