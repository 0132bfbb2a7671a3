//! Path segments and JSON Pointer (RFC 6901) utilities for statetree.
//!
//! The reactive tree addresses every node by a sequence of [`Step`]s. This
//! crate owns that segment type plus the pointer-string conversions and the
//! read-only navigation helpers used by the engine and by change records.
//!
//! # Example
//!
//! ```
//! use statetree_pointer::{parse_pointer, format_pointer, value_at, Step};
//!
//! let path = parse_pointer("/users/0/name").unwrap();
//! assert_eq!(
//!     path,
//!     vec![
//!         Step::Key("users".to_string()),
//!         Step::Index(0),
//!         Step::Key("name".to_string()),
//!     ]
//! );
//! assert_eq!(format_pointer(&path), "/users/0/name");
//!
//! let doc = serde_json::json!({"users": [{"name": "ada"}]});
//! assert_eq!(value_at(&doc, &path), Some(&serde_json::json!("ada")));
//! ```

use thiserror::Error;

mod get;
mod types;

pub use get::{split_parent, value_at, value_at_mut};
pub use types::{Path, Step};

/// Errors produced while parsing pointer strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PointerError {
    /// A non-empty pointer must start with `/`.
    #[error("json pointer must be absolute or empty")]
    NotAbsolute,
}

/// Unescapes one JSON Pointer token component.
///
/// Per RFC 6901, `~1` is replaced with `/` and `~0` is replaced with `~`.
///
/// ```
/// use statetree_pointer::unescape_component;
///
/// assert_eq!(unescape_component("a~0b"), "a~b");
/// assert_eq!(unescape_component("c~1d"), "c/d");
/// assert_eq!(unescape_component("no-escapes"), "no-escapes");
/// ```
pub fn unescape_component(component: &str) -> String {
    if !component.contains('~') {
        return component.to_string();
    }
    // Order matters: ~1 must be replaced before ~0.
    component.replace("~1", "/").replace("~0", "~")
}

/// Escapes one JSON Pointer token component.
///
/// Per RFC 6901, `/` is replaced with `~1` and `~` is replaced with `~0`.
///
/// ```
/// use statetree_pointer::escape_component;
///
/// assert_eq!(escape_component("a~b"), "a~0b");
/// assert_eq!(escape_component("c/d"), "c~1d");
/// ```
pub fn escape_component(component: &str) -> String {
    if !component.contains('/') && !component.contains('~') {
        return component.to_string();
    }
    // Order matters: ~ must be escaped before /.
    component.replace('~', "~0").replace('/', "~1")
}

/// Parse an absolute RFC 6901 pointer into typed path steps.
///
/// The empty pointer is the root path. Tokens that parse as `usize` become
/// [`Step::Index`], the `-` token becomes [`Step::Append`], everything else
/// is an object key.
///
/// ```
/// use statetree_pointer::{parse_pointer, Step};
///
/// assert_eq!(parse_pointer("").unwrap(), vec![]);
/// assert_eq!(
///     parse_pointer("/a~1b/2/-").unwrap(),
///     vec![
///         Step::Key("a/b".to_string()),
///         Step::Index(2),
///         Step::Append,
///     ]
/// );
/// assert!(parse_pointer("a/b").is_err());
/// ```
pub fn parse_pointer(pointer: &str) -> Result<Path, PointerError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    if !pointer.starts_with('/') {
        return Err(PointerError::NotAbsolute);
    }
    let mut out = Vec::new();
    for token in pointer[1..].split('/') {
        if token == "-" {
            out.push(Step::Append);
            continue;
        }
        let unescaped = unescape_component(token);
        // Only canonical digit runs are indices; "01" and "+5" stay keys.
        let is_index = !unescaped.is_empty()
            && unescaped.chars().all(|c| c.is_ascii_digit())
            && (unescaped == "0" || !unescaped.starts_with('0'));
        match is_index.then(|| unescaped.parse::<usize>().ok()).flatten() {
            Some(idx) => out.push(Step::Index(idx)),
            None => out.push(Step::Key(unescaped)),
        }
    }
    Ok(out)
}

/// Format path steps back into an RFC 6901 pointer string.
///
/// ```
/// use statetree_pointer::{format_pointer, Step};
///
/// assert_eq!(format_pointer(&[]), "");
/// assert_eq!(
///     format_pointer(&[Step::Key("a/b".into()), Step::Index(2)]),
///     "/a~1b/2"
/// );
/// ```
pub fn format_pointer(path: &[Step]) -> String {
    let mut out = String::new();
    for step in path {
        out.push('/');
        match step {
            Step::Key(key) => out.push_str(&escape_component(key)),
            Step::Index(idx) => out.push_str(&idx.to_string()),
            Step::Append => out.push('-'),
        }
    }
    out
}
