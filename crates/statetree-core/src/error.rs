use thiserror::Error;

/// Errors surfaced by engine operations.
///
/// Reads, listener registration, and batch boundaries never fail; only the
/// mutating surface and cyclic evaluation produce errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A computed node without a write function was asked to mutate.
    #[error("computed node has no write function")]
    ReadOnlyComputed,
    /// A computed read function reached itself, directly or transitively.
    #[error("cyclic computed evaluation")]
    CyclicEvaluation,
    /// `assign` needs an object-shaped target and an object-shaped partial.
    #[error("value at path is not an object")]
    NotAnObject,
    /// The tree root has no parent to delete it from.
    #[error("cannot delete the tree root")]
    DeleteRoot,
}
