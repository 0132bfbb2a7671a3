//! Fine-grained reactive state tree.
//!
//! A [`Store`] holds observable trees of JSON-shaped values plus computed
//! nodes derived from them. Reads are tracked automatically, computed nodes
//! recompute lazily when a dependency changed, and writes batch into one
//! coalesced notification per observed node.
//!
//! ```
//! use serde_json::json;
//! use statetree_core::Store;
//!
//! let store = Store::new();
//! let state = store.observable(json!({"test": 10, "test2": 20}));
//! let a = state.key("test");
//! let b = state.key("test2");
//! let sum = store.computed(move || {
//!     json!(a.get().and_then(|v| v.as_i64()).unwrap_or(0)
//!         + b.get().and_then(|v| v.as_i64()).unwrap_or(0))
//! });
//! assert_eq!(sum.get().unwrap(), Some(json!(30)));
//!
//! state.key("test").set(json!(5));
//! assert_eq!(sum.get().unwrap(), Some(json!(25)));
//! ```

mod batch;
mod computed;
mod diff;
mod error;
mod events;
mod node;
mod observable;
mod store;
mod track;

pub use computed::{Computed, Deferred, Eval};
pub use error::StoreError;
pub use events::{ChangeEvent, ChangeRecord, Equality, ObserveOptions, SubscriptionId, Tracking};
pub use node::{NodeId, NodeKind};
pub use observable::{Observable, Resolver};
pub use store::Store;
pub use track::DependencySet;

pub use statetree_pointer::{Path, Step};

/// Returns the crate version at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
