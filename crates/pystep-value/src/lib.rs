//! Python-flavored value model and the stock [`ValueHost`] for the dispatch
//! engine: dynamic values with shared-handle containers, the source
//! language's operator semantics, and a native builtin registry.
//!
//! [`ValueHost`]: pystep_vm::ValueHost

pub mod builtins;
pub mod error;
pub mod host;
pub mod value;

pub use builtins::registry;
pub use error::ValueError;
pub use host::PyHost;
pub use value::{Builtin, BuiltinFn, IterState, ListMethod, PyValue, RangeValue, SliceValue};

use pystep_vm::Scopes;

/// Fresh scopes with empty locals and globals and the stock builtins
/// installed.
pub fn default_scopes() -> Scopes<PyValue> {
    let mut scopes = Scopes::new();
    scopes.builtins = registry();
    scopes
}
