//! Call graph walking over the project index.
//!
//! Call sites are resolved statically against [`ProjectIndex`](super::index::ProjectIndex);
//! only definitions the [`UserCodePolicy`] accepts are followed.

mod symbol;
mod policy;
mod walker;

pub use symbol::SymbolId;
pub use policy::UserCodePolicy;
pub use walker::CallGraphWalker;
