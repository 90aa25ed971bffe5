//! Binary encodings and the on-disk program cache.
//!
//! Analysis results are expensive to recompute for library code that rarely
//! changes, so SSA programs are persisted between runs:
//!
//! - [`SymbolTable`] - concurrent string interning shared by every encoder
//! - [`ProgramIO`] - versioned encoding of one [`crate::model::Program`]
//! - [`CallGraphIO`] - encoding of a [`crate::callgraph::CallGraph`]
//! - [`DiskProgramCache`] - checksummed entries keyed by method and input
//!
//! Blobs store symbol indices instead of strings, so they can only be decoded
//! against the tables they were written with. [`DiskProgramCache`] persists and
//! restores those tables.

mod callgraphio;
pub mod io;
mod programio;
mod store;
mod symbols;

pub use callgraphio::CallGraphIO;
pub use programio::{ProgramIO, FORMAT_VERSION};
pub use store::{CacheKey, CacheStats, DiskProgramCache};
pub use symbols::SymbolTable;
