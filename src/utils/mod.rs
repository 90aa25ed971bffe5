//! Shared building blocks: dense bit sets and directed graph algorithms.

mod bitset;
pub mod graph;

pub use bitset::{BitSet, BitSetIter};
