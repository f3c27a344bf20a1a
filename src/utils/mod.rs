//! Small self-contained data structures and graph algorithms used by the analysis.

mod bitset;
mod scc;

pub use bitset::{BitSet, BitSetIter};
pub use scc::{component_index, strongly_connected_components};
