//! Frequency storage for token sequences.
//!
//! The counter is the backing store of every n-gram model: it records how
//! often each sequence of token indices has been observed and answers the
//! aggregate queries the smoothing methods need (context totals, distinct
//! successor tiers, counts-of-counts, top successors).

mod trie;

pub use trie::MapTrieCounter;
