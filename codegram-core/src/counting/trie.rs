use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Highest occurrence count tracked by the counts-of-counts table.
/// Discount estimation never looks past n4.
const TRACKED_COUNTS: usize = 4;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
struct TrieNode {
	/// How often the sequence ending at this node was observed as a whole.
	count: u64,
	successors: HashMap<usize, TrieNode>,
}

impl TrieNode {
	fn walk(&self, sequence: &[usize]) -> Option<&TrieNode> {
		let mut node = self;
		for key in sequence {
			node = node.successors.get(key)?;
		}
		Some(node)
	}

	fn merge(&mut self, other: &TrieNode) {
		self.count += other.count;
		for (key, child) in &other.successors {
			self.successors.entry(*key).or_default().merge(child);
		}
	}
}

/// Nested-map frequency trie over token-index sequences.
///
/// # Responsibilities
/// - Store an occurrence count per observed sequence, keyed by its token
///   indices, with shared prefixes sharing trie paths.
/// - Maintain incremental counts-of-counts tables per sequence length so the
///   absolute-discounting estimators get n1..n4 in constant time.
/// - Answer context totals: the count of a sequence's context is the count
///   stored for the sequence minus its last token, with the empty context
///   backed by the total number of unigram observations.
///
/// # Invariants
/// - Counting touches only the terminal node of the given sequence. Models
///   that need every order populated count each suffix explicitly.
/// - Uncounting prunes nodes whose count reached zero and which have no
///   remaining successors, so forgetting everything restores an empty trie.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct MapTrieCounter {
	root: TrieNode,
	/// Per sequence length (1-based), how many distinct sequences currently
	/// have count 1, 2, 3 and 4.
	counts_of_counts: Vec<[u64; TRACKED_COUNTS]>,
}

impl MapTrieCounter {
	pub fn new() -> Self {
		Self::default()
	}

	/// Total number of unigram observations, i.e. the count of the empty
	/// context.
	pub fn total(&self) -> u64 {
		self.root.count
	}

	/// Record one occurrence of `sequence`.
	pub fn count(&mut self, sequence: &[usize]) {
		if sequence.is_empty() {
			return;
		}
		let mut node = &mut self.root;
		for key in sequence {
			node = node.successors.entry(*key).or_default();
		}
		node.count += 1;
		let new = node.count;
		self.tally(sequence.len(), new - 1, new);
		if sequence.len() == 1 {
			self.root.count += 1;
		}
	}

	/// Remove one occurrence of `sequence`. Does nothing if the sequence was
	/// never observed.
	pub fn uncount(&mut self, sequence: &[usize]) {
		if sequence.is_empty() {
			return;
		}
		if let Some((old, new)) = Self::uncount_walk(&mut self.root, sequence) {
			self.tally(sequence.len(), old, new);
			if sequence.len() == 1 {
				self.root.count -= 1;
			}
		}
	}

	fn uncount_walk(node: &mut TrieNode, sequence: &[usize]) -> Option<(u64, u64)> {
		let key = sequence[0];
		let child = node.successors.get_mut(&key)?;
		let transition = if sequence.len() == 1 {
			if child.count == 0 {
				None
			} else {
				child.count -= 1;
				Some((child.count + 1, child.count))
			}
		} else {
			Self::uncount_walk(child, &sequence[1..])
		};
		if child.count == 0 && child.successors.is_empty() {
			node.successors.remove(&key);
		}
		transition
	}

	/// Record one occurrence of every sequence in the batch.
	pub fn count_batch<'a, I>(&mut self, sequences: I)
	where
		I: IntoIterator<Item = &'a [usize]>,
	{
		for sequence in sequences {
			self.count(sequence);
		}
	}

	/// Remove one occurrence of every sequence in the batch.
	pub fn uncount_batch<'a, I>(&mut self, sequences: I)
	where
		I: IntoIterator<Item = &'a [usize]>,
	{
		for sequence in sequences {
			self.uncount(sequence);
		}
	}

	/// Count of `sequence` together with the count of its context (the
	/// sequence minus its last token). A unigram's context is the empty
	/// sequence, whose count is the total number of unigram observations.
	pub fn get_counts(&self, sequence: &[usize]) -> (u64, u64) {
		if sequence.is_empty() {
			return (0, self.root.count);
		}
		let count = self.root.walk(sequence).map_or(0, |node| node.count);
		let context = self
			.root
			.walk(&sequence[..sequence.len() - 1])
			.map_or(0, |node| node.count);
		(count, context)
	}

	/// Count how many distinct successors of `context` fall in each
	/// occurrence tier. Tiers `1..range` count successors seen exactly that
	/// often; the last tier counts successors seen `range` or more times.
	/// With `range == 1` this yields the single N1+ value.
	pub fn get_distinct_counts(&self, range: usize, context: &[usize]) -> Vec<u64> {
		let mut tiers = vec![0u64; range.max(1)];
		let Some(node) = self.root.walk(context) else {
			return tiers;
		};
		for child in node.successors.values() {
			let count = child.count as usize;
			if count > 0 {
				tiers[count.min(range) - 1] += 1;
			}
		}
		tiers
	}

	/// Number of distinct sequences of length `length` currently observed
	/// exactly `occurrences` times. Tracked incrementally for occurrence
	/// counts 1 through 4; anything else reports zero.
	pub fn get_count_of_count(&self, length: usize, occurrences: usize) -> u64 {
		if length == 0 || occurrences == 0 || occurrences > TRACKED_COUNTS {
			return 0;
		}
		self.counts_of_counts
			.get(length - 1)
			.map_or(0, |tiers| tiers[occurrences - 1])
	}

	/// The most frequent successors of `context`, ordered by count descending
	/// with ties broken by ascending token index, at most `limit` of them.
	pub fn get_top_successors(&self, context: &[usize], limit: usize) -> Vec<usize> {
		let Some(node) = self.root.walk(context) else {
			return Vec::new();
		};
		let mut ranked: Vec<(usize, u64)> = node
			.successors
			.iter()
			.filter(|(_, child)| child.count > 0)
			.map(|(key, child)| (*key, child.count))
			.collect();
		ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
		ranked.truncate(limit);
		ranked.into_iter().map(|(key, _)| key).collect()
	}

	/// Fold another counter's observations into this one.
	pub fn merge(&mut self, other: &MapTrieCounter) {
		self.root.merge(&other.root);
		self.rebuild_counts_of_counts();
	}

	fn tally(&mut self, length: usize, old: u64, new: u64) {
		if self.counts_of_counts.len() < length {
			self.counts_of_counts
				.resize(length, [0; TRACKED_COUNTS]);
		}
		let tiers = &mut self.counts_of_counts[length - 1];
		if (1..=TRACKED_COUNTS as u64).contains(&old) {
			tiers[old as usize - 1] -= 1;
		}
		if (1..=TRACKED_COUNTS as u64).contains(&new) {
			tiers[new as usize - 1] += 1;
		}
	}

	fn rebuild_counts_of_counts(&mut self) {
		self.counts_of_counts.clear();
		Self::rebuild_walk(&self.root.successors, 1, &mut self.counts_of_counts);
	}

	fn rebuild_walk(
		successors: &HashMap<usize, TrieNode>,
		depth: usize,
		tables: &mut Vec<[u64; TRACKED_COUNTS]>,
	) {
		for child in successors.values() {
			if child.count >= 1 && child.count <= TRACKED_COUNTS as u64 {
				if tables.len() < depth {
					tables.resize(depth, [0; TRACKED_COUNTS]);
				}
				tables[depth - 1][child.count as usize - 1] += 1;
			}
			Self::rebuild_walk(&child.successors, depth + 1, tables);
		}
	}
}
