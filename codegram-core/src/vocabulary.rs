use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Reserved token returned for anything the vocabulary does not know.
pub const UNKNOWN_TOKEN: &str = "<unk>";
/// Sentence-start marker prepended by the lexer when markers are enabled.
pub const BEGIN_OF_STRING: &str = "<s>";
/// Sentence-end marker appended by the lexer when markers are enabled.
pub const END_OF_STRING: &str = "</s>";

/// Bidirectional mapping between token strings and dense indices.
///
/// # Responsibilities
/// - Intern token strings into stable `usize` indices; the unknown token and
///   the sentence markers are reserved up front at indices 0, 1 and 2.
/// - Track an occurrence count per token, so a stored vocabulary can later be
///   inspected or truncated by frequency.
/// - Support closing (unknown tokens map to index 0 instead of growing the
///   vocabulary) and checkpoint/rollback so evaluation runs do not pollute
///   the token table.
///
/// # Invariants
/// - Indices are never reused: rolling back to a checkpoint drops the tokens
///   added since, and re-adding a dropped token assigns a fresh index at the
///   same position.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Vocabulary {
	word_indices: HashMap<String, usize>,
	words: Vec<String>,
	counts: Vec<u64>,
	closed: bool,
	checkpoint: usize,
}

impl Default for Vocabulary {
	fn default() -> Self {
		Self::new()
	}
}

impl Vocabulary {
	pub fn new() -> Self {
		let mut vocabulary = Vocabulary {
			word_indices: HashMap::new(),
			words: Vec::new(),
			counts: Vec::new(),
			closed: false,
			checkpoint: 0,
		};
		vocabulary.store(UNKNOWN_TOKEN, 0);
		vocabulary.store(BEGIN_OF_STRING, 0);
		vocabulary.store(END_OF_STRING, 0);
		vocabulary
	}

	/// Number of known tokens, unknown included.
	pub fn size(&self) -> usize {
		self.words.len()
	}

	/// Stop growing: unseen tokens translate to the unknown index.
	pub fn close(&mut self) {
		self.closed = true;
	}

	pub fn open(&mut self) {
		self.closed = false;
	}

	pub fn is_closed(&self) -> bool {
		self.closed
	}

	/// Remember the current size; `restore_checkpoint` rolls back to it.
	pub fn set_checkpoint(&mut self) {
		self.checkpoint = self.words.len();
	}

	/// Drop every token added since the last checkpoint.
	pub fn restore_checkpoint(&mut self) {
		for word in self.words.drain(self.checkpoint..) {
			self.word_indices.remove(&word);
		}
		self.counts.truncate(self.checkpoint);
	}

	/// Insert `token` with an explicit count, without touching the count if
	/// the token is already present. Returns the token's index.
	pub fn store(&mut self, token: &str, count: u64) -> usize {
		if let Some(&index) = self.word_indices.get(token) {
			return index;
		}
		let index = self.words.len();
		self.word_indices.insert(token.to_owned(), index);
		self.words.push(token.to_owned());
		self.counts.push(count);
		index
	}

	/// Translate a token to its index, interning it if the vocabulary is
	/// open. Closed vocabularies map unseen tokens to the unknown index.
	pub fn to_index(&mut self, token: &str) -> usize {
		match self.word_indices.get(token) {
			Some(&index) => {
				self.counts[index] += 1;
				index
			}
			None if self.closed => 0,
			None => self.store(token, 1),
		}
	}

	pub fn to_indices<I, S>(&mut self, tokens: I) -> Vec<usize>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		tokens
			.into_iter()
			.map(|token| self.to_index(token.as_ref()))
			.collect()
	}

	/// Translate an index back to its token. Out-of-range indices yield the
	/// unknown token.
	pub fn to_word(&self, index: usize) -> &str {
		self.words
			.get(index)
			.map_or(UNKNOWN_TOKEN, String::as_str)
	}

	pub fn to_words(&self, indices: &[usize]) -> Vec<String> {
		indices.iter().map(|&ix| self.to_word(ix).to_owned()).collect()
	}

	/// Occurrence count recorded for `token`, zero if unknown.
	pub fn get_count(&self, token: &str) -> u64 {
		self.word_indices
			.get(token)
			.map_or(0, |&index| self.counts[index])
	}

	/// Write the vocabulary as tab-separated `count\ttoken` lines, one per
	/// token, in index order.
	pub fn write_tsv(&self, path: &Path) -> Result<()> {
		let mut out = fs::File::create(path)?;
		for (word, count) in self.words.iter().zip(&self.counts) {
			writeln!(out, "{count}\t{word}")?;
		}
		Ok(())
	}

	/// Read a vocabulary previously written by `write_tsv`.
	pub fn read_tsv(path: &Path) -> Result<Vocabulary> {
		let content = fs::read_to_string(path)?;
		let mut vocabulary = Vocabulary::new();
		for (number, line) in content.lines().enumerate() {
			let Some((count, word)) = line.split_once('\t') else {
				return Err(Error::Load {
					path: path.to_path_buf(),
					reason: format!("line {}: expected count\\ttoken", number + 1),
				});
			};
			let count: u64 = count.parse().map_err(|_| Error::Load {
				path: path.to_path_buf(),
				reason: format!("line {}: invalid count {count:?}", number + 1),
			})?;
			vocabulary.store(word, count);
		}
		Ok(vocabulary)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reserved_tokens_hold_fixed_indices() {
		let vocabulary = Vocabulary::new();
		assert_eq!(vocabulary.size(), 3);
		assert_eq!(vocabulary.to_word(0), UNKNOWN_TOKEN);
		assert_eq!(vocabulary.to_word(1), BEGIN_OF_STRING);
		assert_eq!(vocabulary.to_word(2), END_OF_STRING);
		assert_eq!(vocabulary.to_word(999), UNKNOWN_TOKEN);
	}

	#[test]
	fn to_index_interns_and_counts() {
		let mut vocabulary = Vocabulary::new();
		let a = vocabulary.to_index("alpha");
		let b = vocabulary.to_index("beta");
		assert_eq!(vocabulary.to_index("alpha"), a);
		assert_ne!(a, b);
		assert_eq!(vocabulary.get_count("alpha"), 2);
		assert_eq!(vocabulary.to_word(a), "alpha");
	}

	#[test]
	fn closed_vocabulary_maps_unseen_to_unknown() {
		let mut vocabulary = Vocabulary::new();
		let a = vocabulary.to_index("alpha");
		vocabulary.close();
		assert_eq!(vocabulary.to_index("gamma"), 0);
		assert_eq!(vocabulary.to_index("alpha"), a);
		assert_eq!(vocabulary.size(), 4);
	}

	#[test]
	fn checkpoint_rolls_back_additions() {
		let mut vocabulary = Vocabulary::new();
		vocabulary.to_index("alpha");
		vocabulary.set_checkpoint();
		vocabulary.to_index("beta");
		vocabulary.to_index("gamma");
		assert_eq!(vocabulary.size(), 6);

		vocabulary.restore_checkpoint();
		assert_eq!(vocabulary.size(), 4);
		assert_eq!(vocabulary.get_count("beta"), 0);
		// A re-added token lands at the recycled position.
		assert_eq!(vocabulary.to_index("beta"), 4);
	}

	#[test]
	fn tsv_round_trip() {
		let mut vocabulary = Vocabulary::new();
		vocabulary.to_index("alpha");
		vocabulary.to_index("alpha");
		vocabulary.to_index("beta");

		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("vocabulary.tsv");
		vocabulary.write_tsv(&path).unwrap();

		let restored = Vocabulary::read_tsv(&path).unwrap();
		assert_eq!(restored.size(), 5);
		assert_eq!(restored.to_word(3), "alpha");
		assert_eq!(restored.get_count("alpha"), 2);
		assert_eq!(restored.get_count("beta"), 1);
	}

	#[test]
	fn read_tsv_rejects_malformed_lines() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("vocabulary.tsv");
		std::fs::write(&path, "not a valid line\n").unwrap();
		assert!(Vocabulary::read_tsv(&path).is_err());
	}
}
