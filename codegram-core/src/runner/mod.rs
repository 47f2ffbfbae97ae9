//! Orchestration of lexing, translation, modeling and evaluation.
//!
//! [`ModelRunner`] ties a model, a lexer runner and a vocabulary together
//! and exposes corpus-level operations: training, entropy evaluation,
//! prediction evaluation and text completion.

mod local_global;
mod stats;

pub use local_global::LocalGlobalRunner;
pub use stats::Summary;

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::lexing::LexerRunner;
use crate::model::persist::{self, VOCABULARY_FILE};
use crate::model::{Model, ProbConf};
use crate::vocabulary::{Vocabulary, END_OF_STRING};

/// Default number of ranked candidates a prediction is judged against.
pub const DEFAULT_PREDICTION_CUTOFF: usize = 10;
/// Default ceiling on tokens appended by completion.
pub const DEFAULT_COMPLETION_CAP: usize = 100;

/// Collapse a probability/confidence pair into a single probability:
/// the confident part of the estimate plus the unconfident remainder
/// spread uniformly over the vocabulary.
pub fn to_probability(scored: ProbConf, vocabulary_size: usize) -> f64 {
	let uniform = if vocabulary_size == 0 {
		0.0
	} else {
		1.0 / vocabulary_size as f64
	};
	scored.prob * scored.conf + (1.0 - scored.conf) * uniform
}

/// Shannon information content of a probability, in bits.
pub fn to_entropy(probability: f64) -> f64 {
	-probability.log2()
}

/// Reciprocal rank of the actual token within the ranked candidates,
/// zero when absent.
pub fn to_mrr(rank: Option<usize>) -> f64 {
	match rank {
		Some(rank) => 1.0 / (rank + 1) as f64,
		None => 0.0,
	}
}

/// Translate lexed lines into index sequences, one per unit: per line, or
/// one flattened sequence for the whole file.
fn sequences(
	vocabulary: &RefCell<Vocabulary>,
	lines: Vec<Vec<String>>,
	per_line: bool,
) -> Vec<Vec<usize>> {
	let mut vocabulary = vocabulary.borrow_mut();
	if per_line {
		lines
			.into_iter()
			.map(|line| vocabulary.to_indices(line))
			.collect()
	} else {
		vec![vocabulary.to_indices(lines.into_iter().flatten())]
	}
}

/// Teach `model` everything under `path` (a file or a directory), notifying
/// it per file. Unreadable files are skipped with a warning. Returns the
/// number of tokens learned.
pub(crate) fn learn_path(
	model: &mut dyn Model,
	lexer: &LexerRunner,
	vocabulary: &RefCell<Vocabulary>,
	path: &Path,
) -> u64 {
	let mut tokens = 0;
	for lexed in lexer.lex_directory(path) {
		match lexed {
			Ok((file, lines)) => {
				model.notify(&file);
				for sequence in sequences(vocabulary, lines, lexer.per_line()) {
					tokens += sequence.len() as u64;
					model.learn(&sequence);
				}
			}
			Err(err) => warn!(error = %err, "skipping unreadable file"),
		}
	}
	tokens
}

/// Remove everything under `path` (a file or a directory) from `model`.
/// Returns the number of tokens forgotten.
pub(crate) fn forget_path(
	model: &mut dyn Model,
	lexer: &LexerRunner,
	vocabulary: &RefCell<Vocabulary>,
	path: &Path,
) -> u64 {
	let mut tokens = 0;
	for lexed in lexer.lex_directory(path) {
		match lexed {
			Ok((_, lines)) => {
				for sequence in sequences(vocabulary, lines, lexer.per_line()) {
					tokens += sequence.len() as u64;
					model.forget(&sequence);
				}
			}
			Err(err) => warn!(error = %err, "skipping unreadable file"),
		}
	}
	tokens
}

/// Knobs for text completion.
pub struct CompletionOptions {
	/// Hard cap on appended tokens, in case no end-of-sentence is reached.
	pub max_tokens: usize,
	/// Probability of sampling the next token from the candidate
	/// distribution instead of taking the top candidate. Must lie in
	/// `[0, 1]`.
	pub randomness: f64,
}

impl Default for CompletionOptions {
	fn default() -> Self {
		CompletionOptions {
			max_tokens: DEFAULT_COMPLETION_CAP,
			randomness: 0.0,
		}
	}
}

#[derive(Clone, Copy)]
enum Evaluation {
	Entropy,
	Rank,
}

/// Drives a model over files, directories and raw content.
///
/// # Responsibilities
/// - Lex and translate input, then hand index sequences to the model at
///   the granularity fixed by the lexer runner (per line or whole file).
/// - Notify the model exactly once per file, before any of its content.
/// - Evaluate: per-token entropies from the probability/confidence
///   reduction, and per-token reciprocal ranks from ranked predictions.
/// - Self-testing: forget each unit before scoring it and re-learn it
///   afterwards, so a model trained on a corpus can be evaluated on that
///   same corpus without leakage.
/// - Keep evaluation from polluting the vocabulary, by checkpointing it
///   around scoring and rolling back afterwards.
pub struct ModelRunner<M: Model = Box<dyn Model>> {
	model: M,
	lexer: Rc<LexerRunner>,
	vocabulary: Rc<RefCell<Vocabulary>>,
	self_testing: bool,
	prediction_cutoff: usize,
}

impl<M: Model> ModelRunner<M> {
	pub fn new(model: M, lexer: Rc<LexerRunner>, vocabulary: Rc<RefCell<Vocabulary>>) -> Self {
		ModelRunner {
			model,
			lexer,
			vocabulary,
			self_testing: false,
			prediction_cutoff: DEFAULT_PREDICTION_CUTOFF,
		}
	}

	pub fn model(&self) -> &M {
		&self.model
	}

	pub fn model_mut(&mut self) -> &mut M {
		&mut self.model
	}

	pub fn lexer(&self) -> &Rc<LexerRunner> {
		&self.lexer
	}

	pub fn vocabulary(&self) -> &Rc<RefCell<Vocabulary>> {
		&self.vocabulary
	}

	pub fn self_testing(&self) -> bool {
		self.self_testing
	}

	pub fn set_self_testing(&mut self, self_testing: bool) {
		self.self_testing = self_testing;
	}

	pub fn prediction_cutoff(&self) -> usize {
		self.prediction_cutoff
	}

	/// Set how many ranked candidates predictions are judged against.
	/// Negative values are clamped to zero with a warning.
	pub fn set_prediction_cutoff(&mut self, cutoff: i64) {
		if cutoff < 0 {
			warn!(cutoff, "negative prediction cutoff, clamping to zero");
			self.prediction_cutoff = 0;
		} else {
			self.prediction_cutoff = cutoff as usize;
		}
	}

	/// Train on every lexable file under `root`. Returns the number of
	/// tokens learned.
	pub fn learn_directory(&mut self, root: &Path) -> Result<u64> {
		let mut tokens = 0;
		let mut files = 0u64;
		let lexer = Rc::clone(&self.lexer);
		for lexed in lexer.lex_directory(root) {
			match lexed {
				Ok((file, lines)) => {
					self.model.notify(&file);
					tokens += self.learn_lines(lines);
					files += 1;
				}
				Err(err) => warn!(error = %err, "skipping unreadable file"),
			}
		}
		info!(root = %root.display(), files, tokens, "learned directory");
		Ok(tokens)
	}

	/// Train on one file. Files rejected by the lexer's filter are ignored.
	pub fn learn_file(&mut self, path: &Path) -> Result<u64> {
		if !self.lexer.will_lex_file(path) {
			return Ok(0);
		}
		let lines = self.lexer.lex_file(path)?;
		self.model.notify(path);
		Ok(self.learn_lines(lines))
	}

	/// Train on raw content, without any file notification.
	pub fn learn_content(&mut self, content: &str) -> u64 {
		let lines = self.lexer.lex_text(content);
		self.learn_lines(lines)
	}

	pub fn forget_directory(&mut self, root: &Path) -> Result<u64> {
		let mut tokens = 0;
		let lexer = Rc::clone(&self.lexer);
		for lexed in lexer.lex_directory(root) {
			match lexed {
				Ok((_, lines)) => tokens += self.forget_lines(lines),
				Err(err) => warn!(error = %err, "skipping unreadable file"),
			}
		}
		Ok(tokens)
	}

	pub fn forget_file(&mut self, path: &Path) -> Result<u64> {
		if !self.lexer.will_lex_file(path) {
			return Ok(0);
		}
		let lines = self.lexer.lex_file(path)?;
		Ok(self.forget_lines(lines))
	}

	pub fn forget_content(&mut self, content: &str) -> u64 {
		let lines = self.lexer.lex_text(content);
		self.forget_lines(lines)
	}

	fn learn_lines(&mut self, lines: Vec<Vec<String>>) -> u64 {
		let mut tokens = 0;
		for sequence in sequences(&self.vocabulary, lines, self.lexer.per_line()) {
			tokens += sequence.len() as u64;
			self.model.learn(&sequence);
		}
		tokens
	}

	fn forget_lines(&mut self, lines: Vec<Vec<String>>) -> u64 {
		let mut tokens = 0;
		for sequence in sequences(&self.vocabulary, lines, self.lexer.per_line()) {
			tokens += sequence.len() as u64;
			self.model.forget(&sequence);
		}
		tokens
	}

	/// Per-token entropies for one file, line by line. `None` if the
	/// lexer's filter rejects the file.
	pub fn model_file(&mut self, path: &Path) -> Result<Option<Vec<Vec<f64>>>> {
		self.evaluate_file(path, Evaluation::Entropy)
	}

	/// Per-token entropies for raw content.
	pub fn model_content(&mut self, content: &str) -> Vec<Vec<f64>> {
		let lines = self.lexer.lex_text(content);
		self.evaluate_lines(lines, Evaluation::Entropy)
	}

	/// Per-token entropies for every lexable file under `root`.
	pub fn model_directory(&mut self, root: &Path) -> Result<Vec<(PathBuf, Vec<Vec<f64>>)>> {
		self.collect_directory(root, Evaluation::Entropy)
	}

	/// Stream per-file entropies under `root` to `consumer`, returning the
	/// aggregated summary.
	pub fn model_directory_with<F>(&mut self, root: &Path, consumer: F) -> Result<Summary>
	where
		F: FnMut(&Path, &[Vec<f64>]),
	{
		self.evaluate_directory_with(root, Evaluation::Entropy, consumer)
	}

	/// Per-token reciprocal ranks for one file. `None` if the lexer's
	/// filter rejects the file.
	pub fn predict_file(&mut self, path: &Path) -> Result<Option<Vec<Vec<f64>>>> {
		self.evaluate_file(path, Evaluation::Rank)
	}

	/// Per-token reciprocal ranks for raw content.
	pub fn predict_content(&mut self, content: &str) -> Vec<Vec<f64>> {
		let lines = self.lexer.lex_text(content);
		self.evaluate_lines(lines, Evaluation::Rank)
	}

	/// Per-token reciprocal ranks for every lexable file under `root`.
	pub fn predict_directory(&mut self, root: &Path) -> Result<Vec<(PathBuf, Vec<Vec<f64>>)>> {
		self.collect_directory(root, Evaluation::Rank)
	}

	/// Stream per-file reciprocal ranks under `root` to `consumer`,
	/// returning the aggregated summary.
	pub fn predict_directory_with<F>(&mut self, root: &Path, consumer: F) -> Result<Summary>
	where
		F: FnMut(&Path, &[Vec<f64>]),
	{
		self.evaluate_directory_with(root, Evaluation::Rank, consumer)
	}

	fn evaluate_file(&mut self, path: &Path, mode: Evaluation) -> Result<Option<Vec<Vec<f64>>>> {
		if !self.lexer.will_lex_file(path) {
			return Ok(None);
		}
		let lines = self.lexer.lex_file(path)?;
		self.model.notify(path);
		Ok(Some(self.evaluate_lines(lines, mode)))
	}

	fn collect_directory(
		&mut self,
		root: &Path,
		mode: Evaluation,
	) -> Result<Vec<(PathBuf, Vec<Vec<f64>>)>> {
		let mut results = Vec::new();
		self.evaluate_directory_with(root, mode, |file, values| {
			results.push((file.to_path_buf(), values.to_vec()));
		})?;
		Ok(results)
	}

	fn evaluate_directory_with<F>(&mut self, root: &Path, mode: Evaluation, mut consumer: F) -> Result<Summary>
	where
		F: FnMut(&Path, &[Vec<f64>]),
	{
		let mut summary = Summary::new();
		let lexer = Rc::clone(&self.lexer);
		for lexed in lexer.lex_directory(root) {
			match lexed {
				Ok((file, lines)) => {
					self.model.notify(&file);
					let values = self.evaluate_lines(lines, mode);
					summary.merge(&self.summarize_unit(&values));
					debug!(
						file = %file.display(),
						tokens = summary.count,
						running_mean = summary.mean(),
						"evaluated file"
					);
					consumer(&file, &values);
				}
				Err(err) => warn!(error = %err, "skipping unreadable file"),
			}
		}
		Ok(summary)
	}

	/// Evaluate one unit's lines, keeping the vocabulary as it was.
	fn evaluate_lines(&mut self, lines: Vec<Vec<String>>, mode: Evaluation) -> Vec<Vec<f64>> {
		self.vocabulary.borrow_mut().set_checkpoint();
		let values = if self.lexer.per_line() {
			let mut out = Vec::with_capacity(lines.len());
			for line in lines {
				let indices = self.vocabulary.borrow_mut().to_indices(line);
				out.push(self.evaluate_sequence(&indices, mode));
			}
			out
		} else {
			let lengths: Vec<usize> = lines.iter().map(Vec::len).collect();
			let flat = self
				.vocabulary
				.borrow_mut()
				.to_indices(lines.into_iter().flatten());
			let flat_values = self.evaluate_sequence(&flat, mode);
			let mut out = Vec::with_capacity(lengths.len());
			let mut cursor = 0;
			for length in lengths {
				out.push(flat_values[cursor..cursor + length].to_vec());
				cursor += length;
			}
			out
		};
		self.vocabulary.borrow_mut().restore_checkpoint();
		values
	}

	/// Evaluate one unit. Under self-testing the unit is forgotten first
	/// and re-learned afterwards.
	fn evaluate_sequence(&mut self, indices: &[usize], mode: Evaluation) -> Vec<f64> {
		if self.self_testing {
			self.model.forget(indices);
		}
		let size = self.vocabulary.borrow().size();
		let values = match mode {
			Evaluation::Entropy => self
				.model
				.model(indices)
				.into_iter()
				.map(|scored| to_entropy(to_probability(scored, size)))
				.collect(),
			Evaluation::Rank => {
				let predictions = self.model.predict(indices);
				indices
					.iter()
					.zip(predictions)
					.map(|(&actual, candidates)| {
						let mut ranked: Vec<(usize, f64)> = candidates
							.into_iter()
							.map(|(token, scored)| (token, to_probability(scored, size)))
							.collect();
						ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
						ranked.truncate(self.prediction_cutoff);
						to_mrr(ranked.iter().position(|&(token, _)| token == actual))
					})
					.collect()
			}
		};
		if self.self_testing {
			self.model.learn(indices);
		}
		values
	}

	/// Aggregate one unit's values, skipping the first token of each
	/// sequencing unit: its score reflects an empty context and would skew
	/// the averages.
	pub fn summarize_unit(&self, values: &[Vec<f64>]) -> Summary {
		let mut summary = Summary::new();
		if self.lexer.per_line() {
			for line in values {
				for &value in line.iter().skip(1) {
					summary.add(value);
				}
			}
		} else {
			let mut first = true;
			for line in values {
				for &value in line {
					if first {
						first = false;
						continue;
					}
					summary.add(value);
				}
			}
		}
		summary
	}

	/// Aggregate a whole evaluation run, file by file.
	pub fn summarize_files(&self, files: &[(PathBuf, Vec<Vec<f64>>)]) -> Summary {
		let mut summary = Summary::new();
		for (_, values) in files {
			summary.merge(&self.summarize_unit(values));
		}
		summary
	}

	/// The single best next-token suggestion for `code`, with its reduced
	/// probability.
	pub fn suggest(&mut self, code: &str) -> Option<(String, f64)> {
		self.suggest_top(code, 1).into_iter().next()
	}

	/// The `limit` best next-token suggestions for `code`, ranked by
	/// reduced probability.
	pub fn suggest_top(&mut self, code: &str, limit: usize) -> Vec<(String, f64)> {
		let tokens = self.lexer.lex_line(code);
		self.vocabulary.borrow_mut().set_checkpoint();
		let indices = self.vocabulary.borrow_mut().to_indices(tokens);
		// With markers the query ends in an end-of-sentence token; the
		// suggestion replaces it. Without markers it extends the sequence.
		let index = if self.lexer.has_sentence_markers() && !indices.is_empty() {
			indices.len() - 1
		} else {
			indices.len()
		};

		self.model.pause_dynamic();
		let predictions = self.model.predict_token(&indices, index);
		self.model.unpause_dynamic();

		let size = self.vocabulary.borrow().size();
		let mut ranked: Vec<(usize, f64)> = predictions
			.into_iter()
			.map(|(token, scored)| (token, to_probability(scored, size)))
			.collect();
		ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
		ranked.truncate(limit);

		let suggestions = {
			let vocabulary = self.vocabulary.borrow();
			ranked
				.into_iter()
				.map(|(token, probability)| (vocabulary.to_word(token).to_owned(), probability))
				.collect()
		};
		self.vocabulary.borrow_mut().restore_checkpoint();
		suggestions
	}

	/// Extend `code` one suggested token at a time, until an end-of-sentence
	/// token is suggested or the cap is reached.
	///
	/// # Errors
	/// [`Error::Config`] if the randomness is outside `[0, 1]`.
	pub fn complete(&mut self, code: &str, options: &CompletionOptions) -> Result<String> {
		if !(0.0..=1.0).contains(&options.randomness) {
			return Err(Error::Config(format!(
				"randomness must lie in [0, 1], got {}",
				options.randomness
			)));
		}
		let mut text = code.trim_end().to_owned();
		for _ in 0..options.max_tokens {
			let ranked = self.suggest_top(&text, self.prediction_cutoff.max(1));
			let Some((token, _)) = Self::choose(&ranked, options.randomness) else {
				break;
			};
			if token.as_str() == END_OF_STRING {
				break;
			}
			if !text.is_empty() {
				text.push(' ');
			}
			text.push_str(token);
		}
		Ok(text)
	}

	/// Pick a suggestion: the top one, or a probability-weighted sample
	/// with probability `randomness`.
	fn choose(ranked: &[(String, f64)], randomness: f64) -> Option<&(String, f64)> {
		if ranked.is_empty() {
			return None;
		}
		if randomness > 0.0 {
			let mut rng = rand::rng();
			if rng.random::<f64>() < randomness {
				let total: f64 = ranked.iter().map(|(_, probability)| probability).sum();
				if total > 0.0 {
					let mut target = rng.random_range(0.0..total);
					for entry in ranked {
						if target < entry.1 {
							return Some(entry);
						}
						target -= entry.1;
					}
				}
			}
		}
		ranked.first()
	}

	/// Persist the model and the vocabulary under `directory`.
	pub fn save(&self, directory: &Path) -> Result<()> {
		std::fs::create_dir_all(directory)?;
		self.model.save(directory)?;
		self.vocabulary
			.borrow()
			.write_tsv(&directory.join(VOCABULARY_FILE))
	}
}

impl ModelRunner<Box<dyn Model>> {
	/// Restore a runner persisted by [`ModelRunner::save`].
	pub fn load(directory: &Path, lexer: Rc<LexerRunner>) -> Result<Self> {
		let model = persist::load_model(directory)?;
		let vocabulary = Vocabulary::read_tsv(&directory.join(VOCABULARY_FILE))?;
		Ok(ModelRunner::new(
			model,
			lexer,
			Rc::new(RefCell::new(vocabulary)),
		))
	}
}
