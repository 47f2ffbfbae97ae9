use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::warn;

use crate::lexing::LexerRunner;
use crate::model::mix::MixPolicy;
use crate::model::{
	build_or_standard, DynamicState, IndexedModel, Model, ModelFactory, Predictions, ProbConf,
};
use crate::runner::{learn_path, forget_path};
use crate::vocabulary::Vocabulary;

/// A global model overlaid with a stack of per-directory local models.
///
/// The stack follows the file under test: one local model per non-trivial
/// directory on the path from the test root down to the file. Each level is
/// trained on its own subtree minus the subtree delegated to the level
/// below, and the file under test itself is held out of the innermost
/// level, so no level ever contains the file being scored.
///
/// Scoring folds the global model with the locals from outermost to
/// innermost under inverse confidence mixing. Corpus training (`learn`,
/// `forget`) reaches the global model only; the locals are managed entirely
/// by `notify`.
pub struct NestedModel {
	global: Box<dyn Model>,
	lexer: Rc<LexerRunner>,
	vocabulary: Rc<RefCell<Vocabulary>>,
	factory: ModelFactory,
	/// The test root, the lineage directories currently nested into, and
	/// finally the held-out file of the last notification.
	levels: Vec<PathBuf>,
	/// One local model per directory entry in `levels`.
	locals: Vec<Box<dyn Model>>,
	dynamics: DynamicState,
}

impl NestedModel {
	/// Build a nested model rooted at `test_root`, training the root-level
	/// local model on the root's whole subtree.
	pub fn new(
		global: Box<dyn Model>,
		lexer: Rc<LexerRunner>,
		vocabulary: Rc<RefCell<Vocabulary>>,
		test_root: &Path,
		factory: ModelFactory,
	) -> Self {
		let mut root_local = build_or_standard(&factory);
		learn_path(&mut *root_local, &lexer, &vocabulary, test_root);
		NestedModel {
			global,
			lexer,
			vocabulary,
			factory,
			levels: vec![test_root.to_path_buf()],
			locals: vec![root_local],
			dynamics: DynamicState::default(),
		}
	}

	pub fn test_root(&self) -> &Path {
		&self.levels[0]
	}

	pub fn global(&self) -> &dyn Model {
		&*self.global
	}

	pub fn global_mut(&mut self) -> &mut dyn Model {
		&mut *self.global
	}

	/// A directory counts as a nesting level only if it holds more than one
	/// entry, at least one of which is a subdirectory or a lexable file.
	fn is_nontrivial(&self, directory: &Path) -> bool {
		let Ok(entries) = fs::read_dir(directory) else {
			return false;
		};
		let paths: Vec<PathBuf> = entries
			.filter_map(|entry| entry.ok())
			.map(|entry| entry.path())
			.collect();
		paths.len() > 1
			&& paths
				.iter()
				.any(|path| path.is_dir() || self.lexer.will_lex_file(path))
	}

	/// The non-trivial directories from the test root down to `file`, root
	/// first. `None` if the file does not live under the root.
	fn lineage(&self, file: &Path) -> Option<Vec<PathBuf>> {
		let root = self.levels[0].clone();
		let mut lineage = Vec::new();
		let mut current = file.to_path_buf();
		loop {
			let parent = current.parent()?.to_path_buf();
			if parent.as_os_str().is_empty() {
				return None;
			}
			if parent == root {
				break;
			}
			if self.is_nontrivial(&parent) {
				lineage.push(parent.clone());
			}
			current = parent;
		}
		lineage.push(root);
		lineage.reverse();
		Some(lineage)
	}

	fn update_nesting(&mut self, next: &Path) {
		let Some(lineage) = self.lineage(next) else {
			warn!(file = %next.display(), "file is outside the test root, keeping current nesting");
			return;
		};

		// Unwind to the first level that diverges from the new lineage.
		// Whatever a discarded level covered (including the previously
		// held-out file) is re-learned into its parent first.
		let mut pos = 1;
		while pos < self.levels.len() {
			if pos >= lineage.len() || self.levels[pos] != lineage[pos] {
				let discarded = self.levels[pos].clone();
				learn_path(
					&mut *self.locals[pos - 1],
					&self.lexer,
					&self.vocabulary,
					&discarded,
				);
				self.levels.truncate(pos);
				self.locals.truncate(pos);
				break;
			}
			pos += 1;
		}

		// Nest into any new lineage levels: each new local learns its own
		// subtree, which its parent then stops covering.
		for level in lineage.iter().skip(self.levels.len()) {
			let mut local = build_or_standard(&self.factory);
			learn_path(&mut *local, &self.lexer, &self.vocabulary, level);
			if let Some(parent) = self.locals.last_mut() {
				forget_path(&mut **parent, &self.lexer, &self.vocabulary, level);
			}
			self.levels.push(level.clone());
			self.locals.push(local);
		}

		// Hold the file under test out of its closest local model.
		if let Some(leaf) = self.locals.last_mut() {
			forget_path(&mut **leaf, &self.lexer, &self.vocabulary, next);
		}
		self.levels.push(next.to_path_buf());

		self.global.notify(next);
		for local in &mut self.locals {
			local.notify(next);
		}
	}

	/// Fold the global score with each local's, outermost first.
	fn fold_scores(&mut self, input: &[usize], index: usize) -> ProbConf {
		let mut mixed = self.global.model_token(input, index);
		for local in &mut self.locals {
			mixed = MixPolicy::Inverse.mix(mixed, local.model_token(input, index));
		}
		mixed
	}
}

impl IndexedModel for NestedModel {
	fn dynamics(&self) -> &DynamicState {
		&self.dynamics
	}

	fn dynamics_mut(&mut self) -> &mut DynamicState {
		&mut self.dynamics
	}

	fn notify_file(&mut self, next: &Path) {
		self.update_nesting(next);
	}

	fn learn_at(&mut self, input: &[usize], index: usize) {
		self.global.learn_token(input, index);
	}

	fn forget_at(&mut self, input: &[usize], index: usize) {
		self.global.forget_token(input, index);
	}

	fn model_at_index(&mut self, input: &[usize], index: usize) -> ProbConf {
		self.fold_scores(input, index)
	}

	fn predict_at_index(&mut self, input: &[usize], index: usize) -> Predictions {
		// Gather every participant's candidates, then give each candidate a
		// fully folded score, probing by substitution where a participant
		// did not propose it.
		self.global.pause_dynamic();
		for local in &mut self.locals {
			local.pause_dynamic();
		}

		let mut proposals: Vec<Predictions> = Vec::with_capacity(self.locals.len() + 1);
		proposals.push(self.global.predict_token(input, index));
		for local in &mut self.locals {
			proposals.push(local.predict_token(input, index));
		}

		let mut candidates: Vec<usize> = Vec::new();
		for proposal in &proposals {
			for &candidate in proposal.keys() {
				if !candidates.contains(&candidate) {
					candidates.push(candidate);
				}
			}
		}

		let mut probe = input.to_vec();
		if index == probe.len() {
			probe.push(0);
		}
		let mut predictions = Predictions::with_capacity(candidates.len());
		for candidate in candidates {
			probe[index] = candidate;
			let mut mixed = match proposals[0].get(&candidate) {
				Some(&scored) => scored,
				None => self.global.model_token(&probe, index),
			};
			for (offset, local) in self.locals.iter_mut().enumerate() {
				let scored = match proposals[offset + 1].get(&candidate) {
					Some(&scored) => scored,
					None => local.model_token(&probe, index),
				};
				mixed = MixPolicy::Inverse.mix(mixed, scored);
			}
			predictions.insert(candidate, mixed);
		}

		self.global.unpause_dynamic();
		for local in &mut self.locals {
			local.unpause_dynamic();
		}
		predictions
	}

	fn save_to(&self, _directory: &Path) -> crate::Result<()> {
		Err(crate::Error::PersistenceUnsupported)
	}
}
