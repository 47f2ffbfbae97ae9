use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use crate::error::Result;
use crate::lexing::LexerRunner;
use crate::model::mix::MixModel;
use crate::model::ngram::{NGramModel, DEFAULT_LAMBDA};
use crate::model::persist::{self, VOCABULARY_FILE};
use crate::model::{build_or_standard, Model, ModelFactory};
use crate::runner::{forget_path, learn_path, ModelRunner};
use crate::vocabulary::Vocabulary;

/// Default order of the local (project-scoped) model.
pub const DEFAULT_LOCAL_ORDER: usize = 10;

/// A runner over an inverse mixture of a local and a global model.
///
/// The global side is trained once on a large corpus and persisted; the
/// local side is trained on the project at hand and can be cleared and
/// retrained as the project changes. Scoring and completion run through the
/// mixture, so local idioms dominate where the project has an opinion and
/// the corpus fills in everywhere else.
pub struct LocalGlobalRunner {
	runner: ModelRunner<MixModel>,
	local_factory: ModelFactory,
}

impl LocalGlobalRunner {
	pub fn new(
		local: Box<dyn Model>,
		global: Box<dyn Model>,
		local_factory: ModelFactory,
		lexer: Rc<LexerRunner>,
		vocabulary: Rc<RefCell<Vocabulary>>,
	) -> Self {
		let mix = MixModel::standard(local, global);
		LocalGlobalRunner {
			runner: ModelRunner::new(mix, lexer, vocabulary),
			local_factory,
		}
	}

	/// The default pairing: a deep local Jelinek-Mercer model over a
	/// standard global one.
	pub fn with_defaults(lexer: Rc<LexerRunner>, vocabulary: Rc<RefCell<Vocabulary>>) -> Self {
		let factory: ModelFactory = Rc::new(|| {
			Ok(Box::new(NGramModel::jm(DEFAULT_LOCAL_ORDER, DEFAULT_LAMBDA)) as Box<dyn Model>)
		});
		let local = build_or_standard(&factory);
		let global = Box::new(NGramModel::standard());
		Self::new(local, global, factory, lexer, vocabulary)
	}

	/// The underlying runner, for scoring, prediction and completion.
	pub fn runner(&self) -> &ModelRunner<MixModel> {
		&self.runner
	}

	pub fn runner_mut(&mut self) -> &mut ModelRunner<MixModel> {
		&mut self.runner
	}

	/// Train the local side on a file or directory. Returns the number of
	/// tokens learned.
	pub fn train_local(&mut self, path: &Path) -> u64 {
		let lexer = Rc::clone(self.runner.lexer());
		let vocabulary = Rc::clone(self.runner.vocabulary());
		learn_path(self.runner.model_mut().left_mut(), &lexer, &vocabulary, path)
	}

	pub fn forget_local(&mut self, path: &Path) -> u64 {
		let lexer = Rc::clone(self.runner.lexer());
		let vocabulary = Rc::clone(self.runner.vocabulary());
		forget_path(self.runner.model_mut().left_mut(), &lexer, &vocabulary, path)
	}

	/// Train the global side on a file or directory.
	pub fn train_global(&mut self, path: &Path) -> u64 {
		let lexer = Rc::clone(self.runner.lexer());
		let vocabulary = Rc::clone(self.runner.vocabulary());
		learn_path(self.runner.model_mut().right_mut(), &lexer, &vocabulary, path)
	}

	pub fn forget_global(&mut self, path: &Path) -> u64 {
		let lexer = Rc::clone(self.runner.lexer());
		let vocabulary = Rc::clone(self.runner.vocabulary());
		forget_path(self.runner.model_mut().right_mut(), &lexer, &vocabulary, path)
	}

	/// Drop everything the local side has learned, replacing it with a
	/// fresh model from the factory.
	pub fn clear_local(&mut self) {
		let fresh = build_or_standard(&self.local_factory);
		self.runner.model_mut().set_left(fresh);
	}

	/// Persist the global side and the vocabulary. The local side is
	/// project state and is rebuilt by `train_local` instead.
	pub fn save(&self, directory: &Path) -> Result<()> {
		fs::create_dir_all(directory)?;
		self.runner.model().right().save(directory)?;
		self.runner
			.vocabulary()
			.borrow()
			.write_tsv(&directory.join(VOCABULARY_FILE))
	}

	/// Restore a persisted global side, paired with a fresh default local.
	pub fn load(directory: &Path, lexer: Rc<LexerRunner>) -> Result<Self> {
		let global = persist::load_model(directory)?;
		let vocabulary = Rc::new(RefCell::new(Vocabulary::read_tsv(
			&directory.join(VOCABULARY_FILE),
		)?));
		let factory: ModelFactory = Rc::new(|| {
			Ok(Box::new(NGramModel::jm(DEFAULT_LOCAL_ORDER, DEFAULT_LAMBDA)) as Box<dyn Model>)
		});
		let local = build_or_standard(&factory);
		Ok(Self::new(local, global, factory, lexer, vocabulary))
	}
}

#[cfg(test)]
mod tests {
	use std::fs;

	use super::*;
	use crate::lexing::WhitespaceLexer;

	fn make() -> LocalGlobalRunner {
		let mut lexer = LexerRunner::new(Box::new(WhitespaceLexer), true);
		lexer.set_sentence_markers(true);
		LocalGlobalRunner::with_defaults(Rc::new(lexer), Rc::new(RefCell::new(Vocabulary::new())))
	}

	#[test]
	fn local_and_global_training_are_separate() {
		let dir = tempfile::tempdir().unwrap();
		fs::write(dir.path().join("local.txt"), "project idiom here").unwrap();

		let mut runner = make();
		let tokens = runner.train_local(&dir.path().join("local.txt"));
		assert!(tokens > 0);

		// The mixture knows the local content.
		let entropies = runner.runner_mut().model_content("project idiom here");
		let mixed = runner.runner().summarize_unit(&entropies);
		assert!(mixed.mean() < 10.0);

		// Clearing the local side removes that knowledge.
		runner.clear_local();
		let entropies = runner.runner_mut().model_content("project idiom here");
		let cleared = runner.runner().summarize_unit(&entropies);
		assert!(cleared.mean() > mixed.mean());
	}

	#[test]
	fn global_side_round_trips_through_save_and_load() {
		let corpus = tempfile::tempdir().unwrap();
		fs::write(corpus.path().join("corpus.txt"), "widely known phrase").unwrap();

		let mut runner = make();
		runner.train_global(corpus.path());

		let saved = tempfile::tempdir().unwrap();
		runner.save(saved.path()).unwrap();

		let mut lexer = LexerRunner::new(Box::new(WhitespaceLexer), true);
		lexer.set_sentence_markers(true);
		let mut restored = LocalGlobalRunner::load(saved.path(), Rc::new(lexer)).unwrap();

		let before = runner.runner_mut().model_content("widely known phrase");
		let after = restored.runner_mut().model_content("widely known phrase");
		assert_eq!(before, after);
	}

	#[test]
	fn forgetting_global_reverses_training() {
		let corpus = tempfile::tempdir().unwrap();
		fs::write(corpus.path().join("corpus.txt"), "some corpus text").unwrap();

		let mut runner = make();
		let baseline = runner.runner_mut().model_content("some corpus text");
		runner.train_global(corpus.path());
		runner.forget_global(corpus.path());
		let reverted = runner.runner_mut().model_content("some corpus text");
		assert_eq!(baseline, reverted);
	}
}
