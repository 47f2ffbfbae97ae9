use std::cell::RefCell;
use std::fs;
use std::rc::Rc;

use codegram_core::lexing::{LexerRunner, NaiveCodeLexer};
use codegram_core::model::cache::CacheModel;
use codegram_core::model::mix::MixModel;
use codegram_core::model::nested::NestedModel;
use codegram_core::model::ngram::NGramModel;
use codegram_core::model::{Model, ModelFactory};
use codegram_core::runner::CompletionOptions;
use codegram_core::{ModelRunner, Vocabulary};

fn code_lexer(per_line: bool) -> Rc<LexerRunner> {
	let mut lexer = LexerRunner::new(Box::new(NaiveCodeLexer::new()), per_line);
	lexer.set_sentence_markers(true);
	lexer.set_extension("code").unwrap();
	Rc::new(lexer)
}

fn write_corpus(dir: &std::path::Path) {
	fs::write(dir.join("loops.code"), "for (i = 0; i < n; i = i + 1) {\nsum = sum + i;\n}\n")
		.unwrap();
	fs::write(dir.join("totals.code"), "sum = 0;\nsum = sum + 1;\nsum = sum + 2;\n").unwrap();
}

#[test]
fn train_evaluate_and_complete() {
	let corpus = tempfile::tempdir().unwrap();
	write_corpus(corpus.path());

	let lexer = code_lexer(true);
	let vocabulary = Rc::new(RefCell::new(Vocabulary::new()));
	let mut runner = ModelRunner::new(
		Box::new(NGramModel::standard()) as Box<dyn Model>,
		Rc::clone(&lexer),
		vocabulary,
	);

	let tokens = runner.learn_directory(corpus.path()).unwrap();
	assert!(tokens > 0);

	// Self-tested evaluation of the training corpus itself.
	runner.set_self_testing(true);
	let entropies = runner.model_directory(corpus.path()).unwrap();
	assert_eq!(entropies.len(), 2);
	let summary = runner.summarize_files(&entropies);
	assert!(summary.count > 0);
	assert!(summary.mean().is_finite());

	let ranks = runner.predict_directory(corpus.path()).unwrap();
	let rank_summary = runner.summarize_files(&ranks);
	assert!(rank_summary.mean() >= 0.0 && rank_summary.mean() <= 1.0);
	runner.set_self_testing(false);

	// A frequent pattern completes deterministically.
	let completed = runner
		.complete("sum = sum +", &CompletionOptions::default())
		.unwrap();
	assert!(completed.starts_with("sum = sum +"));
	assert!(completed.len() > "sum = sum +".len());
}

#[test]
fn persistence_round_trip_through_the_runner() {
	let corpus = tempfile::tempdir().unwrap();
	write_corpus(corpus.path());

	let lexer = code_lexer(true);
	let vocabulary = Rc::new(RefCell::new(Vocabulary::new()));
	let mut runner = ModelRunner::new(
		Box::new(NGramModel::jm(4, 0.5)) as Box<dyn Model>,
		Rc::clone(&lexer),
		vocabulary,
	);
	runner.learn_directory(corpus.path()).unwrap();

	let saved = tempfile::tempdir().unwrap();
	runner.save(saved.path()).unwrap();

	let mut restored = ModelRunner::load(saved.path(), Rc::clone(&lexer)).unwrap();
	let before = runner.model_content("sum = sum + 1;");
	let after = restored.model_content("sum = sum + 1;");
	assert_eq!(before, after);
}

#[test]
fn cache_over_global_mixture_adapts_within_a_file() {
	let corpus = tempfile::tempdir().unwrap();
	write_corpus(corpus.path());

	let lexer = code_lexer(true);
	let vocabulary = Rc::new(RefCell::new(Vocabulary::new()));
	let mix = MixModel::standard(
		Box::new(NGramModel::standard()),
		Box::new(CacheModel::new()),
	);
	let mut runner = ModelRunner::new(mix, Rc::clone(&lexer), vocabulary);
	runner.learn_directory(corpus.path()).unwrap();

	// Scoring the same line repeatedly lets the cache pick it up, driving
	// entropy down even though the n-gram side is unchanged.
	let novel = "totally fresh identifiers appearing repeatedly";
	let first_values = runner.model_content(novel);
	let first = runner.summarize_unit(&first_values);
	let later_values = runner.model_content(novel);
	let later = runner.summarize_unit(&later_values);
	assert!(later.mean() < first.mean());
}

#[test]
fn nested_runner_scores_against_locality() {
	let root = tempfile::tempdir().unwrap();
	fs::write(root.path().join("shared.code"), "base = base + 1;").unwrap();
	fs::create_dir(root.path().join("module")).unwrap();
	fs::write(root.path().join("module/a.code"), "module_only = 1;").unwrap();
	fs::write(root.path().join("module/b.code"), "module_only = 2;").unwrap();

	let lexer = code_lexer(false);
	let vocabulary = Rc::new(RefCell::new(Vocabulary::new()));
	let factory: ModelFactory = Rc::new(|| Ok(Box::new(NGramModel::standard()) as Box<dyn Model>));
	let nested = NestedModel::new(
		Box::new(NGramModel::standard()),
		Rc::clone(&lexer),
		Rc::clone(&vocabulary),
		root.path(),
		factory,
	);
	let mut runner = ModelRunner::new(
		Box::new(nested) as Box<dyn Model>,
		Rc::clone(&lexer),
		vocabulary,
	);

	// Scoring a module file nests into the module and draws on its
	// sibling, so the module's idiom is predictable.
	let values = runner.model_file(&root.path().join("module/a.code")).unwrap().unwrap();
	let summary = runner.summarize_unit(&values);
	assert!(summary.count > 0);
	assert!(summary.mean().is_finite());
}
