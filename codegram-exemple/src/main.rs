use std::cell::RefCell;
use std::rc::Rc;

use codegram_core::lexing::{LexerRunner, NaiveCodeLexer};
use codegram_core::model::ngram::NGramModel;
use codegram_core::model::Model;
use codegram_core::runner::CompletionOptions;
use codegram_core::{ModelRunner, Vocabulary};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Log to stderr; control the verbosity with RUST_LOG
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // A per-line code lexer with sentence markers: every line becomes
    // <s> ... </s> so the model learns where statements start and stop
    let mut lexer = LexerRunner::new(Box::new(NaiveCodeLexer::new()), true);
    lexer.set_sentence_markers(true);

    // The standard model: Jelinek-Mercer smoothing, order 6
    let mut runner = ModelRunner::new(
        Box::new(NGramModel::standard()) as Box<dyn Model>,
        Rc::new(lexer),
        Rc::new(RefCell::new(Vocabulary::new())),
    );

    // Train on a tiny corpus of repetitive code
    let corpus = "\
total = total + 1;
total = total + step;
count = count + 1;
for (i = 0; i < count; i = i + 1) {
total = total + i;
}
";
    let tokens = runner.learn_content(corpus);
    println!("Learned {} tokens", tokens);
    println!(
        "Vocabulary holds {} distinct tokens",
        runner.vocabulary().borrow().size()
    );

    // Score a line the model has seen patterns of: per-token entropies
    // in bits, low where the model is confident
    let entropies = runner.model_content("total = total + 1;");
    for line in &entropies {
        let rounded: Vec<String> = line.iter().map(|e| format!("{e:.2}")).collect();
        println!("Entropies: {}", rounded.join(" "));
    }
    let summary = runner.summarize_unit(&entropies);
    println!("Mean entropy: {:.3} bits over {} tokens", summary.mean(), summary.count);

    // Evaluate the training corpus against itself: self-testing forgets
    // each line before scoring it and re-learns it afterwards
    runner.set_self_testing(true);
    let self_tested = runner.model_content(corpus);
    let summary = runner.summarize_unit(&self_tested);
    println!("Self-tested mean entropy: {:.3} bits", summary.mean());
    runner.set_self_testing(false);

    // Ask for the most likely next token
    if let Some((token, probability)) = runner.suggest("total = total") {
        println!("After 'total = total' comes '{}' (p = {:.3})", token, probability);
    }

    // Ranked alternatives
    for (token, probability) in runner.suggest_top("count = count", 3) {
        println!("Candidate: '{}' (p = {:.3})", token, probability);
    }

    // Complete a whole statement: suggestions are appended until the
    // model predicts the end of the line
    let completed = runner.complete("total =", &CompletionOptions::default())?;
    println!("Completed: {}", completed);

    // Randomness must be between 0.0 and 1.0
    let options = CompletionOptions {
        max_tokens: 10,
        randomness: 2.0,
    };
    match runner.complete("total =", &options) {
        Ok(_) => println!("Should not happen"),
        Err(_) => println!("Randomness 2.0 is invalid, must be between 0.0 and 1.0"),
    }

    // A little sampling: the same prefix can now complete differently
    let options = CompletionOptions {
        max_tokens: 10,
        randomness: 0.5,
    };
    for i in 0..3 {
        println!("Sampled completion {}: {}", i + 1, runner.complete("total =", &options)?);
    }

    Ok(())
}
