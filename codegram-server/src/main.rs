use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Mutex;

use actix_cors::Cors;
use actix_web::{get, put, web, App, HttpResponse, HttpServer, Responder};
use serde::{Deserialize, Serialize};

use codegram_core::lexing::{LexerRunner, NaiveCodeLexer};
use codegram_core::model::cache::CacheModel;
use codegram_core::model::mix::MixModel;
use codegram_core::model::ngram::NGramModel;
use codegram_core::model::Model;
use codegram_core::runner::CompletionOptions;
use codegram_core::{ModelRunner, Vocabulary};

/// Query parameters for the `/v1/entropy` and `/v1/learn` endpoints
#[derive(Deserialize)]
struct TextParams {
	text: Option<String>,
}

/// Query parameters for the `/v1/suggest` endpoint
#[derive(Deserialize)]
struct SuggestParams {
	text: Option<String>,
	limit: Option<usize>,
}

/// Query parameters for the `/v1/complete` endpoint
#[derive(Deserialize)]
struct CompleteParams {
	text: Option<String>,
	cap: Option<usize>,
	randomness: Option<f64>,
}

/// Query parameters for the `/v1/stats` endpoint
#[derive(Deserialize)]
struct StatsParams {
	path: Option<String>,
}

#[derive(Serialize)]
struct Suggestion {
	token: String,
	probability: f64,
}

struct SharedData {
	runner: ModelRunner<MixModel>,
}

impl SharedData {
	/// A fresh default pipeline: a standard n-gram model mixed with a
	/// recency cache, over a per-line code lexer with sentence markers.
	fn new() -> Self {
		let mut lexer = LexerRunner::new(Box::new(NaiveCodeLexer::new()), true);
		lexer.set_sentence_markers(true);
		let mix = MixModel::standard(
			Box::new(NGramModel::standard()) as Box<dyn Model>,
			Box::new(CacheModel::new()) as Box<dyn Model>,
		);
		SharedData {
			runner: ModelRunner::new(mix, Rc::new(lexer), Rc::new(RefCell::new(Vocabulary::new()))),
		}
	}
}

fn require_text(text: &Option<String>) -> Result<&str, HttpResponse> {
	match text {
		Some(s) if !s.trim().is_empty() => Ok(s),
		_ => Err(HttpResponse::BadRequest().body("Missing or empty text")),
	}
}

/// HTTP GET endpoint `/v1/entropy`
///
/// Scores the given text with the current model and returns per-token
/// entropies, one list per line.
#[get("/v1/entropy")]
async fn get_entropy(data: web::Data<Mutex<SharedData>>, query: web::Query<TextParams>) -> impl Responder {
	let text = match require_text(&query.text) {
		Ok(t) => t.to_owned(),
		Err(e) => return e,
	};

	let mut shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	let entropies = shared_data.runner.model_content(&text);
	HttpResponse::Ok().json(entropies)
}

/// HTTP GET endpoint `/v1/suggest`
///
/// Returns the top next-token suggestions for the given text, ranked by
/// probability.
#[get("/v1/suggest")]
async fn get_suggestions(data: web::Data<Mutex<SharedData>>, query: web::Query<SuggestParams>) -> impl Responder {
	let text = match require_text(&query.text) {
		Ok(t) => t.to_owned(),
		Err(e) => return e,
	};
	let limit = query.limit.unwrap_or(10);

	let mut shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	let suggestions: Vec<Suggestion> = shared_data
		.runner
		.suggest_top(&text, limit)
		.into_iter()
		.map(|(token, probability)| Suggestion { token, probability })
		.collect();
	HttpResponse::Ok().json(suggestions)
}

/// HTTP GET endpoint `/v1/complete`
///
/// Extends the given text one suggested token at a time until an
/// end-of-sentence token or the cap is reached.
#[get("/v1/complete")]
async fn get_completion(data: web::Data<Mutex<SharedData>>, query: web::Query<CompleteParams>) -> impl Responder {
	let text = match require_text(&query.text) {
		Ok(t) => t.to_owned(),
		Err(e) => return e,
	};
	let mut options = CompletionOptions::default();
	if let Some(cap) = query.cap {
		options.max_tokens = cap;
	}
	if let Some(randomness) = query.randomness {
		options.randomness = randomness;
	}

	let mut shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	match shared_data.runner.complete(&text, &options) {
		Ok(completed) => HttpResponse::Ok().body(completed),
		Err(e) => HttpResponse::BadRequest().body(e.to_string()),
	}
}

/// HTTP PUT endpoint `/v1/learn`
///
/// Trains the current model on the given text.
#[put("/v1/learn")]
async fn put_learn(data: web::Data<Mutex<SharedData>>, query: web::Query<TextParams>) -> impl Responder {
	let text = match require_text(&query.text) {
		Ok(t) => t.to_owned(),
		Err(e) => return e,
	};

	let mut shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	let tokens = shared_data.runner.learn_content(&text);
	HttpResponse::Ok().body(format!("Learned {tokens} tokens"))
}

/// HTTP GET endpoint `/v1/stats`
///
/// Evaluates every lexable file under the given path with self-testing and
/// returns the aggregated entropy statistics.
#[get("/v1/stats")]
async fn get_stats(data: web::Data<Mutex<SharedData>>, query: web::Query<StatsParams>) -> impl Responder {
	let path = match &query.path {
		Some(s) if !s.trim().is_empty() => s.trim().to_owned(),
		_ => return HttpResponse::BadRequest().body("Missing or empty path"),
	};

	let mut shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	shared_data.runner.set_self_testing(true);
	let evaluated = shared_data.runner.model_directory(path.as_ref());
	shared_data.runner.set_self_testing(false);

	match evaluated {
		Ok(files) => {
			let summary = shared_data.runner.summarize_files(&files);
			HttpResponse::Ok().json(summary)
		}
		Err(e) => HttpResponse::InternalServerError().body(format!("Failed to evaluate path: {e}")),
	}
}

/// Main entry point for the server.
///
/// Starts an Actix-web HTTP server over a fresh model pipeline.
///
/// # Notes
/// - The server binds to 127.0.0.1:5000.
/// - The model state is not `Send`, so it is created inside the worker
///   factory and the server runs a single worker.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.init();

	HttpServer::new(|| {
		let shared_model = web::Data::new(Mutex::new(SharedData::new()));
		App::new()
			.wrap(Cors::permissive())
			.app_data(shared_model)
			.service(get_entropy)
			.service(get_suggestions)
			.service(get_completion)
			.service(put_learn)
			.service(get_stats)
	})
		.workers(1)
		.bind(("127.0.0.1", 5000))?
		.run()
		.await
}
