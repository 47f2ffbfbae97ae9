//! Language models over token-index sequences.
//!
//! - [`ngram`]: smoothed n-gram models backed by a frequency trie
//! - [`mix`]: two-model mixtures, including bidirectional modeling
//! - [`cache`]: a self-refreshing recency overlay over a base model
//! - [`nested`]: per-directory local models mixed with a global model
//! - [`persist`]: model persistence (counter snapshots plus config records)

pub mod cache;
pub mod mix;
pub mod nested;
pub mod ngram;
pub mod persist;

use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

/// A probability estimate paired with the confidence the model places in it.
///
/// Both components lie in `[0, 1]`. Confidence 0 means the model has nothing
/// to say about the position; consumers then fall back to other models or to
/// the uniform distribution.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbConf {
	pub prob: f64,
	pub conf: f64,
}

impl ProbConf {
	/// The "no opinion" score.
	pub const ZERO: ProbConf = ProbConf { prob: 0.0, conf: 0.0 };

	pub fn new(prob: f64, conf: f64) -> Self {
		ProbConf { prob, conf }
	}
}

/// Candidate completions for one position, scored per token index.
pub type Predictions = HashMap<usize, ProbConf>;

/// Produces fresh models on demand, e.g. for cache rebuilds or new nesting
/// levels.
pub type ModelFactory = Rc<dyn Fn() -> Result<Box<dyn Model>>>;

/// Builds a model from `factory`, substituting the standard n-gram model if
/// construction fails.
pub(crate) fn build_or_standard(factory: &ModelFactory) -> Box<dyn Model> {
	match factory() {
		Ok(model) => model,
		Err(err) => {
			warn!(error = %err, "model factory failed, substituting the standard n-gram model");
			Box::new(ngram::NGramModel::standard())
		}
	}
}

/// Tracks whether a model updates itself while scoring, with reentrant
/// pause/unpause.
///
/// Pausing records the dynamic flag at the outermost level and forces it off;
/// unpausing restores it only once the outermost pause is released, so nested
/// pauses cannot clobber the remembered state.
#[derive(Clone, Copy, Debug, Default)]
pub struct DynamicState {
	dynamic: bool,
	was_dynamic: bool,
	depth: u32,
}

impl DynamicState {
	pub fn is_dynamic(&self) -> bool {
		self.dynamic
	}

	pub fn set(&mut self, dynamic: bool) {
		self.dynamic = dynamic;
		self.was_dynamic = dynamic;
	}

	pub fn pause(&mut self) {
		if self.depth == 0 {
			self.was_dynamic = self.dynamic;
		}
		self.depth += 1;
		self.dynamic = false;
	}

	pub fn unpause(&mut self) {
		if self.depth == 0 {
			return;
		}
		self.depth -= 1;
		if self.depth == 0 && self.was_dynamic {
			self.dynamic = true;
		}
	}
}

/// The full language-model contract: learning, forgetting, scoring and
/// prediction over sequences of token indices.
///
/// Sequence operations default to per-index iteration; composite models
/// override them to delegate to their children in bulk.
pub trait Model {
	/// Announce the file about to be processed, before any of its content is
	/// scored or learned. Stateful models reset or re-nest here.
	fn notify(&mut self, next: &Path);

	/// Whether the model learns each token right after scoring it.
	fn dynamic(&self) -> bool;

	fn set_dynamic(&mut self, dynamic: bool);

	/// Temporarily suspend dynamic updates. Reentrant.
	fn pause_dynamic(&mut self);

	fn unpause_dynamic(&mut self);

	fn learn(&mut self, input: &[usize]) {
		for index in 0..input.len() {
			self.learn_token(input, index);
		}
	}

	fn learn_token(&mut self, input: &[usize], index: usize);

	fn forget(&mut self, input: &[usize]) {
		for index in 0..input.len() {
			self.forget_token(input, index);
		}
	}

	fn forget_token(&mut self, input: &[usize], index: usize);

	fn model(&mut self, input: &[usize]) -> Vec<ProbConf> {
		(0..input.len())
			.map(|index| self.model_token(input, index))
			.collect()
	}

	/// Score the token at `index`, then learn it if the model is dynamic.
	fn model_token(&mut self, input: &[usize], index: usize) -> ProbConf;

	fn predict(&mut self, input: &[usize]) -> Vec<Predictions> {
		(0..input.len())
			.map(|index| self.predict_token(input, index))
			.collect()
	}

	/// Propose scored candidates for `index`. Dynamic updates are suspended
	/// while candidates are scored; if the model is dynamic, the actual token
	/// is learned afterwards.
	fn predict_token(&mut self, input: &[usize], index: usize) -> Predictions;

	/// The confidence the model would have at `index`, taken as the best
	/// confidence over its predictions there. Never triggers learning.
	fn get_confidence(&mut self, input: &[usize], index: usize) -> f64 {
		self.pause_dynamic();
		let best = self
			.predict_token(input, index)
			.values()
			.map(|scored| scored.conf)
			.fold(0.0, f64::max);
		self.unpause_dynamic();
		best
	}

	/// Persist the model under `directory`.
	///
	/// # Errors
	/// [`crate::Error::PersistenceUnsupported`] for models without a durable
	/// representation.
	fn save(&self, directory: &Path) -> Result<()>;
}

/// Scoring-level contract for concrete (single-estimator) models.
///
/// Implementors provide raw scoring and counting; the blanket [`Model`]
/// implementation wraps them with the shared dynamic-update discipline, so it
/// is written once instead of once per model:
/// - `model_token` scores first, then learns when dynamic;
/// - `predict_token` forces dynamic off while scoring candidates, restores
///   it, then learns the actual token if the model was dynamic.
pub trait IndexedModel {
	fn dynamics(&self) -> &DynamicState;

	fn dynamics_mut(&mut self) -> &mut DynamicState;

	fn notify_file(&mut self, _next: &Path) {}

	fn learn_at(&mut self, input: &[usize], index: usize);

	fn forget_at(&mut self, input: &[usize], index: usize);

	/// Score the token at `index` without any learning side effects.
	fn model_at_index(&mut self, input: &[usize], index: usize) -> ProbConf;

	/// Gather and score candidates for `index` without learning side
	/// effects.
	fn predict_at_index(&mut self, input: &[usize], index: usize) -> Predictions;

	fn save_to(&self, directory: &Path) -> Result<()>;
}

impl<T: IndexedModel> Model for T {
	fn notify(&mut self, next: &Path) {
		self.notify_file(next);
	}

	fn dynamic(&self) -> bool {
		self.dynamics().is_dynamic()
	}

	fn set_dynamic(&mut self, dynamic: bool) {
		self.dynamics_mut().set(dynamic);
	}

	fn pause_dynamic(&mut self) {
		self.dynamics_mut().pause();
	}

	fn unpause_dynamic(&mut self) {
		self.dynamics_mut().unpause();
	}

	fn learn_token(&mut self, input: &[usize], index: usize) {
		self.learn_at(input, index);
	}

	fn forget_token(&mut self, input: &[usize], index: usize) {
		self.forget_at(input, index);
	}

	fn model_token(&mut self, input: &[usize], index: usize) -> ProbConf {
		let scored = self.model_at_index(input, index);
		if self.dynamics().is_dynamic() {
			self.learn_at(input, index);
		}
		scored
	}

	fn predict_token(&mut self, input: &[usize], index: usize) -> Predictions {
		// Suspend via the reentrant pause so an outer pause keeps its
		// remembered flag intact.
		let was_dynamic = self.dynamics().is_dynamic();
		self.dynamics_mut().pause();
		let predictions = self.predict_at_index(input, index);
		self.dynamics_mut().unpause();
		// Predicting one past the end has no actual token to learn.
		if was_dynamic && index < input.len() {
			self.learn_at(input, index);
		}
		predictions
	}

	fn save(&self, directory: &Path) -> Result<()> {
		self.save_to(directory)
	}
}

impl Model for Box<dyn Model> {
	fn notify(&mut self, next: &Path) {
		(**self).notify(next);
	}

	fn dynamic(&self) -> bool {
		(**self).dynamic()
	}

	fn set_dynamic(&mut self, dynamic: bool) {
		(**self).set_dynamic(dynamic);
	}

	fn pause_dynamic(&mut self) {
		(**self).pause_dynamic();
	}

	fn unpause_dynamic(&mut self) {
		(**self).unpause_dynamic();
	}

	fn learn(&mut self, input: &[usize]) {
		(**self).learn(input);
	}

	fn learn_token(&mut self, input: &[usize], index: usize) {
		(**self).learn_token(input, index);
	}

	fn forget(&mut self, input: &[usize]) {
		(**self).forget(input);
	}

	fn forget_token(&mut self, input: &[usize], index: usize) {
		(**self).forget_token(input, index);
	}

	fn model(&mut self, input: &[usize]) -> Vec<ProbConf> {
		(**self).model(input)
	}

	fn model_token(&mut self, input: &[usize], index: usize) -> ProbConf {
		(**self).model_token(input, index)
	}

	fn predict(&mut self, input: &[usize]) -> Vec<Predictions> {
		(**self).predict(input)
	}

	fn predict_token(&mut self, input: &[usize], index: usize) -> Predictions {
		(**self).predict_token(input, index)
	}

	fn get_confidence(&mut self, input: &[usize], index: usize) -> f64 {
		(**self).get_confidence(input, index)
	}

	fn save(&self, directory: &Path) -> Result<()> {
		(**self).save(directory)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pause_and_unpause_restore_dynamic_state() {
		let mut state = DynamicState::default();
		state.set(true);
		state.pause();
		assert!(!state.is_dynamic());
		state.unpause();
		assert!(state.is_dynamic());
	}

	#[test]
	fn nested_pauses_restore_only_at_outermost_level() {
		let mut state = DynamicState::default();
		state.set(true);
		state.pause();
		state.pause();
		state.unpause();
		assert!(!state.is_dynamic());
		state.unpause();
		assert!(state.is_dynamic());
	}

	#[test]
	fn pausing_a_static_model_keeps_it_static() {
		let mut state = DynamicState::default();
		state.pause();
		state.unpause();
		assert!(!state.is_dynamic());
	}

	#[test]
	fn unpause_without_pause_is_a_noop() {
		let mut state = DynamicState::default();
		state.unpause();
		assert!(!state.is_dynamic());
	}
}
