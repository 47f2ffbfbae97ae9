use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::counting::MapTrieCounter;
use crate::error::Result;
use crate::model::persist;
use crate::model::{DynamicState, IndexedModel, Predictions, ProbConf};

/// Default context window, counting the predicted token itself.
pub const DEFAULT_NGRAM_ORDER: usize = 6;
/// Default Jelinek-Mercer interpolation weight.
pub const DEFAULT_LAMBDA: f64 = 0.5;
/// Default number of candidates gathered per prediction.
pub const DEFAULT_PREDICTION_CUTOFF: usize = 10;

/// How an n-gram order's raw counts turn into a probability/confidence pair.
///
/// Confidence doubles as the interpolation weight when orders are folded, so
/// each method expresses its smoothing entirely through this pair:
/// - Jelinek-Mercer: maximum-likelihood probability at fixed confidence.
/// - Witten-Bell: confidence shrinks where many successors were seen once.
/// - Absolute discounting (plain and modified): a discount is subtracted
///   from the count, and the held-out mass is reported through confidence,
///   with the probability renormalized to the kept mass.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Smoothing {
	JelinekMercer { lambda: f64 },
	WittenBell,
	AbsoluteDiscount,
	ModifiedAbsoluteDiscount,
}

/// Smoothed n-gram model over a frequency trie.
///
/// # Invariants
/// - Learning a token counts every suffix of its context window, so every
///   order from 1 to `order` is populated exactly once per position and
///   forgetting the same tokens restores the previous counts.
/// - Scoring folds the window's suffixes from shortest to longest, stopping
///   at the first unseen context; both components of the result lie in
///   `[0, 1]`.
pub struct NGramModel {
	order: usize,
	smoothing: Smoothing,
	counter: MapTrieCounter,
	prediction_cutoff: usize,
	dynamics: DynamicState,
}

impl NGramModel {
	pub fn new(order: usize, smoothing: Smoothing) -> Self {
		Self::with_counter(order, smoothing, MapTrieCounter::new())
	}

	pub fn with_counter(order: usize, smoothing: Smoothing, counter: MapTrieCounter) -> Self {
		let order = order.max(1);
		let smoothing = match smoothing {
			Smoothing::JelinekMercer { lambda } if !(0.0..=1.0).contains(&lambda) => {
				let clamped = lambda.clamp(0.0, 1.0);
				warn!(lambda, clamped, "interpolation weight out of range, clamping");
				Smoothing::JelinekMercer { lambda: clamped }
			}
			other => other,
		};
		NGramModel {
			order,
			smoothing,
			counter,
			prediction_cutoff: DEFAULT_PREDICTION_CUTOFF,
			dynamics: DynamicState::default(),
		}
	}

	/// Jelinek-Mercer model. `lambda` is clamped into `[0, 1]`.
	pub fn jm(order: usize, lambda: f64) -> Self {
		Self::new(order, Smoothing::JelinekMercer { lambda })
	}

	pub fn wb(order: usize) -> Self {
		Self::new(order, Smoothing::WittenBell)
	}

	pub fn ad(order: usize) -> Self {
		Self::new(order, Smoothing::AbsoluteDiscount)
	}

	pub fn adm(order: usize) -> Self {
		Self::new(order, Smoothing::ModifiedAbsoluteDiscount)
	}

	/// The default configuration: Jelinek-Mercer at order 6, lambda 0.5.
	pub fn standard() -> Self {
		Self::jm(DEFAULT_NGRAM_ORDER, DEFAULT_LAMBDA)
	}

	pub fn order(&self) -> usize {
		self.order
	}

	pub fn smoothing(&self) -> Smoothing {
		self.smoothing
	}

	pub fn counter(&self) -> &MapTrieCounter {
		&self.counter
	}

	pub fn clear_counter(&mut self) {
		self.counter = MapTrieCounter::new();
	}

	pub fn set_prediction_cutoff(&mut self, cutoff: usize) {
		self.prediction_cutoff = cutoff;
	}

	/// The context window ending at `index`, at most `order` tokens long.
	fn window_at<'a>(input: &'a [usize], index: usize, order: usize) -> &'a [usize] {
		let start = (index + 1).saturating_sub(order);
		&input[start..=index]
	}

	/// Turn one order's raw counts into a probability/confidence pair.
	/// `context_count` must be nonzero.
	pub(crate) fn model_with_confidence(
		&self,
		sequence: &[usize],
		count: u64,
		context_count: u64,
	) -> ProbConf {
		let context = &sequence[..sequence.len() - 1];
		let context_count = context_count as f64;
		match self.smoothing {
			Smoothing::JelinekMercer { lambda } => {
				ProbConf::new(count as f64 / context_count, lambda)
			}
			Smoothing::WittenBell => {
				let distinct = self.counter.get_distinct_counts(1, context)[0] as f64;
				let prob = count as f64 / context_count;
				let conf = context_count / (context_count + distinct);
				ProbConf::new(prob, conf)
			}
			Smoothing::AbsoluteDiscount => {
				let n1 = self.counter.get_count_of_count(sequence.len(), 1) as f64;
				let n2 = self.counter.get_count_of_count(sequence.len(), 2) as f64;
				let mut discount = n1 / (n1 + 2.0 * n2);
				if !discount.is_finite() {
					discount = 0.6;
				}
				let distinct = self.counter.get_distinct_counts(1, context)[0] as f64;
				let kept = (count as f64 - discount).max(0.0) / context_count;
				let conf = 1.0 - distinct * discount / context_count;
				Self::renormalized(kept, conf)
			}
			Smoothing::ModifiedAbsoluteDiscount => {
				let n: Vec<f64> = (1..=4)
					.map(|c| self.counter.get_count_of_count(sequence.len(), c) as f64)
					.collect();
				let y = n[0] / (n[0] + 2.0 * n[1]);
				let mut discounts = [
					y,
					2.0 - 3.0 * y * n[2] / n[1],
					3.0 - 4.0 * y * n[3] / n[2],
				];
				for (i, discount) in discounts.iter_mut().enumerate() {
					let k = (i + 1) as f64;
					if !discount.is_finite() || *discount < 0.25 * k || *discount > k {
						*discount = 0.6 * k;
					}
				}
				let tiers = self.counter.get_distinct_counts(3, context);
				let discount = if count > 0 {
					discounts[(count.min(3) - 1) as usize]
				} else {
					0.0
				};
				let held_out = discounts
					.iter()
					.zip(&tiers)
					.map(|(d, &tier)| d * tier as f64)
					.sum::<f64>();
				let kept = (count as f64 - discount).max(0.0) / context_count;
				let conf = 1.0 - held_out / context_count;
				Self::renormalized(kept, conf)
			}
		}
	}

	/// Report a discounted probability relative to the kept mass, guarding
	/// against degenerate confidence.
	fn renormalized(kept: f64, conf: f64) -> ProbConf {
		let conf = conf.clamp(0.0, 1.0);
		if conf <= 0.0 {
			return ProbConf::ZERO;
		}
		ProbConf::new((kept / conf).clamp(0.0, 1.0), conf)
	}

	/// Score `index` by folding the window's suffixes, shortest first,
	/// stopping at the first unseen context. Confidence grows with the
	/// number of participating orders as `1 - 2^-hits`.
	fn score_at(&self, input: &[usize], index: usize) -> ProbConf {
		let window = Self::window_at(input, index, self.order);
		let mut probability = 0.0;
		let mut mass = 0.0;
		let mut hits: i32 = 0;
		for start in (0..window.len()).rev() {
			let sequence = &window[start..];
			let (count, context_count) = self.counter.get_counts(sequence);
			if context_count == 0 {
				break;
			}
			let scored = self.model_with_confidence(sequence, count, context_count);
			mass = (1.0 - scored.conf) * mass + scored.conf;
			probability = (1.0 - scored.conf) * probability + scored.conf * scored.prob;
			hits += 1;
		}
		if mass > 0.0 {
			probability /= mass;
		}
		let confidence = 1.0 - 2f64.powi(-hits);
		ProbConf::new(probability.clamp(0.0, 1.0), confidence.clamp(0.0, 1.0))
	}
}

impl IndexedModel for NGramModel {
	fn dynamics(&self) -> &DynamicState {
		&self.dynamics
	}

	fn dynamics_mut(&mut self) -> &mut DynamicState {
		&mut self.dynamics
	}

	fn learn_at(&mut self, input: &[usize], index: usize) {
		let window = Self::window_at(input, index, self.order);
		for start in 0..window.len() {
			self.counter.count(&window[start..]);
		}
	}

	fn forget_at(&mut self, input: &[usize], index: usize) {
		let window = Self::window_at(input, index, self.order);
		for start in 0..window.len() {
			self.counter.uncount(&window[start..]);
		}
	}

	fn model_at_index(&mut self, input: &[usize], index: usize) -> ProbConf {
		self.score_at(input, index)
	}

	fn predict_at_index(&mut self, input: &[usize], index: usize) -> Predictions {
		// Candidates come from the successors of ever-shorter contexts
		// ending just before the predicted position; the empty context
		// (most frequent tokens overall) fills any remaining room.
		let context: &[usize] = if index == 0 {
			&[]
		} else {
			Self::window_at(input, index - 1, self.order)
		};
		let mut seen = HashSet::new();
		let mut candidates = Vec::new();
		for start in 0..=context.len() {
			let room = self.prediction_cutoff.saturating_sub(candidates.len());
			if room == 0 {
				break;
			}
			for candidate in self.counter.get_top_successors(&context[start..], room) {
				if seen.insert(candidate) {
					candidates.push(candidate);
				}
			}
		}

		// Each candidate is scored as if it stood at the queried position.
		let mut probe = input.to_vec();
		if index == probe.len() {
			probe.push(0);
		}
		let mut predictions = Predictions::with_capacity(candidates.len());
		for candidate in candidates {
			probe[index] = candidate;
			predictions.insert(candidate, self.score_at(&probe, index));
		}
		predictions
	}

	fn save_to(&self, directory: &Path) -> Result<()> {
		persist::save_ngram(self, directory)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::Model;

	fn jm_counter_with(pairs: &[(usize, usize, u64)]) -> MapTrieCounter {
		let mut counter = MapTrieCounter::new();
		for &(a, b, times) in pairs {
			for _ in 0..times {
				counter.count(&[a]);
				counter.count(&[a, b]);
				counter.count(&[b]);
			}
		}
		counter
	}

	#[test]
	fn jelinek_mercer_literal_case() {
		// Bigram seen 4 times in a context seen 10 times, lambda 0.5.
		let counter = jm_counter_with(&[(1, 2, 4), (1, 3, 6)]);
		let model = NGramModel::with_counter(2, Smoothing::JelinekMercer { lambda: 0.5 }, counter);
		let (count, context_count) = model.counter().get_counts(&[1, 2]);
		assert_eq!((count, context_count), (4, 10));
		let scored = model.model_with_confidence(&[1, 2], count, context_count);
		assert!((scored.prob - 0.4).abs() < 1e-12);
		assert!((scored.conf - 0.5).abs() < 1e-12);
	}

	#[test]
	fn lambda_is_clamped_into_range() {
		let model = NGramModel::jm(3, 1.5);
		assert_eq!(model.smoothing(), Smoothing::JelinekMercer { lambda: 1.0 });
	}

	#[test]
	fn unseen_context_scores_zero_confidence() {
		let mut model = NGramModel::standard();
		let scored = model.model_at_index(&[1, 2, 3], 2);
		assert_eq!(scored.conf, 0.0);
	}

	#[test]
	fn score_components_stay_in_unit_interval() {
		let mut model = NGramModel::jm(3, 0.5);
		model.learn(&[1, 2, 3, 1, 2, 4, 1, 2, 3]);
		for index in 0..5 {
			let scored = model.model_at_index(&[1, 2, 3, 2, 1], index);
			assert!((0.0..=1.0).contains(&scored.prob), "prob {}", scored.prob);
			assert!((0.0..=1.0).contains(&scored.conf), "conf {}", scored.conf);
		}
	}

	#[test]
	fn fold_confidence_grows_with_matched_orders() {
		let mut model = NGramModel::jm(3, 0.5);
		model.learn(&[1, 2, 3]);
		// All three orders match at the last position.
		let scored = model.model_at_index(&[1, 2, 3], 2);
		assert!((scored.conf - (1.0 - 0.125)).abs() < 1e-12);
		// Only the unigram order matches in a foreign context.
		let scored = model.model_at_index(&[9, 8, 3], 2);
		assert!((scored.conf - 0.5).abs() < 1e-12);
	}

	#[test]
	fn learn_then_forget_restores_counts() {
		let mut model = NGramModel::jm(3, 0.5);
		model.learn(&[1, 2, 3, 4]);
		let before: Vec<(u64, u64)> = [&[1][..], &[1, 2], &[2, 3], &[1, 2, 3], &[2, 3, 4]]
			.iter()
			.map(|seq| model.counter().get_counts(seq))
			.collect();

		model.learn(&[2, 3, 4, 5]);
		model.forget(&[2, 3, 4, 5]);
		let after: Vec<(u64, u64)> = [&[1][..], &[1, 2], &[2, 3], &[1, 2, 3], &[2, 3, 4]]
			.iter()
			.map(|seq| model.counter().get_counts(seq))
			.collect();
		assert_eq!(before, after);
		assert_eq!(model.counter().get_counts(&[5]), (0, 4));
	}

	#[test]
	fn witten_bell_confidence_tracks_successor_diversity() {
		// Context 1 seen 4 times with 2 distinct successors.
		let mut model = NGramModel::wb(2);
		for seq in [[1, 2], [1, 2], [1, 3], [1, 3]] {
			model.learn(&seq);
		}
		let (count, context_count) = model.counter().get_counts(&[1, 2]);
		let scored = model.model_with_confidence(&[1, 2], count, context_count);
		// count 2 of 4, confidence 4 / (4 + 2 distinct).
		assert!((scored.prob - 0.5).abs() < 1e-12);
		assert!((scored.conf - 4.0 / 6.0).abs() < 1e-12);
	}

	#[test]
	fn absolute_discount_reports_renormalized_probability() {
		let mut model = NGramModel::ad(2);
		// Bigrams of length 2: (1,2) twice, (1,3) once, (4,5) once.
		for seq in [[1, 2], [1, 2], [1, 3], [4, 5]] {
			model.learn(&seq);
		}
		// n1 = 2, n2 = 1 at length 2, so D = 2/4 = 0.5.
		let (count, context_count) = model.counter().get_counts(&[1, 2]);
		assert_eq!((count, context_count), (2, 3));
		let scored = model.model_with_confidence(&[1, 2], count, context_count);
		let conf = 1.0 - 2.0 * 0.5 / 3.0;
		assert!((scored.conf - conf).abs() < 1e-12);
		assert!((scored.prob - ((2.0 - 0.5) / 3.0) / conf).abs() < 1e-12);
	}

	#[test]
	fn degenerate_discount_falls_back() {
		// Empty counter: n1 = n2 = 0 makes the discount 0/0.
		let model = NGramModel::ad(2);
		let scored = model.model_with_confidence(&[1, 2], 0, 1);
		assert!(scored.prob.is_finite());
		assert!(scored.conf.is_finite());
	}

	#[test]
	fn modified_discount_clamps_higher_discounts() {
		let mut model = NGramModel::adm(2);
		for seq in [[1, 2], [1, 2], [1, 3], [4, 5]] {
			model.learn(&seq);
		}
		// n3 = 0 at length 2 makes D3 undefined, so it falls back to
		// 0.6 * k; the result must still be a valid pair.
		let (count, context_count) = model.counter().get_counts(&[1, 2]);
		let scored = model.model_with_confidence(&[1, 2], count, context_count);
		assert!((0.0..=1.0).contains(&scored.prob));
		assert!((0.0..=1.0).contains(&scored.conf));
	}

	#[test]
	fn prediction_candidates_come_from_context_successors() {
		let mut model = NGramModel::jm(2, 0.5);
		model.learn(&[1, 2]);
		model.learn(&[1, 2]);
		model.learn(&[1, 3]);
		let predictions = model.predict_token(&[1], 1);
		assert!(predictions.contains_key(&2));
		assert!(predictions.contains_key(&3));
		let p2 = predictions[&2];
		let p3 = predictions[&3];
		assert!(p2.prob > p3.prob);
	}

	#[test]
	fn prediction_cutoff_limits_candidates() {
		let mut model = NGramModel::jm(2, 0.5);
		for token in 10..30 {
			model.learn(&[1, token]);
		}
		model.set_prediction_cutoff(5);
		let predictions = model.predict_token(&[1], 1);
		assert_eq!(predictions.len(), 5);
	}

	#[test]
	fn predicting_at_first_position_uses_empty_context() {
		let mut model = NGramModel::jm(2, 0.5);
		model.learn(&[4, 4, 4, 5]);
		let predictions = model.predict_token(&[], 0);
		assert!(predictions.contains_key(&4));
	}

	#[test]
	fn confidence_query_keeps_the_model_dynamic() {
		let mut model = NGramModel::jm(2, 0.5);
		model.set_dynamic(true);
		model.learn(&[1, 2]);
		model.get_confidence(&[1], 1);
		assert!(model.dynamic());
		// Online learning still happens afterwards.
		model.model_token(&[3, 4], 1);
		assert_eq!(model.counter().get_counts(&[3, 4]).0, 1);
	}

	#[test]
	fn prediction_under_an_outer_pause_restores_the_flag() {
		let mut model = NGramModel::jm(2, 0.5);
		model.set_dynamic(true);
		model.learn(&[1, 2]);
		model.pause_dynamic();
		model.predict_token(&[1], 1);
		model.unpause_dynamic();
		assert!(model.dynamic());
	}

	#[test]
	fn dynamic_model_learns_while_scoring() {
		let mut model = NGramModel::jm(2, 0.5);
		model.set_dynamic(true);
		let input = [1, 2, 1, 2];
		let mut scores = Vec::new();
		for index in 0..input.len() {
			scores.push(model.model_token(&input, index));
		}
		// The second occurrence of the bigram benefits from the first.
		assert!(scores[3].prob > scores[1].prob);
		assert_eq!(model.counter().get_counts(&[1, 2]).0, 2);
	}
}
