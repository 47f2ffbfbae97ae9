use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::persist::{LEFT_DIR, RIGHT_DIR};
use crate::model::{Model, Predictions, ProbConf};

/// How two probability/confidence pairs combine into one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MixPolicy {
	/// Weight each side by `1 / (1 - confidence)`, capped at 1000, so a
	/// near-certain side dominates.
	Inverse,
	/// Weight each side by its confidence directly.
	Proportional,
}

impl MixPolicy {
	/// Combine two scores. A zero-confidence side defers entirely to the
	/// other; the mixed confidence is the larger of the two.
	pub fn mix(&self, left: ProbConf, right: ProbConf) -> ProbConf {
		if left.conf == 0.0 && right.conf == 0.0 {
			return ProbConf::ZERO;
		}
		if right.conf == 0.0 {
			return left;
		}
		if left.conf == 0.0 {
			return right;
		}
		let (left_weight, right_weight) = match self {
			MixPolicy::Inverse => (Self::inverse_weight(left.conf), Self::inverse_weight(right.conf)),
			MixPolicy::Proportional => (left.conf, right.conf),
		};
		let prob =
			(left.prob * left_weight + right.prob * right_weight) / (left_weight + right_weight);
		ProbConf::new(prob, left.conf.max(right.conf))
	}

	fn inverse_weight(conf: f64) -> f64 {
		if conf > 0.999 {
			1000.0
		} else {
			1.0 / (1.0 - conf)
		}
	}
}

/// A mixture of two models, scored per position and folded by a
/// [`MixPolicy`].
///
/// With `reverse_right` set, the right model sees every sequence reversed
/// (a forward and a backward model over the same text); its per-position
/// results are mapped back to forward positions.
///
/// # Invariants
/// - Learning, forgetting and notification reach both children.
/// - Prediction consolidates the two candidate sets: a candidate one side
///   did not propose is still scored by that side, by substituting it at
///   the queried position, so every candidate carries a fully mixed score.
pub struct MixModel {
	left: Box<dyn Model>,
	right: Box<dyn Model>,
	policy: MixPolicy,
	reverse_right: bool,
	dynamic: bool,
}

impl MixModel {
	pub fn new(left: Box<dyn Model>, right: Box<dyn Model>, policy: MixPolicy) -> Self {
		MixModel {
			left,
			right,
			policy,
			reverse_right: false,
			dynamic: false,
		}
	}

	/// The default mixture: inverse confidence weighting.
	pub fn standard(left: Box<dyn Model>, right: Box<dyn Model>) -> Self {
		Self::new(left, right, MixPolicy::Inverse)
	}

	pub fn proportional(left: Box<dyn Model>, right: Box<dyn Model>) -> Self {
		Self::new(left, right, MixPolicy::Proportional)
	}

	/// Mix a forward model with a model that reads the sequence backwards.
	pub fn bidirectional(forward: Box<dyn Model>, backward: Box<dyn Model>) -> Self {
		let mut mix = Self::new(forward, backward, MixPolicy::Inverse);
		mix.reverse_right = true;
		mix
	}

	pub fn policy(&self) -> MixPolicy {
		self.policy
	}

	pub fn left(&self) -> &dyn Model {
		&*self.left
	}

	pub fn left_mut(&mut self) -> &mut dyn Model {
		&mut *self.left
	}

	pub fn right(&self) -> &dyn Model {
		&*self.right
	}

	pub fn right_mut(&mut self) -> &mut dyn Model {
		&mut *self.right
	}

	pub fn set_left(&mut self, left: Box<dyn Model>) {
		self.left = left;
	}

	pub fn set_right(&mut self, right: Box<dyn Model>) {
		self.right = right;
	}

	fn right_view(&self, input: &[usize], index: usize) -> Option<(Vec<usize>, usize)> {
		if !self.reverse_right {
			return None;
		}
		let mut reversed = input.to_vec();
		reversed.reverse();
		Some((reversed, input.len() - index - 1))
	}

	fn learn_token_right(&mut self, input: &[usize], index: usize) {
		match self.right_view(input, index) {
			Some((reversed, mapped)) => self.right.learn_token(&reversed, mapped),
			None => self.right.learn_token(input, index),
		}
	}

	fn forget_token_right(&mut self, input: &[usize], index: usize) {
		match self.right_view(input, index) {
			Some((reversed, mapped)) => self.right.forget_token(&reversed, mapped),
			None => self.right.forget_token(input, index),
		}
	}

	fn model_token_right(&mut self, input: &[usize], index: usize) -> ProbConf {
		match self.right_view(input, index) {
			Some((reversed, mapped)) => self.right.model_token(&reversed, mapped),
			None => self.right.model_token(input, index),
		}
	}

	fn predict_token_right(&mut self, input: &[usize], index: usize) -> Predictions {
		match self.right_view(input, index) {
			Some((reversed, mapped)) => self.right.predict_token(&reversed, mapped),
			None => self.right.predict_token(input, index),
		}
	}

	/// Mix two candidate sets for one position. Candidates missing on one
	/// side are scored there by substitution before mixing, under paused
	/// dynamic updates.
	fn mix_predictions(
		&mut self,
		input: &[usize],
		index: usize,
		left: Predictions,
		right: Predictions,
	) -> Predictions {
		self.left.pause_dynamic();
		self.right.pause_dynamic();

		let mut probe = input.to_vec();
		if index == probe.len() {
			probe.push(0);
		}
		let mut mixed = Predictions::with_capacity(left.len() + right.len());
		for (&candidate, &own) in &left {
			let other = match right.get(&candidate) {
				Some(&scored) => scored,
				None => {
					probe[index] = candidate;
					self.model_token_right(&probe, index)
				}
			};
			mixed.insert(candidate, self.policy.mix(own, other));
		}
		for (&candidate, &own) in &right {
			if left.contains_key(&candidate) {
				continue;
			}
			probe[index] = candidate;
			let other = self.left.model_token(&probe, index);
			mixed.insert(candidate, self.policy.mix(other, own));
		}

		self.left.unpause_dynamic();
		self.right.unpause_dynamic();
		mixed
	}
}

impl Model for MixModel {
	fn notify(&mut self, next: &Path) {
		self.left.notify(next);
		self.right.notify(next);
	}

	fn dynamic(&self) -> bool {
		self.dynamic
	}

	fn set_dynamic(&mut self, dynamic: bool) {
		self.dynamic = dynamic;
		self.left.set_dynamic(dynamic);
		self.right.set_dynamic(dynamic);
	}

	fn pause_dynamic(&mut self) {
		self.left.pause_dynamic();
		self.right.pause_dynamic();
	}

	fn unpause_dynamic(&mut self) {
		self.left.unpause_dynamic();
		self.right.unpause_dynamic();
	}

	fn learn(&mut self, input: &[usize]) {
		self.left.learn(input);
		if self.reverse_right {
			let mut reversed = input.to_vec();
			reversed.reverse();
			self.right.learn(&reversed);
		} else {
			self.right.learn(input);
		}
	}

	fn learn_token(&mut self, input: &[usize], index: usize) {
		self.left.learn_token(input, index);
		self.learn_token_right(input, index);
	}

	fn forget(&mut self, input: &[usize]) {
		self.left.forget(input);
		if self.reverse_right {
			let mut reversed = input.to_vec();
			reversed.reverse();
			self.right.forget(&reversed);
		} else {
			self.right.forget(input);
		}
	}

	fn forget_token(&mut self, input: &[usize], index: usize) {
		self.left.forget_token(input, index);
		self.forget_token_right(input, index);
	}

	fn model(&mut self, input: &[usize]) -> Vec<ProbConf> {
		let left = self.left.model(input);
		let right = if self.reverse_right {
			let mut reversed = input.to_vec();
			reversed.reverse();
			let mut scores = self.right.model(&reversed);
			scores.reverse();
			scores
		} else {
			self.right.model(input)
		};
		left.into_iter()
			.zip(right)
			.map(|(l, r)| self.policy.mix(l, r))
			.collect()
	}

	fn model_token(&mut self, input: &[usize], index: usize) -> ProbConf {
		let left = self.left.model_token(input, index);
		let right = self.model_token_right(input, index);
		self.policy.mix(left, right)
	}

	fn predict_token(&mut self, input: &[usize], index: usize) -> Predictions {
		let left = self.left.predict_token(input, index);
		let right = self.predict_token_right(input, index);
		self.mix_predictions(input, index, left, right)
	}

	fn save(&self, directory: &Path) -> Result<()> {
		let left_dir = directory.join(LEFT_DIR);
		let right_dir = directory.join(RIGHT_DIR);
		fs::create_dir_all(&left_dir)?;
		fs::create_dir_all(&right_dir)?;
		self.left.save(&left_dir)?;
		self.right.save(&right_dir)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::ngram::NGramModel;

	/// Scores every position with a fixed pair; records nothing.
	struct FixedModel {
		scored: ProbConf,
	}

	impl FixedModel {
		fn boxed(prob: f64, conf: f64) -> Box<dyn Model> {
			Box::new(FixedModel {
				scored: ProbConf::new(prob, conf),
			})
		}
	}

	impl Model for FixedModel {
		fn notify(&mut self, _next: &Path) {}
		fn dynamic(&self) -> bool {
			false
		}
		fn set_dynamic(&mut self, _dynamic: bool) {}
		fn pause_dynamic(&mut self) {}
		fn unpause_dynamic(&mut self) {}
		fn learn_token(&mut self, _input: &[usize], _index: usize) {}
		fn forget_token(&mut self, _input: &[usize], _index: usize) {}
		fn model_token(&mut self, _input: &[usize], _index: usize) -> ProbConf {
			self.scored
		}
		fn predict_token(&mut self, _input: &[usize], _index: usize) -> Predictions {
			Predictions::new()
		}
		fn save(&self, _directory: &Path) -> Result<()> {
			Err(crate::Error::PersistenceUnsupported)
		}
	}

	/// Scores positions by `prob = index / 10`; used to observe which
	/// position a side was actually asked about.
	struct PositionModel;

	impl Model for PositionModel {
		fn notify(&mut self, _next: &Path) {}
		fn dynamic(&self) -> bool {
			false
		}
		fn set_dynamic(&mut self, _dynamic: bool) {}
		fn pause_dynamic(&mut self) {}
		fn unpause_dynamic(&mut self) {}
		fn learn_token(&mut self, _input: &[usize], _index: usize) {}
		fn forget_token(&mut self, _input: &[usize], _index: usize) {}
		fn model_token(&mut self, _input: &[usize], index: usize) -> ProbConf {
			ProbConf::new(index as f64 / 10.0, 1.0)
		}
		fn predict_token(&mut self, _input: &[usize], _index: usize) -> Predictions {
			Predictions::new()
		}
		fn save(&self, _directory: &Path) -> Result<()> {
			Err(crate::Error::PersistenceUnsupported)
		}
	}

	#[test]
	fn zero_confidence_side_defers_to_the_other() {
		let scored = ProbConf::new(0.7, 0.4);
		for policy in [MixPolicy::Inverse, MixPolicy::Proportional] {
			assert_eq!(policy.mix(scored, ProbConf::ZERO), scored);
			assert_eq!(policy.mix(ProbConf::ZERO, scored), scored);
			assert_eq!(policy.mix(ProbConf::ZERO, ProbConf::ZERO), ProbConf::ZERO);
		}
	}

	#[test]
	fn inverse_mix_weights_by_inverse_residual_confidence() {
		let left = ProbConf::new(1.0, 0.5); // weight 2
		let right = ProbConf::new(0.0, 0.75); // weight 4
		let mixed = MixPolicy::Inverse.mix(left, right);
		assert!((mixed.prob - 2.0 / 6.0).abs() < 1e-12);
		assert!((mixed.conf - 0.75).abs() < 1e-12);
	}

	#[test]
	fn inverse_weight_is_capped_for_near_certainty() {
		let left = ProbConf::new(1.0, 0.9999);
		let right = ProbConf::new(0.0, 0.5);
		let mixed = MixPolicy::Inverse.mix(left, right);
		assert!((mixed.prob - 1000.0 / 1002.0).abs() < 1e-12);
	}

	#[test]
	fn proportional_mix_weights_by_confidence() {
		let left = ProbConf::new(1.0, 0.2);
		let right = ProbConf::new(0.5, 0.6);
		let mixed = MixPolicy::Proportional.mix(left, right);
		assert!((mixed.prob - (0.2 + 0.3) / 0.8).abs() < 1e-12);
		assert!((mixed.conf - 0.6).abs() < 1e-12);
	}

	#[test]
	fn mixed_model_scores_fall_between_the_sides() {
		let mix = &mut MixModel::standard(FixedModel::boxed(0.8, 0.5), FixedModel::boxed(0.2, 0.5));
		let scored = mix.model_token(&[1, 2, 3], 1);
		assert!((scored.prob - 0.5).abs() < 1e-12);
		assert!((scored.conf - 0.5).abs() < 1e-12);
	}

	#[test]
	fn bidirectional_maps_positions_onto_the_reversed_sequence() {
		// Left side is silent, so the mix reports the right side's score,
		// which reveals the position it was queried at.
		let mut mix = MixModel::bidirectional(FixedModel::boxed(0.0, 0.0), Box::new(PositionModel));
		let input = [3, 5, 7];
		let scores = mix.model(&input);
		// Forward position 0 is reversed position 2, and so on.
		assert!((scores[0].prob - 0.2).abs() < 1e-12);
		assert!((scores[1].prob - 0.1).abs() < 1e-12);
		assert!((scores[2].prob - 0.0).abs() < 1e-12);

		let single = mix.model_token(&input, 0);
		assert!((single.prob - 0.2).abs() < 1e-12);
	}

	#[test]
	fn prediction_consolidation_scores_missing_candidates() {
		// Left knows successor 2 of context 1, right knows successor 3.
		let mut left = NGramModel::jm(2, 0.5);
		left.learn(&[1, 2]);
		let mut right = NGramModel::jm(2, 0.5);
		right.learn(&[1, 3]);

		let mut mix = MixModel::standard(Box::new(left), Box::new(right));
		let predictions = mix.predict_token(&[1], 1);
		assert!(predictions.contains_key(&2));
		assert!(predictions.contains_key(&3));
		// Each candidate was scored by both sides: the side that never saw
		// it contributes its unigram fallback, which lowers the mixed
		// probability below the proposing side's own estimate.
		for scored in predictions.values() {
			assert!(scored.conf > 0.0);
			assert!((0.0..=1.0).contains(&scored.prob));
		}
	}

	#[test]
	fn mixture_learning_reaches_both_children() {
		let left = NGramModel::jm(2, 0.5);
		let right = NGramModel::jm(2, 0.5);
		let mut mix = MixModel::standard(Box::new(left), Box::new(right));
		mix.learn(&[1, 2, 3]);
		let scored = mix.model_token(&[1, 2, 3], 2);
		assert!(scored.conf > 0.0);
		mix.forget(&[1, 2, 3]);
		let scored = mix.model_token(&[1, 2, 3], 2);
		assert_eq!(scored.conf, 0.0);
	}
}
