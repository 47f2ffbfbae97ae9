use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::rc::Rc;

use crate::model::ngram::NGramModel;
use crate::model::{
	build_or_standard, DynamicState, IndexedModel, Model, ModelFactory, Predictions, ProbConf,
};

/// Default number of recently scored positions the cache retains.
pub const DEFAULT_CACHE_CAPACITY: usize = 5000;

/// A recency overlay: a base model fed with the last N scored positions.
///
/// The cache is dynamic by default, but learning happens inside scoring
/// rather than through `learn`: every position scored while dynamic is
/// pushed into a FIFO and taught to the base model, and once the FIFO
/// exceeds capacity the oldest position is forgotten again. `learn` and
/// `forget` are deliberately no-ops, so corpus training passes leave the
/// cache untouched.
///
/// On notification of a new file the base model is rebuilt from the factory
/// and the FIFO is dropped: recency does not carry across files.
pub struct CacheModel {
	base: Box<dyn Model>,
	factory: ModelFactory,
	capacity: usize,
	recent: VecDeque<(Rc<Vec<usize>>, usize)>,
	// Dedup store so positions within one sequence share its allocation.
	sequences: HashSet<Rc<Vec<usize>>>,
	dynamics: DynamicState,
}

impl CacheModel {
	pub fn new() -> Self {
		Self::with_factory(
			Rc::new(|| Ok(Box::new(NGramModel::standard()) as Box<dyn Model>)),
			DEFAULT_CACHE_CAPACITY,
		)
	}

	pub fn with_factory(factory: ModelFactory, capacity: usize) -> Self {
		let base = build_or_standard(&factory);
		let mut dynamics = DynamicState::default();
		dynamics.set(true);
		CacheModel {
			base,
			factory,
			capacity,
			recent: VecDeque::new(),
			sequences: HashSet::new(),
			dynamics,
		}
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	fn store(&mut self, input: &[usize], index: usize) {
		let shared = match self.sequences.get(&input.to_vec()) {
			Some(existing) => Rc::clone(existing),
			None => {
				let fresh = Rc::new(input.to_vec());
				self.sequences.insert(Rc::clone(&fresh));
				fresh
			}
		};
		self.recent.push_back((shared, index));
	}
}

impl Default for CacheModel {
	fn default() -> Self {
		Self::new()
	}
}

impl IndexedModel for CacheModel {
	fn dynamics(&self) -> &DynamicState {
		&self.dynamics
	}

	fn dynamics_mut(&mut self) -> &mut DynamicState {
		&mut self.dynamics
	}

	fn notify_file(&mut self, _next: &Path) {
		self.base = build_or_standard(&self.factory);
		self.recent.clear();
		self.sequences.clear();
	}

	// Corpus training does not reach the cache.
	fn learn_at(&mut self, _input: &[usize], _index: usize) {}

	fn forget_at(&mut self, _input: &[usize], _index: usize) {}

	fn model_at_index(&mut self, input: &[usize], index: usize) -> ProbConf {
		let scored = self.base.model_token(input, index);
		if self.capacity > 0 && self.dynamics.is_dynamic() {
			self.store(input, index);
			self.base.learn_token(input, index);
			if self.recent.len() > self.capacity {
				if let Some((oldest, oldest_index)) = self.recent.pop_front() {
					self.base.forget_token(&oldest, oldest_index);
					// Only our handle and the dedup store's remain once the
					// FIFO holds no other position of this sequence.
					if Rc::strong_count(&oldest) == 2 {
						self.sequences.remove(&oldest);
					}
				}
			}
		}
		scored
	}

	fn predict_at_index(&mut self, input: &[usize], index: usize) -> Predictions {
		self.base.predict_token(input, index)
	}

	fn save_to(&self, _directory: &Path) -> crate::Result<()> {
		Err(crate::Error::PersistenceUnsupported)
	}
}
