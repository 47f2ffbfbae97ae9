use serde::{Deserialize, Serialize};

/// Running aggregate over per-token evaluation values (entropies or
/// reciprocal ranks).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Summary {
	pub count: u64,
	pub sum: f64,
	pub min: f64,
	pub max: f64,
}

impl Default for Summary {
	fn default() -> Self {
		Summary {
			count: 0,
			sum: 0.0,
			min: f64::INFINITY,
			max: f64::NEG_INFINITY,
		}
	}
}

impl Summary {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add(&mut self, value: f64) {
		self.count += 1;
		self.sum += value;
		self.min = self.min.min(value);
		self.max = self.max.max(value);
	}

	pub fn merge(&mut self, other: &Summary) {
		self.count += other.count;
		self.sum += other.sum;
		self.min = self.min.min(other.min);
		self.max = self.max.max(other.max);
	}

	/// The mean over all added values, zero when empty.
	pub fn mean(&self) -> f64 {
		if self.count == 0 {
			0.0
		} else {
			self.sum / self.count as f64
		}
	}
}
