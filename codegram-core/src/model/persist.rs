//! Model persistence.
//!
//! An n-gram model persists as two files in its directory: a binary counter
//! snapshot and a JSON configuration record naming the smoothing method and
//! order. A mixture persists as `left/` and `right/` subdirectories, one per
//! child, recursively. Loading dispatches on that layout, so a saved model
//! tree restores without knowing its shape up front.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::counting::MapTrieCounter;
use crate::error::{Error, Result};
use crate::model::mix::MixModel;
use crate::model::ngram::{NGramModel, Smoothing};
use crate::model::Model;

pub(crate) const COUNTER_FILE: &str = "counter.bin";
pub(crate) const CONFIG_FILE: &str = "config.json";
pub(crate) const VOCABULARY_FILE: &str = "vocabulary.tsv";
pub(crate) const LEFT_DIR: &str = "left";
pub(crate) const RIGHT_DIR: &str = "right";

/// The durable description of an n-gram model, everything but its counts.
#[derive(Serialize, Deserialize, Debug)]
struct NGramConfig {
	order: usize,
	smoothing: Smoothing,
}

/// Persist an n-gram model under `directory`.
pub(crate) fn save_ngram(model: &NGramModel, directory: &Path) -> Result<()> {
	fs::create_dir_all(directory)?;
	let snapshot = postcard::to_stdvec(model.counter())?;
	fs::write(directory.join(COUNTER_FILE), snapshot)?;
	let config = NGramConfig {
		order: model.order(),
		smoothing: model.smoothing(),
	};
	let record = serde_json::to_vec_pretty(&config)?;
	fs::write(directory.join(CONFIG_FILE), record)?;
	Ok(())
}

/// Restore an n-gram model persisted under `directory`.
pub fn load_ngram(directory: &Path) -> Result<NGramModel> {
	let config_path = directory.join(CONFIG_FILE);
	let record = fs::read(&config_path).map_err(|err| Error::Load {
		path: config_path.clone(),
		reason: err.to_string(),
	})?;
	let config: NGramConfig = serde_json::from_slice(&record)?;

	let counter_path = directory.join(COUNTER_FILE);
	let snapshot = fs::read(&counter_path).map_err(|err| Error::Load {
		path: counter_path,
		reason: err.to_string(),
	})?;
	let counter: MapTrieCounter = postcard::from_bytes(&snapshot)?;
	Ok(NGramModel::with_counter(config.order, config.smoothing, counter))
}

/// Restore whatever model tree was persisted under `directory`: a mixture
/// if child directories are present, a plain n-gram model otherwise.
pub fn load_model(directory: &Path) -> Result<Box<dyn Model>> {
	let left = directory.join(LEFT_DIR);
	let right = directory.join(RIGHT_DIR);
	if left.is_dir() && right.is_dir() {
		let mix = MixModel::standard(load_model(&left)?, load_model(&right)?);
		return Ok(Box::new(mix));
	}
	Ok(Box::new(load_ngram(directory)?))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::IndexedModel;

	#[test]
	fn ngram_round_trip() {
		let mut model = NGramModel::jm(3, 0.25);
		model.learn(&[1, 2, 3, 1, 2, 4]);

		let dir = tempfile::tempdir().unwrap();
		model.save_to(dir.path()).unwrap();

		let mut restored = load_ngram(dir.path()).unwrap();
		assert_eq!(restored.order(), 3);
		assert_eq!(restored.smoothing(), Smoothing::JelinekMercer { lambda: 0.25 });
		assert_eq!(
			restored.model_at_index(&[1, 2, 3], 2),
			model.model_at_index(&[1, 2, 3], 2)
		);
	}

	#[test]
	fn mixture_round_trip() {
		let mut left = NGramModel::jm(2, 0.5);
		left.learn(&[1, 2]);
		let mut right = NGramModel::wb(3);
		right.learn(&[1, 3]);
		let mut mix = MixModel::standard(Box::new(left), Box::new(right));

		let dir = tempfile::tempdir().unwrap();
		mix.save(dir.path()).unwrap();

		let mut restored = load_model(dir.path()).unwrap();
		assert_eq!(
			restored.model_token(&[1, 2], 1),
			mix.model_token(&[1, 2], 1)
		);
	}

	#[test]
	fn loading_an_empty_directory_fails() {
		let dir = tempfile::tempdir().unwrap();
		assert!(matches!(load_model(dir.path()), Err(Error::Load { .. })));
	}

	#[test]
	fn smoothing_is_tagged_in_the_config_record() {
		let model = NGramModel::adm(4);
		let dir = tempfile::tempdir().unwrap();
		save_ngram(&model, dir.path()).unwrap();
		let record = std::fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap();
		assert!(record.contains("ModifiedAbsoluteDiscount"));
	}
}
