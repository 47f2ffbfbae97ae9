use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the core library.
///
/// Most modeling operations are infallible by design (unseen context is a
/// zero-confidence score, not an error); errors are reserved for I/O,
/// persistence and configuration problems.
#[derive(Debug, Error)]
pub enum Error {
	/// I/O error from the filesystem.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// Invalid configuration value that could not be clamped.
	#[error("invalid configuration: {0}")]
	Config(String),

	/// Persisted model state is missing or malformed.
	#[error("load failed: {path}: {reason}")]
	Load { path: PathBuf, reason: String },

	/// Counter snapshot could not be encoded or decoded.
	#[error("counter snapshot error: {0}")]
	Snapshot(#[from] postcard::Error),

	/// Model configuration record could not be encoded or decoded.
	#[error("config record error: {0}")]
	ConfigRecord(#[from] serde_json::Error),

	/// The model does not support persistence (e.g. cache or nested models).
	#[error("persistence is not supported by this model")]
	PersistenceUnsupported,

	/// A model factory failed to produce a model.
	#[error("model construction failed: {0}")]
	Factory(String),
}

/// Convenience result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn error_display_config() {
		let err = Error::Config("randomness must be between 0.0 and 1.0".to_owned());
		assert_eq!(
			err.to_string(),
			"invalid configuration: randomness must be between 0.0 and 1.0"
		);
	}

	#[test]
	fn io_error_conversion() {
		let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
		let err: Error = io_err.into();
		assert!(matches!(err, Error::Io(_)));
	}
}
