//! Statistical n-gram language modeling over token sequences.
//!
//! The crate is organized around a small pipeline:
//!
//! - [`lexing`] splits source files into token strings and fixes the
//!   sequencing granularity (per line or whole file).
//! - [`vocabulary`] interns token strings into dense indices.
//! - [`counting`] stores sequence frequencies in a trie.
//! - [`model`] turns counts into probability/confidence scores: smoothed
//!   n-gram models, mixtures, a recency cache and per-directory nesting.
//! - [`runner`] orchestrates the pipeline over files and directories:
//!   training, entropy and prediction evaluation, and text completion.

pub mod counting;
pub mod error;
pub mod lexing;
pub mod model;
pub mod runner;
pub mod vocabulary;

pub use error::{Error, Result};
pub use model::{Model, ProbConf};
pub use runner::{ModelRunner, Summary};
pub use vocabulary::Vocabulary;
