use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::vocabulary::{BEGIN_OF_STRING, END_OF_STRING};

/// Splits raw text into token strings, one line at a time.
pub trait Lexer {
	fn lex_line(&self, line: &str) -> Vec<String>;

	fn lex_text(&self, text: &str) -> Vec<Vec<String>> {
		text.lines().map(|line| self.lex_line(line)).collect()
	}
}

/// Whitespace tokenizer, for plain-text corpora.
pub struct WhitespaceLexer;

impl Lexer for WhitespaceLexer {
	fn lex_line(&self, line: &str) -> Vec<String> {
		line.split_whitespace().map(str::to_owned).collect()
	}
}

/// Language-agnostic code tokenizer.
///
/// Splits on punctuation and operators common across C-like languages,
/// keeping the delimiters themselves as tokens. Two-character operators
/// (`==`, `+=`, `++`, ...) are matched before their single-character
/// prefixes. Whitespace separates tokens but is not itself a token.
pub struct NaiveCodeLexer {
	delimiters: Regex,
}

impl NaiveCodeLexer {
	pub fn new() -> Self {
		// Compiled from a literal, cannot fail.
		let delimiters = Regex::new(
			r"\+\+|--|\*\*|==|!=|<=|>=|&&|\|\||\+=|-=|\*=|/=|%=|->|\s+|[.,:;()\[\]{}<>+\-*/%=!&|]",
		)
		.unwrap();
		NaiveCodeLexer { delimiters }
	}
}

impl Default for NaiveCodeLexer {
	fn default() -> Self {
		Self::new()
	}
}

impl Lexer for NaiveCodeLexer {
	fn lex_line(&self, line: &str) -> Vec<String> {
		let mut tokens = Vec::new();
		let mut last = 0;
		for found in self.delimiters.find_iter(line) {
			if found.start() > last {
				tokens.push(line[last..found.start()].to_owned());
			}
			let delimiter = found.as_str();
			if !delimiter.trim().is_empty() {
				tokens.push(delimiter.to_owned());
			}
			last = found.end();
		}
		if last < line.len() {
			tokens.push(line[last..].to_owned());
		}
		tokens
	}
}

/// Drives a [`Lexer`] over files and directories.
///
/// # Responsibilities
/// - Decide which files to lex, by full-name regex (commonly set from an
///   extension).
/// - Fix the sequencing granularity: per-line treats every line as its own
///   unit, whole-file concatenates a file's lines into one unit.
/// - Add sentence markers when enabled: around each line in per-line mode,
///   around the whole file otherwise. Single lines lexed through `lex_line`
///   are always marked as a full unit.
pub struct LexerRunner {
	lexer: Box<dyn Lexer>,
	per_line: bool,
	sentence_markers: bool,
	pattern: String,
	filter: Regex,
}

impl LexerRunner {
	pub fn new(lexer: Box<dyn Lexer>, per_line: bool) -> Self {
		LexerRunner {
			lexer,
			per_line,
			sentence_markers: false,
			pattern: String::from(".*"),
			// The default pattern is a valid literal.
			filter: Regex::new(r"\A(?:.*)\z").unwrap(),
		}
	}

	pub fn per_line(&self) -> bool {
		self.per_line
	}

	pub fn set_sentence_markers(&mut self, sentence_markers: bool) {
		self.sentence_markers = sentence_markers;
	}

	pub fn has_sentence_markers(&self) -> bool {
		self.sentence_markers
	}

	/// Restrict lexing to files whose name fully matches `pattern`.
	///
	/// # Errors
	/// Returns [`Error::Config`] if the pattern is not a valid regex.
	pub fn set_regex(&mut self, pattern: &str) -> Result<()> {
		let filter = Regex::new(&format!(r"\A(?:{pattern})\z"))
			.map_err(|err| Error::Config(format!("invalid file filter {pattern:?}: {err}")))?;
		self.pattern = pattern.to_owned();
		self.filter = filter;
		Ok(())
	}

	/// Restrict lexing to files with the given extension.
	pub fn set_extension(&mut self, extension: &str) -> Result<()> {
		self.set_regex(&format!(r".*\.{}", regex::escape(extension)))
	}

	pub fn pattern(&self) -> &str {
		&self.pattern
	}

	/// Whether the runner would lex this file, judged by its file name.
	pub fn will_lex_file(&self, path: &Path) -> bool {
		path.file_name()
			.and_then(|name| name.to_str())
			.is_some_and(|name| self.filter.is_match(name))
	}

	/// Lex a single line as a complete unit, with markers if enabled.
	pub fn lex_line(&self, line: &str) -> Vec<String> {
		let mut tokens = self.lexer.lex_line(line);
		if self.sentence_markers {
			tokens.insert(0, BEGIN_OF_STRING.to_owned());
			tokens.push(END_OF_STRING.to_owned());
		}
		tokens
	}

	/// Lex a full text into lines of tokens, applying markers according to
	/// the granularity.
	pub fn lex_text(&self, text: &str) -> Vec<Vec<String>> {
		let mut lines = self.lexer.lex_text(text);
		if self.sentence_markers {
			if self.per_line {
				for line in &mut lines {
					line.insert(0, BEGIN_OF_STRING.to_owned());
					line.push(END_OF_STRING.to_owned());
				}
			} else {
				if lines.is_empty() {
					lines.push(Vec::new());
				}
				if let Some(first) = lines.first_mut() {
					first.insert(0, BEGIN_OF_STRING.to_owned());
				}
				if let Some(last) = lines.last_mut() {
					last.push(END_OF_STRING.to_owned());
				}
			}
		}
		lines
	}

	/// Lex one file. Files rejected by the filter lex to nothing.
	pub fn lex_file(&self, path: &Path) -> Result<Vec<Vec<String>>> {
		if !self.will_lex_file(path) {
			return Ok(Vec::new());
		}
		let content = fs::read_to_string(path)?;
		Ok(self.lex_text(&content))
	}

	/// Walk `root` and lex every accepted file, in deterministic name order.
	/// `root` may itself be a file.
	pub fn lex_directory<'a>(
		&'a self,
		root: &Path,
	) -> impl Iterator<Item = Result<(PathBuf, Vec<Vec<String>>)>> + 'a {
		WalkDir::new(root)
			.sort_by_file_name()
			.into_iter()
			.filter_map(|entry| entry.ok())
			.filter(|entry| entry.file_type().is_file())
			.filter(|entry| self.will_lex_file(entry.path()))
			.map(|entry| {
				self.lex_file(entry.path())
					.map(|lines| (entry.path().to_path_buf(), lines))
			})
	}
}
