//! Streaming delimiter detection.

use std::sync::Arc;

/// Knuth–Morris–Pratt automaton fed one byte at a time.
///
/// After every [`feed`](Self::feed) the matcher reports whether the bytes fed
/// so far end with the pattern. Each step is amortized `O(1)` and the state is
/// `O(n)` in the pattern length, independent of how much input was consumed.
///
/// Cloning shares the pattern and its failure table; only the cursor is
/// copied, so every clone tracks its own in-progress match.
#[derive(Debug, Clone)]
pub struct Matcher {
	pattern: Arc<[u8]>,
	/// `failure[k]` is the length of the longest proper border of `pattern[..k]`.
	failure: Arc<[usize]>,
	cursor: usize,
}

impl Matcher {
	/// Creates a matcher searching for `pattern`.
	pub fn new(pattern: impl AsRef<[u8]>) -> Self {
		let pattern: Arc<[u8]> = Arc::from(pattern.as_ref());
		let failure = failure_table(&pattern);
		Self { pattern, failure, cursor: 0 }
	}

	/// Replaces the pattern and discards all progress.
	pub fn initialize(&mut self, pattern: impl AsRef<[u8]>) {
		*self = Self::new(pattern);
	}

	/// Feeds one byte and returns true if the input now ends with the pattern.
	///
	/// On a match the cursor falls back to the border of the whole pattern, so
	/// overlapping occurrences are reported too. Call [`reset`](Self::reset)
	/// after a match to search for non-overlapping occurrences only.
	pub fn feed(&mut self, byte: u8) -> bool {
		let len = self.pattern.len();
		if len == 0 {
			return true;
		}

		loop {
			if self.pattern[self.cursor] == byte {
				self.cursor += 1;
				break;
			}
			if self.cursor == 0 {
				break;
			}
			self.cursor = self.failure[self.cursor];
		}

		if self.cursor == len {
			self.cursor = self.failure[len];
			true
		} else {
			false
		}
	}

	/// Forgets all fed bytes. The pattern is kept.
	pub fn reset(&mut self) {
		self.cursor = 0;
	}

	/// Returns the pattern.
	pub fn pattern(&self) -> &[u8] {
		&self.pattern
	}

	/// Returns the length of the current partial match.
	pub fn cursor(&self) -> usize {
		self.cursor
	}
}

fn failure_table(pattern: &[u8]) -> Arc<[usize]> {
	let mut failure = vec![0; pattern.len() + 1];
	let mut k = 0;
	for i in 1..pattern.len() {
		while k > 0 && pattern[i] != pattern[k] {
			k = failure[k];
		}
		if pattern[i] == pattern[k] {
			k += 1;
		}
		failure[i + 1] = k;
	}
	failure.into()
}
