use std::fmt::Display;
use std::marker::PhantomData;
use std::str::FromStr;

use crate::{Error, Result, Serializer};

/// Plain-text letters through [`Display`] and [`FromStr`].
///
/// Suited to numbers, identifiers and other single-token letters. A letter
/// whose framed text would be cut before its own separator is rejected when
/// encoding: text containing the separator, and with a self-overlapping
/// separator such as `"bb"`, text ending in a prefix of it.
pub struct TextSerializer<T> {
	separator: String,
	_letter: PhantomData<fn() -> T>,
}

impl<T> TextSerializer<T> {
	/// Creates a serializer separating letters with a line feed.
	pub fn new() -> Self {
		Self::with_separator("\n")
	}

	/// Creates a serializer with a custom separator.
	pub fn with_separator(separator: impl Into<String>) -> Self {
		Self {
			separator: separator.into(),
			_letter: PhantomData,
		}
	}
}

impl<T> Default for TextSerializer<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> Clone for TextSerializer<T> {
	fn clone(&self) -> Self {
		Self::with_separator(self.separator.clone())
	}
}

impl<T> std::fmt::Debug for TextSerializer<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TextSerializer").field("separator", &self.separator).finish()
	}
}

impl<T> Serializer<T> for TextSerializer<T>
where
	T: Display + FromStr + 'static,
	T::Err: std::error::Error + Send + Sync + 'static,
{
	fn encode(&self, letter: &T) -> Result<String> {
		let mut raw = letter.to_string();
		if self.separator.is_empty() {
			return Ok(raw);
		}
		// The frame must end at the first separator occurrence; with a
		// self-overlapping separator a letter tail can complete an earlier one.
		let len = raw.len();
		raw.push_str(&self.separator);
		if raw.find(self.separator.as_str()) != Some(len) {
			return Err(Error::encode(format!("letter text collides with the separator {:?}", self.separator)));
		}
		raw.truncate(len);
		Ok(raw)
	}

	fn decode(&self, raw: &str) -> Result<T> {
		raw.parse().map_err(Error::decode)
	}

	fn separator(&self) -> &str {
		&self.separator
	}
}
