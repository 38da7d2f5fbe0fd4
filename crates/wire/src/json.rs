use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{Error, Result, Serializer};

/// Compact JSON letters separated by a single line feed.
///
/// Compact `serde_json` output escapes control characters inside strings, so
/// a raw `\n` never appears inside an encoded letter.
pub struct JsonSerializer<L> {
	_letter: PhantomData<fn() -> L>,
}

impl<L> JsonSerializer<L> {
	/// Creates a JSON serializer for `L`.
	#[must_use]
	pub const fn new() -> Self {
		Self { _letter: PhantomData }
	}
}

impl<L> Default for JsonSerializer<L> {
	fn default() -> Self {
		Self::new()
	}
}

impl<L> Clone for JsonSerializer<L> {
	fn clone(&self) -> Self {
		Self::new()
	}
}

impl<L> std::fmt::Debug for JsonSerializer<L> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("JsonSerializer")
	}
}

impl<L> Serializer<L> for JsonSerializer<L>
where
	L: Serialize + DeserializeOwned + 'static,
{
	fn encode(&self, letter: &L) -> Result<String> {
		serde_json::to_string(letter).map_err(Error::encode)
	}

	fn decode(&self, raw: &str) -> Result<L> {
		serde_json::from_str(raw).map_err(Error::decode)
	}

	fn separator(&self) -> &str {
		"\n"
	}
}
