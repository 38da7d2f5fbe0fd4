use std::io;

/// Boxed error carried by encode/decode faults.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible wire errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// Input/output errors from the underlying stream.
	#[error("{0}")]
	Io(#[from] io::Error),
	/// The stream ended after some bytes of a frame but before its separator.
	#[error("stream ended inside a frame ({0} bytes without separator)")]
	TruncatedFrame(usize),
	/// A letter could not be encoded.
	#[error("encoding failed: {0}")]
	Encode(#[source] BoxError),
	/// A frame could not be decoded into a letter.
	#[error("decoding failed: {0}")]
	Decode(#[source] BoxError),
	/// Serializers must use a non-empty separator.
	#[error("separator must not be empty")]
	EmptySeparator,
}

impl Error {
	/// Wraps any error as an encode fault.
	pub fn encode(err: impl Into<BoxError>) -> Self {
		Self::Encode(err.into())
	}

	/// Wraps any error as a decode fault.
	pub fn decode(err: impl Into<BoxError>) -> Self {
		Self::Decode(err.into())
	}

	/// Returns true for faults confined to one frame's content.
	///
	/// The stream stays aligned on frame boundaries after such a fault, so a
	/// reader may continue with the next frame.
	pub fn is_decode(&self) -> bool {
		matches!(self, Self::Decode(_))
	}
}
