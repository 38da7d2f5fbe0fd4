//! Serializer contract and the delimiter framing built on top of it.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Error, Matcher, Result};

/// Binding between one letter type and its textual wire representation.
///
/// Implementations must be stateless: one instance is shared by every
/// connection using it. `decode(encode(x))` must yield `x`, and the output of
/// [`encode`](Self::encode) must never contain [`separator`](Self::separator);
/// [`Framing`] relies on both without checking them.
pub trait Serializer<L>: Send + Sync + 'static {
	/// Encodes a letter into its wire text.
	fn encode(&self, letter: &L) -> Result<String>;

	/// Decodes one frame's text into a letter.
	fn decode(&self, raw: &str) -> Result<L>;

	/// Returns the text written after every letter.
	fn separator(&self) -> &str;
}

/// A [`Serializer`] together with a precomputed separator [`Matcher`].
///
/// Cheap to share behind an [`Arc`]; every [`decode_next`](Self::decode_next)
/// call works on its own clone of the matcher.
pub struct Framing<L> {
	serializer: Arc<dyn Serializer<L>>,
	matcher: Matcher,
}

impl<L: 'static> std::fmt::Debug for Framing<L> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Framing").field("separator", &self.serializer.separator()).finish_non_exhaustive()
	}
}

impl<L: 'static> Framing<L> {
	/// Wraps `serializer`, rejecting an empty separator.
	pub fn new(serializer: impl Serializer<L>) -> Result<Self> {
		Self::from_arc(Arc::new(serializer))
	}

	/// Wraps an already shared serializer.
	pub fn from_arc(serializer: Arc<dyn Serializer<L>>) -> Result<Self> {
		let separator = serializer.separator();
		if separator.is_empty() {
			return Err(Error::EmptySeparator);
		}
		let matcher = Matcher::new(separator);
		Ok(Self { serializer, matcher })
	}

	/// Encodes a letter without framing.
	pub fn encode(&self, letter: &L) -> Result<String> {
		self.serializer.encode(letter)
	}

	/// Decodes unframed text.
	pub fn decode(&self, raw: &str) -> Result<L> {
		self.serializer.decode(raw)
	}

	/// Returns the frame separator.
	pub fn separator(&self) -> &str {
		self.serializer.separator()
	}

	/// Writes one letter followed by the separator. Does not flush.
	///
	/// # Errors
	///
	/// - `Error::Encode` when the serializer rejects the letter; nothing is
	///   written in that case.
	/// - `Error::Io` when `sink` fails.
	pub async fn encode_next<W>(&self, sink: &mut W, letter: &L) -> Result<()>
	where
		W: AsyncWrite + Unpin + ?Sized,
	{
		let raw = self.serializer.encode(letter)?;
		sink.write_all(raw.as_bytes()).await?;
		sink.write_all(self.separator().as_bytes()).await?;
		Ok(())
	}

	/// Reads the next frame from `source` and decodes it.
	///
	/// Returns `Ok(None)` when `source` is exhausted before the first byte of a
	/// frame. The separator is consumed before decoding, so after an
	/// `Error::Decode` the reader is positioned at the next frame.
	///
	/// # Errors
	///
	/// - `Error::TruncatedFrame` when `source` ends after part of a frame.
	/// - `Error::Decode` when the frame is not UTF-8 or the serializer rejects it.
	/// - `Error::Io` when `source` fails.
	pub async fn decode_next<R>(&self, source: &mut R) -> Result<Option<L>>
	where
		R: AsyncBufRead + Unpin + ?Sized,
	{
		let mut matcher = self.matcher.clone();
		let mut frame = Vec::new();

		loop {
			let available = source.fill_buf().await?;
			if available.is_empty() {
				if frame.is_empty() {
					return Ok(None);
				}
				return Err(Error::TruncatedFrame(frame.len()));
			}

			let mut used = 0;
			let mut matched = false;
			for &byte in available {
				used += 1;
				if matcher.feed(byte) {
					matched = true;
					break;
				}
			}
			frame.extend_from_slice(&available[..used]);
			source.consume(used);

			if matched {
				frame.truncate(frame.len() - matcher.pattern().len());
				let raw = std::str::from_utf8(&frame).map_err(Error::decode)?;
				return self.serializer.decode(raw).map(Some);
			}
		}
	}
}
