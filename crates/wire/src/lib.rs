//! Delimiter-based framing for postie letters.
//!
//! This crate holds everything that touches the wire format:
//! * [`Matcher`]: Streaming delimiter detection (Knuth–Morris–Pratt)
//! * [`Serializer`]: Encode/decode contract for one letter type
//! * [`Framing`]: Frame cutting and writing on top of a [`Serializer`]
//! * [`JsonSerializer`] and [`TextSerializer`]: Ready-made encodings

#![warn(missing_docs)]

mod error;
mod framing;
mod json;
mod matcher;
mod text;

pub use error::{BoxError, Error, Result};
pub use framing::{Framing, Serializer};
pub use json::JsonSerializer;
pub use matcher::Matcher;
pub use text::TextSerializer;
