//! Configuration types for postmen.

use serde::{Deserialize, Deserializer};

use crate::{Delivery, Result};

const DEFAULT_BUFFER: usize = 8 * 1024;

/// What the receiver does with a frame whose content cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecodePolicy {
	/// Report the fault and continue with the next frame.
	#[default]
	Skip,
	/// Report the fault and tear the connection down.
	Abort,
}

/// Settings shared by a postman and every replica made from it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PostmanConfig {
	/// Fan-out policy for inbound letters.
	pub delivery: Delivery,
	/// Handling of undecodable frames.
	pub decode_policy: DecodePolicy,
	/// Capacity of the read buffer in bytes. Zero is raised to one.
	#[serde(deserialize_with = "at_least_one")]
	pub read_buffer: usize,
	/// Capacity of the write buffer in bytes. Zero is raised to one.
	#[serde(deserialize_with = "at_least_one")]
	pub write_buffer: usize,
}

fn at_least_one<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
	D: Deserializer<'de>,
{
	Ok(usize::deserialize(deserializer)?.max(1))
}

impl Default for PostmanConfig {
	fn default() -> Self {
		Self {
			delivery: Delivery::default(),
			decode_policy: DecodePolicy::default(),
			read_buffer: DEFAULT_BUFFER,
			write_buffer: DEFAULT_BUFFER,
		}
	}
}

impl PostmanConfig {
	/// Parses a TOML document. Missing keys keep their defaults.
	///
	/// # Errors
	///
	/// `Error::Config` when the document is malformed or names an unknown variant.
	pub fn from_toml(source: &str) -> Result<Self> {
		Ok(toml::from_str(source)?)
	}

	/// Set the delivery strategy.
	pub fn delivery(mut self, delivery: Delivery) -> Self {
		self.delivery = delivery;
		self
	}

	/// Set the decode policy.
	pub fn decode_policy(mut self, policy: DecodePolicy) -> Self {
		self.decode_policy = policy;
		self
	}

	/// Set both buffer capacities.
	pub fn buffers(mut self, read: usize, write: usize) -> Self {
		self.read_buffer = read.max(1);
		self.write_buffer = write.max(1);
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::Error;

	#[test]
	fn defaults() {
		let config = PostmanConfig::default();
		assert_eq!(config.delivery, Delivery::Sequential);
		assert_eq!(config.decode_policy, DecodePolicy::Skip);
		assert_eq!(config.read_buffer, DEFAULT_BUFFER);
	}

	#[test]
	fn parses_partial_toml() {
		let config = PostmanConfig::from_toml(
			r#"
			delivery = "ordered-parallel"
			write-buffer = 1024
			"#,
		)
		.unwrap();
		assert_eq!(config.delivery, Delivery::OrderedParallel);
		assert_eq!(config.decode_policy, DecodePolicy::Skip);
		assert_eq!(config.write_buffer, 1024);
		assert_eq!(config.read_buffer, DEFAULT_BUFFER);
	}

	#[test]
	fn zero_buffers_are_raised_to_one() {
		let config = PostmanConfig::from_toml("read-buffer = 0\nwrite-buffer = 0").unwrap();
		assert_eq!((config.read_buffer, config.write_buffer), (1, 1));
	}

	#[test]
	fn rejects_unknown_strategy() {
		let err = PostmanConfig::from_toml("delivery = \"broadcast\"").unwrap_err();
		assert!(matches!(err, Error::Config(_)), "{err:?}");
	}

	#[test]
	fn builder() {
		let config = PostmanConfig::default().delivery(Delivery::Parallel).decode_policy(DecodePolicy::Abort).buffers(0, 64);
		assert_eq!(config.delivery, Delivery::Parallel);
		assert_eq!(config.decode_policy, DecodePolicy::Abort);
		assert_eq!((config.read_buffer, config.write_buffer), (1, 64));
	}
}
