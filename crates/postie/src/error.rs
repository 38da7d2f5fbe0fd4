use std::io;

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The call is not allowed in the current lifecycle state, or a required
	/// piece of configuration is missing.
	#[error("invalid state: {0}")]
	State(&'static str),
	/// Framing, encoding or decoding failed.
	#[error(transparent)]
	Wire(#[from] postie_wire::Error),
	/// Input/output errors from the underlying connection or listener.
	#[error("{0}")]
	Io(#[from] io::Error),
	/// The postman is shutting down and no longer accepts letters.
	#[error("postman stopped")]
	Stopped,
	/// A pipeline task panicked or was aborted.
	#[error("pipeline task failed: {0}")]
	Task(String),
	/// A configuration document could not be parsed.
	#[error("invalid configuration: {0}")]
	Config(#[from] toml::de::Error),
}

impl Error {
	/// Returns true for faults confined to one frame's content.
	pub fn is_decode(&self) -> bool {
		matches!(self, Self::Wire(err) if err.is_decode())
	}

	/// Returns true for faults of the connection itself.
	pub fn is_transport(&self) -> bool {
		matches!(self, Self::Io(_) | Self::Wire(postie_wire::Error::Io(_) | postie_wire::Error::TruncatedFrame(_)))
	}
}

impl From<tokio::task::JoinError> for Error {
	fn from(err: tokio::task::JoinError) -> Self {
		Self::Task(err.to_string())
	}
}
