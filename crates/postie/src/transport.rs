//! Transport boundary: byte-stream connections and the listeners producing them.

use std::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

/// A duplex byte stream a postman can own.
///
/// Shutting down the write side must signal end-of-stream to the peer while
/// leaving the read side usable (TCP `FIN` semantics).
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased connection bound to a postman.
pub(crate) type BoxConnection = Box<dyn Connection>;

/// Source of inbound connections for an [`Office`](crate::Office).
///
/// Dropping the listener closes it; the office cancels a pending
/// [`accept`](Self::accept) before dropping it.
pub trait Listener: Send + 'static {
	/// Connection type yielded per accepted peer.
	type Connection: Connection;

	/// Waits for the next inbound connection.
	fn accept(&mut self) -> impl Future<Output = io::Result<Self::Connection>> + Send;
}

impl Listener for tokio::net::TcpListener {
	type Connection = tokio::net::TcpStream;

	async fn accept(&mut self) -> io::Result<Self::Connection> {
		let (stream, peer) = tokio::net::TcpListener::accept(self).await?;
		tracing::debug!(%peer, "office.accept.tcp");
		Ok(stream)
	}
}

#[cfg(unix)]
impl Listener for tokio::net::UnixListener {
	type Connection = tokio::net::UnixStream;

	async fn accept(&mut self) -> io::Result<Self::Connection> {
		let (stream, _peer) = tokio::net::UnixListener::accept(self).await?;
		tracing::debug!("office.accept.unix");
		Ok(stream)
	}
}
