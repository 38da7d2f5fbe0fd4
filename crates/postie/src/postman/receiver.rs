//! Inbound pipeline: wire to recipients, and the closing half of the shutdown
//! handshake.

use std::sync::Arc;

use postie_wire::Framing;
use tokio::io::{BufReader, ReadHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Postman;
use crate::delivery::Dispatcher;
use crate::transport::BoxConnection;
use crate::{DecodePolicy, Error, Result};

pub(super) struct Receiver<L> {
	pub(super) postman: Postman<L>,
	pub(super) reader: ReadHalf<BoxConnection>,
	pub(super) framing: Arc<Framing<L>>,
	pub(super) dispatcher: Dispatcher,
	pub(super) sender: JoinHandle<Result<()>>,
	pub(super) shutdown: CancellationToken,
	pub(super) abort: CancellationToken,
}

impl<L> Receiver<L>
where
	L: Send + Sync + 'static,
{
	/// Runs until the peer half-closed (or the exchange failed), then finishes
	/// the handshake and closes the connection.
	///
	/// Returns the first fault of the run.
	pub(super) async fn run(self) -> Result<()> {
		let Self {
			postman,
			reader,
			framing,
			dispatcher,
			sender,
			shutdown,
			abort,
		} = self;
		let id = postman.id();
		let policy = postman.config().decode_policy;
		let mut reader = BufReader::with_capacity(postman.config().read_buffer.max(1), reader);

		dispatcher.notice_start(&postman).await;

		let outcome = loop {
			let next = tokio::select! {
				biased;
				() = abort.cancelled() => break Ok(()),
				next = framing.decode_next(&mut reader) => next,
			};
			match next {
				Ok(Some(letter)) => dispatcher.deliver(letter, &postman).await,
				Ok(None) => {
					tracing::debug!(postman = %id, "postman.receiver.eof");
					break Ok(());
				}
				Err(err) if err.is_decode() && policy == DecodePolicy::Skip => {
					let err = Error::from(err);
					tracing::warn!(postman = %id, error = %err, "postman.receiver.skip");
					postman.report_fault(&err);
				}
				Err(err) => break Err(Error::from(err)),
			}
		};
		if let Err(err) = &outcome {
			tracing::error!(postman = %id, error = %err, "postman.receiver.failed");
			postman.report_fault(err);
		}

		dispatcher.notice_stop(&postman).await;

		// Our side of the handshake: flush what is queued and half-close.
		shutdown.cancel();
		let sent = match sender.await {
			Ok(sent) => sent,
			Err(err) => {
				let err = Error::from(err);
				tracing::error!(postman = %id, error = %err, "postman.sender.panicked");
				postman.report_fault(&err);
				Err(err)
			}
		};

		drop(reader);
		tracing::debug!(postman = %id, "postman.closed");
		postman.notify_stopped();
		outcome.and(sent)
	}
}
