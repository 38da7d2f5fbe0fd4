//! Outbound pipeline: outbox to wire.

use std::sync::Arc;

use postie_wire::Framing;
use tokio::io::{AsyncWriteExt, BufWriter, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::Postman;
use crate::transport::BoxConnection;
use crate::{Error, Result};

pub(super) struct Sender<L> {
	pub(super) postman: Postman<L>,
	pub(super) writer: BufWriter<WriteHalf<BoxConnection>>,
	pub(super) letters: mpsc::UnboundedReceiver<L>,
	pub(super) framing: Arc<Framing<L>>,
	pub(super) shutdown: CancellationToken,
	/// Cancelled when the sender fails, so the receiver stops waiting for input.
	pub(super) abort: CancellationToken,
}

impl<L> Sender<L>
where
	L: Send + Sync + 'static,
{
	pub(super) async fn run(mut self) -> Result<()> {
		let result = self.pump().await;
		if let Err(err) = &result {
			tracing::error!(postman = %self.postman.id(), error = %err, "postman.sender.failed");
			self.postman.report_fault(err);
			self.abort.cancel();
		}
		result
	}

	async fn pump(&mut self) -> Result<()> {
		loop {
			tokio::select! {
				biased;
				() = self.shutdown.cancelled() => break,
				letter = self.letters.recv() => {
					let Some(letter) = letter else { break };
					self.write(&letter).await?;
					if self.letters.is_empty() {
						self.writer.flush().await?;
					}
				}
			}
		}

		// Late `send` calls fail from here on; everything queued so far goes out.
		self.letters.close();
		let mut drained = 0usize;
		while let Some(letter) = self.letters.recv().await {
			self.write(&letter).await?;
			drained += 1;
		}
		tracing::debug!(postman = %self.postman.id(), drained, "postman.sender.drain");

		self.writer.shutdown().await?;
		tracing::debug!(postman = %self.postman.id(), "postman.sender.half_closed");
		Ok(())
	}

	async fn write(&mut self, letter: &L) -> Result<()> {
		match self.framing.encode_next(&mut self.writer, letter).await {
			Ok(()) => Ok(()),
			Err(err @ postie_wire::Error::Encode(_)) => {
				let err = Error::from(err);
				tracing::warn!(postman = %self.postman.id(), error = %err, "postman.sender.skip");
				self.postman.report_fault(&err);
				Ok(())
			}
			Err(err) => Err(err.into()),
		}
	}
}
