//! Fan-out of inbound letters to recipients.

use std::sync::Arc;

use serde::Deserialize;
use tokio::task::JoinSet;
use tokio_util::task::TaskTracker;

use crate::{Postman, Recipient};

/// Ordering and concurrency policy for handing letters to recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Delivery {
	/// Recipients run inline on the receiver task, in registration order.
	///
	/// Total order across letters and recipients. A slow recipient stalls
	/// decoding of further letters.
	#[default]
	Sequential,
	/// One blocking-pool job per recipient and letter; the receiver never waits.
	///
	/// No ordering guarantee across letters or recipients.
	Parallel,
	/// One blocking-pool job per recipient and letter; the receiver waits for
	/// all jobs of a letter before decoding the next one.
	///
	/// Every recipient sees letters in wire order.
	OrderedParallel,
}

impl Delivery {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Sequential => "sequential",
			Self::Parallel => "parallel",
			Self::OrderedParallel => "ordered_parallel",
		}
	}
}

/// Per-run dispatcher executing one [`Delivery`] policy.
pub(crate) struct Dispatcher {
	delivery: Delivery,
	/// In-flight `accept` jobs under [`Delivery::Parallel`]; drained before
	/// `notice_stop`.
	in_flight: TaskTracker,
}

impl Dispatcher {
	pub(crate) fn new(delivery: Delivery) -> Self {
		Self {
			delivery,
			in_flight: TaskTracker::new(),
		}
	}

	/// Broadcasts `notice_start`; returns once every recipient handled it.
	pub(crate) async fn notice_start<L>(&self, postman: &Postman<L>)
	where
		L: Send + Sync + 'static,
	{
		let recipients = postman.recipient_snapshot();
		match self.delivery {
			Delivery::Sequential => {
				for recipient in &recipients {
					recipient.notice_start(postman);
				}
			}
			Delivery::Parallel | Delivery::OrderedParallel => {
				broadcast(recipients, postman, "notice_start", |recipient, postman| recipient.notice_start(postman)).await;
			}
		}
	}

	/// Hands one letter to every registered recipient.
	pub(crate) async fn deliver<L>(&self, letter: L, postman: &Postman<L>)
	where
		L: Send + Sync + 'static,
	{
		let recipients = postman.recipient_snapshot();
		tracing::trace!(postman = %postman.id(), delivery = self.delivery.as_str(), recipients = recipients.len(), "postman.deliver");
		match self.delivery {
			Delivery::Sequential => {
				for recipient in &recipients {
					recipient.accept(&letter, postman);
				}
			}
			Delivery::Parallel => {
				let letter = Arc::new(letter);
				for recipient in recipients {
					let letter = Arc::clone(&letter);
					let postman = postman.clone();
					self.in_flight.spawn(async move {
						let id = postman.id();
						let job = tokio::task::spawn_blocking(move || recipient.accept(&letter, &postman));
						if let Err(err) = job.await {
							tracing::error!(postman = %id, hook = "accept", error = %err, "recipient job panicked");
						}
					});
				}
			}
			Delivery::OrderedParallel => {
				let letter = Arc::new(letter);
				let mut barrier = JoinSet::new();
				for recipient in recipients {
					let letter = Arc::clone(&letter);
					let postman = postman.clone();
					barrier.spawn_blocking(move || recipient.accept(&letter, &postman));
				}
				await_all(&mut barrier, postman, "accept").await;
			}
		}
	}

	/// Broadcasts `notice_stop` after all earlier deliveries finished.
	pub(crate) async fn notice_stop<L>(&self, postman: &Postman<L>)
	where
		L: Send + Sync + 'static,
	{
		self.in_flight.close();
		self.in_flight.wait().await;

		let recipients = postman.recipient_snapshot();
		match self.delivery {
			Delivery::Sequential => {
				for recipient in &recipients {
					recipient.notice_stop(postman);
				}
			}
			Delivery::Parallel | Delivery::OrderedParallel => {
				broadcast(recipients, postman, "notice_stop", |recipient, postman| recipient.notice_stop(postman)).await;
			}
		}
	}
}

/// Runs `hook` for every recipient on the blocking pool and waits for all of them.
async fn broadcast<L, F>(recipients: Vec<Arc<dyn Recipient<L>>>, postman: &Postman<L>, hook_name: &'static str, hook: F)
where
	L: Send + Sync + 'static,
	F: Fn(&dyn Recipient<L>, &Postman<L>) + Send + Sync + Copy + 'static,
{
	let mut barrier = JoinSet::new();
	for recipient in recipients {
		let postman = postman.clone();
		barrier.spawn_blocking(move || hook(recipient.as_ref(), &postman));
	}
	await_all(&mut barrier, postman, hook_name).await;
}

async fn await_all<L>(barrier: &mut JoinSet<()>, postman: &Postman<L>, hook_name: &'static str) {
	while let Some(joined) = barrier.join_next().await {
		if let Err(err) = joined {
			tracing::error!(postman = %postman.id(), hook = hook_name, error = %err, "recipient job panicked");
		}
	}
}
