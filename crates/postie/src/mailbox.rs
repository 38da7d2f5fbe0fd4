use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{Postman, Recipient};

/// A [`Recipient`] that keeps accepted letters until they are received.
///
/// Letters are handed out in the order they were accepted, across all
/// postmen the mailbox is registered with. Each letter is received once.
pub struct Mailbox<L> {
	queue: Mutex<VecDeque<L>>,
	arrived: Notify,
}

impl<L> Default for Mailbox<L> {
	fn default() -> Self {
		Self::new()
	}
}

impl<L> Mailbox<L> {
	/// Creates an empty mailbox.
	pub fn new() -> Self {
		Self {
			queue: Mutex::new(VecDeque::new()),
			arrived: Notify::new(),
		}
	}

	/// Waits for the oldest letter and removes it.
	pub async fn receive(&self) -> L {
		loop {
			// Register interest before checking to avoid a lost wakeup.
			let arrived = self.arrived.notified();
			if let Some(letter) = self.queue.lock().pop_front() {
				return letter;
			}
			arrived.await;
		}
	}

	/// Removes the oldest letter without waiting.
	pub fn try_receive(&self) -> Option<L> {
		self.queue.lock().pop_front()
	}

	/// Returns true if [`try_receive`](Self::try_receive) would yield a letter.
	///
	/// Another task may take that letter first.
	pub fn has_letter(&self) -> bool {
		!self.queue.lock().is_empty()
	}

	/// Returns the number of stored letters.
	pub fn len(&self) -> usize {
		self.queue.lock().len()
	}

	/// Returns true if no letter is stored.
	pub fn is_empty(&self) -> bool {
		!self.has_letter()
	}

	fn put(&self, letter: L) {
		self.queue.lock().push_back(letter);
		self.arrived.notify_one();
	}
}

impl<L> Recipient<L> for Mailbox<L>
where
	L: Clone + Send + Sync + 'static,
{
	fn accept(&self, letter: &L, _from: &Postman<L>) {
		self.put(letter.clone());
	}
}
