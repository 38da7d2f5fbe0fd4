//! Consumers of inbound letters.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::Postman;

/// A consumer of letters delivered by one or more postmen.
///
/// Depending on the postman's [`Delivery`](crate::Delivery), the hooks run
/// on the receiver task or on the blocking pool. They must not block for long
/// under sequential delivery: every further letter waits for them.
pub trait Recipient<L>: Send + Sync + 'static {
	/// Handles one letter received by `from`.
	fn accept(&self, letter: &L, from: &Postman<L>);

	/// Called once after `from` connected, before its first letter is accepted.
	///
	/// Recipients registered while the postman is already running miss it.
	fn notice_start(&self, from: &Postman<L>) {
		let _ = from;
	}

	/// Called once after `from` accepted its last letter, before the connection
	/// is closed.
	///
	/// When the peer ended the exchange this is the last chance to
	/// [`send`](Postman::send) a reply; a local [`stop`](Postman::stop) has
	/// already closed the outbox.
	fn notice_stop(&self, from: &Postman<L>) {
		let _ = from;
	}
}

/// Shared, ordered recipient collection.
///
/// Deliveries work on a snapshot, so a concurrent [`remove`](Self::remove)
/// does not affect a delivery already in flight.
pub(crate) struct RecipientSet<L> {
	inner: RwLock<Vec<Arc<dyn Recipient<L>>>>,
}

impl<L> RecipientSet<L> {
	pub(crate) fn new(recipients: Vec<Arc<dyn Recipient<L>>>) -> Self {
		Self {
			inner: RwLock::new(recipients),
		}
	}

	/// Appends `recipient` unless the same instance is already present.
	pub(crate) fn insert(&self, recipient: Arc<dyn Recipient<L>>) -> bool {
		let mut guard = self.inner.write();
		if guard.iter().any(|known| same(known, &recipient)) {
			return false;
		}
		guard.push(recipient);
		true
	}

	/// Removes `recipient`, keeping the order of the others.
	pub(crate) fn remove(&self, recipient: &Arc<dyn Recipient<L>>) -> bool {
		let mut guard = self.inner.write();
		let before = guard.len();
		guard.retain(|known| !same(known, recipient));
		guard.len() != before
	}

	/// Returns the recipients in registration order.
	pub(crate) fn snapshot(&self) -> Vec<Arc<dyn Recipient<L>>> {
		self.inner.read().clone()
	}

	pub(crate) fn len(&self) -> usize {
		self.inner.read().len()
	}
}

fn same<L>(a: &Arc<dyn Recipient<L>>, b: &Arc<dyn Recipient<L>>) -> bool {
	std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Nobody;

	impl Recipient<u8> for Nobody {
		fn accept(&self, _letter: &u8, _from: &Postman<u8>) {}
	}

	#[test]
	fn keeps_registration_order_and_identity() {
		let set = RecipientSet::<u8>::new(Vec::new());
		let a: Arc<dyn Recipient<u8>> = Arc::new(Nobody);
		let b: Arc<dyn Recipient<u8>> = Arc::new(Nobody);
		let c: Arc<dyn Recipient<u8>> = Arc::new(Nobody);

		assert!(set.insert(Arc::clone(&a)));
		assert!(set.insert(Arc::clone(&b)));
		assert!(!set.insert(Arc::clone(&a)));
		assert!(set.insert(Arc::clone(&c)));
		assert_eq!(set.len(), 3);

		let snapshot = set.snapshot();
		assert!(set.remove(&b));
		assert!(!set.remove(&b));
		assert_eq!(snapshot.len(), 3);

		let order = set.snapshot();
		assert!(same(&order[0], &a));
		assert!(same(&order[1], &c));
	}
}
