#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use postie::{Delivery, Mailbox, Postman, Recipient, TextSerializer};

pub const WAIT: Duration = Duration::from_secs(5);

/// Sends every letter straight back to the postman that received it.
pub struct Echo;

impl Recipient<i64> for Echo {
	fn accept(&self, letter: &i64, from: &Postman<i64>) {
		from.send(*letter).unwrap();
	}
}

/// A configured, unbound postman for integers separated by newlines.
pub fn engine(delivery: Delivery) -> Postman<i64> {
	let postman = Postman::new(delivery);
	postman.use_serializer(TextSerializer::new()).unwrap();
	postman
}

/// A configured postman delivering into a fresh mailbox.
pub fn with_mailbox(delivery: Delivery) -> (Postman<i64>, Arc<Mailbox<i64>>) {
	let postman = engine(delivery);
	let mailbox = Arc::new(Mailbox::new());
	postman.register(Arc::clone(&mailbox));
	(postman, mailbox)
}

pub async fn receive(mailbox: &Mailbox<i64>) -> i64 {
	tokio::time::timeout(WAIT, mailbox.receive()).await.expect("no letter in time")
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
	tokio::time::timeout(WAIT, async {
		while !condition() {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.expect("condition not reached in time");
}
