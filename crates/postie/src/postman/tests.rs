use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use super::*;
use crate::{DecodePolicy, Mailbox, TextSerializer};

const WAIT: Duration = Duration::from_secs(5);

fn engine(delivery: Delivery) -> Postman<i64> {
	let postman = Postman::new(delivery);
	postman.use_serializer(TextSerializer::new()).unwrap();
	postman
}

/// Two configured engines bound to the ends of one in-memory pipe.
fn pair(a: Delivery, b: Delivery) -> (Postman<i64>, Postman<i64>) {
	let (left, right) = tokio::io::duplex(64 * 1024);
	let (a, b) = (engine(a), engine(b));
	a.bind(left).unwrap();
	b.bind(right).unwrap();
	(a, b)
}

/// An engine whose peer is driven by hand.
fn with_raw_peer(postman: &Postman<i64>) -> DuplexStream {
	let (ours, theirs) = tokio::io::duplex(64 * 1024);
	postman.bind(ours).unwrap();
	theirs
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
	tokio::time::timeout(WAIT, async {
		while !condition() {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.expect("condition not reached in time");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
	Start,
	Letter(i64),
	Stop,
}

#[derive(Default)]
struct Recorder {
	events: Mutex<Vec<Event>>,
	/// Sleep a letter-dependent time before recording.
	jitter: bool,
}

impl Recorder {
	fn jittery() -> Self {
		Self {
			jitter: true,
			..Self::default()
		}
	}

	fn events(&self) -> Vec<Event> {
		self.events.lock().clone()
	}

	fn letters(&self) -> Vec<i64> {
		self.events()
			.into_iter()
			.filter_map(|event| match event {
				Event::Letter(letter) => Some(letter),
				_ => None,
			})
			.collect()
	}
}

impl Recipient<i64> for Recorder {
	fn accept(&self, letter: &i64, _from: &Postman<i64>) {
		if self.jitter {
			let millis = (letter * 7).rem_euclid(5) as u64;
			std::thread::sleep(Duration::from_millis(millis));
		}
		self.events.lock().push(Event::Letter(*letter));
	}

	fn notice_start(&self, _from: &Postman<i64>) {
		self.events.lock().push(Event::Start);
	}

	fn notice_stop(&self, _from: &Postman<i64>) {
		self.events.lock().push(Event::Stop);
	}
}

/// Sends `letters` from a sequential engine to one using `delivery` with
/// `recipients`, then stops the sender and waits for both ends to close.
async fn exchange(delivery: Delivery, recipients: &[Arc<Recorder>], letters: impl IntoIterator<Item = i64>) {
	let (a, b) = pair(Delivery::Sequential, delivery);
	for recipient in recipients {
		b.register(Arc::clone(recipient));
	}
	b.start().unwrap();
	a.start().unwrap();
	for letter in letters {
		a.send(letter).unwrap();
	}
	tokio::time::timeout(WAIT, a.stop()).await.unwrap().unwrap();
	wait_until(|| !b.is_running()).await;
}

#[tokio::test]
async fn letters_cross_and_stop_drains_everything() {
	let (a, b) = pair(Delivery::Sequential, Delivery::Sequential);
	let inbox = Arc::new(Mailbox::new());
	b.register(Arc::clone(&inbox));
	a.start().unwrap();
	b.start().unwrap();
	assert!(a.is_running() && b.is_running());

	for letter in 1..=100 {
		a.send(letter).unwrap();
	}
	a.stop().await.unwrap();
	assert!(!a.is_running());

	let received: Vec<i64> = std::iter::from_fn(|| inbox.try_receive()).collect();
	assert_eq!(received, (1..=100).collect::<Vec<_>>());

	wait_until(|| !b.is_running()).await;
	assert!(matches!(b.send(1), Err(Error::State(_))));
	assert!(matches!(b.stop().await, Err(Error::State(_))));
}

#[tokio::test]
async fn lifecycle_guards() {
	let bare = Postman::<i64>::new(Delivery::Sequential);
	let _peer = with_raw_peer(&bare);
	assert!(matches!(bare.start(), Err(Error::State("no serializer configured"))));

	let unbound = engine(Delivery::Sequential);
	assert!(matches!(unbound.start(), Err(Error::State("no connection bound"))));
	assert!(matches!(unbound.send(1), Err(Error::State(_))));
	assert!(matches!(unbound.stop().await, Err(Error::State(_))));

	let (a, b) = pair(Delivery::Sequential, Delivery::Sequential);
	a.start().unwrap();
	b.start().unwrap();
	assert!(matches!(a.start(), Err(Error::State(_))));
	assert!(matches!(a.bind(tokio::io::duplex(8).0), Err(Error::State(_))));
	assert!(matches!(a.use_serializer(TextSerializer::new()), Err(Error::State(_))));
	assert!(matches!(a.replicate(), Err(Error::State(_))));

	a.stop().await.unwrap();
	assert!(matches!(a.start(), Err(Error::State("no connection bound"))));
}

#[tokio::test]
async fn restarts_on_a_new_connection() {
	let a = engine(Delivery::Sequential);
	for round in 0..2 {
		let mut peer = with_raw_peer(&a);
		a.start().unwrap();
		a.send(round).unwrap();

		let stopping = {
			let a = a.clone();
			tokio::spawn(async move { a.stop().await })
		};
		let mut wire = String::new();
		peer.read_to_string(&mut wire).await.unwrap();
		assert_eq!(wire, format!("{round}\n"));
		peer.shutdown().await.unwrap();
		stopping.await.unwrap().unwrap();
	}
}

#[tokio::test]
async fn sequential_runs_recipients_in_registration_order() {
	struct Tagged {
		tag: usize,
		log: Arc<Mutex<Vec<(usize, i64)>>>,
	}

	impl Recipient<i64> for Tagged {
		fn accept(&self, letter: &i64, _from: &Postman<i64>) {
			self.log.lock().push((self.tag, *letter));
		}
	}

	let log = Arc::new(Mutex::new(Vec::new()));
	let (a, b) = pair(Delivery::Sequential, Delivery::Sequential);
	for tag in 0..3 {
		b.register(Arc::new(Tagged {
			tag,
			log: Arc::clone(&log),
		}));
	}
	b.start().unwrap();
	a.start().unwrap();
	for letter in 1..=10 {
		a.send(letter).unwrap();
	}
	a.stop().await.unwrap();

	let expected: Vec<_> = (1..=10).flat_map(|letter| (0..3).map(move |tag| (tag, letter))).collect();
	assert_eq!(*log.lock(), expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ordered_parallel_keeps_wire_order_per_recipient() {
	let recipients: Vec<_> = (0..3).map(|_| Arc::new(Recorder::jittery())).collect();
	exchange(Delivery::OrderedParallel, &recipients, 1..=40).await;

	for recipient in &recipients {
		assert_eq!(recipient.letters(), (1..=40).collect::<Vec<_>>());
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn parallel_delivers_every_letter() {
	let recipients: Vec<_> = (0..2).map(|_| Arc::new(Recorder::jittery())).collect();
	exchange(Delivery::Parallel, &recipients, 1..=40).await;

	for recipient in &recipients {
		let mut letters = recipient.letters();
		letters.sort_unstable();
		assert_eq!(letters, (1..=40).collect::<Vec<_>>());
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn notices_bracket_all_letters() {
	for delivery in [Delivery::Sequential, Delivery::Parallel, Delivery::OrderedParallel] {
		let recorder = Arc::new(Recorder::jittery());
		exchange(delivery, &[Arc::clone(&recorder)], 1..=8).await;

		let events = recorder.events();
		assert_eq!(events.first(), Some(&Event::Start), "{delivery:?}");
		assert_eq!(events.last(), Some(&Event::Stop), "{delivery:?}");
		assert_eq!(events.len(), 10, "{delivery:?}");
	}
}

#[tokio::test]
async fn peer_can_reply_while_noticing_stop() {
	struct Farewell;

	impl Recipient<i64> for Farewell {
		fn accept(&self, _letter: &i64, _from: &Postman<i64>) {}

		fn notice_stop(&self, from: &Postman<i64>) {
			from.send(99).unwrap();
		}
	}

	let (a, b) = pair(Delivery::Sequential, Delivery::Sequential);
	let inbox = Arc::new(Mailbox::new());
	a.register(Arc::clone(&inbox));
	b.register(Arc::new(Farewell));
	a.start().unwrap();
	b.start().unwrap();

	a.send(1).unwrap();
	a.stop().await.unwrap();
	assert_eq!(inbox.try_receive(), Some(99));
	assert!(!inbox.has_letter());
}

#[tokio::test]
async fn undecodable_frame_is_skipped_by_default() {
	let b = engine(Delivery::Sequential);
	let inbox = Arc::new(Mailbox::new());
	let faults = Arc::new(Mutex::new(Vec::new()));
	b.register(Arc::clone(&inbox));
	b.on_fault({
		let faults = Arc::clone(&faults);
		move |_, err| faults.lock().push(err.is_decode())
	});
	let mut peer = with_raw_peer(&b);
	b.start().unwrap();

	peer.write_all(b"1\nx\n2\n").await.unwrap();
	peer.shutdown().await.unwrap();
	let mut rest = Vec::new();
	peer.read_to_end(&mut rest).await.unwrap();

	assert!(rest.is_empty());
	assert_eq!(std::iter::from_fn(|| inbox.try_receive()).collect::<Vec<_>>(), vec![1, 2]);
	assert_eq!(*faults.lock(), vec![true]);
}

#[tokio::test]
async fn undecodable_frame_aborts_when_configured() {
	let b = Postman::with_config(PostmanConfig::default().decode_policy(DecodePolicy::Abort));
	b.use_serializer(TextSerializer::<i64>::new()).unwrap();
	let inbox = Arc::new(Mailbox::new());
	let stopped = Arc::new(AtomicUsize::new(0));
	b.register(Arc::clone(&inbox));
	b.on_stop({
		let stopped = Arc::clone(&stopped);
		move |_| {
			stopped.fetch_add(1, Ordering::SeqCst);
		}
	});
	let mut peer = with_raw_peer(&b);
	b.start().unwrap();

	// No shutdown from our side: the engine ends the exchange by itself.
	peer.write_all(b"1\nx\n2\n").await.unwrap();
	let mut rest = Vec::new();
	tokio::time::timeout(WAIT, peer.read_to_end(&mut rest)).await.unwrap().unwrap();
	drop(peer);

	wait_until(|| stopped.load(Ordering::SeqCst) == 1).await;
	assert_eq!(inbox.try_receive(), Some(1));
	assert_eq!(inbox.try_receive(), None);
}

#[tokio::test]
async fn truncated_frame_is_fatal() {
	let b = engine(Delivery::Sequential);
	let inbox = Arc::new(Mailbox::new());
	let faults = Arc::new(Mutex::new(Vec::new()));
	b.register(Arc::clone(&inbox));
	b.on_fault({
		let faults = Arc::clone(&faults);
		move |_, err: &Error| faults.lock().push((err.is_transport(), matches!(err, Error::Wire(postie_wire::Error::TruncatedFrame(2)))))
	});
	let mut peer = with_raw_peer(&b);
	b.start().unwrap();

	peer.write_all(b"7\n23").await.unwrap();
	peer.shutdown().await.unwrap();
	let mut rest = Vec::new();
	peer.read_to_end(&mut rest).await.unwrap();

	wait_until(|| !b.is_running()).await;
	assert_eq!(inbox.try_receive(), Some(7));
	assert_eq!(*faults.lock(), vec![(true, true)]);
}

#[tokio::test]
async fn unencodable_letter_is_skipped() {
	let a = Postman::<String>::new(Delivery::Sequential);
	a.use_serializer(TextSerializer::<String>::new()).unwrap();
	let faults = Arc::new(AtomicUsize::new(0));
	a.on_fault({
		let faults = Arc::clone(&faults);
		move |_, err| {
			assert!(matches!(err, Error::Wire(postie_wire::Error::Encode(_))), "{err:?}");
			faults.fetch_add(1, Ordering::SeqCst);
		}
	});
	let (ours, mut peer) = tokio::io::duplex(1024);
	a.bind(ours).unwrap();
	a.start().unwrap();

	a.send("two\nlines".to_owned()).unwrap();
	a.send("ok".to_owned()).unwrap();
	let stopping = {
		let a = a.clone();
		tokio::spawn(async move { a.stop().await })
	};

	let mut wire = String::new();
	peer.read_to_string(&mut wire).await.unwrap();
	peer.shutdown().await.unwrap();
	stopping.await.unwrap().unwrap();

	assert_eq!(wire, "ok\n");
	assert_eq!(faults.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn replica_shares_settings_but_not_the_connection() {
	let blueprint = Postman::with_config(PostmanConfig::default().delivery(Delivery::OrderedParallel).buffers(16, 16));
	blueprint.use_serializer(TextSerializer::<i64>::new()).unwrap();
	let inbox = Arc::new(Mailbox::new());
	let stopped = Arc::new(AtomicUsize::new(0));
	blueprint.register(Arc::clone(&inbox));
	blueprint.on_stop({
		let stopped = Arc::clone(&stopped);
		move |_| {
			stopped.fetch_add(1, Ordering::SeqCst);
		}
	});
	let _blueprint_peer = with_raw_peer(&blueprint);

	let replica = blueprint.replicate().unwrap();
	assert_ne!(replica.id(), blueprint.id());
	assert_eq!(replica.config(), blueprint.config());
	assert_eq!(replica.recipient_count(), 1);
	assert!(matches!(replica.start(), Err(Error::State("no connection bound"))));

	// Registration after replication stays local to the replica.
	replica.register(Arc::new(Recorder::default()));
	assert_eq!(blueprint.recipient_count(), 1);

	let mut peer = with_raw_peer(&replica);
	replica.start().unwrap();
	peer.write_all(b"5\n").await.unwrap();
	peer.shutdown().await.unwrap();
	let mut rest = Vec::new();
	peer.read_to_end(&mut rest).await.unwrap();

	assert_eq!(tokio::time::timeout(WAIT, inbox.receive()).await.unwrap(), 5);
	wait_until(|| stopped.load(Ordering::SeqCst) == 1).await;
	assert!(!blueprint.is_running());
}

#[tokio::test]
async fn register_ignores_duplicates() {
	let postman = engine(Delivery::Sequential);
	let inbox = Arc::new(Mailbox::<i64>::new());
	assert!(postman.register(Arc::clone(&inbox)));
	assert!(!postman.register(Arc::clone(&inbox)));
	assert_eq!(postman.recipient_count(), 1);
	assert!(postman.unregister(&inbox));
	assert!(!postman.unregister(&inbox));
	assert_eq!(postman.recipient_count(), 0);
}

#[test]
fn starts_outside_a_runtime() {
	let postman = engine(Delivery::Sequential);
	let peer = with_raw_peer(&postman);
	postman.start().unwrap();
	// The peer vanishing reads as end-of-stream.
	drop(peer);

	for _ in 0..500 {
		if !postman.is_running() {
			break;
		}
		std::thread::sleep(Duration::from_millis(10));
	}
	assert!(!postman.is_running());
}

#[tokio::test]
async fn zero_read_buffer_still_receives() {
	let config = PostmanConfig::from_toml("read-buffer = 0").unwrap();
	let mut raw = PostmanConfig::default();
	raw.read_buffer = 0;

	for config in [config, raw] {
		let b = Postman::with_config(config);
		b.use_serializer(TextSerializer::<i64>::new()).unwrap();
		let inbox = Arc::new(Mailbox::new());
		b.register(Arc::clone(&inbox));
		let mut peer = with_raw_peer(&b);
		b.start().unwrap();

		peer.write_all(b"1\n2\n").await.unwrap();
		peer.shutdown().await.unwrap();
		let mut rest = Vec::new();
		peer.read_to_end(&mut rest).await.unwrap();

		assert_eq!(std::iter::from_fn(|| inbox.try_receive()).collect::<Vec<_>>(), vec![1, 2]);
	}
}

/// Reads never complete; every write, flush and shutdown fails.
struct BrokenPipe;

impl tokio::io::AsyncRead for BrokenPipe {
	fn poll_read(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>, _buf: &mut tokio::io::ReadBuf<'_>) -> std::task::Poll<std::io::Result<()>> {
		std::task::Poll::Pending
	}
}

impl tokio::io::AsyncWrite for BrokenPipe {
	fn poll_write(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>, _buf: &[u8]) -> std::task::Poll<std::io::Result<usize>> {
		std::task::Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
	}

	fn poll_flush(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
		std::task::Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
	}

	fn poll_shutdown(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
		std::task::Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
	}
}

#[tokio::test]
async fn write_failure_ends_the_exchange() {
	let a = engine(Delivery::Sequential);
	let faults = Arc::new(Mutex::new(Vec::new()));
	let stopped = Arc::new(AtomicUsize::new(0));
	a.on_fault({
		let faults = Arc::clone(&faults);
		move |_, err: &Error| faults.lock().push(matches!(err, Error::Io(_)) && err.is_transport())
	});
	a.on_stop({
		let stopped = Arc::clone(&stopped);
		move |_| {
			stopped.fetch_add(1, Ordering::SeqCst);
		}
	});
	a.bind(BrokenPipe).unwrap();
	a.start().unwrap();

	// The receiver would wait forever; only the failed flush ends the run.
	a.send(1).unwrap();
	wait_until(|| stopped.load(Ordering::SeqCst) == 1).await;
	wait_until(|| !a.is_running()).await;
	assert_eq!(*faults.lock(), vec![true]);
	assert!(matches!(a.send(2), Err(Error::State(_))));
}

#[tokio::test]
async fn stop_reports_a_failed_half_close() {
	let a = engine(Delivery::Sequential);
	a.bind(BrokenPipe).unwrap();
	a.start().unwrap();

	let err = tokio::time::timeout(WAIT, a.stop()).await.unwrap().unwrap_err();
	assert!(matches!(err, Error::Io(ref io) if io.kind() == std::io::ErrorKind::BrokenPipe), "{err:?}");
	assert!(!a.is_running());
}

#[tokio::test]
async fn registers_while_running() {
	let (a, b) = pair(Delivery::Sequential, Delivery::Sequential);
	a.start().unwrap();
	b.start().unwrap();

	let inbox = Arc::new(Mailbox::new());
	assert!(b.register(Arc::clone(&inbox)));
	a.send(5).unwrap();
	assert_eq!(tokio::time::timeout(WAIT, inbox.receive()).await.unwrap(), 5);

	assert!(b.unregister(&inbox));
	a.send(6).unwrap();
	a.stop().await.unwrap();
	assert!(!inbox.has_letter());
}
