//! The per-connection engine.
//!
//! A [`Postman`] owns one connection and drives it with two tasks:
//! * the sender drains the outbox, frames every letter and writes it;
//! * the receiver cuts frames, decodes them and hands the letters to the
//!   recipients according to the configured [`Delivery`].
//!
//! Shutdown is a handshake: the stopping side flushes its outbox and
//! half-closes; the peer's receiver sees end-of-stream, notifies its
//! recipients, flushes and half-closes in turn; once each side observed the
//! other's end-of-stream the connection is closed.

mod receiver;
mod sender;
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use postie_wire::{Framing, Serializer};
use tokio::io::BufWriter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::delivery::Dispatcher;
use crate::recipient::RecipientSet;
use crate::spawn::{TaskClass, spawn};
use crate::transport::BoxConnection;
use crate::{Connection, Delivery, Error, PostmanConfig, Recipient, Result};

/// Process-unique identity of one postman.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PostmanId(u64);

impl PostmanId {
	fn next() -> Self {
		static NEXT: AtomicU64 = AtomicU64::new(1);
		Self(NEXT.fetch_add(1, Ordering::Relaxed))
	}

	/// Returns the raw identifier.
	pub const fn get(self) -> u64 {
		self.0
	}
}

impl std::fmt::Display for PostmanId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "postman#{}", self.0)
	}
}

type FaultHook<L> = Arc<dyn Fn(&Postman<L>, &Error) + Send + Sync>;
type StopHook<L> = Arc<dyn Fn(&Postman<L>) + Send + Sync>;

struct Hooks<L> {
	fault: Vec<FaultHook<L>>,
	stop: Vec<StopHook<L>>,
}

impl<L> Clone for Hooks<L> {
	fn clone(&self) -> Self {
		Self {
			fault: self.fault.clone(),
			stop: self.stop.clone(),
		}
	}
}

impl<L> Default for Hooks<L> {
	fn default() -> Self {
		Self {
			fault: Vec::new(),
			stop: Vec::new(),
		}
	}
}

/// Handles of one started exchange.
struct Run<L> {
	outbox: mpsc::UnboundedSender<L>,
	/// Tells the sender to drain, flush and half-close.
	shutdown: CancellationToken,
	/// Finishes after both pipelines ended and the connection is closed.
	receiver: JoinHandle<Result<()>>,
}

impl<L> Run<L> {
	fn is_alive(&self) -> bool {
		!self.receiver.is_finished()
	}
}

struct Lifecycle<L> {
	connection: Option<BoxConnection>,
	framing: Option<Arc<Framing<L>>>,
	run: Option<Run<L>>,
}

impl<L> Lifecycle<L> {
	fn is_running(&self) -> bool {
		self.run.as_ref().is_some_and(Run::is_alive)
	}
}

struct Shared<L> {
	id: PostmanId,
	config: PostmanConfig,
	recipients: RecipientSet<L>,
	hooks: RwLock<Hooks<L>>,
	lifecycle: Mutex<Lifecycle<L>>,
}

/// Letter exchange over one bound connection.
///
/// `Postman` is a handle: clones refer to the same engine. Use
/// [`replicate`](Self::replicate) to derive an independent engine from a
/// configured blueprint.
///
/// Lifecycle: [`bind`](Self::bind) a connection and
/// [`use_serializer`](Self::use_serializer), then [`start`](Self::start).
/// Both settings are frozen while running. A run ends with
/// [`stop`](Self::stop) or when the peer closes its side; a new connection must
/// be bound before the next start.
pub struct Postman<L> {
	shared: Arc<Shared<L>>,
}

impl<L> Clone for Postman<L> {
	fn clone(&self) -> Self {
		Self {
			shared: Arc::clone(&self.shared),
		}
	}
}

impl<L> std::fmt::Debug for Postman<L> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Postman")
			.field("id", &self.shared.id)
			.field("delivery", &self.shared.config.delivery)
			.field("running", &self.is_running())
			.finish_non_exhaustive()
	}
}

impl<L> Postman<L> {
	/// Returns this engine's identity.
	pub fn id(&self) -> PostmanId {
		self.shared.id
	}

	/// Returns the configuration fixed at construction.
	pub fn config(&self) -> &PostmanConfig {
		&self.shared.config
	}

	/// Returns the delivery strategy fixed at construction.
	pub fn delivery(&self) -> Delivery {
		self.shared.config.delivery
	}

	/// Returns true while the pipelines are alive.
	pub fn is_running(&self) -> bool {
		self.shared.lifecycle.lock().is_running()
	}

	/// Returns the number of registered recipients.
	pub fn recipient_count(&self) -> usize {
		self.shared.recipients.len()
	}

	pub(crate) fn recipient_snapshot(&self) -> Vec<Arc<dyn Recipient<L>>> {
		self.shared.recipients.snapshot()
	}

	pub(crate) fn report_fault(&self, err: &Error) {
		let hooks = self.shared.hooks.read().fault.clone();
		for hook in hooks {
			hook(self, err);
		}
	}

	fn notify_stopped(&self) {
		let hooks = self.shared.hooks.read().stop.clone();
		for hook in hooks {
			hook(self);
		}
	}
}

impl<L> Postman<L>
where
	L: Send + Sync + 'static,
{
	/// Creates an unconfigured postman with default settings and the given
	/// delivery strategy.
	pub fn new(delivery: Delivery) -> Self {
		Self::with_config(PostmanConfig::default().delivery(delivery))
	}

	/// Creates an unconfigured postman.
	pub fn with_config(config: PostmanConfig) -> Self {
		Self::from_parts(config, None, Vec::new(), Hooks::default())
	}

	fn from_parts(config: PostmanConfig, framing: Option<Arc<Framing<L>>>, recipients: Vec<Arc<dyn Recipient<L>>>, hooks: Hooks<L>) -> Self {
		let id = PostmanId::next();
		tracing::trace!(postman = %id, delivery = config.delivery.as_str(), "postman.new");
		Self {
			shared: Arc::new(Shared {
				id,
				config,
				recipients: RecipientSet::new(recipients),
				hooks: RwLock::new(hooks),
				lifecycle: Mutex::new(Lifecycle {
					connection: None,
					framing,
					run: None,
				}),
			}),
		}
	}

	/// Binds the connection used by the next run, replacing a previous one.
	///
	/// # Errors
	///
	/// `Error::State` while running.
	pub fn bind(&self, connection: impl Connection) -> Result<()> {
		let mut lifecycle = self.shared.lifecycle.lock();
		if lifecycle.is_running() {
			return Err(Error::State("cannot bind a connection while running"));
		}
		lifecycle.connection = Some(Box::new(connection));
		Ok(())
	}

	/// Sets the wire encoding.
	///
	/// # Errors
	///
	/// - `Error::State` while running.
	/// - `Error::Wire` when the serializer's separator is empty.
	pub fn use_serializer(&self, serializer: impl Serializer<L>) -> Result<()> {
		let mut lifecycle = self.shared.lifecycle.lock();
		if lifecycle.is_running() {
			return Err(Error::State("cannot change the serializer while running"));
		}
		lifecycle.framing = Some(Arc::new(Framing::new(serializer)?));
		Ok(())
	}

	/// Adds a recipient for letters delivered from now on.
	///
	/// Returns false if this instance was already registered.
	pub fn register<R>(&self, recipient: Arc<R>) -> bool
	where
		R: Recipient<L>,
	{
		self.shared.recipients.insert(recipient)
	}

	/// Removes a recipient. Deliveries already dispatched may still reach it.
	///
	/// Returns false if it was not registered.
	pub fn unregister<R>(&self, recipient: &Arc<R>) -> bool
	where
		R: Recipient<L>,
	{
		let recipient: Arc<dyn Recipient<L>> = Arc::clone(recipient) as Arc<dyn Recipient<L>>;
		self.shared.recipients.remove(&recipient)
	}

	/// Adds a hook observing every pipeline fault.
	///
	/// Hooks are copied into replicas.
	pub fn on_fault(&self, hook: impl Fn(&Postman<L>, &Error) + Send + Sync + 'static) {
		self.shared.hooks.write().fault.push(Arc::new(hook));
	}

	/// Adds a hook run after each run ended and the connection was closed.
	///
	/// Hooks are copied into replicas.
	pub fn on_stop(&self, hook: impl Fn(&Postman<L>) + Send + Sync + 'static) {
		self.shared.hooks.write().stop.push(Arc::new(hook));
	}

	/// Derives an independent, unbound postman from this blueprint.
	///
	/// The replica shares the serializer and configuration, copies the
	/// recipients and hooks, and has no connection.
	///
	/// # Errors
	///
	/// `Error::State` while running.
	pub fn replicate(&self) -> Result<Self> {
		let framing = {
			let lifecycle = self.shared.lifecycle.lock();
			if lifecycle.is_running() {
				return Err(Error::State("cannot replicate a running postman"));
			}
			lifecycle.framing.clone()
		};
		let hooks = self.shared.hooks.read().clone();
		Ok(Self::from_parts(self.shared.config.clone(), framing, self.shared.recipients.snapshot(), hooks))
	}

	/// Starts the sender and receiver tasks on the bound connection.
	///
	/// Spawns onto the current Tokio runtime, or onto a shared fallback
	/// runtime when called from outside one.
	///
	/// # Errors
	///
	/// `Error::State` when already running, without serializer or without a
	/// bound connection. A connection is consumed by the run it served.
	pub fn start(&self) -> Result<()> {
		let mut lifecycle = self.shared.lifecycle.lock();
		if lifecycle.is_running() {
			return Err(Error::State("postman is already running"));
		}
		let Some(framing) = lifecycle.framing.clone() else {
			return Err(Error::State("no serializer configured"));
		};
		let Some(connection) = lifecycle.connection.take() else {
			return Err(Error::State("no connection bound"));
		};

		let config = &self.shared.config;
		let (reader, writer) = tokio::io::split(connection);
		let (outbox, letters) = mpsc::unbounded_channel();
		let shutdown = CancellationToken::new();
		let abort = CancellationToken::new();

		let sender = spawn(
			TaskClass::Sender,
			self.id(),
			sender::Sender {
				postman: self.clone(),
				writer: BufWriter::with_capacity(config.write_buffer.max(1), writer),
				letters,
				framing: Arc::clone(&framing),
				shutdown: shutdown.clone(),
				abort: abort.clone(),
			}
			.run(),
		);
		let receiver = spawn(
			TaskClass::Receiver,
			self.id(),
			receiver::Receiver {
				postman: self.clone(),
				reader,
				framing,
				dispatcher: Dispatcher::new(config.delivery),
				sender,
				shutdown: shutdown.clone(),
				abort,
			}
			.run(),
		);

		tracing::debug!(postman = %self.id(), delivery = config.delivery.as_str(), "postman.start");
		lifecycle.run = Some(Run { outbox, shutdown, receiver });
		Ok(())
	}

	/// Queues a letter for sending. Never waits for the connection.
	///
	/// Letters from one caller are written in call order.
	///
	/// # Errors
	///
	/// - `Error::State` when not running.
	/// - `Error::Stopped` once the sender began its final drain.
	pub fn send(&self, letter: L) -> Result<()> {
		let lifecycle = self.shared.lifecycle.lock();
		let Some(run) = lifecycle.run.as_ref().filter(|run| run.is_alive()) else {
			return Err(Error::State("postman is not running"));
		};
		run.outbox.send(letter).map_err(|_| Error::Stopped)
	}

	/// Stops the exchange and waits until the connection is closed.
	///
	/// Every letter queued before this call is written before the write side
	/// is half-closed. The call returns once the peer closed its side as well,
	/// so it waits for as long as the peer keeps its side open.
	///
	/// # Errors
	///
	/// - `Error::State` when not running.
	/// - The first fault of the run, if any.
	pub async fn stop(&self) -> Result<()> {
		let Run { outbox, shutdown, receiver } = {
			let mut lifecycle = self.shared.lifecycle.lock();
			match lifecycle.run.take() {
				Some(run) if run.is_alive() => run,
				finished => {
					lifecycle.run = finished;
					return Err(Error::State("postman is not running"));
				}
			}
		};

		tracing::debug!(postman = %self.id(), "postman.stop");
		shutdown.cancel();
		drop(outbox);
		match receiver.await {
			Ok(outcome) => outcome,
			Err(err) => Err(err.into()),
		}
	}
}
