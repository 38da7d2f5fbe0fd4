//! Connection acceptor stamping out one postman per inbound connection.


use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::spawn::{TaskClass, spawn};
use crate::{Connection, Error, Listener, Postman, PostmanId, Result};

type Registry<L> = Arc<Mutex<HashMap<PostmanId, Postman<L>>>>;

struct AcceptLoop {
	cancel: CancellationToken,
	task: JoinHandle<Result<()>>,
}

struct State<L, N> {
	listener: Option<N>,
	blueprint: Option<Postman<L>>,
	accept_loop: Option<AcceptLoop>,
}

/// Accepts connections and serves each with a replica of a blueprint postman.
///
/// Spawned postmen run independently of each other; the office only tracks
/// them until their connection closes.
pub struct Office<L, N = tokio::net::TcpListener> {
	state: Mutex<State<L, N>>,
	postmen: Registry<L>,
}

impl<L, N> Default for Office<L, N> {
	fn default() -> Self {
		Self {
			state: Mutex::new(State {
				listener: None,
				blueprint: None,
				accept_loop: None,
			}),
			postmen: Arc::new(Mutex::new(HashMap::new())),
		}
	}
}

impl<L, N> std::fmt::Debug for Office<L, N> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Office")
			.field("running", &self.is_running())
			.field("postmen", &self.postmen.lock().len())
			.finish_non_exhaustive()
	}
}

impl<L, N> Office<L, N> {
	/// Creates an office without listener or blueprint.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns true while the accept loop is alive.
	pub fn is_running(&self) -> bool {
		is_alive(&self.state.lock())
	}

	/// Returns the spawned postmen whose connection is still open.
	pub fn postmen(&self) -> Vec<Postman<L>> {
		self.postmen.lock().values().cloned().collect()
	}
}

impl<L, N> Office<L, N>
where
	L: Send + Sync + 'static,
	N: Listener,
{
	/// Sets the listener the next [`start`](Self::start) accepts from.
	///
	/// # Errors
	///
	/// `Error::State` while running.
	pub fn bind(&self, listener: N) -> Result<()> {
		let mut state = self.state.lock();
		if is_alive(&state) {
			return Err(Error::State("cannot bind a listener while running"));
		}
		state.listener = Some(listener);
		Ok(())
	}

	/// Sets the blueprint every accepted connection is served by a replica of.
	///
	/// The blueprint is checked only when a replica is started.
	///
	/// # Errors
	///
	/// `Error::State` while running.
	pub fn spawn(&self, blueprint: Postman<L>) -> Result<()> {
		let mut state = self.state.lock();
		if is_alive(&state) {
			return Err(Error::State("cannot change the blueprint while running"));
		}
		state.blueprint = Some(blueprint);
		Ok(())
	}

	/// Starts accepting. The listener is consumed by the accept loop.
	///
	/// # Errors
	///
	/// `Error::State` when already running, without listener or without
	/// blueprint.
	pub fn start(&self) -> Result<()> {
		let mut state = self.state.lock();
		if is_alive(&state) {
			return Err(Error::State("office is already running"));
		}
		let Some(blueprint) = state.blueprint.clone() else {
			return Err(Error::State("no blueprint configured"));
		};
		let Some(listener) = state.listener.take() else {
			return Err(Error::State("no listener bound"));
		};

		if let Some(previous) = state.accept_loop.take() {
			tracing::debug!(finished = previous.task.is_finished(), "office.restart");
		}
		let cancel = CancellationToken::new();
		let task = spawn(
			TaskClass::Acceptor,
			"office",
			accept_loop(listener, blueprint, Arc::clone(&self.postmen), cancel.clone()),
		);
		state.accept_loop = Some(AcceptLoop { cancel, task });
		tracing::debug!("office.start");
		Ok(())
	}

	/// Stops accepting and closes the listener.
	///
	/// With `stop_postmen`, also stops every spawned postman and waits for
	/// their handshakes; otherwise they keep serving their connections.
	///
	/// # Errors
	///
	/// - `Error::State` if the office was not started since the last stop.
	/// - The accept failure that ended the loop, if any.
	pub async fn stop(&self, stop_postmen: bool) -> Result<()> {
		let accept_loop = self.state.lock().accept_loop.take();
		let Some(AcceptLoop { cancel, task }) = accept_loop else {
			return Err(Error::State("office is not running"));
		};

		cancel.cancel();
		let outcome = match task.await {
			Ok(outcome) => outcome,
			Err(err) => Err(err.into()),
		};

		if stop_postmen {
			let postmen: Vec<_> = self.postmen.lock().drain().map(|(_, postman)| postman).collect();
			tracing::debug!(count = postmen.len(), "office.stop.postmen");
			let mut stopping = JoinSet::new();
			for postman in postmen {
				stopping.spawn(async move { (postman.id(), postman.stop().await) });
			}
			while let Some(joined) = stopping.join_next().await {
				match joined {
					// Already ended on its own.
					Ok((_, Ok(()) | Err(Error::State(_)))) => {}
					Ok((id, Err(err))) => tracing::warn!(postman = %id, error = %err, "office.stop.postman_failed"),
					Err(err) => tracing::error!(error = %err, "office.stop.join_failed"),
				}
			}
		}

		tracing::debug!(ok = outcome.is_ok(), "office.stopped");
		outcome
	}
}

fn is_alive<L, N>(state: &State<L, N>) -> bool {
	state.accept_loop.as_ref().is_some_and(|accept_loop| !accept_loop.task.is_finished())
}

async fn accept_loop<L, N>(mut listener: N, blueprint: Postman<L>, postmen: Registry<L>, cancel: CancellationToken) -> Result<()>
where
	L: Send + Sync + 'static,
	N: Listener,
{
	loop {
		let connection = tokio::select! {
			biased;
			() = cancel.cancelled() => {
				tracing::debug!("office.accept.cancelled");
				return Ok(());
			}
			accepted = listener.accept() => match accepted {
				Ok(connection) => connection,
				Err(err) => {
					tracing::error!(error = %err, "office.accept.failed");
					return Err(err.into());
				}
			},
		};

		if let Err(err) = admit(&blueprint, &postmen, connection) {
			tracing::warn!(error = %err, "office.admit.failed");
		}
	}
}

/// Replicates the blueprint onto `connection`, tracks the replica and starts it.
fn admit<L>(blueprint: &Postman<L>, postmen: &Registry<L>, connection: impl Connection) -> Result<PostmanId>
where
	L: Send + Sync + 'static,
{
	let postman = blueprint.replicate()?;
	postman.bind(connection)?;

	let registry = Arc::downgrade(postmen);
	postman.on_stop(move |postman| {
		if let Some(registry) = registry.upgrade() {
			registry.lock().remove(&postman.id());
		}
	});

	let id = postman.id();
	postmen.lock().insert(id, postman.clone());
	if let Err(err) = postman.start() {
		postmen.lock().remove(&id);
		return Err(err);
	}
	tracing::debug!(postman = %id, "office.accept");
	Ok(id)
}
