use std::future::Future;
use std::sync::OnceLock;

use tokio::task::JoinHandle;

/// Long-lived tasks owned by postmen and offices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskClass {
	/// Outbound pipeline of one postman.
	Sender,
	/// Inbound pipeline of one postman.
	Receiver,
	/// Accept loop of one office.
	Acceptor,
}

impl TaskClass {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Sender => "sender",
			Self::Receiver => "receiver",
			Self::Acceptor => "acceptor",
		}
	}
}

/// Returns the ambient runtime, or a shared fallback runtime when called
/// from outside one.
fn runtime_handle() -> tokio::runtime::Handle {
	if let Ok(handle) = tokio::runtime::Handle::try_current() {
		return handle;
	}

	static GLOBAL_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	let runtime = GLOBAL_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(2)
			.thread_name("postie-global")
			.build()
			.expect("failed to build postie global tokio runtime")
	});
	runtime.handle().clone()
}

/// Spawns a pipeline task with classification metadata.
pub(crate) fn spawn<F>(class: TaskClass, owner: impl std::fmt::Display, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(task_class = class.as_str(), %owner, "postie.spawn");
	runtime_handle().spawn(fut)
}
