use futures::future::JoinAll;
use tokio::{sync::watch, task::JoinHandle};

/// Handle over a started node: the listener and maintenance tasks,
/// plus the channel used to stop them cooperatively.
pub struct ServerManager {
	pub(crate) handle: JoinAll<JoinHandle<()>>,
	pub(crate) tx: watch::Sender<bool>
}

impl ServerManager {
	/// Signal every task to stop and wait for them to drain.
	pub async fn stop(self) -> anyhow::Result<()> {
		// receivers may already be gone if the tasks finished on their own
		let _ = self.tx.send(true);
		for res in self.handle.await {
			res?;
		}
		Ok(())
	}

	/// Run until the tasks exit on their own.
	pub async fn wait(self) -> anyhow::Result<()> {
		for res in self.handle.await {
			res?;
		}
		Ok(())
	}
}
