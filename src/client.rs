use std::io;
use std::time::{Duration, SystemTime};

use tarpc::{client, context, tokio_serde::formats::Bincode};
use log::debug;

use crate::rpc::NodeServiceClient;

/// Dial a peer and spawn the client dispatch task.
pub async fn setup_client(addr: &str) -> io::Result<NodeServiceClient> {
	debug!("connecting to {}", addr);
	let transport = tarpc::serde_transport::tcp::connect(addr, Bincode::default).await?;
	debug!("connected to {}", addr);
	Ok(NodeServiceClient::new(client::Config::default(), transport).spawn())
}

/// RPC context whose deadline reflects the configured timeout.
pub fn deadline_context(timeout: Duration) -> context::Context {
	let mut ctx = context::current();
	ctx.deadline = SystemTime::now() + timeout;
	ctx
}
