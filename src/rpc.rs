use std::collections::HashMap;
use serde::{Serialize, Deserialize};

use crate::core::{
	ring::Digest,
	data_store::{Key, Value},
	error::{KvError, RpcFailure},
	Node
};

/// One step of the iterative lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FindResult {
	/// The target id falls in the answering node's successor interval
	Found(Node),
	/// Not found here; keep routing through this node
	Forward(Node)
}

/// Full snapshot of a node's routing state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
	pub node: Node,
	pub predecessor: Option<Node>,
	pub successor_list: Vec<Node>,
	pub finger_table: Vec<Option<Node>>
}

#[tarpc::service]
pub trait NodeService {
	/// Liveness probe
	async fn ping_rpc();
	/// Snapshot of the callee's routing state
	async fn self_rpc() -> NodeState;

	async fn find_successor_rpc(id: Digest) -> Result<FindResult, RpcFailure>;
	async fn notify_rpc(node: Node);
	/// Unconditionally install a predecessor
	async fn add_predecessor_rpc(node: Node);

	// Key operations served by the owning node
	async fn get_rpc(key: Key) -> Result<Value, KvError>;
	async fn put_rpc(key: Key, value: Value) -> Result<(), KvError>;
	async fn delete_rpc(key: Key);

	// Partition transfer on join and graceful leave
	async fn get_all_rpc(id: Digest) -> HashMap<Key, Value>;
	async fn put_all_rpc(entries: HashMap<Key, Value>);
}
