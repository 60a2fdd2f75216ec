use std::{
	collections::HashMap,
	sync::{Arc, RwLock},
	time::Duration
};
use rand::{Rng, SeedableRng};
use tarpc::{
	context,
	tokio_serde::formats::Bincode,
	server::Channel,
	serde::Serialize,
	serde::Deserialize
};
use futures::{future, prelude::*};
use log::{info, warn, debug, error};
use super::error;
use super::{
	ring::*,
	config::*,
	data_store::*,
	error::{
		*,
		DhtError::*
	}
};
use crate::{rpc::*, client, server::ServerManager};
use super::hash_id;

/// Upper bound on lookup hops; doubles as a guard against routing
/// cycles caused by stale fingers.
pub const MAX_STEPS: usize = 32;

// Data part of the node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
	pub id: Digest,
	pub addr: String
}

impl std::fmt::Display for Node {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "Node({}, {})", self.id, self.addr)
	}
}

#[derive(Clone)]
pub struct NodeServer {
	node: Node,
	store: DataStore,
	config: Config,
	predecessor: Arc<RwLock<Option<Node>>>,
	// Entry 0 is the authoritative successor
	successor_list: Arc<RwLock<Vec<Node>>>,
	// Entry i tracks the successor of (id + 2^i) mod 2^m
	finger_table: Arc<RwLock<Vec<Option<Node>>>>,
	// connection to remote nodes
	connection_map: Arc<RwLock<HashMap<Digest, NodeServiceClient>>>
}

impl NodeServer {
	pub fn new(node: Node, config: Config) -> DhtResult<Self> {
		assert!((1..=MAX_BITS).contains(&config.num_bits), "num_bits out of range");
		assert!((1..=32).contains(&config.successors), "successor-list length out of range");
		assert!(node.id <= id_mask(config.num_bits), "node id does not fit the ring");

		let store = match config.storage_dir.as_ref() {
			Some(dir) => DataStore::on_disk(dir.join(format!("files-{:x}", node.id)))?,
			None => DataStore::in_memory()
		};

		// A lone node is its own successor; fingers are filled by fix_finger
		let successor_list = vec![node.clone(); config.successors];
		let finger_table = vec![None; config.num_bits];

		Ok(NodeServer {
			node,
			store,
			config,
			predecessor: Arc::new(RwLock::new(None)),
			successor_list: Arc::new(RwLock::new(successor_list)),
			finger_table: Arc::new(RwLock::new(finger_table)),
			connection_map: Arc::new(RwLock::new(HashMap::new()))
		})
	}

	pub fn local_node(&self) -> &Node {
		&self.node
	}

	pub fn ring_bits(&self) -> usize {
		self.config.num_bits
	}

	pub fn get_successor(&self) -> Node {
		self.successor_list.read().unwrap()[0].clone()
	}

	pub fn get_successor_list(&self) -> Vec<Node> {
		self.successor_list.read().unwrap().clone()
	}

	fn set_successor_list(&self, list: Vec<Node>) {
		debug_assert!(!list.is_empty());
		*self.successor_list.write().unwrap() = list;
	}

	pub fn get_predecessor(&self) -> Option<Node> {
		self.predecessor.read().unwrap().clone()
	}

	fn set_predecessor(&self, node: Option<Node>) {
		*self.predecessor.write().unwrap() = node;
	}

	fn set_finger(&self, index: usize, node: Node) {
		self.finger_table.write().unwrap()[index] = Some(node);
	}

	/// Routing-state snapshot, as served to peers by `self_rpc`.
	pub fn snapshot(&self) -> NodeState {
		NodeState {
			node: self.node.clone(),
			predecessor: self.get_predecessor(),
			successor_list: self.get_successor_list(),
			finger_table: self.finger_table.read().unwrap().clone()
		}
	}

	/// Bucket contents rendered for the `dump` command.
	pub fn bucket_snapshot(&self) -> Vec<(Key, String)> {
		self.store.snapshot()
	}

	fn hash_key(&self, key: &[u8]) -> Digest {
		hash_id(key, self.config.num_bits)
	}

	fn ctx(&self) -> context::Context {
		client::deadline_context(Duration::from_millis(self.config.rpc_timeout))
	}

	async fn get_connection(&mut self, node: &Node) -> DhtResult<NodeServiceClient> {
		// Use block to drop map immediately after use
		{
			let map = self.connection_map.read().unwrap();
			if let Some(c) = map.get(&node.id) {
				// clients are cheap to clone
				return Ok(c.clone());
			}
		}
		debug!("{}: connecting to {}", self.node, node);
		let c = client::setup_client(&node.addr).await?;
		let mut map = self.connection_map.write().unwrap();
		map.insert(node.id, c.clone());
		Ok(c)
	}

	// Pooled connections are reclaimed once a peer is detected dead
	fn drop_connection(&self, node: &Node) {
		self.connection_map.write().unwrap().remove(&node.id);
	}

	/// Probe a peer; any transport failure counts as dead.
	pub async fn ping(&mut self, node: &Node) -> bool {
		if node.id == self.node.id {
			return true;
		}
		let c = match self.get_connection(node).await {
			Ok(c) => c,
			Err(_) => return false
		};
		match c.ping_rpc(self.ctx()).await {
			Ok(()) => true,
			Err(_) => {
				self.drop_connection(node);
				false
			}
		}
	}

	pub async fn ping_addr(&mut self, addr: &str) -> bool {
		let node = super::construct_node(addr, self.config.num_bits);
		self.ping(&node).await
	}

	async fn remote_state(&mut self, node: &Node) -> DhtResult<NodeState> {
		if node.id == self.node.id {
			return Ok(self.snapshot());
		}
		let c = self.get_connection(node).await?;
		match c.self_rpc(self.ctx()).await {
			Ok(state) => Ok(state),
			Err(e) => {
				self.drop_connection(node);
				Err(e.into())
			}
		}
	}

	/// Start the server
	/// Returns once the listener is up
	pub async fn start(&mut self, join_node: Option<Node>) -> DhtResult<ServerManager> {
		// channel used to shutdown (true means shutdown)
		let (tx, rx) = tokio::sync::watch::channel(false);

		let mut listener = tarpc::serde_transport::tcp::listen(&self.node.addr, Bincode::default).await?;
		let server = self.clone();
		let mut listener_rx = rx.clone();
		let max_connections = self.config.max_connections;
		let listener_handle = tokio::spawn(async move {
			listener.config_mut().max_frame_length(usize::MAX);
			let listener_fut = listener
				.filter_map(|r| future::ready(r.ok()))
				.map(tarpc::server::BaseChannel::with_defaults)
				.map(|channel| async {
					// Clone a new server to share the data in Arc
					channel.execute(server.clone().serve()).await;
				})
				.buffer_unordered(max_connections)
				.for_each(|_| async {});

			debug!("{}: listening", server.node);
			tokio::select! {
				_ = listener_fut => {
					warn!("{}: listener terminated", server.node);
				},
				_ = listener_rx.changed() => {
					debug!("{}: listener stopped gracefully", server.node);
				}
			};
		});

		// Join once the listener is up so the ring can call back
		if let Some(n) = join_node.as_ref() {
			if let Err(e) = self.join(n).await {
				let _ = tx.send(true);
				return Err(JoinFailure {
					node: n.clone(),
					message: e.to_string()
				});
			}
		}

		// Periodically stabilize
		let mut server = self.clone();
		let mut stabilize_rx = rx.clone();
		let stabilize_interval = self.config.stabilize_interval;
		let stabilize_handle = tokio::spawn(async move {
			if stabilize_interval == 0 {
				return;
			}
			let mut interval = tokio::time::interval(Duration::from_millis(stabilize_interval));
			loop {
				tokio::select! {
					_ = interval.tick() => {
						server.stabilize().await;
					},
					_ = stabilize_rx.changed() => {
						debug!("{}: stabilize task stopped gracefully", server.node);
						break;
					}
				};
			}
		});

		// Periodically refresh one finger table entry
		let mut server = self.clone();
		let mut fix_finger_rx = rx.clone();
		let fix_finger_interval = self.config.fix_finger_interval;
		let num_bits = self.config.num_bits;
		let fix_finger_handle = tokio::spawn(async move {
			if fix_finger_interval == 0 || num_bits < 2 {
				return;
			}
			let mut interval = tokio::time::interval(Duration::from_millis(fix_finger_interval));
			// StdRng can be sent across threads
			let mut rng = rand::prelude::StdRng::from_entropy();
			loop {
				tokio::select! {
					_ = interval.tick() => {
						// entry 0 is maintained through the successor list
						let index = rng.gen_range(1..num_bits);
						server.fix_finger(index).await;
					},
					_ = fix_finger_rx.changed() => {
						debug!("{}: fix_finger task stopped gracefully", server.node);
						break;
					}
				};
			}
		});

		// Periodically probe the predecessor
		let mut server = self.clone();
		let mut check_predecessor_rx = rx.clone();
		let check_predecessor_interval = self.config.check_predecessor_interval;
		let check_predecessor_handle = tokio::spawn(async move {
			if check_predecessor_interval == 0 {
				return;
			}
			let mut interval = tokio::time::interval(Duration::from_millis(check_predecessor_interval));
			loop {
				tokio::select! {
					_ = interval.tick() => {
						server.check_predecessor().await;
					},
					_ = check_predecessor_rx.changed() => {
						debug!("{}: check_predecessor task stopped gracefully", server.node);
						break;
					}
				};
			}
		});

		info!("{}: listening at {}", self.node, self.node.addr);
		// An aggregated handle for all tasks
		let joined_handle = future::join_all(vec![
			listener_handle,
			stabilize_handle,
			fix_finger_handle,
			check_predecessor_handle
		]);

		Ok(ServerManager {
			handle: joined_handle,
			tx
		})
	}

	/// Join the ring reachable through `peer`.
	///
	/// Resolves the successor of this node's id, installs it, then pulls
	/// the keys this node is now responsible for. The predecessor stays
	/// empty until the next notify round wires it in.
	pub async fn join(&mut self, peer: &Node) -> DhtResult<()> {
		if peer.addr == self.node.addr {
			return Err(JoinFailure {
				node: peer.clone(),
				message: "refusing to join through itself".to_string()
			});
		}
		debug!("{}: joining {}", self.node, peer);
		self.set_predecessor(None);
		let succ = self.find(self.node.id, peer.clone()).await?;
		if succ.id == self.node.id && succ.addr != self.node.addr {
			return Err(IdCollision {
				existing: succ,
				joining: self.node.clone()
			});
		}
		{
			let mut list = self.successor_list.write().unwrap();
			list[0] = succ.clone();
		}
		if succ.addr != self.node.addr {
			let c = self.get_connection(&succ).await?;
			let entries = match c.get_all_rpc(self.ctx(), self.node.id).await {
				Ok(entries) => entries,
				Err(e) => {
					self.drop_connection(&succ);
					return Err(e.into());
				}
			};
			if !entries.is_empty() {
				info!("{}: pulled {} keys from {}", self.node, entries.len(), succ);
			}
			self.store.merge(entries);
		}
		debug!("{}: joined {}", self.node, peer);
		Ok(())
	}

	/// Graceful leave: hand the bucket to the first responsive successor.
	///
	/// If every successor is gone the loss is logged and the node exits
	/// anyway; without replication the data is unrecoverable.
	pub async fn leave(&mut self) -> DhtResult<()> {
		let bucket = self.store.drain();
		if bucket.is_empty() {
			return Ok(());
		}
		let count = bucket.len();
		for succ in self.get_successor_list() {
			if succ.id == self.node.id {
				continue;
			}
			let c = match self.get_connection(&succ).await {
				Ok(c) => c,
				Err(_) => continue
			};
			match c.put_all_rpc(self.ctx(), bucket.clone()).await {
				Ok(()) => {
					info!("{}: handed {} keys to {}", self.node, count, succ);
					return Ok(());
				},
				Err(e) => {
					warn!("{}: failed to hand keys to {}: {}", self.node, succ, e);
					self.drop_connection(&succ);
				}
			};
		}
		error!("{}: no live successor to take {} keys, data lost", self.node, count);
		Ok(())
	}

	/// Resolve the node responsible for `id`, starting the walk at `start`.
	///
	/// Iterative: each hop answers either with the final node or with the
	/// next node to ask, so no RPC ever recurses into another RPC.
	pub async fn find(&mut self, id: Digest, start: Node) -> DhtResult<Node> {
		let mut cursor = start;
		for _ in 0..MAX_STEPS {
			let step = if cursor.id == self.node.id {
				self.find_successor(id).await?
			} else {
				let c = self.get_connection(&cursor).await?;
				match c.find_successor_rpc(self.ctx(), id).await {
					Ok(res) => res?,
					Err(e) => {
						self.drop_connection(&cursor);
						return Err(e.into());
					}
				}
			};
			match step {
				FindResult::Found(n) => return Ok(n),
				FindResult::Forward(n) => {
					debug!("{}: find({}) forwarded to {}", self.node, id, n);
					cursor = n;
				}
			};
		}
		Err(RoutingExhausted {
			id,
			steps: MAX_STEPS
		})
	}

	// One lookup step, answered from local state
	async fn find_successor(&mut self, id: Digest) -> DhtResult<FindResult> {
		let succ = self.safe_successor().await?;
		if in_range_inc(id, self.node.id, succ.id) {
			Ok(FindResult::Found(succ))
		} else {
			Ok(FindResult::Forward(self.closest_preceding_node(id).await))
		}
	}

	// First responsive entry of the successor list
	async fn safe_successor(&mut self) -> DhtResult<Node> {
		for succ in self.get_successor_list() {
			if succ.id == self.node.id || self.ping(&succ).await {
				return Ok(succ);
			}
		}
		Err(NoLiveSuccessor {
			node: self.node.clone()
		})
	}

	// Highest finger strictly between this node and id; stale or dead
	// fingers are skipped, they cost hops but never correctness
	async fn closest_preceding_node(&mut self, id: Digest) -> Node {
		let table = self.finger_table.read().unwrap().clone();
		for finger in table.iter().rev().take(table.len().saturating_sub(1)) {
			if let Some(f) = finger {
				if f.id == self.node.id {
					// forwarding to ourselves makes no progress
					continue;
				}
				if in_range(f.id, self.node.id, id) && self.ping(f).await {
					return f.clone();
				}
			}
		}
		self.get_successor()
	}

	/// One stabilization round; failures are logged and retried next tick.
	pub async fn stabilize(&mut self) {
		if let Err(e) = self.stabilize_round().await {
			error!("{}: failed to stabilize: {}", self.node, e);
		}
	}

	async fn stabilize_round(&mut self) -> DhtResult<()> {
		let mut succ = self.safe_successor().await?;

		// Adopt the successor's predecessor if it sits between us
		let state = self.remote_state(&succ).await?;
		if let Some(x) = state.predecessor {
			if in_range(x.id, self.node.id, succ.id) && self.ping(&x).await {
				debug!("{}: successor updated to {} in stabilize", self.node, x);
				succ = x;
			}
		}

		// Tell the successor about us; a failure here is repaired next round
		match self.get_connection(&succ).await {
			Ok(c) => {
				if let Err(e) = c.notify_rpc(self.ctx(), self.node.clone()).await {
					warn!("{}: notify to {} failed: {}", self.node, succ, e);
					self.drop_connection(&succ);
				}
			},
			Err(e) => warn!("{}: notify to {} failed: {}", self.node, succ, e)
		};

		// Rebuild the advance view of the next r nodes clockwise
		let r = self.config.successors;
		let mut list: Vec<Node> = Vec::with_capacity(r);
		let mut cursor = succ;
		while list.len() < r {
			if list.iter().any(|n| n.id == cursor.id) {
				// walked all the way around
				break;
			}
			list.push(cursor.clone());
			let state = match self.remote_state(&cursor).await {
				Ok(s) => s,
				Err(_) => break
			};
			let mut next = None;
			for candidate in state.successor_list {
				if self.ping(&candidate).await {
					next = Some(candidate);
					break;
				}
			}
			match next {
				Some(n) => cursor = n,
				None => break
			};
		}
		self.set_successor_list(list);
		Ok(())
	}

	// Adopt a predecessor candidate if the slot is empty, the current
	// predecessor is dead, or the candidate sits between it and us
	async fn notify(&mut self, candidate: Node) {
		if candidate.id == self.node.id {
			// a lone node announcing itself to itself
			return;
		}
		let adopt = match self.get_predecessor() {
			None => true,
			Some(p) => in_range(candidate.id, p.id, self.node.id) || !self.ping(&p).await
		};
		if adopt {
			debug!("{}: new predecessor set in notify: {}", self.node, candidate);
			self.set_predecessor(Some(candidate));
		}
	}

	/// Repoint finger `index` at the live successor of its start.
	pub async fn fix_finger(&mut self, index: usize) {
		let start = finger_start(self.node.id, index, self.config.num_bits);
		match self.find(start, self.node.clone()).await {
			Ok(n) => self.set_finger(index, n),
			Err(e) => {
				error!("{}: failed to fix finger {}: {}", self.node, index, e);
			}
		};
	}

	/// Sweep the whole finger table; used after join and in tests.
	pub async fn fix_all_fingers(&mut self) {
		for i in 0..self.config.num_bits {
			self.fix_finger(i).await;
		}
	}

	/// Clear the predecessor if it stopped responding, so the next
	/// notify can fill the slot.
	pub async fn check_predecessor(&mut self) {
		if let Some(pred) = self.get_predecessor() {
			if !self.ping(&pred).await {
				warn!("{}: predecessor {} unresponsive, clearing", self.node, pred);
				self.set_predecessor(None);
			}
		}
	}

	// Get a key from the ring
	pub async fn get(&mut self, key: &[u8]) -> DhtResult<Value> {
		let id = self.hash_key(key);
		let owner = self.find(id, self.node.clone()).await?;
		match self.get_at(&owner, key).await? {
			Ok(value) => Ok(value),
			Err(KvError::WrongNode { hint }) => {
				// follow the redirect once instead of re-running the lookup
				debug!("{}: redirected to {} for key digest {}", self.node, hint, id);
				Ok(self.get_at(&hint, key).await??)
			},
			Err(e) => Err(e.into())
		}
	}

	async fn get_at(&mut self, node: &Node, key: &[u8]) -> DhtResult<Result<Value, KvError>> {
		let c = self.get_connection(node).await?;
		match c.get_rpc(self.ctx(), key.to_vec()).await {
			Ok(res) => Ok(res),
			Err(e) => {
				self.drop_connection(node);
				Err(e.into())
			}
		}
	}

	// Put a key on the ring
	pub async fn put(&mut self, key: &[u8], value: &[u8]) -> DhtResult<()> {
		let id = self.hash_key(key);
		let owner = self.find(id, self.node.clone()).await?;
		match self.put_at(&owner, key, value).await? {
			Ok(()) => Ok(()),
			Err(KvError::WrongNode { hint }) => {
				// follow the redirect once instead of re-running the lookup
				debug!("{}: redirected to {} for key digest {}", self.node, hint, id);
				Ok(self.put_at(&hint, key, value).await??)
			},
			Err(e) => Err(e.into())
		}
	}

	async fn put_at(&mut self, node: &Node, key: &[u8], value: &[u8]) -> DhtResult<Result<(), KvError>> {
		let c = self.get_connection(node).await?;
		match c.put_rpc(self.ctx(), key.to_vec(), value.to_vec()).await {
			Ok(res) => Ok(res),
			Err(e) => {
				self.drop_connection(node);
				Err(e.into())
			}
		}
	}

	// Delete a key from the ring
	pub async fn delete(&mut self, key: &[u8]) -> DhtResult<()> {
		let id = self.hash_key(key);
		let owner = self.find(id, self.node.clone()).await?;
		let c = self.get_connection(&owner).await?;
		match c.delete_rpc(self.ctx(), key.to_vec()).await {
			Ok(()) => Ok(()),
			Err(e) => {
				self.drop_connection(&owner);
				Err(e.into())
			}
		}
	}

	// Whether this node provably does not own the digest: a known
	// predecessor bounds the arc this node is responsible for
	fn outside_own_arc(&self, id: Digest) -> bool {
		match self.get_predecessor() {
			Some(pred) => pred.id != self.node.id && !in_range_inc(id, pred.id, self.node.id),
			None => false
		}
	}

	// Serve a key from the local bucket, hinting at a better node when
	// this one provably does not own the key
	async fn get_local(&mut self, key: Key) -> Result<Value, KvError> {
		if let Some(value) = self.store.get(&key) {
			return Ok(value);
		}
		let id = self.hash_key(&key);
		if self.outside_own_arc(id) {
			let hint = self.closest_preceding_node(id).await;
			return Err(KvError::WrongNode { hint });
		}
		Err(KvError::KeyNotFound)
	}

	// Store a key in the local bucket, redirecting like get_local when
	// the key belongs to another node's arc
	async fn put_local(&mut self, key: Key, value: Value) -> Result<(), KvError> {
		let id = self.hash_key(&key);
		if self.outside_own_arc(id) {
			let hint = self.closest_preceding_node(id).await;
			return Err(KvError::WrongNode { hint });
		}
		self.store.put(key, value)
	}

	// Split the bucket for a node joining at joiner_id: keep the keys in
	// (joiner_id, own_id], hand over the rest of the arc
	fn take_range(&self, joiner_id: Digest) -> HashMap<Key, Value> {
		let bits = self.config.num_bits;
		let own_id = self.node.id;
		self.store
			.take_matching(&|key| !in_range_inc(hash_id(key, bits), joiner_id, own_id))
	}
}

#[tarpc::server]
impl NodeService for NodeServer {
	async fn ping_rpc(self, _: context::Context) {}

	async fn self_rpc(self, _: context::Context) -> NodeState {
		self.snapshot()
	}

	async fn find_successor_rpc(mut self, _: context::Context, id: Digest) -> Result<FindResult, error::RpcFailure> {
		self.find_successor(id).await.map_err(error::RpcFailure::from)
	}

	async fn notify_rpc(mut self, _: context::Context, node: Node) {
		self.notify(node).await
	}

	async fn add_predecessor_rpc(self, _: context::Context, node: Node) {
		debug!("{}: predecessor installed: {}", self.node, node);
		self.set_predecessor(Some(node));
	}

	async fn get_rpc(mut self, _: context::Context, key: Key) -> Result<Value, KvError> {
		self.get_local(key).await
	}

	async fn put_rpc(mut self, _: context::Context, key: Key, value: Value) -> Result<(), KvError> {
		self.put_local(key, value).await
	}

	async fn delete_rpc(self, _: context::Context, key: Key) {
		self.store.remove(&key);
	}

	async fn get_all_rpc(self, _: context::Context, id: Digest) -> HashMap<Key, Value> {
		let moved = self.take_range(id);
		if !moved.is_empty() {
			info!("{}: handing {} keys to the node joining at {}", self.node, moved.len(), id);
		}
		moved
	}

	async fn put_all_rpc(self, _: context::Context, entries: HashMap<Key, Value>) {
		if !entries.is_empty() {
			info!("{}: absorbing {} transferred keys", self.node, entries.len());
		}
		self.store.merge(entries);
	}
}
