use serde::{Serialize, Deserialize};
use thiserror::Error;
use std::{
	result::Result,
	error,
	fmt
};
use super::{ring::Digest, Node};

/// Fail to execute the RPC at the server side
#[derive(Serialize, Deserialize, Debug)]
pub struct RpcFailure {
	/// Error message
	message: String
}

impl fmt::Display for RpcFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "RPC failed: {}", self.message)
	}
}

/// Convert DhtError to RpcFailure to serialize it for RPC call
impl From<DhtError> for RpcFailure {
	fn from(e: DhtError) -> Self {
		Self {
			message: e.to_string()
		}
	}
}

impl error::Error for RpcFailure {
}

/// Key-value errors surfaced to the originating client over the wire
#[derive(Error, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum KvError {
	#[error("key not found")]
	KeyNotFound,
	/// The addressed node does not own the key; retry at the hinted node
	#[error("wrong node for key, try {hint}")]
	WrongNode { hint: Node },
	#[error("write failed: {message}")]
	WriteFailed { message: String }
}

#[derive(Error, Debug)]
pub enum DhtError {
	#[error("{node}: no live successor")]
	NoLiveSuccessor {
		node: Node
	},
	#[error("routing exhausted after {steps} hops looking for id {id}")]
	RoutingExhausted {
		id: Digest,
		steps: usize
	},
	#[error("id collision: {existing} already holds the id of {joining}")]
	IdCollision {
		existing: Node,
		joining: Node
	},
	#[error("{node}: failed to join: {message}")]
	JoinFailure {
		node: Node,
		message: String
	},
	#[error("invalid node id {0:?}")]
	InvalidId(String),
	#[error(transparent)]
	Kv(#[from] KvError),
	/// Error reported by the remote side of the RPC
	#[error("RPC failure")]
	RpcFailure(#[from] RpcFailure),
	#[error("RPC internal error")]
	RpcError(#[from] tarpc::client::RpcError),
	#[error("IO error")]
	IoError(#[from] std::io::Error)
}

pub type DhtResult<T> = Result<T, DhtError>;
