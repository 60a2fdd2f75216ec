use std::default::Default;
use std::path::PathBuf;

use super::ring::MAX_BITS;

#[derive(Clone)]
pub struct Config {
	/// Ring width m: identifiers live in [0, 2^m)
	pub num_bits: usize,
	/// Successor-list length r (1..=32)
	pub successors: usize,
	/// Interval to periodically stabilize (in ms, 0 disables)
	pub stabilize_interval: u64,
	/// Interval to periodically fix a finger table entry (in ms, 0 disables)
	pub fix_finger_interval: u64,
	/// Interval to periodically probe the predecessor (in ms, 0 disables)
	pub check_predecessor_interval: u64,
	/// Deadline for a single outbound RPC (in ms)
	pub rpc_timeout: u64,
	/// Max number of concurrent inbound connections
	pub max_connections: usize,
	/// Store values as files under this directory instead of in memory
	pub storage_dir: Option<PathBuf>
}

impl Default for Config {
	fn default() -> Self {
		Self {
			num_bits: MAX_BITS / 2,
			successors: 4,
			stabilize_interval: 10_000,
			fix_finger_interval: 10_000,
			check_predecessor_interval: 10_000,
			rpc_timeout: 2_000,
			max_connections: 16,
			storage_dir: None
		}
	}
}
