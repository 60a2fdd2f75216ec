#![allow(dead_code)]

use chord_ring::core::{hash_id, ring::in_range_inc, Config, Node};
use rand::Rng;

// Small ring so arcs can be laid out by hand: ids live in [0, 64)
pub const TEST_BITS: usize = 6;

/// Config with every periodic task disabled so tests can drive
/// maintenance by hand, one round at a time.
pub fn test_config() -> Config {
	Config {
		num_bits: TEST_BITS,
		successors: 2,
		stabilize_interval: 0,
		fix_finger_interval: 0,
		check_predecessor_interval: 0,
		rpc_timeout: 1_000,
		..Config::default()
	}
}

pub fn test_node(id: u64, port: u16) -> Node {
	Node {
		id,
		addr: format!("127.0.0.1:{}", port)
	}
}

// Generate a key whose digest is in range (start, end]
pub fn generate_key_in_range<T: Rng>(rng: &mut T, start: u64, end: u64) -> Vec<u8> {
	loop {
		let key = rng.gen::<[u8; 8]>();
		if in_range_inc(hash_id(&key, TEST_BITS), start, end) {
			return Vec::from(key);
		}
	}
}

/// Key hashing to exactly `digest` on the test ring.
pub fn key_with_digest<T: Rng>(rng: &mut T, digest: u64) -> Vec<u8> {
	generate_key_in_range(rng, digest.wrapping_sub(1) & 63, digest)
}
