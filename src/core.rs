pub mod node;
pub mod ring;
pub mod config;
pub mod data_store;
pub mod error;

pub use node::*;
pub use config::*;
pub use error::*;

use self::ring::{id_mask, Digest};
use sha1::{Digest as _, Sha1};

/// SHA-1 of `data`, reduced modulo the ring size.
///
/// The low `bits` bits of the 160-bit digest equal the digest mod 2^bits,
/// so the trailing bytes are all that is kept.
pub fn hash_id(data: &[u8], bits: usize) -> Digest {
	let digest = Sha1::digest(data);
	let mut tail = [0u8; 8];
	tail.copy_from_slice(&digest[12..20]);
	Digest::from_be_bytes(tail) & id_mask(bits)
}

pub fn construct_node(addr: &str, bits: usize) -> Node {
	Node {
		addr: addr.to_string(),
		id: hash_id(addr.as_bytes(), bits)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hashed_ids_fit_the_ring() {
		for port in 0..200u16 {
			let addr = format!("10.0.0.1:{}", port);
			assert!(hash_id(addr.as_bytes(), 6) < 64);
		}
	}

	#[test]
	fn hashing_is_deterministic() {
		let a = hash_id(b"192.168.0.7:4170", 32);
		let b = hash_id(b"192.168.0.7:4170", 32);
		assert_eq!(a, b);
		assert_eq!(construct_node("192.168.0.7:4170", 32).id, a);
	}

	#[test]
	fn narrow_ring_truncates_the_wide_one() {
		let wide = hash_id(b"10.1.2.3:8000", 32);
		let narrow = hash_id(b"10.1.2.3:8000", 6);
		assert_eq!(narrow, wide & 63);
	}
}
