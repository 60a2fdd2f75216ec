use std::mem::size_of;

use super::error::DhtError;

pub type Digest = u64;
// Widest ring the fixed-width digest can carry
pub const MAX_BITS: usize = size_of::<Digest>() * 8;

/// Bit mask selecting the low `bits` bits of a digest.
pub fn id_mask(bits: usize) -> Digest {
	if bits >= MAX_BITS {
		Digest::MAX
	} else {
		(1 << bits) - 1
	}
}

// Strictly in range: id in (start, end)
// start == end covers the whole ring
pub fn in_range(id: Digest, start: Digest, end: Digest) -> bool {
	if start == end {
		true
	}
	else if end > start {
		// (start, id, end)
		id > start && id < end
	}
	else {
		// end < start, wraps past zero
		// case 1: (start, id, end + MAX_VAL)
		// case 2: (start, id + MAX_VAL, end + MAX_VAL)
		id > start || id < end
	}
}

// In range with an inclusive right bound: id in (start, end]
// start == end covers the whole ring
pub fn in_range_inc(id: Digest, start: Digest, end: Digest) -> bool {
	start == end || in_range(id, start, end) || id == end
}

/// Start of finger `k` for a node at `id`: (id + 2^k) mod 2^bits.
pub fn finger_start(id: Digest, k: usize, bits: usize) -> Digest {
	id.wrapping_add(1 << k) & id_mask(bits)
}

/// Parse a hex node id override and check it fits in the ring.
pub fn parse_id(hex_id: &str, bits: usize) -> Result<Digest, DhtError> {
	if hex_id.is_empty() || hex_id.len() > 40 {
		return Err(DhtError::InvalidId(hex_id.to_string()));
	}
	let stripped = hex_id.trim_start_matches('0');
	if stripped.len() > size_of::<Digest>() * 2 {
		return Err(DhtError::InvalidId(hex_id.to_string()));
	}
	let id = if stripped.is_empty() {
		0
	} else {
		Digest::from_str_radix(stripped, 16)
			.map_err(|_| DhtError::InvalidId(hex_id.to_string()))?
	};
	if id > id_mask(bits) {
		return Err(DhtError::InvalidId(hex_id.to_string()));
	}
	Ok(id)
}
