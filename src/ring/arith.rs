use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Position on the ring. Always `< 2^bits` of the owning [`RingSpace`].
pub type NodeId = u64;

pub const MAX_BITS: u32 = 63;

/// The m-bit identifier space shared by every member of a ring.
///
/// Hashing, finger table sizing and finger start computation all derive from `bits`,
/// so two nodes only interoperate when they agree on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingSpace {
    bits: u32,
}

impl RingSpace {
    pub fn new(bits: u32) -> Result<Self> {
        if bits == 0 || bits > MAX_BITS {
            bail!("ring size must be between 1 and {} bits, got {}", MAX_BITS, bits);
        }
        Ok(Self { bits })
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Number of identifiers on the ring (`2^bits`).
    pub fn size(&self) -> u64 {
        1u64 << self.bits
    }

    fn mask(&self) -> u64 {
        self.size() - 1
    }

    /// SHA-256 of `identifier`, read as a big-endian integer and reduced modulo `2^bits`.
    ///
    /// Only the low-order 64 bits of the digest matter for the reduction, so they are the
    /// only ones decoded.
    pub fn hash(&self, identifier: &str) -> NodeId {
        let digest = Sha256::digest(identifier.as_bytes());
        let mut low = [0u8; 8];
        low.copy_from_slice(&digest[digest.len() - 8..]);
        u64::from_be_bytes(low) & self.mask()
    }

    /// Start of finger `i`: `(id + 2^i) mod 2^bits`.
    pub fn finger_start(&self, id: NodeId, i: u32) -> NodeId {
        id.wrapping_add(1u64 << i) & self.mask()
    }
}

/// True iff `k` lies in `(start, end]` walking clockwise.
///
/// When `start == end` the arc is the whole circle and every `k` is inside, which is what
/// lets a singleton node own every key.
pub fn in_arc(k: NodeId, start: NodeId, end: NodeId) -> bool {
    if start < end {
        start < k && k <= end
    } else {
        start < k || k <= end
    }
}

/// True iff `k` lies strictly inside `(start, end)`.
///
/// `in_open_arc(k, a, a)` holds for every `k != a`.
pub fn in_open_arc(k: NodeId, start: NodeId, end: NodeId) -> bool {
    k != end && in_arc(k, start, end)
}
