//! Content-addressing primitives: event hashes and opaque signatures.
//!
//! Hashing and signature *verification* are external collaborators per the
//! core's scope (signed events arrive pre-validated from gossip). What the
//! core does own is the hashed/unhashed split of the event wire format and
//! the byte-level operations consensus performs directly on signatures:
//! XOR whitening and a single deterministic coin-flip bit.
use data_encoding::BASE32;
use disco::symmetric::DiscoHash;
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// Length in bytes of an event hash.
pub const HASH_LENGTH: usize = 32;

/// The zero hash, used as a sentinel for "no parent".
pub const NULL_HASH: Hash = Hash([0u8; HASH_LENGTH]);

/// A content hash identifying an event.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Hash([u8; HASH_LENGTH]);

impl Hash {
    /// Build a hash from a byte slice, copying exactly `HASH_LENGTH` bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = [0u8; HASH_LENGTH];
        buf.copy_from_slice(bytes);
        Self(buf)
    }

    /// Whether this is the null/sentinel hash.
    pub fn is_null(&self) -> bool {
        *self == NULL_HASH
    }

    #[cfg(test)]
    pub fn random() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        Self(rng.gen())
    }
}

impl Deref for Hash {
    type Target = [u8; HASH_LENGTH];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", BASE32.encode(&self.0))
    }
}

/// Compute the canonical hash of a *hashed-data* region.
///
/// Callers are responsible for serializing exactly the hashed-data fields
/// (creator, self-parent-hash, other-parent-hash, self-parent-gen,
/// other-parent-gen, timestamp-created, transactions) with `bincode` before
/// calling this; unhashed-data (signature, other-id) must never be included.
pub fn hash_bytes(bytes: &[u8]) -> Hash {
    let mut hasher = DiscoHash::new(HASH_LENGTH);
    hasher.write(bytes);
    Hash::from_bytes(&hasher.sum())
}

/// An opaque cryptographic signature over an event's hashed-data region.
///
/// The core never verifies signatures — that happens upstream, in the
/// gossip collaborator, before an event is handed to `insert`. Inside the
/// core a signature is only ever XORed for round whitening or inspected one
/// byte at a time for the coin-round fallback vote.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Signature(Box<[u8]>);

impl Signature {
    /// Wrap raw signature bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec().into_boxed_slice())
    }

    /// Raw signature bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Deterministic coin-round bit: the LSB of the byte at the signature's
    /// midpoint, per spec.md section 8 scenario 3.
    pub fn coin_bit(&self) -> bool {
        if self.0.is_empty() {
            return false;
        }
        let mid = self.0.len() / 2;
        self.0[mid] & 1 == 1
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", BASE32.encode(&self.0))
    }
}

/// XOR-accumulating whitening buffer: `whitening(R) = XOR` of judge
/// signatures, truncated to a configured length, zero-initialized.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Whitening(Box<[u8]>);

impl Whitening {
    /// A zero-initialized whitening buffer of the given length.
    pub fn zero(len: usize) -> Self {
        Self(vec![0u8; len].into_boxed_slice())
    }

    /// Configured length of this whitening buffer, in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this buffer was configured with zero length.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// XOR a judge's signature into the buffer, truncated/zero-padded to
    /// the buffer's configured length.
    pub fn xor_in(&mut self, sig: &Signature) {
        let bytes = sig.as_bytes();
        for (i, b) in self.0.iter_mut().enumerate() {
            if let Some(sb) = bytes.get(i) {
                *b ^= sb;
            }
        }
    }

    /// XOR a signature with this whitening buffer, for the final tie-break
    /// key, truncated/zero-padded to the buffer's length.
    pub fn apply(&self, sig: &Signature) -> Box<[u8]> {
        let bytes = sig.as_bytes();
        self.0
            .iter()
            .enumerate()
            .map(|(i, w)| w ^ bytes.get(i).copied().unwrap_or(0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coin_bit_is_midpoint_lsb() {
        let sig = Signature::from_bytes(&[0x00, 0x00, 0x01, 0x00, 0x00]);
        assert!(sig.coin_bit());
        let sig = Signature::from_bytes(&[0x00, 0x00, 0x02, 0x00, 0x00]);
        assert!(!sig.coin_bit());
    }

    #[test]
    fn whitening_xor_roundtrip() {
        let mut w = Whitening::zero(4);
        w.xor_in(&Signature::from_bytes(&[1, 2, 3, 4]));
        w.xor_in(&Signature::from_bytes(&[1, 2, 3, 4]));
        // XOR of the same bytes twice cancels out.
        assert_eq!(
            w.apply(&Signature::from_bytes(&[0, 0, 0, 0])).as_ref(),
            &[0, 0, 0, 0]
        );
    }

    #[test]
    fn hash_debug_is_base32() {
        let h = Hash::from_bytes(&[0u8; HASH_LENGTH]);
        let s = format!("{:?}", h);
        assert!(!s.is_empty());
    }
}
