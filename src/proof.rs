//! State proofs and their binary encoding
//!
//! A proof carries the proven payload, the Merkle path from that payload's
//! leaf up to the root, the root the quorum signed, and the quorum signature
//! record. Layout:
//!
//! ```text
//! magic "PLPF" | version u8 | value_len u32 | value
//! | branch_count u16 | (direction u8, sibling [32]) * branch_count
//! | signed_root [32] | quorum_type u8 | quorum_hash [32] | round u32
//! | sig_len u8 | signature
//! ```
//!
//! Integers are little endian. Direction 0 puts the sibling on the left,
//! 1 on the right.

use crate::query::ResponseMetadata;
use crate::quorum::{QuorumHash, QuorumType};
use crate::verification::{signing_digest, RootHash};
use crate::{Error, Result};
use secp256k1::{Keypair, Message, SECP256K1};
use serde::{Deserialize, Serialize};

/// Leading bytes of every encoded proof
pub const PROOF_MAGIC: [u8; 4] = *b"PLPF";

/// Encoding version this crate reads and writes
pub const PROOF_VERSION: u8 = 1;

/// Length of a BIP-340 Schnorr signature
pub const SIGNATURE_LEN: usize = 64;

const LEAF_TAG: u8 = 0x00;
const NODE_TAG: u8 = 0x01;

/// Merkle proof node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofNode {
    /// Left sibling hash
    Left([u8; 32]),
    /// Right sibling hash
    Right([u8; 32]),
}

impl ProofNode {
    pub fn sibling(&self) -> &[u8; 32] {
        match self {
            ProofNode::Left(hash) | ProofNode::Right(hash) => hash,
        }
    }

    /// Fold this node into the running hash
    pub fn apply(&self, current: &[u8; 32]) -> [u8; 32] {
        match self {
            // Current is right child
            ProofNode::Left(sibling) => hash_pair(sibling, current),
            // Current is left child
            ProofNode::Right(sibling) => hash_pair(current, sibling),
        }
    }

    fn direction(&self) -> u8 {
        match self {
            ProofNode::Left(_) => 0,
            ProofNode::Right(_) => 1,
        }
    }
}

/// Who signed the root, and the signature itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumSignature {
    pub quorum_type: QuorumType,
    pub quorum_hash: QuorumHash,
    /// Consensus round the root was signed in
    pub round: u32,
    pub signature: Vec<u8>,
}

/// Decoded state proof
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    /// Payload being proven
    pub value: Vec<u8>,

    /// Merkle proof path from leaf to root
    pub proof_path: Vec<ProofNode>,

    /// Root the quorum signed
    pub signed_root: RootHash,

    pub signature: QuorumSignature,
}

/// Bounds applied while decoding
#[derive(Debug, Clone, Copy)]
pub struct ProofLimits {
    pub max_depth: usize,
    pub max_value_size: usize,
}

impl Default for ProofLimits {
    fn default() -> Self {
        Self {
            max_depth: 64,
            max_value_size: 4 * 1024 * 1024,
        }
    }
}

impl Proof {
    /// Parse proof bytes.
    ///
    /// Any truncation, unknown direction byte, out-of-range length or
    /// trailing data is [`Error::MalformedProof`]. The input is not modified.
    pub fn decode(bytes: &[u8], limits: &ProofLimits) -> Result<Self> {
        let mut reader = Reader::new(bytes);

        let magic = reader.array::<4>("magic")?;
        if magic != PROOF_MAGIC {
            return Err(Error::MalformedProof(format!(
                "bad magic {}",
                hex::encode(magic)
            )));
        }

        let version = reader.u8("version")?;
        if version != PROOF_VERSION {
            return Err(Error::MalformedProof(format!(
                "unknown proof version {}",
                version
            )));
        }

        let value_len = reader.u32("value length")? as usize;
        if value_len > limits.max_value_size {
            return Err(Error::MalformedProof(format!(
                "value length {} exceeds maximum {}",
                value_len, limits.max_value_size
            )));
        }
        let value = reader.take(value_len, "value")?.to_vec();

        let branch_count = reader.u16("branch count")? as usize;
        if branch_count > limits.max_depth {
            return Err(Error::MalformedProof(format!(
                "Proof depth {} exceeds maximum {}",
                branch_count, limits.max_depth
            )));
        }

        let mut proof_path = Vec::with_capacity(branch_count);
        for index in 0..branch_count {
            let direction = reader.u8("branch direction")?;
            let sibling = reader.array::<32>("branch sibling")?;
            let node = match direction {
                0 => ProofNode::Left(sibling),
                1 => ProofNode::Right(sibling),
                other => {
                    return Err(Error::MalformedProof(format!(
                        "invalid direction {} in branch {}",
                        other, index
                    )))
                }
            };
            proof_path.push(node);
        }

        let signed_root = RootHash::new(reader.array::<32>("signed root")?);
        let quorum_type = QuorumType(reader.u8("quorum type")?);
        let quorum_hash = QuorumHash::new(reader.array::<32>("quorum hash")?);
        let round = reader.u32("round")?;

        let sig_len = reader.u8("signature length")? as usize;
        if sig_len != SIGNATURE_LEN {
            return Err(Error::MalformedProof(format!(
                "signature length {} (expected {})",
                sig_len, SIGNATURE_LEN
            )));
        }
        let signature = reader.take(sig_len, "signature")?.to_vec();

        if reader.remaining() != 0 {
            return Err(Error::MalformedProof(format!(
                "{} trailing bytes",
                reader.remaining()
            )));
        }

        Ok(Self {
            value,
            proof_path,
            signed_root,
            signature: QuorumSignature {
                quorum_type,
                quorum_hash,
                round,
                signature,
            },
        })
    }

    /// Encode into the wire layout read by [`Proof::decode`].
    ///
    /// Fails with [`Error::Encoding`] when a length does not fit its wire
    /// field.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let value_len = wire_len::<u32>(self.value.len(), "value")?;
        let branch_count = wire_len::<u16>(self.proof_path.len(), "proof path")?;
        let sig_len = wire_len::<u8>(self.signature.signature.len(), "signature")?;

        let mut out = Vec::with_capacity(self.size_bytes());
        out.extend_from_slice(&PROOF_MAGIC);
        out.push(PROOF_VERSION);
        out.extend_from_slice(&value_len.to_le_bytes());
        out.extend_from_slice(&self.value);
        out.extend_from_slice(&branch_count.to_le_bytes());
        for node in &self.proof_path {
            out.push(node.direction());
            out.extend_from_slice(node.sibling());
        }
        out.extend_from_slice(self.signed_root.as_bytes());
        out.push(self.signature.quorum_type.0);
        out.extend_from_slice(self.signature.quorum_hash.as_bytes());
        out.extend_from_slice(&self.signature.round.to_le_bytes());
        out.push(sig_len);
        out.extend_from_slice(&self.signature.signature);
        Ok(out)
    }

    /// Get the size of this proof in bytes
    pub fn size_bytes(&self) -> usize {
        4 + 1 + 4 + self.value.len() + 2 + self.proof_path.len() * 33 + 32 + 1 + 32 + 4 + 1
            + self.signature.signature.len()
    }

    /// Get the depth of this proof (number of levels in tree)
    pub fn depth(&self) -> usize {
        self.proof_path.len()
    }
}

fn wire_len<T: TryFrom<usize>>(len: usize, what: &str) -> Result<T> {
    T::try_from(len).map_err(|_| {
        Error::Encoding(format!(
            "{} length {} does not fit a {}-byte field",
            what,
            len,
            std::mem::size_of::<T>()
        ))
    })
}

/// Leaf hash of a payload stored under `state_key`
pub fn leaf_hash(state_key: &[u8; 32], value: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[LEAF_TAG]);
    hasher.update(state_key);
    hasher.update(value);
    *hasher.finalize().as_bytes()
}

/// Hash two nodes together
pub fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[NODE_TAG]);
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

/// Bounds-checked cursor over proof bytes
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Error::MalformedProof(format!(
                "truncated {}: need {} bytes at offset {}, have {}",
                what,
                len,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array::<2>(what)?))
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array::<4>(what)?))
    }
}

/// Builder for creating signed proofs (used by nodes and test fixtures)
pub struct ProofBuilder {
    state_key: [u8; 32],
    value: Vec<u8>,
    proof_path: Vec<ProofNode>,
    quorum_type: QuorumType,
    quorum_hash: QuorumHash,
    round: u32,
}

impl ProofBuilder {
    /// Start a proof for `value` stored under `state_key`
    pub fn new(state_key: [u8; 32], value: Vec<u8>) -> Self {
        Self {
            state_key,
            value,
            proof_path: Vec::new(),
            quorum_type: QuorumType::LLMQ_100_67,
            quorum_hash: QuorumHash::new([0u8; 32]),
            round: 0,
        }
    }

    /// Add a left sibling to the proof path
    pub fn add_left_sibling(mut self, hash: [u8; 32]) -> Self {
        self.proof_path.push(ProofNode::Left(hash));
        self
    }

    /// Add a right sibling to the proof path
    pub fn add_right_sibling(mut self, hash: [u8; 32]) -> Self {
        self.proof_path.push(ProofNode::Right(hash));
        self
    }

    pub fn quorum(mut self, quorum_type: QuorumType, quorum_hash: QuorumHash) -> Self {
        self.quorum_type = quorum_type;
        self.quorum_hash = quorum_hash;
        self
    }

    pub fn round(mut self, round: u32) -> Self {
        self.round = round;
        self
    }

    /// Root the current path reduces to
    pub fn root(&self) -> RootHash {
        let leaf = leaf_hash(&self.state_key, &self.value);
        let root = self
            .proof_path
            .iter()
            .fold(leaf, |current, node| node.apply(&current));
        RootHash::new(root)
    }

    /// Sign the root, together with the metadata the node will report,
    /// and build the proof
    pub fn sign(self, keypair: &Keypair, metadata: &ResponseMetadata) -> Proof {
        let root = self.root();
        let digest = signing_digest(
            self.quorum_type,
            &self.quorum_hash,
            self.round,
            metadata,
            &root,
        );
        let signature =
            SECP256K1.sign_schnorr_no_aux_rand(&Message::from_digest(digest), keypair);

        Proof {
            value: self.value,
            proof_path: self.proof_path,
            signed_root: root,
            signature: QuorumSignature {
                quorum_type: self.quorum_type,
                quorum_hash: self.quorum_hash,
                round: self.round,
                signature: signature.serialize().to_vec(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::quorum_keypair;

    fn create_test_proof() -> Proof {
        let (keypair, _) = quorum_keypair(1);
        ProofBuilder::new([9u8; 32], vec![1, 2, 3, 4])
            .add_left_sibling([1u8; 32])
            .add_right_sibling([2u8; 32])
            .quorum(QuorumType::LLMQ_100_67, QuorumHash::new([5u8; 32]))
            .round(2)
            .sign(&keypair, &ResponseMetadata::default())
    }

    #[test]
    fn test_proof_builder() {
        let proof = create_test_proof();
        assert_eq!(proof.depth(), 2);
        assert_eq!(proof.signature.signature.len(), SIGNATURE_LEN);
        assert_eq!(proof.proof_path[0], ProofNode::Left([1u8; 32]));
    }

    #[test]
    fn test_encode_decode() {
        let proof = create_test_proof();
        let bytes = proof.encode().unwrap();

        assert_eq!(bytes.len(), proof.size_bytes());
        assert_eq!(Proof::decode(&bytes, &ProofLimits::default()).unwrap(), proof);
    }

    #[test]
    fn test_encode_rejects_oversized_fields() {
        let mut long_signature = create_test_proof();
        long_signature.signature.signature = vec![0u8; 256];
        assert!(matches!(long_signature.encode(), Err(Error::Encoding(_))));

        let mut deep = create_test_proof();
        deep.proof_path = vec![ProofNode::Left([0u8; 32]); u16::MAX as usize + 1];
        let err = deep.encode().unwrap_err();
        assert!(err.to_string().contains("proof path length 65536"));

        // Lengths that fit still encode; decode enforces the 64-byte rule.
        let mut short_signature = create_test_proof();
        short_signature.signature.signature = vec![0u8; 63];
        let bytes = short_signature.encode().unwrap();
        assert!(Proof::decode(&bytes, &ProofLimits::default()).is_err());
    }

    #[test]
    fn test_decode_rejects_every_truncation() {
        let bytes = create_test_proof().encode().unwrap();
        for len in 0..bytes.len() {
            let err = Proof::decode(&bytes[..len], &ProofLimits::default()).unwrap_err();
            assert!(matches!(err, Error::MalformedProof(_)), "len {}", len);
        }
    }

    #[test]
    fn test_decode_rejects_bad_header_and_trailing_bytes() {
        let bytes = create_test_proof().encode().unwrap();

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert!(matches!(
            Proof::decode(&bad_magic, &ProofLimits::default()),
            Err(Error::MalformedProof(_))
        ));

        let mut bad_version = bytes.clone();
        bad_version[4] = 9;
        assert!(Proof::decode(&bad_version, &ProofLimits::default()).is_err());

        let mut trailing = bytes;
        trailing.push(0);
        assert!(Proof::decode(&trailing, &ProofLimits::default()).is_err());
    }

    #[test]
    fn test_decode_rejects_invalid_direction() {
        let proof = create_test_proof();
        let mut bytes = proof.encode().unwrap();
        // magic + version + value_len + value + branch_count
        let first_direction = 4 + 1 + 4 + proof.value.len() + 2;
        bytes[first_direction] = 7;

        let err = Proof::decode(&bytes, &ProofLimits::default()).unwrap_err();
        assert!(err.to_string().contains("invalid direction 7"));
    }

    #[test]
    fn test_decode_enforces_limits() {
        let bytes = create_test_proof().encode().unwrap();

        let shallow = ProofLimits {
            max_depth: 1,
            ..ProofLimits::default()
        };
        assert!(Proof::decode(&bytes, &shallow).is_err());

        let small = ProofLimits {
            max_value_size: 3,
            ..ProofLimits::default()
        };
        assert!(Proof::decode(&bytes, &small).is_err());
    }

    #[test]
    fn test_hash_pair_is_order_sensitive() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        assert_ne!(hash_pair(&a, &b), hash_pair(&b, &a));
        assert_ne!(leaf_hash(&a, &b), hash_pair(&a, &b));
    }

    #[test]
    fn test_root_follows_path() {
        let leaf = leaf_hash(&[9u8; 32], &[1, 2, 3, 4]);
        let expected = hash_pair(&hash_pair(&[1u8; 32], &leaf), &[2u8; 32]);

        let builder = ProofBuilder::new([9u8; 32], vec![1, 2, 3, 4])
            .add_left_sibling([1u8; 32])
            .add_right_sibling([2u8; 32]);
        assert_eq!(builder.root(), RootHash::new(expected));
    }
}
