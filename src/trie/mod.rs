use alloy::primitives::{b256, keccak256, Address, Bytes, B256};
use alloy_rlp::Header;
use thiserror::Error;

/// Root of the empty trie, `keccak256(rlp(""))`.
pub const EMPTY_TRIE_ROOT: B256 =
    b256!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");

/// Extra walk iterations granted on top of the proof length. Inline
/// children consume an iteration without consuming a proof entry, so the
/// bound caps how deep an embedded chain can go.
const INLINE_STEP_ALLOWANCE: usize = 64;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TrieError {
    #[error("empty proof against non-empty trie root {0}")]
    EmptyProofNonEmptyRoot(B256),

    #[error("empty proof can only attest a zero value")]
    EmptyProofNonZeroValue,

    #[error("proof exhausted while walking toward {0}")]
    ProofExhausted(B256),

    #[error("proof node {index} hashes to {actual}, expected {expected}")]
    NodeHashMismatch {
        index: usize,
        actual: B256,
        expected: B256,
    },

    #[error("malformed RLP in proof node: {0}")]
    Rlp(String),

    #[error("trie node has {0} items, expected 2 or 17")]
    BadNodeArity(usize),

    #[error("child reference is {0} bytes, expected 32 or an inline node")]
    BadChildReference(usize),

    #[error("walk exceeded the iteration limit of {0}")]
    StepLimitExceeded(usize),

    #[error("proven value mismatch: expected {expected}, proven {proven}")]
    ValueMismatch { expected: B256, proven: B256 },

    #[error("key is absent from the trie but a non-zero value {0} was expected")]
    MissingNonZeroValue(B256),

    #[error("account is absent from the state trie")]
    AccountMissing,

    #[error("account {field} mismatch: expected 0x{expected}, proven 0x{proven}")]
    AccountFieldMismatch {
        field: &'static str,
        expected: String,
        proven: String,
    },

    #[error("storage leaf value is {0} bytes, expected at most 32")]
    OversizedLeafValue(usize),
}

/// One decoded item of a trie-node list: either a byte string or a nested
/// list kept as its raw encoding (an inline child).
#[derive(Clone, Copy)]
enum NodeItem<'a> {
    Str(&'a [u8]),
    List(&'a [u8]),
}

/// Splits one RLP list into its items without recursing. The node must be
/// exactly one list with no trailing bytes.
fn decode_node_items(buf: &[u8]) -> Result<Vec<NodeItem<'_>>, TrieError> {
    let mut rest = buf;
    let header = Header::decode(&mut rest).map_err(|e| TrieError::Rlp(e.to_string()))?;
    if !header.list {
        return Err(TrieError::Rlp("trie node is not an RLP list".to_owned()));
    }
    if rest.len() != header.payload_length {
        return Err(TrieError::Rlp("trailing bytes after trie node".to_owned()));
    }

    let mut items = Vec::new();
    while !rest.is_empty() {
        let raw = rest;
        let mut peek = rest;
        let item = Header::decode(&mut peek).map_err(|e| TrieError::Rlp(e.to_string()))?;
        let header_len = raw.len() - peek.len();
        let total = header_len + item.payload_length;
        if raw.len() < total {
            return Err(TrieError::Rlp("item length exceeds node payload".to_owned()));
        }
        if item.list {
            items.push(NodeItem::List(&raw[..total]));
        } else {
            items.push(NodeItem::Str(&peek[..item.payload_length]));
        }
        rest = &raw[total..];
    }
    Ok(items)
}

/// Decodes a hex-prefix path into `(is_leaf, nibbles)`.
fn decode_hp(path: &[u8]) -> Result<(bool, Vec<u8>), TrieError> {
    let Some(&first) = path.first() else {
        return Err(TrieError::Rlp("empty hex-prefix path".to_owned()));
    };
    let flag = first >> 4;
    if flag > 3 {
        return Err(TrieError::Rlp(format!("invalid hex-prefix flag {flag}")));
    }
    let leaf = flag >= 2;
    let mut nibbles = Vec::with_capacity(path.len() * 2);
    if flag & 1 == 1 {
        nibbles.push(first & 0x0f);
    }
    for &byte in &path[1..] {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0f);
    }
    Ok((leaf, nibbles))
}

fn key_nibbles(key_hash: B256) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(64);
    for byte in key_hash {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0f);
    }
    nibbles
}

/// What the next walk step resolves against: a hashed reference into the
/// proof array, or an inline node that was embedded in its parent.
enum NextNode {
    Hash(B256),
    Inline(Vec<u8>),
}

pub(crate) enum WalkOutcome {
    /// Leaf (or branch value slot) reached; raw value bytes as stored.
    Found(Vec<u8>),
    /// The walk terminated at an empty child or a diverging path: the key
    /// is provably absent.
    Missing,
}

/// Iterative proof walk. `proof` holds only hash-referenced nodes; inline
/// children are processed in place without consuming an entry.
pub(crate) fn walk(
    root: B256,
    nibbles: &[u8],
    proof: &[Bytes],
) -> Result<WalkOutcome, TrieError> {
    if proof.is_empty() {
        if root == EMPTY_TRIE_ROOT {
            return Ok(WalkOutcome::Missing);
        }
        return Err(TrieError::EmptyProofNonEmptyRoot(root));
    }

    let step_limit = proof.len() + INLINE_STEP_ALLOWANCE;
    let mut next = NextNode::Hash(root);
    let mut proof_index = 0usize;
    let mut cursor = 0usize;

    for _ in 0..step_limit {
        let node_storage;
        let node_bytes: &[u8] = match next {
            NextNode::Hash(expected) => {
                let Some(entry) = proof.get(proof_index) else {
                    return Err(TrieError::ProofExhausted(expected));
                };
                let actual = keccak256(entry);
                if actual != expected {
                    return Err(TrieError::NodeHashMismatch {
                        index: proof_index,
                        actual,
                        expected,
                    });
                }
                proof_index += 1;
                entry.as_ref()
            }
            NextNode::Inline(bytes) => {
                node_storage = bytes;
                &node_storage
            }
        };

        let items = decode_node_items(node_bytes)?;
        match items.len() {
            17 => {
                if cursor == nibbles.len() {
                    return match items.into_iter().nth(16) {
                        Some(NodeItem::Str(value)) if !value.is_empty() => {
                            Ok(WalkOutcome::Found(value.to_vec()))
                        }
                        Some(NodeItem::Str(_)) => Ok(WalkOutcome::Missing),
                        _ => Err(TrieError::Rlp("branch value slot is a list".to_owned())),
                    };
                }
                let nibble = nibbles[cursor] as usize;
                cursor += 1;
                match items.into_iter().nth(nibble) {
                    Some(NodeItem::Str(child)) if child.is_empty() => {
                        return Ok(WalkOutcome::Missing)
                    }
                    Some(NodeItem::Str(child)) if child.len() == 32 => {
                        next = NextNode::Hash(B256::from_slice(child));
                    }
                    Some(NodeItem::Str(child)) => {
                        return Err(TrieError::BadChildReference(child.len()))
                    }
                    Some(NodeItem::List(raw)) => next = NextNode::Inline(raw.to_vec()),
                    None => return Err(TrieError::BadNodeArity(17)),
                }
            }
            2 => {
                let NodeItem::Str(path) = items[0] else {
                    return Err(TrieError::Rlp("short-node path is a list".to_owned()));
                };
                let (leaf, path_nibbles) = decode_hp(path)?;
                let tail = &nibbles[cursor..];
                if leaf {
                    if tail != path_nibbles.as_slice() {
                        return Ok(WalkOutcome::Missing);
                    }
                    return match items[1] {
                        NodeItem::Str(value) => Ok(WalkOutcome::Found(value.to_vec())),
                        NodeItem::List(_) => {
                            Err(TrieError::Rlp("leaf value is a list".to_owned()))
                        }
                    };
                }
                if tail.len() < path_nibbles.len()
                    || &tail[..path_nibbles.len()] != path_nibbles.as_slice()
                {
                    return Ok(WalkOutcome::Missing);
                }
                cursor += path_nibbles.len();
                match items[1] {
                    NodeItem::Str(child) if child.len() == 32 => {
                        next = NextNode::Hash(B256::from_slice(child));
                    }
                    NodeItem::Str(child) => {
                        return Err(TrieError::BadChildReference(child.len()))
                    }
                    NodeItem::List(raw) => next = NextNode::Inline(raw.to_vec()),
                }
            }
            arity => return Err(TrieError::BadNodeArity(arity)),
        }
    }
    Err(TrieError::StepLimitExceeded(step_limit))
}

/// Re-normalizes a proven leaf payload (RLP of the value with leading
/// zeros stripped) to a 32-byte word.
fn decode_leaf_word(raw: &[u8]) -> Result<B256, TrieError> {
    let mut rest = raw;
    let header = Header::decode(&mut rest).map_err(|e| TrieError::Rlp(e.to_string()))?;
    if header.list || rest.len() != header.payload_length {
        return Err(TrieError::Rlp("storage leaf value is not an RLP string".to_owned()));
    }
    if rest.len() > 32 {
        return Err(TrieError::OversizedLeafValue(rest.len()));
    }
    let mut word = [0u8; 32];
    word[32 - rest.len()..].copy_from_slice(rest);
    Ok(B256::from(word))
}

/// Proves that the storage slot `key` holds `expected` (zero-padded word)
/// under `storage_root`. Absence is acceptable only for a zero expectation;
/// an empty proof is acceptable only against the empty-trie root.
pub fn verify_storage_slot(
    storage_root: B256,
    key: B256,
    expected: B256,
    proof: &[Bytes],
) -> Result<(), TrieError> {
    if proof.is_empty() && expected != B256::ZERO {
        return Err(TrieError::EmptyProofNonZeroValue);
    }
    match walk(storage_root, &key_nibbles(keccak256(key)), proof)? {
        WalkOutcome::Found(raw) => {
            let proven = decode_leaf_word(&raw)?;
            if proven == expected {
                Ok(())
            } else {
                Err(TrieError::ValueMismatch { expected, proven })
            }
        }
        WalkOutcome::Missing => {
            if expected == B256::ZERO {
                Ok(())
            } else {
                Err(TrieError::MissingNonZeroValue(expected))
            }
        }
    }
}

/// The four claimed account fields, as parsed from the package.
#[derive(Debug, Clone, Copy)]
pub struct ClaimedAccount {
    pub nonce: alloy::primitives::U256,
    pub balance: alloy::primitives::U256,
    pub storage_hash: B256,
    pub code_hash: B256,
}

/// Proves the account record for `address` under `state_root` and compares
/// it field by field against the claimed values. Accounts never accept
/// non-inclusion.
pub fn verify_account(
    state_root: B256,
    address: Address,
    claimed: &ClaimedAccount,
    proof: &[Bytes],
) -> Result<(), TrieError> {
    let raw = match walk(state_root, &key_nibbles(keccak256(address)), proof)? {
        WalkOutcome::Found(raw) => raw,
        WalkOutcome::Missing => return Err(TrieError::AccountMissing),
    };

    let items = decode_node_items(&raw)?;
    if items.len() != 4 {
        return Err(TrieError::Rlp(format!(
            "account leaf has {} fields, expected 4",
            items.len()
        )));
    }
    let field_bytes = |item: &NodeItem<'_>| -> Result<Vec<u8>, TrieError> {
        match item {
            NodeItem::Str(bytes) => Ok(bytes.to_vec()),
            NodeItem::List(_) => Err(TrieError::Rlp("account field is a list".to_owned())),
        }
    };

    // nonce and balance are big-endian with leading zeros stripped
    let checks: [(&'static str, Vec<u8>, Vec<u8>); 4] = [
        (
            "nonce",
            field_bytes(&items[0])?,
            trimmed_be(claimed.nonce),
        ),
        (
            "balance",
            field_bytes(&items[1])?,
            trimmed_be(claimed.balance),
        ),
        (
            "storageHash",
            field_bytes(&items[2])?,
            claimed.storage_hash.to_vec(),
        ),
        (
            "codeHash",
            field_bytes(&items[3])?,
            claimed.code_hash.to_vec(),
        ),
    ];
    for (field, proven, expected) in checks {
        if proven != expected {
            return Err(TrieError::AccountFieldMismatch {
                field,
                expected: alloy::hex::encode(expected),
                proven: alloy::hex::encode(proven),
            });
        }
    }
    Ok(())
}

fn trimmed_be(value: alloy::primitives::U256) -> Vec<u8> {
    let bytes = value.to_be_bytes::<32>();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(32);
    bytes[first..].to_vec()
}
