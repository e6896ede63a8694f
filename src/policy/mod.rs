use alloy::primitives::{address, b256, keccak256, Address, B256, U256};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::schema::{
    normalize_word, parse_quantity, ConsensusProofSection, OnchainPolicyProof, StorageProofEntry,
};
use crate::trie::{verify_account, verify_storage_slot, ClaimedAccount};

/// Safe storage layout, stable since v0.1.0.
pub const SINGLETON_SLOT: u64 = 0;
pub const MODULES_MAPPING_SLOT: u64 = 1;
pub const OWNERS_MAPPING_SLOT: u64 = 2;
pub const OWNER_COUNT_SLOT: u64 = 3;
pub const THRESHOLD_SLOT: u64 = 4;
pub const NONCE_SLOT: u64 = 5;

/// keccak256("guard_manager.guard.address")
pub const GUARD_STORAGE_SLOT: B256 =
    b256!("4a204f620c8c5ccdca3fd54d003badd85ba500436a431f0cbda4f558c93c34c8");
/// keccak256("fallback_manager.handler.address")
pub const FALLBACK_HANDLER_STORAGE_SLOT: B256 =
    b256!("6c9a6c4a39284e37ed1cf53d337577d14212a4870fb976a4366c693b939918d5");

pub const SENTINEL: Address = address!("0000000000000000000000000000000000000001");

/// Storage slot of `mapping(address => address)` entry `key` at `slot`:
/// `keccak256(abi.encode(key, slot))`.
pub fn mapping_slot(key: Address, slot: u64) -> B256 {
    let mut buf = [0u8; 64];
    buf[12..32].copy_from_slice(key.as_slice());
    buf[32..].copy_from_slice(&U256::from(slot).to_be_bytes::<32>());
    keccak256(buf)
}

fn word_to_address(word: B256) -> Address {
    Address::from_slice(&word[12..])
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCheck {
    pub id: &'static str,
    pub label: &'static str,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PolicyCheck {
    fn passed(id: &'static str, label: &'static str) -> Self {
        Self {
            id,
            label,
            passed: true,
            detail: None,
        }
    }

    fn failed(id: &'static str, label: &'static str, detail: String) -> Self {
        Self {
            id,
            label,
            passed: false,
            detail: Some(detail),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyProofReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub checks: Vec<PolicyCheck>,
}

impl PolicyProofReport {
    pub fn check(&self, id: &str) -> Option<&PolicyCheck> {
        self.checks.iter().find(|check| check.id == id)
    }
}

/// Index of storage proofs by normalized 32-byte slot key. Each proof is
/// Merkle-verified on first use against the account's storage hash.
struct SlotProofs<'a> {
    storage_hash: B256,
    by_slot: HashMap<B256, &'a StorageProofEntry>,
}

impl<'a> SlotProofs<'a> {
    fn index(storage_hash: B256, entries: &'a [StorageProofEntry]) -> Self {
        let mut by_slot = HashMap::with_capacity(entries.len());
        for entry in entries {
            match normalize_word(&entry.key) {
                Ok(slot) => {
                    by_slot.entry(slot).or_insert(entry);
                }
                Err(e) => debug!(key = %entry.key, error = %e, "skipping unparseable storage key"),
            }
        }
        Self {
            storage_hash,
            by_slot,
        }
    }

    /// Returns the proven 32-byte word at `slot`, or a human-readable
    /// failure.
    fn proven_word(&self, slot: B256) -> Result<B256, String> {
        let entry = self
            .by_slot
            .get(&slot)
            .ok_or_else(|| format!("no storage proof supplied for slot {slot}"))?;
        let claimed =
            normalize_word(&entry.value).map_err(|e| format!("unparseable value: {e}"))?;
        verify_storage_slot(self.storage_hash, slot, claimed, &entry.proof)
            .map_err(|e| format!("storage proof for slot {slot} failed: {e}"))?;
        Ok(claimed)
    }
}

/// Verifies an on-chain policy proof end to end: account inclusion, every
/// referenced storage slot, the decoded-policy fields, both sentinel
/// linked lists, and the package cross-checks. Checks are never skipped
/// silently; each failure carries its own detail.
pub fn verify_policy_proof(
    proof: &OnchainPolicyProof,
    safe_address: Address,
    confirmations_required: u64,
    consensus: Option<&ConsensusProofSection>,
) -> PolicyProofReport {
    let mut errors = Vec::new();
    let mut checks = Vec::new();
    let account = &proof.account_proof;

    // Defense in depth: the trie path below is derived from the expected
    // multisig address, so a mismatched proof would fail anyway, but this
    // turns a confusing hash mismatch into a clear error.
    if account.address != safe_address {
        errors.push(format!(
            "account proof is for {}, package is for {}",
            account.address, safe_address
        ));
        return PolicyProofReport {
            valid: false,
            errors,
            checks,
        };
    }

    checks.push(account_check(proof, safe_address));

    let slots = SlotProofs::index(account.storage_hash, &account.storage_proof);
    let policy = &proof.decoded_policy;

    checks.push(address_slot_check(
        "singleton",
        "Singleton matches slot 0",
        &slots,
        B256::with_last_byte(SINGLETON_SLOT as u8),
        policy.singleton,
    ));
    checks.push(uint_slot_check(
        "threshold",
        "Threshold matches slot 4",
        &slots,
        B256::with_last_byte(THRESHOLD_SLOT as u8),
        U256::from(policy.threshold),
    ));
    checks.push(uint_slot_check(
        "nonce",
        "Nonce matches slot 5",
        &slots,
        B256::with_last_byte(NONCE_SLOT as u8),
        U256::from(policy.nonce),
    ));
    checks.push(uint_slot_check(
        "owner-count",
        "Owner count matches slot 3",
        &slots,
        B256::with_last_byte(OWNER_COUNT_SLOT as u8),
        U256::from(policy.owners.len() as u64),
    ));
    checks.push(address_slot_check(
        "guard",
        "Guard matches its storage slot",
        &slots,
        GUARD_STORAGE_SLOT,
        policy.guard,
    ));
    checks.push(address_slot_check(
        "fallback-handler",
        "Fallback handler matches its storage slot",
        &slots,
        FALLBACK_HANDLER_STORAGE_SLOT,
        policy.fallback_handler,
    ));
    checks.push(linked_list_check(
        "owners-linked-list",
        "Owner sentinel list matches the claimed owners",
        &slots,
        OWNERS_MAPPING_SLOT,
        &policy.owners,
    ));
    checks.push(linked_list_check(
        "modules-linked-list",
        "Module sentinel list matches the claimed modules",
        &slots,
        MODULES_MAPPING_SLOT,
        &policy.modules,
    ));

    // Cross-check against the package: a valid proof that contradicts the
    // declared confirmation requirement must not upgrade trust. This reads
    // the proven slot, not the decoded field.
    let cross_id = "threshold-vs-confirmations";
    let cross_label = "Declared confirmationsRequired equals the proven threshold";
    checks.push(
        match slots.proven_word(B256::with_last_byte(THRESHOLD_SLOT as u8)) {
            Ok(word) => {
                let proven = U256::from_be_bytes(word.0);
                if proven == U256::from(confirmations_required) {
                    PolicyCheck::passed(cross_id, cross_label)
                } else {
                    PolicyCheck::failed(
                        cross_id,
                        cross_label,
                        format!("package declares {confirmations_required}, proof shows {proven}"),
                    )
                }
            }
            Err(detail) => PolicyCheck::failed(cross_id, cross_label, detail),
        },
    );

    if let Some(consensus) = consensus {
        let aligned = consensus.state_root == proof.state_root
            && consensus.block_number == proof.block_number;
        checks.push(if aligned {
            PolicyCheck::passed(
                "consensus-proof-alignment",
                "Consensus proof attests the same state root and block",
            )
        } else {
            PolicyCheck::failed(
                "consensus-proof-alignment",
                "Consensus proof attests the same state root and block",
                format!(
                    "policy proof at block {} root {}, consensus proof at block {} root {}",
                    proof.block_number,
                    proof.state_root,
                    consensus.block_number,
                    consensus.state_root
                ),
            )
        });
    }

    let valid = errors.is_empty() && checks.iter().all(|check| check.passed);
    PolicyProofReport {
        valid,
        errors,
        checks,
    }
}

fn account_check(proof: &OnchainPolicyProof, safe_address: Address) -> PolicyCheck {
    let account = &proof.account_proof;
    let id = "account-proof";
    let label = "Account is included in the state trie";
    let claimed = match (parse_quantity(&account.nonce), parse_quantity(&account.balance)) {
        (Ok(nonce), Ok(balance)) => ClaimedAccount {
            nonce,
            balance,
            storage_hash: account.storage_hash,
            code_hash: account.code_hash,
        },
        (Err(e), _) | (_, Err(e)) => {
            return PolicyCheck::failed(id, label, format!("unparseable account field: {e}"))
        }
    };
    match verify_account(proof.state_root, safe_address, &claimed, &account.account_proof) {
        Ok(()) => PolicyCheck::passed(id, label),
        Err(e) => PolicyCheck::failed(id, label, e.to_string()),
    }
}

fn address_slot_check(
    id: &'static str,
    label: &'static str,
    slots: &SlotProofs<'_>,
    slot: B256,
    expected: Address,
) -> PolicyCheck {
    match slots.proven_word(slot) {
        Ok(word) => {
            let proven = word_to_address(word);
            if proven == expected {
                PolicyCheck::passed(id, label)
            } else {
                PolicyCheck::failed(
                    id,
                    label,
                    format!("decoded policy claims {expected}, storage proves {proven}"),
                )
            }
        }
        Err(detail) => PolicyCheck::failed(id, label, detail),
    }
}

fn uint_slot_check(
    id: &'static str,
    label: &'static str,
    slots: &SlotProofs<'_>,
    slot: B256,
    expected: U256,
) -> PolicyCheck {
    match slots.proven_word(slot) {
        Ok(word) => {
            let proven = U256::from_be_bytes(word.0);
            if proven == expected {
                PolicyCheck::passed(id, label)
            } else {
                PolicyCheck::failed(
                    id,
                    label,
                    format!("decoded policy claims {expected}, storage proves {proven}"),
                )
            }
        }
        Err(detail) => PolicyCheck::failed(id, label, detail),
    }
}

/// Walks `SENTINEL -> claimed[0] -> ... -> SENTINEL` through the proven
/// mapping slots. The empty list accepts both `SENTINEL -> SENTINEL` and
/// `SENTINEL -> 0` (uninitialized storage reads as zero).
fn linked_list_check(
    id: &'static str,
    label: &'static str,
    slots: &SlotProofs<'_>,
    mapping_base: u64,
    claimed: &[Address],
) -> PolicyCheck {
    if claimed.is_empty() {
        return match slots.proven_word(mapping_slot(SENTINEL, mapping_base)) {
            Ok(word) => {
                let next = word_to_address(word);
                if next == SENTINEL || next == Address::ZERO {
                    PolicyCheck::passed(id, label)
                } else {
                    PolicyCheck::failed(
                        id,
                        label,
                        format!("list is claimed empty but sentinel points to {next}"),
                    )
                }
            }
            Err(detail) => PolicyCheck::failed(id, label, detail),
        };
    }

    let mut current = SENTINEL;
    for (hop, expected) in claimed
        .iter()
        .copied()
        .chain(std::iter::once(SENTINEL))
        .enumerate()
    {
        match slots.proven_word(mapping_slot(current, mapping_base)) {
            Ok(word) => {
                let next = word_to_address(word);
                if next != expected {
                    return PolicyCheck::failed(
                        id,
                        label,
                        format!("hop {hop}: {current} points to {next}, expected {expected}"),
                    );
                }
                current = expected;
            }
            Err(detail) => {
                return PolicyCheck::failed(id, label, format!("hop {hop}: {detail}"))
            }
        }
    }
    PolicyCheck::passed(id, label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{fixture_package_v1_2, fixture_policy_proof};

    const BASE_CHECK_IDS: [&str; 10] = [
        "account-proof",
        "singleton",
        "threshold",
        "nonce",
        "owner-count",
        "guard",
        "fallback-handler",
        "owners-linked-list",
        "modules-linked-list",
        "threshold-vs-confirmations",
    ];

    #[test]
    fn mapping_slot_derivation_matches_solidity() {
        // keccak256(abi.encode(address(1), uint256(1))) for the modules map
        assert_eq!(
            mapping_slot(SENTINEL, MODULES_MAPPING_SLOT),
            b256!("cc69885fda6bcc1a4ace058b4a62bf5e179ea78fd58a1ccd71c22cc9b688792f")
        );
        assert_eq!(
            mapping_slot(SENTINEL, OWNERS_MAPPING_SLOT),
            b256!("e90b7bceb6e7df5418fb78d8ee546e97c83a08bbccc01a0644d599ccd2a7c2e0")
        );
    }

    #[test]
    fn fixture_proof_passes_all_ten_checks() {
        let proof = fixture_policy_proof();
        let report = verify_policy_proof(&proof, proof.account_proof.address, 2, None);
        assert!(report.valid, "errors: {:?}, checks: {:?}", report.errors, report.checks);
        assert_eq!(report.checks.len(), 10);
        for (check, id) in report.checks.iter().zip(BASE_CHECK_IDS) {
            assert_eq!(check.id, id);
            assert!(check.passed, "{id}: {:?}", check.detail);
        }
    }

    #[test]
    fn mismatched_account_address_rejects_immediately() {
        let proof = fixture_policy_proof();
        let other = address!("00000000000000000000000000000000000000ee");
        let report = verify_policy_proof(&proof, other, 2, None);
        assert!(!report.valid);
        assert!(report.errors[0].contains("account proof is for"));
        assert!(report.checks.is_empty());
    }

    #[test]
    fn tampered_threshold_fails_its_check() {
        let mut proof = fixture_policy_proof();
        proof.decoded_policy.threshold = 3;
        let report = verify_policy_proof(&proof, proof.account_proof.address, 3, None);
        assert!(!report.valid);
        assert!(!report.check("threshold").unwrap().passed);
        // the storage slot still proves 2, so the tampered confirmation
        // count fails the cross-check as well
        assert!(!report.check("threshold-vs-confirmations").unwrap().passed);
        assert!(report.check("owner-count").unwrap().passed);
    }

    #[test]
    fn truncated_owner_list_fails_count_and_chain() {
        let mut proof = fixture_policy_proof();
        proof.decoded_policy.owners.pop();
        let report = verify_policy_proof(&proof, proof.account_proof.address, 2, None);
        assert!(!report.valid);
        assert!(!report.check("owner-count").unwrap().passed);
        assert!(!report.check("owners-linked-list").unwrap().passed);
    }

    #[test]
    fn reordered_owner_list_fails_the_chain() {
        let mut proof = fixture_policy_proof();
        proof.decoded_policy.owners.swap(0, 2);
        let report = verify_policy_proof(&proof, proof.account_proof.address, 2, None);
        assert!(!report.check("owners-linked-list").unwrap().passed);
        assert!(report.check("owner-count").unwrap().passed);
    }

    #[test]
    fn compact_slot_keys_verify_like_canonical_ones() {
        let mut proof = fixture_policy_proof();
        for entry in &mut proof.account_proof.storage_proof {
            let canonical = normalize_word(&entry.key).unwrap();
            let compact = alloy::hex::encode(canonical.as_slice());
            let compact = compact.trim_start_matches('0');
            if !compact.is_empty() {
                entry.key = format!("0x{compact}");
            }
        }
        let report = verify_policy_proof(&proof, proof.account_proof.address, 2, None);
        assert!(report.valid, "{:?}", report.checks);
    }

    #[test]
    fn missing_storage_proof_is_named_in_the_detail() {
        let mut proof = fixture_policy_proof();
        let threshold_slot = B256::with_last_byte(4);
        proof
            .account_proof
            .storage_proof
            .retain(|entry| normalize_word(&entry.key).unwrap() != threshold_slot);
        let report = verify_policy_proof(&proof, proof.account_proof.address, 2, None);
        let check = report.check("threshold").unwrap();
        assert!(!check.passed);
        assert!(check.detail.as_ref().unwrap().contains("no storage proof"));
    }

    #[test]
    fn confirmations_mismatch_fails_the_cross_check() {
        let proof = fixture_policy_proof();
        let report = verify_policy_proof(&proof, proof.account_proof.address, 1, None);
        assert!(!report.valid);
        let check = report.check("threshold-vs-confirmations").unwrap();
        assert!(!check.passed);
        assert!(check.detail.as_ref().unwrap().contains("declares 1"));
        // every cryptographic check still passed
        assert!(report.check("account-proof").unwrap().passed);
        assert!(report.check("threshold").unwrap().passed);
    }

    #[test]
    fn consensus_alignment_is_checked_when_present() {
        let package = fixture_package_v1_2();
        let proof = package.onchain_policy_proof.unwrap();
        let consensus = package.consensus_proof.unwrap();

        let report = verify_policy_proof(&proof, proof.account_proof.address, 2, Some(&consensus));
        assert!(report.valid);
        assert_eq!(report.checks.len(), 11);
        assert!(report.check("consensus-proof-alignment").unwrap().passed);

        let mut skewed = consensus.clone();
        skewed.block_number += 1;
        let report = verify_policy_proof(&proof, proof.account_proof.address, 2, Some(&skewed));
        assert!(!report.valid);
        assert!(!report.check("consensus-proof-alignment").unwrap().passed);
    }
}
