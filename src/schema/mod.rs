use alloy::primitives::{Address, Bytes, B256, U256};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

use crate::consensus::ConsensusMode;
use crate::trust::TrustClassification;

pub static HEX_QUANTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:0x[0-9a-f]{1,64}|[0-9]+)$").expect("valid regex"));
pub static HEX_DATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0x(?:[0-9a-fA-F]{2})*$").expect("valid regex"));
pub static HEX_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("valid regex"));
pub static HEX_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("valid regex"));
pub static HEX_SLOT_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0x[0-9a-fA-F]{1,64}$").expect("valid regex"));
pub static RFC3339: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}[Tt]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:[Zz]|[+-]\d{2}:\d{2})$")
        .expect("valid regex")
});

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("failed to parse JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("schema validation failed: {}", .0.join("; "))]
    Schema(Vec<String>),
}

#[derive(Error, Debug)]
pub enum QuantityError {
    #[error("quantity must be a decimal string or 0x-prefixed lowercase hex, got {0:?}")]
    Malformed(String),

    #[error("quantity {0:?} does not fit in 256 bits")]
    Overflow(String),
}

/// Parses the decimal-or-hex quantity form used by `value` and the gas
/// fields. `0X` prefixes, empty hex and uppercase digits are rejected.
pub fn parse_quantity(s: &str) -> Result<U256, QuantityError> {
    if !HEX_QUANTITY.is_match(s) {
        return Err(QuantityError::Malformed(s.to_owned()));
    }
    let (digits, radix) = match s.strip_prefix("0x") {
        Some(hex) => (hex, 16),
        None => (s, 10),
    };
    U256::from_str_radix(digits, radix).map_err(|_| QuantityError::Overflow(s.to_owned()))
}

/// Left-pads a `0x`-hex key or word (compact or canonical) to 32 bytes.
pub fn normalize_word(s: &str) -> Result<B256, String> {
    let digits = s.strip_prefix("0x").ok_or_else(|| format!("missing 0x prefix in {s:?}"))?;
    if digits.is_empty() || digits.len() > 64 {
        return Err(format!("expected 1..64 hex digits, got {} in {s:?}", digits.len()));
    }
    let mut out = [0u8; 32];
    let padded = format!("{digits:0>64}");
    alloy::hex::decode_to_slice(&padded, &mut out)
        .map_err(|e| format!("invalid hex in {s:?}: {e}"))?;
    Ok(B256::from(out))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PackageVersion {
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "1.1")]
    V1_1,
    #[serde(rename = "1.2")]
    V1_2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidencePackage {
    pub version: PackageVersion,
    pub chain_id: u64,
    pub safe_address: Address,
    pub safe_tx_hash: B256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ethereum_tx_hash: Option<B256>,
    pub confirmations_required: u64,
    pub confirmations: Vec<Confirmation>,
    pub transaction: SafeTransaction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_decoded: Option<DecodedCall>,
    pub sources: PackageSources,
    pub packaged_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onchain_policy_proof: Option<OnchainPolicyProof>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation: Option<SimulationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_proof: Option<ConsensusProofSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_contract: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub owner: Address,
    pub signature: Bytes,
    pub submission_date: String,
}

/// The eleven fields that feed the SafeTx struct hash. Quantities stay
/// strings on the wire; constraint violations are collected by `validate`
/// instead of aborting deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeTransaction {
    pub to: Address,
    pub value: String,
    pub data: Bytes,
    pub operation: u8,
    pub safe_tx_gas: String,
    pub base_gas: String,
    pub gas_price: String,
    pub gas_token: Address,
    pub refund_receiver: Address,
    pub nonce: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSources {
    pub safe_api_url: String,
    pub transaction_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedCall {
    pub method: Option<String>,
    #[serde(default)]
    pub parameters: Option<Vec<DecodedParam>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedParam {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_decoded: Option<Vec<InnerTransaction>>,
}

/// One element of a multiSend `transactions` decode. Every field is
/// optional on the wire; the normalizer falls back to the top-level
/// transaction for anything missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InnerTransaction {
    #[serde(default)]
    pub operation: Option<u8>,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub data: Option<Bytes>,
    #[serde(default)]
    pub data_decoded: Option<DecodedCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnchainPolicyProof {
    pub block_number: u64,
    pub state_root: B256,
    pub account_proof: AccountProof,
    pub decoded_policy: DecodedPolicy,
}

/// EIP-1186 shaped account proof. Balance, nonce and storage keys/values
/// may arrive in compact quantity form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountProof {
    pub address: Address,
    pub balance: String,
    pub nonce: String,
    pub code_hash: B256,
    pub storage_hash: B256,
    pub account_proof: Vec<Bytes>,
    pub storage_proof: Vec<StorageProofEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProofEntry {
    pub key: String,
    pub value: String,
    pub proof: Vec<Bytes>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedPolicy {
    pub owners: Vec<Address>,
    pub threshold: u64,
    pub nonce: u64,
    pub modules: Vec<Address>,
    pub guard: Address,
    pub fallback_handler: Address,
    pub singleton: Address,
}

/// Simulation fields are loosely typed on purpose: the structural verifier
/// reports per-field checks instead of aborting the whole parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationRecord {
    pub success: bool,
    #[serde(default)]
    pub return_data: Option<String>,
    pub gas_used: String,
    #[serde(default)]
    pub logs: Vec<SimulationLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_diffs: Option<Vec<StateDiff>>,
    pub block_number: u64,
    #[serde(default)]
    pub block_timestamp: Option<String>,
    #[serde(default)]
    pub trust: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDiff {
    pub address: String,
    pub key: String,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusProofSection {
    pub mode: ConsensusMode,
    #[serde(default)]
    pub checkpoint: Option<String>,
    #[serde(default)]
    pub bootstrap: Option<Value>,
    #[serde(default)]
    pub updates: Option<Value>,
    #[serde(default)]
    pub finality_update: Option<Value>,
    #[serde(default)]
    pub proof_payload: Option<String>,
    pub state_root: B256,
    pub block_number: u64,
}

/// Parses and validates one evidence package. Malformed JSON and typed
/// extraction failures abort; constraint violations are collected in
/// document order and returned together.
pub fn parse_package(input: &[u8]) -> Result<EvidencePackage, PackageError> {
    let raw: Value = serde_json::from_slice(input)?;
    let package: EvidencePackage = serde_json::from_value(raw)
        .map_err(|e| PackageError::Schema(vec![e.to_string()]))?;
    let errors = validate(&package);
    if !errors.is_empty() {
        return Err(PackageError::Schema(errors));
    }
    Ok(package)
}

fn validate(package: &EvidencePackage) -> Vec<String> {
    let mut errors = Vec::new();

    if package.version == PackageVersion::V1_0 {
        for (field, present) in [
            ("onchainPolicyProof", package.onchain_policy_proof.is_some()),
            ("simulation", package.simulation.is_some()),
            ("consensusProof", package.consensus_proof.is_some()),
            ("exportContract", package.export_contract.is_some()),
        ] {
            if present {
                errors.push(format!("{field} requires package version 1.1 or later"));
            }
        }
    }
    if package.consensus_proof.is_some() && package.version < PackageVersion::V1_2 {
        errors.push("consensusProof requires package version 1.2".to_owned());
    }

    let tx = &package.transaction;
    for (field, value) in [
        ("transaction.value", &tx.value),
        ("transaction.safeTxGas", &tx.safe_tx_gas),
        ("transaction.baseGas", &tx.base_gas),
        ("transaction.gasPrice", &tx.gas_price),
    ] {
        if let Err(e) = parse_quantity(value) {
            errors.push(format!("{field}: {e}"));
        }
    }
    if tx.operation > 1 {
        errors.push(format!("transaction.operation must be 0 or 1, got {}", tx.operation));
    }

    if let Some(proof) = &package.onchain_policy_proof {
        let account = &proof.account_proof;
        for (field, value) in [
            ("accountProof.balance", &account.balance),
            ("accountProof.nonce", &account.nonce),
        ] {
            if let Err(e) = parse_quantity(value) {
                errors.push(format!("{field}: {e}"));
            }
        }
        for (i, entry) in account.storage_proof.iter().enumerate() {
            if !HEX_SLOT_KEY.is_match(&entry.key) {
                errors.push(format!(
                    "storageProof[{i}].key must be 0x-hex of at most 32 bytes, got {:?}",
                    entry.key
                ));
            }
            if normalize_word(&entry.value).is_err() {
                errors.push(format!(
                    "storageProof[{i}].value must be 0x-hex of at most 32 bytes, got {:?}",
                    entry.value
                ));
            }
        }
    }

    if let Some(sim) = &package.simulation {
        if let Some(trust) = &sim.trust {
            if TrustClassification::from_str(trust).is_err() {
                errors.push(format!("simulation.trust is not a known trust level: {trust:?}"));
            }
        }
    }

    if let Some(consensus) = &package.consensus_proof {
        if consensus.mode != ConsensusMode::Beacon && consensus.proof_payload.is_none() {
            errors.push(format!(
                "consensusProof.proofPayload is required for mode {}",
                consensus.mode
            ));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{PACKAGE_V1_0, PACKAGE_V1_1, PACKAGE_V1_2};

    #[test]
    fn parses_all_fixture_versions() {
        for (raw, version) in [
            (PACKAGE_V1_0, PackageVersion::V1_0),
            (PACKAGE_V1_1, PackageVersion::V1_1),
            (PACKAGE_V1_2, PackageVersion::V1_2),
        ] {
            let package = parse_package(raw.as_bytes()).unwrap();
            assert_eq!(package.version, version);
            assert_eq!(package.chain_id, 1);
            assert_eq!(package.confirmations.len(), 3);
        }
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            parse_package(b"{not json"),
            Err(PackageError::InvalidJson(_))
        ));
    }

    #[test]
    fn optional_sections_are_version_gated() {
        let mut doc: Value = serde_json::from_str(PACKAGE_V1_1).unwrap();
        doc["version"] = "1.0".into();
        let Err(PackageError::Schema(errors)) =
            parse_package(&serde_json::to_vec(&doc).unwrap())
        else {
            panic!("expected schema errors");
        };
        assert!(errors.iter().any(|e| e.contains("onchainPolicyProof")));
        assert!(errors.iter().any(|e| e.contains("simulation")));
    }

    #[test]
    fn consensus_proof_requires_v1_2() {
        let mut doc: Value = serde_json::from_str(PACKAGE_V1_2).unwrap();
        doc["version"] = "1.1".into();
        let Err(PackageError::Schema(errors)) =
            parse_package(&serde_json::to_vec(&doc).unwrap())
        else {
            panic!("expected schema errors");
        };
        assert!(errors.iter().any(|e| e.contains("version 1.2")));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut doc: Value = serde_json::from_str(PACKAGE_V1_0).unwrap();
        doc["version"] = "2.0".into();
        assert!(parse_package(&serde_json::to_vec(&doc).unwrap()).is_err());
    }

    #[test]
    fn quantity_parsing() {
        assert_eq!(parse_quantity("0").unwrap(), U256::ZERO);
        assert_eq!(parse_quantity("1000").unwrap(), U256::from(1000u64));
        assert_eq!(parse_quantity("0x2af8").unwrap(), U256::from(0x2af8u64));
        assert!(parse_quantity("0X2AF8").is_err());
        assert!(parse_quantity("0x").is_err());
        assert!(parse_quantity("0x2AF8").is_err());
        assert!(parse_quantity("").is_err());
        assert!(parse_quantity("12f").is_err());
    }

    #[test]
    fn word_normalization_pads_compact_keys() {
        let canonical = normalize_word(
            "0x0000000000000000000000000000000000000000000000000000000000000004",
        )
        .unwrap();
        assert_eq!(normalize_word("0x4").unwrap(), canonical);
        assert_eq!(normalize_word("0x04").unwrap(), canonical);
        assert!(normalize_word("0x").is_err());
        assert!(normalize_word("4").is_err());
        let over = format!("0x{}", "0".repeat(65));
        assert!(normalize_word(&over).is_err());
    }

    #[test]
    fn malformed_transaction_quantities_are_collected() {
        let mut doc: Value = serde_json::from_str(PACKAGE_V1_0).unwrap();
        doc["transaction"]["value"] = "0Xbad".into();
        doc["transaction"]["gasPrice"] = "wat".into();
        let Err(PackageError::Schema(errors)) =
            parse_package(&serde_json::to_vec(&doc).unwrap())
        else {
            panic!("expected schema errors");
        };
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("transaction.value"));
        assert!(errors[1].contains("transaction.gasPrice"));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut doc: Value = serde_json::from_str(PACKAGE_V1_0).unwrap();
        doc["futureField"] = serde_json::json!({"nested": true});
        assert!(parse_package(&serde_json::to_vec(&doc).unwrap()).is_ok());
    }
}
