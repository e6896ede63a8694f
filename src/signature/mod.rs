use alloy::primitives::{keccak256, Address, PrimitiveSignature, B256, U256};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::schema::Confirmation;

/// Prefix legacy wallets prepend before signing a 32-byte digest.
const ETH_SIGN_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureScheme {
    Eip712,
    EthSign,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum SignatureVerdict {
    Valid {
        recovered: Address,
        scheme: SignatureScheme,
    },
    Invalid {
        recovered: Address,
    },
    Unsupported {
        reason: String,
    },
}

impl SignatureVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationCheck {
    pub owner: Address,
    pub submission_date: String,
    #[serde(flatten)]
    pub verdict: SignatureVerdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignatureSummary {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub unsupported: usize,
}

impl SignatureSummary {
    pub fn all_valid(&self) -> bool {
        self.valid == self.total
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureReport {
    pub list: Vec<ConfirmationCheck>,
    pub by_owner: BTreeMap<Address, SignatureVerdict>,
    pub summary: SignatureSummary,
}

/// Checks one 65-byte owner signature against the *recomputed* transaction
/// hash. Recovery failures are surfaced as `unsupported`, never propagated:
/// a bad signature is adversarial input, not a programmer error.
pub fn verify_signature(safe_tx_hash: B256, owner: Address, signature: &[u8]) -> SignatureVerdict {
    if signature.len() != 65 {
        return SignatureVerdict::Unsupported {
            reason: format!("signature must be 65 bytes, got {}", signature.len()),
        };
    }

    let v = signature[64];
    let (digest, parity, scheme) = match v {
        0 => {
            return SignatureVerdict::Unsupported {
                reason: "Contract signature".to_owned(),
            }
        }
        1 => {
            return SignatureVerdict::Unsupported {
                reason: "Pre-approved hash".to_owned(),
            }
        }
        27 | 28 => (safe_tx_hash, v == 28, SignatureScheme::Eip712),
        // eth_sign wrapping: digest is prefixed, recovery byte shifted by 4
        31 | 32 => {
            let mut prefixed = Vec::with_capacity(ETH_SIGN_PREFIX.len() + 32);
            prefixed.extend_from_slice(ETH_SIGN_PREFIX);
            prefixed.extend_from_slice(safe_tx_hash.as_slice());
            (keccak256(&prefixed), v == 32, SignatureScheme::EthSign)
        }
        other => {
            return SignatureVerdict::Unsupported {
                reason: format!("unsupported recovery byte {other}"),
            }
        }
    };

    let r = U256::from_be_slice(&signature[..32]);
    let s = U256::from_be_slice(&signature[32..64]);
    match PrimitiveSignature::new(r, s, parity).recover_address_from_prehash(&digest) {
        Ok(recovered) if recovered == owner => SignatureVerdict::Valid { recovered, scheme },
        Ok(recovered) => SignatureVerdict::Invalid { recovered },
        Err(e) => SignatureVerdict::Unsupported {
            reason: format!("signature recovery failed: {e}"),
        },
    }
}

/// Checks the whole confirmation list. Items are independent; output order
/// matches input order.
pub fn verify_confirmations(safe_tx_hash: B256, confirmations: &[Confirmation]) -> SignatureReport {
    let list: Vec<ConfirmationCheck> = confirmations
        .iter()
        .map(|confirmation| ConfirmationCheck {
            owner: confirmation.owner,
            submission_date: confirmation.submission_date.clone(),
            verdict: verify_signature(safe_tx_hash, confirmation.owner, &confirmation.signature),
        })
        .collect();

    let mut by_owner = BTreeMap::new();
    let mut summary = SignatureSummary {
        total: list.len(),
        valid: 0,
        invalid: 0,
        unsupported: 0,
    };
    for check in &list {
        match &check.verdict {
            SignatureVerdict::Valid { .. } => summary.valid += 1,
            SignatureVerdict::Invalid { .. } => summary.invalid += 1,
            SignatureVerdict::Unsupported { .. } => summary.unsupported += 1,
        }
        by_owner.entry(check.owner).or_insert_with(|| check.verdict.clone());
    }

    SignatureReport {
        list,
        by_owner,
        summary,
    }
}
