use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::calldata::CallStep;
use crate::schema::{Confirmation, SafeTransaction, RFC3339};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Info,
    Warning,
    Danger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressKind {
    Eoa,
    Contract,
}

/// One entry of the user's local address registry. Entries without
/// `chainIds` match every chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressBookEntry {
    pub address: Address,
    pub name: String,
    pub kind: AddressKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_ids: Option<Vec<u64>>,
}

pub fn lookup<'a>(
    registry: &'a [AddressBookEntry],
    address: Address,
    chain_id: u64,
) -> Option<&'a AddressBookEntry> {
    registry.iter().find(|entry| {
        entry.address == address
            && entry
                .chain_ids
                .as_ref()
                .map(|ids| ids.contains(&chain_id))
                .unwrap_or(true)
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetWarning {
    pub severity: Severity,
    pub target: Address,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerWarning {
    pub owner: Address,
    pub message: String,
}

struct TargetCall {
    to: Address,
    value: U256,
    operation: u8,
    has_data: bool,
}

/// Per-call-step target analysis. When no steps decoded, the top-level
/// transaction is analyzed directly.
pub fn analyze_targets(
    steps: &[CallStep],
    tx: &SafeTransaction,
    registry: &[AddressBookEntry],
    chain_id: u64,
    transfer_threshold: U256,
) -> Vec<TargetWarning> {
    let calls: Vec<TargetCall> = if steps.is_empty() {
        vec![TargetCall {
            to: tx.to,
            value: crate::schema::parse_quantity(&tx.value).unwrap_or(U256::ZERO),
            operation: tx.operation,
            has_data: !tx.data.is_empty(),
        }]
    } else {
        steps
            .iter()
            .map(|step| TargetCall {
                to: step.to,
                value: step.value,
                operation: step.operation,
                has_data: !step.raw_data.is_empty(),
            })
            .collect()
    };

    let mut warnings = Vec::new();
    for call in calls {
        let known = lookup(registry, call.to, chain_id);
        if call.operation == 1 {
            warnings.push(match known {
                Some(entry) => TargetWarning {
                    severity: Severity::Info,
                    target: call.to,
                    message: format!("DelegateCall to {}", entry.name),
                },
                None => TargetWarning {
                    severity: Severity::Danger,
                    target: call.to,
                    message: "DelegateCall to unknown contract".to_owned(),
                },
            });
            continue;
        }
        if known.is_some() {
            continue;
        }
        if call.has_data {
            warnings.push(TargetWarning {
                severity: Severity::Warning,
                target: call.to,
                message: "Call with data to unknown contract".to_owned(),
            });
        } else if call.value >= transfer_threshold {
            warnings.push(TargetWarning {
                severity: Severity::Warning,
                target: call.to,
                message: format!("Transfer of {} wei to unknown address", call.value),
            });
        }
    }
    warnings
}

/// Owners the registry does not know about.
pub fn analyze_signers(
    confirmations: &[Confirmation],
    registry: &[AddressBookEntry],
    chain_id: u64,
) -> Vec<SignerWarning> {
    confirmations
        .iter()
        .filter(|confirmation| lookup(registry, confirmation.owner, chain_id).is_none())
        .map(|confirmation| SignerWarning {
            owner: confirmation.owner,
            message: format!("Signer {} is not in the address book", confirmation.owner),
        })
        .collect()
}

/// The owner with the earliest submission timestamp; ties and malformed
/// timestamps resolve to the earlier list position.
pub fn identify_proposer(confirmations: &[Confirmation]) -> Option<Address> {
    confirmations
        .iter()
        .filter(|confirmation| RFC3339.is_match(&confirmation.submission_date))
        .min_by(|a, b| a.submission_date.cmp(&b.submission_date))
        .or_else(|| confirmations.first())
        .map(|confirmation| confirmation.owner)
}
