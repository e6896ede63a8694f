//! Offline verification of multisig evidence packages.
//!
//! One self-contained JSON document in, one [`VerificationReport`] out.
//! Nothing here touches the network: the transaction hash is recomputed
//! from the raw fields, signatures are recovered against that recomputed
//! hash, the on-chain policy is checked against Merkle-Patricia proofs,
//! calldata is re-encoded byte for byte, and every claim that cannot be
//! derived locally is downgraded in trust instead of believed.

use alloy::primitives::U256;
use std::sync::Arc;
use tracing::debug;

pub mod calldata;
pub mod consensus;
pub mod hash;
pub mod policy;
pub mod report;
pub mod schema;
pub mod signature;
pub mod simulation;
pub mod trie;
pub mod trust;
pub mod warnings;

#[cfg(test)]
pub(crate) mod test_utils;

pub use report::VerificationReport;
pub use schema::{EvidencePackage, PackageError};

use calldata::CalldataCheck;
use consensus::{ConsensusOutcome, ConsensusVerifier};
use trust::ClassifierInput;
use warnings::AddressBookEntry;

/// Host-supplied settings: the local address registry and the pure-value
/// transfer threshold below which no warning is raised.
#[derive(Debug, Clone)]
pub struct VerifierSettings {
    pub address_book: Vec<AddressBookEntry>,
    pub transfer_warning_threshold: U256,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            address_book: Vec::new(),
            // 0.1 ether
            transfer_warning_threshold: U256::from(100_000_000_000_000_000u64),
        }
    }
}

#[derive(Clone, Default)]
pub struct VerifyOptions {
    pub settings: Option<VerifierSettings>,
    pub consensus_verifier: Option<Arc<dyn ConsensusVerifier>>,
    pub consensus_disabled: bool,
}

/// Verifies one evidence package. Input errors abort with the collected
/// list; section failures are recorded on the report and sibling sections
/// still run.
pub async fn verify(input: &[u8], opts: &VerifyOptions) -> Result<VerificationReport, PackageError> {
    let package = schema::parse_package(input)?;
    debug!(
        chain_id = package.chain_id,
        safe = %package.safe_address,
        nonce = package.transaction.nonce,
        "verifying evidence package"
    );

    let hash_details =
        hash::compute_hash_details(package.chain_id, package.safe_address, &package.transaction)
            .map_err(|e| PackageError::Schema(vec![e.to_string()]))?;
    // comparison is on lowercase hex; B256 equality is exactly that
    let hash_match = hash_details.safe_tx_hash == package.safe_tx_hash;
    if !hash_match {
        debug!(
            declared = %package.safe_tx_hash,
            recomputed = %hash_details.safe_tx_hash,
            "declared safeTxHash does not match"
        );
    }

    // signatures check against the recomputed hash, so a tampered declared
    // hash cannot hide a mismatch
    let signatures = signature::verify_confirmations(hash_details.safe_tx_hash, &package.confirmations);

    let policy_proof = package.onchain_policy_proof.as_ref().map(|proof| {
        policy::verify_policy_proof(
            proof,
            package.safe_address,
            package.confirmations_required,
            package.consensus_proof.as_ref(),
        )
    });

    let steps = calldata::normalize_call_steps(&package.transaction, package.data_decoded.as_ref());
    let calldata_checks: Vec<CalldataCheck> = steps.iter().map(calldata::verify_call_step).collect();
    let calldata_verified = calldata_checks
        .iter()
        .filter(|check| **check == CalldataCheck::Verified)
        .count();

    let simulation_verification = package.simulation.as_ref().map(simulation::verify_simulation);

    let settings = opts.settings.as_ref();
    let default_settings = VerifierSettings::default();
    let effective = settings.unwrap_or(&default_settings);
    let target_warnings = warnings::analyze_targets(
        &steps,
        &package.transaction,
        &effective.address_book,
        package.chain_id,
        effective.transfer_warning_threshold,
    );
    let signer_warnings = warnings::analyze_signers(
        &package.confirmations,
        &effective.address_book,
        package.chain_id,
    );
    let proposer = warnings::identify_proposer(&package.confirmations);

    let consensus_outcome = match &package.consensus_proof {
        None => None,
        Some(proof) => {
            let outcome = if opts.consensus_disabled {
                ConsensusOutcome::DisabledByFlag
            } else {
                match &opts.consensus_verifier {
                    None => ConsensusOutcome::NoVerifier,
                    Some(verifier) => {
                        let request =
                            consensus::build_request(proof, package.chain_id, &package.packaged_at);
                        match verifier.verify(request).await {
                            Ok(response) => ConsensusOutcome::Response(response),
                            Err(e) => ConsensusOutcome::Unavailable(e.to_string()),
                        }
                    }
                }
            };
            Some(consensus::evaluate_outcome(proof, outcome))
        }
    };
    let (consensus_trust, consensus_trust_decision_reason) = match consensus_outcome {
        Some((trust, reason)) => (Some(trust), reason),
        None => (None, None),
    };

    let sources = trust::classify_sources(&ClassifierInput {
        hash_match,
        signatures_total: signatures.summary.total,
        signatures_valid: signatures.summary.valid,
        policy_proof_valid: policy_proof.as_ref().map(|report| report.valid),
        has_decoded_data: package.data_decoded.is_some(),
        calldata_steps: steps.len(),
        calldata_verified,
        simulation_valid: simulation_verification.as_ref().map(|sim| sim.valid),
        consensus: consensus_trust,
        worst_target_severity: target_warnings.iter().map(|warning| warning.severity).max(),
        target_warning_count: target_warnings.len(),
        signer_warning_count: signer_warnings.len(),
        has_settings: settings.is_some(),
    });

    Ok(VerificationReport {
        hash_details,
        hash_match,
        proposer,
        signatures,
        policy_proof,
        simulation_verification,
        target_warnings,
        signer_warnings,
        sources,
        consensus_trust_decision_reason,
    })
}
