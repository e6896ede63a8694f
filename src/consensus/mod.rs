use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::warn;

use crate::schema::ConsensusProofSection;
use crate::trust::{TrustClassification, TrustDecisionReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusMode {
    Beacon,
    Opstack,
    Linea,
}

impl fmt::Display for ConsensusMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Beacon => "beacon",
            Self::Opstack => "opstack",
            Self::Linea => "linea",
        })
    }
}

/// Request handed to the external light-client verifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusVerificationRequest {
    pub mode: ConsensusMode,
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updates: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finality_update: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_payload: Option<String>,
    pub expected_state_root: alloy::primitives::B256,
    pub package_chain_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_packaged_at: Option<String>,
}

/// Response wire shape, field names as the verifier emits them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusVerificationResponse {
    pub valid: bool,
    #[serde(default)]
    pub verified_state_root: Option<alloy::primitives::B256>,
    #[serde(default)]
    pub verified_block_number: Option<u64>,
    pub state_root_matches: bool,
    #[serde(default)]
    pub sync_committee_participants: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub checks: Vec<ConsensusCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusCheck {
    pub id: String,
    pub label: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Seam for the host to delegate BLS/sync-committee verification. The core
/// never verifies consensus payloads itself; it only awaits this call, and
/// dropping the future cancels it.
#[async_trait]
pub trait ConsensusVerifier: Send + Sync {
    async fn verify(
        &self,
        request: ConsensusVerificationRequest,
    ) -> eyre::Result<ConsensusVerificationResponse>;
}

pub fn build_request(
    proof: &ConsensusProofSection,
    chain_id: u64,
    packaged_at: &str,
) -> ConsensusVerificationRequest {
    ConsensusVerificationRequest {
        mode: proof.mode,
        network: match chain_id {
            1 => "mainnet".to_owned(),
            other => other.to_string(),
        },
        checkpoint: proof.checkpoint.clone(),
        bootstrap: proof.bootstrap.clone(),
        updates: proof.updates.clone(),
        finality_update: proof.finality_update.clone(),
        proof_payload: proof.proof_payload.clone(),
        expected_state_root: proof.state_root,
        package_chain_id: chain_id,
        package_packaged_at: Some(packaged_at.to_owned()),
    }
}

/// How the delegated call went, before trust evaluation.
pub enum ConsensusOutcome {
    DisabledByFlag,
    NoVerifier,
    Unavailable(String),
    Response(ConsensusVerificationResponse),
}

/// Folds the delegated outcome into a trust level and, when the section
/// could not be upgraded, a machine-readable reason.
pub fn evaluate_outcome(
    proof: &ConsensusProofSection,
    outcome: ConsensusOutcome,
) -> (TrustClassification, Option<TrustDecisionReason>) {
    let response = match outcome {
        ConsensusOutcome::DisabledByFlag => {
            return (
                TrustClassification::RpcSourced,
                Some(TrustDecisionReason::VerifierDisabledByFlag),
            )
        }
        ConsensusOutcome::NoVerifier => {
            return (
                TrustClassification::RpcSourced,
                Some(TrustDecisionReason::VerifierPending),
            )
        }
        ConsensusOutcome::Unavailable(error) => {
            warn!(%error, "consensus verifier unavailable");
            return (
                TrustClassification::RpcSourced,
                Some(TrustDecisionReason::VerifierUnavailable),
            );
        }
        ConsensusOutcome::Response(response) => response,
    };

    if !response.valid {
        let reason = response
            .error_code
            .as_deref()
            .map(|code| code.parse().unwrap_or(TrustDecisionReason::VerifierError))
            .unwrap_or(TrustDecisionReason::VerifierError);
        return (TrustClassification::RpcSourced, Some(reason));
    }

    let root_matches = response.state_root_matches
        && response
            .verified_state_root
            .map(|root| root == proof.state_root)
            .unwrap_or(true);
    if !root_matches {
        return (
            TrustClassification::RpcSourced,
            Some(TrustDecisionReason::StateRootMismatch),
        );
    }

    if let Some(block_number) = response.verified_block_number {
        if block_number != proof.block_number {
            return (
                TrustClassification::RpcSourced,
                Some(TrustDecisionReason::BlockNumberMismatch),
            );
        }
    }

    (TrustClassification::ConsensusVerified(Some(proof.mode)), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixture_package_v1_2;

    fn success_response(proof: &ConsensusProofSection) -> ConsensusVerificationResponse {
        ConsensusVerificationResponse {
            valid: true,
            verified_state_root: Some(proof.state_root),
            verified_block_number: Some(proof.block_number),
            state_root_matches: true,
            sync_committee_participants: Some(432),
            error: None,
            error_code: None,
            checks: vec![],
        }
    }

    fn fixture_proof() -> ConsensusProofSection {
        fixture_package_v1_2().consensus_proof.unwrap()
    }

    #[test]
    fn successful_response_upgrades_to_consensus_verified() {
        let proof = fixture_proof();
        let (trust, reason) =
            evaluate_outcome(&proof, ConsensusOutcome::Response(success_response(&proof)));
        assert_eq!(trust.as_str(), "consensus-verified-beacon");
        assert!(reason.is_none());
    }

    #[test]
    fn error_codes_pass_through_verbatim() {
        let proof = fixture_proof();
        for code in [
            "stale-consensus-envelope",
            "non-finalized-consensus-envelope",
            "unsupported-mode",
            "malformed-payload",
            "some-future-code",
        ] {
            let mut response = success_response(&proof);
            response.valid = false;
            response.error_code = Some(code.to_owned());
            let (trust, reason) = evaluate_outcome(&proof, ConsensusOutcome::Response(response));
            assert_eq!(trust, TrustClassification::RpcSourced);
            assert_eq!(reason.unwrap().as_str(), code);
        }
    }

    #[test]
    fn invalid_without_code_is_a_generic_verifier_error() {
        let proof = fixture_proof();
        let mut response = success_response(&proof);
        response.valid = false;
        let (_, reason) = evaluate_outcome(&proof, ConsensusOutcome::Response(response));
        assert_eq!(reason, Some(TrustDecisionReason::VerifierError));
    }

    #[test]
    fn state_root_mismatch_blocks_the_upgrade() {
        let proof = fixture_proof();
        let mut response = success_response(&proof);
        response.verified_state_root = Some(alloy::primitives::B256::ZERO);
        let (trust, reason) = evaluate_outcome(&proof, ConsensusOutcome::Response(response));
        assert_eq!(trust, TrustClassification::RpcSourced);
        assert_eq!(reason, Some(TrustDecisionReason::StateRootMismatch));

        let mut response = success_response(&proof);
        response.state_root_matches = false;
        let (_, reason) = evaluate_outcome(&proof, ConsensusOutcome::Response(response));
        assert_eq!(reason, Some(TrustDecisionReason::StateRootMismatch));
    }

    #[test]
    fn block_number_mismatch_blocks_the_upgrade() {
        let proof = fixture_proof();
        let mut response = success_response(&proof);
        response.verified_block_number = Some(proof.block_number + 1);
        let (_, reason) = evaluate_outcome(&proof, ConsensusOutcome::Response(response));
        assert_eq!(reason, Some(TrustDecisionReason::BlockNumberMismatch));
    }

    #[test]
    fn local_outcomes_have_their_own_reasons() {
        let proof = fixture_proof();
        let (_, reason) = evaluate_outcome(&proof, ConsensusOutcome::DisabledByFlag);
        assert_eq!(reason, Some(TrustDecisionReason::VerifierDisabledByFlag));
        let (_, reason) = evaluate_outcome(&proof, ConsensusOutcome::NoVerifier);
        assert_eq!(reason, Some(TrustDecisionReason::VerifierPending));
        let (_, reason) =
            evaluate_outcome(&proof, ConsensusOutcome::Unavailable("boom".to_owned()));
        assert_eq!(reason, Some(TrustDecisionReason::VerifierUnavailable));
    }

    #[test]
    fn request_carries_the_package_context() {
        let package = fixture_package_v1_2();
        let proof = package.consensus_proof.as_ref().unwrap();
        let request = build_request(proof, package.chain_id, &package.packaged_at);
        assert_eq!(request.network, "mainnet");
        assert_eq!(request.expected_state_root, proof.state_root);
        assert_eq!(request.package_chain_id, 1);
        assert!(request.checkpoint.is_some());
    }
}
