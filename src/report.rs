use alloy::primitives::Address;
use serde::Serialize;

use crate::hash::HashDetails;
use crate::policy::PolicyProofReport;
use crate::signature::SignatureReport;
use crate::simulation::SimulationVerification;
use crate::trust::{TrustDecisionReason, VerificationSource};
use crate::warnings::{SignerWarning, TargetWarning};

/// Everything `verify` derives from one package. Owns all of its parts,
/// serializes to plain JSON, no cycles.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub hash_details: HashDetails,
    pub hash_match: bool,
    pub proposer: Option<Address>,
    pub signatures: SignatureReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_proof: Option<PolicyProofReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulation_verification: Option<SimulationVerification>,
    pub target_warnings: Vec<TargetWarning>,
    pub signer_warnings: Vec<SignerWarning>,
    pub sources: Vec<VerificationSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus_trust_decision_reason: Option<TrustDecisionReason>,
}
