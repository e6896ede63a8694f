use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::consensus::ConsensusMode;
use crate::warnings::Severity;

/// Where a claim's confidence comes from. The six levels form a total
/// order; compare, do not match on equality outside of sinks. The
/// consensus sub-tags collapse to one rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustClassification {
    UserProvided,
    ApiSourced,
    RpcSourced,
    SelfVerified,
    ProofVerified,
    ConsensusVerified(Option<ConsensusMode>),
}

impl TrustClassification {
    fn rank(&self) -> u8 {
        match self {
            Self::UserProvided => 0,
            Self::ApiSourced => 1,
            Self::RpcSourced => 2,
            Self::SelfVerified => 3,
            Self::ProofVerified => 4,
            Self::ConsensusVerified(_) => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserProvided => "user-provided",
            Self::ApiSourced => "api-sourced",
            Self::RpcSourced => "rpc-sourced",
            Self::SelfVerified => "self-verified",
            Self::ProofVerified => "proof-verified",
            Self::ConsensusVerified(None) => "consensus-verified",
            Self::ConsensusVerified(Some(ConsensusMode::Beacon)) => "consensus-verified-beacon",
            Self::ConsensusVerified(Some(ConsensusMode::Opstack)) => "consensus-verified-opstack",
            Self::ConsensusVerified(Some(ConsensusMode::Linea)) => "consensus-verified-linea",
        }
    }
}

impl PartialOrd for TrustClassification {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TrustClassification {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for TrustClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("unknown trust level {0:?}")]
pub struct UnknownTrustLevel(String);

impl FromStr for TrustClassification {
    type Err = UnknownTrustLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "user-provided" => Self::UserProvided,
            "api-sourced" => Self::ApiSourced,
            "rpc-sourced" => Self::RpcSourced,
            "self-verified" => Self::SelfVerified,
            "proof-verified" => Self::ProofVerified,
            "consensus-verified" => Self::ConsensusVerified(None),
            "consensus-verified-beacon" => Self::ConsensusVerified(Some(ConsensusMode::Beacon)),
            "consensus-verified-opstack" => Self::ConsensusVerified(Some(ConsensusMode::Opstack)),
            "consensus-verified-linea" => Self::ConsensusVerified(Some(ConsensusMode::Linea)),
            other => return Err(UnknownTrustLevel(other.to_owned())),
        })
    }
}

impl Serialize for TrustClassification {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TrustClassification {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Machine-readable reason a section with a proof could not be upgraded.
/// External verifier codes are preserved verbatim through `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustDecisionReason {
    StateRootMismatch,
    BlockNumberMismatch,
    StaleConsensusEnvelope,
    NonFinalizedConsensusEnvelope,
    VerifierPending,
    VerifierDisabledByFlag,
    UnsupportedMode,
    MalformedPayload,
    VerifierError,
    VerifierUnavailable,
    Other(String),
}

impl TrustDecisionReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::StateRootMismatch => "state-root-mismatch",
            Self::BlockNumberMismatch => "block-number-mismatch",
            Self::StaleConsensusEnvelope => "stale-consensus-envelope",
            Self::NonFinalizedConsensusEnvelope => "non-finalized-consensus-envelope",
            Self::VerifierPending => "verifier-pending",
            Self::VerifierDisabledByFlag => "verifier-disabled-by-flag",
            Self::UnsupportedMode => "unsupported-mode",
            Self::MalformedPayload => "malformed-payload",
            Self::VerifierError => "verifier-error",
            Self::VerifierUnavailable => "verifier-unavailable",
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for TrustDecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrustDecisionReason {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "state-root-mismatch" => Self::StateRootMismatch,
            "block-number-mismatch" => Self::BlockNumberMismatch,
            "stale-consensus-envelope" => Self::StaleConsensusEnvelope,
            "non-finalized-consensus-envelope" => Self::NonFinalizedConsensusEnvelope,
            "verifier-pending" => Self::VerifierPending,
            "verifier-disabled-by-flag" => Self::VerifierDisabledByFlag,
            "unsupported-mode" => Self::UnsupportedMode,
            "malformed-payload" => Self::MalformedPayload,
            "verifier-error" => Self::VerifierError,
            "verifier-unavailable" => Self::VerifierUnavailable,
            other => Self::Other(other.to_owned()),
        })
    }
}

impl Serialize for TrustDecisionReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceId {
    SafeTxHash,
    Signatures,
    SafeOwnersThreshold,
    DecodedCalldata,
    OnchainPolicyProof,
    Simulation,
    ConsensusProof,
    TargetWarnings,
    SignerWarnings,
    Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceStatus {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSource {
    pub id: SourceId,
    pub status: SourceStatus,
    pub trust: TrustClassification,
    pub summary: String,
}

/// Everything the fold needs, already reduced to plain facts by the
/// sections that computed them.
#[derive(Debug, Clone)]
pub struct ClassifierInput {
    pub hash_match: bool,
    pub signatures_total: usize,
    pub signatures_valid: usize,
    pub policy_proof_valid: Option<bool>,
    pub has_decoded_data: bool,
    pub calldata_steps: usize,
    pub calldata_verified: usize,
    pub simulation_valid: Option<bool>,
    pub consensus: Option<TrustClassification>,
    pub worst_target_severity: Option<Severity>,
    pub target_warning_count: usize,
    pub signer_warning_count: usize,
    pub has_settings: bool,
}

/// Deterministic fold into the fixed, ordered source enumeration. Always
/// ten entries; absent sections are reported disabled, never omitted.
pub fn classify_sources(input: &ClassifierInput) -> Vec<VerificationSource> {
    let mut sources = Vec::with_capacity(10);

    sources.push(if input.hash_match {
        VerificationSource {
            id: SourceId::SafeTxHash,
            status: SourceStatus::Enabled,
            trust: TrustClassification::SelfVerified,
            summary: "Recomputed safeTxHash matches the declared hash".to_owned(),
        }
    } else {
        VerificationSource {
            id: SourceId::SafeTxHash,
            status: SourceStatus::Enabled,
            trust: TrustClassification::UserProvided,
            summary: "Declared safeTxHash does not match the recomputed hash".to_owned(),
        }
    });

    let all_signatures_valid =
        input.signatures_total > 0 && input.signatures_valid == input.signatures_total;
    sources.push(VerificationSource {
        id: SourceId::Signatures,
        status: SourceStatus::Enabled,
        trust: if all_signatures_valid {
            TrustClassification::SelfVerified
        } else {
            TrustClassification::ApiSourced
        },
        summary: format!(
            "{} of {} signatures recovered to their claimed owner",
            input.signatures_valid, input.signatures_total
        ),
    });

    sources.push(VerificationSource {
        id: SourceId::SafeOwnersThreshold,
        status: SourceStatus::Enabled,
        trust: if input.policy_proof_valid == Some(true) {
            TrustClassification::ProofVerified
        } else {
            TrustClassification::ApiSourced
        },
        summary: match input.policy_proof_valid {
            Some(true) => "Owners and threshold proven against the state root".to_owned(),
            Some(false) => "Policy proof present but failed verification".to_owned(),
            None => "Owners and threshold taken from the transaction service".to_owned(),
        },
    });

    sources.push(if input.has_decoded_data {
        let all_verified =
            input.calldata_steps > 0 && input.calldata_verified == input.calldata_steps;
        VerificationSource {
            id: SourceId::DecodedCalldata,
            status: SourceStatus::Enabled,
            trust: if all_verified {
                TrustClassification::SelfVerified
            } else {
                TrustClassification::ApiSourced
            },
            summary: format!(
                "{} of {} call steps re-encoded to the raw calldata",
                input.calldata_verified, input.calldata_steps
            ),
        }
    } else {
        VerificationSource {
            id: SourceId::DecodedCalldata,
            status: SourceStatus::Disabled,
            trust: TrustClassification::ApiSourced,
            summary: "No decoded calldata in the package".to_owned(),
        }
    });

    sources.push(match input.policy_proof_valid {
        Some(valid) => VerificationSource {
            id: SourceId::OnchainPolicyProof,
            status: SourceStatus::Enabled,
            trust: if valid {
                TrustClassification::ProofVerified
            } else {
                TrustClassification::RpcSourced
            },
            summary: if valid {
                "All policy checks passed".to_owned()
            } else {
                "One or more policy checks failed".to_owned()
            },
        },
        None => VerificationSource {
            id: SourceId::OnchainPolicyProof,
            status: SourceStatus::Disabled,
            trust: TrustClassification::RpcSourced,
            summary: "No on-chain policy proof in the package".to_owned(),
        },
    });

    sources.push(match input.simulation_valid {
        Some(valid) => VerificationSource {
            id: SourceId::Simulation,
            status: SourceStatus::Enabled,
            trust: TrustClassification::RpcSourced,
            summary: if valid {
                "Simulation record is structurally consistent".to_owned()
            } else {
                "Simulation record is structurally inconsistent".to_owned()
            },
        },
        None => VerificationSource {
            id: SourceId::Simulation,
            status: SourceStatus::Disabled,
            trust: TrustClassification::RpcSourced,
            summary: "No simulation in the package".to_owned(),
        },
    });

    sources.push(match input.consensus {
        Some(trust) => VerificationSource {
            id: SourceId::ConsensusProof,
            status: SourceStatus::Enabled,
            trust,
            summary: if trust >= TrustClassification::ConsensusVerified(None) {
                "State root attested by the consensus light client".to_owned()
            } else {
                "Consensus proof present but not verified".to_owned()
            },
        },
        None => VerificationSource {
            id: SourceId::ConsensusProof,
            status: SourceStatus::Disabled,
            trust: TrustClassification::RpcSourced,
            summary: "No consensus proof in the package".to_owned(),
        },
    });

    sources.push(VerificationSource {
        id: SourceId::TargetWarnings,
        status: SourceStatus::Enabled,
        trust: match input.worst_target_severity {
            None | Some(Severity::Info) => TrustClassification::SelfVerified,
            Some(_) => TrustClassification::UserProvided,
        },
        summary: match input.worst_target_severity {
            None => "No target warnings".to_owned(),
            Some(severity) => format!(
                "{} target warning(s), worst severity {severity:?}",
                input.target_warning_count
            ),
        },
    });

    sources.push(VerificationSource {
        id: SourceId::SignerWarnings,
        status: SourceStatus::Enabled,
        trust: if input.signer_warning_count == 0 {
            TrustClassification::SelfVerified
        } else {
            TrustClassification::UserProvided
        },
        summary: if input.signer_warning_count == 0 {
            "All signers are known".to_owned()
        } else {
            format!("{} signer(s) missing from the address book", input.signer_warning_count)
        },
    });

    sources.push(VerificationSource {
        id: SourceId::Settings,
        status: if input.has_settings {
            SourceStatus::Enabled
        } else {
            SourceStatus::Disabled
        },
        trust: TrustClassification::UserProvided,
        summary: if input.has_settings {
            "User settings supplied by the host".to_owned()
        } else {
            "No user settings supplied".to_owned()
        },
    });

    sources
}
