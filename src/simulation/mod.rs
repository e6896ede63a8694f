use serde::Serialize;

use crate::schema::{SimulationRecord, HEX_ADDRESS, HEX_DATA, HEX_WORD, RFC3339};

static LOWER_HEX_QUANTITY: &str = "0x-prefixed lowercase hex quantity";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationCheck {
    pub id: &'static str,
    pub label: &'static str,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationVerification {
    pub valid: bool,
    pub execution_reverted: bool,
    pub checks: Vec<SimulationCheck>,
}

impl SimulationVerification {
    pub fn check(&self, id: &str) -> Option<&SimulationCheck> {
        self.checks.iter().find(|check| check.id == id)
    }
}

fn is_lower_hex_quantity(s: &str) -> bool {
    match s.strip_prefix("0x") {
        Some(digits) => {
            !digits.is_empty()
                && digits.len() <= 64
                && digits.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        }
        None => false,
    }
}

/// Structural consistency checks only: no execution, no re-simulation.
/// A reverted run keeps `valid = true`; only the `execution-result` check
/// mirrors the success bit.
pub fn verify_simulation(simulation: &SimulationRecord) -> SimulationVerification {
    let mut checks = Vec::new();
    let mut check = |id: &'static str, label: &'static str, failure: Option<String>| {
        checks.push(SimulationCheck {
            id,
            label,
            passed: failure.is_none(),
            detail: failure,
        });
    };

    check(
        "gas-used",
        "Gas used is a hex quantity",
        (!is_lower_hex_quantity(&simulation.gas_used))
            .then(|| format!("expected {LOWER_HEX_QUANTITY}, got {:?}", simulation.gas_used)),
    );

    check(
        "return-data",
        "Return data is hex or absent",
        simulation.return_data.as_deref().and_then(|data| {
            (!HEX_DATA.is_match(data)).then(|| format!("malformed return data {data:?}"))
        }),
    );

    let mut log_failure = None;
    for (i, log) in simulation.logs.iter().enumerate() {
        if !HEX_ADDRESS.is_match(&log.address) {
            log_failure = Some(format!("log {i}: malformed address {:?}", log.address));
            break;
        }
        if log.topics.len() > 4 {
            log_failure = Some(format!("log {i}: {} topics, at most 4 allowed", log.topics.len()));
            break;
        }
        if let Some(topic) = log.topics.iter().find(|topic| !HEX_WORD.is_match(topic)) {
            log_failure = Some(format!("log {i}: malformed topic {topic:?}"));
            break;
        }
        if !HEX_DATA.is_match(&log.data) {
            log_failure = Some(format!("log {i}: malformed data"));
            break;
        }
    }
    check("logs", "Logs are well-formed", log_failure);

    let mut diff_failure = None;
    for (i, diff) in simulation.state_diffs.iter().flatten().enumerate() {
        if !HEX_ADDRESS.is_match(&diff.address) {
            diff_failure = Some(format!("diff {i}: malformed address {:?}", diff.address));
            break;
        }
        if !HEX_WORD.is_match(&diff.key) {
            diff_failure = Some(format!("diff {i}: slot key must be a 32-byte word"));
            break;
        }
        if !HEX_WORD.is_match(&diff.before) || !HEX_WORD.is_match(&diff.after) {
            diff_failure = Some(format!("diff {i}: before/after must be 32-byte words"));
            break;
        }
    }
    check("state-diffs", "State diffs are well-formed", diff_failure);

    check("block-number", "Block number is present", None);

    check(
        "block-timestamp",
        "Block timestamp is RFC3339 or absent",
        simulation.block_timestamp.as_deref().and_then(|ts| {
            (!RFC3339.is_match(ts)).then(|| format!("malformed timestamp {ts:?}"))
        }),
    );

    check(
        "execution-result",
        "Simulated execution succeeded",
        (!simulation.success).then(|| "execution reverted".to_owned()),
    );

    // a revert is not a structural defect, so it does not count here
    let valid = checks
        .iter()
        .filter(|check| check.id != "execution-result")
        .all(|check| check.passed);

    SimulationVerification {
        valid,
        execution_reverted: !simulation.success,
        checks,
    }
}
