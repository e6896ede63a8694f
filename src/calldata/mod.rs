use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::primitives::{keccak256, Address, Bytes, U256};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::schema::{parse_quantity, DecodedCall, DecodedParam, SafeTransaction};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallParam {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub value: Value,
}

/// One executable call in normalized form. A top-level multiSend expands
/// into one step per inner transaction; anything else is a single step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStep {
    pub index: usize,
    pub to: Address,
    pub value: U256,
    pub operation: u8,
    pub method: Option<String>,
    pub params: Vec<CallParam>,
    pub raw_data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum CalldataCheck {
    Verified,
    NoData,
    SelectorMismatch {
        expected: String,
        found: String,
    },
    ParamsMismatch {
        detail: String,
    },
}

fn params_of(call: &DecodedCall) -> Vec<CallParam> {
    call.parameters
        .iter()
        .flatten()
        .map(|param| CallParam {
            name: param.name.clone(),
            param_type: param.param_type.clone(),
            value: param.value.clone(),
        })
        .collect()
}

fn parse_value_or_zero(raw: &str, context: &str) -> U256 {
    match parse_quantity(raw) {
        Ok(value) => value,
        Err(e) => {
            debug!(%context, error = %e, "unparseable call value, treating as zero");
            U256::ZERO
        }
    }
}

/// Flattens the decoded-calldata tree into call steps. Missing inner
/// fields fall back to the top-level transaction; a missing or methodless
/// tree yields no steps.
pub fn normalize_call_steps(tx: &SafeTransaction, decoded: Option<&DecodedCall>) -> Vec<CallStep> {
    let Some(decoded) = decoded else {
        return Vec::new();
    };
    let Some(method) = decoded.method.as_deref() else {
        return Vec::new();
    };

    if method == "multiSend" {
        let inner = decoded
            .parameters
            .iter()
            .flatten()
            .find(|param| param.name == "transactions")
            .and_then(|param| param.value_decoded.as_deref())
            .unwrap_or(&[]);
        if !inner.is_empty() {
            return inner
                .iter()
                .enumerate()
                .map(|(index, tx_inner)| CallStep {
                    index,
                    to: tx_inner.to.unwrap_or(tx.to),
                    value: tx_inner
                        .value
                        .as_deref()
                        .map(|raw| parse_value_or_zero(raw, "inner transaction"))
                        .unwrap_or_else(|| parse_value_or_zero(&tx.value, "transaction")),
                    operation: tx_inner.operation.unwrap_or(tx.operation),
                    method: tx_inner
                        .data_decoded
                        .as_ref()
                        .and_then(|call| call.method.clone()),
                    params: tx_inner
                        .data_decoded
                        .as_ref()
                        .map(params_of)
                        .unwrap_or_default(),
                    raw_data: tx_inner.data.clone().unwrap_or_else(|| tx.data.clone()),
                })
                .collect();
        }
    }

    vec![CallStep {
        index: 0,
        to: tx.to,
        value: parse_value_or_zero(&tx.value, "transaction"),
        operation: tx.operation,
        method: Some(method.to_owned()),
        params: params_of(decoded),
        raw_data: tx.data.clone(),
    }]
}

/// Converts one decoded JSON parameter into a dynamic ABI value. Scalars
/// (and bracketed string forms) go through the type's own coercion;
/// JSON arrays recurse element-wise.
fn coerce_value(ty: &DynSolType, value: &Value) -> Result<DynSolValue, String> {
    match (ty, value) {
        (_, Value::String(s)) => ty
            .coerce_str(s)
            .map_err(|e| format!("cannot coerce {s:?} as {ty}: {e}")),
        (_, Value::Number(n)) => ty
            .coerce_str(&n.to_string())
            .map_err(|e| format!("cannot coerce {n} as {ty}: {e}")),
        (_, Value::Bool(b)) => ty
            .coerce_str(if *b { "true" } else { "false" })
            .map_err(|e| format!("cannot coerce {b} as {ty}: {e}")),
        (DynSolType::Array(inner), Value::Array(elements)) => Ok(DynSolValue::Array(
            elements
                .iter()
                .map(|element| coerce_value(inner, element))
                .collect::<Result<Vec<_>, _>>()?,
        )),
        (DynSolType::FixedArray(inner, len), Value::Array(elements)) => {
            if elements.len() != *len {
                return Err(format!(
                    "fixed array of {len} elements got {}",
                    elements.len()
                ));
            }
            Ok(DynSolValue::FixedArray(
                elements
                    .iter()
                    .map(|element| coerce_value(inner, element))
                    .collect::<Result<Vec<_>, _>>()?,
            ))
        }
        (DynSolType::Tuple(types), Value::Array(elements)) => {
            if elements.len() != types.len() {
                return Err(format!(
                    "tuple of {} components got {}",
                    types.len(),
                    elements.len()
                ));
            }
            Ok(DynSolValue::Tuple(
                types
                    .iter()
                    .zip(elements)
                    .map(|(component, element)| coerce_value(component, element))
                    .collect::<Result<Vec<_>, _>>()?,
            ))
        }
        (_, other) => Err(format!("unsupported JSON shape {other} for type {ty}")),
    }
}

/// Proves that one step's raw bytes encode exactly its declared method and
/// parameters: selector from the canonical signature, then byte-for-byte
/// ABI re-encoding of the parameter list.
pub fn verify_call_step(step: &CallStep) -> CalldataCheck {
    let Some(method) = step.method.as_deref() else {
        return CalldataCheck::NoData;
    };
    if step.raw_data.is_empty() {
        return CalldataCheck::NoData;
    }

    let types: Vec<&str> = step
        .params
        .iter()
        .map(|param| param.param_type.as_str())
        .collect();
    let signature = format!("{method}({})", types.join(","));
    let expected_selector = &keccak256(signature.as_bytes())[..4];

    if step.raw_data.len() < 4 || &step.raw_data[..4] != expected_selector {
        return CalldataCheck::SelectorMismatch {
            expected: alloy::hex::encode_prefixed(expected_selector),
            found: alloy::hex::encode_prefixed(&step.raw_data[..step.raw_data.len().min(4)]),
        };
    }

    let mut values = Vec::with_capacity(step.params.len());
    for param in &step.params {
        let ty = match param.param_type.parse::<DynSolType>() {
            Ok(ty) => ty,
            Err(e) => {
                return CalldataCheck::ParamsMismatch {
                    detail: format!("unknown ABI type {:?}: {e}", param.param_type),
                }
            }
        };
        match coerce_value(&ty, &param.value) {
            Ok(value) => values.push(value),
            Err(detail) => {
                return CalldataCheck::ParamsMismatch {
                    detail: format!("parameter {:?}: {detail}", param.name),
                }
            }
        }
    }

    let encoded = DynSolValue::Tuple(values).abi_encode_params();
    if encoded != step.raw_data[4..] {
        return CalldataCheck::ParamsMismatch {
            detail: format!(
                "re-encoded parameters ({} bytes) differ from calldata ({} bytes)",
                encoded.len(),
                step.raw_data.len() - 4
            ),
        };
    }
    CalldataCheck::Verified
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixture_package;
    use alloy::hex;
    use serde_json::json;

    fn fixture_steps() -> Vec<CallStep> {
        let package = fixture_package();
        normalize_call_steps(&package.transaction, package.data_decoded.as_ref())
    }

    #[test]
    fn multisend_fixture_expands_to_two_verified_steps() {
        let steps = fixture_steps();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].method.as_deref(), Some("approve"));
        assert_eq!(steps[1].method.as_deref(), Some("transfer"));
        assert_eq!(steps[0].operation, 0);
        for step in &steps {
            assert_eq!(verify_call_step(step), CalldataCheck::Verified);
        }
    }

    #[test]
    fn missing_tree_or_method_yields_no_steps() {
        let package = fixture_package();
        assert!(normalize_call_steps(&package.transaction, None).is_empty());
        let methodless = DecodedCall {
            method: None,
            parameters: None,
        };
        assert!(normalize_call_steps(&package.transaction, Some(&methodless)).is_empty());
    }

    #[test]
    fn non_multisend_tree_yields_one_step_from_the_top_level() {
        let package = fixture_package();
        let decoded = DecodedCall {
            method: Some("transfer".to_owned()),
            parameters: Some(vec![]),
        };
        let steps = normalize_call_steps(&package.transaction, Some(&decoded));
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].to, package.transaction.to);
        assert_eq!(steps[0].operation, package.transaction.operation);
        assert_eq!(steps[0].raw_data, package.transaction.data);
    }

    #[test]
    fn flipped_selector_is_detected() {
        let mut steps = fixture_steps();
        let mut raw = steps[0].raw_data.to_vec();
        raw[0] ^= 0xff;
        steps[0].raw_data = raw.into();
        match verify_call_step(&steps[0]) {
            CalldataCheck::SelectorMismatch { expected, found } => {
                assert_eq!(expected, "0x095ea7b3");
                assert_ne!(expected, found);
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn tampered_parameter_is_detected() {
        let mut steps = fixture_steps();
        steps[1].params[1].value = json!("9999");
        assert!(matches!(
            verify_call_step(&steps[1]),
            CalldataCheck::ParamsMismatch { .. }
        ));
    }

    #[test]
    fn renamed_method_changes_the_selector() {
        let mut steps = fixture_steps();
        steps[0].method = Some("approve2".to_owned());
        assert!(matches!(
            verify_call_step(&steps[0]),
            CalldataCheck::SelectorMismatch { .. }
        ));
    }

    #[test]
    fn empty_calldata_and_null_method_are_no_data() {
        let mut steps = fixture_steps();
        steps[0].raw_data = Bytes::new();
        assert_eq!(verify_call_step(&steps[0]), CalldataCheck::NoData);

        let mut steps = fixture_steps();
        steps[0].method = None;
        assert_eq!(verify_call_step(&steps[0]), CalldataCheck::NoData);
    }

    #[test]
    fn dynamic_types_reencode_correctly() {
        // transferBatch(address[],bytes): head/tail encoding with two
        // dynamic parameters
        let recipients = [
            "0x00000000000000000000000000000000000000a1",
            "0x00000000000000000000000000000000000000a2",
        ];
        let payload = "0xdeadbeef";
        let mut encoded = Vec::new();
        encoded.extend_from_slice(&keccak256(b"transferBatch(address[],bytes)")[..4]);
        // head: two offsets (array tail is 3 words, so bytes start at 0xa0)
        encoded.extend_from_slice(&U256::from(0x40u64).to_be_bytes::<32>());
        encoded.extend_from_slice(&U256::from(0xa0u64).to_be_bytes::<32>());
        // tail: array length + two padded addresses
        encoded.extend_from_slice(&U256::from(2u64).to_be_bytes::<32>());
        for recipient in recipients {
            let mut word = [0u8; 32];
            word[12..].copy_from_slice(&hex::decode(&recipient[2..]).unwrap());
            encoded.extend_from_slice(&word);
        }
        // tail: bytes length + right-padded payload
        encoded.extend_from_slice(&U256::from(4u64).to_be_bytes::<32>());
        let mut padded = [0u8; 32];
        padded[..4].copy_from_slice(&hex::decode(&payload[2..]).unwrap());
        encoded.extend_from_slice(&padded);

        let step = CallStep {
            index: 0,
            to: Address::ZERO,
            value: U256::ZERO,
            operation: 0,
            method: Some("transferBatch".to_owned()),
            params: vec![
                CallParam {
                    name: "recipients".to_owned(),
                    param_type: "address[]".to_owned(),
                    value: json!(recipients),
                },
                CallParam {
                    name: "payload".to_owned(),
                    param_type: "bytes".to_owned(),
                    value: json!(payload),
                },
            ],
            raw_data: encoded.into(),
        };
        assert_eq!(verify_call_step(&step), CalldataCheck::Verified);
    }

    #[test]
    fn unknown_abi_type_is_a_params_mismatch() {
        let mut steps = fixture_steps();
        steps[0].params[0].param_type = "addresss".to_owned();
        assert!(matches!(
            verify_call_step(&steps[0]),
            // the broken type also changes the canonical signature
            CalldataCheck::SelectorMismatch { .. } | CalldataCheck::ParamsMismatch { .. }
        ));
    }

    #[test]
    fn inner_fields_fall_back_to_the_top_level() {
        let package = fixture_package();
        let mut decoded = package.data_decoded.clone().unwrap();
        let inner = decoded.parameters.as_mut().unwrap()[0]
            .value_decoded
            .as_mut()
            .unwrap();
        inner[0].to = None;
        inner[0].operation = None;
        inner[0].value = None;
        let steps = normalize_call_steps(&package.transaction, Some(&decoded));
        assert_eq!(steps[0].to, package.transaction.to);
        assert_eq!(steps[0].operation, package.transaction.operation);
        assert_eq!(steps[0].value, U256::ZERO);
    }
}
