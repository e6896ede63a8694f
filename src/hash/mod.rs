use alloy::primitives::{Address, B256, U256};
use alloy::sol;
use alloy::sol_types::{Eip712Domain, SolStruct};
use serde::Serialize;
use thiserror::Error;

use crate::schema::{parse_quantity, QuantityError, SafeTransaction};

sol! {
    /// The struct Safe owners sign. Field order is part of the type hash.
    struct SafeTx {
        address to;
        uint256 value;
        bytes data;
        uint8 operation;
        uint256 safeTxGas;
        uint256 baseGas;
        uint256 gasPrice;
        address gasToken;
        address refundReceiver;
        uint256 nonce;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HashDetails {
    pub domain_separator: B256,
    pub message_hash: B256,
    pub safe_tx_hash: B256,
}

#[derive(Error, Debug)]
pub enum HashError {
    #[error("transaction.{field}: {source}")]
    Quantity {
        field: &'static str,
        source: QuantityError,
    },
}

/// Recomputes the EIP-712 triple for one transaction. The domain binds
/// `chainId` and `verifyingContract` only (the Safe domain carries no name
/// or version).
pub fn compute_hash_details(
    chain_id: u64,
    safe_address: Address,
    tx: &SafeTransaction,
) -> Result<HashDetails, HashError> {
    let quantity = |field: &'static str, raw: &str| {
        parse_quantity(raw).map_err(|source| HashError::Quantity { field, source })
    };

    let safe_tx = SafeTx {
        to: tx.to,
        value: quantity("value", &tx.value)?,
        data: tx.data.clone(),
        operation: tx.operation,
        safeTxGas: quantity("safeTxGas", &tx.safe_tx_gas)?,
        baseGas: quantity("baseGas", &tx.base_gas)?,
        gasPrice: quantity("gasPrice", &tx.gas_price)?,
        gasToken: tx.gas_token,
        refundReceiver: tx.refund_receiver,
        nonce: U256::from(tx.nonce),
    };

    let domain = Eip712Domain {
        name: None,
        version: None,
        chain_id: Some(U256::from(chain_id)),
        verifying_contract: Some(safe_address),
        salt: None,
    };

    Ok(HashDetails {
        domain_separator: domain.separator(),
        message_hash: safe_tx.eip712_hash_struct(),
        safe_tx_hash: safe_tx.eip712_signing_hash(&domain),
    })
}
