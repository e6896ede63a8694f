//! Shared fixtures for unit and scenario tests: a three-owner Safe on
//! mainnet with a two-step multiSend, signatures under both EOA schemes,
//! and a complete storage-layout proof.
#![cfg(test)]

use crate::schema::{parse_package, EvidencePackage, OnchainPolicyProof};
use crate::warnings::{AddressBookEntry, AddressKind};

pub const PACKAGE_V1_0: &str = include_str!("../../testdata/package_v1_0.json");
pub const PACKAGE_V1_1: &str = include_str!("../../testdata/package_v1_1.json");
pub const PACKAGE_V1_2: &str = include_str!("../../testdata/package_v1_2.json");

pub fn fixture_package() -> EvidencePackage {
    parse_package(PACKAGE_V1_1.as_bytes()).expect("fixture package parses")
}

pub fn fixture_package_v1_2() -> EvidencePackage {
    parse_package(PACKAGE_V1_2.as_bytes()).expect("fixture package parses")
}

pub fn fixture_policy_proof() -> OnchainPolicyProof {
    fixture_package()
        .onchain_policy_proof
        .expect("fixture carries a policy proof")
}

/// Registry covering both multiSend targets, so the happy path analyzes
/// clean.
pub fn fixture_registry() -> Vec<AddressBookEntry> {
    let package = fixture_package();
    let steps =
        crate::calldata::normalize_call_steps(&package.transaction, package.data_decoded.as_ref());
    steps
        .iter()
        .map(|step| AddressBookEntry {
            address: step.to,
            name: format!("token-{}", step.index),
            kind: AddressKind::Contract,
            chain_ids: None,
        })
        .collect()
}
