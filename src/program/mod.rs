//! Aggregator program interface
//!
//! Anchor ABI of the yield-aggregator program: instruction data encoding
//! (`sha256("global:<name>")[..8]` followed by little-endian arguments) and
//! the fixed account order of every operation. The lending protocol bundles
//! travel as the remaining-accounts tail and are never interpreted here.

use sha2::{Digest, Sha256};

mod instruction;
mod accounts;

pub use accounts::{
    deposit, init_aggregator_config, rebalance, update_strategy, view, withdraw,
};
pub use instruction::AggregatorInstruction;

/// Largest value accepted for an allocation in basis points
pub const BPS_BASE: u16 = 10_000;

/// Discriminator for an Anchor namespace/name pair
pub fn anchor_discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("{}:{}", namespace, name).as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_discriminator() {
        // Anchor's well-known `global:initialize`
        assert_eq!(
            anchor_discriminator("global", "initialize"),
            [175, 175, 109, 31, 13, 152, 155, 237]
        );
    }
}
