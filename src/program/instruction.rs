use super::anchor_discriminator;

/// Instruction data of the aggregator program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorInstruction {
    /// Create the config PDA, share mint and vault; sets the split between
    /// the two protocols in basis points
    InitAggregatorConfig { allocation_bps: u16 },
    Deposit { amount: u64 },
    /// `amount` is denominated in share tokens
    Withdraw { amount: u64 },
    UpdateStrategy { allocation_bps: u16 },
    Rebalance,
    View,
}

impl AggregatorInstruction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InitAggregatorConfig { .. } => "init_aggregator_config",
            Self::Deposit { .. } => "deposit",
            Self::Withdraw { .. } => "withdraw",
            Self::UpdateStrategy { .. } => "update_strategy",
            Self::Rebalance => "rebalance",
            Self::View => "view",
        }
    }

    pub fn discriminator(&self) -> [u8; 8] {
        anchor_discriminator("global", self.name())
    }

    pub fn data(&self) -> Vec<u8> {
        let mut data = self.discriminator().to_vec();
        match self {
            Self::InitAggregatorConfig { allocation_bps } | Self::UpdateStrategy { allocation_bps } => {
                data.extend_from_slice(&allocation_bps.to_le_bytes())
            }
            Self::Deposit { amount } | Self::Withdraw { amount } => {
                data.extend_from_slice(&amount.to_le_bytes())
            }
            Self::Rebalance | Self::View => {}
        }
        data
    }

    /// Parse instruction data; `None` for unknown discriminators or bad lengths
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        let (disc, args) = data.split_at(8);

        let u16_arg = || -> Option<u16> { Some(u16::from_le_bytes(args.try_into().ok()?)) };
        let u64_arg = || -> Option<u64> { Some(u64::from_le_bytes(args.try_into().ok()?)) };

        let candidates = [
            Self::InitAggregatorConfig { allocation_bps: 0 },
            Self::Deposit { amount: 0 },
            Self::Withdraw { amount: 0 },
            Self::UpdateStrategy { allocation_bps: 0 },
            Self::Rebalance,
            Self::View,
        ];
        let template = candidates.into_iter().find(|c| c.discriminator() == disc)?;

        Some(match template {
            Self::InitAggregatorConfig { .. } => Self::InitAggregatorConfig {
                allocation_bps: u16_arg()?,
            },
            Self::Deposit { .. } => Self::Deposit { amount: u64_arg()? },
            Self::Withdraw { .. } => Self::Withdraw { amount: u64_arg()? },
            Self::UpdateStrategy { .. } => Self::UpdateStrategy {
                allocation_bps: u16_arg()?,
            },
            Self::Rebalance | Self::View if args.is_empty() => template,
            Self::Rebalance | Self::View => return None,
        })
    }
}
