//! Instruction planning and ordering validation
//!
//! Every domain transaction carries exactly three instructions:
//! 1. `SetComputeUnitLimit`
//! 2. `SetComputeUnitPrice`
//! 3. the single domain instruction
//!
//! Budget directives only apply to instructions that follow them, so the
//! order is load-bearing and checked after planning.

use crate::tx_builder::errors::TransactionBuilderError;
use solana_sdk::{compute_budget::ComputeBudgetInstruction, instruction::Instruction};

/// `ComputeBudgetInstruction` tags (borsh enum index)
const SET_COMPUTE_UNIT_LIMIT_TAG: u8 = 2;
const SET_COMPUTE_UNIT_PRICE_TAG: u8 = 3;

/// Ordered instructions of one transaction
#[derive(Debug, Clone)]
pub struct InstructionPlan {
    pub instructions: Vec<Instruction>,

    /// Whether the plan carries compute budget directives
    pub with_budget: bool,
}

impl InstructionPlan {
    pub fn new(instructions: Vec<Instruction>, with_budget: bool) -> Self {
        Self {
            instructions,
            with_budget,
        }
    }

    /// The domain instruction (always last)
    pub fn domain_instruction(&self) -> Option<&Instruction> {
        self.instructions.last()
    }
}

/// Prepend the two compute budget directives to `domain_ix`
pub fn plan_domain_instructions(
    cu_limit: u32,
    cu_price_micro_lamports: u64,
    domain_ix: Instruction,
) -> Result<InstructionPlan, TransactionBuilderError> {
    if domain_ix.program_id == solana_sdk::compute_budget::id() {
        return Err(TransactionBuilderError::instruction_failed(
            domain_ix.program_id.to_string(),
            "domain instruction cannot be a compute budget directive",
        ));
    }
    if cu_limit == 0 {
        return Err(TransactionBuilderError::Configuration(
            "compute unit limit must be > 0".to_string(),
        ));
    }

    let instructions = vec![
        ComputeBudgetInstruction::set_compute_unit_limit(cu_limit),
        ComputeBudgetInstruction::set_compute_unit_price(cu_price_micro_lamports),
        domain_ix,
    ];

    Ok(InstructionPlan::new(instructions, true))
}

/// Plan without budget directives (lookup table program calls)
pub fn plan_plain_instructions(ix: Instruction) -> InstructionPlan {
    InstructionPlan::new(vec![ix], false)
}

fn budget_tag(ix: &Instruction) -> Option<u8> {
    if ix.program_id != solana_sdk::compute_budget::id() {
        return None;
    }
    ix.data.first().copied()
}

/// Validate instruction ordering
///
/// With budget: `[limit, price, domain]` exactly. Without: no budget
/// directive anywhere and exactly one instruction.
pub fn sanity_check_ix_order(plan: &InstructionPlan) -> Result<(), TransactionBuilderError> {
    let instructions = &plan.instructions;
    if instructions.is_empty() {
        return Err(TransactionBuilderError::invalid_order("Instruction list is empty"));
    }

    if !plan.with_budget {
        if let Some(idx) = instructions.iter().position(|ix| budget_tag(ix).is_some()) {
            return Err(TransactionBuilderError::invalid_order(format!(
                "Unexpected compute budget directive at position {}",
                idx
            )));
        }
        if instructions.len() != 1 {
            return Err(TransactionBuilderError::invalid_order(format!(
                "Expected exactly one instruction, got {}",
                instructions.len()
            )));
        }
        return Ok(());
    }

    if instructions.len() != 3 {
        return Err(TransactionBuilderError::invalid_order(format!(
            "Expected 3 instructions (limit, price, domain), got {}",
            instructions.len()
        )));
    }
    if budget_tag(&instructions[0]) != Some(SET_COMPUTE_UNIT_LIMIT_TAG) {
        return Err(TransactionBuilderError::invalid_order(
            "First instruction must be SetComputeUnitLimit",
        ));
    }
    if budget_tag(&instructions[1]) != Some(SET_COMPUTE_UNIT_PRICE_TAG) {
        return Err(TransactionBuilderError::invalid_order(
            "Second instruction must be SetComputeUnitPrice",
        ));
    }
    if budget_tag(&instructions[2]).is_some() {
        return Err(TransactionBuilderError::invalid_order(
            "Domain instruction must follow the budget directives",
        ));
    }

    Ok(())
}
