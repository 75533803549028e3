use super::instruction::{Instruction, Terminator};
use super::value::BlockId;

/// An ordered sequence of instructions ending in a terminator.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub label: BlockId,
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
}

impl BasicBlock {
    pub fn new(label: BlockId) -> Self {
        Self { label, instructions: Vec::new(), terminator: Terminator::Unreachable }
    }

    /// The first non-PHI instruction, if any.
    pub fn first_non_phi_index(&self) -> usize {
        self.instructions.iter().position(|i| !matches!(i, Instruction::Phi { .. })).unwrap_or(self.instructions.len())
    }

    pub fn calls(&self) -> impl Iterator<Item = (usize, &Instruction)> {
        self.instructions.iter().enumerate().filter(|(_, i)| i.is_call())
    }
}
