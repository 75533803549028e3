//! Instruction and terminator kinds.
//!
//! `StackAlloc`, `Load`, `Store`, `AggregateGEP`, `ExtractField`/
//! `InsertField`, `Call`, `PointerCast`, plus `Copy` and `Phi` to round out
//! the SSA form (a front-end lowering any non-trivial program needs both).

use super::value::{BlockId, Const, Operand, Value};
use crate::ir::types::Type;

/// The target of a `Call` instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    /// A direct call to a named function. The function may be a definition
    /// in this module or a declaration-only (external) symbol.
    Direct(String),
    /// An indirect call through a function-pointer value. Free-Finder
    /// treats every indirect call as may-free.
    Indirect(Operand),
}

/// IR-level calling convention. Only `Fast` and `C` are distinguished: the
/// hoist mode must set inserted check-call sites to the "fast" convention
/// the front-end uses for its own check calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConv {
    C,
    Fast,
}

/// A single constant-indexed step of an aggregate projection
/// (`AggregateGEP`'s index list): field index into a `Struct`.
pub type FieldIndex = u32;

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Reserves a typed stack slot. Always resides in the entry block of its
    /// function.
    StackAlloc { dest: Value, ty: Type, is_multi_qualified: bool },

    /// `dest = load ptr`, `ptr` pointing to a value of type `ty`.
    Load { dest: Value, ty: Type, ptr: Operand },

    /// `store val, ptr`.
    Store { val: Operand, ptr: Operand },

    /// Address of a field/element inside an aggregate pointed to by `base`.
    /// `indices` is the constant field-index path (e.g. `{0}` addresses the
    /// raw-pointer field of a safe-pointer aggregate); a path of more than
    /// one index is never needed by this crate's passes, but the list shape
    /// is kept general.
    AggregateGEP { dest: Value, base: Operand, indices: Vec<FieldIndex>, result_ty: Type },

    /// Value-level projection of a field out of an in-register aggregate.
    ExtractField { dest: Value, aggregate: Operand, index: FieldIndex, ty: Type },

    /// Value-level insertion of a field into an in-register aggregate,
    /// producing a new aggregate value of the same type as `aggregate`.
    InsertField { dest: Value, aggregate: Operand, index: FieldIndex, value: Operand, ty: Type },

    /// A (possibly indirect) call. `dest` is `None` for void calls.
    Call { dest: Option<Value>, callee: Callee, args: Vec<Operand>, ty: Type, calling_conv: CallingConv },

    /// A type-preserving reinterpretation of a pointer value (no-op at
    /// runtime). The Check-Removal pass strips chains of these when computing a safe-pointer
    /// aggregate's canonical address.
    PointerCast { dest: Value, value: Operand, ty: Type },

    /// `dest = src`, a plain SSA copy/rename.
    Copy { dest: Value, src: Operand },

    /// An SSA phi node.
    Phi { dest: Value, ty: Type, incoming: Vec<(Operand, BlockId)> },

    /// `dest = isnull ptr` — a null-pointer test producing a one-bit
    /// boolean result, suitable as a `CondBranch` condition. The host IR is
    /// assumed to provide some comparison capability, and the Check-Removal
    /// hoist mode's pre-call null-check needs one. Added the same way
    /// `Copy`/`Phi` round out the SSA shape above.
    IsNull { dest: Value, ptr: Operand },
}

impl Instruction {
    /// The value this instruction defines, if any.
    pub fn dest(&self) -> Option<Value> {
        match self {
            Instruction::StackAlloc { dest, .. }
            | Instruction::Load { dest, .. }
            | Instruction::AggregateGEP { dest, .. }
            | Instruction::ExtractField { dest, .. }
            | Instruction::InsertField { dest, .. }
            | Instruction::PointerCast { dest, .. }
            | Instruction::Copy { dest, .. }
            | Instruction::Phi { dest, .. }
            | Instruction::IsNull { dest, .. } => Some(*dest),
            Instruction::Call { dest, .. } => *dest,
            Instruction::Store { .. } => None,
        }
    }

    /// All operands read by this instruction (not counting the implicit
    /// `dest`), in no particular semantic order beyond source order.
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Instruction::StackAlloc { .. } => vec![],
            Instruction::Load { ptr, .. } => vec![ptr],
            Instruction::Store { val, ptr } => vec![val, ptr],
            Instruction::AggregateGEP { base, .. } => vec![base],
            Instruction::ExtractField { aggregate, .. } => vec![aggregate],
            Instruction::InsertField { aggregate, value, .. } => vec![aggregate, value],
            Instruction::Call { args, .. } => args.iter().collect(),
            Instruction::PointerCast { value, .. } => vec![value],
            Instruction::Copy { src, .. } => vec![src],
            Instruction::Phi { incoming, .. } => incoming.iter().map(|(op, _)| op).collect(),
            Instruction::IsNull { ptr, .. } => vec![ptr],
        }
    }

    /// Mutable access to the same operand list as [`Instruction::operands`].
    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Instruction::StackAlloc { .. } => vec![],
            Instruction::Load { ptr, .. } => vec![ptr],
            Instruction::Store { val, ptr } => vec![val, ptr],
            Instruction::AggregateGEP { base, .. } => vec![base],
            Instruction::ExtractField { aggregate, .. } => vec![aggregate],
            Instruction::InsertField { aggregate, value, .. } => vec![aggregate, value],
            Instruction::Call { args, .. } => args.iter_mut().collect(),
            Instruction::PointerCast { value, .. } => vec![value],
            Instruction::Copy { src, .. } => vec![src],
            Instruction::Phi { incoming, .. } => incoming.iter_mut().map(|(op, _)| op).collect(),
            Instruction::IsNull { ptr, .. } => vec![ptr],
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Instruction::Call { .. })
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instruction::StackAlloc { dest, ty, is_multi_qualified } => {
                write!(f, "{} = stackalloc {:?}{}", dest, ty, if *is_multi_qualified { " multi" } else { "" })
            }
            Instruction::Load { dest, ty, ptr } => write!(f, "{} = load {:?}, {:?}", dest, ty, ptr),
            Instruction::Store { val, ptr } => write!(f, "store {:?}, {:?}", val, ptr),
            Instruction::AggregateGEP { dest, base, indices, .. } => {
                write!(f, "{} = gep {:?}, {:?}", dest, base, indices)
            }
            Instruction::ExtractField { dest, aggregate, index, .. } => {
                write!(f, "{} = extractfield {:?}, {}", dest, aggregate, index)
            }
            Instruction::InsertField { dest, aggregate, index, value, .. } => {
                write!(f, "{} = insertfield {:?}, {}, {:?}", dest, aggregate, index, value)
            }
            Instruction::Call { dest, callee, args, .. } => {
                if let Some(d) = dest {
                    write!(f, "{} = call {:?}({:?})", d, callee, args)
                } else {
                    write!(f, "call {:?}({:?})", callee, args)
                }
            }
            Instruction::PointerCast { dest, value, .. } => write!(f, "{} = ptrcast {:?}", dest, value),
            Instruction::Copy { dest, src } => write!(f, "{} = copy {:?}", dest, src),
            Instruction::Phi { dest, incoming, .. } => write!(f, "{} = phi {:?}", dest, incoming),
            Instruction::IsNull { dest, ptr } => write!(f, "{} = isnull {:?}", dest, ptr),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Branch(BlockId),
    CondBranch { cond: Operand, true_label: BlockId, false_label: BlockId },
    Return(Option<Operand>),
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Branch(target) => vec![*target],
            Terminator::CondBranch { true_label, false_label, .. } => vec![*true_label, *false_label],
            Terminator::Return(_) | Terminator::Unreachable => vec![],
        }
    }

    pub fn successors_mut(&mut self) -> Vec<&mut BlockId> {
        match self {
            Terminator::Branch(target) => vec![target],
            Terminator::CondBranch { true_label, false_label, .. } => vec![true_label, false_label],
            Terminator::Return(_) | Terminator::Unreachable => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dest_of_store_is_none() {
        let inst = Instruction::Store { val: Operand::Const(Const::I32(1)), ptr: Operand::Value(Value(0)) };
        assert_eq!(inst.dest(), None);
    }

    #[test]
    fn dest_of_call_follows_option() {
        let void_call = Instruction::Call {
            dest: None,
            callee: Callee::Direct("f".into()),
            args: vec![],
            ty: Type::Integer(0),
            calling_conv: CallingConv::C,
        };
        assert_eq!(void_call.dest(), None);

        let value_call = Instruction::Call {
            dest: Some(Value(3)),
            callee: Callee::Direct("g".into()),
            args: vec![],
            ty: Type::i64(),
            calling_conv: CallingConv::Fast,
        };
        assert_eq!(value_call.dest(), Some(Value(3)));
    }

    #[test]
    fn terminator_successors() {
        let t = Terminator::CondBranch {
            cond: Operand::Value(Value(0)),
            true_label: BlockId(1),
            false_label: BlockId(2),
        };
        assert_eq!(t.successors(), vec![BlockId(1), BlockId(2)]);
    }
}
