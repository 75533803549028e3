//! Block-Splitter Pass.
//!
//! Splits basic blocks so that each may-free call (per the Free-Finder's `MayFreeCalls`)
//! is the last instruction before its block's terminator, and nothing else
//! may-free shares that block.

use crate::common::fx_hash::FxHashMap;
use crate::ir::{BasicBlock, BlockId, IrModule, Terminator};
use crate::passes::free_finder::{CallSite, FreeFinderResult};
use indexmap::IndexSet;

#[derive(Debug, Clone, Default)]
pub struct BlockSplitterResult {
    /// Blocks created by this pass whose sole instruction is a may-free
    /// call.
    pub may_free_bbs: IndexSet<(String, BlockId)>,
}

impl BlockSplitterResult {
    pub fn contains(&self, function: &str, block: BlockId) -> bool {
        self.may_free_bbs.contains(&(function.to_string(), block))
    }
}

/// Runs the block-splitter pass. `free_finder` is the Free-Finder's preserved result.
///
/// The worklist is materialized once from `free_finder.may_free_calls` up
/// front and driven from there rather than a fresh scan, since splitting a
/// block does not move or erase the call instruction whose identity each
/// entry tracks.
pub fn run(module: &mut IrModule, free_finder: &FreeFinderResult) -> BlockSplitterResult {
    let mut result = BlockSplitterResult::default();

    // Group the worklist by (function, original block), each sorted
    // ascending by original index: a call's position within whatever block
    // it currently occupies can then be recovered purely arithmetically, by
    // subtracting off how many earlier original instructions have already
    // been peeled into predecessor blocks (see the running `consumed`
    // counter below) — no need to re-locate it by matching instruction
    // content after every split.
    let mut by_function_block: FxHashMap<(&str, BlockId), Vec<usize>> = FxHashMap::default();
    for call in &free_finder.may_free_calls {
        by_function_block.entry((call.function.as_str(), call.block)).or_default().push(call.index);
    }
    for indices in by_function_block.values_mut() {
        indices.sort_unstable();
    }

    for ((function_name, block_label), indices) in by_function_block {
        let Some(func) = module.function_mut(function_name) else { continue };
        func.resync_fresh_ids();

        let mut current_label = block_label;
        let mut consumed = 0usize;
        for idx in indices {
            let pos = idx - consumed;
            let mid_label = split_one(func, current_label, pos);
            result.may_free_bbs.insert((function_name.to_string(), mid_label));
            consumed = idx + 1;
            current_label = func
                .block(mid_label)
                .and_then(|b| match b.terminator {
                    Terminator::Branch(tail) => Some(tail),
                    _ => None,
                })
                .unwrap_or(mid_label);
        }
    }

    result
}

/// Splits the call at relative position `pos` within `block_label` out into
/// its own "may-free block" and returns that block's label.
fn split_one(func: &mut crate::ir::IrFunction, block_label: BlockId, pos: usize) -> BlockId {
    let head_label = if pos > 0 { func.split_before(block_label, pos) } else { block_label };

    let len = func.block(head_label).map(|b| b.instructions.len()).unwrap_or(0);
    if len > 1 {
        func.split_before(head_label, 1);
    }
    head_label
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::{Callee, CallingConv};
    use crate::ir::{Instruction, IrFunction, Operand, Terminator, Type, Value};

    fn void_call(name: &str) -> Instruction {
        Instruction::Call {
            dest: None,
            callee: Callee::Direct(name.to_string()),
            args: vec![],
            ty: Type::Integer(0),
            calling_conv: CallingConv::C,
        }
    }

    fn free_finder_for(function: &str, block: BlockId, index: usize) -> FreeFinderResult {
        let mut r = FreeFinderResult::default();
        r.may_free_fns.insert(function.to_string());
        r.may_free_calls.insert(CallSite { function: function.to_string(), block, index });
        r
    }

    /// Call not already at the head and not already last: both splits fire.
    #[test]
    fn call_in_the_middle_gets_isolated_into_its_own_block() {
        let mut module = IrModule::new("m");
        let mut f = IrFunction::new("f", Type::Integer(0), vec![], false);
        let mut entry = BasicBlock::new(BlockId(0));
        entry.instructions.push(Instruction::Copy { dest: Value(0), src: Operand::Const(crate::ir::Const::Zero) });
        entry.instructions.push(void_call("maybe_free"));
        entry.instructions.push(Instruction::Copy { dest: Value(1), src: Operand::Const(crate::ir::Const::Zero) });
        entry.terminator = Terminator::Return(None);
        f.blocks.push(entry);
        module.functions.push(f);

        let ff = free_finder_for("f", BlockId(0), 1);
        let result = run(&mut module, &ff);

        let f = &module.functions[0];
        assert_eq!(f.blocks.len(), 3, "head, may-free-call block, tail");

        // head: original label, just the first copy, branches to mid.
        let head = f.block(BlockId(0)).unwrap();
        assert_eq!(head.instructions.len(), 1);
        let Terminator::Branch(mid_label) = head.terminator else { panic!("expected branch to mid block") };

        let mid = f.block(mid_label).unwrap();
        assert_eq!(mid.instructions.len(), 1);
        assert!(mid.instructions[0].is_call());
        assert!(result.contains("f", mid_label));
        let Terminator::Branch(tail_label) = mid.terminator else { panic!("expected branch to tail block") };

        let tail = f.block(tail_label).unwrap();
        assert_eq!(tail.instructions.len(), 1);
        assert_eq!(tail.terminator, Terminator::Return(None));
    }

    /// Call already first and already last: no splitting needed, but the
    /// block is still recorded in `MayFreeBBs` — the dataflow pass needs
    /// every block whose tail is a may-free call zeroed out, whether or not
    /// this pass had to do any actual surgery to get there.
    #[test]
    fn solitary_call_needs_no_split() {
        let mut module = IrModule::new("m");
        let mut f = IrFunction::new("f", Type::Integer(0), vec![], false);
        let mut entry = BasicBlock::new(BlockId(0));
        entry.instructions.push(void_call("maybe_free"));
        entry.terminator = Terminator::Return(None);
        f.blocks.push(entry);
        module.functions.push(f);

        let ff = free_finder_for("f", BlockId(0), 0);
        let result = run(&mut module, &ff);

        let f = &module.functions[0];
        assert_eq!(f.blocks.len(), 1, "no new blocks when the call already satisfies I3");
        assert!(result.contains("f", BlockId(0)));
    }

    /// Two may-free calls originally in the same block, in original order.
    #[test]
    fn two_calls_in_one_block_both_get_isolated() {
        let mut module = IrModule::new("m");
        let mut f = IrFunction::new("f", Type::Integer(0), vec![], false);
        let mut entry = BasicBlock::new(BlockId(0));
        entry.instructions.push(void_call("free_a"));
        entry.instructions.push(Instruction::Copy { dest: Value(0), src: Operand::Const(crate::ir::Const::Zero) });
        entry.instructions.push(void_call("free_b"));
        entry.terminator = Terminator::Return(None);
        f.blocks.push(entry);
        module.functions.push(f);

        let mut ff = FreeFinderResult::default();
        ff.may_free_calls.insert(CallSite { function: "f".into(), block: BlockId(0), index: 0 });
        ff.may_free_calls.insert(CallSite { function: "f".into(), block: BlockId(0), index: 2 });

        let result = run(&mut module, &ff);
        let f = &module.functions[0];

        // first call already headed its block: no split needed for it.
        assert!(result.contains("f", BlockId(0)));
        let first = f.block(BlockId(0)).unwrap();
        assert!(first.instructions[0].is_call());
        let Terminator::Branch(mid_of_copy) = first.terminator else { panic!() };

        let copy_block = f.block(mid_of_copy).unwrap();
        assert_eq!(copy_block.instructions.len(), 1);
        assert!(!copy_block.instructions[0].is_call());
        let Terminator::Branch(second_call_block) = copy_block.terminator else { panic!() };

        let second = f.block(second_call_block).unwrap();
        assert!(second.instructions[0].is_call());
        assert_eq!(second.instructions.len(), 1);
        assert!(result.contains("f", second_call_block));
    }
}
