use super::block::BasicBlock;
use super::instruction::{Instruction, Terminator};
use super::value::{BlockId, Operand, Value};
use crate::common::fx_hash::{FxHashMap, FxHashSet};
use crate::ir::types::Type;

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

/// A function: a directed graph of basic blocks with a distinguished entry
/// block. The entry block is always `blocks[0]`; `StackAlloc`s are
/// guaranteed by the host IR to live only there.
#[derive(Debug, Clone, PartialEq)]
pub struct IrFunction {
    pub name: String,
    pub return_type: Type,
    pub params: Vec<Param>,
    pub blocks: Vec<BasicBlock>,
    pub is_variadic: bool,
    pub is_declaration: bool,
    next_value: u32,
    next_block: u32,
}

impl IrFunction {
    pub fn new(name: impl Into<String>, return_type: Type, params: Vec<Param>, is_variadic: bool) -> Self {
        Self {
            name: name.into(),
            return_type,
            params,
            blocks: Vec::new(),
            is_variadic,
            is_declaration: false,
            next_value: 0,
            next_block: 0,
        }
    }

    pub fn declaration(name: impl Into<String>, return_type: Type, params: Vec<Param>, is_variadic: bool) -> Self {
        let mut f = Self::new(name, return_type, params, is_variadic);
        f.is_declaration = true;
        f
    }

    pub fn entry_block(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }

    pub fn entry_block_mut(&mut self) -> Option<&mut BasicBlock> {
        self.blocks.first_mut()
    }

    pub fn entry_label(&self) -> Option<BlockId> {
        self.blocks.first().map(|b| b.label)
    }

    pub fn block_index(&self, label: BlockId) -> Option<usize> {
        self.blocks.iter().position(|b| b.label == label)
    }

    pub fn block(&self, label: BlockId) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.label == label)
    }

    pub fn block_mut(&mut self, label: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.iter_mut().find(|b| b.label == label)
    }

    /// Recomputes the maximum value/block id currently in use and resets the
    /// fresh-id counters past it. Passes that insert new values/blocks call
    /// this once up front rather than tracking a running counter through a
    /// lowering pipeline they did not themselves build.
    pub fn resync_fresh_ids(&mut self) {
        let mut max_value = 0u32;
        for block in &self.blocks {
            for inst in &block.instructions {
                if let Some(Value(id)) = inst.dest() {
                    max_value = max_value.max(id + 1);
                }
            }
        }
        let max_block = self.blocks.iter().map(|b| b.label.0 + 1).max().unwrap_or(0);
        self.next_value = self.next_value.max(max_value);
        self.next_block = self.next_block.max(max_block);
    }

    pub fn fresh_value(&mut self) -> Value {
        let v = Value(self.next_value);
        self.next_value += 1;
        v
    }

    pub fn fresh_block_id(&mut self) -> BlockId {
        let b = BlockId(self.next_block);
        self.next_block += 1;
        b
    }

    /// Splits `label` so that instructions `[0, split_at)` remain under the
    /// original label (now branching unconditionally to a freshly created
    /// successor) and `[split_at, ..)` plus the original terminator move to
    /// that successor. Returns the new successor's label.
    ///
    /// Shared block-surgery primitive for the Block-Splitter pass
    /// and the Check-Removal hoist mode,
    /// both of which isolate a single instruction at the head of its own
    /// block.
    pub fn split_before(&mut self, label: BlockId, split_at: usize) -> BlockId {
        let new_label = self.fresh_block_id();
        let idx = self.block_index(label).expect("split target block must exist");
        let block = &mut self.blocks[idx];
        let tail_instructions = block.instructions.split_off(split_at);
        let old_terminator = std::mem::replace(&mut block.terminator, Terminator::Branch(new_label));
        self.blocks.push(BasicBlock { label: new_label, instructions: tail_instructions, terminator: old_terminator });
        new_label
    }

    /// Predecessors of every block, derived from terminators. Recomputed on
    /// demand (not maintained incrementally) since CFG edits in this crate's
    /// passes are local and infrequent enough that a fresh scan is cheap and
    /// never goes stale.
    pub fn predecessors(&self) -> FxHashMap<BlockId, Vec<BlockId>> {
        let mut preds: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
        for block in &self.blocks {
            preds.entry(block.label).or_default();
        }
        for block in &self.blocks {
            for succ in block.terminator.successors() {
                preds.entry(succ).or_default().push(block.label);
            }
        }
        preds
    }

    /// Replaces every use of `old` across every instruction and terminator
    /// in this function with `new`. This is the function-wide "RAUW" the
    /// lock-insertion and type-harmonization passes rely on.
    pub fn replace_all_uses(&mut self, old: Value, new: &Operand) {
        for block in &mut self.blocks {
            for inst in &mut block.instructions {
                for operand in inst.operands_mut() {
                    if operand.value() == Some(old) {
                        *operand = new.clone();
                    }
                }
            }
            if let Terminator::CondBranch { cond, .. } = &mut block.terminator {
                if cond.value() == Some(old) {
                    *cond = new.clone();
                }
            }
            if let Terminator::Return(Some(op)) = &mut block.terminator {
                if op.value() == Some(old) {
                    *op = new.clone();
                }
            }
        }
    }

    /// All instruction locations (block index, instruction index) that use
    /// `value` as an operand.
    pub fn uses_of(&self, value: Value) -> Vec<(usize, usize)> {
        let mut locs = Vec::new();
        for (bi, block) in self.blocks.iter().enumerate() {
            for (ii, inst) in block.instructions.iter().enumerate() {
                if inst.operands().iter().any(|op| op.value() == Some(value)) {
                    locs.push((bi, ii));
                }
            }
        }
        locs
    }

    /// The set of blocks reachable from the entry block, via terminator
    /// successors only.
    pub fn reachable_blocks(&self) -> FxHashSet<BlockId> {
        let mut reachable = FxHashSet::default();
        let Some(entry) = self.entry_label() else { return reachable };
        let mut worklist = vec![entry];
        reachable.insert(entry);
        while let Some(id) = worklist.pop() {
            if let Some(block) = self.block(id) {
                for succ in block.terminator.successors() {
                    if reachable.insert(succ) {
                        worklist.push(succ);
                    }
                }
            }
        }
        reachable
    }
}
