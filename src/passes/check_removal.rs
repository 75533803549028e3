//! Check-Removal Optimization.
//!
//! An intra-procedural dataflow pass that eliminates redundant runtime
//! key-check calls, using the Block-Splitter's `MayFreeBBs` to make worst-case assumptions
//! at may-free call boundaries.

use crate::capabilities;
use crate::common::fx_hash::FxHashSet;
use crate::error::PassResult;
use crate::ir::instruction::{Callee, CallingConv};
use crate::ir::value::{Operand, Value};
use crate::ir::{BasicBlock, BlockId, Global, Instruction, IrFunction, IrModule, Param, Terminator, Type};
use crate::passes::block_splitter::BlockSplitterResult;

/// Whether the optional "add-check-before-call" hoist mode
/// runs before the dataflow analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HoistMode {
    #[default]
    Disabled,
    Enabled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckRemovalStats {
    pub removed: usize,
    pub hoisted: usize,
}

impl CheckRemovalStats {
    pub fn changed(&self) -> bool {
        self.removed > 0 || self.hoisted > 0
    }
}

/// Runs the check-removal pass. `may_free_bbs` is the Block-Splitter's preserved result. Returns `true` iff
/// any check was removed.
pub fn run(module: &mut IrModule, may_free_bbs: &BlockSplitterResult, hoist_mode: HoistMode) -> PassResult<bool> {
    Ok(run_with_stats(module, may_free_bbs, hoist_mode)?.changed())
}

pub fn run_with_stats(
    module: &mut IrModule,
    may_free_bbs: &BlockSplitterResult,
    hoist_mode: HoistMode,
) -> PassResult<CheckRemovalStats> {
    let mut stats = CheckRemovalStats::default();
    if hoist_mode == HoistMode::Enabled {
        stats.hoisted = hoist::insert_pre_call_checks(module);
    }
    for func in module.functions.iter_mut().filter(|f| !f.is_declaration) {
        stats.removed += remove_redundant_checks(func, may_free_bbs);
    }
    Ok(stats)
}

/// Strips a chain of no-op `PointerCast`s to recover the canonical address
/// identity a check call's argument denotes.
fn canonical_address(func: &IrFunction, operand: &Operand) -> Operand {
    let mut cur = operand.clone();
    while let Operand::Value(v) = &cur {
        match find_producer(func, *v) {
            Some(Instruction::PointerCast { value, .. }) => cur = value.clone(),
            _ => break,
        }
    }
    cur
}

fn find_producer(func: &IrFunction, v: Value) -> Option<&Instruction> {
    func.blocks.iter().flat_map(|b| &b.instructions).find(|inst| inst.dest() == Some(v))
}

fn check_call_address(func: &IrFunction, inst: &Instruction) -> Option<Operand> {
    let Instruction::Call { args, .. } = inst else { return None };
    args.first().map(|a| canonical_address(func, a))
}

/// The finite universe of checked addresses a function's dataflow lattice
/// ranges over: every distinct address ever passed to a check call in this
/// function.
fn checked_address_universe(func: &IrFunction) -> FxHashSet<Operand> {
    let mut universe = FxHashSet::default();
    for block in &func.blocks {
        for inst in &block.instructions {
            if capabilities::is_check_call(inst) {
                if let Some(addr) = check_call_address(func, inst) {
                    universe.insert(addr);
                }
            }
        }
    }
    universe
}

/// Per-block effect: a check call adds its argument; a `Store` removes its
/// destination.
fn transfer(func: &IrFunction, block: &BasicBlock, input: &FxHashSet<Operand>) -> FxHashSet<Operand> {
    let mut cur = input.clone();
    for inst in &block.instructions {
        if capabilities::is_check_call(inst) {
            if let Some(addr) = check_call_address(func, inst) {
                cur.insert(addr);
            }
        } else if let Instruction::Store { ptr, .. } = inst {
            cur.remove(&canonical_address(func, ptr));
        }
    }
    cur
}

fn remove_redundant_checks(func: &mut IrFunction, may_free_bbs: &BlockSplitterResult) -> usize {
    if func.blocks.is_empty() {
        return 0;
    }
    let preds = func.predecessors();
    let entry = func.entry_label();
    let universe = checked_address_universe(func);
    let is_mf = |label: BlockId| may_free_bbs.contains(&func.name, label);

    // Standard forward "must" dataflow (available-checks analysis): BBIn
    // starts optimistic (the full universe, i.e. TOP for a meet-by-
    // intersection lattice) everywhere except the entry block and any
    // may-free block, which start at the bottom. The lattice is finite and the per-block
    // transfer is monotonic (only ever adds/removes from a finite set), so
    // this descends to a fixpoint.
    let mut bb_in: std::collections::HashMap<BlockId, FxHashSet<Operand>> = std::collections::HashMap::new();
    let mut bb_out: std::collections::HashMap<BlockId, FxHashSet<Operand>> = std::collections::HashMap::new();

    loop {
        let mut changed = false;
        for block in &func.blocks {
            let label = block.label;
            let new_in = if is_mf(label) || Some(label) == entry {
                FxHashSet::default()
            } else {
                let ps = preds.get(&label).cloned().unwrap_or_default();
                if ps.is_empty() || ps.iter().any(|p| is_mf(*p)) {
                    FxHashSet::default()
                } else {
                    let mut iter = ps.iter();
                    let first = iter.next().expect("non-empty preds");
                    let mut acc = bb_out.get(first).cloned().unwrap_or_else(|| universe.clone());
                    for p in iter {
                        let out_p = bb_out.get(p).cloned().unwrap_or_else(|| universe.clone());
                        acc.retain(|a| out_p.contains(a));
                    }
                    acc
                }
            };
            let new_out = if is_mf(label) { FxHashSet::default() } else { transfer(func, block, &new_in) };

            if bb_in.get(&label) != Some(&new_in) {
                bb_in.insert(label, new_in);
                changed = true;
            }
            if bb_out.get(&label) != Some(&new_out) {
                bb_out.insert(label, new_out);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // Redundancy detection: re-walk
    // each block from its (now-fixed) BBIn, scheduling the second-and-later
    // check on any address for deletion.
    let mut to_delete: Vec<(usize, usize)> = Vec::new();
    for (bidx, block) in func.blocks.iter().enumerate() {
        let mut checked = bb_in.get(&block.label).cloned().unwrap_or_default();
        for (iidx, inst) in block.instructions.iter().enumerate() {
            if capabilities::is_check_call(inst) {
                let Some(addr) = check_call_address(func, inst) else { continue };
                if checked.contains(&addr) {
                    to_delete.push((bidx, iidx));
                } else {
                    checked.insert(addr);
                }
            } else if let Instruction::Store { ptr, .. } = inst {
                checked.remove(&canonical_address(func, ptr));
            }
        }
    }

    let removed = to_delete.len();
    for (bidx, iidx) in to_delete.into_iter().rev() {
        func.blocks[bidx].instructions.remove(iidx);
    }
    removed
}

/// Optional hoist mode: inserts a
/// pre-call null-check plus key-check at every call site that passes a
/// safe-pointer argument, before the dataflow analysis runs. Implemented as
/// a straight IR rewrite rather than a special dataflow seed: the inserted
/// checks are ordinary `Call` instructions, so the standard forward
/// dataflow above picks them up for free once they exist in the block.
mod hoist {
    use super::*;
    use crate::capabilities::value_type;
    use crate::common::fx_hash::FxHashMap;

    pub fn insert_pre_call_checks(module: &mut IrModule) -> usize {
        let globals = module.globals.clone();
        let module_name = module.name.clone();
        let mut inserted = 0;
        for func in module.functions.iter_mut().filter(|f| !f.is_declaration) {
            inserted += insert_in_function(func, &globals, &module_name);
        }
        ensure_check_declarations(module);
        inserted
    }

    /// One detected safe-pointer argument group within a call's argument
    /// list: `(start_index_in_args, arg_count, aggregate_type)`.
    type Group = (usize, usize, Type);

    fn detect_safe_ptr_groups(globals: &[Global], func: &IrFunction, args: &[Operand]) -> Vec<Group> {
        let mut groups = Vec::new();
        let mut i = 0;
        while i < args.len() {
            let Some(Type::Pointer { pointee, .. }) = value_type(globals, func, &args[i]) else {
                i += 1;
                continue;
            };
            // array-ptr shape first: pointer, i64, pointer-to-i64.
            if i + 2 < args.len()
                && value_type(globals, func, &args[i + 1]) == Some(Type::i64())
                && value_type(globals, func, &args[i + 2]) == Some(Type::ptr(Type::i64()))
            {
                let agg = Type::Struct(vec![Type::ptr((*pointee).clone()), Type::i64(), Type::ptr(Type::i64())]);
                groups.push((i, 3, agg));
                i += 3;
                continue;
            }
            if i + 1 < args.len() && value_type(globals, func, &args[i + 1]) == Some(Type::i64()) {
                let agg = Type::Struct(vec![Type::ptr((*pointee).clone()), Type::i64()]);
                groups.push((i, 2, agg));
                i += 2;
                continue;
            }
            i += 1;
        }
        groups
    }

    /// Traces a safe-pointer argument's raw-pointer value back to the
    /// address of the aggregate it was extracted/loaded from. Returns `None` (leaving that argument
    /// unchecked) when the producer chain doesn't match either recognized
    /// shape.
    fn locate_aggregate_address(func: &mut IrFunction, raw_ptr: &Operand) -> Option<Operand> {
        let v = raw_ptr.value()?;
        let (pbi, pii) = find_producer_loc(func, v)?;
        match func.blocks[pbi].instructions[pii].clone() {
            Instruction::ExtractField { aggregate, index: 0, .. } => {
                let agg_v = aggregate.value()?;
                let (abi, aii) = find_producer_loc(func, agg_v)?;
                match func.blocks[abi].instructions[aii].clone() {
                    Instruction::Load { ptr, .. } => Some(ptr),
                    Instruction::Call { dest: Some(_), ty, .. } => spill_to_stack_slot(func, agg_v, ty, abi, aii),
                    _ => None,
                }
            }
            Instruction::Load { ptr, .. } => {
                let gep_v = ptr.value()?;
                let (gbi, gii) = find_producer_loc(func, gep_v)?;
                match &func.blocks[gbi].instructions[gii] {
                    Instruction::AggregateGEP { base, .. } => Some(base.clone()),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Spills a call-returned aggregate to a fresh entry-block stack slot so
    /// it has an address to check against. Declines (returns `None`) when the call result's own
    /// block is the entry block, since inserting the spill's `StackAlloc`
    /// ahead of an existing entry-block instruction would shift indices
    /// this pass's caller is still relying on mid-traversal; that call site
    /// is simply left unchecked by hoist mode.
    fn spill_to_stack_slot(
        func: &mut IrFunction,
        call_result: Value,
        agg_ty: Type,
        call_block_idx: usize,
        call_inst_idx: usize,
    ) -> Option<Operand> {
        if func.entry_label() == Some(func.blocks[call_block_idx].label) {
            return None;
        }
        func.resync_fresh_ids();
        let slot = func.fresh_value();
        let leading_allocas =
            func.blocks[0].instructions.iter().take_while(|i| matches!(i, Instruction::StackAlloc { .. })).count();
        func.blocks[0]
            .instructions
            .insert(leading_allocas, Instruction::StackAlloc { dest: slot, ty: agg_ty, is_multi_qualified: false });
        func.blocks[call_block_idx].instructions.insert(
            call_inst_idx + 1,
            Instruction::Store { val: Operand::Value(call_result), ptr: Operand::Value(slot) },
        );
        Some(Operand::Value(slot))
    }

    fn find_producer_loc(func: &IrFunction, v: Value) -> Option<(usize, usize)> {
        for (bi, block) in func.blocks.iter().enumerate() {
            for (ii, inst) in block.instructions.iter().enumerate() {
                if inst.dest() == Some(v) {
                    return Some((bi, ii));
                }
            }
        }
        None
    }

    fn check_helper_name(agg_ty: &Type, module_name: &str) -> String {
        let [single, array] = crate::capabilities::module_check_helper_names(module_name);
        match agg_ty {
            Type::Struct(fields) if fields.len() == 3 => array,
            _ => single,
        }
    }

    /// Splits `call_block` before its own call, inserts a null-check on
    /// `address`'s raw-pointer field, and on the non-null branch a check
    /// call, rejoining at the (relocated) call block. Returns the call's
    /// new block label.
    fn insert_one_check(func: &mut IrFunction, call_block: BlockId, address: Operand, agg_ty: Type, module_name: &str) -> BlockId {
        let Type::Struct(fields) = &agg_ty else { unreachable!("safe-pointer aggregate is always a Struct") };
        let raw_ty = fields[0].clone();

        let new_call_block = func.split_before(call_block, 0);

        let gep_dest = func.fresh_value();
        let load_dest = func.fresh_value();
        let isnull_dest = func.fresh_value();
        let check_block_label = func.fresh_block_id();

        let head_idx = func.block_index(call_block).expect("head block must exist");
        func.blocks[head_idx].instructions.push(Instruction::AggregateGEP {
            dest: gep_dest,
            base: address.clone(),
            indices: vec![0],
            result_ty: raw_ty.clone(),
        });
        func.blocks[head_idx]
            .instructions
            .push(Instruction::Load { dest: load_dest, ty: raw_ty, ptr: Operand::Value(gep_dest) });
        func.blocks[head_idx]
            .instructions
            .push(Instruction::IsNull { dest: isnull_dest, ptr: Operand::Value(load_dest) });
        func.blocks[head_idx].terminator = Terminator::CondBranch {
            cond: Operand::Value(isnull_dest),
            true_label: new_call_block,
            false_label: check_block_label,
        };

        let check_call = Instruction::Call {
            dest: None,
            callee: Callee::Direct(check_helper_name(&agg_ty, module_name)),
            args: vec![address],
            ty: Type::Integer(0),
            calling_conv: CallingConv::Fast,
        };
        func.blocks.push(BasicBlock {
            label: check_block_label,
            instructions: vec![check_call],
            terminator: Terminator::Branch(new_call_block),
        });

        new_call_block
    }

    fn insert_in_function(func: &mut IrFunction, globals: &[Global], module_name: &str) -> usize {
        func.resync_fresh_ids();

        struct Site {
            index: usize,
            groups: Vec<Group>,
        }
        let mut by_block: FxHashMap<BlockId, Vec<Site>> = FxHashMap::default();
        for block in &func.blocks {
            for (index, inst) in block.instructions.iter().enumerate() {
                let Instruction::Call { args, .. } = inst else { continue };
                let groups = detect_safe_ptr_groups(globals, func, args);
                if !groups.is_empty() {
                    by_block.entry(block.label).or_default().push(Site { index, groups });
                }
            }
        }
        for sites in by_block.values_mut() {
            sites.sort_by_key(|s| s.index);
        }

        let mut inserted = 0usize;
        for (block_label, sites) in by_block {
            let mut current_label = block_label;
            let mut consumed = 0usize;
            for site in sites {
                let pos = site.index - consumed;
                if pos > 0 {
                    current_label = func.split_before(current_label, pos);
                }
                for (arg_start, _arg_count, agg_ty) in site.groups {
                    let call = func.block(current_label).expect("call must have been relocated here").instructions[0]
                        .clone();
                    let Instruction::Call { args, .. } = &call else {
                        unreachable!("relocated instruction must still be the call")
                    };
                    let raw_ptr = args[arg_start].clone();
                    match locate_aggregate_address(func, &raw_ptr) {
                        Some(address) => {
                            current_label = insert_one_check(func, current_label, address, agg_ty, module_name);
                            inserted += 1;
                        }
                        None => {
                            log::warn!(
                                "check-removal hoist: could not locate the aggregate address for a \
                                 safe-pointer call argument in `{}`, leaving it unchecked",
                                func.name
                            );
                        }
                    }
                }
                consumed = site.index + 1;
            }
        }
        inserted
    }

    fn ensure_check_declarations(module: &mut IrModule) {
        let [single_name, array_name] = crate::capabilities::module_check_helper_names(&module.name);
        if module.function(&single_name).is_none() {
            let sig = Type::ptr(Type::Struct(vec![Type::ptr(Type::i8()), Type::i64()]));
            module.functions.push(IrFunction::declaration(
                single_name,
                Type::Integer(0),
                vec![Param { name: "p".to_string(), ty: sig }],
                false,
            ));
        }
        if module.function(&array_name).is_none() {
            let sig = Type::ptr(Type::Struct(vec![Type::ptr(Type::i8()), Type::i64(), Type::ptr(Type::i64())]));
            module.functions.push(IrFunction::declaration(
                array_name,
                Type::Integer(0),
                vec![Param { name: "p".to_string(), ty: sig }],
                false,
            ));
        }
    }
}
