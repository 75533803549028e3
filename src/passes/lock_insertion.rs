//! Lock-Insertion Pass.
//!
//! Rewrites every storage declaration qualified with *multi-qual* (stack
//! slot or global) so that each object is prefixed by a 64-bit lock word and
//! every use of the original symbol resolves to the non-lock field of the
//! resulting aggregate.

use crate::capabilities;
use crate::common::fx_hash::FxHashSet;
use crate::error::{PassError, PassResult};
use crate::ir::instruction::FieldIndex;
use crate::ir::value::{Const, Operand};
use crate::ir::{Global, Instruction, IrFunction, IrModule, Linkage, Type};

/// Per-rewrite counts surfaced alongside the bare `bool` change indicator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockInsertionStats {
    pub stack_slots_rewritten: usize,
    pub globals_rewritten: usize,
}

impl LockInsertionStats {
    pub fn changed(&self) -> bool {
        self.stack_slots_rewritten > 0 || self.globals_rewritten > 0
    }
}

/// Runs the lock-insertion pass. Returns `true` iff the module was changed.
pub fn run(module: &mut IrModule) -> PassResult<bool> {
    Ok(run_with_stats(module)?.changed())
}

pub fn run_with_stats(module: &mut IrModule) -> PassResult<LockInsertionStats> {
    let mut stats = LockInsertionStats::default();
    for func in module.functions.iter_mut().filter(|f| !f.is_declaration) {
        stats.stack_slots_rewritten += rewrite_stack_slots(func)?;
    }
    stats.globals_rewritten = rewrite_globals(module)?;
    Ok(stats)
}

struct Layout {
    struct_ty: Type,
    lock_field: FieldIndex,
    inner_field: FieldIndex,
}

/// Chooses the locked-aggregate layout for inner type `inner`:
/// `{i64, i64, T}` with the lock at field 1 when `T` is a safe pointer (so
/// the safe-pointer field lands at offset 16, padded out to 16-byte
/// alignment), else `{i64, T}` with the lock at field 0.
fn layout_for(inner: &Type) -> Layout {
    if capabilities::is_safe_ptr(inner) {
        Layout {
            struct_ty: Type::Struct(vec![Type::i64(), Type::i64(), inner.clone()]),
            lock_field: 1,
            inner_field: 2,
        }
    } else {
        Layout { struct_ty: Type::Struct(vec![Type::i64(), inner.clone()]), lock_field: 0, inner_field: 1 }
    }
}

/// Stack-slot rewrite: scans only the entry block, per the
/// IR's guarantee that all `StackAlloc`s reside there.
fn rewrite_stack_slots(func: &mut IrFunction) -> PassResult<usize> {
    func.resync_fresh_ids();
    if func.blocks.is_empty() {
        return Ok(0);
    }

    let old_instructions = std::mem::take(&mut func.blocks[0].instructions);
    let mut new_instructions = Vec::with_capacity(old_instructions.len());
    let mut rewrites = Vec::new();
    let mut count = 0usize;

    for inst in old_instructions {
        match inst {
            Instruction::StackAlloc { dest: old_dest, ty: inner_ty, is_multi_qualified: true } => {
                let layout = layout_for(&inner_ty);
                log::debug!(
                    "lock-insertion: rewriting stack slot {old_dest} (`{inner_ty:?}`) in `{}`",
                    func.name
                );

                let new_alloc = func.fresh_value();
                new_instructions.push(Instruction::StackAlloc {
                    dest: new_alloc,
                    ty: layout.struct_ty.clone(),
                    is_multi_qualified: false,
                });

                let lock_addr = func.fresh_value();
                new_instructions.push(Instruction::AggregateGEP {
                    dest: lock_addr,
                    base: Operand::Value(new_alloc),
                    indices: vec![layout.lock_field],
                    result_ty: Type::i64(),
                });
                new_instructions
                    .push(Instruction::Store { val: Operand::Const(Const::I64(1)), ptr: Operand::Value(lock_addr) });

                let inner_addr = func.fresh_value();
                new_instructions.push(Instruction::AggregateGEP {
                    dest: inner_addr,
                    base: Operand::Value(new_alloc),
                    indices: vec![layout.inner_field],
                    result_ty: inner_ty,
                });

                rewrites.push((old_dest, inner_addr));
                count += 1;
            }
            other => new_instructions.push(other),
        }
    }

    func.blocks[0].instructions = new_instructions;
    for (old, new) in rewrites {
        func.replace_all_uses(old, &Operand::Value(new));
    }
    Ok(count)
}

/// Global rewrite.
fn rewrite_globals(module: &mut IrModule) -> PassResult<usize> {
    let targets: Vec<usize> =
        module.globals.iter().enumerate().filter(|(_, g)| g.is_multi_qualified).map(|(i, _)| i).collect();
    if targets.is_empty() {
        return Ok(0);
    }

    // old name -> (new name, GEP index path to the inner field).
    let mut rename: Vec<(String, String, Vec<FieldIndex>)> = Vec::with_capacity(targets.len());
    let mut new_globals = Vec::with_capacity(targets.len());
    let mut removed: FxHashSet<String> = FxHashSet::default();

    for &idx in &targets {
        let g = &module.globals[idx];
        if g.thread_local {
            return Err(PassError::Precondition {
                pass: "lock-insertion",
                message: format!("thread-local multi-qual global `{}` is not supported", g.name),
                instruction: None,
            });
        }

        let layout = layout_for(&g.ty);
        // Edge case: common linkage must be promoted to external so a
        // non-zero lock initializer can be attached.
        // `has_external_initializer` is preserved regardless.
        let linkage = if g.linkage == Linkage::Common { Linkage::External } else { g.linkage };

        let initializer = g.initializer.as_ref().map(|init| {
            if capabilities::is_safe_ptr(&g.ty) {
                Const::Aggregate(vec![Const::Zero, Const::I64(2), init.clone()])
            } else {
                Const::Aggregate(vec![Const::I64(2), init.clone()])
            }
        });

        let new_name = format!("{}_multiple", g.name);
        log::debug!("lock-insertion: rewriting global `{}` -> `{new_name}` (`{:?}`)", g.name, layout.struct_ty);

        let mut new_global = Global::new(new_name.clone(), layout.struct_ty);
        new_global.is_constant = g.is_constant;
        new_global.linkage = linkage;
        new_global.address_space = g.address_space;
        new_global.thread_local = false;
        new_global.initializer = initializer;
        new_global.has_external_initializer = g.has_external_initializer;
        new_global.alignment = 16;

        rename.push((g.name.clone(), new_name, vec![layout.inner_field]));
        removed.insert(g.name.clone());
        new_globals.push(new_global);
    }

    module.globals.retain(|g| !removed.contains(&g.name));
    module.globals.extend(new_globals);

    for func in &mut module.functions {
        for block in &mut func.blocks {
            for inst in &mut block.instructions {
                for operand in inst.operands_mut() {
                    rewrite_global_operand(operand, &rename);
                }
            }
        }
    }
    for g in &mut module.globals {
        if let Some(init) = &mut g.initializer {
            rewrite_global_const(init, &rename);
        }
    }

    Ok(targets.len())
}

fn rewrite_global_operand(operand: &mut Operand, rename: &[(String, String, Vec<FieldIndex>)]) {
    if let Operand::Const(c) = operand {
        rewrite_global_const(c, rename);
    }
}

/// Replaces every `Const::GlobalAddr` reference to a rewritten global with
/// the constant `AggregateGEP` to its inner field.
fn rewrite_global_const(c: &mut Const, rename: &[(String, String, Vec<FieldIndex>)]) {
    match c {
        Const::GlobalAddr(name) => {
            if let Some((_, new_name, indices)) = rename.iter().find(|(old, _, _)| old == name) {
                *c = Const::GlobalFieldAddr { global: new_name.clone(), indices: indices.clone() };
            }
        }
        Const::Aggregate(fields) => {
            for f in fields {
                rewrite_global_const(f, rename);
            }
        }
        _ => {}
    }
}
