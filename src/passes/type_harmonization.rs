//! Type-Harmonization Pass.
//!
//! Repairs ill-formed load/store instructions that arise because the
//! front-end silently mutates the observed type of a safe-pointer SSA value
//! between its aggregate form and a raw-pointer form at certain dereference
//! sites. Processes one function at a time; no cross-function
//! state.

use crate::capabilities::value_type;
use crate::error::{PassError, PassResult};
use crate::ir::types::struct_is_safe_ptr_shape;
use crate::ir::value::{Operand, Value};
use crate::ir::{Global, Instruction, IrFunction, IrModule, Terminator, Type};

pub fn run(module: &mut IrModule) -> PassResult<bool> {
    let globals = module.globals.clone();
    let mut changed = false;
    for func in module.functions.iter_mut().filter(|f| !f.is_declaration) {
        changed |= harmonize_function(func, &globals)?;
    }
    Ok(changed)
}

fn harmonize_function(func: &mut IrFunction, globals: &[Global]) -> PassResult<bool> {
    let mut changed = false;
    while let Some((bi, ii, fields)) = find_ill_formed_load(func, globals) {
        repair_ill_formed_load(func, bi, ii, fields);
        changed = true;
    }
    while let Some((bi, ii, fields)) = find_ill_formed_store(func, globals)? {
        repair_ill_formed_store(func, bi, ii, fields)?;
        changed = true;
    }
    Ok(changed)
}

/// An ill-formed load: `ptr`'s pointee is a safe-pointer aggregate
/// (`{raw, key[, keylock]}`) but the load's declared value type is the raw
/// pointer field's type.
fn find_ill_formed_load(func: &IrFunction, globals: &[Global]) -> Option<(usize, usize, Vec<Type>)> {
    for (bi, block) in func.blocks.iter().enumerate() {
        for (ii, inst) in block.instructions.iter().enumerate() {
            let Instruction::Load { ty, ptr, .. } = inst else { continue };
            let Some(Type::Pointer { pointee, .. }) = value_type(globals, func, ptr) else { continue };
            let Type::Struct(fields) = *pointee else { continue };
            if struct_is_safe_ptr_shape(&fields) && *ty == fields[0] {
                return Some((bi, ii, fields));
            }
        }
    }
    None
}

fn repair_ill_formed_load(func: &mut IrFunction, bi: usize, ii: usize, agg_fields: Vec<Type>) {
    let agg_ty = Type::Struct(agg_fields);
    let Instruction::Load { dest: old_dest, ty: raw_ty, ptr } = func.blocks[bi].instructions[ii].clone() else {
        unreachable!("location must point at a Load")
    };

    func.resync_fresh_ids();
    log::debug!("type-harmonization: repairing ill-formed load {old_dest} in `{}`", func.name);

    let raw_field_addr = func.fresh_value();
    let gep = Instruction::AggregateGEP {
        dest: raw_field_addr,
        base: ptr.clone(),
        indices: vec![0],
        result_ty: raw_ty.clone(),
    };
    let raw_load_dest = func.fresh_value();
    let raw_load = Instruction::Load { dest: raw_load_dest, ty: raw_ty, ptr: Operand::Value(raw_field_addr) };

    // Only synthesize the whole-aggregate load if some user actually
    // consumes the original load as an aggregate.
    let has_aggregate_user = func.uses_of(old_dest).iter().any(|&(b, i)| {
        matches!(
            &func.blocks[b].instructions[i],
            Instruction::ExtractField { aggregate, .. } | Instruction::InsertField { aggregate, .. }
                if aggregate.value() == Some(old_dest)
        )
    });

    let mut replacement = vec![gep, raw_load];
    let agg_load_dest = if has_aggregate_user {
        let dest = func.fresh_value();
        replacement.push(Instruction::Load { dest, ty: agg_ty, ptr: ptr.clone() });
        Some(dest)
    } else {
        None
    };

    func.blocks[bi].instructions.splice(ii..=ii, replacement);
    retarget_split_uses(func, old_dest, raw_load_dest, agg_load_dest);
}

/// Rewrites every use of `old` (the erased ill-formed load's result):
/// `ExtractField`/`InsertField` users that consumed it as an aggregate are
/// repointed to `agg` (which must be `Some` when such a user exists); every
/// other user is repointed to the plain raw-pointer load `raw`.
fn retarget_split_uses(func: &mut IrFunction, old: Value, raw: Value, agg: Option<Value>) {
    for block in &mut func.blocks {
        for inst in &mut block.instructions {
            match inst {
                Instruction::ExtractField { aggregate, .. } | Instruction::InsertField { aggregate, .. }
                    if aggregate.value() == Some(old) =>
                {
                    *aggregate = Operand::Value(agg.expect("aggregate user without a synthesized aggregate load"));
                }
                _ => {
                    for operand in inst.operands_mut() {
                        if operand.value() == Some(old) {
                            *operand = Operand::Value(raw);
                        }
                    }
                }
            }
        }
        match &mut block.terminator {
            Terminator::CondBranch { cond, .. } if cond.value() == Some(old) => *cond = Operand::Value(raw),
            Terminator::Return(Some(op)) if op.value() == Some(old) => *op = Operand::Value(raw),
            _ => {}
        }
    }
}

/// An ill-formed store: `ptr`'s pointee is an array-ptr aggregate but the
/// value operand's resolved type does not match it. The value's producer
/// must be an `InsertField`; anything else is a precondition failure.
fn find_ill_formed_store(
    func: &IrFunction,
    globals: &[Global],
) -> PassResult<Option<(usize, usize, Vec<Type>)>> {
    for (bi, block) in func.blocks.iter().enumerate() {
        for (ii, inst) in block.instructions.iter().enumerate() {
            let Instruction::Store { val, ptr } = inst else { continue };
            let Some(Type::Pointer { pointee, .. }) = value_type(globals, func, ptr) else { continue };
            let Type::Struct(fields) = *pointee else { continue };
            if !struct_is_safe_ptr_shape(&fields) || fields.len() != 3 {
                continue; // array-ptr aggregates only (3 fields).
            }
            let agg_ty = Type::Struct(fields.clone());
            if value_type(globals, func, val) == Some(agg_ty) {
                continue; // already well-formed.
            }
            let Some(val_value) = val.value() else { continue };
            let Some((pbi, pii)) = producer_location(func, val_value) else { continue };
            if !matches!(func.blocks[pbi].instructions[pii], Instruction::InsertField { .. }) {
                return Err(PassError::Precondition {
                    pass: "type-harmonization",
                    message: format!(
                        "ill-formed store's value operand `{val_value}` is not produced by InsertField"
                    ),
                    instruction: Some(inst.clone()),
                });
            }
            return Ok(Some((bi, ii, fields)));
        }
    }
    Ok(None)
}

fn producer_location(func: &IrFunction, value: Value) -> Option<(usize, usize)> {
    for (bi, block) in func.blocks.iter().enumerate() {
        for (ii, inst) in block.instructions.iter().enumerate() {
            if inst.dest() == Some(value) {
                return Some((bi, ii));
            }
        }
    }
    None
}

fn repair_ill_formed_store(
    func: &mut IrFunction,
    bi: usize,
    ii: usize,
    agg_fields: Vec<Type>,
) -> PassResult<()> {
    let agg_ty = Type::Struct(agg_fields.clone());
    let raw_ty = agg_fields[0].clone();

    let Instruction::Store { val, .. } = func.blocks[bi].instructions[ii].clone() else {
        unreachable!("location must point at a Store")
    };
    let val_value = val.value().ok_or_else(|| PassError::Precondition {
        pass: "type-harmonization",
        message: "ill-formed store's value operand is a constant, not an InsertField result".to_string(),
        instruction: None,
    })?;
    let (pbi, pii) = producer_location(func, val_value).ok_or_else(|| PassError::Precondition {
        pass: "type-harmonization",
        message: format!("no producer instruction found for `{val_value}`"),
        instruction: None,
    })?;

    match &mut func.blocks[pbi].instructions[pii] {
        Instruction::InsertField { ty, .. } => *ty = agg_ty,
        other => {
            return Err(PassError::Precondition {
                pass: "type-harmonization",
                message: format!("ill-formed store's value operand is not produced by InsertField: {other}"),
                instruction: Some(other.clone()),
            })
        }
    }

    func.resync_fresh_ids();
    let extracted = func.fresh_value();
    log::debug!("type-harmonization: repairing ill-formed store of `{val_value}` in `{}`", func.name);
    func.blocks[bi].instructions.insert(
        ii,
        Instruction::ExtractField { dest: extracted, aggregate: Operand::Value(val_value), index: 0, ty: raw_ty },
    );

    for block in &mut func.blocks {
        for inst in &mut block.instructions {
            if let Instruction::Load { ptr, .. } = inst {
                if ptr.value() == Some(val_value) {
                    *ptr = Operand::Value(extracted);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, BlockId};

    fn single_ptr_aggregate() -> Type {
        Type::Struct(vec![Type::ptr(Type::i64()), Type::i64()])
    }

    /// An ill-formed load is replaced by a raw-pointer-field GEP plus a load
    /// of the raw pointer type.
    #[test]
    fn ill_formed_load_is_split_into_gep_and_raw_load() {
        let mut module = IrModule::new("m");
        let mut f = IrFunction::new("f", Type::Integer(0), vec![], false);
        let mut entry = BasicBlock::new(BlockId(0));
        let agg = single_ptr_aggregate();
        let slot = Value(0);
        entry.instructions.push(Instruction::StackAlloc { dest: slot, ty: agg.clone(), is_multi_qualified: false });
        let bad_load = Value(1);
        entry.instructions.push(Instruction::Load {
            dest: bad_load,
            ty: Type::ptr(Type::i64()),
            ptr: Operand::Value(slot),
        });
        entry.instructions.push(Instruction::Store { val: Operand::Value(bad_load), ptr: Operand::Value(slot) });
        entry.terminator = Terminator::Return(None);
        f.blocks.push(entry);
        module.functions.push(f);

        let changed = run(&mut module).unwrap();
        assert!(changed);

        let entry = &module.functions[0].blocks[0];
        assert!(matches!(entry.instructions[0], Instruction::StackAlloc { .. }));
        let Instruction::AggregateGEP { indices, result_ty, .. } = &entry.instructions[1] else {
            panic!("expected raw-field gep")
        };
        assert_eq!(indices, &vec![0]);
        assert_eq!(*result_ty, Type::ptr(Type::i64()));
        let Instruction::Load { ty: raw_ty, .. } = &entry.instructions[2] else { panic!("expected raw load") };
        assert_eq!(*raw_ty, Type::ptr(Type::i64()));

        // the trailing store now consumes the raw-pointer load, not the erased one.
        let Instruction::Store { val, .. } = &entry.instructions[3] else { panic!("expected store") };
        assert_ne!(val.value(), Some(bad_load));
    }

    /// An ill-formed load whose result feeds ExtractField/InsertField users
    /// also gets a synthesized whole-aggregate load for those users.
    #[test]
    fn ill_formed_load_with_aggregate_users_gets_a_whole_aggregate_load() {
        let mut module = IrModule::new("m");
        let mut f = IrFunction::new("f", Type::Integer(0), vec![], false);
        let mut entry = BasicBlock::new(BlockId(0));
        let agg = single_ptr_aggregate();
        let slot = Value(0);
        entry.instructions.push(Instruction::StackAlloc { dest: slot, ty: agg.clone(), is_multi_qualified: false });

        let bad_load = Value(1);
        entry.instructions.push(Instruction::Load {
            dest: bad_load,
            ty: Type::ptr(Type::i64()),
            ptr: Operand::Value(slot),
        });
        let extracted = Value(2);
        entry.instructions.push(Instruction::ExtractField {
            dest: extracted,
            aggregate: Operand::Value(bad_load),
            index: 0,
            ty: Type::ptr(Type::i64()),
        });
        let gepd = Value(3);
        entry.instructions.push(Instruction::AggregateGEP {
            dest: gepd,
            base: Operand::Value(extracted),
            indices: vec![],
            result_ty: Type::i64(),
        });
        let inserted = Value(4);
        entry.instructions.push(Instruction::InsertField {
            dest: inserted,
            aggregate: Operand::Value(bad_load),
            index: 0,
            value: Operand::Value(gepd),
            ty: agg.clone(),
        });
        entry.terminator = Terminator::Return(None);
        f.blocks.push(entry);
        module.functions.push(f);

        assert!(run(&mut module).unwrap());

        let entry = &module.functions[0].blocks[0];
        // gep, raw load, aggregate load, then ExtractField/.../InsertField.
        assert!(matches!(entry.instructions[2], Instruction::Load { .. }));
        let Instruction::Load { ty: agg_load_ty, .. } = &entry.instructions[2] else { unreachable!() };
        assert_eq!(*agg_load_ty, agg);

        let extract_pos = entry
            .instructions
            .iter()
            .position(|i| matches!(i, Instruction::ExtractField { .. }))
            .unwrap();
        let Instruction::ExtractField { aggregate, .. } = &entry.instructions[extract_pos] else { unreachable!() };
        // must now consume the whole-aggregate load, not the erased ill-formed load.
        assert_eq!(aggregate.value(), entry.instructions[2].dest());
    }

    /// A well-formed load is left untouched.
    #[test]
    fn well_formed_load_is_untouched() {
        let mut module = IrModule::new("m");
        let mut f = IrFunction::new("f", Type::Integer(0), vec![], false);
        let mut entry = BasicBlock::new(BlockId(0));
        let slot = Value(0);
        entry.instructions.push(Instruction::StackAlloc { dest: slot, ty: Type::i64(), is_multi_qualified: false });
        entry.instructions.push(Instruction::Load { dest: Value(1), ty: Type::i64(), ptr: Operand::Value(slot) });
        entry.terminator = Terminator::Return(None);
        f.blocks.push(entry);
        module.functions.push(f);

        assert!(!run(&mut module).unwrap());
    }

    fn array_ptr_aggregate() -> Type {
        Type::Struct(vec![Type::ptr(Type::i64()), Type::i64(), Type::ptr(Type::i64())])
    }

    /// Ill-formed store arising from `*++p` on an array-ptr: the stored
    /// value is produced by an `InsertField` the front-end mis-typed as the
    /// raw array-ptr rather than the aggregate.
    #[test]
    fn ill_formed_store_retags_producer_and_rewrites_dependent_loads() {
        let mut module = IrModule::new("m");
        let mut f = IrFunction::new("f", Type::Integer(0), vec![], false);
        let mut entry = BasicBlock::new(BlockId(0));
        let agg = array_ptr_aggregate();
        let slot = Value(0);
        entry.instructions.push(Instruction::StackAlloc { dest: slot, ty: agg.clone(), is_multi_qualified: false });

        // some prior aggregate value, and a mis-typed InsertField producing
        // the "incremented" safe pointer (front-end declares it as the raw
        // `ArrayPtr` type rather than the true aggregate type).
        let base_agg = Value(1);
        entry.instructions.push(Instruction::Load { dest: base_agg, ty: agg.clone(), ptr: Operand::Value(slot) });
        let inserted = Value(2);
        entry.instructions.push(Instruction::InsertField {
            dest: inserted,
            aggregate: Operand::Value(base_agg),
            index: 0,
            value: Operand::Const(crate::ir::value::Const::Null),
            ty: Type::ArrayPtr(Box::new(Type::i64())), // mis-typed: should be `agg`.
        });
        entry.instructions.push(Instruction::Store { val: Operand::Value(inserted), ptr: Operand::Value(slot) });
        // a dependent load elsewhere that dereferences the incremented pointer.
        let dependent = Value(3);
        entry.instructions.push(Instruction::Load { dest: dependent, ty: Type::i64(), ptr: Operand::Value(inserted) });
        entry.terminator = Terminator::Return(None);
        f.blocks.push(entry);
        module.functions.push(f);

        assert!(run(&mut module).unwrap());

        let entry = &module.functions[0].blocks[0];
        let insert_pos = entry.instructions.iter().position(|i| matches!(i, Instruction::InsertField { .. })).unwrap();
        let Instruction::InsertField { ty, .. } = &entry.instructions[insert_pos] else { unreachable!() };
        assert_eq!(*ty, agg, "producer's declared type must be re-tagged to the aggregate");

        // an ExtractField must now sit immediately before the store.
        let store_pos = entry.instructions.iter().position(|i| matches!(i, Instruction::Store { .. })).unwrap();
        let Instruction::ExtractField { dest: extracted, aggregate, index, .. } = &entry.instructions[store_pos - 1]
        else {
            panic!("expected ExtractField immediately before the store")
        };
        assert_eq!(*index, 0);
        assert_eq!(aggregate.value(), Some(inserted));

        // the store itself still carries the (now correctly typed) aggregate.
        let Instruction::Store { val, .. } = &entry.instructions[store_pos] else { unreachable!() };
        assert_eq!(val.value(), Some(inserted));

        // the dependent load must now consume the extracted raw pointer.
        let load_pos = entry.instructions.iter().rposition(|i| matches!(i, Instruction::Load { .. })).unwrap();
        let Instruction::Load { ptr, .. } = &entry.instructions[load_pos] else { unreachable!() };
        assert_eq!(ptr.value(), Some(*extracted));
    }
}
