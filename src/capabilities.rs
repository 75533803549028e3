//! IR capability layer.
//!
//! A thin, read-only set of predicates and helpers over the IR. No
//! pass-specific logic and no side effects: every other pass module in this
//! crate is built on top of these predicates rather than re-deriving them.

use crate::ir::{Global, IrFunction, Linkage, Operand, Type};
use crate::ir::instruction::{Callee, Instruction};
use crate::ir::value::Const;

pub fn is_single_ptr(ty: &Type) -> bool {
    ty.is_single_ptr()
}

pub fn is_array_ptr(ty: &Type) -> bool {
    ty.is_array_ptr()
}

/// `is_safe_ptr(t) ≡ is_single_ptr(t) ∨ is_array_ptr(t)`.
pub fn is_safe_ptr(ty: &Type) -> bool {
    ty.is_safe_ptr()
}

pub fn is_multi_qualified_stack_alloc(inst: &Instruction) -> bool {
    matches!(inst, Instruction::StackAlloc { is_multi_qualified: true, .. })
}

pub fn is_multi_qualified_global(global: &Global) -> bool {
    global.is_multi_qualified
}

/// The runtime-recognized key-check helper kind a call targets, if it is
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Single,
    Array,
}

const SINGLE_PTR_CHECK: &str = "MMPtrKeyCheck";
const ARRAY_PTR_CHECK: &str = "MMArrayPtrKeyCheck";

/// Whether `name` is either the bare helper name or a per-module variant of
/// it (`<module>_<helper>`),.
fn matches_check_symbol(name: &str, helper: &str) -> bool {
    name == helper || name.ends_with(&format!("_{helper}"))
}

pub fn is_check_call(inst: &Instruction) -> bool {
    check_kind(inst).is_some()
}

pub fn check_kind(inst: &Instruction) -> Option<CheckKind> {
    let Instruction::Call { callee: Callee::Direct(name), .. } = inst else { return None };
    if matches_check_symbol(name, SINGLE_PTR_CHECK) {
        Some(CheckKind::Single)
    } else if matches_check_symbol(name, ARRAY_PTR_CHECK) {
        Some(CheckKind::Array)
    } else {
        None
    }
}

/// The per-module key-check helper names augmenting the non-freeing
/// whitelist: `<module>_MMPtrKeyCheck` and
/// `<module>_MMArrayPtrKeyCheck`.
pub fn module_check_helper_names(module_name: &str) -> [String; 2] {
    [format!("{module_name}_{SINGLE_PTR_CHECK}"), format!("{module_name}_{ARRAY_PTR_CHECK}")]
}

/// Whether `func` is one of this module's own key-check helper functions.
pub fn is_check_helper_function(func: &IrFunction, module_name: &str) -> bool {
    module_check_helper_names(module_name).iter().any(|n| n == &func.name)
        || func.name == SINGLE_PTR_CHECK
        || func.name == ARRAY_PTR_CHECK
}

pub fn pointee_of(ty: &Type) -> Option<&Type> {
    ty.pointee()
}

/// The element type of a raw pointer type, i.e. `T` for `Pointer(T)`. Unlike
/// [`pointee_of`], this does not unwrap safe-pointer types — it is used at
/// Load/Store sites where the pointer operand's type must already be a raw
/// `Pointer`.
pub fn element_type_of_pointer(ty: &Type) -> Option<&Type> {
    match ty {
        Type::Pointer { pointee, .. } => Some(pointee),
        _ => None,
    }
}

pub fn address_space_of(global: &Global) -> u32 {
    global.address_space
}

pub fn linkage_of(global: &Global) -> Linkage {
    global.linkage
}

pub fn has_common_linkage(global: &Global) -> bool {
    global.linkage == Linkage::Common
}

pub fn has_initializer(global: &Global) -> bool {
    global.initializer.is_some()
}

pub fn set_linkage(global: &mut Global, linkage: Linkage) {
    global.linkage = linkage;
}

pub fn set_alignment(global: &mut Global, alignment: u32) {
    global.alignment = alignment;
}

/// The static type of `operand`, resolved by walking back to its producer
/// instruction (or, for a constant, to the global/literal it denotes).
///
/// Used by the Type-Harmonization pass to compare a `Load`/`Store`'s
/// declared value type against the type its pointer operand actually points
/// to, and by the Check-Removal pass's hoist mode to recognize
/// a safe-pointer argument's producer. Returns `None` when
/// the operand has no statically resolvable type in this crate's simplified
/// IR (e.g. a bare function parameter, which carries no producer
/// instruction) — callers treat `None` conservatively, i.e. they do not
/// rewrite what they cannot type.
pub fn value_type(globals: &[Global], func: &IrFunction, operand: &Operand) -> Option<Type> {
    match operand {
        Operand::Const(c) => const_type(globals, c),
        Operand::Value(v) => producer_type(globals, func, *v),
    }
}

fn const_type(globals: &[Global], c: &Const) -> Option<Type> {
    match c {
        Const::I64(_) => Some(Type::Integer(64)),
        Const::I32(_) => Some(Type::Integer(32)),
        Const::Zero | Const::Aggregate(_) | Const::Null => None,
        Const::GlobalAddr(name) => globals.iter().find(|g| g.name == *name).map(|g| Type::ptr(g.ty.clone())),
        Const::GlobalFieldAddr { global, indices } => {
            let g = globals.iter().find(|gl| gl.name == *global)?;
            let mut cur = &g.ty;
            for &idx in indices {
                match cur {
                    Type::Struct(fields) => cur = fields.get(idx as usize)?,
                    _ => return None,
                }
            }
            Some(Type::ptr(cur.clone()))
        }
    }
}

fn producer_type(globals: &[Global], func: &IrFunction, v: crate::ir::Value) -> Option<Type> {
    for block in &func.blocks {
        for inst in &block.instructions {
            if inst.dest() != Some(v) {
                continue;
            }
            return match inst {
                Instruction::StackAlloc { ty, .. } => Some(Type::ptr(ty.clone())),
                Instruction::Load { ty, .. } => Some(ty.clone()),
                Instruction::AggregateGEP { result_ty, .. } => Some(Type::ptr(result_ty.clone())),
                Instruction::ExtractField { ty, .. } => Some(ty.clone()),
                Instruction::InsertField { ty, .. } => Some(ty.clone()),
                Instruction::Call { ty, .. } => Some(ty.clone()),
                Instruction::PointerCast { ty, .. } => Some(ty.clone()),
                Instruction::Copy { src, .. } => value_type(globals, func, src),
                Instruction::Phi { ty, .. } => Some(ty.clone()),
                Instruction::IsNull { .. } => Some(Type::Integer(1)),
                Instruction::Store { .. } => None,
            };
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CallingConv, Value};

    fn check_call(name: &str) -> Instruction {
        Instruction::Call {
            dest: None,
            callee: Callee::Direct(name.to_string()),
            args: vec![],
            ty: Type::Integer(0),
            calling_conv: CallingConv::Fast,
        }
    }

    #[test]
    fn recognizes_bare_and_per_module_check_names() {
        assert_eq!(check_kind(&check_call("MMPtrKeyCheck")), Some(CheckKind::Single));
        assert_eq!(check_kind(&check_call("MMArrayPtrKeyCheck")), Some(CheckKind::Array));
        assert_eq!(check_kind(&check_call("foo_MMPtrKeyCheck")), Some(CheckKind::Single));
        assert_eq!(check_kind(&check_call("foo_MMArrayPtrKeyCheck")), Some(CheckKind::Array));
        assert_eq!(check_kind(&check_call("malloc")), None);
    }

    #[test]
    fn non_call_is_never_a_check() {
        let copy = Instruction::Copy { dest: Value(0), src: crate::ir::Operand::Const(crate::ir::Const::Zero) };
        assert!(!is_check_call(&copy));
    }

    #[test]
    fn safe_ptr_predicate_matches_either_kind() {
        let single = Type::SinglePtr(Box::new(Type::i64()));
        let array = Type::ArrayPtr(Box::new(Type::i64()));
        let plain = Type::i64();
        assert!(is_safe_ptr(&single) && is_single_ptr(&single) && !is_array_ptr(&single));
        assert!(is_safe_ptr(&array) && is_array_ptr(&array) && !is_single_ptr(&array));
        assert!(!is_safe_ptr(&plain));
    }

    #[test]
    fn value_type_resolves_through_a_producer_chain() {
        use crate::ir::{BasicBlock, BlockId, IrFunction, Operand, Terminator};

        let mut f = IrFunction::new("f", Type::Integer(0), vec![], false);
        let mut block = BasicBlock::new(BlockId(0));
        let alloc_dest = Value(0);
        block.instructions.push(Instruction::StackAlloc {
            dest: alloc_dest,
            ty: Type::i64(),
            is_multi_qualified: false,
        });
        let copy_dest = Value(1);
        block.instructions.push(Instruction::Copy { dest: copy_dest, src: Operand::Value(alloc_dest) });
        block.terminator = Terminator::Return(None);
        f.blocks.push(block);

        assert_eq!(value_type(&[], &f, &Operand::Value(alloc_dest)), Some(Type::ptr(Type::i64())));
        assert_eq!(value_type(&[], &f, &Operand::Value(copy_dest)), Some(Type::ptr(Type::i64())));
    }
}
