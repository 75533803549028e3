//! IR-level types.
//!
//! Plain scalar and pointer types plus the two "safe-pointer" kinds the
//! front-end introduces,
//! `SinglePtr` and `ArrayPtr`. These are lowered to aggregates of
//! `{raw, key[, keylock]}` by the front-end; this crate pattern-matches that
//! representation rather than re-synthesizing it.

/// A type in the typed SSA IR the passes operate over.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// A fixed-width integer, e.g. `Integer(64)` for `i64`.
    Integer(u32),
    /// A raw pointer into the given address space.
    Pointer { pointee: Box<Type>, address_space: u32 },
    /// An ordered aggregate of fields (struct layout, no name).
    Struct(Vec<Type>),
    /// A "safe" single-object pointer: `{raw: Pointer(pointee), key: i64}`.
    SinglePtr(Box<Type>),
    /// A "safe" array pointer: `{raw: Pointer(pointee), key: i64, keylock: Pointer(i64)}`.
    ArrayPtr(Box<Type>),
}

impl Type {
    pub fn i64() -> Type {
        Type::Integer(64)
    }

    pub fn i8() -> Type {
        Type::Integer(8)
    }

    pub fn ptr(pointee: Type) -> Type {
        Type::Pointer { pointee: Box::new(pointee), address_space: 0 }
    }

    pub fn ptr_in(pointee: Type, address_space: u32) -> Type {
        Type::Pointer { pointee: Box::new(pointee), address_space }
    }

    pub fn is_single_ptr(&self) -> bool {
        matches!(self, Type::SinglePtr(_))
    }

    pub fn is_array_ptr(&self) -> bool {
        matches!(self, Type::ArrayPtr(_))
    }

    /// `is_safe_ptr(t) ≡ is_single_ptr(t) ∨ is_array_ptr(t)`.
    pub fn is_safe_ptr(&self) -> bool {
        self.is_single_ptr() || self.is_array_ptr()
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer { .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, Type::Struct(_))
    }

    /// The pointee of a raw pointer, or the pointee a safe pointer carries.
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Pointer { pointee, .. } => Some(pointee),
            Type::SinglePtr(pointee) | Type::ArrayPtr(pointee) => Some(pointee),
            _ => None,
        }
    }

    /// The aggregate representation the front-end gives this safe-pointer
    /// type: `{raw, key}` for single-ptr, `{raw, key, keylock}` for array-ptr
    ///. `None` for non-safe-ptr
    /// types.
    pub fn safe_ptr_aggregate(&self) -> Option<Type> {
        match self {
            Type::SinglePtr(pointee) => Some(Type::Struct(vec![
                Type::ptr((**pointee).clone()),
                Type::i64(),
            ])),
            Type::ArrayPtr(pointee) => Some(Type::Struct(vec![
                Type::ptr((**pointee).clone()),
                Type::i64(),
                Type::ptr(Type::i64()),
            ])),
            _ => None,
        }
    }

    /// The raw-pointer field of a safe pointer's aggregate representation,
    /// i.e. the type at field index 0.
    pub fn safe_ptr_raw_type(&self) -> Option<Type> {
        self.pointee().map(|p| Type::ptr(p.clone()))
    }

    /// Natural (unpadded) alignment in bytes, used to decide whether the
    /// lock-insertion layout needs a padding word.
    pub fn natural_alignment(&self) -> usize {
        match self {
            Type::Integer(bits) => (bits.div_ceil(8) as usize).next_power_of_two().min(8),
            Type::Pointer { .. } => 8,
            Type::SinglePtr(_) => 16,
            Type::ArrayPtr(_) => 16,
            Type::Struct(fields) => fields.iter().map(|f| f.natural_alignment()).max().unwrap_or(1),
        }
    }
}

/// Whether a struct aggregate is one of the two recognized safe-pointer
/// aggregate shapes (`{raw, key}` or `{raw, key, keylock}`), used by passes
/// that pattern-match the front-end's lowering of single-ptr/array-ptr
/// values without relying on the `SinglePtr`/`ArrayPtr` tag directly.
pub fn struct_is_safe_ptr_shape(fields: &[Type]) -> bool {
    matches!(fields.len(), 2 | 3) && matches!(fields[0], Type::Pointer { .. }) && fields[1] == Type::i64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_ptr_aggregate_shape() {
        let t = Type::SinglePtr(Box::new(Type::Integer(32)));
        let agg = t.safe_ptr_aggregate().unwrap();
        assert_eq!(agg, Type::Struct(vec![Type::ptr(Type::Integer(32)), Type::i64()]));
    }

    #[test]
    fn array_ptr_aggregate_shape() {
        let t = Type::ArrayPtr(Box::new(Type::Integer(32)));
        let agg = t.safe_ptr_aggregate().unwrap();
        assert_eq!(
            agg,
            Type::Struct(vec![Type::ptr(Type::Integer(32)), Type::i64(), Type::ptr(Type::i64())])
        );
    }

    #[test]
    fn alignment_of_safe_ptr_is_16() {
        assert_eq!(Type::SinglePtr(Box::new(Type::Integer(32))).natural_alignment(), 16);
        assert_eq!(Type::ArrayPtr(Box::new(Type::Integer(32))).natural_alignment(), 16);
    }
}
