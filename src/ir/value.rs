//! SSA value and basic block identity.
//!
//! Newtype handles, not indices into a single flat arena: each `IrFunction`
//! owns its own `Vec<BasicBlock>` and values are unique only within a
//! function.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// A compile-time constant operand.
///
/// `Eq`/`Hash` (on top of the integer/string/recursive-aggregate fields,
/// all of which support both) let `Operand` key the aggregate-address sets
/// the Check-Removal pass's dataflow lattice is built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Const {
    I64(i64),
    I32(i32),
    /// The zero value of whatever type context requires it (e.g. an
    /// uninitialized-but-zeroed global payload).
    Zero,
    /// The address of a named global or function.
    GlobalAddr(String),
    /// A null pointer constant.
    Null,
    /// A field-by-field aggregate constant, used for struct initializers.
    Aggregate(Vec<Const>),
    /// The constant address of a field inside a global's locked aggregate,
    /// i.e. a constant `AggregateGEP`. `global` names the
    /// rewritten (`_multiple`-suffixed) global; `indices` is the field path.
    GlobalFieldAddr { global: String, indices: Vec<u32> },
}

/// An SSA operand: either an immediate constant or a reference to a
/// previously defined value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    Const(Const),
    Value(Value),
}

impl Operand {
    pub fn value(&self) -> Option<Value> {
        match self {
            Operand::Value(v) => Some(*v),
            Operand::Const(_) => None,
        }
    }
}
