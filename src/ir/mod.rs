//! The typed SSA intermediate representation the passes in this crate
//! operate on: functions built of basic blocks of three-address
//! instructions over typed SSA values, with explicit load/store, stack
//! allocation, aggregate indexing, and calls. A host compiler normally
//! owns this layer; it is defined here so the crate is self-contained.

pub mod block;
pub mod function;
pub mod global;
pub mod instruction;
pub mod module;
pub mod types;
pub mod value;

pub use block::BasicBlock;
pub use function::{IrFunction, Param};
pub use global::{Global, Linkage};
pub use instruction::{Callee, CallingConv, FieldIndex, Instruction, Terminator};
pub use module::IrModule;
pub use types::Type;
pub use value::{BlockId, Const, Operand, Value};
