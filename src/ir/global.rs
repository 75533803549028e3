use super::value::Const;
use crate::ir::types::Type;

/// Linkage kind of a global.
///
/// `Common` is the zero-initialization-only linkage that a multi-qual
/// global rewrite must promote to `External` before attaching a non-zero
/// lock initializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    Internal,
    External,
    Common,
}

/// A module-scope named storage location.
#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: String,
    /// The type of the stored object (not a pointer-to-it).
    pub ty: Type,
    pub is_multi_qualified: bool,
    pub is_constant: bool,
    pub linkage: Linkage,
    pub address_space: u32,
    pub thread_local: bool,
    pub initializer: Option<Const>,
    /// Whether this global is marked for external initialization (its
    /// initial value is supplied by a separate translation unit/loader
    /// step). Preserved verbatim across the lock-insertion rewrite.
    pub has_external_initializer: bool,
    pub alignment: u32,
}

impl Global {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            is_multi_qualified: false,
            is_constant: false,
            linkage: Linkage::External,
            address_space: 0,
            thread_local: false,
            initializer: None,
            has_external_initializer: false,
            alignment: 0,
        }
    }
}
