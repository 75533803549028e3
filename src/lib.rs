//! Temporal memory safety instrumentation passes for a typed SSA IR:
//! Lock-Insertion, Type-Harmonization, Free-Finder, Block-Splitter, and
//! Check-Removal, plus the capability layer and pipeline orchestration
//! tying them together.

pub mod capabilities;
pub mod common;
pub mod error;
pub mod ir;
pub mod passes;
pub mod whitelist;
