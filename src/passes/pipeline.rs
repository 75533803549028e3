//! Pipeline orchestration.
//!
//! Runs the six passes in their canonical dependency order: Lock-Insertion
//! and Type-Harmonization are independent of the analyses that follow;
//! Block-Splitter requires Free-Finder's result preserved; Check-Removal
//! requires Block-Splitter's result preserved. `run` wires that data flow
//! so callers don't have to re-derive it.

use crate::error::PassResult;
use crate::ir::IrModule;
use crate::passes::block_splitter::{self, BlockSplitterResult};
use crate::passes::check_removal::{self, CheckRemovalStats, HoistMode};
use crate::passes::free_finder::{self, FreeFinderResult};
use crate::passes::lock_insertion;
use crate::passes::type_harmonization;
use crate::whitelist::WhitelistConfig;

#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub lock_insertion_ran: bool,
    pub type_harmonization_changed: bool,
    pub free_finder: FreeFinderResult,
    pub block_splitter: BlockSplitterResult,
    pub check_removal: CheckRemovalStats,
}

/// Runs Lock-Insertion, Type-Harmonization, Free-Finder, Block-Splitter,
/// and Check-Removal over `module` in place, in that canonical order.
/// `whitelist` seeds the Free-Finder's non-freeing symbol set; `hoist_mode`
/// controls whether Check-Removal inserts pre-call checks before its
/// dataflow pass runs.
pub fn run(module: &mut IrModule, whitelist: &WhitelistConfig, hoist_mode: HoistMode) -> PassResult<PipelineReport> {
    let lock_insertion_ran = lock_insertion::run(module)?;
    let type_harmonization_changed = type_harmonization::run(module)?;

    let free_finder = free_finder::run(module, whitelist);
    let block_splitter = block_splitter::run(module, &free_finder);
    let check_removal = check_removal::run_with_stats(module, &block_splitter, hoist_mode)?;

    Ok(PipelineReport {
        lock_insertion_ran,
        type_harmonization_changed,
        free_finder,
        block_splitter,
        check_removal,
    })
}
