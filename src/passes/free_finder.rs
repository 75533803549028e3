//! Free-Finder Analysis.
//!
//! A module-level call-graph reachability analysis that conservatively
//! classifies each user-defined function and each call site as *may-free*
//! or *non-freeing*.

use crate::capabilities;
use crate::common::fx_hash::{FxHashMap, FxHashSet};
use crate::ir::{BlockId, Instruction};
use crate::ir::instruction::Callee;
use crate::ir::IrModule;
use crate::whitelist::WhitelistConfig;
use indexmap::IndexSet;

/// Identifies a single `Call` instruction by its (function, block, index)
/// location. Stable between the Free-Finder producing it and the Block-Splitter consuming it, since
/// nothing between the two passes moves or erases call instructions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSite {
    pub function: String,
    pub block: BlockId,
    pub index: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FreeFinderResult {
    pub may_free_fns: IndexSet<String>,
    pub may_free_calls: IndexSet<CallSite>,
}

/// Runs the Free-Finder analysis over `module`, consulting (and augmenting,
/// per-module) `whitelist`. Read-only: does not mutate the module.
pub fn run(module: &IrModule, whitelist: &WhitelistConfig) -> FreeFinderResult {
    let mut whitelist = whitelist.clone();
    whitelist.augment_for_module(&module.name);

    let defined: FxHashSet<&str> =
        module.functions.iter().filter(|f| !f.is_declaration).map(|f| f.name.as_str()).collect();

    // direct-call edges between user-defined functions only; edges into
    // declarations/key-check helpers are handled by the whitelist rule, not
    // the call graph.
    let mut reached_by: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    let mut may_free_fns: IndexSet<String> = IndexSet::new();

    for func in module.functions.iter().filter(|f| !f.is_declaration) {
        if capabilities::is_check_helper_function(func, &module.name) {
            continue;
        }
        let mut is_may_free = false;
        for block in &func.blocks {
            for inst in &block.instructions {
                let Instruction::Call { callee, .. } = inst else { continue };
                match callee {
                    Callee::Indirect(_) => is_may_free = true,
                    Callee::Direct(name) => {
                        if defined.contains(name.as_str()) {
                            reached_by.entry(name.as_str()).or_default().push(func.name.as_str());
                        } else if whitelist.contains(name) {
                            // declaration-only, whitelisted: non-freeing.
                        } else {
                            log::warn!(
                                "free-finder: declaration-only callee `{name}` is not on the \
                                 non-freeing whitelist, treating the call as may-free"
                            );
                            is_may_free = true;
                        }
                    }
                }
            }
        }
        if is_may_free {
            may_free_fns.insert(func.name.clone());
        }
    }

    // Closure over `reached_by`: any (transitive) caller of a may-free
    // function is itself may-free.
    let mut worklist: Vec<String> = may_free_fns.iter().cloned().collect();
    while let Some(f) = worklist.pop() {
        if let Some(callers) = reached_by.get(f.as_str()) {
            for &caller in callers {
                if may_free_fns.insert(caller.to_string()) {
                    worklist.push(caller.to_string());
                }
            }
        }
    }

    // MayFreeCalls: every directly-may-free call site, plus every direct
    // call site of a function now in MayFreeFns.
    let mut may_free_calls: IndexSet<CallSite> = IndexSet::new();
    for func in module.functions.iter().filter(|f| !f.is_declaration) {
        if capabilities::is_check_helper_function(func, &module.name) {
            continue;
        }
        for block in &func.blocks {
            for (index, inst) in block.instructions.iter().enumerate() {
                let Instruction::Call { callee, .. } = inst else { continue };
                let is_may_free_call = match callee {
                    Callee::Indirect(_) => true,
                    Callee::Direct(name) => {
                        if defined.contains(name.as_str()) {
                            may_free_fns.contains(name.as_str())
                        } else {
                            !whitelist.contains(name)
                        }
                    }
                };
                if is_may_free_call {
                    may_free_calls.insert(CallSite { function: func.name.clone(), block: block.label, index });
                }
            }
        }
    }

    FreeFinderResult { may_free_fns, may_free_calls }
}
