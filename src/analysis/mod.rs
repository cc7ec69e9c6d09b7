//! The analysis cache (spec §4.3). Each analysis is a pure function of a
//! [`Function`]'s current state; this module memoizes results per function
//! and lets passes declare which analyses their mutation invalidates,
//! mirroring the request/invalidate contract of `cranelift-codegen`'s
//! per-function `FunctionCache` bookkeeping.

use std::any::{Any, TypeId};

use rustc_hash::FxHashMap;

use crate::errors::VenomResult;
use crate::ir::Function;

pub mod alias;
pub mod cfg;
pub mod dfg;
pub mod dominators;
pub mod liveness;

pub use alias::AliasAnalysis;
pub use dfg::DataFlowGraph;
pub use dominators::DominatorTree;
pub use liveness::LivenessAnalysis;

/// A result computable from a function's current IR, cheap to recompute
/// and safe to cache until something invalidates it.
pub trait Analysis: Any + Sized {
    fn analyze(func: &mut Function) -> VenomResult<Self>;
}

/// Per-function memoization table, keyed by analysis type.
#[derive(Default)]
pub struct AnalysesCache {
    cached: FxHashMap<TypeId, Box<dyn Any>>,
}

impl AnalysesCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached analysis, computing and storing it first if this
    /// is the first request since the last invalidation.
    pub fn request<T: Analysis>(&mut self, func: &mut Function) -> VenomResult<&T> {
        let id = TypeId::of::<T>();
        if !self.cached.contains_key(&id) {
            let result = T::analyze(func)?;
            self.cached.insert(id, Box::new(result));
        }
        Ok(self
            .cached
            .get(&id)
            .expect("just inserted")
            .downcast_ref::<T>()
            .expect("analysis cache type/value mismatch"))
    }

    pub fn invalidate<T: Analysis>(&mut self) {
        self.cached.remove(&TypeId::of::<T>());
    }

    /// Call after any pass that edits `cfg_in`/`cfg_out` on any block:
    /// dominators and liveness both derive from CFG shape.
    pub fn invalidate_cfg_dependents(&mut self) {
        self.invalidate::<DominatorTree>();
        self.invalidate::<LivenessAnalysis>();
    }

    /// Call after any pass that adds, removes, or rewrites instructions
    /// without touching CFG edges: def-use and liveness both stale.
    pub fn invalidate_instruction_dependents(&mut self) {
        self.invalidate::<DataFlowGraph>();
        self.invalidate::<LivenessAnalysis>();
    }

    pub fn clear(&mut self) {
        self.cached.clear();
    }
}
