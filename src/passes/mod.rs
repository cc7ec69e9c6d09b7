//! Optimization passes (spec §4.9) and the driver that runs them to a fixed
//! point, invalidating exactly the analyses each pass declares it disturbs —
//! the same contract [`crate::analysis::AnalysesCache`] exposes directly,
//! mirrored here at the pass-pipeline level the way `cranelift-codegen`'s
//! `Context::optimize` threads a `ControlPlane`/pass list over a `Function`.

pub mod algebraic;
pub mod branch_opt;
pub mod dead_store_elim;
pub mod dft;
pub mod literal_codesize;
pub mod load_elim;
pub mod mem_merge;
pub mod sccp;

use crate::analysis::AnalysesCache;
use crate::errors::VenomResult;
use crate::ir::Function;

/// One optimization pass over a single function.
///
/// `run` returns whether it changed `func`; the driver keeps invoking the
/// pipeline until a full pass over every pass reports no change, bounded by
/// `MAX_ITERATIONS` so a pass pair that keeps re-triggering each other can't
/// hang the compiler.
pub trait Pass {
    fn name(&self) -> &'static str;

    fn run(&mut self, func: &mut Function, cache: &mut AnalysesCache) -> VenomResult<bool>;
}

const MAX_ITERATIONS: usize = 20;

/// Run the standard optimization pipeline to a fixed point: constant/branch
/// folding first (it exposes the most follow-on simplification), then the
/// memory- and stack-shape passes, then the code-size cleanup pass last.
pub fn run_default_pipeline(func: &mut Function, cache: &mut AnalysesCache) -> VenomResult<()> {
    let mut passes: Vec<Box<dyn Pass>> = vec![
        Box::new(sccp::Sccp),
        Box::new(branch_opt::BranchOptimization),
        Box::new(algebraic::AlgebraicOptimization),
        Box::new(load_elim::LoadElimination),
        Box::new(dead_store_elim::DeadStoreElimination),
        Box::new(mem_merge::MemMerge),
        Box::new(dft::DepthFirstScheduling),
    ];

    for _ in 0..MAX_ITERATIONS {
        let mut changed = false;
        for pass in passes.iter_mut() {
            changed |= pass.run(func, cache)?;
        }
        if !changed {
            break;
        }
    }
    literal_codesize::LiteralCodesizeOptimization.run(func, cache)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Label, Opcode};

    #[test]
    fn pipeline_converges_on_trivial_function() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(crate::ir::Instruction::new(Opcode::Stop, vec![], None));
        let mut cache = AnalysesCache::new();
        run_default_pipeline(&mut func, &mut cache).unwrap();
    }
}
