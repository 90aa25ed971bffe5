//! Static Single Assignment (SSA) construction for programs.
//!
//! Front ends hand over programs where a variable may be written any number of
//! times. This module rewrites them so that every variable has exactly one static
//! definition and every read is dominated by it.
//!
//! # Architecture
//!
//! - [`SsaTransformer`] - phi placement and variable renaming
//! - [`ProgramNodeSplitter`] - block duplication used to make irreducible control flow
//!   reducible before construction
//! - [`verify_ssa`] - structural validation of the result
//!
//! # Algorithm
//!
//! 1. **Cleanup**: unreachable blocks are emptied, irreducible regions are split.
//! 2. **Dominators**: the dominator tree is built over the control flow graph including
//!    exception edges, so a handler is dominated by the protected blocks reaching it.
//! 3. **Phi placement**: the iterated dominance frontier of each variable's
//!    definition blocks, extended with the handlers of blocks redefining it, pruned by
//!    [`crate::analysis::liveness::LivenessAnalyzer`].
//! 4. **Renaming**: a preorder walk of the dominator tree with one current-definition
//!    slot per original variable.
//!
//! ## Exception edges
//!
//! A handler may be entered from any point inside a protected block, so several
//! versions of a variable can reach it from a single predecessor. Such versions are
//! collected in a [`crate::model::TryCatchJoint`] on the protected block's region and
//! the handler phi reads the joint receiver. The caught exception is renamed per region
//! and merged by one extra phi at the handler.
//!
//! # Usage
//!
//! ```rust,ignore
//! use aotflow::analysis::ssa::{verify_ssa, SsaTransformer};
//!
//! SsaTransformer::transform(&mut program, &method.descriptor.parameters)?;
//! verify_ssa(&program, method.descriptor.parameter_count())?;
//! ```

mod splitter;
mod transformer;
mod verify;

pub use splitter::ProgramNodeSplitter;
pub use transformer::SsaTransformer;
pub use verify::verify_ssa;
