//! The interface of per-method transformations.

use crate::{
    compiler::Session,
    model::{MethodReference, Program},
    Result,
};

/// A transformation applied to one method body at a time.
///
/// Passes receive the program of a method that survived linking, in SSA form,
/// and must leave it in SSA form with consistent phi and try/catch references.
/// They may be run concurrently on different methods, so any state shared between
/// calls must be thread-safe.
pub trait ProgramPass: Send + Sync {
    /// Short identifier used in events and logs.
    fn name(&self) -> &'static str;

    /// One-line description of what the pass does.
    fn description(&self) -> &'static str;

    /// Transforms the body of `method`.
    ///
    /// # Returns
    ///
    /// `true` if the program changed.
    ///
    /// # Errors
    ///
    /// Returns an error when the program violates an invariant the pass relies on.
    fn run_on_method(
        &self,
        program: &mut Program,
        method: &MethodReference,
        session: &Session,
    ) -> Result<bool>;
}
