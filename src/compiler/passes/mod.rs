//! Per-method transformations run after linking.
//!
//! - [`InliningPass`] - splices small statically bound callees into their callers
//! - [`ClassInitPass`] - guards `InitClass` markers with an explicit check
//! - [`ShadowStackPass`] - replaces try/catch regions with shadow stack dispatch
//!
//! The pipeline runs them in this order; exception lowering comes last because it
//! treats every remaining initializer call as a possible throw.

mod classinit;
mod inlining;
mod shadowstack;

pub use classinit::{is_initialized_method, ClassInitPass, ALLOCATOR_CLASS};
pub use inlining::InliningPass;
pub use shadowstack::{
    catch_exception_method, get_exception_handler_id_method, register_call_site_method,
    throw_exception_method, CallSiteDescriptor, ExceptionHandlerDescriptor, ShadowStackPass,
    EXCEPTION_HANDLING_CLASS, SHADOW_STACK_CLASS,
};
