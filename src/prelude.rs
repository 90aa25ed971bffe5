//! # aotflow Prelude
//!
//! Convenient access to the types needed to describe a program, run a build and
//! inspect its results.
//!
//! ```rust,no_run
//! use aotflow::prelude::*;
//!
//! let reference = MethodReference::parse("Main.main()V")?;
//! let session = Session::new();
//! let pipeline = Pipeline::new(PipelineConfig::analysis_only());
//! if let Err(Error::BuildFailed(errors)) = pipeline.run(&session, ClassSet::new(), &[reference]) {
//!     println!("{} problems", errors.len());
//! }
//! # Ok::<(), aotflow::Error>(())
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all aotflow operations
pub use crate::Error;

/// The result type used throughout aotflow
pub use crate::Result;

// ================================================================================================
// Program Model
// ================================================================================================

/// Class metadata and hierarchy queries
pub use crate::model::{
    ClassHolder, ClassSet, ClassSource, ElementModifier, FieldHolder, MethodHolder, OBJECT_CLASS,
};

/// Symbolic references and value types
pub use crate::model::{
    FieldReference, MethodDescriptor, MethodReference, PrimitiveType, TextLocation, ValueType,
};

/// The intermediate representation
pub use crate::model::{
    BasicBlock, BlockId, Instruction, InstructionKind, InvocationType, Phi, Program,
    ProgramEmitter, TryCatchBlock, Variable,
};

// ================================================================================================
// Analysis
// ================================================================================================

/// SSA construction and validation
pub use crate::analysis::{verify_ssa, LivenessAnalyzer, SsaTransformer};

/// Whole-program reachability and linking
pub use crate::dependency::{
    BootstrapRegistry, DependencyAnalyzer, DependencyInfo, DependencyPlugin, Linker,
    PluginRegistry,
};

/// Call sites collected during analysis
pub use crate::callgraph::{CallGraph, CallSite};

// ================================================================================================
// Build Orchestration
// ================================================================================================

/// Session, configuration and pipeline
pub use crate::compiler::{
    BuildOutput, EventKind, EventLog, Pipeline, PipelineConfig, ProgramPass, Session,
};

/// Persistent program cache
pub use crate::cache::{DiskProgramCache, SymbolTable};
