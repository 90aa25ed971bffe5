//! Build orchestration and per-method transformations.
//!
//! This module sits on top of the analysis layers:
//!
//! - [`crate::analysis`] - SSA construction and liveness
//! - [`crate::dependency`] - points-to analysis and linking
//! - [`compiler`](self) - session state, lowering passes and the build pipeline
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Build Pipeline                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  Session                      Shared state of one build          │
//! │    ├─ EventLog                (diagnostics, transformations)     │
//! │    ├─ SymbolTables            (types, cache symbols, files)      │
//! │    └─ Method flags            (not cacheable, inlined)           │
//! │                                                                  │
//! │  Pipeline                     Four stages                        │
//! │    ├─ SSA                     (per method, cached, parallel)     │
//! │    ├─ Dependency analysis     (single-threaded fixpoint)         │
//! │    ├─ Linking                 (drop unreached, insert inits)     │
//! │    └─ Transforms              (ProgramPass over every method)    │
//! │                                                                  │
//! │  ProgramPass trait            Interface for transformations      │
//! │    ├─ InliningPass            (small static callees)             │
//! │    ├─ ClassInitPass           (guarded initializer calls)        │
//! │    └─ ShadowStackPass         (explicit exception dispatch)      │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
mod context;
pub mod events;
mod pass;
pub mod passes;
mod pipeline;

pub use config::{InliningConfig, PipelineConfig};
pub use context::Session;
pub use events::{DerivedStats, Event, EventKind, EventLog};
pub use pass::ProgramPass;
pub use passes::{CallSiteDescriptor, ClassInitPass, InliningPass, ShadowStackPass};
pub use pipeline::{BuildOutput, Pipeline};
