//! Whole-program dependency analysis.
//!
//! This module discovers which methods, fields and classes a program can reach
//! starting from a set of entry points, and which concrete types can flow into
//! every value. It is an inclusion-based (Andersen-style) points-to analysis
//! driven on demand: a method body is only interpreted once the method is reached,
//! and a virtual call only reaches the implementations of the receiver types that
//! actually flow into its instance.
//!
//! # Architecture
//!
//! - [`DependencyGraph`] - arena of type-set nodes connected by (optionally
//!   filtered) transitions; every type is delivered to every transition and
//!   consumer exactly once
//! - [`DependencyAnalyzer`] - the worklist driver; owns the class set while it
//!   runs and records diagnostics in the [`crate::compiler::Session`]
//! - `dataflow` - per-method merging of variables into shared nodes
//! - `builder` - interpretation of one SSA method body into graph edges
//! - [`plugin`] - intrinsic descriptions for methods without bodies and
//!   invoke-dynamic substitution
//! - [`DependencyInfo`] - the query surface of a finished analysis
//! - [`Linker`] - prunes and resolves the classes with those results
//!
//! # Usage
//!
//! ```rust,ignore
//! use aotflow::compiler::Session;
//! use aotflow::dependency::{DependencyAnalyzer, Linker};
//!
//! let session = Session::new();
//! let mut analyzer = DependencyAnalyzer::new(&session, classes);
//! analyzer.analyze_method(&main);
//! let (mut classes, info) = analyzer.finish();
//!
//! for method in info.reachable_methods() {
//!     println!("{method}: returns {:?}", info.result_types(method));
//! }
//! Linker::new(&info, &session).link(&mut classes);
//! ```

mod analyzer;
mod builder;
mod consumer;
mod dataflow;
mod info;
mod linker;
mod node;
pub mod plugin;


pub use analyzer::{ClassDependency, DependencyAnalyzer, FieldDependency, MethodDependency};
pub use info::DependencyInfo;
pub use linker::{LinkStats, Linker};
pub use node::{DependencyGraph, DependencyNodeId, DependencyType, TypeFilter};
pub use plugin::{
    BootstrapMethodSubstitutor, BootstrapRegistry, DependencyPlugin, DynamicCallSite,
    PluginRegistry,
};
