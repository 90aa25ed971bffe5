// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
//#![deny(unsafe_code)]
// - 'cache/store.rs' uses mmap to read cache entries

//! # aotflow
//!
//! The middle end of a whole-program ahead-of-time compiler for class-based
//! object-oriented programs. Front ends hand over class metadata and method
//! bodies in a small register-based intermediate representation; `aotflow`
//! puts every body into SSA form, finds what the program can actually reach,
//! drops everything else and lowers the remaining code for back ends without
//! native exception handling.
//!
//! ## Features
//!
//! - **SSA construction** - Cytron-style phi placement including exception edges,
//!   with irreducible control flow split beforehand
//! - **Reachability analysis** - an Andersen-style, flow-insensitive points-to
//!   fixpoint that resolves virtual dispatch against the observed receiver types
//! - **Linking** - unreached methods and fields are removed, class initialization is
//!   made explicit
//! - **Lowering passes** - inlining of small static callees, guarded class
//!   initializers and shadow-stack exception dispatch
//! - **Incremental builds** - SSA programs are cached on disk between runs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aotflow::prelude::*;
//!
//! let mut classes = ClassSet::new();
//! classes.add(ClassHolder::new(OBJECT_CLASS, None));
//!
//! let mut program = Program::new();
//! let mut emitter = ProgramEmitter::create(&mut program);
//! emitter.variable();
//! emitter.exit(None);
//!
//! let descriptor = MethodDescriptor::new("main", vec![], ValueType::Void);
//! let mut main = MethodHolder::new("Main", descriptor, ElementModifier::STATIC);
//! main.program = Some(program);
//! let entry = main.reference();
//! let mut class = ClassHolder::new("Main", Some(OBJECT_CLASS));
//! class.add_method(main);
//! classes.add(class);
//!
//! let session = Session::new();
//! let output = Pipeline::new(PipelineConfig::default()).run(&session, classes, &[entry])?;
//! println!("{} methods reachable", output.info.reachable_methods().len());
//! # Ok::<(), aotflow::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`prelude`] - Convenient re-exports of commonly used types and traits
//! - [`model`] - Classes, references and the program representation
//! - [`analysis`] - SSA construction and liveness, one method at a time
//! - [`dependency`] - Whole-program reachability and the linker
//! - [`callgraph`] - Call, field and class access sites collected during analysis
//! - [`compiler`] - Session state, lowering passes and the build [`compiler::Pipeline`]
//! - [`cache`] - Binary encodings and the on-disk program cache
//! - [`utils`] - Bit sets, graphs and graph algorithms
//! - [`Error`] and [`Result`] - Error handling
//!
//! ### Diagnostics
//!
//! Problems in the analyzed program (a missing method, an unknown class) do not abort
//! the analysis. They are recorded in the session's [`compiler::EventLog`] together with
//! every transformation that was applied, and [`compiler::Pipeline::run`] turns error
//! diagnostics into [`Error::BuildFailed`] once the current stage has finished.

#[macro_use]
pub(crate) mod macros;
#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// ```rust,no_run
/// use aotflow::prelude::*;
///
/// let session = Session::new();
/// let pipeline = Pipeline::new(PipelineConfig::analysis_only());
/// # let _ = (session, pipeline);
/// ```
pub mod prelude;

pub mod analysis;
pub mod cache;
pub mod callgraph;
pub mod compiler;
pub mod dependency;
pub mod model;
pub mod utils;

/// `aotflow` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
///
/// ```rust,no_run
/// use aotflow::{model::MethodReference, Result};
///
/// fn entry_point(text: &str) -> Result<MethodReference> {
///     MethodReference::parse(text)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `aotflow` Error type
///
/// ```rust,no_run
/// use aotflow::{compiler::{Pipeline, PipelineConfig, Session}, model::ClassSet, Error};
///
/// let session = Session::new();
/// match Pipeline::new(PipelineConfig::default()).run(&session, ClassSet::new(), &[]) {
///     Ok(output) => println!("{} classes kept", output.classes.len()),
///     Err(Error::BuildFailed(errors)) => errors.iter().for_each(|e| eprintln!("{e}")),
///     Err(e) => eprintln!("Error: {e}"),
/// }
/// ```
pub use error::Error;
