use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Recoverable problems found in user programs (a missing method, an unresolved bootstrap
/// method) are *not* errors: they are recorded as diagnostics in the session's
/// [`crate::compiler::EventLog`] and the affected instruction is replaced with a neutral one.
/// The variants below describe conditions that stop the current operation.
///
/// # Error Categories
///
/// ## Internal consistency
/// - [`Error::Malformed`] - A program or cache blob violates a structural invariant
/// - [`Error::Ssa`] - SSA construction read a variable before any dominating definition
/// - [`Error::GraphError`] - A graph algorithm was called on an unsuitable graph
/// - [`Error::RecursionLimit`] - A recursive expansion exceeded its depth limit
///
/// ## I/O
/// - [`Error::FileError`] - Filesystem I/O errors from the program cache
///
/// ## Build
/// - [`Error::BuildFailed`] - Severe diagnostics were reported during a pipeline run
///
/// # Examples
///
/// ```rust,ignore
/// use aotflow::{Error, compiler::Pipeline};
///
/// match pipeline.run(&mut classes, &entry_points) {
///     Ok(output) => println!("{} methods reachable", output.reachable_methods().len()),
///     Err(Error::BuildFailed(messages)) => {
///         for message in messages {
///             eprintln!("error: {message}");
///         }
///     }
///     Err(e) => eprintln!("internal error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A program, class set or cache entry is structurally invalid.
    ///
    /// The error includes the source location where the malformation was detected
    /// for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A variable was read during SSA renaming without any dominating definition.
    ///
    /// This indicates a defect in the front end that produced the program, or in an
    /// earlier pass, and is never recovered from.
    #[error("SSA construction failed - {0}")]
    Ssa(String),

    /// The requested operation is not supported for this input.
    #[error("This operation is not supported")]
    NotSupported,

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur while reading or writing cache entries.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// Recursion limit reached.
    ///
    /// Raised by passes that expand recursively (for example nested inlining plans)
    /// when the configured maximum depth would be exceeded.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// Graph algorithm error.
    ///
    /// Reported for graphs the algorithms cannot handle, for example graphs with no
    /// entry node (every node has an incoming edge).
    #[error("{0}")]
    GraphError(String),

    /// The build produced severe diagnostics.
    ///
    /// Carries the rendered message of every error diagnostic recorded during the run,
    /// not just the first one.
    #[error("Build failed with {} error(s)", .0.len())]
    BuildFailed(Vec<String>),
}
