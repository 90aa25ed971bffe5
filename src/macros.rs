#![allow(unused_macros)]

/// Builds an [`crate::Error::Ssa`] with a formatted message
///
/// ```rust, ignore
///  return Err(ssa_error!("variable {} read in block {} before definition", var, block));
/// ```
macro_rules! ssa_error {
    ($msg:expr) => {
        crate::Error::Ssa($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Ssa(format!($fmt, $($arg)*))
    };
}

/// Builds an [`crate::Error::GraphError`] with a formatted message
///
/// ```rust, ignore
///  return Err(graph_error!("graph of {} nodes has no entry", size));
/// ```
macro_rules! graph_error {
    ($msg:expr) => {
        crate::Error::GraphError($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::GraphError(format!($fmt, $($arg)*))
    };
}
