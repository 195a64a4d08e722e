//! Route table
//!
//! Maps `(method, path)` to a handler, its middleware names, captured path
//! parameters and the catch handler responsible for failures.

mod errors;
mod method;
mod pattern;
mod table;

pub use errors::{RouteError, RouteResult};
pub use method::{Method, MethodScope};
pub use pattern::{split_path, CatchScope, Params, PathPattern, Segment};
pub use table::{Resolution, RouteEntry, RouteMatch, RouteTable, RouteTableBuilder};
