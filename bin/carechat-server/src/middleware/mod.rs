//! HTTP middleware stack.
//!
//! Layer order on `/chat`, outermost first: trace, origin guard, caller
//! authentication. Disallowed origins are therefore rejected before any
//! token is looked at.

pub mod auth;
pub mod origin;
pub mod trace;

pub use auth::require_caller;
pub use origin::{origin_guard, OriginPolicy};
pub use trace::trace_middleware;
