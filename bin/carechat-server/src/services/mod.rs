//! Request-pipeline services that sit between the routes and the stores.

pub mod completion;
pub mod context;
pub mod summary;
