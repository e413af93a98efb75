//! Request handler implementations.
//!
//! The core dispatches to whatever implements [`crate::session::RequestHandler`];
//! [`fs::FsHandler`] is the one concrete backend this crate ships.

pub mod fs;
