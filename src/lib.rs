//! Replay a book chapter's listings against a git-backed sample project.
//!
//! Chapter text is split into blocks ([`blocks`]), classified into typed
//! listings ([`classify`]), replayed one by one into a [`sandbox`] by the
//! [`replay`] engine, and finally checked for coverage and a clean diff
//! against the reference commit ([`verify`]).
pub mod blocks;
pub mod classify;
pub mod cli;
pub mod config;
pub mod error;
pub mod listing;
pub mod replay;
pub mod report;
pub mod sandbox;
pub mod util;
pub mod verify;
pub mod workflow;

pub use error::ReplayError;
