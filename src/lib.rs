//! Presale Analytics Library
//!
//! Exposes the analysis stages and the performance monitor for use by the
//! binaries and integration tests.

pub mod analysis;
pub mod performance;
