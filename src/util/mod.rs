//! Utility types and functions shared by the decoders.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - Math type re-exports from glam plus unaligned float readers

mod error;
mod math;

pub use error::*;
pub use math::*;
