//! Measurement pipelines.

mod comparison;

pub use comparison::*;
