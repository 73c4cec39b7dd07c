//! Persistence of run reports.

mod report_store;

pub use report_store::*;
