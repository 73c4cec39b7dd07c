//! Token-rate measurement: SSE parsing and the blocking/streaming meters.

mod measure;
mod sse;

pub use measure::*;
pub use sse::*;

#[cfg(test)]
pub(crate) use measure::tests::ScriptedProvider;
