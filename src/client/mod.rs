//! Provider clients: HTTP plumbing, the provider capability and the registry.

mod llm_client;
mod provider;
mod registry;

pub use llm_client::*;
pub use provider::*;
pub use registry::*;
