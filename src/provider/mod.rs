//! Resource providers.
//!
//! Providers perform the external side effects for a resource kind. The
//! engine talks to a single [`Provider`], usually a [`ProviderRegistry`]
//! that routes each call by kind.

mod local;
mod registry;
mod traits;

pub use local::{LocalProvider, DEFAULT_PROVIDER_ROOT};
pub use registry::ProviderRegistry;
pub use traits::{Provider, ProviderResponse, ProviderResult};

#[cfg(test)]
pub use traits::MockProvider;
