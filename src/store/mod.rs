//! Resource Store Adapters
//!
//! Provides implementations of the `ResourceStore` port:
//! - Kubernetes: the live API server
//! - Memory: an in-process store for dry runs and tests

pub mod kubernetes;
pub mod memory;

pub use kubernetes::KubeResourceStore;
pub use memory::InMemoryResourceStore;
