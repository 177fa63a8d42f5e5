//! Custom Resource Definitions for the PVC Operator
//!
//! This module contains all CRD types:
//! - ObjectStore: request for an object-storage bucket

pub mod object_store;

pub use object_store::*;
