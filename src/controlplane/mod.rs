//! Provisioning Control Plane
//!
//! Turns claim events into storage classes, NFS gateways and buckets in
//! whichever cloud the operator finds itself in.

pub mod backends;
pub mod bucket;
pub mod dispatcher;
pub mod existence;
pub mod gateway;
pub mod prober;
pub mod transport;

pub use backends::*;
pub use bucket::*;
pub use dispatcher::*;
pub use existence::*;
pub use gateway::*;
pub use prober::*;
pub use transport::*;
