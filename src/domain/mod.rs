//! Domain layer - Core types and port definitions
//!
//! This module defines the claim model, the core traits (ports) that
//! adapters implement, and exact quantity arithmetic.

pub mod ports;
pub mod quantity;

pub use ports::*;
pub use quantity::{add_headroom, ExactQuantity, QuantityFormat};
