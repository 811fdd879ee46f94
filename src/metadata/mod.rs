//! Format-level types for ECMA-335 metadata: tokens, heaps and tables.

pub mod heaps;
pub mod tables;
pub mod token;
