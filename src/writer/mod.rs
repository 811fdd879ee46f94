//! Serialization of a finalized image to its on-disk form.
//!
//! Three stages: [`build_compressed_metadata`] renders the metadata root with
//! its five streams, [`PeLayout`] places the sections, and [`write_pe`] emits
//! the headers and payload into an [`Output`] sink.

mod metadata;
mod output;
mod pe;

pub use metadata::build_compressed_metadata;
pub use output::Output;
pub use pe::{write_pe, PeLayout};
