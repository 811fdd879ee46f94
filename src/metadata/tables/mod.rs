//! Metadata table identifiers, schemas and row storage.
//!
//! The `#~` stream is a set of fixed-width row tables. This module provides:
//! - [`TableId`] - the table identifiers and their token tags
//! - [`ColumnKind`] / [`columns`] / [`sort_keys`] - declarative table schemas
//! - [`CodedIndexKind`] - the packed index families shared between tables
//! - [`TableStore`] - append-only row storage used while an image is built

mod codedindex;
mod schema;
mod store;
mod tableid;

pub use codedindex::{decode_table_tag, CodedIndexKind};
pub use schema::{columns, sort_keys, ColumnKind};
pub use store::TableStore;
pub use tableid::TableId;
