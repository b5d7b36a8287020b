//! Track model, Camelot keys and the catalog seam.

mod types;

pub mod catalog;
pub mod key;

pub use catalog::{CatalogError, InMemoryCatalog, TrackCatalog, TrackQuery};
pub use key::{CamelotKey, KeyMode, KeyParseError, KeyRelation};
pub use types::{TrackDescriptor, TrackId};
