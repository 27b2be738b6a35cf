//! Schema management module

mod builder;
mod catalog;
mod name;

pub use builder::CatalogBuilder;
pub use catalog::{Catalog, Database, Schema, TableDef};
pub use name::{TableFqn, TableReference};
