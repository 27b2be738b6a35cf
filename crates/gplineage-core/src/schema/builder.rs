//! Catalog builder - assembles a Catalog in code

use indexmap::IndexMap;

use crate::schema::{Catalog, Database, Schema, TableDef};

/// Builder for constructing a Catalog without a JSON document
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    catalogs: IndexMap<String, Database>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table with its ordered `(column, type)` pairs
    ///
    /// Adding the same table twice appends to its column list.
    pub fn table<C, T>(
        mut self,
        catalog: &str,
        schema: &str,
        table: &str,
        columns: impl IntoIterator<Item = (C, T)>,
    ) -> Self
    where
        C: Into<String>,
        T: Into<String>,
    {
        let def = self
            .catalogs
            .entry(catalog.to_string())
            .or_insert_with(Database::default)
            .schemas
            .entry(schema.to_string())
            .or_insert_with(Schema::default)
            .tables
            .entry(table.to_string())
            .or_insert_with(TableDef::default);
        for (name, data_type) in columns {
            def.columns.insert(name.into(), data_type.into());
        }
        self
    }

    pub fn build(self) -> Catalog {
        Catalog::new(self.catalogs)
    }
}
