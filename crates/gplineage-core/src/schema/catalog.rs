//! Schema catalog - read-only table and column definitions

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::name::TableReference;

/// Schema catalog - catalog -> schema -> table -> column -> type
///
/// Deserializes from the JSON document
/// `{ catalog: { schema: { table: { column: type } } } }`, keeping the
/// document order at every level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    catalogs: IndexMap<String, Database>,
}

/// One catalog (database)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Database {
    pub schemas: IndexMap<String, Schema>,
}

/// A database schema (namespace)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    pub tables: IndexMap<String, TableDef>,
}

/// Table definition: ordered column name -> type tag
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableDef {
    pub columns: IndexMap<String, String>,
}

impl TableDef {
    /// Get a column type by name (case-insensitive)
    pub fn get_column(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Check if a column exists
    pub fn column_exists(&self, name: &str) -> bool {
        self.get_column(name).is_some()
    }

    /// Get all column names in declaration order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.keys().map(|s| s.as_str()).collect()
    }
}

impl Catalog {
    pub fn new(catalogs: IndexMap<String, Database>) -> Self {
        Self { catalogs }
    }

    /// Parse a catalog from its JSON representation
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Iterate over catalogs in document order
    pub fn catalogs(&self) -> impl Iterator<Item = (&str, &Database)> {
        self.catalogs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Name of the first catalog in document order
    pub fn first_catalog(&self) -> Option<&str> {
        self.catalogs.keys().next().map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.catalogs.is_empty()
    }

    /// Look up a table by its three name parts (case-insensitive)
    pub fn get_table(&self, catalog: &str, schema: &str, table: &str) -> Option<&TableDef> {
        let database = find_ignore_case(&self.catalogs, catalog)?;
        let schema = find_ignore_case(&database.schemas, schema)?;
        find_ignore_case(&schema.tables, table)
    }

    /// Ordered column names of a table, or `None` when it is unknown
    pub fn columns_of(&self, catalog: &str, schema: &str, table: &str) -> Option<Vec<&str>> {
        self.get_table(catalog, schema, table)
            .map(|t| t.column_names())
    }

    /// Find a table from a possibly partial reference
    ///
    /// Missing parts match any catalog/schema; the lookup succeeds only when
    /// exactly one table matches.
    pub fn find_table(&self, reference: &TableReference) -> Option<&TableDef> {
        let mut found = None;
        for (catalog_name, database) in &self.catalogs {
            if !part_matches(reference.catalog.as_deref(), catalog_name) {
                continue;
            }
            for (schema_name, schema) in &database.schemas {
                if !part_matches(reference.schema.as_deref(), schema_name) {
                    continue;
                }
                if let Some(table) = find_ignore_case(&schema.tables, &reference.name) {
                    if found.is_some() {
                        return None;
                    }
                    found = Some(table);
                }
            }
        }
        found
    }

    /// Find a table, trying the reference completed with the defaults first
    pub fn lookup(
        &self,
        reference: &TableReference,
        default_catalog: Option<&str>,
        default_schema: Option<&str>,
    ) -> Option<&TableDef> {
        let mut completed = reference.clone();
        if completed.schema.is_none() {
            completed.schema = default_schema.map(str::to_string);
        }
        if completed.catalog.is_none() && completed.schema.is_some() {
            completed.catalog = default_catalog.map(str::to_string);
        }
        self.find_table(&completed)
            .or_else(|| self.find_table(reference))
    }

    /// Check if a table exists
    pub fn table_exists(&self, reference: &TableReference) -> bool {
        self.find_table(reference).is_some()
    }

    /// Get all table references in document order
    pub fn table_names(&self) -> Vec<TableReference> {
        self.catalogs
            .iter()
            .flat_map(|(catalog_name, database)| {
                database.schemas.iter().flat_map(move |(schema_name, schema)| {
                    schema.tables.keys().map(move |table_name| {
                        TableReference::with_catalog(catalog_name, schema_name, table_name)
                    })
                })
            })
            .collect()
    }
}

fn part_matches(wanted: Option<&str>, actual: &str) -> bool {
    wanted.map_or(true, |w| w.eq_ignore_ascii_case(actual))
}

fn find_ignore_case<'m, V>(map: &'m IndexMap<String, V>, key: &str) -> Option<&'m V> {
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Catalog {
        Catalog::from_json_str(
            r#"{
                "my_gp_db": {
                    "raw_data": {
                        "users": {"id": "INT", "name": "VARCHAR", "email": "VARCHAR"},
                        "orders": {"id": "INT", "user_id": "INT", "amount": "DECIMAL"}
                    },
                    "analytics": {"users": {"user_id": "INT"}}
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_columns_keep_document_order() {
        let catalog = sample();
        assert_eq!(
            catalog.columns_of("my_gp_db", "raw_data", "users"),
            Some(vec!["id", "name", "email"])
        );
        assert_eq!(catalog.columns_of("my_gp_db", "raw_data", "missing"), None);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let catalog = sample();
        assert!(catalog.get_table("MY_GP_DB", "Raw_Data", "ORDERS").is_some());
    }

    #[test]
    fn test_find_table_partial_reference() {
        let catalog = sample();
        assert!(catalog.table_exists(&TableReference::new("orders")));
        assert!(catalog.table_exists(&TableReference::with_schema("analytics", "users")));
        // `users` exists in two schemas
        assert!(!catalog.table_exists(&TableReference::new("users")));
    }

    #[test]
    fn test_lookup_prefers_default_schema() {
        let catalog = sample();
        let users = catalog
            .lookup(&TableReference::new("users"), Some("my_gp_db"), Some("analytics"))
            .unwrap();
        assert_eq!(users.column_names(), vec!["user_id"]);

        // Falls back to the unique match when the default schema lacks the table
        let orders = catalog
            .lookup(&TableReference::new("orders"), Some("my_gp_db"), Some("analytics"))
            .unwrap();
        assert!(orders.column_exists("amount"));
    }

    #[test]
    fn test_first_catalog() {
        assert_eq!(sample().first_catalog(), Some("my_gp_db"));
        assert_eq!(Catalog::default().first_catalog(), None);
    }
}
