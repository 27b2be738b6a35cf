//! Where the schema catalog comes from: a JSON file or database discovery

use std::collections::BTreeSet;
use std::path::Path;

use gplineage_core::{Catalog, CatalogBuilder, TableFqn};
use miette::{IntoDiagnostic, Result, WrapErr};
use tracing::{info, warn};

/// Load a catalog from a schema JSON file
pub fn load_schema_file(path: &Path) -> Result<Catalog> {
    let contents = std::fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("Schema file not found at '{}'", path.display()))?;
    let catalog = Catalog::from_json_str(&contents)
        .into_diagnostic()
        .wrap_err_with(|| format!("Could not parse JSON from schema file '{}'", path.display()))?;
    if catalog.is_empty() {
        warn!(path = %path.display(), "schema file defines no catalogs");
    }
    Ok(catalog)
}

/// Fetch column definitions for the given tables
///
/// Simulated: there is no database connection, so a fixed mapping of the
/// demo warehouse is returned whenever any table was requested.
pub fn fetch_schema(table_names: &BTreeSet<String>) -> Catalog {
    if table_names.is_empty() {
        return Catalog::default();
    }

    info!("Simulating database schema fetch");
    info!(tables = ?table_names, "Tables to look up");

    let catalog = CatalogBuilder::new()
        .table(
            "my_gp_db",
            "raw_data",
            "users",
            [("id", "INT"), ("name", "VARCHAR"), ("email", "VARCHAR")],
        )
        .table(
            "my_gp_db",
            "raw_data",
            "orders",
            [
                ("id", "INT"),
                ("user_id", "INT"),
                ("amount", "DECIMAL"),
                ("order_date", "DATE"),
            ],
        )
        .table(
            "my_gp_db",
            "analytics",
            "user_orders",
            [("user_id", "INT"), ("total_orders", "BIGINT")],
        )
        .build();

    for table in missing_tables(&catalog, table_names) {
        warn!(table, "table not found in the database schema");
    }
    info!("Simulation complete; using mock schema");
    catalog
}

/// Requested names the catalog has no table for
fn missing_tables<'n>(catalog: &Catalog, table_names: &'n BTreeSet<String>) -> Vec<&'n str> {
    let known: Vec<TableFqn> = catalog
        .table_names()
        .iter()
        .map(|reference| TableFqn::resolve(reference, None, None))
        .collect();
    table_names
        .iter()
        .filter(|name| {
            let wanted = TableFqn::parse(name);
            !known.iter().any(|fqn| fqn.matches(&wanted))
        })
        .map(String::as_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_schema_without_tables_is_empty() {
        assert!(fetch_schema(&BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_fetch_schema_returns_mock_warehouse() {
        let catalog = fetch_schema(&BTreeSet::from(["users".to_string()]));
        assert_eq!(catalog.first_catalog(), Some("my_gp_db"));
        assert_eq!(
            catalog.columns_of("my_gp_db", "raw_data", "orders"),
            Some(vec!["id", "user_id", "amount", "order_date"])
        );
    }

    #[test]
    fn test_missing_tables_match_partial_names() {
        let requested = BTreeSet::from([
            "users".to_string(),
            "RAW_DATA.Orders".to_string(),
            "raw_data.user_orders".to_string(),
            "staging.events".to_string(),
        ]);
        let catalog = fetch_schema(&requested);
        assert_eq!(
            missing_tables(&catalog, &requested),
            vec!["raw_data.user_orders", "staging.events"]
        );
    }

    #[test]
    fn test_load_schema_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(&path, r#"{"db": {"s": {"t": {"a": "INT"}}}}"#).unwrap();
        assert_eq!(load_schema_file(&path).unwrap().columns_of("db", "s", "t"), Some(vec!["a"]));

        std::fs::write(&path, "not json").unwrap();
        let err = load_schema_file(&path).unwrap_err();
        assert!(err.to_string().contains("Could not parse JSON"));

        assert!(load_schema_file(&dir.path().join("missing.json")).is_err());
    }
}
