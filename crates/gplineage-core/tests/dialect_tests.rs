// Integration tests for the Greenplum dialect extension
use gplineage_core::dialect::{generate, DistributionKind, ScriptParser, SqlDialect};
use gplineage_core::error::DialectError;
use pretty_assertions::assert_eq;

fn parser() -> ScriptParser {
    ScriptParser::new(SqlDialect::Greenplum)
}

fn assert_round_trip(sql: &str) {
    let parsed = parser().parse(sql).unwrap();
    let regenerated = generate(&parsed);
    let reparsed = parser()
        .parse(&regenerated)
        .unwrap_or_else(|e| panic!("regenerated SQL did not parse: {regenerated}\n{e}"));
    assert_eq!(parsed, reparsed, "round trip changed: {regenerated}");
}

#[test]
fn test_round_trip_distributed_by_single_column() {
    assert_round_trip(
        "CREATE TABLE sales WITH (appendonly=true, compresslevel=5) AS \
         SELECT id, amount FROM raw_sales DISTRIBUTED BY (id);",
    );
}

#[test]
fn test_round_trip_distributed_by_two_columns() {
    assert_round_trip(
        "CREATE TABLE sales (id INT, sale_date DATE, amount NUMERIC) \
         WITH (appendonly=false) DISTRIBUTED BY (id, sale_date);",
    );
}

#[test]
fn test_round_trip_distributed_randomly() {
    assert_round_trip(
        "CREATE TABLE events WITH (appendonly=true) AS \
         SELECT * FROM raw_events DISTRIBUTED RANDOMLY;",
    );
}

#[test]
fn test_round_trip_ctas_distributed_by_without_options() {
    assert_round_trip("CREATE TABLE t AS SELECT id FROM src DISTRIBUTED BY (id);");
}

#[test]
fn test_round_trip_distributed_with_trailing_order() {
    let sql = "CREATE TABLE daily AS SELECT id, ts FROM events \
               DISTRIBUTED BY (id) ORDER BY ts DESC;";
    assert_round_trip(sql);

    let parsed = parser().parse(sql).unwrap();
    let order = parsed[0].distribution.as_ref().unwrap().order.as_ref().unwrap();
    assert_eq!(order.len(), 1);
    assert!(generate(&parsed).ends_with("DISTRIBUTED BY (id) ORDER BY ts DESC;"));
}

#[test]
fn test_round_trip_without_clause() {
    assert_round_trip("CREATE TABLE plain (id INT, name TEXT);");
}

#[test]
fn test_generated_text() {
    let parsed = parser()
        .parse("create table t as select a from b distributed by (a)")
        .unwrap();
    assert_eq!(generate(&parsed), "CREATE TABLE t AS SELECT a FROM b DISTRIBUTED BY (a);");
}

#[test]
fn test_distribution_properties() {
    let parsed = parser()
        .parse(
            "CREATE TABLE a (id INT) DISTRIBUTED BY (id); \
             CREATE TABLE b (id INT) DISTRIBUTED RANDOMLY; \
             CREATE TABLE c (id INT);",
        )
        .unwrap();
    assert_eq!(parsed.len(), 3);

    let by = parsed[0].distribution.as_ref().unwrap();
    assert_eq!(by.kind, DistributionKind::By);
    assert_eq!(
        by.columns.as_ref().unwrap().iter().map(|c| c.value.as_str()).collect::<Vec<_>>(),
        vec!["id"]
    );

    let randomly = parsed[1].distribution.as_ref().unwrap();
    assert_eq!(randomly.kind, DistributionKind::Randomly);
    assert!(randomly.columns.is_none());

    assert!(parsed[2].distribution.is_none());
}

#[test]
fn test_missing_alternative_names_expected_tokens() {
    let err = parser()
        .parse("CREATE TABLE t (id INT) DISTRIBUTED EVENLY;")
        .unwrap_err();
    assert!(matches!(err, DialectError::InvalidDistribution { .. }));
    assert!(err.to_string().contains("BY or RANDOMLY"));
}

#[test]
fn test_tokens_after_clause_rejected() {
    let err = parser()
        .parse("CREATE TABLE t (id INT) DISTRIBUTED RANDOMLY extra;")
        .unwrap_err();
    assert!(matches!(err, DialectError::TrailingTokens { .. }));
}
