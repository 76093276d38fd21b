use std::io::Write;
use std::process::{Command, Output};

use anyhow::Result;
use serde_json::{json, Value};
use tempfile::NamedTempFile;

use bayundb_semijoin::catalog::{Catalog, Index};
use bayundb_semijoin::query::ast::{Expression, QueryBlock};
use bayundb_semijoin::query::statement::Statement;

#[path = "../common/mod.rs"]
mod common;

use common::*;

// ot.a IN (SELECT it.b FROM it)
fn input_file(config: Option<Value>) -> Result<NamedTempFile> {
    let catalog: Catalog = catalog(vec![
        int_table("ot", &["a"], 1000.0),
        int_table("it", &["b"], 100.0).with_index(Index::non_unique("ib", &["b"], 10.0)),
    ])?;
    let mut stmt = Statement::new(QueryBlock::new());
    let ot = stmt.add_table("ot", "ot");
    let it = stmt.add_table("it", "it");
    root_tables(&mut stmt, &[ot]);
    let sq = in_subquery(&mut stmt, &[it], col(it, "b"), None);
    add_root_filter(&mut stmt, Expression::in_subquery(col(ot, "a"), sq));

    let mut input = json!({ "catalog": catalog, "statement": stmt });
    if let Some(config) = config {
        input["config"] = config;
    }
    let mut file = NamedTempFile::new()?;
    file.write_all(serde_json::to_string(&input)?.as_bytes())?;
    file.flush()?;
    Ok(file)
}

fn sjexplain(file: &NamedTempFile, args: &[&str]) -> Result<Output> {
    Ok(Command::new(env!("CARGO_BIN_EXE_sjexplain")).arg(file.path()).args(args).output()?)
}

#[test]
fn test_text_output_shows_join_order() -> Result<()> {
    let file = input_file(None)?;
    let output = sjexplain(&file, &[])?;
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.starts_with("Block root: cost="));
    assert!(stdout.contains(" ot: "));
    assert!(stdout.contains(" it: "));
    Ok(())
}

#[test]
fn test_json_output_with_switches() -> Result<()> {
    let file = input_file(None)?;
    let output = sjexplain(
        &file,
        &["--format", "json", "-s", "firstmatch=off", "-s", "loosescan=off", "-s", "materialization=off"],
    )?;
    assert!(output.status.success());

    let plan: Value = serde_json::from_slice(&output.stdout)?;
    let spans = plan["root"]["spans"].as_array().cloned().unwrap_or_default();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0]["strategy"], "DuplicateWeedout");
    assert!(plan.get("trace").is_none());
    Ok(())
}

#[test]
fn test_config_from_input_and_trace_flag() -> Result<()> {
    let file = input_file(Some(json!({ "semijoin": false, "materialization": false })))?;
    let output = sjexplain(&file, &["--format", "json", "--trace"])?;
    assert!(output.status.success());

    let plan: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(plan["root"]["join_order"], json!(["ot"]));
    assert_eq!(plan["subqueries"].as_array().map(|a| a.len()), Some(1));
    let steps = plan["trace"].as_array().cloned().unwrap_or_default();
    assert!(steps.iter().any(|s| s["step"] == "subquery_conversion"));
    Ok(())
}

#[test]
fn test_unknown_switch_fails() -> Result<()> {
    let file = input_file(None)?;
    let output = sjexplain(&file, &["--switch", "hash_join=on"])?;
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("Unknown optimizer switch 'hash_join'"));

    let output = sjexplain(&file, &["--switch", "firstmatch"])?;
    assert!(!output.status.success());
    Ok(())
}

#[test]
fn test_unreadable_input_fails() -> Result<()> {
    let mut file = NamedTempFile::new()?;
    file.write_all(b"{ not json")?;
    let output = sjexplain(&file, &[])?;
    assert!(!output.status.success());
    assert!(String::from_utf8(output.stderr)?.contains("Failed to parse input"));
    Ok(())
}
