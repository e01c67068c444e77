//! Compute command - run a full computation and print the assembled result

use crate::cmd::{read_entries, read_form_schema, read_rate_table_document, read_schedule_schemas};
use crate::engine::{self, ComputationResult};
use crate::entry::ScheduleEntry;
use crate::rates::RateTable;
use crate::schema::AssetClass;
use anyhow::Context;
use clap::Args;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Args, Debug)]
pub struct ComputeCommand {
    /// Directory holding form.json and schedules/*.json
    #[arg(short, long)]
    schemas: PathBuf,

    /// Rate table JSON file
    #[arg(short, long)]
    rates: PathBuf,

    /// Schedule entries as <class>=<file>; repeatable. JSON array or CSV by extension
    #[arg(short, long = "entries")]
    entries: Vec<String>,

    /// Form input value as <name>=<value>; repeatable
    #[arg(short, long = "input")]
    inputs: Vec<String>,

    /// Output as JSON instead of a formatted table
    #[arg(long)]
    json: bool,
}

impl ComputeCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let form = read_form_schema(&self.schemas)?;
        let schedules = read_schedule_schemas(&self.schemas)?;
        let rates = RateTable::new(read_rate_table_document(&self.rates)?)?;

        let mut entries_by_class: BTreeMap<AssetClass, Vec<ScheduleEntry>> = BTreeMap::new();
        for raw in &self.entries {
            let (class, path) = parse_class_file(raw)?;
            entries_by_class
                .entry(class)
                .or_default()
                .extend(read_entries(&path)?);
        }
        let mut inputs = BTreeMap::new();
        for raw in &self.inputs {
            let (name, value) = parse_input_value(raw)?;
            inputs.insert(name, value);
        }

        let result = engine::compute(&form, &schedules, &rates, &entries_by_class, &inputs)?;

        if self.json {
            self.print_json(&rates, &result)
        } else {
            self.print_table(&rates, &result);
            Ok(())
        }
    }

    fn print_table(&self, rates: &RateTable, result: &ComputationResult) {
        println!();
        println!("TAX COMPUTATION ({})", rates.year());
        println!();

        let rows: Vec<FieldRow> = result
            .values()
            .iter()
            .map(|field| FieldRow {
                field: field.name.clone(),
                label: field.label.clone().unwrap_or_default(),
                value: format_amount(field.value),
            })
            .collect();
        let table = Table::new(rows)
            .with(Style::rounded())
            .with(Modify::new(Rows::new(1..)).with(Alignment::right()))
            .to_string();
        println!("{}", table);
        println!();
        println!(
            "Progressive tax due: {}",
            format_amount(result.progressive_tax())
        );
        println!("Fingerprint: {}", result.fingerprint());
    }

    fn print_json(&self, rates: &RateTable, result: &ComputationResult) -> anyhow::Result<()> {
        let output = ComputeOutput {
            year: rates.year(),
            result,
            fingerprint: result.fingerprint(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        Ok(())
    }
}

/// JSON output structure
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ComputeOutput<'a> {
    year: i32,
    #[serde(flatten)]
    result: &'a ComputationResult,
    fingerprint: String,
}

#[derive(Debug, Tabled)]
struct FieldRow {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Value")]
    value: String,
}

fn format_amount(amount: Decimal) -> String {
    amount.normalize().to_string()
}

fn parse_class_file(raw: &str) -> anyhow::Result<(AssetClass, PathBuf)> {
    let (class, path) = raw
        .split_once('=')
        .with_context(|| format!("expected <class>=<file>, got '{raw}'"))?;
    let class = AssetClass::from_str(class)
        .with_context(|| format!("unknown asset class '{class}'"))?;
    Ok((class, PathBuf::from(path)))
}

fn parse_input_value(raw: &str) -> anyhow::Result<(String, Decimal)> {
    let (name, value) = raw
        .split_once('=')
        .with_context(|| format!("expected <name>=<value>, got '{raw}'"))?;
    let value = value
        .parse::<Decimal>()
        .with_context(|| format!("invalid amount '{value}' for input '{name}'"))?;
    Ok((name.to_string(), value))
}
