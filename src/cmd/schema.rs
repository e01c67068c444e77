//! Schema command - print expected input formats

use crate::entry::ScheduleEntry;
use crate::rates::RateTableDocument;
use crate::schema::{FormSchema, ScheduleSchema};
use clap::Args;
use schemars::schema_for;

#[derive(Args, Debug)]
pub struct SchemaCommand {
    /// Document to describe
    #[arg(value_enum, default_value = "form")]
    target: SchemaTarget,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum SchemaTarget {
    /// JSON Schema for the form document
    Form,
    /// JSON Schema for a schedule document
    Schedule,
    /// JSON Schema for the rate table document
    Rates,
    /// JSON Schema for a schedule entry list
    Entries,
    /// CSV header row for schedule entry files
    CsvHeader,
    /// CSV column descriptions for schedule entry files
    CsvFields,
}

impl SchemaCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        match self.target {
            SchemaTarget::Form => print_schema::<FormSchema>(),
            SchemaTarget::Schedule => print_schema::<ScheduleSchema>(),
            SchemaTarget::Rates => print_schema::<RateTableDocument>(),
            SchemaTarget::Entries => print_schema::<Vec<ScheduleEntry>>(),
            SchemaTarget::CsvHeader => {
                println!("{}", CSV_COLUMNS.join(","));
                Ok(())
            }
            SchemaTarget::CsvFields => print_csv_fields(),
        }
    }
}

fn print_schema<T: schemars::JsonSchema>() -> anyhow::Result<()> {
    let schema = schema_for!(T);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

fn print_csv_fields() -> anyhow::Result<()> {
    println!("Schedule Entry CSV Format");
    println!("=========================");
    println!();
    for (name, required, description) in CSV_FIELD_DESCRIPTIONS {
        let req = if *required { "required" } else { "optional" };
        println!("{:20} ({:8})  {}", name, req, description);
    }
    println!();
    println!("Any other column is treated as an extra monetary field and must");
    println!("be declared by a schedule aggregate expression to take effect.");
    Ok(())
}

const CSV_COLUMNS: &[&str] = &[
    "description",
    "acquisitionDate",
    "transferDate",
    "holdingYears",
    "transferAmount",
    "acquisitionAmount",
    "expenses",
];

const CSV_FIELD_DESCRIPTIONS: &[(&str, bool, &str)] = &[
    ("description", false, "Free-text label for the entry"),
    ("acquisitionDate", false, "Acquisition date (YYYY-MM-DD)"),
    ("transferDate", false, "Transfer date (YYYY-MM-DD)"),
    (
        "holdingYears",
        false,
        "Whole holding years; overrides the date pair when present",
    ),
    ("transferAmount", true, "Gross transfer consideration"),
    ("acquisitionAmount", true, "Acquisition cost"),
    ("expenses", true, "Deductible transfer expenses"),
];
