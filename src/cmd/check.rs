//! Check command - surface structural issues in the documents without
//! running a computation

use crate::cmd::{read_form_schema, read_rate_table_document, read_schedule_schemas};
use crate::engine;
use crate::rates::{RateTable, RateTableDocument};
use crate::schema::{AssetClass, FormSchema, ScheduleSchema};
use clap::Args;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct CheckCommand {
    /// Directory holding form.json and schedules/*.json
    #[arg(short, long)]
    schemas: PathBuf,

    /// Rate table JSON file
    #[arg(short, long)]
    rates: PathBuf,

    /// Output as JSON instead of formatted text
    #[arg(long)]
    json: bool,
}

/// A structural issue for output
#[derive(Debug, Clone, Serialize)]
struct CheckIssue {
    document: String,
    message: String,
}

/// JSON output structure
#[derive(Debug, Serialize)]
struct CheckOutput {
    issue_count: usize,
    issues: Vec<CheckIssue>,
}

impl CheckCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let form = read_form_schema(&self.schemas)?;
        let schedules = read_schedule_schemas(&self.schemas)?;
        let rate_doc = read_rate_table_document(&self.rates)?;

        let issues = collect_issues(&form, &schedules, rate_doc);

        if self.json {
            self.print_json(&issues)?;
        } else {
            self.print_text(&issues);
        }

        // Exit with code 1 if issues found
        if !issues.is_empty() {
            std::process::exit(1);
        }
        Ok(())
    }

    fn print_text(&self, issues: &[CheckIssue]) {
        println!();
        println!("CHECK RESULTS");
        println!();

        if issues.is_empty() {
            println!("\u{2713} No issues found.");
        } else {
            println!("\u{26A0} {} issue(s) found:", issues.len());
            println!();
            for (i, issue) in issues.iter().enumerate() {
                println!("  {}. [{}] {}", i + 1, issue.document, issue.message);
            }
            println!();
        }
    }

    fn print_json(&self, issues: &[CheckIssue]) -> anyhow::Result<()> {
        let output = CheckOutput {
            issue_count: issues.len(),
            issues: issues.to_vec(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        Ok(())
    }
}

fn collect_issues(
    form: &FormSchema,
    schedules: &BTreeMap<AssetClass, ScheduleSchema>,
    rate_doc: RateTableDocument,
) -> Vec<CheckIssue> {
    let mut issues = Vec::new();

    if let Err(err) = engine::check_structure(form) {
        issues.push(CheckIssue {
            document: "form".to_string(),
            message: err.to_string(),
        });
    }

    for (class, schedule) in schedules {
        let document = format!("schedule '{class}'");
        for key in schedule.missing_canonical_keys() {
            issues.push(CheckIssue {
                document: document.clone(),
                message: format!("missing canonical aggregate '{key}'"),
            });
        }
        for (name, expr) in &schedule.aggregates {
            for reference in expr.references() {
                issues.push(CheckIssue {
                    document: document.clone(),
                    message: format!("aggregate '{name}' references '{reference}' outside sum()"),
                });
            }
        }
    }

    match RateTable::new(rate_doc) {
        Ok(rates) => {
            for class in schedules.keys() {
                if rates.limit(*class).is_none() {
                    issues.push(CheckIssue {
                        document: "rates".to_string(),
                        message: format!(
                            "no long-term holding deduction limit for asset class '{class}'"
                        ),
                    });
                }
            }
        }
        Err(err) => issues.push(CheckIssue {
            document: "rates".to_string(),
            message: err.to_string(),
        }),
    }

    issues
}
