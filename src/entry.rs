//! Schedule entries: taxpayer-reported transactions.
//!
//! Entries carry the three canonical monetary fields plus any
//! schedule-specific extra columns, captured by name so aggregate expressions
//! can sum them. Monetary values are whole currency units. Long-term
//! eligibility comes from an explicit `holdingYears` or is derived from the
//! acquisition/transfer date pair.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EntryError {
    #[error("entry file is missing required column '{0}'")]
    MissingColumn(String),
    #[error("column '{column}': invalid amount '{value}'")]
    InvalidAmount { column: String, value: String },
    #[error("column '{column}': invalid date '{value}' (expected YYYY-MM-DD)")]
    InvalidDate { column: String, value: String },
    #[error("invalid holdingYears '{0}'")]
    InvalidHoldingYears(String),
}

/// One taxpayer-reported transaction on a schedule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleEntry {
    /// Optional free-text description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquisition_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_date: Option<NaiveDate>,
    /// Explicit whole holding years; takes precedence over the date pair
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holding_years: Option<u32>,
    #[schemars(with = "f64")]
    pub transfer_amount: Decimal,
    #[schemars(with = "f64")]
    pub acquisition_amount: Decimal,
    #[schemars(with = "f64")]
    pub expenses: Decimal,
    /// Schedule-specific extra monetary fields, by name
    #[serde(flatten)]
    #[schemars(with = "BTreeMap<String, f64>")]
    pub extras: BTreeMap<String, Decimal>,
}

impl ScheduleEntry {
    /// Value of a named monetary field, canonical or extra.
    pub fn amount(&self, field: &str) -> Option<Decimal> {
        match field {
            "transferAmount" => Some(self.transfer_amount),
            "acquisitionAmount" => Some(self.acquisition_amount),
            "expenses" => Some(self.expenses),
            other => self.extras.get(other).copied(),
        }
    }

    /// Net gain of this single entry.
    pub fn net_gain(&self) -> Decimal {
        self.transfer_amount - self.acquisition_amount - self.expenses
    }

    /// Whole holding years: the explicit value if present, otherwise derived
    /// from the date pair. `None` when neither is available.
    pub fn holding_years(&self) -> Option<u32> {
        if let Some(years) = self.holding_years {
            return Some(years);
        }
        match (self.acquisition_date, self.transfer_date) {
            (Some(acquired), Some(transferred)) => {
                Some(holding_years_between(acquired, transferred))
            }
            _ => None,
        }
    }
}

/// Whole holding years by the calendar-anniversary rule: the year difference,
/// minus one if the transfer falls before the acquisition anniversary that
/// year, floored at zero.
pub fn holding_years_between(acquired: NaiveDate, transferred: NaiveDate) -> u32 {
    let mut years = transferred.year() - acquired.year();
    if (transferred.month(), transferred.day()) < (acquired.month(), acquired.day()) {
        years -= 1;
    }
    years.max(0) as u32
}

const REQUIRED_COLUMNS: [&str; 3] = ["transferAmount", "acquisitionAmount", "expenses"];

/// Read schedule entries from CSV. The three canonical monetary columns are
/// required; blank cells read as zero; any unrecognised column is parsed as an
/// extra monetary field.
pub fn read_csv<R: Read>(reader: R) -> anyhow::Result<Vec<ScheduleEntry>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();
    for required in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == required) {
            return Err(EntryError::MissingColumn(required.to_string()).into());
        }
    }

    let mut entries = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let mut entry = ScheduleEntry::default();
        for (column, value) in headers.iter().zip(record.iter()) {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match column {
                "description" => entry.description = Some(value.to_string()),
                "acquisitionDate" => entry.acquisition_date = Some(parse_date(column, value)?),
                "transferDate" => entry.transfer_date = Some(parse_date(column, value)?),
                "holdingYears" => {
                    let years = value
                        .parse()
                        .map_err(|_| EntryError::InvalidHoldingYears(value.to_string()))?;
                    entry.holding_years = Some(years);
                }
                "transferAmount" => entry.transfer_amount = parse_amount(column, value)?,
                "acquisitionAmount" => entry.acquisition_amount = parse_amount(column, value)?,
                "expenses" => entry.expenses = parse_amount(column, value)?,
                extra => {
                    entry
                        .extras
                        .insert(extra.to_string(), parse_amount(extra, value)?);
                }
            }
        }
        entries.push(entry);
    }
    sort_entries(&mut entries);
    Ok(entries)
}

/// Read schedule entries from a JSON array.
pub fn read_json<R: Read>(reader: R) -> anyhow::Result<Vec<ScheduleEntry>> {
    let mut entries: Vec<ScheduleEntry> = serde_json::from_reader(reader)?;
    sort_entries(&mut entries);
    Ok(entries)
}

fn sort_entries(entries: &mut [ScheduleEntry]) {
    entries.sort_by_key(|e| (e.transfer_date, e.acquisition_date));
}

fn parse_amount(column: &str, value: &str) -> Result<Decimal, EntryError> {
    value.parse().map_err(|_| EntryError::InvalidAmount {
        column: column.to_string(),
        value: value.to_string(),
    })
}

fn parse_date(column: &str, value: &str) -> Result<NaiveDate, EntryError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| EntryError::InvalidDate {
        column: column.to_string(),
        value: value.to_string(),
    })
}
