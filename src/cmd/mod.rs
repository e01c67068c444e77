pub mod check;
pub mod compute;
pub mod schema;

pub use check::CheckCommand;
pub use compute::ComputeCommand;
pub use schema::SchemaCommand;

use crate::entry::{self, ScheduleEntry};
use crate::rates::RateTableDocument;
use crate::schema::{AssetClass, FormSchema, ScheduleSchema};
use anyhow::Context;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Read the form schema from `<dir>/form.json`.
pub fn read_form_schema(dir: &Path) -> anyhow::Result<FormSchema> {
    let path = dir.join("form.json");
    let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
    let form = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(form)
}

/// Read every schedule schema under `<dir>/schedules/`, keyed by asset class.
pub fn read_schedule_schemas(dir: &Path) -> anyhow::Result<BTreeMap<AssetClass, ScheduleSchema>> {
    let schedules_dir = dir.join("schedules");
    let mut schemas = BTreeMap::new();
    let dir_entries = std::fs::read_dir(&schedules_dir)
        .with_context(|| format!("reading {}", schedules_dir.display()))?;
    for dir_entry in dir_entries {
        let path = dir_entry?.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let schedule: ScheduleSchema = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing {}", path.display()))?;
        let class = schedule.asset_class;
        if schemas.insert(class, schedule).is_some() {
            anyhow::bail!("duplicate schedule schema for asset class '{class}'");
        }
    }
    Ok(schemas)
}

/// Read the rate table document from a JSON file.
pub fn read_rate_table_document(path: &Path) -> anyhow::Result<RateTableDocument> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let doc = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(doc)
}

/// Read schedule entries from a file: a JSON array for `.json`, CSV otherwise.
pub fn read_entries(path: &Path) -> anyhow::Result<Vec<ScheduleEntry>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = BufReader::new(file);
    if path.extension().is_some_and(|ext| ext == "json") {
        entry::read_json(reader)
    } else {
        entry::read_csv(reader)
    }
    .with_context(|| format!("reading entries from {}", path.display()))
}
