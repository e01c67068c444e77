//! The computation engine: schedule aggregation, binding resolution,
//! progressive tax computation and result assembly, behind the single
//! [`compute`] boundary.

pub mod aggregate;
pub mod assemble;
pub mod resolve;
pub mod tax;

pub use aggregate::{aggregate, long_term_gain, AggregateSet};
pub use assemble::{assemble, ComputationResult, FieldValue};
pub use resolve::{check_structure, resolve};
pub use tax::compute_tax;

use crate::entry::ScheduleEntry;
use crate::rates::RateTable;
use crate::schema::{AssetClass, FormSchema, ScheduleSchema};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use thiserror::Error;

/// A structural defect in the submitted documents. Nothing is computed once
/// one of these is raised; there are no partial results.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A reference to a name no document declares, or a declaration the
    /// schema contract forbids.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    /// Derived fields depend on each other in a loop.
    #[error("dependency cycle: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },
    /// A declared field ended resolution without a value.
    #[error("field '{0}' was not resolved")]
    IncompleteResolution(String),
    /// An aggregated asset class has no long-term deduction limit.
    #[error("rate table mismatch: {0}")]
    RateTableMismatch(String),
}

/// Run one full computation: aggregate each schedule, resolve the form,
/// compute the progressive tax, assemble the sealed result.
///
/// All-or-nothing: a structural problem in any document aborts the run with
/// an [`EngineError`]. Classes with a schedule but no entries aggregate to
/// zeros; entries for a class without a schedule are refused.
pub fn compute(
    form: &FormSchema,
    schedules: &BTreeMap<AssetClass, ScheduleSchema>,
    rates: &RateTable,
    entries_by_class: &BTreeMap<AssetClass, Vec<ScheduleEntry>>,
    inputs: &BTreeMap<String, Decimal>,
) -> Result<ComputationResult, EngineError> {
    for class in entries_by_class.keys() {
        if !schedules.contains_key(class) {
            return Err(EngineError::SchemaMismatch(format!(
                "entries supplied for '{class}' but no schedule schema covers it"
            )));
        }
    }

    let mut aggregates_by_class = BTreeMap::new();
    let mut holdings: BTreeMap<AssetClass, &[ScheduleEntry]> = BTreeMap::new();
    for (class, schedule) in schedules {
        if schedule.asset_class != *class {
            return Err(EngineError::SchemaMismatch(format!(
                "schedule keyed '{class}' declares asset class '{}'",
                schedule.asset_class
            )));
        }
        let entries = entries_by_class
            .get(class)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        aggregates_by_class.insert(*class, aggregate(schedule, entries)?);
        holdings.insert(*class, entries);
    }

    let resolved = resolve(form, inputs, &aggregates_by_class, rates)?;
    let base_field = &form.bindings.tax.taxable_base;
    let taxable_base = resolved
        .get(base_field)
        .copied()
        .ok_or_else(|| EngineError::IncompleteResolution(base_field.clone()))?;
    let tax = compute_tax(taxable_base, rates, &holdings)?;
    assemble(form, &resolved, tax)
}
