//! Schedule aggregation: reduces an entry list to the schedule's declared
//! aggregates by evaluating each aggregate expression over per-field sums.

use crate::engine::EngineError;
use crate::entry::ScheduleEntry;
use crate::schema::{AggregateKey, ScheduleSchema};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Evaluated aggregates of one schedule. Covers at least the four canonical
/// keys; schedule-specific extras appear under their declared names.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSet {
    values: BTreeMap<String, Decimal>,
}

impl AggregateSet {
    /// Wrap precomputed aggregate values. Callers normally obtain a set from
    /// [`aggregate`] instead.
    pub fn new(values: BTreeMap<String, Decimal>) -> AggregateSet {
        AggregateSet { values }
    }

    pub fn get(&self, key: &str) -> Option<Decimal> {
        self.values.get(key).copied()
    }

    pub fn values(&self) -> &BTreeMap<String, Decimal> {
        &self.values
    }
}

/// Evaluate every aggregate expression of `schedule` over `entries`.
///
/// Pure function of its inputs. Monetary entry fields are summed first, one
/// pass per distinct summed field, then each expression is evaluated over the
/// sums. A negative `totalGain` (net loss) is preserved as-is; losses may net
/// against other schedules downstream.
pub fn aggregate(
    schedule: &ScheduleSchema,
    entries: &[ScheduleEntry],
) -> Result<AggregateSet, EngineError> {
    let missing = schedule.missing_canonical_keys();
    if let Some(key) = missing.first() {
        return Err(EngineError::SchemaMismatch(format!(
            "schedule '{}' does not declare canonical aggregate '{key}'",
            schedule.asset_class
        )));
    }

    let mut sums: BTreeMap<String, Decimal> = BTreeMap::new();
    for (key, expr) in &schedule.aggregates {
        if let Some(name) = expr.references().into_iter().next() {
            return Err(EngineError::SchemaMismatch(format!(
                "schedule '{}' aggregate '{key}' references '{name}'; \
                 entry fields must appear inside sum()",
                schedule.asset_class
            )));
        }
        for field in expr.summed_fields() {
            if sums.contains_key(field) {
                continue;
            }
            let mut total = Decimal::ZERO;
            for (index, entry) in entries.iter().enumerate() {
                match entry.amount(field) {
                    Some(amount) => total += amount,
                    None => {
                        return Err(EngineError::SchemaMismatch(format!(
                            "schedule '{}' entry {} is missing field '{field}'",
                            schedule.asset_class,
                            index + 1
                        )))
                    }
                }
            }
            sums.insert(field.to_string(), total);
        }
    }

    let mut values = BTreeMap::new();
    for (key, expr) in &schedule.aggregates {
        let value = expr.eval_schedule(&sums).map_err(|err| {
            EngineError::SchemaMismatch(format!(
                "schedule '{}' aggregate '{key}': {err}",
                schedule.asset_class
            ))
        })?;
        if key == AggregateKey::TotalGain.as_str() && value < Decimal::ZERO {
            log::warn!(
                "schedule {} reports a net loss: totalGain = {value}",
                schedule.asset_class
            );
        }
        log::debug!("aggregate {}.{key} = {value}", schedule.asset_class);
        values.insert(key.clone(), value);
    }
    Ok(AggregateSet { values })
}

/// Net gain from entries whose holding period meets `minimum_years`.
/// Entries without any holding information count as short-term.
pub fn long_term_gain(entries: &[ScheduleEntry], minimum_years: u32) -> Decimal {
    entries
        .iter()
        .filter(|e| e.holding_years().is_some_and(|years| years >= minimum_years))
        .map(|e| e.net_gain())
        .sum()
}
