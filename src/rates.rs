//! Rate table repository: bracket tables and deduction limits for a tax year.
//!
//! A [`RateTableDocument`] is the wire form, parsed from JSON. [`RateTable::new`]
//! validates every bracket sequence (contiguity, ascending thresholds,
//! non-decreasing rates) and precomputes the cumulative amount due at each
//! bracket's lower threshold, so lookups are a binary search plus one
//! multiplication. Integrity violations surface at construction, never during
//! a computation.

use crate::schema::AssetClass;
use rust_decimal::{Decimal, RoundingStrategy};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RateTableError {
    #[error("{table}: bracket table is empty")]
    Empty { table: String },
    #[error("{table}: first bracket must start at zero, found {found}")]
    FirstThresholdNotZero { table: String, found: Decimal },
    #[error("{table}: bracket {index} has thresholdHigh {high} <= thresholdLow {low}")]
    InvertedBracket {
        table: String,
        index: usize,
        low: Decimal,
        high: Decimal,
    },
    #[error("{table}: bracket {index} starts at {low}, previous bracket ends at {high}")]
    NotContiguous {
        table: String,
        index: usize,
        high: Decimal,
        low: Decimal,
    },
    #[error("{table}: only the final bracket may omit thresholdHigh")]
    OpenBracketNotLast { table: String, index: usize },
    #[error("{table}: bracket {index} has negative rate {rate}")]
    NegativeRate {
        table: String,
        index: usize,
        rate: Decimal,
    },
    #[error("{table}: rate decreases at bracket {index}: {previous} -> {rate}")]
    RateDecreases {
        table: String,
        index: usize,
        previous: Decimal,
        rate: Decimal,
    },
    #[error(
        "{table}: cumulativeDeductionAtLow of bracket {index} is {supplied}, recomputed {expected}"
    )]
    CumulativeMismatch {
        table: String,
        index: usize,
        supplied: Decimal,
        expected: Decimal,
    },
    #[error("{table}: deduction limit table must end with a bounded bracket")]
    MissingCeiling { table: String },
    #[error("{table}: progressive table must end with an open-ended bracket")]
    UnexpectedCeiling { table: String },
}

/// Root of the rate table JSON document.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RateTableDocument {
    /// Tax year the tables apply to
    pub year: i32,
    /// Fixed allowance subtracted once from the combined taxable base
    pub basic_deduction: BasicDeduction,
    /// Ordinary progressive capital-gains brackets
    pub progressive_rates: BracketListDocument,
    /// Per-asset-class long-term holding deduction limit ramps
    pub long_term_holding_special_deduction_limit: BTreeMap<AssetClass, DeductionLimitDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BasicDeduction {
    #[schemars(with = "f64")]
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BracketListDocument {
    pub brackets: Vec<BracketRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeductionLimitDocument {
    /// Whole holding years an entry needs for its gain to count as long-term
    pub minimum_holding_years: u32,
    pub brackets: Vec<BracketRow>,
}

/// One bracket as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BracketRow {
    #[schemars(with = "f64")]
    pub threshold_low: Decimal,
    /// Exclusive upper threshold; omitted for an open-ended top bracket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<f64>")]
    pub threshold_high: Option<Decimal>,
    /// Marginal rate within this bracket (e.g. 0.06 for 6%)
    #[schemars(with = "f64")]
    pub rate: Decimal,
    /// Exact amount due at thresholdLow; recomputed and verified when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<f64>")]
    pub cumulative_deduction_at_low: Option<Decimal>,
}

/// A validated bracket with its precomputed cumulative amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bracket {
    pub threshold_low: Decimal,
    pub threshold_high: Option<Decimal>,
    pub rate: Decimal,
    pub cumulative_at_low: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableShape {
    /// Final bracket open-ended (progressive tax tables)
    OpenEnded,
    /// Final bracket bounded; its top is the clip ceiling (deduction ramps)
    Bounded,
}

/// Round to the whole currency unit, half away from zero.
///
/// Applied to every rate multiplication so computed amounts land on whole
/// currency units the way the statutory forms expect.
pub fn round_to_unit(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

/// An ordered, validated bracket sequence supporting O(log n) marginal lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BracketTable {
    brackets: Vec<Bracket>,
}

impl BracketTable {
    fn new(rows: &[BracketRow], shape: TableShape, table: &str) -> Result<Self, RateTableError> {
        if rows.is_empty() {
            return Err(RateTableError::Empty {
                table: table.to_string(),
            });
        }
        if rows[0].threshold_low != Decimal::ZERO {
            return Err(RateTableError::FirstThresholdNotZero {
                table: table.to_string(),
                found: rows[0].threshold_low,
            });
        }

        let last = rows.len() - 1;
        let mut brackets = Vec::with_capacity(rows.len());
        let mut cumulative = Decimal::ZERO;
        for (index, row) in rows.iter().enumerate() {
            if row.rate < Decimal::ZERO {
                return Err(RateTableError::NegativeRate {
                    table: table.to_string(),
                    index,
                    rate: row.rate,
                });
            }
            if index > 0 {
                let previous = &rows[index - 1];
                if row.rate < previous.rate {
                    return Err(RateTableError::RateDecreases {
                        table: table.to_string(),
                        index,
                        previous: previous.rate,
                        rate: row.rate,
                    });
                }
                // previous.threshold_high is Some here, enforced on the prior iteration
                let high = previous.threshold_high.unwrap_or_default();
                if high != row.threshold_low {
                    return Err(RateTableError::NotContiguous {
                        table: table.to_string(),
                        index,
                        high,
                        low: row.threshold_low,
                    });
                }
            }
            match row.threshold_high {
                Some(high) if high <= row.threshold_low => {
                    return Err(RateTableError::InvertedBracket {
                        table: table.to_string(),
                        index,
                        low: row.threshold_low,
                        high,
                    });
                }
                None if index != last => {
                    return Err(RateTableError::OpenBracketNotLast {
                        table: table.to_string(),
                        index,
                    });
                }
                _ => {}
            }
            if let Some(supplied) = row.cumulative_deduction_at_low {
                if supplied != cumulative {
                    return Err(RateTableError::CumulativeMismatch {
                        table: table.to_string(),
                        index,
                        supplied,
                        expected: cumulative,
                    });
                }
            }
            brackets.push(Bracket {
                threshold_low: row.threshold_low,
                threshold_high: row.threshold_high,
                rate: row.rate,
                cumulative_at_low: cumulative,
            });
            if let Some(high) = row.threshold_high {
                cumulative += round_to_unit((high - row.threshold_low) * row.rate);
            }
        }

        let bounded = rows[last].threshold_high.is_some();
        match shape {
            TableShape::Bounded if !bounded => {
                return Err(RateTableError::MissingCeiling {
                    table: table.to_string(),
                })
            }
            TableShape::OpenEnded if bounded => {
                return Err(RateTableError::UnexpectedCeiling {
                    table: table.to_string(),
                })
            }
            _ => {}
        }

        Ok(BracketTable { brackets })
    }

    pub fn brackets(&self) -> &[Bracket] {
        &self.brackets
    }

    /// The bracket whose `[thresholdLow, thresholdHigh)` range contains `amount`.
    /// `None` for non-positive amounts; amounts at or above a bounded table's
    /// top threshold fall in the final bracket.
    pub fn bracket_containing(&self, amount: Decimal) -> Option<&Bracket> {
        if amount <= Decimal::ZERO {
            return None;
        }
        // first threshold is zero, so amount > 0 lands past at least one bracket
        let idx = self
            .brackets
            .partition_point(|b| b.threshold_low <= amount);
        idx.checked_sub(1).and_then(|i| self.brackets.get(i))
    }

    /// Marginal amount due at `amount`: the containing bracket's cumulative
    /// plus its rate applied to the remainder above the lower threshold, each
    /// rate product rounded to the whole unit. Clipped at the table ceiling
    /// when the table is bounded. Non-positive amounts are due nothing.
    pub fn due_at(&self, amount: Decimal) -> Decimal {
        let Some(bracket) = self.bracket_containing(amount) else {
            return Decimal::ZERO;
        };
        let due =
            bracket.cumulative_at_low + round_to_unit((amount - bracket.threshold_low) * bracket.rate);
        match self.ceiling() {
            Some(ceiling) => due.min(ceiling),
            None => due,
        }
    }

    /// Amount due at a bounded table's top threshold; `None` when open-ended.
    pub fn ceiling(&self) -> Option<Decimal> {
        let last = self.brackets.last()?;
        let high = last.threshold_high?;
        Some(last.cumulative_at_low + round_to_unit((high - last.threshold_low) * last.rate))
    }
}

/// A long-term holding deduction limit for one asset class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeductionLimit {
    minimum_holding_years: u32,
    ramp: BracketTable,
}

impl DeductionLimit {
    pub fn minimum_holding_years(&self) -> u32 {
        self.minimum_holding_years
    }

    /// Deduction allowed for a long-term gain, clipped at the ramp ceiling.
    pub fn deduction_for(&self, gain: Decimal) -> Decimal {
        self.ramp.due_at(gain)
    }

    pub fn ramp(&self) -> &BracketTable {
        &self.ramp
    }
}

/// Validated, immutable rate repository for one tax year. Shared by reference
/// across computations; nothing here is mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateTable {
    year: i32,
    basic_deduction: Decimal,
    progressive: BracketTable,
    long_term_limits: BTreeMap<AssetClass, DeductionLimit>,
}

impl RateTable {
    pub fn new(doc: RateTableDocument) -> Result<Self, RateTableError> {
        let progressive = BracketTable::new(
            &doc.progressive_rates.brackets,
            TableShape::OpenEnded,
            "progressiveRates",
        )?;
        let mut long_term_limits = BTreeMap::new();
        for (class, limit) in &doc.long_term_holding_special_deduction_limit {
            let table = format!("longTermHoldingSpecialDeductionLimit.{class}");
            let ramp = BracketTable::new(&limit.brackets, TableShape::Bounded, &table)?;
            long_term_limits.insert(
                *class,
                DeductionLimit {
                    minimum_holding_years: limit.minimum_holding_years,
                    ramp,
                },
            );
        }
        log::debug!(
            "rate table {}: {} progressive brackets, deduction limits for {} asset classes",
            doc.year,
            progressive.brackets.len(),
            long_term_limits.len()
        );
        Ok(RateTable {
            year: doc.year,
            basic_deduction: doc.basic_deduction.amount,
            progressive,
            long_term_limits,
        })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn basic_deduction(&self) -> Decimal {
        self.basic_deduction
    }

    pub fn progressive(&self) -> &BracketTable {
        &self.progressive
    }

    /// Progressive tax due at `base` under the ordinary bracket table.
    pub fn tax_due(&self, base: Decimal) -> Decimal {
        self.progressive.due_at(base)
    }

    /// Long-term deduction limit for an asset class, if the table defines one.
    pub fn limit(&self, class: AssetClass) -> Option<&DeductionLimit> {
        self.long_term_limits.get(&class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn row(low: Decimal, high: Option<Decimal>, rate: Decimal) -> BracketRow {
        BracketRow {
            threshold_low: low,
            threshold_high: high,
            rate,
            cumulative_deduction_at_low: None,
        }
    }

    /// The 2024 ordinary progressive brackets used across the test suite.
    fn progressive_2024() -> Vec<BracketRow> {
        vec![
            row(dec!(0), Some(dec!(14000000)), dec!(0.06)),
            row(dec!(14000000), Some(dec!(50000000)), dec!(0.15)),
            row(dec!(50000000), Some(dec!(88000000)), dec!(0.24)),
            row(dec!(88000000), Some(dec!(150000000)), dec!(0.35)),
            row(dec!(150000000), Some(dec!(300000000)), dec!(0.38)),
            row(dec!(300000000), Some(dec!(500000000)), dec!(0.40)),
            row(dec!(500000000), Some(dec!(1000000000)), dec!(0.42)),
            row(dec!(1000000000), None, dec!(0.45)),
        ]
    }

    fn progressive_table() -> BracketTable {
        BracketTable::new(&progressive_2024(), TableShape::OpenEnded, "progressiveRates").unwrap()
    }

    #[test]
    fn cumulative_recomputed_from_thresholds() {
        let table = progressive_table();
        let cumulative: Vec<Decimal> = table
            .brackets()
            .iter()
            .map(|b| b.cumulative_at_low)
            .collect();
        assert_eq!(
            cumulative,
            vec![
                dec!(0),
                dec!(840000),
                dec!(6240000),
                dec!(15360000),
                dec!(37060000),
                dec!(94060000),
                dec!(174060000),
                dec!(384060000),
            ]
        );
    }

    #[test]
    fn supplied_cumulative_accepted_when_exact() {
        let mut rows = progressive_2024();
        rows[2].cumulative_deduction_at_low = Some(dec!(6240000));
        assert!(BracketTable::new(&rows, TableShape::OpenEnded, "t").is_ok());
    }

    #[test]
    fn supplied_cumulative_rejected_when_wrong() {
        let mut rows = progressive_2024();
        rows[2].cumulative_deduction_at_low = Some(dec!(6240001));
        let err = BracketTable::new(&rows, TableShape::OpenEnded, "t").unwrap_err();
        assert_eq!(
            err,
            RateTableError::CumulativeMismatch {
                table: "t".to_string(),
                index: 2,
                supplied: dec!(6240001),
                expected: dec!(6240000),
            }
        );
    }

    #[test]
    fn due_in_first_bracket() {
        // 2,500,000 * 6% = 150,000
        assert_eq!(progressive_table().due_at(dec!(2500000)), dec!(150000));
    }

    #[test]
    fn due_uses_closed_form_mid_table() {
        // 6,240,000 + (60,000,000 - 50,000,000) * 24% = 8,640,000
        assert_eq!(progressive_table().due_at(dec!(60000000)), dec!(8640000));
    }

    #[test]
    fn due_at_bracket_threshold_equals_cumulative() {
        let table = progressive_table();
        assert_eq!(table.due_at(dec!(14000000)), dec!(840000));
        assert_eq!(table.due_at(dec!(50000000)), dec!(6240000));
        assert_eq!(table.due_at(dec!(1000000000)), dec!(384060000));
    }

    #[test]
    fn due_in_open_top_bracket() {
        // 384,060,000 + (1,200,000,000 - 1,000,000,000) * 45% = 474,060,000
        assert_eq!(
            progressive_table().due_at(dec!(1200000000)),
            dec!(474060000)
        );
    }

    #[test]
    fn due_at_zero_or_negative_is_zero() {
        let table = progressive_table();
        assert_eq!(table.due_at(dec!(0)), dec!(0));
        assert_eq!(table.due_at(dec!(-500000)), dec!(0));
    }

    #[test]
    fn bracket_containing_picks_lower_inclusive() {
        let table = progressive_table();
        assert_eq!(
            table.bracket_containing(dec!(14000000)).unwrap().rate,
            dec!(0.15)
        );
        assert_eq!(
            table.bracket_containing(dec!(13999999)).unwrap().rate,
            dec!(0.06)
        );
        assert!(table.bracket_containing(dec!(0)).is_none());
    }

    #[test]
    fn rate_product_rounds_half_away_from_zero() {
        // 50 * 0.15 = 7.5 rounds to 8
        let rows = vec![row(dec!(0), Some(dec!(1000)), dec!(0.15))];
        let table = BracketTable::new(&rows, TableShape::Bounded, "t").unwrap();
        assert_eq!(table.due_at(dec!(50)), dec!(8));
        assert_eq!(round_to_unit(dec!(7.5)), dec!(8));
        assert_eq!(round_to_unit(dec!(7.4)), dec!(7));
        assert_eq!(round_to_unit(dec!(-7.5)), dec!(-8));
    }

    #[test]
    fn bounded_table_clips_at_ceiling() {
        let rows = vec![
            row(dec!(0), Some(dec!(100000000)), dec!(0.10)),
            row(dec!(100000000), Some(dec!(500000000)), dec!(0.20)),
        ];
        let table = BracketTable::new(&rows, TableShape::Bounded, "t").unwrap();
        // ceiling = 10,000,000 + 400,000,000 * 20% = 90,000,000
        assert_eq!(table.ceiling(), Some(dec!(90000000)));
        assert_eq!(table.due_at(dec!(500000000)), dec!(90000000));
        assert_eq!(table.due_at(dec!(750000000)), dec!(90000000));
    }

    #[test]
    fn empty_table_errors() {
        let err = BracketTable::new(&[], TableShape::OpenEnded, "t").unwrap_err();
        assert_eq!(
            err,
            RateTableError::Empty {
                table: "t".to_string()
            }
        );
    }

    #[test]
    fn first_threshold_must_be_zero() {
        let rows = vec![row(dec!(1000), None, dec!(0.06))];
        let err = BracketTable::new(&rows, TableShape::OpenEnded, "t").unwrap_err();
        assert_eq!(
            err,
            RateTableError::FirstThresholdNotZero {
                table: "t".to_string(),
                found: dec!(1000),
            }
        );
    }

    #[test]
    fn gap_between_brackets_errors() {
        let rows = vec![
            row(dec!(0), Some(dec!(14000000)), dec!(0.06)),
            row(dec!(15000000), None, dec!(0.15)),
        ];
        let err = BracketTable::new(&rows, TableShape::OpenEnded, "t").unwrap_err();
        assert_eq!(
            err,
            RateTableError::NotContiguous {
                table: "t".to_string(),
                index: 1,
                high: dec!(14000000),
                low: dec!(15000000),
            }
        );
    }

    #[test]
    fn overlapping_brackets_error() {
        let rows = vec![
            row(dec!(0), Some(dec!(14000000)), dec!(0.06)),
            row(dec!(13000000), None, dec!(0.15)),
        ];
        let err = BracketTable::new(&rows, TableShape::OpenEnded, "t").unwrap_err();
        assert!(matches!(err, RateTableError::NotContiguous { .. }));
    }

    #[test]
    fn inverted_bracket_errors() {
        let rows = vec![row(dec!(0), Some(dec!(0)), dec!(0.06))];
        let err = BracketTable::new(&rows, TableShape::Bounded, "t").unwrap_err();
        assert_eq!(
            err,
            RateTableError::InvertedBracket {
                table: "t".to_string(),
                index: 0,
                low: dec!(0),
                high: dec!(0),
            }
        );
    }

    #[test]
    fn decreasing_rate_errors() {
        let rows = vec![
            row(dec!(0), Some(dec!(14000000)), dec!(0.15)),
            row(dec!(14000000), None, dec!(0.06)),
        ];
        let err = BracketTable::new(&rows, TableShape::OpenEnded, "t").unwrap_err();
        assert_eq!(
            err,
            RateTableError::RateDecreases {
                table: "t".to_string(),
                index: 1,
                previous: dec!(0.15),
                rate: dec!(0.06),
            }
        );
    }

    #[test]
    fn equal_rates_are_allowed() {
        let rows = vec![
            row(dec!(0), Some(dec!(14000000)), dec!(0.15)),
            row(dec!(14000000), None, dec!(0.15)),
        ];
        assert!(BracketTable::new(&rows, TableShape::OpenEnded, "t").is_ok());
    }

    #[test]
    fn negative_rate_errors() {
        let rows = vec![row(dec!(0), None, dec!(-0.06))];
        let err = BracketTable::new(&rows, TableShape::OpenEnded, "t").unwrap_err();
        assert!(matches!(err, RateTableError::NegativeRate { index: 0, .. }));
    }

    #[test]
    fn open_bracket_must_be_last() {
        let rows = vec![
            row(dec!(0), None, dec!(0.06)),
            row(dec!(14000000), None, dec!(0.15)),
        ];
        let err = BracketTable::new(&rows, TableShape::OpenEnded, "t").unwrap_err();
        assert_eq!(
            err,
            RateTableError::OpenBracketNotLast {
                table: "t".to_string(),
                index: 0,
            }
        );
    }

    #[test]
    fn deduction_table_requires_ceiling() {
        let rows = vec![row(dec!(0), None, dec!(0.10))];
        let err = BracketTable::new(&rows, TableShape::Bounded, "t").unwrap_err();
        assert_eq!(
            err,
            RateTableError::MissingCeiling {
                table: "t".to_string()
            }
        );
    }

    #[test]
    fn progressive_table_requires_open_top() {
        let rows = vec![row(dec!(0), Some(dec!(14000000)), dec!(0.06))];
        let err = BracketTable::new(&rows, TableShape::OpenEnded, "t").unwrap_err();
        assert_eq!(
            err,
            RateTableError::UnexpectedCeiling {
                table: "t".to_string()
            }
        );
    }

    #[test]
    fn rate_table_from_document() {
        let doc = RateTableDocument {
            year: 2024,
            basic_deduction: BasicDeduction {
                amount: dec!(2500000),
            },
            progressive_rates: BracketListDocument {
                brackets: progressive_2024(),
            },
            long_term_holding_special_deduction_limit: [(
                AssetClass::RealEstate,
                DeductionLimitDocument {
                    minimum_holding_years: 3,
                    brackets: vec![
                        row(dec!(0), Some(dec!(100000000)), dec!(0.10)),
                        row(dec!(100000000), Some(dec!(500000000)), dec!(0.20)),
                    ],
                },
            )]
            .into_iter()
            .collect(),
        };

        let table = RateTable::new(doc).unwrap();
        assert_eq!(table.year(), 2024);
        assert_eq!(table.basic_deduction(), dec!(2500000));
        assert_eq!(table.tax_due(dec!(2500000)), dec!(150000));

        let limit = table.limit(AssetClass::RealEstate).unwrap();
        assert_eq!(limit.minimum_holding_years(), 3);
        assert_eq!(limit.deduction_for(dec!(150000000)), dec!(20000000));
        assert!(table.limit(AssetClass::VirtualAssets).is_none());
    }

    #[test]
    fn invalid_ramp_names_the_asset_class() {
        let doc = RateTableDocument {
            year: 2024,
            basic_deduction: BasicDeduction {
                amount: dec!(2500000),
            },
            progressive_rates: BracketListDocument {
                brackets: progressive_2024(),
            },
            long_term_holding_special_deduction_limit: [(
                AssetClass::FinancialAssets,
                DeductionLimitDocument {
                    minimum_holding_years: 1,
                    brackets: vec![row(dec!(0), None, dec!(0.05))],
                },
            )]
            .into_iter()
            .collect(),
        };

        let err = RateTable::new(doc).unwrap_err();
        assert_eq!(
            err,
            RateTableError::MissingCeiling {
                table: "longTermHoldingSpecialDeductionLimit.financial_assets".to_string(),
            }
        );
    }
}
