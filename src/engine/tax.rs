//! Progressive tax computation: applies the per-class long-term holding
//! special deduction to the taxable base, then prices the remainder against
//! the progressive bracket table in closed form.

use crate::engine::{long_term_gain, EngineError};
use crate::entry::ScheduleEntry;
use crate::rates::RateTable;
use crate::schema::AssetClass;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Compute the progressive tax due on `taxable_base`.
///
/// Every asset class in `holdings` must carry a long-term deduction limit in
/// the rate table, whether or not it ends up claiming one. The deduction only
/// accrues for classes whose qualifying long-term gain is positive, and the
/// post-deduction base is floored at zero, so the tax is never negative.
pub fn compute_tax(
    taxable_base: Decimal,
    rates: &RateTable,
    holdings: &BTreeMap<AssetClass, &[ScheduleEntry]>,
) -> Result<Decimal, EngineError> {
    let mut total_deduction = Decimal::ZERO;
    for (class, entries) in holdings {
        // lookup happens before the gain is inspected; a class the rate
        // table does not cover is an error even when it claims nothing
        let limit = rates.limit(*class).ok_or_else(|| {
            EngineError::RateTableMismatch(format!(
                "no long-term holding deduction limit for asset class '{class}'"
            ))
        })?;
        let gain = long_term_gain(entries, limit.minimum_holding_years());
        if gain > Decimal::ZERO {
            let deduction = limit.deduction_for(gain);
            log::debug!("{class}: long-term gain {gain} earns special deduction {deduction}");
            total_deduction += deduction;
        }
    }

    let base = (taxable_base - total_deduction).max(Decimal::ZERO);
    let tax = rates.tax_due(base);
    log::debug!("taxable base {taxable_base} less deductions {total_deduction} -> {base}, tax {tax}");
    Ok(tax)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::{
        BasicDeduction, BracketListDocument, BracketRow, DeductionLimitDocument, RateTableDocument,
    };
    use rust_decimal_macros::dec;

    fn row(low: Decimal, high: Option<Decimal>, rate: Decimal) -> BracketRow {
        BracketRow {
            threshold_low: low,
            threshold_high: high,
            rate,
            cumulative_deduction_at_low: None,
        }
    }

    fn rates_2024() -> RateTable {
        let progressive = vec![
            row(dec!(0), Some(dec!(14000000)), dec!(0.06)),
            row(dec!(14000000), Some(dec!(50000000)), dec!(0.15)),
            row(dec!(50000000), Some(dec!(88000000)), dec!(0.24)),
            row(dec!(88000000), Some(dec!(150000000)), dec!(0.35)),
            row(dec!(150000000), Some(dec!(300000000)), dec!(0.38)),
            row(dec!(300000000), Some(dec!(500000000)), dec!(0.40)),
            row(dec!(500000000), Some(dec!(1000000000)), dec!(0.42)),
            row(dec!(1000000000), None, dec!(0.45)),
        ];
        let real_estate = DeductionLimitDocument {
            minimum_holding_years: 3,
            brackets: vec![
                row(dec!(0), Some(dec!(100000000)), dec!(0.10)),
                row(dec!(100000000), Some(dec!(500000000)), dec!(0.20)),
                row(dec!(500000000), Some(dec!(1000000000)), dec!(0.30)),
            ],
        };
        let financial = DeductionLimitDocument {
            minimum_holding_years: 1,
            brackets: vec![
                row(dec!(0), Some(dec!(200000000)), dec!(0.05)),
                row(dec!(200000000), Some(dec!(600000000)), dec!(0.10)),
            ],
        };
        RateTable::new(RateTableDocument {
            year: 2024,
            basic_deduction: BasicDeduction {
                amount: dec!(2500000),
            },
            progressive_rates: BracketListDocument {
                brackets: progressive,
            },
            long_term_holding_special_deduction_limit: [
                (AssetClass::RealEstate, real_estate),
                (AssetClass::FinancialAssets, financial),
            ]
            .into_iter()
            .collect(),
        })
        .unwrap()
    }

    fn entry(transfer: Decimal, acquisition: Decimal, years: Option<u32>) -> ScheduleEntry {
        ScheduleEntry {
            description: None,
            acquisition_date: None,
            transfer_date: None,
            holding_years: years,
            transfer_amount: transfer,
            acquisition_amount: acquisition,
            expenses: Decimal::ZERO,
            extras: BTreeMap::new(),
        }
    }

    fn holdings<'a>(
        pairs: &[(AssetClass, &'a [ScheduleEntry])],
    ) -> BTreeMap<AssetClass, &'a [ScheduleEntry]> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn first_bracket_base_prices_at_six_percent() {
        let tax = compute_tax(dec!(2500000), &rates_2024(), &BTreeMap::new()).unwrap();
        assert_eq!(tax, dec!(150000));
    }

    #[test]
    fn zero_base_owes_nothing() {
        let tax = compute_tax(dec!(0), &rates_2024(), &BTreeMap::new()).unwrap();
        assert_eq!(tax, dec!(0));
    }

    #[test]
    fn tax_never_goes_negative() {
        let tax = compute_tax(dec!(-500000), &rates_2024(), &BTreeMap::new()).unwrap();
        assert_eq!(tax, dec!(0));
    }

    #[test]
    fn long_term_holdings_reduce_the_base() {
        // 50,000,000 gain held five years: 10% ramp -> 5,000,000 deduction
        let entries = [entry(dec!(60000000), dec!(10000000), Some(5))];
        let tax = compute_tax(
            dec!(47500000),
            &rates_2024(),
            &holdings(&[(AssetClass::RealEstate, &entries)]),
        )
        .unwrap();
        // base 42,500,000: 840,000 + (42,500,000 - 14,000,000) * 15%
        assert_eq!(tax, dec!(5115000));
    }

    #[test]
    fn short_term_holdings_earn_no_deduction() {
        let entries = [entry(dec!(60000000), dec!(10000000), Some(2))];
        let tax = compute_tax(
            dec!(47500000),
            &rates_2024(),
            &holdings(&[(AssetClass::RealEstate, &entries)]),
        )
        .unwrap();
        // full base 47,500,000: 840,000 + 33,500,000 * 15%
        assert_eq!(tax, dec!(5865000));
    }

    #[test]
    fn deduction_larger_than_base_floors_at_zero() {
        let entries = [entry(dec!(60000000), dec!(10000000), Some(5))];
        let tax = compute_tax(
            dec!(1000000),
            &rates_2024(),
            &holdings(&[(AssetClass::RealEstate, &entries)]),
        )
        .unwrap();
        assert_eq!(tax, dec!(0));
    }

    #[test]
    fn deduction_is_clipped_at_the_ramp_ceiling() {
        // 2,000,000,000 long-term gain overshoots the financial ramp; the
        // deduction clips at its ceiling of 50,000,000
        let entries = [entry(dec!(2100000000), dec!(100000000), Some(2))];
        let tax = compute_tax(
            dec!(100000000),
            &rates_2024(),
            &holdings(&[(AssetClass::FinancialAssets, &entries)]),
        )
        .unwrap();
        // base 50,000,000 sits exactly on the 24% bracket's lower threshold
        assert_eq!(tax, dec!(6240000));
    }

    #[test]
    fn negative_long_term_gain_earns_no_deduction() {
        let entries = [entry(dec!(10000000), dec!(60000000), Some(10))];
        let tax = compute_tax(
            dec!(2500000),
            &rates_2024(),
            &holdings(&[(AssetClass::RealEstate, &entries)]),
        )
        .unwrap();
        assert_eq!(tax, dec!(150000));
    }

    #[test]
    fn class_without_limit_is_rate_table_mismatch() {
        let entries = [entry(dec!(5000000), dec!(1000000), Some(5))];
        let err = compute_tax(
            dec!(2500000),
            &rates_2024(),
            &holdings(&[(AssetClass::VirtualAssets, &entries)]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            EngineError::RateTableMismatch(
                "no long-term holding deduction limit for asset class 'virtual_assets'"
                    .to_string()
            )
        );
    }

    #[test]
    fn class_without_limit_errors_even_at_a_loss() {
        let entries = [entry(dec!(1000000), dec!(5000000), Some(5))];
        let err = compute_tax(
            dec!(0),
            &rates_2024(),
            &holdings(&[(AssetClass::VirtualAssets, &entries)]),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::RateTableMismatch(_)));
    }

    #[test]
    fn deductions_accumulate_across_classes() {
        let re = [entry(dec!(60000000), dec!(10000000), Some(5))];
        let fin = [entry(dec!(30000000), dec!(10000000), Some(3))];
        // deductions: 5,000,000 (real estate) + 1,000,000 (financial)
        let tax = compute_tax(
            dec!(20000000),
            &rates_2024(),
            &holdings(&[
                (AssetClass::RealEstate, &re),
                (AssetClass::FinancialAssets, &fin),
            ]),
        )
        .unwrap();
        // base 14,000,000 opens the 15% bracket exactly
        assert_eq!(tax, dec!(840000));
    }
}
