//! Form and schedule schema documents.
//!
//! The form document declares every field of the filing in order, plus the
//! bindings that tell the engine where merged aggregates and rate constants
//! land and which fields feed and receive the tax computation. Schedule
//! documents declare, per asset class, how entry lists reduce to aggregates.

use crate::expr::Expr;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Asset classes a schedule can cover.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    RealEstate,
    FinancialAssets,
    VirtualAssets,
}

impl AssetClass {
    pub const ALL: [AssetClass; 3] = [
        AssetClass::RealEstate,
        AssetClass::FinancialAssets,
        AssetClass::VirtualAssets,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::RealEstate => "real_estate",
            AssetClass::FinancialAssets => "financial_assets",
            AssetClass::VirtualAssets => "virtual_assets",
        }
    }

    pub fn from_str(s: &str) -> Option<AssetClass> {
        match s {
            "real_estate" => Some(AssetClass::RealEstate),
            "financial_assets" => Some(AssetClass::FinancialAssets),
            "virtual_assets" => Some(AssetClass::VirtualAssets),
            _ => None,
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The four canonical aggregate keys every schedule must produce and the form
/// merges across schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AggregateKey {
    TotalTransferAmount,
    TotalAcquisitionAmount,
    TotalExpenses,
    TotalGain,
}

impl AggregateKey {
    pub const ALL: [AggregateKey; 4] = [
        AggregateKey::TotalTransferAmount,
        AggregateKey::TotalAcquisitionAmount,
        AggregateKey::TotalExpenses,
        AggregateKey::TotalGain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateKey::TotalTransferAmount => "totalTransferAmount",
            AggregateKey::TotalAcquisitionAmount => "totalAcquisitionAmount",
            AggregateKey::TotalExpenses => "totalExpenses",
            AggregateKey::TotalGain => "totalGain",
        }
    }
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a form field gets its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Supplied by the caller (taxpayer-level value)
    Input,
    /// Assigned by the engine from a binding (merged aggregate or rate constant)
    Aggregate,
    /// Computed from an expression over other fields
    Derived,
}

/// One declared form field.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FieldDef {
    /// Unique field name, referenced by expressions and bindings
    pub name: String,
    pub kind: FieldKind,
    /// Computation for derived fields; must be absent on input/aggregate fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub expression: Option<Expr>,
    /// Optional human-readable label for display
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Canonical aggregate key → form field that receives the merged value.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AggregateBindings {
    pub total_transfer_amount: String,
    pub total_acquisition_amount: String,
    pub total_expenses: String,
    pub total_gain: String,
}

impl AggregateBindings {
    /// Key/field pairs in canonical key order.
    pub fn pairs(&self) -> [(AggregateKey, &str); 4] {
        [
            (
                AggregateKey::TotalTransferAmount,
                self.total_transfer_amount.as_str(),
            ),
            (
                AggregateKey::TotalAcquisitionAmount,
                self.total_acquisition_amount.as_str(),
            ),
            (AggregateKey::TotalExpenses, self.total_expenses.as_str()),
            (AggregateKey::TotalGain, self.total_gain.as_str()),
        ]
    }

    pub fn field_for(&self, key: AggregateKey) -> &str {
        match key {
            AggregateKey::TotalTransferAmount => &self.total_transfer_amount,
            AggregateKey::TotalAcquisitionAmount => &self.total_acquisition_amount,
            AggregateKey::TotalExpenses => &self.total_expenses,
            AggregateKey::TotalGain => &self.total_gain,
        }
    }
}

/// Rate-table constants → form fields that receive them.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RateBindings {
    /// Field that receives `basicDeduction.amount` from the rate table
    pub basic_deduction: String,
}

/// Fields that feed and receive the progressive tax computation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaxBindings {
    /// Field the progressive tax calculator reads as its base
    pub taxable_base: String,
    /// Field the assembler fills with the computed tax
    pub progressive_tax: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BindingMap {
    pub aggregates: AggregateBindings,
    pub rates: RateBindings,
    pub tax: TaxBindings,
}

/// The form document: ordered field declarations plus bindings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FormSchema {
    pub fields: Vec<FieldDef>,
    pub bindings: BindingMap,
}

impl FormSchema {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// A schedule document for one asset class.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSchema {
    pub asset_class: AssetClass,
    /// Aggregate key → expression over this schedule's entries. Must cover the
    /// four canonical keys; schedule-specific extras are allowed.
    #[schemars(with = "BTreeMap<String, String>")]
    pub aggregates: BTreeMap<String, Expr>,
}

impl ScheduleSchema {
    /// Canonical keys this schedule's aggregate map fails to declare.
    pub fn missing_canonical_keys(&self) -> Vec<AggregateKey> {
        AggregateKey::ALL
            .iter()
            .copied()
            .filter(|key| !self.aggregates.contains_key(key.as_str()))
            .collect()
    }
}
