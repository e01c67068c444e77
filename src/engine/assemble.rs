//! Result assembly: pairs every declared form field with its resolved value,
//! in declaration order, and seals the computation into an immutable record.

use crate::engine::EngineError;
use crate::schema::FormSchema;
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// One resolved form field in the final result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValue {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub value: Decimal,
}

/// The sealed outcome of a computation. Field order matches the form's
/// declaration order and nothing is mutable after assembly; equal inputs
/// produce results with equal fingerprints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputationResult {
    values: Vec<FieldValue>,
    progressive_tax: Decimal,
}

impl ComputationResult {
    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<Decimal> {
        self.values
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.value)
    }

    pub fn progressive_tax(&self) -> Decimal {
        self.progressive_tax
    }

    /// SHA-256 over the ordered `name=value` rows, hex encoded. Two runs over
    /// identical inputs fingerprint identically.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for field in &self.values {
            hasher.update(field.name.as_bytes());
            hasher.update(b"=");
            hasher.update(field.value.to_string().as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

/// Pair each declared field with its resolved value. The progressive-tax
/// field takes `tax`; every other field must already be resolved.
pub fn assemble(
    form: &FormSchema,
    resolved: &BTreeMap<String, Decimal>,
    tax: Decimal,
) -> Result<ComputationResult, EngineError> {
    let tax_field = &form.bindings.tax.progressive_tax;
    let mut values = Vec::with_capacity(form.fields.len());
    for field in &form.fields {
        let value = if field.name == *tax_field {
            tax
        } else {
            match resolved.get(&field.name) {
                Some(value) => *value,
                None => return Err(EngineError::IncompleteResolution(field.name.clone())),
            }
        };
        values.push(FieldValue {
            name: field.name.clone(),
            label: field.label.clone(),
            value,
        });
    }
    Ok(ComputationResult {
        values,
        progressive_tax: tax,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, FieldKind};
    use rust_decimal_macros::dec;

    fn form() -> FormSchema {
        serde_json::from_str(
            r#"{
                "fields": [
                    { "name": "netGain", "kind": "aggregate", "label": "Net gain" },
                    { "name": "basicDeduction", "kind": "aggregate" },
                    {
                        "name": "taxableBase",
                        "kind": "derived",
                        "expression": "max(0, netGain - basicDeduction)"
                    },
                    { "name": "progressiveTax", "kind": "aggregate" }
                ],
                "bindings": {
                    "aggregates": {
                        "totalTransferAmount": "netGain",
                        "totalAcquisitionAmount": "netGain",
                        "totalExpenses": "netGain",
                        "totalGain": "netGain"
                    },
                    "rates": { "basicDeduction": "basicDeduction" },
                    "tax": { "taxableBase": "taxableBase", "progressiveTax": "progressiveTax" }
                }
            }"#,
        )
        .unwrap()
    }

    fn resolved() -> BTreeMap<String, Decimal> {
        [
            ("netGain".to_string(), dec!(5000000)),
            ("basicDeduction".to_string(), dec!(2500000)),
            ("taxableBase".to_string(), dec!(2500000)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn values_follow_declaration_order() {
        let result = assemble(&form(), &resolved(), dec!(150000)).unwrap();
        let names: Vec<&str> = result.values().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            ["netGain", "basicDeduction", "taxableBase", "progressiveTax"]
        );
        assert_eq!(result.get("taxableBase"), Some(dec!(2500000)));
        assert_eq!(result.get("progressiveTax"), Some(dec!(150000)));
        assert_eq!(result.progressive_tax(), dec!(150000));
    }

    #[test]
    fn missing_value_is_incomplete_resolution() {
        let mut partial = resolved();
        partial.remove("taxableBase");
        let err = assemble(&form(), &partial, dec!(150000)).unwrap_err();
        assert_eq!(
            err,
            EngineError::IncompleteResolution("taxableBase".to_string())
        );
    }

    #[test]
    fn unresolved_tax_field_is_allowed() {
        // the progressive-tax field is filled here, not by the resolver
        let mut form = form();
        form.fields.push(FieldDef {
            name: "note".to_string(),
            kind: FieldKind::Aggregate,
            expression: None,
            label: None,
        });
        let mut resolved = resolved();
        resolved.insert("note".to_string(), dec!(1));
        let result = assemble(&form, &resolved, dec!(150000)).unwrap();
        assert_eq!(result.get("progressiveTax"), Some(dec!(150000)));
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let result = assemble(&form(), &resolved(), dec!(150000)).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("progressiveTax").is_some());
        let first = &json["values"][0];
        assert_eq!(first["name"], "netGain");
        assert_eq!(first["label"], "Net gain");
        // unlabeled fields omit the key entirely
        assert!(json["values"][1].get("label").is_none());
    }

    #[test]
    fn fingerprint_tracks_the_values() {
        let result = assemble(&form(), &resolved(), dec!(150000)).unwrap();
        let again = assemble(&form(), &resolved(), dec!(150000)).unwrap();
        assert_eq!(result.fingerprint(), again.fingerprint());

        let mut changed = resolved();
        changed.insert("netGain".to_string(), dec!(5000001));
        let other = assemble(&form(), &changed, dec!(150000)).unwrap();
        assert_ne!(result.fingerprint(), other.fingerprint());
    }
}
