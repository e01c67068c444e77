//! Binding resolution: merges schedule aggregates into form fields, binds
//! inputs and rate constants, then evaluates derived fields in dependency
//! order. All structural problems (unknown references, cycles, unresolved
//! fields) surface as errors before a partial result can escape.

use crate::engine::{AggregateSet, EngineError};
use crate::expr::{Expr, ExprError};
use crate::rates::RateTable;
use crate::schema::{AssetClass, FieldDef, FieldKind, FormSchema};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

/// Produce a value for every declared form field except the designated
/// progressive-tax field, which the assembler fills after tax computation.
///
/// Deterministic for identical inputs: merge order follows the canonical
/// aggregate keys, evaluation order is topological with declaration-order
/// tie-breaks, and all maps iterate in key order.
pub fn resolve(
    form: &FormSchema,
    inputs: &BTreeMap<String, Decimal>,
    aggregates_by_class: &BTreeMap<AssetClass, AggregateSet>,
    rates: &RateTable,
) -> Result<BTreeMap<String, Decimal>, EngineError> {
    check_declarations(form)?;

    // merge phase: canonical aggregates summed across schedules, then the
    // rate constant and caller inputs
    let mut resolved: BTreeMap<String, Decimal> = BTreeMap::new();
    for (key, field) in form.bindings.aggregates.pairs() {
        let mut total = Decimal::ZERO;
        for (class, set) in aggregates_by_class {
            match set.get(key.as_str()) {
                Some(value) => total += value,
                None => {
                    return Err(EngineError::SchemaMismatch(format!(
                        "schedule '{class}' produced no aggregate '{key}'"
                    )))
                }
            }
        }
        log::debug!(
            "merged {key} across {} schedules -> {field} = {total}",
            aggregates_by_class.len()
        );
        resolved.insert(field.to_string(), total);
    }
    resolved.insert(
        form.bindings.rates.basic_deduction.clone(),
        rates.basic_deduction(),
    );

    for (name, value) in inputs {
        match form.field(name) {
            Some(field) if field.kind == FieldKind::Input => {
                resolved.insert(name.clone(), *value);
            }
            Some(_) => {
                return Err(EngineError::SchemaMismatch(format!(
                    "value supplied for '{name}', which is not an input field"
                )))
            }
            None => {
                return Err(EngineError::SchemaMismatch(format!(
                    "unknown input '{name}'"
                )))
            }
        }
    }

    // cycles are reported here, before any evaluation begins
    let order = evaluation_order(form)?;

    for (field, expr) in order {
        let value = expr.eval_form(&resolved).map_err(|err| match err {
            // a declared field with no value yet: unbound aggregate or
            // missing input
            ExprError::UnknownName(name) => EngineError::IncompleteResolution(name),
            other => {
                EngineError::SchemaMismatch(format!("evaluating '{}': {other}", field.name))
            }
        })?;
        log::debug!("evaluated {} = {value}", field.name);
        resolved.insert(field.name.clone(), value);
    }

    // completion check: everything declared must now hold a value
    let tax_field = &form.bindings.tax.progressive_tax;
    for field in &form.fields {
        if field.name != *tax_field && !resolved.contains_key(&field.name) {
            return Err(EngineError::IncompleteResolution(field.name.clone()));
        }
    }
    Ok(resolved)
}

/// Structural validation of a form document without computing anything:
/// declaration sanity, binding targets, expression references, acyclicity.
pub fn check_structure(form: &FormSchema) -> Result<(), EngineError> {
    check_declarations(form)?;
    evaluation_order(form).map(|_| ())
}

fn check_declarations(form: &FormSchema) -> Result<(), EngineError> {
    let mut seen = BTreeSet::new();
    for field in &form.fields {
        if !seen.insert(field.name.as_str()) {
            return Err(EngineError::SchemaMismatch(format!(
                "duplicate field '{}'",
                field.name
            )));
        }
        match field.kind {
            FieldKind::Derived if field.expression.is_none() => {
                return Err(EngineError::SchemaMismatch(format!(
                    "derived field '{}' has no expression",
                    field.name
                )))
            }
            FieldKind::Input | FieldKind::Aggregate if field.expression.is_some() => {
                return Err(EngineError::SchemaMismatch(format!(
                    "field '{}' is not derived but declares an expression",
                    field.name
                )))
            }
            _ => {}
        }
    }

    let bindings = &form.bindings;
    let mut assigned_targets: Vec<(&str, &str)> = bindings
        .aggregates
        .pairs()
        .iter()
        .map(|(key, field)| (key.as_str(), *field))
        .collect();
    assigned_targets.push(("basicDeduction", bindings.rates.basic_deduction.as_str()));
    assigned_targets.push(("progressiveTax", bindings.tax.progressive_tax.as_str()));
    for (binding, target) in assigned_targets {
        match form.field(target) {
            None => {
                return Err(EngineError::SchemaMismatch(format!(
                    "binding '{binding}' targets undeclared field '{target}'"
                )))
            }
            Some(field) if field.kind != FieldKind::Aggregate => {
                return Err(EngineError::SchemaMismatch(format!(
                    "binding '{binding}' target '{target}' must be an aggregate field"
                )))
            }
            Some(_) => {}
        }
    }

    let base = &bindings.tax.taxable_base;
    if form.field(base).is_none() {
        return Err(EngineError::SchemaMismatch(format!(
            "binding 'taxableBase' targets undeclared field '{base}'"
        )));
    }
    if *base == bindings.tax.progressive_tax {
        return Err(EngineError::SchemaMismatch(
            "taxableBase and progressiveTax bindings must target different fields".to_string(),
        ));
    }
    Ok(())
}

/// Build the derived-field dependency graph and return fields paired with
/// their expressions in evaluation order: topological, with ties broken by
/// declaration order.
fn evaluation_order(form: &FormSchema) -> Result<Vec<(&FieldDef, &Expr)>, EngineError> {
    let derived: Vec<(&FieldDef, &Expr)> = form
        .fields
        .iter()
        .filter(|f| f.kind == FieldKind::Derived)
        .filter_map(|f| f.expression.as_ref().map(|e| (f, e)))
        .collect();
    let declared: BTreeSet<&str> = form.field_names().collect();
    let position: BTreeMap<&str, usize> = derived
        .iter()
        .enumerate()
        .map(|(pos, (f, _))| (f.name.as_str(), pos))
        .collect();

    // deps[i] = positions of derived fields that i's expression reads;
    // references to input/aggregate fields carry no edge, they are resolved
    // before evaluation starts
    let mut deps: Vec<Vec<usize>> = vec![Vec::new(); derived.len()];
    for (pos, (field, expr)) in derived.iter().enumerate() {
        if let Some(entry_field) = expr.summed_fields().into_iter().next() {
            return Err(EngineError::SchemaMismatch(format!(
                "expression of '{}' uses sum({entry_field}); sum() is only valid in schedule \
                 aggregate expressions",
                field.name
            )));
        }
        for reference in expr.references() {
            if !declared.contains(reference) {
                return Err(EngineError::SchemaMismatch(format!(
                    "expression of '{}' references unknown name '{reference}'",
                    field.name
                )));
            }
            if let Some(&dep) = position.get(reference) {
                deps[pos].push(dep);
            }
        }
    }

    // depth-first search for a cycle, visiting in declaration order
    let mut color = vec![0u8; derived.len()];
    let mut stack = Vec::new();
    for start in 0..derived.len() {
        if color[start] == 0 {
            if let Some(path) = find_cycle(start, &deps, &mut color, &mut stack, &derived) {
                return Err(EngineError::CycleDetected { path });
            }
        }
    }

    // Kahn's algorithm; the ready set is ordered by declaration position
    let mut in_degree: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); derived.len()];
    for (pos, dep_list) in deps.iter().enumerate() {
        for &dep in dep_list {
            dependents[dep].push(pos);
        }
    }
    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(pos, _)| pos)
        .collect();
    let mut order = Vec::with_capacity(derived.len());
    while let Some(&pos) = ready.iter().next() {
        ready.remove(&pos);
        order.push(derived[pos]);
        for &dependent in &dependents[pos] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }
    Ok(order)
}

fn find_cycle(
    node: usize,
    deps: &[Vec<usize>],
    color: &mut [u8],
    stack: &mut Vec<usize>,
    derived: &[(&FieldDef, &Expr)],
) -> Option<Vec<String>> {
    color[node] = 1;
    stack.push(node);
    for &dep in &deps[node] {
        match color[dep] {
            0 => {
                if let Some(path) = find_cycle(dep, deps, color, stack, derived) {
                    return Some(path);
                }
            }
            1 => {
                // back edge: the cycle runs from dep's stack position to here
                let from = stack.iter().position(|&n| n == dep).unwrap_or(0);
                let mut path: Vec<String> = stack[from..]
                    .iter()
                    .map(|&n| derived[n].0.name.clone())
                    .collect();
                path.push(derived[dep].0.name.clone());
                return Some(path);
            }
            _ => {}
        }
    }
    stack.pop();
    color[node] = 2;
    None
}
