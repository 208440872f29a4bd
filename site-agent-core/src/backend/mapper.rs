//! Bidirectional conversion between marketplace and backend component units
//! (`spec.md` §4.3, `ComponentMapper`).
//!
//! Grounded on the unit-factor handling in
//! `examples/original_source/waldur_site_agent/backends/utils.py`
//! (`get_usage_based_limits`, which multiplies by `unit_factor`) generalized
//! to the remap-target fan-out `spec.md` adds on top of it. Two pure
//! functions, no state: the mapper is stateless and commutative across
//! components, so iteration order never affects results.

use std::collections::HashMap;

use rust_decimal::Decimal;
use site_agent_types::Offering;

/// Converts marketplace-unit limits to backend-unit limits for one offering.
///
/// - Passthrough (no remap targets declared for a component): identity with
///   multiplication by `unit_factor`.
/// - Remapping: one source value expands into every declared target, each
///   scaled by its own `factor`.
pub fn convert_limits_to_backend(
    offering: &Offering,
    limits: &HashMap<String, i64>,
) -> HashMap<String, i64> {
    let mut out = HashMap::new();
    for (name, value) in limits {
        let Some(component) = offering.component(name) else {
            continue;
        };
        if component.is_remapped() {
            for target in &component.remap_targets {
                let entry = out.entry(target.target_component.clone()).or_insert(0);
                *entry += value * target.factor;
            }
        } else {
            out.insert(name.clone(), value * component.unit_factor);
        }
    }
    out
}

/// Converts backend-unit usage back to marketplace-unit usage.
///
/// - Passthrough: integer-truncating division by `unit_factor`.
/// - Remapping: sums every target's contribution back onto the source
///   component and divides, rounding to two decimal places.
pub fn convert_usage_to_control(
    offering: &Offering,
    usage: &HashMap<String, Decimal>,
) -> HashMap<String, Decimal> {
    let mut out = HashMap::new();
    for component in offering.components.values() {
        if component.is_remapped() {
            let mut total = Decimal::ZERO;
            let mut any = false;
            for target in &component.remap_targets {
                if let Some(value) = usage.get(&target.target_component) {
                    any = true;
                    if target.factor != 0 {
                        total += value / Decimal::from(target.factor);
                    }
                }
            }
            if any {
                out.insert(component.name.clone(), total.round_dp(2));
            }
        } else if let Some(value) = usage.get(&component.name) {
            let factor = if component.unit_factor == 0 {
                1
            } else {
                component.unit_factor
            };
            out.insert(
                component.name.clone(),
                (*value / Decimal::from(factor)).round_dp(2),
            );
        }
    }
    out
}
