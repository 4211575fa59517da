//! SI-prefix unit scaling.
//!
//! All derived-quantity math runs in base units; values are scaled in on the
//! way into a calculation and scaled back out to the target node's unit on
//! the way out. Keyed only by the first character of the unit string, so
//! `"kWh"`, `"kW"`, and `"kVAr"` all share the `k` factor.

/// Returns the SI-prefix multiplier for `unit`'s leading character.
///
/// An empty or unrecognized prefix character scales by `1.0`.
pub fn unit_factor(unit: Option<&str>) -> f64 {
    match unit.and_then(|u| u.chars().next()) {
        Some('m') => 1e-3,
        Some('k') => 1e3,
        Some('M') => 1e6,
        Some('G') => 1e9,
        _ => 1.0,
    }
}

/// Scales a raw value expressed in `unit` into its base-unit equivalent.
pub fn scale_in(value: f64, unit: Option<&str>) -> f64 {
    value * unit_factor(unit)
}

/// Scales a base-unit value back out into `unit`'s prefixed representation.
pub fn scale_out(value: f64, unit: Option<&str>) -> f64 {
    value / unit_factor(unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_table() {
        assert_eq!(unit_factor(Some("mA")), 1e-3);
        assert_eq!(unit_factor(Some("A")), 1.0);
        assert_eq!(unit_factor(Some("kWh")), 1e3);
        assert_eq!(unit_factor(Some("MW")), 1e6);
        assert_eq!(unit_factor(Some("GVAr")), 1e9);
        assert_eq!(unit_factor(None), 1.0);
        assert_eq!(unit_factor(Some("")), 1.0);
        assert_eq!(unit_factor(Some("xyz")), 1.0);
    }

    #[test]
    fn scale_round_trip() {
        for unit in ["V", "kW", "mA", "MW", "GVAr", ""] {
            let x = 1234.5678_f64;
            let round_tripped = scale_out(scale_in(x, Some(unit)), Some(unit));
            assert!((round_tripped - x).abs() < 1e-9, "unit {unit}");
        }
    }

    #[test]
    fn apparent_power_unit_mixing() {
        // 3 kW and 4000 VAr scaled to base units, recombined, and scaled to kVA.
        let p = scale_in(3.0, Some("kW"));
        let q = scale_in(4000.0, Some("VAr"));
        let s = (p * p + q * q).sqrt();
        let s_kva = scale_out(s, Some("kVA"));
        assert!((s_kva - 5.0).abs() < 1e-9);
    }
}
