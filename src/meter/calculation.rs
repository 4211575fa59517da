//! Derived-quantity formulas.
//!
//! All calculations run in base (unscaled) units; the caller is responsible
//! for scaling inputs in and the result back out via [`crate::unit`].

use crate::node::processor::LastDirection;

/// Apparent power from active/reactive power when both are available,
/// falling back to voltage × current. Matches the documented fallback order:
/// `P`+`Q` first, `V`·`I` second.
pub fn apparent_power(
    active_power: Option<f64>,
    reactive_power: Option<f64>,
    voltage: Option<f64>,
    current: Option<f64>,
) -> Option<f64> {
    if let (Some(p), Some(q)) = (active_power, reactive_power) {
        return Some((p * p + q * q).sqrt());
    }
    if let (Some(v), Some(i)) = (voltage, current) {
        return Some(v * i);
    }
    None
}

/// Active power from apparent/reactive power when both are available and the
/// square root argument is non-negative, falling back to `V·I·PF`. A negative
/// square-root argument (a physical inconsistency) leaves the result null
/// rather than clamping it.
pub fn active_power(
    apparent_power: Option<f64>,
    reactive_power: Option<f64>,
    voltage: Option<f64>,
    current: Option<f64>,
    power_factor: Option<f64>,
) -> Option<f64> {
    if let (Some(s), Some(q)) = (apparent_power, reactive_power) {
        let square = s * s - q * q;
        return if square < 0.0 { None } else { Some(square.sqrt()) };
    }
    if let (Some(v), Some(i), Some(pf)) = (voltage, current, power_factor) {
        return Some(v * i * pf);
    }
    None
}

/// Reactive power from apparent/active power when both are available and the
/// square root argument is non-negative, falling back to `V·I·sin(acos(PF))`.
pub fn reactive_power(
    apparent_power: Option<f64>,
    active_power: Option<f64>,
    voltage: Option<f64>,
    current: Option<f64>,
    power_factor: Option<f64>,
) -> Option<f64> {
    if let (Some(s), Some(p)) = (apparent_power, active_power) {
        let square = s * s - p * p;
        return if square < 0.0 { None } else { Some(square.sqrt()) };
    }
    if let (Some(v), Some(i), Some(pf)) = (voltage, current, power_factor) {
        return Some(v * i * pf.acos().sin());
    }
    None
}

/// Power factor as `cos(atan(Q/P))`; `0.0` when active power is zero rather
/// than dividing by it.
pub fn power_factor(active_power: Option<f64>, reactive_power: Option<f64>) -> Option<f64> {
    match (active_power, reactive_power) {
        (Some(p), Some(_)) if p == 0.0 => Some(0.0),
        (Some(p), Some(q)) => Some((q / p).atan().cos()),
        _ => None,
    }
}

/// Three-phase power factor: sums each phase's active and reactive power,
/// then applies the same `cos(atan(ΣQ/ΣP))` formula. Null if any phase input
/// is missing.
pub fn total_power_factor(
    l1_active: Option<f64>,
    l2_active: Option<f64>,
    l3_active: Option<f64>,
    l1_reactive: Option<f64>,
    l2_reactive: Option<f64>,
    l3_reactive: Option<f64>,
) -> Option<f64> {
    match (l1_active, l2_active, l3_active, l1_reactive, l2_reactive, l3_reactive) {
        (Some(a1), Some(a2), Some(a3), Some(r1), Some(r2), Some(r3)) => {
            power_factor(Some(a1 + a2 + a3), Some(r1 + r2 + r3))
        }
        _ => None,
    }
}

/// Sign of power flow (precedence order from the documented rules):
/// 1. `negative_reactive_power` is set → sign of reactive power decides
///    LAGGING (`1.0`, Q ≥ 0) vs LEADING (`-1.0`).
/// 2. `read_separate_forward_reverse_energy` is set → the reactive-energy
///    counter's last observed direction decides LAGGING/LEADING; UNKNOWN
///    (`None`) if that counter has never moved.
/// 3. Otherwise UNKNOWN.
pub fn power_factor_direction(
    reactive_power: Option<f64>,
    negative_reactive_power: bool,
    read_separate_forward_reverse_energy: bool,
    reactive_energy_direction: LastDirection,
) -> Option<f64> {
    if negative_reactive_power {
        return reactive_power.map(|q| if q >= 0.0 { 1.0 } else { -1.0 });
    }
    if read_separate_forward_reverse_energy {
        return match reactive_energy_direction {
            LastDirection::Positive => Some(1.0),
            LastDirection::Negative => Some(-1.0),
            LastDirection::None => None,
        };
    }
    None
}

/// Sums a node's three phase values into its `total_` quantity. `None` if any
/// phase is missing, since a partial total would misrepresent the device.
pub fn phase_total(l1: Option<f64>, l2: Option<f64>, l3: Option<f64>) -> Option<f64> {
    match (l1, l2, l3) {
        (Some(a), Some(b), Some(c)) => Some(a + b + c),
        _ => None,
    }
}

/// CUMULATIVE energy as `forward − reverse`. `None` ("leave the target node
/// unchanged") when either counter hasn't produced a value yet, rather than
/// clobbering a previously-settled reading with a null.
pub fn energy_from_forward_reverse(forward: Option<f64>, reverse: Option<f64>) -> Option<f64> {
    match (forward, reverse) {
        (Some(f), Some(r)) => Some(f - r),
        _ => None,
    }
}

/// DELTA energy as `power × elapsed_seconds / 3600`. `None` ("leave unchanged")
/// when the power reading itself is missing; a missing elapsed time (first
/// observation) contributes zero energy rather than blocking the update.
pub fn energy_from_power(power: Option<f64>, elapsed_seconds: Option<f64>) -> Option<f64> {
    power.map(|p| p * elapsed_seconds.unwrap_or(0.0) / 3600.0)
}

/// Power factor and its direction derived from active/reactive energy over
/// the same span, used by historical extraction rather than the live
/// calculator.
pub fn power_factor_from_energies(active_energy: f64, reactive_energy: f64) -> Option<f64> {
    if active_energy == 0.0 && reactive_energy == 0.0 {
        return None;
    }
    Some(active_energy / (active_energy * active_energy + reactive_energy * reactive_energy).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apparent_power_prefers_p_q_over_v_i() {
        let s = apparent_power(Some(3000.0), Some(4000.0), Some(1000.0), Some(1000.0));
        assert_eq!(s, Some(5000.0));
    }

    #[test]
    fn apparent_power_falls_back_to_v_i() {
        let s = apparent_power(None, None, Some(230.0), Some(10.0));
        assert_eq!(s, Some(2300.0));
    }

    #[test]
    fn active_power_prefers_s_q_over_v_i_pf() {
        let p = active_power(Some(5000.0), Some(4000.0), None, None, None);
        assert_eq!(p, Some(3000.0));
    }

    #[test]
    fn active_power_rejects_negative_square_root_argument() {
        assert_eq!(active_power(Some(10.0), Some(20.0), None, None, None), None);
    }

    #[test]
    fn active_power_falls_back_to_v_i_pf() {
        assert_eq!(active_power(None, None, Some(230.0), Some(10.0), Some(0.9)), Some(2070.0));
    }

    #[test]
    fn reactive_power_prefers_s_p_over_v_i_pf() {
        let q = reactive_power(Some(5000.0), Some(3000.0), None, None, None);
        assert_eq!(q, Some(4000.0));
    }

    #[test]
    fn power_factor_is_zero_when_active_power_is_zero() {
        assert_eq!(power_factor(Some(0.0), Some(50.0)), Some(0.0));
    }

    #[test]
    fn power_factor_matches_cos_atan_of_q_over_p() {
        let pf = power_factor(Some(100.0), Some(100.0)).unwrap();
        assert!((pf - (1.0_f64).atan().cos()).abs() < 1e-9);
    }

    #[test]
    fn total_power_factor_sums_phases_before_the_formula() {
        let pf = total_power_factor(
            Some(100.0),
            Some(100.0),
            Some(100.0),
            Some(50.0),
            Some(50.0),
            Some(50.0),
        )
        .unwrap();
        let expected = power_factor(Some(300.0), Some(150.0)).unwrap();
        assert!((pf - expected).abs() < 1e-9);
    }

    #[test]
    fn total_power_factor_requires_every_phase() {
        assert_eq!(total_power_factor(Some(1.0), Some(2.0), None, Some(1.0), Some(1.0), Some(1.0)), None);
    }

    #[test]
    fn phase_total_requires_all_three_phases() {
        assert_eq!(phase_total(Some(1.0), Some(2.0), None), None);
        assert_eq!(phase_total(Some(1.0), Some(2.0), Some(3.0)), Some(6.0));
    }

    #[test]
    fn power_factor_direction_is_unknown_with_no_option_enabled() {
        assert_eq!(power_factor_direction(Some(10.0), false, false, LastDirection::None), None);
    }

    #[test]
    fn power_factor_direction_follows_reactive_power_sign() {
        assert_eq!(power_factor_direction(Some(10.0), true, false, LastDirection::None), Some(1.0));
        assert_eq!(power_factor_direction(Some(-10.0), true, false, LastDirection::None), Some(-1.0));
    }

    #[test]
    fn power_factor_direction_falls_back_to_reactive_energy_direction() {
        assert_eq!(power_factor_direction(None, false, true, LastDirection::Positive), Some(1.0));
        assert_eq!(power_factor_direction(None, false, true, LastDirection::Negative), Some(-1.0));
        assert_eq!(power_factor_direction(None, false, true, LastDirection::None), None);
    }

    #[test]
    fn energy_from_forward_reverse_subtracts_and_otherwise_leaves_unchanged() {
        assert_eq!(energy_from_forward_reverse(Some(100.0), Some(30.0)), Some(70.0));
        assert_eq!(energy_from_forward_reverse(None, Some(30.0)), None);
    }

    #[test]
    fn energy_from_power_integrates_over_elapsed_time() {
        assert_eq!(energy_from_power(Some(3600.0), Some(3600.0)), Some(3600.0));
        assert_eq!(energy_from_power(None, Some(3600.0)), None);
    }

    #[test]
    fn power_factor_from_energies_matches_unit_vector_formula() {
        let pf = power_factor_from_energies(3.0, 4.0).unwrap();
        assert!((pf - 0.6).abs() < 1e-9);
        assert_eq!(power_factor_from_energies(0.0, 0.0), None);
    }
}
