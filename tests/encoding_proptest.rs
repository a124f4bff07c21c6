use proptest::prelude::*;
use upm6910_driver::encode::{
    Coding, VindpmCode, VindpmCoding, VoltageCoding, INPUT_CURRENT, INPUT_VOLTAGE, VINDPM_OFFSETS_MV,
};
use upm6910_driver::DeviceVariant;

const VARIANTS: [DeviceVariant; 4] = [
    DeviceVariant::Upm6910d,
    DeviceVariant::Upm6922,
    DeviceVariant::Upm6922p,
    DeviceVariant::Sgm41513d,
];

fn current_codings() -> Vec<Coding> {
    let mut codings = vec![Coding::Linear(INPUT_CURRENT)];
    for v in VARIANTS {
        let cfg = v.config();
        codings.extend([cfg.charge_current, cfg.precharge_current, cfg.termination_current]);
    }
    codings
}

fn max_code(coding: &Coding) -> u8 {
    match coding {
        Coding::Linear(c) => c.max_code,
        Coding::Piecewise(c) => c.max_code,
    }
}

proptest! {
    #[test]
    fn currents_round_down_to_the_nearest_code(frac in 0.0f64..=1.0) {
        for coding in current_codings() {
            let value = coding.min() + ((coding.max() - coding.min()) as f64 * frac) as u32;
            let code = coding.encode(value);
            prop_assert!(code <= max_code(&coding));
            prop_assert!(coding.decode(code) <= value);
            if code < max_code(&coding) {
                prop_assert!(coding.decode(code + 1) > value, "{:?} at {}", coding, value);
            }
        }
    }

    #[test]
    fn out_of_range_currents_are_clamped(below in 0u32..5, above in 0u32..100_000) {
        for coding in current_codings() {
            let low = coding.min().saturating_sub(below);
            prop_assert_eq!(coding.encode(low), coding.encode(coding.min()));
            prop_assert_eq!(coding.encode(coding.max() + above), coding.encode(coding.max()));
        }
    }

    #[test]
    fn charge_voltage_lands_within_one_trim_step(frac in 0.0f64..=1.0) {
        for v in VARIANTS {
            let coding = v.config().charge_voltage;
            let mv = coding.min() + ((coding.max() - coding.min()) as f64 * frac) as u32;
            let decoded = coding.decode(coding.encode(mv));
            match coding {
                VoltageCoding::SignedTrim { .. } => {
                    prop_assert!(decoded.abs_diff(mv) < 8, "{} -> {}", mv, decoded);
                }
                _ => {
                    prop_assert!(decoded <= mv, "{:?}: {} -> {}", v, mv, decoded);
                    prop_assert!(mv - decoded < 50, "{:?}: {} -> {}", v, mv, decoded);
                }
            }
            prop_assert_eq!(coding.encode(mv).trim.is_some(), v.config().voltage_trim.is_some());
        }
    }

    #[test]
    fn vindpm_offset_never_overshoots(mv in 3900u32..13_000) {
        let coding = VindpmCoding::Offset;
        let decoded = coding.decode(coding.encode(mv));
        prop_assert!(decoded <= mv);
        let in_window = VINDPM_OFFSETS_MV.iter().any(|&base| (base..=base + 1500).contains(&mv));
        if in_window {
            prop_assert!(mv - decoded < 100);
        }
    }
}

#[test]
fn decoded_values_increase_with_the_code() {
    for coding in current_codings() {
        let values: Vec<u32> = (0..=max_code(&coding)).map(|c| coding.decode(c)).collect();
        assert!(values.windows(2).all(|w| w[0] <= w[1]), "{:?}", coding);
    }
}

#[test]
fn linear_vindpm_has_no_offset_select() {
    let coding = VindpmCoding::Linear(INPUT_VOLTAGE);
    assert_eq!(coding.encode(4600), VindpmCode { code: 7, offset: None });
    assert_eq!(coding.decode(coding.encode(10_000)), 5400);
}
