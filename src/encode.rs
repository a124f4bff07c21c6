//! Conversions between physical units and register codes.
//!
//! Everything here is pure. Inputs are clamped into the coding's `[min, max]` before being
//! encoded, so no input can produce a code below the minimum's code or above `max_code`.

/// `value = base + code * step`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Linear {
    /// Value of code 0.
    pub base: u32,
    /// Value of one code step.
    pub step: u32,
    /// Smallest accepted value.
    pub min: u32,
    /// Largest accepted value.
    pub max: u32,
    /// Largest code the field holds.
    pub max_code: u8,
}

impl Linear {
    /// Encode `value`, rounding down to a step.
    pub const fn encode(&self, value: u32) -> u8 {
        let value = clamp(value, self.min, self.max);
        let code = value.saturating_sub(self.base) / self.step;
        if code > self.max_code as u32 {
            self.max_code
        } else {
            code as u8
        }
    }

    /// Decode a code.
    pub const fn decode(&self, code: u8) -> u32 {
        let code = if code > self.max_code { self.max_code } else { code };
        self.base + code as u32 * self.step
    }
}

/// One segment of a [`Piecewise`] coding: from `start` upwards, codes advance by `step`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Segment {
    /// First value of the segment.
    pub start: u32,
    /// Code of `start`.
    pub code: u8,
    /// Value of one code step inside the segment.
    pub step: u32,
}

impl Segment {
    const fn new(start: u32, code: u8, step: u32) -> Self {
        Segment { start, code, step }
    }
}

/// A coding made of ascending segments with different steps.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Piecewise {
    /// Segments, ascending in both `start` and `code`.
    pub segments: &'static [Segment],
    /// Smallest accepted value.
    pub min: u32,
    /// Largest accepted value.
    pub max: u32,
    /// Largest code the field holds.
    pub max_code: u8,
}

impl Piecewise {
    /// Encode `value` using the last segment starting at or below it.
    ///
    /// A segment never spills into the codes of the next one, so values just below a breakpoint
    /// round down to the last code of their own segment.
    pub fn encode(&self, value: u32) -> u8 {
        let value = clamp(value, self.min, self.max);
        let Some(idx) = self.segments.iter().rposition(|s| s.start <= value) else {
            return self.segments.first().map_or(0, |s| s.code);
        };
        let seg = self.segments[idx];
        let ceiling = self
            .segments
            .get(idx + 1)
            .map_or(self.max_code, |next| next.code.saturating_sub(1));
        let code = u32::from(seg.code) + (value - seg.start) / seg.step;
        u8::try_from(code).map_or(ceiling, |c| c.min(ceiling))
    }

    /// Decode a code using the last segment whose first code is at or below it.
    pub fn decode(&self, code: u8) -> u32 {
        let code = code.min(self.max_code);
        let Some(seg) = self.segments.iter().rev().find(|s| s.code <= code) else {
            return self.min;
        };
        let value = seg.start + u32::from(code - seg.code) * seg.step;
        value.min(self.max)
    }

    /// Step size of the segment `value` falls in.
    pub fn step_at(&self, value: u32) -> u32 {
        let value = clamp(value, self.min, self.max);
        self.segments
            .iter()
            .rev()
            .find(|s| s.start <= value)
            .or(self.segments.first())
            .map_or(1, |s| s.step)
    }
}

/// A current or voltage coding held in a single field.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Coding {
    /// Uniform steps.
    Linear(Linear),
    /// Lookup table of breakpoints.
    Piecewise(Piecewise),
}

impl Coding {
    /// Encode `value`.
    pub fn encode(&self, value: u32) -> u8 {
        match self {
            Coding::Linear(c) => c.encode(value),
            Coding::Piecewise(c) => c.encode(value),
        }
    }

    /// Decode `code`.
    pub fn decode(&self, code: u8) -> u32 {
        match self {
            Coding::Linear(c) => c.decode(code),
            Coding::Piecewise(c) => c.decode(code),
        }
    }

    /// Smallest accepted value.
    pub fn min(&self) -> u32 {
        match self {
            Coding::Linear(c) => c.min,
            Coding::Piecewise(c) => c.min,
        }
    }

    /// Largest accepted value.
    pub fn max(&self) -> u32 {
        match self {
            Coding::Linear(c) => c.max,
            Coding::Piecewise(c) => c.max,
        }
    }

    /// Resolution around `value`.
    pub fn step_at(&self, value: u32) -> u32 {
        match self {
            Coding::Linear(c) => c.step,
            Coding::Piecewise(c) => c.step_at(value),
        }
    }

    /// Clamp `value` into the accepted range.
    pub fn clamp(&self, value: u32) -> u32 {
        clamp(value, self.min(), self.max())
    }
}

/// Register codes for a charge voltage, possibly split over two registers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct VoltageCode {
    /// Code of the coarse VREG field.
    pub coarse: u8,
    /// Code of the fine trim field, if the variant has one.
    pub trim: Option<u8>,
}

/// Charge voltage coding.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VoltageCoding {
    /// VREG alone.
    Single(Coding),
    /// VREG plus an unsigned fine trim of `trim_step` per code.
    FineTrim {
        /// Coarse field coding.
        coarse: Linear,
        /// Value of one trim code.
        trim_step: u32,
        /// Largest value, including trim.
        max: u32,
    },
    /// VREG plus a signed trim from [`SIGNED_TRIM_MV`].
    SignedTrim {
        /// Coarse field coding.
        coarse: Linear,
    },
}

/// Trim offsets in mV selected by the SGM41513D trim codes 0..=3.
pub const SIGNED_TRIM_MV: [i32; 4] = [0, 8, -8, -16];

impl VoltageCoding {
    /// Encode `mv` into coarse and trim codes.
    pub fn encode(&self, mv: u32) -> VoltageCode {
        match *self {
            VoltageCoding::Single(c) => VoltageCode {
                coarse: c.encode(mv),
                trim: None,
            },
            VoltageCoding::FineTrim {
                coarse,
                trim_step,
                max,
            } => {
                let mv = clamp(mv, coarse.min, max);
                let code = coarse.encode(mv);
                let rest = mv - coarse.decode(code);
                let trim = (rest / trim_step).min(coarse.step / trim_step - 1);
                VoltageCode {
                    coarse: code,
                    trim: Some(trim as u8),
                }
            }
            VoltageCoding::SignedTrim { coarse } => {
                let mv = clamp(mv, coarse.min, coarse.max);
                let code = coarse.encode(mv);
                let rest = mv - coarse.decode(code);
                // Remainders past half a step round up to the next coarse code and trim down.
                let (code, trim) = match rest {
                    0..=3 => (code, 0),
                    4..=11 => (code, 1),
                    12..=21 => (code + 1, 3),
                    _ => (code + 1, 2),
                };
                VoltageCode {
                    coarse: code.min(coarse.max_code),
                    trim: Some(trim),
                }
            }
        }
    }

    /// Decode coarse and trim codes into mV.
    pub fn decode(&self, code: VoltageCode) -> u32 {
        match *self {
            VoltageCoding::Single(c) => c.decode(code.coarse),
            VoltageCoding::FineTrim {
                coarse, trim_step, ..
            } => coarse.decode(code.coarse) + u32::from(code.trim.unwrap_or(0)) * trim_step,
            VoltageCoding::SignedTrim { coarse } => {
                let offset = SIGNED_TRIM_MV
                    .get(usize::from(code.trim.unwrap_or(0) & 0x03))
                    .copied()
                    .unwrap_or(0);
                coarse.decode(code.coarse).saturating_add_signed(offset)
            }
        }
    }

    /// Smallest accepted value.
    pub fn min(&self) -> u32 {
        match self {
            VoltageCoding::Single(c) => c.min(),
            VoltageCoding::FineTrim { coarse, .. } | VoltageCoding::SignedTrim { coarse } => coarse.min,
        }
    }

    /// Largest accepted value.
    pub fn max(&self) -> u32 {
        match self {
            VoltageCoding::Single(c) => c.max(),
            VoltageCoding::FineTrim { max, .. } => *max,
            VoltageCoding::SignedTrim { coarse } => coarse.max,
        }
    }

    /// Resolution around `mv`.
    pub fn step_at(&self, mv: u32) -> u32 {
        match self {
            VoltageCoding::Single(c) => c.step_at(mv),
            VoltageCoding::FineTrim { trim_step, .. } => *trim_step,
            VoltageCoding::SignedTrim { .. } => 8,
        }
    }
}

/// Input voltage (VINDPM) codes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct VindpmCode {
    /// Code of the VINDPM field.
    pub code: u8,
    /// Code of the offset select field, if the variant has one.
    pub offset: Option<u8>,
}

/// Bases selected by the UPM6922 VINDPM offset codes 0..=3.
pub const VINDPM_OFFSETS_MV: [u32; 4] = [3900, 5900, 7500, 10500];

/// VINDPM coding.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VindpmCoding {
    /// 4-bit field above a fixed base.
    Linear(Linear),
    /// 4-bit field above one of [`VINDPM_OFFSETS_MV`].
    Offset,
}

const VINDPM_STEP: u32 = 100;
const VINDPM_MAX_CODE: u8 = 0x0f;

impl VindpmCoding {
    /// Encode `mv`.
    ///
    /// With offsets, values falling in a gap between two windows encode to the top of the lower
    /// window.
    pub fn encode(&self, mv: u32) -> VindpmCode {
        match *self {
            VindpmCoding::Linear(c) => VindpmCode {
                code: c.encode(mv),
                offset: None,
            },
            VindpmCoding::Offset => {
                let offset = VINDPM_OFFSETS_MV.iter().rposition(|&base| base <= mv).unwrap_or(0);
                let base = VINDPM_OFFSETS_MV.get(offset).copied().unwrap_or(VINDPM_OFFSETS_MV[0]);
                let steps = mv.saturating_sub(base) / VINDPM_STEP;
                let code = steps.min(u32::from(VINDPM_MAX_CODE)) as u8;
                VindpmCode {
                    code,
                    offset: Some(offset as u8),
                }
            }
        }
    }

    /// Decode into mV.
    pub fn decode(&self, code: VindpmCode) -> u32 {
        match *self {
            VindpmCoding::Linear(c) => c.decode(code.code),
            VindpmCoding::Offset => {
                let base = VINDPM_OFFSETS_MV
                    .get(usize::from(code.offset.unwrap_or(0) & 0x03))
                    .copied()
                    .unwrap_or(VINDPM_OFFSETS_MV[0]);
                base + u32::from(code.code.min(VINDPM_MAX_CODE)) * VINDPM_STEP
            }
        }
    }
}

/// OTG boost output voltage.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum BoostVoltage {
    /// 4.85 V
    Mv4850 = 0,
    /// 5.0 V
    #[default]
    Mv5000 = 1,
    /// 5.15 V
    Mv5150 = 2,
    /// 5.3 V
    Mv5300 = 3,
}

impl BoostVoltage {
    /// Match `mv` exactly, falling back to 5.0 V.
    pub const fn from_mv(mv: u32) -> Self {
        match mv {
            4850 => BoostVoltage::Mv4850,
            5150 => BoostVoltage::Mv5150,
            5300 => BoostVoltage::Mv5300,
            _ => BoostVoltage::Mv5000,
        }
    }

    /// Voltage in mV.
    pub const fn mv(self) -> u32 {
        match self {
            BoostVoltage::Mv4850 => 4850,
            BoostVoltage::Mv5000 => 5000,
            BoostVoltage::Mv5150 => 5150,
            BoostVoltage::Mv5300 => 5300,
        }
    }
}

/// OTG boost current limit code: 1.2 A for requests of at least 1200 mA, else 0.5 A.
pub const fn boost_current_code(ma: u32) -> u8 {
    if ma >= 1200 {
        1
    } else {
        0
    }
}

/// Input over-voltage protection threshold.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum AcOvp {
    /// 5.5 V
    #[default]
    Mv5500 = 0,
    /// 6.5 V
    Mv6500 = 1,
    /// 10.5 V
    Mv10500 = 2,
    /// 14 V
    Mv14000 = 3,
}

impl AcOvp {
    /// Match `mv` exactly, falling back to 5.5 V.
    pub const fn from_mv(mv: u32) -> Self {
        match mv {
            6500 => AcOvp::Mv6500,
            10500 => AcOvp::Mv10500,
            14000 => AcOvp::Mv14000,
            _ => AcOvp::Mv5500,
        }
    }
}

/// Recharge threshold code: 100 mV below VREG for requests up to 100 mV, else 200 mV.
pub const fn recharge_code(mv: u32) -> (u8, u32) {
    if mv <= 100 {
        (0, 100)
    } else {
        (1, 200)
    }
}

/// I2C watchdog timeout.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum WatchdogTimeout {
    /// Watchdog disabled
    #[default]
    Disabled = 0,
    /// 40 s
    S40 = 1,
    /// 80 s
    S80 = 2,
    /// 160 s
    S160 = 3,
}

impl WatchdogTimeout {
    /// Timeout in seconds, `None` when disabled.
    pub const fn secs(self) -> Option<u64> {
        match self {
            WatchdogTimeout::Disabled => None,
            WatchdogTimeout::S40 => Some(40),
            WatchdogTimeout::S80 => Some(80),
            WatchdogTimeout::S160 => Some(160),
        }
    }
}

/// Top-off timer length after termination.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum TopoffTimer {
    /// No top-off
    #[default]
    Disabled = 0,
    /// 15 minutes
    Min15 = 1,
    /// 30 minutes
    Min30 = 2,
    /// 45 minutes
    Min45 = 3,
}

/// Function of the STAT pin.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum StatPin {
    /// Indicate charge status
    #[default]
    Status = 0,
    /// Indicate charge status, blink on faults
    StatusBlink = 1,
    /// Follow the VINDPM/IINDPM loops
    Dpm = 2,
    /// Disabled
    Disabled = 3,
}

/// Level forced on D+ or D-.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum DpdmLevel {
    /// Released
    #[default]
    Hiz = 0,
    /// 0 V
    Zero = 1,
    /// 0.6 V, used for AFC/HVDCP negotiation
    V0p6 = 2,
    /// 3.3 V
    V3p3 = 3,
}

const fn clamp(value: u32, min: u32, max: u32) -> u32 {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

/// Input current limit (IINDPM), shared by all variants.
pub const INPUT_CURRENT: Linear = Linear {
    base: 100,
    step: 100,
    min: 100,
    max: 3200,
    max_code: 0x1f,
};

/// UPM69xx fast charge current.
pub const UPM_CHARGE_CURRENT: Linear = Linear {
    base: 0,
    step: 60,
    min: 0,
    max: 3000,
    max_code: 0x32,
};

/// SGM41513D fast charge current breakpoints.
pub const SGM_CHARGE_CURRENT: Piecewise = Piecewise {
    segments: &[
        Segment::new(0, 0x00, 5),
        Segment::new(40, 0x08, 10),
        Segment::new(110, 0x0f, 20),
        Segment::new(270, 0x17, 30),
        Segment::new(540, 0x20, 60),
        Segment::new(1500, 0x30, 120),
        Segment::new(3000, 0x3d, 60),
    ],
    min: 0,
    max: 3000,
    max_code: 0x3d,
};

/// UPM69xx pre-charge and termination current.
pub const UPM_PRECHARGE_TERM: Linear = Linear {
    base: 60,
    step: 60,
    min: 60,
    max: 960,
    max_code: 0x0f,
};

/// SGM41513D pre-charge and termination current breakpoints.
pub const SGM_PRECHARGE_TERM: Piecewise = Piecewise {
    segments: &[
        Segment::new(5, 0x00, 5),
        Segment::new(20, 0x03, 10),
        Segment::new(60, 0x07, 20),
        Segment::new(200, 0x0e, 40),
    ],
    min: 5,
    max: 240,
    max_code: 0x0f,
};

/// UPM6910D charge voltage: linear except for a tuned window around 4.3 V.
pub const UPM6910_CHARGE_VOLTAGE: Piecewise = Piecewise {
    segments: &[
        Segment::new(3856, 0x00, 32),
        Segment::new(4280, 0x0d, 30),
        Segment::new(4310, 0x0e, 20),
        Segment::new(4350, 0x10, 50),
        Segment::new(4400, 0x11, 32),
    ],
    min: 3856,
    max: 4624,
    max_code: 0x18,
};

/// UPM6922 family coarse charge voltage.
pub const UPM6922_CHARGE_VOLTAGE: Linear = Linear {
    base: 3848,
    step: 32,
    min: 3848,
    max: 4840,
    max_code: 0x1f,
};

/// SGM41513D coarse charge voltage.
pub const SGM_CHARGE_VOLTAGE: Linear = Linear {
    base: 3856,
    step: 32,
    min: 3856,
    max: 4848,
    max_code: 0x1f,
};

/// VINDPM of parts without an offset select.
pub const INPUT_VOLTAGE: Linear = Linear {
    base: 3900,
    step: VINDPM_STEP,
    min: 3900,
    max: 5400,
    max_code: VINDPM_MAX_CODE,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_clamps_below_minimum() {
        assert_eq!(INPUT_CURRENT.encode(0), 0);
        assert_eq!(INPUT_CURRENT.encode(99), 0);
        assert_eq!(UPM_PRECHARGE_TERM.encode(10), 0);
    }

    #[test]
    fn linear_clamps_above_maximum() {
        assert_eq!(INPUT_CURRENT.encode(10_000), 0x1f);
        assert_eq!(UPM_CHARGE_CURRENT.encode(5000), 0x32);
        assert_eq!(UPM_CHARGE_CURRENT.decode(0x3f), 3000);
    }

    #[test]
    fn sgm_charge_current_matches_datasheet_points() {
        assert_eq!(SGM_CHARGE_CURRENT.encode(40), 0x08);
        assert_eq!(SGM_CHARGE_CURRENT.encode(110), 0x0f);
        assert_eq!(SGM_CHARGE_CURRENT.encode(500), 0x17 + 7);
        assert_eq!(SGM_CHARGE_CURRENT.encode(1500), 0x30);
        assert_eq!(SGM_CHARGE_CURRENT.encode(2940), 0x3c);
        assert_eq!(SGM_CHARGE_CURRENT.encode(3000), 0x3d);
        assert_eq!(SGM_CHARGE_CURRENT.decode(0x20), 540);
        assert_eq!(SGM_CHARGE_CURRENT.decode(0x3d), 3000);
        assert_eq!(SGM_CHARGE_CURRENT.decode(0x3f), 3000);
    }

    #[test]
    fn sgm_charge_current_below_the_top_code_rounds_down() {
        for ma in 2941..3000 {
            assert_eq!(SGM_CHARGE_CURRENT.encode(ma), 0x3c, "{ma} mA");
        }
        assert!(SGM_CHARGE_CURRENT.decode(SGM_CHARGE_CURRENT.encode(2999)) <= 2999);
    }

    #[test]
    fn sgm_termination_table() {
        let table = [5, 10, 15, 20, 30, 40, 50, 60, 80, 100, 120, 140, 160, 180, 200, 240];
        for (code, ma) in table.iter().enumerate() {
            assert_eq!(usize::from(SGM_PRECHARGE_TERM.encode(*ma)), code);
            assert_eq!(SGM_PRECHARGE_TERM.decode(code as u8), *ma);
        }
        // between breakpoints the lower entry wins
        assert_eq!(SGM_PRECHARGE_TERM.encode(179), 0x0c);
        assert_eq!(SGM_PRECHARGE_TERM.encode(1), 0x00);
    }

    #[test]
    fn upm6910_voltage_window() {
        assert_eq!(UPM6910_CHARGE_VOLTAGE.encode(4240), 12);
        assert_eq!(UPM6910_CHARGE_VOLTAGE.encode(4279), 12);
        assert_eq!(UPM6910_CHARGE_VOLTAGE.encode(4280), 13);
        assert_eq!(UPM6910_CHARGE_VOLTAGE.encode(4310), 14);
        assert_eq!(UPM6910_CHARGE_VOLTAGE.encode(4330), 15);
        assert_eq!(UPM6910_CHARGE_VOLTAGE.encode(4350), 16);
        assert_eq!(UPM6910_CHARGE_VOLTAGE.decode(17), 4400);
        assert_eq!(UPM6910_CHARGE_VOLTAGE.decode(18), 4432);
        assert_eq!(UPM6910_CHARGE_VOLTAGE.decode(0x18), 4624);
    }

    #[test]
    fn fine_trim_splits_remainder() {
        let coding = VoltageCoding::FineTrim {
            coarse: UPM6922_CHARGE_VOLTAGE,
            trim_step: 8,
            max: 4864,
        };
        let code = coding.encode(4448);
        assert_eq!(code.coarse, 18);
        assert_eq!(code.trim, Some(3));
        assert_eq!(coding.decode(code), 4448);
    }

    #[test]
    fn signed_trim_rounds_to_nearest_available_step() {
        let coding = VoltageCoding::SignedTrim {
            coarse: SGM_CHARGE_VOLTAGE,
        };
        // 4448 = 3856 + 18 * 32 + 16
        let code = coding.encode(4448);
        assert_eq!(code, VoltageCode { coarse: 19, trim: Some(3) });
        assert_eq!(coding.decode(code), 4448);
        // remainder 8 keeps the coarse code and trims up
        let code = coding.encode(3856 + 8);
        assert_eq!(code, VoltageCode { coarse: 0, trim: Some(1) });
        // remainder 24 rounds up and trims down by 8
        assert_eq!(coding.decode(coding.encode(3856 + 24)), 3856 + 24);
    }

    #[test]
    fn vindpm_offset_windows() {
        let coding = VindpmCoding::Offset;
        assert_eq!(coding.encode(4500), VindpmCode { code: 6, offset: Some(0) });
        assert_eq!(coding.encode(8000), VindpmCode { code: 5, offset: Some(2) });
        assert_eq!(coding.encode(3000), VindpmCode { code: 0, offset: Some(0) });
        // 5.6 V is in the gap above the first window
        assert_eq!(coding.decode(coding.encode(5600)), 5400);
        assert_eq!(coding.decode(coding.encode(20_000)), 12000);
    }

    #[test]
    fn enum_fallbacks() {
        assert_eq!(BoostVoltage::from_mv(4999), BoostVoltage::Mv5000);
        assert_eq!(BoostVoltage::from_mv(5300), BoostVoltage::Mv5300);
        assert_eq!(AcOvp::from_mv(6500), AcOvp::Mv6500);
        assert_eq!(AcOvp::from_mv(7000), AcOvp::Mv5500);
        assert_eq!(boost_current_code(1199), 0);
        assert_eq!(boost_current_code(1200), 1);
        assert_eq!(recharge_code(100), (0, 100));
        assert_eq!(recharge_code(150), (1, 200));
    }
}
