//! Register map of the UPM6910D family and its SGM41513D second source.

use modular_bitfield::specifiers::{B1, B2, B3, B4};
use modular_bitfield::{bitfield, BitfieldSpecifier};

/// Default 7-bit I2C address of the UPM69xx parts.
pub const ADDR: u8 = 0x6b;
/// 7-bit I2C address of the SGM41513D second source.
pub const ALT_ADDR: u8 = 0x1a;

/// A register address.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Reg(pub u8);

#[allow(missing_docs)]
impl Reg {
    pub const INPUT_SOURCE: Reg = Reg(0x00);
    pub const POWER_ON_CONFIG: Reg = Reg(0x01);
    pub const CHARGE_CURRENT: Reg = Reg(0x02);
    pub const PRECHARGE_TERM: Reg = Reg(0x03);
    pub const CHARGE_VOLTAGE: Reg = Reg(0x04);
    pub const TIMER_CONTROL: Reg = Reg(0x05);
    pub const INPUT_VOLTAGE: Reg = Reg(0x06);
    pub const MISC_CONTROL: Reg = Reg(0x07);
    pub const STATUS: Reg = Reg(0x08);
    pub const FAULT: Reg = Reg(0x09);
    pub const CONDITION: Reg = Reg(0x0a);
    pub const PART_INFO: Reg = Reg(0x0b);

    /// UPM69xx: DP/DM mux, HVDCP and BC1.2 enables.
    pub const UPM_DPDM: Reg = Reg(0x0c);
    /// SGM41513D: DP/DM mux.
    pub const SGM_DPDM: Reg = Reg(0x0d);
    /// UPM6922 family: VREG fine trim and VINDPM offset.
    pub const UPM_TRIM: Reg = Reg(0x0d);
    /// SGM41513D: VREG fine trim.
    pub const SGM_TRIM: Reg = Reg(0x0f);
    /// UPM6922 family: system voltage ADC.
    pub const VSYS_ADC: Reg = Reg(0x10);

    /// Extended page key.
    pub const EXT_KEY: Reg = Reg(0xa9);
    /// Extended page: input scan current.
    pub const EXT_SCAN: Reg = Reg(0xab);
    /// Extended page: UPM6922 / UPM6922P discriminator.
    pub const EXT_DETECT: Reg = Reg(0xd2);

    /// Last register of the common map.
    pub const LAST_COMMON: Reg = Reg::PART_INFO;

    pub const fn new(val: u8) -> Self {
        Reg(val)
    }

    pub const fn to_u8(self) -> u8 {
        self.0
    }
}

/// A bit-field inside a register.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Field {
    /// Register holding the field.
    pub reg: Reg,
    /// Mask of the field within the register.
    pub mask: u8,
    /// Position of the field's least significant bit.
    pub shift: u8,
}

impl Field {
    const fn new(reg: Reg, mask: u8, shift: u8) -> Self {
        Field { reg, mask, shift }
    }

    /// Place `value` at the field position.
    pub const fn place(self, value: u8) -> u8 {
        (value << self.shift) & self.mask
    }

    /// Extract the field from a register value.
    pub const fn extract(self, reg_val: u8) -> u8 {
        (reg_val & self.mask) >> self.shift
    }
}

#[allow(missing_docs)]
pub mod field {
    use super::{Field, Reg};

    pub const EN_HIZ: Field = Field::new(Reg::INPUT_SOURCE, 0x80, 7);
    pub const STAT_CTRL: Field = Field::new(Reg::INPUT_SOURCE, 0x60, 5);
    pub const IINDPM: Field = Field::new(Reg::INPUT_SOURCE, 0x1f, 0);

    pub const WD_RST: Field = Field::new(Reg::POWER_ON_CONFIG, 0x40, 6);
    pub const OTG_CONFIG: Field = Field::new(Reg::POWER_ON_CONFIG, 0x20, 5);
    pub const CHG_CONFIG: Field = Field::new(Reg::POWER_ON_CONFIG, 0x10, 4);

    pub const BOOST_LIM: Field = Field::new(Reg::CHARGE_CURRENT, 0x80, 7);
    pub const ICHG: Field = Field::new(Reg::CHARGE_CURRENT, 0x3f, 0);

    pub const IPRECHG: Field = Field::new(Reg::PRECHARGE_TERM, 0xf0, 4);
    pub const ITERM: Field = Field::new(Reg::PRECHARGE_TERM, 0x0f, 0);

    pub const VREG: Field = Field::new(Reg::CHARGE_VOLTAGE, 0xf8, 3);
    pub const TOPOFF_TIMER: Field = Field::new(Reg::CHARGE_VOLTAGE, 0x06, 1);
    pub const VRECHG: Field = Field::new(Reg::CHARGE_VOLTAGE, 0x01, 0);

    pub const EN_TERM: Field = Field::new(Reg::TIMER_CONTROL, 0x80, 7);
    pub const WATCHDOG: Field = Field::new(Reg::TIMER_CONTROL, 0x30, 4);
    pub const EN_TIMER: Field = Field::new(Reg::TIMER_CONTROL, 0x08, 3);
    pub const CHG_TIMER: Field = Field::new(Reg::TIMER_CONTROL, 0x04, 2);

    pub const OVP: Field = Field::new(Reg::INPUT_VOLTAGE, 0xc0, 6);
    pub const BOOSTV: Field = Field::new(Reg::INPUT_VOLTAGE, 0x30, 4);
    pub const VINDPM: Field = Field::new(Reg::INPUT_VOLTAGE, 0x0f, 0);

    pub const FORCE_DPDM: Field = Field::new(Reg::MISC_CONTROL, 0x80, 7);
    pub const BATFET_DIS: Field = Field::new(Reg::MISC_CONTROL, 0x20, 5);
    pub const BATFET_DLY: Field = Field::new(Reg::MISC_CONTROL, 0x08, 3);
    pub const BATFET_RST_EN: Field = Field::new(Reg::MISC_CONTROL, 0x04, 2);

    pub const INT_MASK: Field = Field::new(Reg::CONDITION, 0x03, 0);
    pub const REG_RESET: Field = Field::new(Reg::PART_INFO, 0x80, 7);

    pub const EN_HVDCP: Field = Field::new(Reg::UPM_DPDM, 0x80, 7);
    pub const EN_BC12: Field = Field::new(Reg::UPM_DPDM, 0x40, 6);
    pub const UPM_DP_MUX: Field = Field::new(Reg::UPM_DPDM, 0x18, 3);
    pub const SGM_DP_MUX: Field = Field::new(Reg::SGM_DPDM, 0x18, 3);

    pub const UPM_VREG_FT: Field = Field::new(Reg::UPM_TRIM, 0xc0, 6);
    pub const VINDPM_OS: Field = Field::new(Reg::UPM_TRIM, 0x03, 0);
    pub const SGM_VREG_FT: Field = Field::new(Reg::SGM_TRIM, 0xc0, 6);

    pub const VSYS: Field = Field::new(Reg::VSYS_ADC, 0x7f, 0);

    pub const SCAN_CUR: Field = Field::new(Reg::EXT_SCAN, 0x30, 4);
    pub const DEVICE_DETECT: Field = Field::new(Reg::EXT_DETECT, 0x80, 7);
}

/// Value written to [`Reg::EXT_KEY`] to open the extended page.
pub const EXT_KEY_ENTER: u8 = 0x6e;
/// Value written to [`Reg::EXT_KEY`] to close the extended page.
pub const EXT_KEY_EXIT: u8 = 0x00;
/// Scan current setting applied to UPM6922 parts at init.
pub const SCAN_CUR_SETTING: u8 = 0b01;

/// Masks the IINDPM interrupt, in [`field::INT_MASK`].
pub const INT_MASK_IINDPM: u8 = 0b01;
/// Masks the VINDPM interrupt, in [`field::INT_MASK`].
pub const INT_MASK_VINDPM: u8 = 0b10;

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BitfieldSpecifier)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[bits = 3]
/// What the input source detection found on VBUS
pub enum VbusType {
    /// No input
    #[default]
    None,
    /// USB standard downstream port
    Sdp,
    /// USB charging downstream port
    Cdp,
    /// USB dedicated charging port
    Dcp,
    /// Reserved encoding
    Reserved,
    /// Detection finished without identifying the adapter
    Unknown,
    /// Non-standard adapter
    NonStandard,
    /// The charger is sourcing VBUS
    Otg,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BitfieldSpecifier)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[bits = 2]
/// Charge cycle phase reported by the charger
pub enum ChargeState {
    /// Not charging
    #[default]
    NotCharging,
    /// Pre-charge (battery below the low-voltage threshold)
    PreCharge,
    /// Constant current or constant voltage
    FastCharge,
    /// Termination reached
    Done,
}

#[bitfield(bits = 8)]
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
/// Charger status (REG08)
pub struct Status {
    pub vsys_regulation: bool,
    pub thermal_regulation: bool,
    pub power_good: bool,
    #[bits = 2]
    pub charge_state: ChargeState,
    #[bits = 3]
    pub vbus_type: VbusType,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BitfieldSpecifier)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[bits = 2]
/// Charge fault kind
pub enum ChargeFault {
    /// No fault
    #[default]
    Normal,
    /// Input over-voltage or VBUS below the sleep threshold
    Input,
    /// Thermal shutdown
    Thermal,
    /// Safety timer expired
    SafetyTimer,
}

#[bitfield(bits = 8)]
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
/// Latched fault flags (REG09)
pub struct Faults {
    pub ntc: B3,
    pub battery_overvoltage: bool,
    #[bits = 2]
    pub charge: ChargeFault,
    pub boost: bool,
    pub watchdog: bool,
}

#[bitfield(bits = 8)]
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
/// Input condition flags and interrupt masks (REG0A)
pub struct Condition {
    pub iindpm_int_masked: bool,
    pub vindpm_int_masked: bool,
    pub ac_overvoltage: bool,
    pub topoff_active: bool,
    #[skip]
    __: B1,
    pub iindpm_active: bool,
    pub vindpm_active: bool,
    pub vbus_good: bool,
}

#[bitfield(bits = 8)]
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
/// Part number and revision (REG0B)
pub struct PartInfo {
    pub revision: B2,
    #[skip]
    __: B1,
    pub part_number: B4,
    pub register_reset: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_fields_follow_reg08_layout() {
        // VBUS_STAT=DCP, CHRG_STAT=fast charge, PG set
        let status = Status::from_bytes([0b011_10_1_0_0]);
        assert_eq!(status.vbus_type(), VbusType::Dcp);
        assert_eq!(status.charge_state(), ChargeState::FastCharge);
        assert!(status.power_good());
        assert!(!status.thermal_regulation());
    }

    #[test]
    fn condition_vbus_good_is_bit_7() {
        assert!(Condition::from_bytes([0x80]).vbus_good());
        assert!(!Condition::from_bytes([0x7f]).vbus_good());
    }

    #[test]
    fn part_info_extracts_part_number() {
        let info = PartInfo::from_bytes([0b0_0010_0_01]);
        assert_eq!(info.part_number(), 0x02);
        assert_eq!(info.revision(), 0x01);
    }

    #[test]
    fn field_place_and_extract_are_masked() {
        assert_eq!(field::VREG.place(0x1f), 0xf8);
        assert_eq!(field::VREG.extract(0xff), 0x1f);
        assert_eq!(field::ICHG.place(0xff), 0x3f);
        assert_eq!(field::STAT_CTRL.extract(0b0110_0000), 0b11);
    }

    #[test]
    fn status_masks_do_not_overlap() {
        let fields = [field::EN_HIZ, field::STAT_CTRL, field::IINDPM];
        for (i, a) in fields.iter().enumerate() {
            for b in fields.iter().skip(i + 1) {
                assert_eq!(a.mask & b.mask, 0);
            }
        }
    }
}
