//! Silicon variants and what sets them apart.

use embassy_time::Duration;
use embedded_hal_async::i2c::I2c;

use crate::bus::RegisterBus;
use crate::encode::{self, Coding, VindpmCoding, VoltageCoding};
use crate::registers::{field, Field, PartInfo, Reg, EXT_KEY_ENTER, EXT_KEY_EXIT};
use crate::Error;

/// Part number reported in REG0B.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum PartNumber {
    /// SGM41513D
    Sgm41513d = 0x01,
    /// UPM6910D and the UPM6922 family
    Upm6910d = 0x02,
}

impl PartNumber {
    /// Decode the REG0B part number field.
    pub const fn from_u8(pn: u8) -> Option<Self> {
        match pn {
            0x01 => Some(PartNumber::Sgm41513d),
            0x02 => Some(PartNumber::Upm6910d),
            _ => None,
        }
    }
}

/// A detected charger part.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum DeviceVariant {
    /// UPM6910D
    Upm6910d,
    /// UPM6922
    Upm6922,
    /// UPM6922P
    Upm6922p,
    /// SGM41513D
    Sgm41513d,
}

impl DeviceVariant {
    /// Part number this variant reports.
    pub const fn part_number(self) -> PartNumber {
        match self {
            DeviceVariant::Sgm41513d => PartNumber::Sgm41513d,
            _ => PartNumber::Upm6910d,
        }
    }

    /// Capabilities and codings of this variant.
    pub const fn config(self) -> &'static VariantConfig {
        match self {
            DeviceVariant::Upm6910d => &UPM6910D,
            DeviceVariant::Upm6922 => &UPM6922,
            DeviceVariant::Upm6922p => &UPM6922P,
            DeviceVariant::Sgm41513d => &SGM41513D,
        }
    }

    /// Identify the part at the bus' current address.
    ///
    /// Only the extended page key is written, and the page is always closed again once opened.
    pub async fn identify<D: I2c>(bus: &mut RegisterBus<D>) -> Result<Self, Error<D::Error>> {
        let info = PartInfo::from_bytes([bus.read(Reg::PART_INFO).await?]);
        let variant = match PartNumber::from_u8(info.part_number()) {
            Some(PartNumber::Sgm41513d) => DeviceVariant::Sgm41513d,
            Some(PartNumber::Upm6910d) => {
                // Only the UPM6922 family has a VSYS ADC; the UPM6910D reads back zero.
                if bus.read_field(field::VSYS).await? == 0 {
                    DeviceVariant::Upm6910d
                } else {
                    bus.write(Reg::EXT_KEY, EXT_KEY_ENTER).await?;
                    let detect = bus.read_field(field::DEVICE_DETECT).await;
                    bus.write(Reg::EXT_KEY, EXT_KEY_EXIT).await?;
                    if detect? != 0 {
                        DeviceVariant::Upm6922
                    } else {
                        DeviceVariant::Upm6922p
                    }
                }
            }
            None => return Err(Error::UnknownPart(info.part_number())),
        };
        debug!("identified {} rev {}", variant, info.revision());
        Ok(variant)
    }
}

/// How a finished charge cycle is recognised.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum DoneDetection {
    /// Trust CHRG_STAT in REG08.
    Register,
    /// Battery within the recharge window of the forced CV and current at or below `iterm_ma`.
    Gauge {
        /// Battery current below which the cycle counts as finished.
        iterm_ma: u32,
    },
}

/// Per-variant capability table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VariantConfig {
    /// The variant described.
    pub variant: DeviceVariant,
    /// Fast charge current coding.
    pub charge_current: Coding,
    /// Pre-charge current coding.
    pub precharge_current: Coding,
    /// Termination current coding.
    pub termination_current: Coding,
    /// Charge voltage coding.
    pub charge_voltage: VoltageCoding,
    /// Fine trim field, for split charge voltage codings.
    pub voltage_trim: Option<Field>,
    /// VINDPM coding.
    pub input_voltage: VindpmCoding,
    /// D+ mux field.
    pub dp_mux: Field,
    /// Whether the DP/DM register carries the HVDCP and BC1.2 enables.
    pub hvdcp: bool,
    /// Charge voltage forced at init, overriding the profile.
    pub forced_charge_voltage_mv: Option<u32>,
    /// Extended page setup and BC1.2 enable at init.
    pub extended_setup: bool,
    /// Charge done detection.
    pub done_detection: DoneDetection,
    /// Consecutive done readings needed to latch.
    pub done_samples: u8,
    /// Hold the charge current at zero while done is latched.
    pub zero_current_when_done: bool,
    /// Delay between probe and the first detection pass.
    pub probe_delay: Duration,
}

const UPM6922_VOLTAGE: VoltageCoding = VoltageCoding::FineTrim {
    coarse: encode::UPM6922_CHARGE_VOLTAGE,
    trim_step: 8,
    max: 4864,
};

/// UPM6910D.
pub const UPM6910D: VariantConfig = VariantConfig {
    variant: DeviceVariant::Upm6910d,
    charge_current: Coding::Linear(encode::UPM_CHARGE_CURRENT),
    precharge_current: Coding::Linear(encode::UPM_PRECHARGE_TERM),
    termination_current: Coding::Linear(encode::UPM_PRECHARGE_TERM),
    charge_voltage: VoltageCoding::Single(Coding::Piecewise(encode::UPM6910_CHARGE_VOLTAGE)),
    voltage_trim: None,
    input_voltage: VindpmCoding::Linear(encode::INPUT_VOLTAGE),
    dp_mux: field::UPM_DP_MUX,
    hvdcp: true,
    forced_charge_voltage_mv: None,
    extended_setup: false,
    done_detection: DoneDetection::Register,
    done_samples: 1,
    zero_current_when_done: false,
    probe_delay: Duration::from_millis(2000),
};

/// UPM6922.
pub const UPM6922: VariantConfig = VariantConfig {
    variant: DeviceVariant::Upm6922,
    charge_current: Coding::Linear(encode::UPM_CHARGE_CURRENT),
    precharge_current: Coding::Linear(encode::UPM_PRECHARGE_TERM),
    termination_current: Coding::Linear(encode::UPM_PRECHARGE_TERM),
    charge_voltage: UPM6922_VOLTAGE,
    voltage_trim: Some(field::UPM_VREG_FT),
    input_voltage: VindpmCoding::Offset,
    dp_mux: field::UPM_DP_MUX,
    hvdcp: true,
    forced_charge_voltage_mv: Some(4448),
    extended_setup: true,
    done_detection: DoneDetection::Register,
    done_samples: 1,
    zero_current_when_done: false,
    probe_delay: Duration::from_millis(2000),
};

/// UPM6922P.
pub const UPM6922P: VariantConfig = VariantConfig {
    variant: DeviceVariant::Upm6922p,
    ..UPM6922
};

/// SGM41513D.
pub const SGM41513D: VariantConfig = VariantConfig {
    variant: DeviceVariant::Sgm41513d,
    charge_current: Coding::Piecewise(encode::SGM_CHARGE_CURRENT),
    precharge_current: Coding::Piecewise(encode::SGM_PRECHARGE_TERM),
    termination_current: Coding::Piecewise(encode::SGM_PRECHARGE_TERM),
    charge_voltage: VoltageCoding::SignedTrim {
        coarse: encode::SGM_CHARGE_VOLTAGE,
    },
    voltage_trim: Some(field::SGM_VREG_FT),
    input_voltage: VindpmCoding::Linear(encode::INPUT_VOLTAGE),
    dp_mux: field::SGM_DP_MUX,
    hvdcp: false,
    forced_charge_voltage_mv: Some(4448),
    extended_setup: false,
    done_detection: DoneDetection::Gauge { iterm_ma: 300 },
    done_samples: 3,
    zero_current_when_done: true,
    probe_delay: Duration::from_millis(700),
};
