//! Board configuration with the fallbacks used when a property is absent.

use embassy_time::Duration;

use crate::bus::DEFAULT_ATTEMPTS;
use crate::detect::UsbType;
use crate::encode::{StatPin, WatchdogTimeout, INPUT_CURRENT};
use crate::registers::{ADDR, ALT_ADDR};
use crate::variant::{DeviceVariant, VariantConfig};

/// Charge parameters in mA and mV.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct ChargeProfile {
    /// Input current limit applied to dedicated chargers.
    pub input_current_limit_ma: u32,
    /// Fast charge current.
    pub charge_current_ma: u32,
    /// Constant voltage target.
    pub charge_voltage_mv: u32,
    /// Pre-charge current.
    pub precharge_current_ma: u32,
    /// Termination current.
    pub termination_current_ma: u32,
    /// VINDPM threshold.
    pub input_voltage_limit_mv: u32,
    /// Drop below the charge voltage that restarts charging.
    pub recharge_threshold_mv: u32,
    /// OTG output voltage.
    pub boost_voltage_mv: u32,
    /// OTG current limit.
    pub boost_current_ma: u32,
}

impl Default for ChargeProfile {
    fn default() -> Self {
        ChargeProfile {
            input_current_limit_ma: 2000,
            charge_current_ma: 2000,
            charge_voltage_mv: 4200,
            precharge_current_ma: 180,
            termination_current_ma: 180,
            input_voltage_limit_mv: 4500,
            recharge_threshold_mv: 100,
            boost_voltage_mv: 5000,
            boost_current_ma: 1200,
        }
    }
}

impl ChargeProfile {
    /// Clamp every coded field into the range `variant` can represent.
    pub fn clamped(&self, variant: &VariantConfig) -> Self {
        let voltage = variant.charge_voltage;
        ChargeProfile {
            input_current_limit_ma: self.input_current_limit_ma.clamp(INPUT_CURRENT.min, INPUT_CURRENT.max),
            charge_current_ma: variant.charge_current.clamp(self.charge_current_ma),
            charge_voltage_mv: self.charge_voltage_mv.clamp(voltage.min(), voltage.max()),
            precharge_current_ma: variant.precharge_current.clamp(self.precharge_current_ma),
            termination_current_ma: variant.termination_current.clamp(self.termination_current_ma),
            ..*self
        }
    }
}

/// Delays and retry bounds of the detection engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Timing {
    /// Attempts per I2C transfer.
    pub i2c_attempts: u8,
    /// Delay before an ambiguous classification is checked again.
    pub recheck_delay: Duration,
    /// Classification passes per plug-in session, the first one included.
    pub classification_attempts: u8,
    /// Delay before a status change is published.
    pub broadcast_delay: Duration,
    /// Settle time after switching the USB data mux.
    pub mux_settle: Duration,
    /// Settle time after forcing DPDM detection on a recheck.
    pub recheck_dpdm_settle: Duration,
    /// Settle time after forcing DPDM detection at probe.
    pub probe_dpdm_settle: Duration,
    /// Input and charge current applied until classification completes.
    pub provisional_current_ma: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            i2c_attempts: DEFAULT_ATTEMPTS,
            recheck_delay: Duration::from_secs(3),
            classification_attempts: 2,
            broadcast_delay: Duration::from_millis(150),
            mux_settle: Duration::from_millis(50),
            recheck_dpdm_settle: Duration::from_millis(600),
            probe_dpdm_settle: Duration::from_millis(300),
            provisional_current_ma: 500,
        }
    }
}

/// Everything a board tells the driver about its charger.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Config {
    /// Name the charger is published under.
    pub name: &'static str,
    /// Address probed first.
    pub address: u8,
    /// Address probed when nothing answers at `address`.
    pub alt_address: Option<u8>,
    /// Variants this board may be populated with.
    pub compatible: &'static [DeviceVariant],
    /// Charge parameters.
    pub profile: ChargeProfile,
    /// STAT pin function.
    pub stat_pin: StatPin,
    /// Input over-voltage threshold.
    pub ac_ovp_mv: u32,
    /// I2C watchdog.
    pub watchdog: WatchdogTimeout,
    /// Charge safety timer.
    pub safety_timer: bool,
    /// The system booted only to charge while powered off.
    pub power_off_charging: bool,
    /// Delays and retry bounds.
    pub timing: Timing,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            name: "primary_chg",
            address: ADDR,
            alt_address: Some(ALT_ADDR),
            compatible: &[DeviceVariant::Upm6910d, DeviceVariant::Sgm41513d],
            profile: ChargeProfile::default(),
            stat_pin: StatPin::Status,
            ac_ovp_mv: 6500,
            watchdog: WatchdogTimeout::Disabled,
            safety_timer: false,
            power_off_charging: false,
            timing: Timing::default(),
        }
    }
}

impl Config {
    /// Whether a detected variant may be driven with this configuration.
    ///
    /// The UPM6922 parts report the UPM6910D part number and are accepted wherever it is.
    pub fn accepts(&self, variant: DeviceVariant) -> bool {
        self.compatible
            .iter()
            .any(|c| *c == variant || c.part_number() == variant.part_number())
    }

    /// Input current limit for a classified source.
    pub fn input_limit_for(&self, usb_type: UsbType) -> u32 {
        match usb_type {
            UsbType::Sdp | UsbType::Unknown => 500,
            UsbType::Cdp => 1500,
            UsbType::Dcp => self.profile.input_current_limit_ma,
            UsbType::NonStandard => 1000,
        }
    }

    /// Charge current for a classified source.
    pub fn charge_current_for(&self, usb_type: UsbType) -> u32 {
        match usb_type {
            UsbType::Sdp | UsbType::Unknown => 500,
            _ => self.profile.charge_current_ma,
        }
    }

    /// Delay before a status change is published.
    pub fn broadcast_delay(&self) -> Duration {
        if self.power_off_charging {
            Duration::from_ticks(0)
        } else {
            self.timing.broadcast_delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::{SGM41513D, UPM6910D};

    #[test]
    fn per_type_limits() {
        let config = Config::default();
        assert_eq!(config.input_limit_for(UsbType::Sdp), 500);
        assert_eq!(config.input_limit_for(UsbType::Cdp), 1500);
        assert_eq!(config.input_limit_for(UsbType::Dcp), 2000);
        assert_eq!(config.input_limit_for(UsbType::NonStandard), 1000);
        assert_eq!(config.input_limit_for(UsbType::Unknown), 500);
        assert_eq!(config.charge_current_for(UsbType::Sdp), 500);
        assert_eq!(config.charge_current_for(UsbType::Cdp), 2000);
    }

    #[test]
    fn profile_is_clamped_per_variant() {
        let profile = ChargeProfile {
            charge_voltage_mv: 5000,
            termination_current_ma: 1,
            charge_current_ma: 9000,
            ..ChargeProfile::default()
        };
        let upm = profile.clamped(&UPM6910D);
        assert_eq!(upm.charge_voltage_mv, 4624);
        assert_eq!(upm.termination_current_ma, 60);
        assert_eq!(upm.charge_current_ma, 3000);
        let sgm = profile.clamped(&SGM41513D);
        assert_eq!(sgm.charge_voltage_mv, 4848);
        assert_eq!(sgm.termination_current_ma, 5);
    }

    #[test]
    fn upm6922_is_accepted_as_upm6910d() {
        let config = Config::default();
        assert!(config.accepts(DeviceVariant::Upm6922));
        assert!(config.accepts(DeviceVariant::Sgm41513d));
        let strict = Config {
            compatible: &[DeviceVariant::Sgm41513d],
            ..Config::default()
        };
        assert!(!strict.accepts(DeviceVariant::Upm6910d));
    }

    #[test]
    fn power_off_charging_broadcasts_immediately() {
        let config = Config {
            power_off_charging: true,
            ..Config::default()
        };
        assert_eq!(config.broadcast_delay(), Duration::from_ticks(0));
    }
}
