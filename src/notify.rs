//! Power-supply properties and the collaborators they are published to.

use crate::detect::{ChargerClass, UsbSwitch, UsbType};
use crate::registers::ChargeState;

/// Charging status as seen by the rest of the system.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum ChargeStatus {
    /// Not known yet
    #[default]
    Unknown,
    /// Charging
    Charging,
    /// Running from the battery
    Discharging,
    /// Input present but not charging
    NotCharging,
    /// Charge complete
    Full,
}

impl ChargeStatus {
    /// Derive the status from power good, CHRG_STAT and the done latch.
    ///
    /// `done_latched` is `None` for parts that trust CHRG_STAT for termination and `Some` for
    /// parts where termination is confirmed in software.
    pub fn derive(power_good: bool, state: ChargeState, done_latched: Option<bool>) -> Self {
        if !power_good {
            return ChargeStatus::Discharging;
        }
        if done_latched == Some(true) {
            return ChargeStatus::Full;
        }
        match state {
            ChargeState::NotCharging => ChargeStatus::NotCharging,
            ChargeState::PreCharge | ChargeState::FastCharge => ChargeStatus::Charging,
            ChargeState::Done if done_latched.is_some() => ChargeStatus::Discharging,
            ChargeState::Done => ChargeStatus::Full,
        }
    }
}

/// A snapshot of the charger's power-supply properties.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Properties {
    /// Input power is good.
    pub online: bool,
    /// Same as `online`.
    pub present: bool,
    /// Charging status.
    pub status: ChargeStatus,
    /// Classified source type.
    pub usb_type: UsbType,
    /// Coarse charger class.
    pub charger_class: ChargerClass,
    /// Programmed input current limit.
    pub input_current_limit_ma: u32,
    /// Programmed charge voltage.
    pub constant_charge_voltage_mv: u32,
    /// Programmed charge current.
    pub constant_charge_current_ma: u32,
    /// VBUS voltage, when the board can measure it.
    pub voltage_now_mv: Option<u32>,
}

impl Properties {
    fn same_state(&self, other: &Properties) -> bool {
        Properties {
            voltage_now_mv: None,
            ..*self
        } == Properties {
            voltage_now_mv: None,
            ..*other
        }
    }
}

/// Suppresses publications that would repeat the last one.
///
/// `voltage_now_mv` moves continuously and is not considered a change.
#[derive(Debug, Default)]
pub struct Broadcaster {
    last: Option<Properties>,
}

impl Broadcaster {
    /// Record `props`, returning whether they differ from what was last published.
    pub fn update(&mut self, props: &Properties) -> bool {
        match &self.last {
            Some(last) if last.same_state(props) => false,
            _ => {
                self.last = Some(*props);
                true
            }
        }
    }

    /// Last published snapshot.
    pub fn last(&self) -> Option<&Properties> {
        self.last.as_ref()
    }
}

/// One battery reading.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct BatterySample {
    /// Battery voltage.
    pub voltage_mv: u32,
    /// Battery current, positive when charging.
    pub current_ma: i32,
}

/// The parts of the system the charger talks to besides its own registers.
pub trait Board {
    /// Hand the USB D+/D- lines to the charger or back to the USB controller.
    fn set_usb_switch(&mut self, switch: UsbSwitch);

    /// Engage or release the external OTG current path, if the board has one.
    fn set_otg_path(&mut self, _on: bool) {}

    /// Whether the USB controller is enumerated by a host.
    fn usb_enumerating(&mut self) -> bool;

    /// Read the battery, if a gauge is available.
    fn battery(&mut self) -> Option<BatterySample> {
        None
    }

    /// Read the VBUS voltage, if the board can measure it.
    fn vbus_mv(&mut self) -> Option<u32> {
        None
    }

    /// Publish a property change.
    fn power_supply_changed(&mut self, name: &'static str, props: &Properties);
}
