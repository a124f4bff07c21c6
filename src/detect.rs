//! Charger detection states and source classification.

use crate::registers::VbusType;

/// Where the detection engine is within one plug-in session.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum DetectionState {
    /// Nothing plugged in.
    #[default]
    Idle,
    /// VBUS seen, waiting for power good.
    VbusPresent,
    /// Reading and classifying the source.
    Classifying,
    /// Classified, status broadcast pending.
    Classified(UsbType),
    /// Ambiguous source, waiting for the recheck.
    RetryScheduled,
    /// Classified and published. Latched until unplug.
    Settled(UsbType),
}

impl DetectionState {
    /// Whether moving to `next` is a legal transition.
    pub fn allows(self, next: DetectionState) -> bool {
        use DetectionState::*;
        match (self, next) {
            (_, Idle) => true,
            (Idle, VbusPresent) => true,
            (VbusPresent, Classifying) => true,
            (Classifying, Classified(_)) | (Classifying, RetryScheduled) => true,
            (RetryScheduled, Classifying) => true,
            (Classified(a), Settled(b)) => a == b,
            _ => false,
        }
    }

    /// Whether a classification has been reached in this session.
    pub fn is_classified(self) -> bool {
        matches!(self, DetectionState::Classified(_) | DetectionState::Settled(_))
    }

    /// The classified source type, if any.
    pub fn usb_type(self) -> Option<UsbType> {
        match self {
            DetectionState::Classified(t) | DetectionState::Settled(t) => Some(t),
            _ => None,
        }
    }
}

/// USB source type as published to the rest of the system.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum UsbType {
    /// Unknown or absent
    #[default]
    Unknown,
    /// Standard downstream port
    Sdp,
    /// Charging downstream port
    Cdp,
    /// Dedicated charging port
    Dcp,
    /// Non-standard adapter
    NonStandard,
}

/// Coarse charger class.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum ChargerClass {
    /// No charger
    #[default]
    Unknown,
    /// USB host port or an unidentified adapter
    Usb,
    /// USB charging downstream port
    UsbCdp,
    /// USB dedicated charging port
    UsbDcp,
}

impl ChargerClass {
    /// Whether the port carries USB data, so the data lines belong to the USB controller.
    pub const fn has_data(self) -> bool {
        matches!(self, ChargerClass::Usb | ChargerClass::UsbCdp)
    }
}

/// Map the raw VBUS_STAT field.
pub const fn classify(vbus: VbusType) -> (UsbType, ChargerClass) {
    match vbus {
        VbusType::None | VbusType::Reserved | VbusType::Otg => (UsbType::Unknown, ChargerClass::Unknown),
        VbusType::Sdp => (UsbType::Sdp, ChargerClass::Usb),
        VbusType::Cdp => (UsbType::Cdp, ChargerClass::UsbCdp),
        VbusType::Dcp => (UsbType::Dcp, ChargerClass::UsbDcp),
        VbusType::Unknown => (UsbType::Unknown, ChargerClass::Usb),
        VbusType::NonStandard => (UsbType::NonStandard, ChargerClass::Usb),
    }
}

/// Whether the USB stack wants charger detection for the current session.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Bc12Policy {
    /// Take the data lines and recheck ambiguous sources.
    #[default]
    Required,
    /// Leave the data lines alone and never recheck.
    NotRequired,
    /// Take the data lines but accept the first classification.
    NoRetry,
}

impl Bc12Policy {
    /// Whether the charger may take the USB data lines.
    pub const fn takes_mux(self) -> bool {
        !matches!(self, Bc12Policy::NotRequired)
    }

    /// Whether an ambiguous classification may be retried.
    pub const fn allows_retry(self) -> bool {
        matches!(self, Bc12Policy::Required)
    }
}

/// Owner of the USB D+/D- lines.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum UsbSwitch {
    /// The charger drives the lines for detection
    Charger,
    /// The USB controller owns the lines
    Usb,
}
