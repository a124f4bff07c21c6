#![no_std]
#![warn(missing_docs)]

//! An embedded async driver for the UPM6910D/UPM6922/UPM6922P USB battery chargers and their
//! SGM41513D second source.
//!
//! [`Charger::probe`] identifies the part and programs the board [`Config`]. The charger then
//! needs its INT line and its deadlines serviced: either call [`Charger::handle_irq`] and
//! [`Charger::poll`] yourself, or wrap the charger in a [`SharedCharger`] and spawn [`run`] and
//! [`forward_irq`]. Other tasks reach the charger through [`SharedCharger::lock`].

// Must come first so the logging macros are visible to the other modules.
mod fmt;

mod bus;
mod charger;
mod config;
mod control;
mod detect;
pub mod encode;
mod notify;
pub mod registers;
mod runner;
mod variant;

pub use bus::{RegisterBus, DEFAULT_ATTEMPTS};
pub use charger::{Charger, ChargerContext, DoneTracker, Recheck};
pub use config::{ChargeProfile, Config, Timing};
pub use control::DUMP_LEN;
pub use detect::{classify, Bc12Policy, ChargerClass, DetectionState, UsbSwitch, UsbType};
pub use notify::{BatterySample, Board, Broadcaster, ChargeStatus, Properties};
pub use runner::{forward_irq, run, ChargerGuard, SharedCharger};
pub use variant::{DeviceVariant, DoneDetection, PartNumber, VariantConfig};

/// Charger errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror_no_std::Error)]
pub enum Error<E> {
    /// An I2C transfer kept failing; carries the last bus error.
    #[error("charger unavailable on the bus")]
    Unavailable(E),
    /// REG0B reported a part number this driver does not know.
    #[error("unknown part number {0:#x}")]
    UnknownPart(u8),
    /// The detected part is not one the configuration accepts.
    #[error("{0:?} is not compatible with this board")]
    PartMismatch(DeviceVariant),
    /// The battery was disconnected for shipping.
    #[error("ship mode entered")]
    ShipMode,
    /// The register is outside the writable diagnostic range.
    #[error("register {0:#x} cannot be written")]
    InvalidRegister(u8),
}

impl<E> Error<E> {
    /// A short description for log lines.
    pub fn describe(&self) -> &'static str {
        match self {
            Error::Unavailable(_) => "unavailable",
            Error::UnknownPart(_) => "unknown part",
            Error::PartMismatch(_) => "part mismatch",
            Error::ShipMode => "ship mode",
            Error::InvalidRegister(_) => "invalid register",
        }
    }
}
