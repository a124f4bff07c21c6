//! Retrying byte-register access over I2C.

use embedded_hal_async::i2c::I2c;

use crate::registers::{Field, Reg};
use crate::Error;

/// Number of attempts made for every transfer unless configured otherwise.
pub const DEFAULT_ATTEMPTS: u8 = 3;

/// Byte-addressable register space of one charger.
///
/// Every transfer is retried up to `attempts` times without backoff. All access goes through
/// `&mut self`, so holding the bus (or the mutex around the owning [`Charger`](crate::Charger))
/// is what keeps read-modify-write sequences from interleaving.
pub struct RegisterBus<D> {
    i2c_dev: D,
    addr: u8,
    attempts: u8,
}

impl<D: I2c> RegisterBus<D> {
    /// Create a bus for the device at `addr`.
    pub fn new(i2c_dev: D, addr: u8, attempts: u8) -> Self {
        RegisterBus {
            i2c_dev,
            addr,
            attempts: attempts.max(1),
        }
    }

    /// The 7-bit address transfers are sent to.
    pub fn address(&self) -> u8 {
        self.addr
    }

    /// Point the bus at another address.
    pub fn set_address(&mut self, addr: u8) {
        self.addr = addr;
    }

    /// Give the I2C device back.
    pub fn release(self) -> D {
        self.i2c_dev
    }

    /// Read one register.
    pub async fn read(&mut self, reg: Reg) -> Result<u8, Error<D::Error>> {
        let mut attempt = 1;
        loop {
            let mut val = 0u8;
            let res = self
                .i2c_dev
                .write_read(
                    self.addr,
                    core::slice::from_ref(&reg.to_u8()),
                    core::slice::from_mut(&mut val),
                )
                .await;
            match res {
                Ok(()) => return Ok(val),
                Err(e) if attempt >= self.attempts => {
                    warn!("read of reg {=u8:#x} failed after {} attempts", reg.0, attempt);
                    return Err(Error::Unavailable(e));
                }
                Err(_) => attempt += 1,
            }
        }
    }

    /// Write one register.
    pub async fn write(&mut self, reg: Reg, val: u8) -> Result<(), Error<D::Error>> {
        let buf = [reg.to_u8(), val];
        let mut attempt = 1;
        loop {
            match self.i2c_dev.write(self.addr, &buf).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.attempts => {
                    warn!(
                        "write of {=u8:#x} to reg {=u8:#x} failed after {} attempts",
                        val,
                        reg.0,
                        attempt
                    );
                    return Err(Error::Unavailable(e));
                }
                Err(_) => attempt += 1,
            }
        }
    }

    /// Read-modify-write: replace the bits selected by `mask` with those of `val`.
    ///
    /// Bits outside `mask` keep the value just read. The write is always issued, and a failed
    /// read aborts without writing.
    pub async fn update_bits(&mut self, reg: Reg, mask: u8, val: u8) -> Result<(), Error<D::Error>> {
        self.modify(reg, |x| x & !mask | val & mask).await
    }

    /// Read-modify-write with an arbitrary function.
    pub async fn modify<F: FnOnce(u8) -> u8>(&mut self, reg: Reg, func: F) -> Result<(), Error<D::Error>> {
        let val = self.read(reg).await?;
        let val = func(val);
        self.write(reg, val).await
    }

    /// Read a field, shifted down to bit 0.
    pub async fn read_field(&mut self, field: Field) -> Result<u8, Error<D::Error>> {
        self.read(field.reg).await.map(|x| field.extract(x))
    }

    /// Write a field, leaving the rest of its register untouched.
    pub async fn write_field(&mut self, field: Field, value: u8) -> Result<(), Error<D::Error>> {
        self.update_bits(field.reg, field.mask, field.place(value)).await
    }

    /// Set or clear a single-bit field.
    pub async fn set_flag(&mut self, field: Field, on: bool) -> Result<(), Error<D::Error>> {
        self.write_field(field, u8::from(on)).await
    }
}
