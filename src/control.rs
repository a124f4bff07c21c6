//! Operating modes, safety features and charge parameters.

use embassy_time::{Duration, Instant};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;

use crate::charger::{Charger, DoneTracker};
use crate::encode::{
    boost_current_code, recharge_code, AcOvp, BoostVoltage, StatPin, TopoffTimer, VindpmCode, VindpmCoding,
    VoltageCode, WatchdogTimeout, INPUT_CURRENT,
};
use crate::notify::Board;
use crate::registers::{field, ChargeState, Faults, Field, Reg, Status};
use crate::variant::DoneDetection;
use crate::Error;

/// Number of registers returned by [`Charger::dump_registers`].
pub const DUMP_LEN: usize = Reg::LAST_COMMON.0 as usize + 1;

impl<D: I2c, B: Board, T: DelayNs> Charger<D, B, T> {
    /// Turn on OTG boost.
    ///
    /// HIZ is left first if set, then the OTG bit is set, then the board's external current path
    /// is engaged. Does nothing if boost is already on.
    pub async fn enable_otg(&mut self) -> Result<(), Error<D::Error>> {
        if self.ctx.shipped {
            return Err(Error::ShipMode);
        }
        if self.ctx.otg_enabled {
            return Ok(());
        }
        if self.bus.read_field(field::EN_HIZ).await? != 0 {
            debug!("leaving hiz for otg");
            self.bus.set_flag(field::EN_HIZ, false).await?;
        }
        self.ctx.hiz_enabled = false;
        self.bus.set_flag(field::OTG_CONFIG, true).await?;
        self.ctx.otg_enabled = true;
        self.board.set_otg_path(true);
        info!("otg on");
        Ok(())
    }

    /// Turn off OTG boost: clear the OTG bit, then release the external current path.
    pub async fn disable_otg(&mut self) -> Result<(), Error<D::Error>> {
        if !self.ctx.otg_enabled {
            return Ok(());
        }
        self.bus.set_flag(field::OTG_CONFIG, false).await?;
        self.ctx.otg_enabled = false;
        self.board.set_otg_path(false);
        info!("otg off");
        Ok(())
    }

    /// Read the OTG bit.
    pub async fn otg_enabled(&mut self) -> Result<bool, Error<D::Error>> {
        Ok(self.bus.read_field(field::OTG_CONFIG).await? != 0)
    }

    /// Enter or leave HIZ. Leaving is refused after ship mode.
    pub async fn set_hiz(&mut self, on: bool) -> Result<(), Error<D::Error>> {
        if !on && self.ctx.shipped {
            return Err(Error::ShipMode);
        }
        self.bus.set_flag(field::EN_HIZ, on).await?;
        self.ctx.hiz_enabled = on;
        Ok(())
    }

    /// Enable or disable charging, returning the state read back from the part.
    pub async fn set_charging(&mut self, on: bool) -> Result<bool, Error<D::Error>> {
        if on && self.ctx.shipped {
            return Err(Error::ShipMode);
        }
        self.bus.set_flag(field::CHG_CONFIG, on).await?;
        let enabled = self.bus.read_field(field::CHG_CONFIG).await? != 0;
        self.ctx.charge_enabled = enabled;
        Ok(enabled)
    }

    /// Disconnect the battery for shipping.
    ///
    /// Sets HIZ, disables the battery FET, then selects the delayed turn-off if `delayed`.
    /// Charging cannot be re-enabled afterwards.
    pub async fn enter_ship_mode(&mut self, delayed: bool) -> Result<(), Error<D::Error>> {
        self.bus.set_flag(field::EN_HIZ, true).await?;
        self.ctx.hiz_enabled = true;
        self.ctx.shipped = true;
        self.ctx.charge_enabled = false;
        self.bus.set_flag(field::BATFET_DIS, true).await?;
        self.bus.set_flag(field::BATFET_DLY, delayed).await?;
        warn!("ship mode");
        Ok(())
    }

    /// Configure the I2C watchdog. The kick is scheduled at half the timeout.
    pub async fn set_watchdog(&mut self, timeout: WatchdogTimeout, now: Instant) -> Result<(), Error<D::Error>> {
        self.bus.write_field(field::WATCHDOG, timeout as u8).await?;
        self.ctx.watchdog = timeout;
        self.schedule_kick(now);
        Ok(())
    }

    /// Reset the watchdog and schedule the next kick.
    pub async fn kick_watchdog(&mut self, now: Instant) -> Result<(), Error<D::Error>> {
        self.schedule_kick(now);
        trace!("watchdog kick");
        self.bus.set_flag(field::WD_RST, true).await
    }

    fn schedule_kick(&mut self, now: Instant) {
        self.ctx.watchdog_due = self.ctx.watchdog.secs().map(|s| now + Duration::from_secs(s / 2));
    }

    /// Enable or disable the charge safety timer.
    pub async fn set_safety_timer(&mut self, on: bool) -> Result<(), Error<D::Error>> {
        self.bus.set_flag(field::EN_TIMER, on).await
    }

    /// Read the safety timer enable.
    pub async fn safety_timer_enabled(&mut self) -> Result<bool, Error<D::Error>> {
        Ok(self.bus.read_field(field::EN_TIMER).await? != 0)
    }

    /// Set the input current limit.
    pub async fn set_input_current_limit(&mut self, ma: u32) -> Result<(), Error<D::Error>> {
        self.bus.write_field(field::IINDPM, INPUT_CURRENT.encode(ma)).await
    }

    /// Read back the input current limit.
    pub async fn input_current_limit(&mut self) -> Result<u32, Error<D::Error>> {
        Ok(INPUT_CURRENT.decode(self.bus.read_field(field::IINDPM).await?))
    }

    /// Set the fast charge current.
    pub async fn set_charge_current(&mut self, ma: u32) -> Result<(), Error<D::Error>> {
        self.ctx.charge_current_ma = self.variant.charge_current.clamp(ma);
        self.write_charge_current(ma).await
    }

    /// Read back the fast charge current.
    pub async fn charge_current(&mut self) -> Result<u32, Error<D::Error>> {
        Ok(self.variant.charge_current.decode(self.bus.read_field(field::ICHG).await?))
    }

    /// Set the charge voltage, writing the fine trim register as well on parts that have one.
    pub async fn set_charge_voltage(&mut self, mv: u32) -> Result<(), Error<D::Error>> {
        let coding = self.variant.charge_voltage;
        let code = coding.encode(mv);
        self.bus.write_field(field::VREG, code.coarse).await?;
        if let (Some(trim_field), Some(trim)) = (self.variant.voltage_trim, code.trim) {
            self.bus.write_field(trim_field, trim).await?;
        }
        self.ctx.charge_voltage_mv = coding.decode(code);
        debug!("vreg {=u32} mV", self.ctx.charge_voltage_mv);
        Ok(())
    }

    /// Read back the charge voltage.
    pub async fn charge_voltage(&mut self) -> Result<u32, Error<D::Error>> {
        let coarse = self.bus.read_field(field::VREG).await?;
        let trim = match self.variant.voltage_trim {
            Some(f) => Some(self.bus.read_field(f).await?),
            None => None,
        };
        Ok(self.variant.charge_voltage.decode(VoltageCode { coarse, trim }))
    }

    /// Set the VINDPM threshold.
    pub async fn set_input_voltage_limit(&mut self, mv: u32) -> Result<(), Error<D::Error>> {
        let VindpmCode { code, offset } = self.variant.input_voltage.encode(mv);
        self.bus.write_field(field::VINDPM, code).await?;
        if let (VindpmCoding::Offset, Some(offset)) = (self.variant.input_voltage, offset) {
            self.bus.write_field(field::VINDPM_OS, offset).await?;
        }
        self.ctx.input_voltage_limit_mv = mv;
        Ok(())
    }

    /// Last requested VINDPM threshold.
    pub fn input_voltage_limit(&self) -> u32 {
        self.ctx.input_voltage_limit_mv
    }

    /// Set the pre-charge current.
    pub async fn set_precharge_current(&mut self, ma: u32) -> Result<(), Error<D::Error>> {
        let code = self.variant.precharge_current.encode(ma);
        self.bus.write_field(field::IPRECHG, code).await
    }

    /// Set the termination current.
    pub async fn set_termination_current(&mut self, ma: u32) -> Result<(), Error<D::Error>> {
        let code = self.variant.termination_current.encode(ma);
        self.bus.write_field(field::ITERM, code).await
    }

    /// Set the recharge threshold, rounded to 100 or 200 mV.
    pub async fn set_recharge_threshold(&mut self, mv: u32) -> Result<(), Error<D::Error>> {
        let (code, actual) = recharge_code(mv);
        self.bus.write_field(field::VRECHG, code).await?;
        self.ctx.recharge_threshold_mv = actual;
        Ok(())
    }

    /// Set the top-off timer.
    pub async fn set_topoff_timer(&mut self, timer: TopoffTimer) -> Result<(), Error<D::Error>> {
        self.bus.write_field(field::TOPOFF_TIMER, timer as u8).await
    }

    /// Set the OTG output voltage.
    pub async fn set_boost_voltage(&mut self, voltage: BoostVoltage) -> Result<(), Error<D::Error>> {
        self.bus.write_field(field::BOOSTV, voltage as u8).await
    }

    /// Set the OTG current limit.
    pub async fn set_boost_current(&mut self, ma: u32) -> Result<(), Error<D::Error>> {
        self.bus.write_field(field::BOOST_LIM, boost_current_code(ma)).await
    }

    /// Set the input over-voltage threshold.
    pub async fn set_ac_ovp(&mut self, ovp: AcOvp) -> Result<(), Error<D::Error>> {
        self.bus.write_field(field::OVP, ovp as u8).await
    }

    /// Set the STAT pin function.
    pub async fn set_stat_pin(&mut self, mode: StatPin) -> Result<(), Error<D::Error>> {
        self.bus.write_field(field::STAT_CTRL, mode as u8).await
    }

    /// Soft-reset the register file and program the configuration again.
    ///
    /// Refused after ship mode, since the reset would release HIZ and the BATFET.
    pub async fn reset_registers(&mut self, now: Instant) -> Result<(), Error<D::Error>> {
        if self.ctx.shipped {
            return Err(Error::ShipMode);
        }
        warn!("register reset");
        self.bus.set_flag(field::REG_RESET, true).await?;
        self.init_device(now).await
    }

    /// Read the latched faults.
    pub async fn faults(&mut self) -> Result<Faults, Error<D::Error>> {
        Ok(Faults::from_bytes([self.bus.read(Reg::FAULT).await?]))
    }

    /// Update the charge done latch from a fresh reading.
    ///
    /// A latched done is released once the battery drops below the charge voltage minus the
    /// recharge threshold; until then it holds, whatever CHRG_STAT reports. Returns whether done
    /// is latched.
    pub async fn check_charge_done(&mut self, now: Instant) -> Result<bool, Error<D::Error>> {
        let status = Status::from_bytes([self.bus.read(Reg::STATUS).await?]);
        if !status.power_good() {
            self.ctx.done.samples = 0;
            return Ok(self.ctx.done.latched);
        }
        let battery = self.board.battery();
        let floor = self
            .ctx
            .charge_voltage_mv
            .saturating_sub(self.ctx.recharge_threshold_mv);

        if self.ctx.done.latched {
            return match battery {
                Some(b) if b.voltage_mv < floor => {
                    info!("battery at {=u32} mV, recharging", b.voltage_mv);
                    self.ctx.done = DoneTracker::default();
                    self.schedule_broadcast(now);
                    self.write_charge_current(self.ctx.charge_current_ma).await?;
                    Ok(false)
                }
                _ => Ok(true),
            };
        }

        let reading = match self.variant.done_detection {
            DoneDetection::Register => status.charge_state() == ChargeState::Done,
            DoneDetection::Gauge { iterm_ma } => battery.is_some_and(|b| {
                b.voltage_mv >= floor && b.current_ma <= i32::try_from(iterm_ma).unwrap_or(i32::MAX)
            }),
        };
        if !reading {
            self.ctx.done.samples = 0;
            return Ok(false);
        }
        self.ctx.done.samples = self.ctx.done.samples.saturating_add(1);
        if self.ctx.done.samples < self.variant.done_samples {
            return Ok(false);
        }

        self.ctx.done.latched = true;
        info!("charge done");
        self.schedule_broadcast(now);
        if self.variant.zero_current_when_done {
            self.write_charge_current(0).await?;
        }
        Ok(true)
    }

    /// Read registers 0x00 to 0x0B.
    pub async fn dump_registers(&mut self) -> Result<[u8; DUMP_LEN], Error<D::Error>> {
        let mut regs = [0u8; DUMP_LEN];
        for (addr, val) in (0u8..).zip(regs.iter_mut()) {
            *val = self.bus.read(Reg::new(addr)).await?;
        }
        Ok(regs)
    }

    /// Write a raw register below 0x0B.
    ///
    /// After ship mode, a value that would clear HIZ or BATFET_DIS, or set CHG_CONFIG or
    /// OTG_CONFIG, is refused with [`Error::ShipMode`].
    pub async fn poke_register(&mut self, addr: u8, val: u8) -> Result<(), Error<D::Error>> {
        if addr >= Reg::LAST_COMMON.0 {
            return Err(Error::InvalidRegister(addr));
        }
        if self.ctx.shipped && leaves_ship_mode(Reg::new(addr), val) {
            warn!("poke {=u8:#x} = {=u8:#x} refused in ship mode", addr, val);
            return Err(Error::ShipMode);
        }
        debug!("poke {=u8:#x} = {=u8:#x}", addr, val);
        self.bus.write(Reg::new(addr), val).await
    }
}

fn leaves_ship_mode(reg: Reg, val: u8) -> bool {
    let cleared = |f: Field| f.reg == reg && f.extract(val) == 0;
    let set = |f: Field| f.reg == reg && f.extract(val) != 0;
    cleared(field::EN_HIZ) || cleared(field::BATFET_DIS) || set(field::CHG_CONFIG) || set(field::OTG_CONFIG)
}
