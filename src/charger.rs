//! Per-device state, probe, and the detection engine.

use embassy_time::{Duration, Instant};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;

use crate::bus::RegisterBus;
use crate::config::Config;
use crate::detect::{classify, Bc12Policy, ChargerClass, DetectionState, UsbSwitch, UsbType};
use crate::encode::{AcOvp, BoostVoltage, DpdmLevel, TopoffTimer, WatchdogTimeout};
use crate::notify::{Board, Broadcaster, Properties};
use crate::registers::{
    field, Condition, Reg, Status, VbusType, EXT_KEY_ENTER, EXT_KEY_EXIT, INT_MASK_IINDPM, INT_MASK_VINDPM,
    SCAN_CUR_SETTING,
};
use crate::variant::{DeviceVariant, DoneDetection, VariantConfig};
use crate::Error;

/// A recheck of an ambiguous classification.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Recheck {
    /// Plug-in session the recheck belongs to.
    pub generation: u32,
    /// When it is due.
    pub due: Instant,
}

/// Software confirmation of charge termination.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct DoneTracker {
    /// Consecutive done readings.
    pub samples: u8,
    /// Termination confirmed. Held until the battery drops below the recharge threshold or the
    /// input is unplugged.
    pub latched: bool,
}

/// Runtime state of one charger.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct ChargerContext {
    /// Detection state.
    pub state: DetectionState,
    /// Last observed VBUS good.
    pub vbus_good: bool,
    /// Last observed power good.
    pub power_good: bool,
    /// Charging enabled, as last read back.
    pub charge_enabled: bool,
    /// OTG boost enabled.
    pub otg_enabled: bool,
    /// HIZ enabled.
    pub hiz_enabled: bool,
    /// Ship mode entered. Nothing re-enables charging afterwards.
    pub shipped: bool,
    /// Classified source type.
    pub usb_type: UsbType,
    /// Coarse charger class.
    pub charger_class: ChargerClass,
    /// Detection policy for this session.
    pub policy: Bc12Policy,
    /// Classification passes in this session.
    pub classifications: u8,
    /// Plug-in session counter.
    pub generation: u32,
    /// Charge done confirmation.
    pub done: DoneTracker,
    /// Requested fast charge current.
    pub charge_current_ma: u32,
    /// Programmed charge voltage.
    pub charge_voltage_mv: u32,
    /// Programmed recharge threshold.
    pub recharge_threshold_mv: u32,
    /// Last requested VINDPM threshold.
    pub input_voltage_limit_mv: u32,
    /// Watchdog timeout.
    pub watchdog: WatchdogTimeout,
    pub(crate) recheck: Option<Recheck>,
    pub(crate) probe_due: Option<Instant>,
    pub(crate) broadcast_due: Option<Instant>,
    pub(crate) watchdog_due: Option<Instant>,
}

impl ChargerContext {
    fn new(config: &Config) -> Self {
        ChargerContext {
            state: DetectionState::Idle,
            vbus_good: false,
            power_good: false,
            charge_enabled: false,
            otg_enabled: false,
            hiz_enabled: false,
            shipped: false,
            usb_type: UsbType::Unknown,
            charger_class: ChargerClass::Unknown,
            policy: Bc12Policy::Required,
            classifications: 0,
            generation: 0,
            done: DoneTracker::default(),
            charge_current_ma: config.profile.charge_current_ma,
            charge_voltage_mv: config.profile.charge_voltage_mv,
            recharge_threshold_mv: config.profile.recharge_threshold_mv,
            input_voltage_limit_mv: config.profile.input_voltage_limit_mv,
            watchdog: config.watchdog,
            recheck: None,
            probe_due: None,
            broadcast_due: None,
            watchdog_due: None,
        }
    }

    /// The recheck waiting to run, if any.
    pub fn pending_recheck(&self) -> Option<Recheck> {
        self.recheck
    }

    /// When the next status broadcast is due.
    pub fn broadcast_due(&self) -> Option<Instant> {
        self.broadcast_due
    }

    /// Earliest deferred work.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.probe_due,
            self.recheck.map(|r| r.due),
            self.broadcast_due,
            self.watchdog_due,
        ]
        .into_iter()
        .flatten()
        .min()
    }
}

/// A UPM6910D family charger.
///
/// All register access goes through `&mut self`; share a charger between tasks through a
/// [`SharedCharger`](crate::SharedCharger), which [`run`](crate::run) drives.
pub struct Charger<D, B, T> {
    pub(crate) bus: RegisterBus<D>,
    pub(crate) board: B,
    pub(crate) delay: T,
    pub(crate) variant: &'static VariantConfig,
    pub(crate) config: Config,
    pub(crate) ctx: ChargerContext,
    pub(crate) broadcaster: Broadcaster,
}

impl<D: I2c, B: Board, T: DelayNs> Charger<D, B, T> {
    /// Identify and configure the charger.
    ///
    /// The configured address is probed first and the alternate address when nothing answers
    /// there. Identification only reads, so a part rejected by `config.compatible` is left
    /// untouched. The first detection pass runs from [`poll`](Self::poll) once the variant's
    /// probe delay has elapsed after `now`.
    pub async fn probe(i2c_dev: D, board: B, delay: T, config: Config, now: Instant) -> Result<Self, Error<D::Error>> {
        let mut bus = RegisterBus::new(i2c_dev, config.address, config.timing.i2c_attempts);
        let variant = match DeviceVariant::identify(&mut bus).await {
            Ok(v) => v,
            Err(Error::Unavailable(e)) => match config.alt_address {
                Some(alt) => {
                    warn!("no charger at {=u8:#x}, trying {=u8:#x}", config.address, alt);
                    bus.set_address(alt);
                    DeviceVariant::identify(&mut bus).await?
                }
                None => return Err(Error::Unavailable(e)),
            },
            Err(e) => return Err(e),
        };
        if !config.accepts(variant) {
            error!("{} is not compatible with {}", variant, config.name);
            return Err(Error::PartMismatch(variant));
        }

        let mut charger = Charger {
            bus,
            board,
            delay,
            variant: variant.config(),
            ctx: ChargerContext::new(&config),
            config,
            broadcaster: Broadcaster::default(),
        };
        charger.init_device(now).await?;
        charger.ctx.probe_due = Some(now + charger.variant.probe_delay);
        info!("{} ready at {=u8:#x}", variant, charger.bus.address());
        Ok(charger)
    }

    /// Program the configuration into a freshly identified or reset part.
    pub(crate) async fn init_device(&mut self, now: Instant) -> Result<(), Error<D::Error>> {
        let profile = self.config.profile.clamped(self.variant);

        self.set_watchdog(self.config.watchdog, now).await?;

        if self.variant.extended_setup {
            self.bus.set_flag(field::EN_BC12, true).await?;
            self.recover_dp().await?;
            self.bus.write(Reg::EXT_KEY, EXT_KEY_ENTER).await?;
            let scan = self.bus.write_field(field::SCAN_CUR, SCAN_CUR_SETTING).await;
            self.bus.write(Reg::EXT_KEY, EXT_KEY_EXIT).await?;
            scan?;
            self.set_topoff_timer(TopoffTimer::Disabled).await?;
        } else if self.variant.variant == DeviceVariant::Sgm41513d {
            self.recover_dp().await?;
        }
        let voltage = self
            .variant
            .forced_charge_voltage_mv
            .unwrap_or(profile.charge_voltage_mv);
        self.set_charge_voltage(voltage).await?;
        self.set_recharge_threshold(profile.recharge_threshold_mv).await?;

        self.set_stat_pin(self.config.stat_pin).await?;
        self.set_precharge_current(profile.precharge_current_ma).await?;
        self.set_termination_current(profile.termination_current_ma).await?;
        self.set_boost_voltage(BoostVoltage::from_mv(profile.boost_voltage_mv)).await?;
        self.set_boost_current(profile.boost_current_ma).await?;
        self.set_ac_ovp(AcOvp::from_mv(self.config.ac_ovp_mv)).await?;
        self.bus.set_flag(field::BATFET_RST_EN, false).await?;
        self.bus
            .write_field(field::INT_MASK, INT_MASK_IINDPM | INT_MASK_VINDPM)
            .await?;
        self.set_safety_timer(self.config.safety_timer).await?;
        self.set_input_voltage_limit(profile.input_voltage_limit_mv).await?;

        let provisional = self.config.timing.provisional_current_ma;
        self.ctx.charge_current_ma = profile.charge_current_ma;
        self.set_input_current_limit(provisional).await?;
        self.write_charge_current(provisional).await?;

        self.ctx.charge_enabled = self.bus.read_field(field::CHG_CONFIG).await? != 0;
        self.ctx.otg_enabled = self.bus.read_field(field::OTG_CONFIG).await? != 0;
        self.ctx.hiz_enabled = self.bus.read_field(field::EN_HIZ).await? != 0;
        Ok(())
    }

    /// The detected part.
    pub fn variant(&self) -> DeviceVariant {
        self.variant.variant
    }

    /// Capabilities of the detected part.
    pub fn variant_config(&self) -> &'static VariantConfig {
        self.variant
    }

    /// The configuration in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runtime state.
    pub fn context(&self) -> &ChargerContext {
        &self.ctx
    }

    /// Detection state.
    pub fn state(&self) -> DetectionState {
        self.ctx.state
    }

    /// Earliest deferred work, see [`poll`](Self::poll).
    pub fn next_deadline(&self) -> Option<Instant> {
        self.ctx.next_deadline()
    }

    /// The board collaborators.
    pub fn board(&self) -> &B {
        &self.board
    }

    /// The board collaborators.
    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    /// Tear down, giving back the I2C device, the board and the delay.
    pub fn release(self) -> (D, B, T) {
        (self.bus.release(), self.board, self.delay)
    }

    /// Set the detection policy requested by the USB stack.
    ///
    /// The policy holds until unplug, which restores [`Bc12Policy::Required`].
    pub fn set_bc12_policy(&mut self, policy: Bc12Policy) {
        debug!("bc1.2 policy {}", policy);
        self.ctx.policy = policy;
        if !policy.allows_retry() && self.ctx.recheck.take().is_some() {
            debug!("pending recheck dropped by policy");
        }
    }

    /// Handle the charger's interrupt line.
    pub async fn handle_irq(&mut self, now: Instant) -> Result<(), Error<D::Error>> {
        let condition = Condition::from_bytes([self.bus.read(Reg::CONDITION).await?]);
        let status = Status::from_bytes([self.bus.read(Reg::STATUS).await?]);
        let vbus_good = condition.vbus_good();
        let power_good = status.power_good();
        let prev_vbus_good = core::mem::replace(&mut self.ctx.vbus_good, vbus_good);
        let prev_power_good = core::mem::replace(&mut self.ctx.power_good, power_good);
        trace!("irq: vbus_good={} power_good={}", vbus_good, power_good);

        if !prev_vbus_good && vbus_good {
            info!("vbus inserted");
            if self.ctx.policy.takes_mux() {
                self.board.set_usb_switch(UsbSwitch::Charger);
            }
            self.ctx.classifications = 0;
            self.enter(DetectionState::VbusPresent);
        } else if prev_vbus_good && !vbus_good {
            info!("vbus removed");
            return self.end_session(now).await;
        }

        if !prev_power_good && power_good && self.ctx.state == DetectionState::VbusPresent {
            let (classifications, broadcast_due) = (self.ctx.classifications, self.ctx.broadcast_due);
            if let Err(e) = self.begin_classification(status, now).await {
                // The next power-good edge starts over.
                self.ctx.power_good = false;
                self.roll_back(DetectionState::VbusPresent, classifications, broadcast_due);
                return Err(e);
            }
        } else if prev_power_good != power_good && self.ctx.state.is_classified() {
            self.schedule_broadcast(now);
        }
        Ok(())
    }

    async fn begin_classification(&mut self, status: Status, now: Instant) -> Result<(), Error<D::Error>> {
        self.enter(DetectionState::Classifying);
        let vbus_type = status.vbus_type();
        if vbus_type != VbusType::None {
            let provisional = self.config.timing.provisional_current_ma;
            self.set_input_current_limit(provisional).await?;
            self.write_charge_current(provisional).await?;
            if !self.ctx.shipped {
                self.bus.set_flag(field::CHG_CONFIG, true).await?;
                self.ctx.charge_enabled = true;
            }
        }
        self.classify(vbus_type, now).await
    }

    async fn classify(&mut self, vbus_type: VbusType, now: Instant) -> Result<(), Error<D::Error>> {
        let (usb_type, class) = classify(vbus_type);
        self.ctx.usb_type = usb_type;
        self.ctx.charger_class = class;
        self.ctx.classifications = self.ctx.classifications.saturating_add(1);
        debug!("vbus type {} -> {} ({})", vbus_type, usb_type, class);

        if matches!(usb_type, UsbType::Dcp | UsbType::NonStandard) {
            self.set_dp_for_afc().await?;
        }
        if self.ctx.policy.takes_mux() && class.has_data() {
            self.board.set_usb_switch(UsbSwitch::Usb);
        }

        let ambiguous = match usb_type {
            UsbType::Unknown => true,
            UsbType::Sdp => !self.config.power_off_charging && !self.board.usb_enumerating(),
            _ => false,
        };
        if ambiguous
            && self.ctx.policy.allows_retry()
            && self.ctx.classifications < self.config.timing.classification_attempts
        {
            let due = now + self.config.timing.recheck_delay;
            self.ctx.recheck = Some(Recheck {
                generation: self.ctx.generation,
                due,
            });
            info!("ambiguous {}, recheck in {=u64} ms", usb_type, self.config.timing.recheck_delay.as_millis());
            self.enter(DetectionState::RetryScheduled);
            Ok(())
        } else {
            self.settle(usb_type, now).await
        }
    }

    async fn settle(&mut self, usb_type: UsbType, now: Instant) -> Result<(), Error<D::Error>> {
        self.enter(DetectionState::Classified(usb_type));
        self.schedule_broadcast(now);
        info!("classified as {}", usb_type);
        self.set_input_current_limit(self.config.input_limit_for(usb_type)).await?;
        self.ctx.charge_current_ma = self.config.charge_current_for(usb_type);
        self.write_charge_current(self.ctx.charge_current_ma).await
    }

    /// Reset everything tied to the plug-in session. Takes effect before any register I/O.
    async fn end_session(&mut self, now: Instant) -> Result<(), Error<D::Error>> {
        self.board.set_usb_switch(UsbSwitch::Usb);
        self.ctx.usb_type = UsbType::Unknown;
        self.ctx.charger_class = ChargerClass::Unknown;
        if self.ctx.recheck.take().is_some() {
            debug!("pending recheck cancelled");
        }
        self.ctx.generation = self.ctx.generation.wrapping_add(1);
        self.ctx.classifications = 0;
        self.ctx.done = Default::default();
        self.ctx.policy = Bc12Policy::Required;
        self.enter(DetectionState::Idle);
        self.schedule_broadcast(now);

        let provisional = self.config.timing.provisional_current_ma;
        self.set_input_current_limit(provisional).await?;
        self.write_charge_current(provisional).await
    }

    /// Run the recheck scheduled for session `generation`.
    ///
    /// A recheck from an earlier session, or one that is no longer pending, does nothing. If the
    /// recheck fails part way, it is scheduled again one recheck delay after `now`.
    pub async fn recheck(&mut self, generation: u32, now: Instant) -> Result<(), Error<D::Error>> {
        match self.ctx.recheck {
            Some(r) if r.generation == generation && self.ctx.state == DetectionState::RetryScheduled => {}
            _ => {
                debug!("stale recheck {=u32} ignored", generation);
                return Ok(());
            }
        }
        self.ctx.recheck = None;

        let (classifications, broadcast_due) = (self.ctx.classifications, self.ctx.broadcast_due);
        let res = self.run_recheck(now).await;
        if res.is_err() && self.ctx.generation == generation && self.ctx.state != DetectionState::Idle {
            self.roll_back(DetectionState::RetryScheduled, classifications, broadcast_due);
            self.ctx.recheck = Some(Recheck {
                generation,
                due: now + self.config.timing.recheck_delay,
            });
        }
        res
    }

    async fn run_recheck(&mut self, now: Instant) -> Result<(), Error<D::Error>> {
        if !self.power_good_now().await? {
            info!("power lost before recheck");
            return self.abort_session(now).await;
        }

        if self.ctx.usb_type == UsbType::Sdp && self.board.usb_enumerating() {
            self.enter(DetectionState::Classifying);
            self.ctx.classifications = self.ctx.classifications.saturating_add(1);
            return self.settle(UsbType::Sdp, now).await;
        }

        if self.ctx.policy.takes_mux() {
            self.board.set_usb_switch(UsbSwitch::Charger);
        }
        let timing = self.config.timing;
        self.sleep(timing.mux_settle).await;
        self.bus.set_flag(field::FORCE_DPDM, true).await?;
        self.sleep(timing.recheck_dpdm_settle).await;
        let now = now + timing.mux_settle + timing.recheck_dpdm_settle;

        let status = Status::from_bytes([self.bus.read(Reg::STATUS).await?]);
        if !status.power_good() {
            info!("power lost during recheck");
            return self.abort_session(now).await;
        }
        self.enter(DetectionState::Classifying);
        self.classify(status.vbus_type(), now).await
    }

    async fn abort_session(&mut self, now: Instant) -> Result<(), Error<D::Error>> {
        self.ctx.vbus_good = false;
        self.ctx.power_good = false;
        self.end_session(now).await
    }

    async fn power_good_now(&mut self) -> Result<bool, Error<D::Error>> {
        Ok(Status::from_bytes([self.bus.read(Reg::STATUS).await?]).power_good())
    }

    /// Run whatever deferred work is due at `now`.
    pub async fn poll(&mut self, now: Instant) -> Result<(), Error<D::Error>> {
        if self.ctx.probe_due.is_some_and(|t| t <= now) {
            self.ctx.probe_due = None;
            self.probe_negotiation(now).await?;
        }
        if let Some(r) = self.ctx.recheck.filter(|r| r.due <= now) {
            self.recheck(r.generation, now).await?;
        }
        if self.ctx.broadcast_due.is_some_and(|t| t <= now) {
            self.ctx.broadcast_due = None;
            self.publish().await?;
        }
        if self.ctx.watchdog_due.is_some_and(|t| t <= now) {
            self.kick_watchdog(now).await?;
        }
        Ok(())
    }

    async fn probe_negotiation(&mut self, now: Instant) -> Result<(), Error<D::Error>> {
        let sgm = self.variant.variant == DeviceVariant::Sgm41513d;
        if sgm && self.ctx.policy.takes_mux() {
            self.board.set_usb_switch(UsbSwitch::Charger);
        }
        let timing = self.config.timing;
        self.sleep(timing.mux_settle).await;
        self.bus.set_flag(field::FORCE_DPDM, true).await?;
        self.sleep(timing.probe_dpdm_settle).await;
        self.handle_irq(now + timing.mux_settle + timing.probe_dpdm_settle).await?;
        if sgm && self.ctx.state == DetectionState::Idle {
            self.board.set_usb_switch(UsbSwitch::Usb);
        }
        Ok(())
    }

    /// Read the current properties.
    pub async fn properties(&mut self) -> Result<Properties, Error<D::Error>> {
        use crate::notify::ChargeStatus;

        let status = Status::from_bytes([self.bus.read(Reg::STATUS).await?]);
        let done = if self.ctx.done.latched {
            Some(true)
        } else if matches!(self.variant.done_detection, DoneDetection::Gauge { .. }) {
            Some(false)
        } else {
            None
        };
        Ok(Properties {
            online: status.power_good(),
            present: status.power_good(),
            status: ChargeStatus::derive(status.power_good(), status.charge_state(), done),
            usb_type: self.ctx.usb_type,
            charger_class: self.ctx.charger_class,
            input_current_limit_ma: self.input_current_limit().await?,
            constant_charge_voltage_mv: self.charge_voltage().await?,
            constant_charge_current_ma: self.charge_current().await?,
            voltage_now_mv: self.board.vbus_mv(),
        })
    }

    /// Publish the current properties if they changed since the last publication.
    pub async fn refresh(&mut self) -> Result<Properties, Error<D::Error>> {
        let props = self.properties().await?;
        if self.broadcaster.update(&props) {
            self.board.power_supply_changed(self.config.name, &props);
        }
        Ok(props)
    }

    async fn publish(&mut self) -> Result<(), Error<D::Error>> {
        if let DetectionState::Classified(t) = self.ctx.state {
            self.enter(DetectionState::Settled(t));
        }
        self.refresh().await.map(|_| ())
    }

    pub(crate) fn schedule_broadcast(&mut self, now: Instant) {
        let due = now + self.config.broadcast_delay();
        self.ctx.broadcast_due = Some(self.ctx.broadcast_due.map_or(due, |t| t.min(due)));
    }

    /// Undo a classification that failed on the bus, back to `state`.
    fn roll_back(&mut self, state: DetectionState, classifications: u8, broadcast_due: Option<Instant>) {
        warn!("classification failed in {}, back to {}", self.ctx.state, state);
        self.ctx.state = state;
        self.ctx.classifications = classifications;
        self.ctx.broadcast_due = broadcast_due;
        self.ctx.usb_type = UsbType::Unknown;
        self.ctx.charger_class = ChargerClass::Unknown;
    }

    fn enter(&mut self, next: DetectionState) {
        debug_assert!(
            self.ctx.state.allows(next),
            "illegal transition {:?} -> {:?}",
            self.ctx.state,
            next
        );
        trace!("{} -> {}", self.ctx.state, next);
        self.ctx.state = next;
    }

    pub(crate) async fn sleep(&mut self, duration: Duration) {
        let ms = u32::try_from(duration.as_millis()).unwrap_or(u32::MAX);
        if ms > 0 {
            self.delay.delay_ms(ms).await;
        }
    }

    pub(crate) async fn set_dp(&mut self, level: DpdmLevel) -> Result<(), Error<D::Error>> {
        self.bus.write_field(self.variant.dp_mux, level as u8).await
    }

    async fn set_dp_for_afc(&mut self) -> Result<(), Error<D::Error>> {
        if self.variant.hvdcp {
            self.bus.set_flag(field::EN_HVDCP, true).await?;
        }
        self.set_dp(DpdmLevel::V0p6).await
    }

    async fn recover_dp(&mut self) -> Result<(), Error<D::Error>> {
        self.set_dp(DpdmLevel::Hiz).await?;
        if self.variant.hvdcp {
            self.bus.set_flag(field::EN_HVDCP, false).await?;
        }
        Ok(())
    }

    /// Write the charge current, holding it at zero while a latched done requires it.
    pub(crate) async fn write_charge_current(&mut self, ma: u32) -> Result<(), Error<D::Error>> {
        let code = if self.ctx.done.latched && self.variant.zero_current_when_done {
            0
        } else {
            self.variant.charge_current.encode(ma)
        };
        self.bus.write_field(field::ICHG, code).await
    }
}
