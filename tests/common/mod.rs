//! Register-file I2C mock, board mock and helpers shared by the integration tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use embassy_time::{Duration, Instant};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{self, ErrorKind, ErrorType, I2c, Operation};
use upm6910_driver::registers::{ChargeState, Condition, Status, VbusType, ADDR};
use upm6910_driver::{BatterySample, Board, Charger, Config, Properties, UsbSwitch};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MockError;

impl i2c::Error for MockError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

pub struct I2cState {
    pub regs: [u8; 256],
    /// Every register write, in order.
    pub writes: Vec<(u8, u8)>,
    /// Transactions left to fail before the bus recovers.
    pub fail_next: u32,
    /// Transactions that still succeed before `fail_next` applies.
    pub fail_skip: u32,
    /// Transactions attempted, failed ones included.
    pub transactions: u32,
    /// Address the device answers at.
    pub addr: u8,
}

/// A byte-addressed register file behind an I2C interface.
#[derive(Clone)]
pub struct MockI2c(pub Rc<RefCell<I2cState>>);

impl MockI2c {
    pub fn new(addr: u8) -> Self {
        MockI2c(Rc::new(RefCell::new(I2cState {
            regs: [0; 256],
            writes: Vec::new(),
            fail_next: 0,
            fail_skip: 0,
            transactions: 0,
            addr,
        })))
    }

    pub fn reg(&self, reg: u8) -> u8 {
        self.0.borrow().regs[usize::from(reg)]
    }

    pub fn set_reg(&self, reg: u8, val: u8) {
        self.0.borrow_mut().regs[usize::from(reg)] = val;
    }

    pub fn writes(&self) -> Vec<(u8, u8)> {
        self.0.borrow().writes.clone()
    }

    /// Writes to `reg`, in order.
    pub fn writes_to(&self, reg: u8) -> Vec<u8> {
        self.0
            .borrow()
            .writes
            .iter()
            .filter(|(r, _)| *r == reg)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn clear_writes(&self) {
        self.0.borrow_mut().writes.clear();
    }

    pub fn fail_next(&self, n: u32) {
        self.fail_after(0, n);
    }

    /// Let `ok` transactions through, then fail the next `n`.
    pub fn fail_after(&self, ok: u32, n: u32) {
        let mut state = self.0.borrow_mut();
        state.fail_skip = ok;
        state.fail_next = n;
    }

    pub fn transactions(&self) -> u32 {
        self.0.borrow().transactions
    }

    /// Present VBUS and the given REG08 status.
    pub fn plug(&self, vbus_type: VbusType, charge_state: ChargeState) {
        self.set_reg(0x0a, Condition::new().with_vbus_good(true).into_bytes()[0]);
        self.set_reg(0x08, status(vbus_type, charge_state, true));
    }

    pub fn unplug(&self) {
        self.set_reg(0x0a, 0);
        self.set_reg(0x08, 0);
    }
}

pub fn status(vbus_type: VbusType, charge_state: ChargeState, power_good: bool) -> u8 {
    Status::new()
        .with_vbus_type(vbus_type)
        .with_charge_state(charge_state)
        .with_power_good(power_good)
        .into_bytes()[0]
}

impl ErrorType for MockI2c {
    type Error = MockError;
}

impl I2c for MockI2c {
    async fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
        let mut state = self.0.borrow_mut();
        state.transactions += 1;
        if state.fail_skip > 0 {
            state.fail_skip -= 1;
        } else if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(MockError);
        }
        if address != state.addr {
            return Err(MockError);
        }
        let mut pointer = 0u8;
        for op in operations {
            match op {
                Operation::Write(buf) => {
                    if let Some((reg, data)) = buf.split_first() {
                        pointer = *reg;
                        for val in data {
                            state.regs[usize::from(pointer)] = *val;
                            state.writes.push((pointer, *val));
                            pointer = pointer.wrapping_add(1);
                        }
                    }
                }
                Operation::Read(buf) => {
                    for val in buf.iter_mut() {
                        *val = state.regs[usize::from(pointer)];
                        pointer = pointer.wrapping_add(1);
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    Switch(UsbSwitch),
    OtgPath(bool),
    Changed(Properties),
}

pub struct BoardState {
    pub events: Vec<BoardEvent>,
    pub enumerating: bool,
    pub battery: Option<BatterySample>,
    pub vbus_mv: Option<u32>,
}

#[derive(Clone)]
pub struct MockBoard(pub Rc<RefCell<BoardState>>);

impl MockBoard {
    pub fn new() -> Self {
        MockBoard(Rc::new(RefCell::new(BoardState {
            events: Vec::new(),
            enumerating: false,
            battery: None,
            vbus_mv: Some(5000),
        })))
    }

    pub fn events(&self) -> Vec<BoardEvent> {
        self.0.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.0.borrow_mut().events.clear();
    }

    pub fn changes(&self) -> Vec<Properties> {
        self.0
            .borrow()
            .events
            .iter()
            .filter_map(|e| match e {
                BoardEvent::Changed(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    pub fn switches(&self) -> Vec<UsbSwitch> {
        self.0
            .borrow()
            .events
            .iter()
            .filter_map(|e| match e {
                BoardEvent::Switch(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    pub fn set_enumerating(&self, on: bool) {
        self.0.borrow_mut().enumerating = on;
    }

    pub fn set_battery(&self, voltage_mv: u32, current_ma: i32) {
        self.0.borrow_mut().battery = Some(BatterySample { voltage_mv, current_ma });
    }
}

impl Board for MockBoard {
    fn set_usb_switch(&mut self, switch: UsbSwitch) {
        self.0.borrow_mut().events.push(BoardEvent::Switch(switch));
    }

    fn set_otg_path(&mut self, on: bool) {
        self.0.borrow_mut().events.push(BoardEvent::OtgPath(on));
    }

    fn usb_enumerating(&mut self) -> bool {
        self.0.borrow().enumerating
    }

    fn battery(&mut self) -> Option<BatterySample> {
        self.0.borrow().battery
    }

    fn vbus_mv(&mut self) -> Option<u32> {
        self.0.borrow().vbus_mv
    }

    fn power_supply_changed(&mut self, _name: &'static str, props: &Properties) {
        self.0.borrow_mut().events.push(BoardEvent::Changed(*props));
    }
}

/// Delay that returns immediately.
pub struct NoopDelay;

impl DelayNs for NoopDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

pub type TestCharger = Charger<MockI2c, MockBoard, NoopDelay>;

/// REG0B contents reporting the UPM6910D part number.
pub const UPM6910D_PART_INFO: u8 = 0x02 << 3;
/// REG0B contents reporting the SGM41513D part number.
pub const SGM41513D_PART_INFO: u8 = 0x01 << 3;

pub fn at(ms: u64) -> Instant {
    Instant::from_millis(ms)
}

/// Time at which the fixtures below hand the charger over, past the probe negotiation.
pub const START: u64 = 10_000;

/// Probe a part with `part_info` in REG0B at `addr`, run the probe negotiation with nothing
/// plugged in, and clear the logs.
pub async fn probe_with(part_info: u8, addr: u8, config: Config) -> (TestCharger, MockI2c, MockBoard) {
    let i2c = MockI2c::new(addr);
    i2c.set_reg(0x0b, part_info);
    probe_on(i2c, config).await
}

/// Like [`probe_with`], on a register file the caller has already populated.
pub async fn probe_on(i2c: MockI2c, config: Config) -> (TestCharger, MockI2c, MockBoard) {
    let board = MockBoard::new();
    let mut charger = Charger::probe(i2c.clone(), board.clone(), NoopDelay, config, at(0))
        .await
        .expect("probe");
    charger.poll(at(START)).await.expect("probe negotiation");
    assert_eq!(charger.context().broadcast_due(), None);
    i2c.clear_writes();
    board.clear_events();
    (charger, i2c, board)
}

pub async fn upm6910d() -> (TestCharger, MockI2c, MockBoard) {
    probe_with(UPM6910D_PART_INFO, ADDR, Config::default()).await
}

pub async fn sgm41513d() -> (TestCharger, MockI2c, MockBoard) {
    probe_with(SGM41513D_PART_INFO, upm6910_driver::registers::ALT_ADDR, Config::default()).await
}

pub fn after(start: Instant, ms: u64) -> Instant {
    start + Duration::from_millis(ms)
}
