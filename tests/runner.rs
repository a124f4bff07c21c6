mod common;

use common::*;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Instant, Timer};
use embedded_hal::digital::{self, ErrorKind, ErrorType};
use embedded_hal_async::digital::Wait;
use upm6910_driver::registers::{ChargeState, VbusType, ADDR};
use upm6910_driver::{
    forward_irq, run, ChargeStatus, Charger, Config, DetectionState, SharedCharger, UsbType,
};

async fn shared() -> (SharedCharger<NoopRawMutex, MockI2c, MockBoard, NoopDelay>, MockI2c, MockBoard) {
    let i2c = MockI2c::new(ADDR);
    i2c.set_reg(0x0b, UPM6910D_PART_INFO);
    let board = MockBoard::new();
    let charger = Charger::probe(i2c.clone(), board.clone(), NoopDelay, Config::default(), Instant::now())
        .await
        .ok()
        .unwrap();
    (SharedCharger::new(charger), i2c, board)
}

#[tokio::test]
async fn run_classifies_on_interrupt_and_publishes_after_the_delay() {
    let (shared, i2c, board) = shared().await;

    let wake = select(run(&shared), async {
        i2c.plug(VbusType::Dcp, ChargeState::FastCharge);
        shared.irq().signal(());
        Timer::after_millis(400).await;
    })
    .await;
    assert!(matches!(wake, Either::Second(())));

    let charger = shared.lock().await;
    assert_eq!(charger.state(), DetectionState::Settled(UsbType::Dcp));
    let changes = board.changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].usb_type, UsbType::Dcp);
}

#[tokio::test]
async fn run_picks_up_a_broadcast_scheduled_by_another_task() {
    let (shared, i2c, board) = shared().await;

    let wake = select(run(&shared), async {
        i2c.plug(VbusType::Dcp, ChargeState::FastCharge);
        shared.irq().signal(());
        Timer::after_millis(400).await;
        assert_eq!(board.changes().len(), 1);

        i2c.set_reg(0x08, status(VbusType::Dcp, ChargeState::Done, true));
        {
            let mut charger = shared.lock().await;
            assert!(charger.check_charge_done(Instant::now()).await.unwrap());
            assert!(charger.context().broadcast_due().is_some());
        }
        Timer::after_millis(400).await;
    })
    .await;
    assert!(matches!(wake, Either::Second(())));

    let changes = board.changes();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[1].status, ChargeStatus::Full);
    assert_eq!(shared.lock().await.context().broadcast_due(), None);
}

#[derive(Debug)]
struct PinError;

impl digital::Error for PinError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Produces `edges` falling edges, then fails.
struct MockPin {
    edges: u32,
}

impl ErrorType for MockPin {
    type Error = PinError;
}

impl MockPin {
    fn next_edge(&mut self) -> Result<(), PinError> {
        match self.edges.checked_sub(1) {
            Some(left) => {
                self.edges = left;
                Ok(())
            }
            None => Err(PinError),
        }
    }
}

impl Wait for MockPin {
    async fn wait_for_high(&mut self) -> Result<(), Self::Error> {
        self.next_edge()
    }

    async fn wait_for_low(&mut self) -> Result<(), Self::Error> {
        self.next_edge()
    }

    async fn wait_for_rising_edge(&mut self) -> Result<(), Self::Error> {
        self.next_edge()
    }

    async fn wait_for_falling_edge(&mut self) -> Result<(), Self::Error> {
        self.next_edge()
    }

    async fn wait_for_any_edge(&mut self) -> Result<(), Self::Error> {
        self.next_edge()
    }
}

#[tokio::test]
async fn falling_edges_are_forwarded() {
    let irq = Signal::<NoopRawMutex, ()>::new();
    assert!(!irq.signaled());

    let res = forward_irq(MockPin { edges: 2 }, &irq).await;

    assert!(res.is_err());
    assert!(irq.signaled());
}

#[tokio::test]
async fn pin_errors_end_forwarding_without_a_signal() {
    let irq = Signal::<NoopRawMutex, ()>::new();
    assert!(forward_irq(MockPin { edges: 0 }, &irq).await.is_err());
    assert!(!irq.signaled());
}
