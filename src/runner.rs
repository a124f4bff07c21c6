//! Task glue: the interrupt line is a wakeup signal and one task owns the charger.

use core::convert::Infallible;
use core::ops::{Deref, DerefMut};

use embassy_futures::select::{select3, Either3};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_sync::signal::Signal;
use embassy_time::{Instant, Timer};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;
use embedded_hal_async::i2c::I2c;

use crate::notify::Board;
use crate::Charger;

/// A charger shared between [`run`] and the tasks calling control operations.
pub struct SharedCharger<M: RawMutex, D, B, T> {
    charger: Mutex<M, Charger<D, B, T>>,
    irq: Signal<M, ()>,
    rescheduled: Signal<M, ()>,
}

impl<M: RawMutex, D, B, T> SharedCharger<M, D, B, T> {
    /// Wrap a probed charger.
    pub const fn new(charger: Charger<D, B, T>) -> Self {
        SharedCharger {
            charger: Mutex::new(charger),
            irq: Signal::new(),
            rescheduled: Signal::new(),
        }
    }

    /// The interrupt signal, for [`forward_irq`].
    pub fn irq(&self) -> &Signal<M, ()> {
        &self.irq
    }

    /// Lock the charger.
    ///
    /// If the guard is dropped with the next deadline moved, [`run`] is woken to re-arm its
    /// timer.
    pub async fn lock(&self) -> ChargerGuard<'_, M, D, B, T> {
        let guard = self.charger.lock().await;
        let deadline = guard.ctx.next_deadline();
        ChargerGuard {
            guard,
            deadline,
            rescheduled: &self.rescheduled,
        }
    }

    /// Give back the charger.
    pub fn into_inner(self) -> Charger<D, B, T> {
        self.charger.into_inner()
    }
}

/// Exclusive access to a [`SharedCharger`].
pub struct ChargerGuard<'a, M: RawMutex, D, B, T> {
    guard: MutexGuard<'a, M, Charger<D, B, T>>,
    deadline: Option<Instant>,
    rescheduled: &'a Signal<M, ()>,
}

impl<M: RawMutex, D, B, T> Deref for ChargerGuard<'_, M, D, B, T> {
    type Target = Charger<D, B, T>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<M: RawMutex, D, B, T> DerefMut for ChargerGuard<'_, M, D, B, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<M: RawMutex, D, B, T> Drop for ChargerGuard<'_, M, D, B, T> {
    fn drop(&mut self) {
        if self.guard.ctx.next_deadline() != self.deadline {
            trace!("deadline moved");
            self.rescheduled.signal(());
        }
    }
}

/// Drive the charger forever.
///
/// Waits for the interrupt, the charger's next deadline or a deadline moved through
/// [`SharedCharger::lock`], then handles it with the mutex held. Errors are logged and the loop
/// carries on.
pub async fn run<M, D, B, T>(shared: &SharedCharger<M, D, B, T>) -> !
where
    M: RawMutex,
    D: I2c,
    B: Board,
    T: DelayNs,
{
    loop {
        let deadline = shared.charger.lock().await.next_deadline();
        let timer = async {
            match deadline {
                Some(at) => Timer::at(at).await,
                None => core::future::pending().await,
            }
        };
        let wake = select3(shared.irq.wait(), timer, shared.rescheduled.wait()).await;

        let mut charger = shared.charger.lock().await;
        let now = Instant::now();
        let res = match wake {
            Either3::First(()) => charger.handle_irq(now).await,
            Either3::Second(()) => charger.poll(now).await,
            Either3::Third(()) => continue,
        };
        if let Err(e) = res {
            error!("charger: {}", e.describe());
        }
    }
}

/// Signal `irq` on every falling edge of the charger's INT pin.
pub async fn forward_irq<P, M>(mut pin: P, irq: &Signal<M, ()>) -> Result<Infallible, P::Error>
where
    P: Wait,
    M: RawMutex,
{
    loop {
        pin.wait_for_falling_edge().await?;
        irq.signal(());
    }
}
