//! Work semaphores shared between the receive callback and the main loop.
//!
//! The callback only counts pending work, the main loop takes the counts back once the work
//! is done. Every access goes through a short `critical_section`, which masks interrupts on
//! a target and takes a global lock on a host.
use crate::device::RxClient;
use crate::LinkId;

use core::cell::Cell;
use critical_section::Mutex;
use log::trace;

/// Join, frame and blink counters.
pub struct WorkSemaphores {
    join: Mutex<Cell<u8>>,
    frame: Mutex<Cell<u8>>,
    blink: Mutex<Cell<u8>>,
}

impl core::fmt::Debug for WorkSemaphores {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkSemaphores")
            .field("join", &self.pending_joins())
            .field("frame", &self.pending_frames())
            .field("blinking", &self.is_blinking())
            .finish()
    }
}

impl Default for WorkSemaphores {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkSemaphores {
    pub const fn new() -> Self {
        Self {
            join: Mutex::new(Cell::new(0)),
            frame: Mutex::new(Cell::new(0)),
            blink: Mutex::new(Cell::new(0)),
        }
    }

    /// Counts a new joiner. Saturates instead of wrapping.
    pub fn signal_join(&self) {
        critical_section::with(|cs| {
            let join = self.join.borrow(cs);
            join.set(join.get().saturating_add(1));
        });
    }

    /// Counts a frame waiting on a connected link.
    pub fn signal_frame(&self) {
        critical_section::with(|cs| {
            let frame = self.frame.borrow(cs);
            frame.set(frame.get().saturating_add(1));
        });
    }

    /// Takes one pending join back, if any.
    pub fn take_join(&self) -> bool {
        critical_section::with(|cs| take(self.join.borrow(cs)))
    }

    /// Takes one pending frame back, if any.
    pub fn take_frame(&self) -> bool {
        critical_section::with(|cs| take(self.frame.borrow(cs)))
    }

    pub fn pending_joins(&self) -> u8 {
        critical_section::with(|cs| self.join.borrow(cs).get())
    }

    pub fn pending_frames(&self) -> u8 {
        critical_section::with(|cs| self.frame.borrow(cs).get())
    }

    /// True when either a join or a frame waits for the main loop.
    pub fn any_pending(&self) -> bool {
        critical_section::with(|cs| self.join.borrow(cs).get() != 0 || self.frame.borrow(cs).get() != 0)
    }

    /// Enters the "blink until reconnect" state.
    pub fn start_blink(&self) {
        critical_section::with(|cs| self.blink.borrow(cs).set(1));
    }

    pub fn stop_blink(&self) {
        critical_section::with(|cs| self.blink.borrow(cs).set(0));
    }

    pub fn is_blinking(&self) -> bool {
        critical_section::with(|cs| self.blink.borrow(cs).get() != 0)
    }

    /// Advances the blink counter. Returns `true` every `period` calls while blinking,
    /// telling the caller to toggle both indicators.
    pub fn blink_tick(&self, period: u8) -> bool {
        critical_section::with(|cs| {
            let blink = self.blink.borrow(cs);
            let value = blink.get();
            if value == 0 {
                return false;
            }
            let value = value.saturating_add(1);
            if value >= period.max(2) {
                blink.set(1);
                true
            } else {
                blink.set(value);
                false
            }
        })
    }
}

fn take(counter: &Cell<u8>) -> bool {
    match counter.get() {
        0 => false,
        n => {
            counter.set(n - 1);
            true
        }
    }
}

impl RxClient for WorkSemaphores {
    fn frame_received(&self, link: LinkId) -> bool {
        if link == LinkId::UNCONNECTED {
            trace!("Join signaled");
            self.signal_join();
        } else {
            trace!("Frame signaled on {}", link);
            // A frame after a channel change means the peers found us again.
            critical_section::with(|cs| {
                let frame = self.frame.borrow(cs);
                frame.set(frame.get().saturating_add(1));
                self.blink.borrow(cs).set(0);
            });
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_never_goes_below_zero() {
        let sems = WorkSemaphores::new();
        assert!(!sems.take_frame());
        sems.signal_frame();
        assert!(sems.take_frame());
        assert!(!sems.take_frame());
        assert_eq!(sems.pending_frames(), 0);
    }

    #[test]
    fn callback_routes_by_link() {
        let sems = WorkSemaphores::new();
        assert!(!sems.frame_received(LinkId::UNCONNECTED));
        assert!(!sems.frame_received(LinkId::new(3)));
        assert_eq!(sems.pending_joins(), 1);
        assert_eq!(sems.pending_frames(), 1);
    }

    #[test]
    fn frame_clears_blink_state() {
        let sems = WorkSemaphores::new();
        sems.start_blink();
        sems.frame_received(LinkId::new(1));
        assert!(!sems.is_blinking());
        assert!(!sems.blink_tick(0xF));
    }

    #[test]
    fn blink_toggles_every_period() {
        let sems = WorkSemaphores::new();
        sems.start_blink();
        let toggles = (0..42).filter(|_| sems.blink_tick(0xF)).count();
        // Counter runs 1 -> 15 then back to 1: a toggle every 14 ticks.
        assert_eq!(toggles, 3);
    }
}
