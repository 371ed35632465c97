//! Observability sinks: status text lines and two virtual indicators.
//!
//! Both are infallible by signature. Whatever happens behind them can never change what the
//! protocol does.
use log::info;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// One of the two indicators every board exposes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Indicator {
    Led1,
    Led2,
}

impl Indicator {
    /// Maps the 1-based indicator number used in application payloads.
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Indicator::Led1),
            2 => Some(Indicator::Led2),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            Indicator::Led1 => 0,
            Indicator::Led2 => 1,
        }
    }
}

pub trait StatusSink {
    fn set_status(&self, line: u8, text: &str);
}

pub trait IndicatorSink {
    fn set(&self, indicator: Indicator, on: bool);
    fn toggle(&self, indicator: Indicator);

    fn toggle_both(&self) {
        self.toggle(Indicator::Led1);
        self.toggle(Indicator::Led2);
    }
}

/// Discards everything.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullSink;

impl StatusSink for NullSink {
    fn set_status(&self, _line: u8, _text: &str) {}
}

impl IndicatorSink for NullSink {
    fn set(&self, _indicator: Indicator, _on: bool) {}
    fn toggle(&self, _indicator: Indicator) {}
}

/// Forwards status lines to the log.
#[derive(Clone, Debug, Default)]
pub struct LogStatus {
    pub name: &'static str,
}

impl StatusSink for LogStatus {
    fn set_status(&self, line: u8, text: &str) {
        info!("[{}:{}] {}", self.name, line, text);
    }
}

/// In-memory indicators, keeping the current state and a toggle count per indicator.
#[derive(Debug, Default)]
pub struct VirtualLeds {
    state: [AtomicBool; 2],
    toggles: [AtomicU32; 2],
}

impl VirtualLeds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_on(&self, indicator: Indicator) -> bool {
        self.state[indicator.index()].load(Ordering::SeqCst)
    }

    pub fn toggles(&self, indicator: Indicator) -> u32 {
        self.toggles[indicator.index()].load(Ordering::SeqCst)
    }
}

impl IndicatorSink for VirtualLeds {
    fn set(&self, indicator: Indicator, on: bool) {
        self.state[indicator.index()].store(on, Ordering::SeqCst);
    }

    fn toggle(&self, indicator: Indicator) {
        self.state[indicator.index()].fetch_xor(true, Ordering::SeqCst);
        self.toggles[indicator.index()].fetch_add(1, Ordering::SeqCst);
    }
}
