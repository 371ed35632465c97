//! Application dispatch of received payloads.
//!
//! Payloads carry no type tag: their exact length tells what they are. A [Classify]
//! implementation turns a payload into one of a closed set of messages, a [Handler] updates
//! the peer's shadow state and may answer with a reply. Unknown lengths are dropped
//! silently, as unrelated traffic can share the air.
use crate::clock::Clock;
use crate::config::LinkConfig;
use crate::device::Network;
use crate::error::NetError;
use crate::reliable::{self, TidFilter};
use crate::sink::{Indicator, IndicatorSink};
use crate::{LinkId, MAX_APP_PAYLOAD};

use log::trace;

/// Reply payload built by a handler.
pub type Reply = heapless::Vec<u8, MAX_APP_PAYLOAD>;

pub trait Classify: Sized {
    fn classify(payload: &[u8]) -> Option<Self>;
}

pub trait Handler {
    type Message: Classify;
    /// Per-peer shadow state.
    type State;

    /// Acts on `message`, optionally returning a payload to send back to the peer.
    fn handle(&mut self, message: Self::Message, state: &mut Self::State, now: u32) -> Option<Reply>;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Dispatched {
    Discarded,
    Handled,
    Replied,
}

/// Tracks the last classified frame.
#[derive(Copy, Clone, Debug)]
pub struct LivenessTimer {
    timeout: u32,
    last: Option<u32>,
}

impl LivenessTimer {
    pub fn new(timeout_ticks: u32) -> Self {
        Self {
            timeout: timeout_ticks,
            last: None,
        }
    }

    pub fn reset(&mut self, now: u32) {
        self.last = Some(now);
    }

    pub fn is_alive(&self, now: u32) -> bool {
        self.last.map_or(false, |last| now.wrapping_sub(last) < self.timeout)
    }

    /// Returns `true` once, the first time the timer is found expired after a reset.
    pub fn take_expired(&mut self, now: u32) -> bool {
        match self.last {
            Some(last) if now.wrapping_sub(last) >= self.timeout => {
                self.last = None;
                true
            }
            _ => false,
        }
    }
}

pub struct Dispatcher<H> {
    handler: H,
    liveness: LivenessTimer,
}

impl<H: Handler> Dispatcher<H> {
    pub fn new(handler: H, timeout_ticks: u32) -> Self {
        Self {
            handler,
            liveness: LivenessTimer::new(timeout_ticks),
        }
    }

    /// Dispatcher whose liveness timeout is the configured packet timeout.
    pub fn from_config<C: Clock + ?Sized>(handler: H, config: &LinkConfig, clock: &C) -> Self {
        Self::new(handler, clock.seconds(config.packet_timeout_secs))
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn liveness(&self) -> &LivenessTimer {
        &self.liveness
    }

    pub fn liveness_mut(&mut self) -> &mut LivenessTimer {
        &mut self.liveness
    }

    /// Classifies `payload` received on `link` and runs the handler, sending its reply.
    pub fn dispatch<N: Network + ?Sized>(
        &mut self,
        net: &mut N,
        link: LinkId,
        payload: &[u8],
        state: &mut H::State,
        now: u32,
    ) -> Result<Dispatched, NetError> {
        let message = match H::Message::classify(payload) {
            Some(message) => message,
            None => {
                trace!("Discarding {} byte payload from {}", payload.len(), link);
                return Ok(Dispatched::Discarded);
            }
        };
        self.liveness.reset(now);
        match self.handler.handle(message, state, now) {
            Some(reply) => {
                reliable::send(net, link, &reply)?;
                Ok(Dispatched::Replied)
            }
            None => Ok(Dispatched::Handled),
        }
    }
}

/// Two-byte `[indicator, tid]` command used by the hub and polling applications.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LedCommand {
    pub indicator: Indicator,
    pub tid: u8,
}

impl LedCommand {
    pub fn to_bytes(&self) -> [u8; 2] {
        let n = match self.indicator {
            Indicator::Led1 => 1,
            Indicator::Led2 => 2,
        };
        [n, self.tid]
    }
}

impl Classify for LedCommand {
    fn classify(payload: &[u8]) -> Option<Self> {
        match payload {
            [n, tid] => Indicator::from_number(*n).map(|indicator| LedCommand { indicator, tid: *tid }),
            _ => None,
        }
    }
}

/// Toggles the commanded indicator, skipping repeated transaction ids.
pub struct LedToggle<'a> {
    indicators: &'a dyn IndicatorSink,
}

impl<'a> LedToggle<'a> {
    pub fn new(indicators: &'a dyn IndicatorSink) -> Self {
        Self { indicators }
    }
}

impl<'a> Handler for LedToggle<'a> {
    type Message = LedCommand;
    type State = TidFilter;

    fn handle(&mut self, message: LedCommand, state: &mut TidFilter, _now: u32) -> Option<Reply> {
        if state.accept(message.tid) {
            self.indicators.toggle(message.indicator);
        } else {
            trace!("Duplicate tid {} ignored", message.tid);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Call, ScriptedNetwork};
    use crate::sink::VirtualLeds;

    struct Echo;

    impl Classify for [u8; 3] {
        fn classify(payload: &[u8]) -> Option<Self> {
            payload.try_into().ok()
        }
    }

    impl Handler for Echo {
        type Message = [u8; 3];
        type State = u32;

        fn handle(&mut self, message: [u8; 3], state: &mut u32, _now: u32) -> Option<Reply> {
            *state += 1;
            heapless::Vec::from_slice(&message).ok()
        }
    }

    #[test]
    fn unknown_lengths_are_discarded_without_touching_liveness() {
        let mut net = ScriptedNetwork::new(4);
        let mut dispatcher = Dispatcher::new(Echo, 50);
        let mut count = 0;
        let outcome = dispatcher.dispatch(&mut net, LinkId::new(1), &[1, 2], &mut count, 3).unwrap();
        assert_eq!(outcome, Dispatched::Discarded);
        assert!(!dispatcher.liveness().is_alive(3));
        assert_eq!(count, 0);
    }

    #[test]
    fn replies_go_back_on_the_same_link() {
        let mut net = ScriptedNetwork::new(4);
        let mut dispatcher = Dispatcher::new(Echo, 50);
        let mut count = 0;
        let outcome = dispatcher.dispatch(&mut net, LinkId::new(2), &[7, 8, 9], &mut count, 3).unwrap();
        assert_eq!(outcome, Dispatched::Replied);
        assert_eq!(count, 1);
        assert_eq!(
            net.calls(),
            &[Call::Send {
                link: LinkId::new(2),
                payload: vec![7, 8, 9],
                ack: false
            }]
        );
    }

    #[test]
    fn liveness_expires_once() {
        let mut timer = LivenessTimer::new(50);
        assert!(!timer.take_expired(100));
        timer.reset(10);
        assert!(timer.is_alive(59));
        assert!(!timer.take_expired(59));
        assert!(timer.take_expired(60));
        assert!(!timer.take_expired(61));
    }

    #[test]
    fn led_toggle_filters_repeated_tids() {
        let leds = VirtualLeds::new();
        let mut net = ScriptedNetwork::new(4);
        let mut dispatcher = Dispatcher::new(LedToggle::new(&leds), 50);
        let mut filter = TidFilter::new();
        for msg in [[1, 1], [1, 1], [2, 2], [3, 3], [1, 0]] {
            dispatcher.dispatch(&mut net, LinkId::new(1), &msg, &mut filter, 0).unwrap();
        }
        assert_eq!(leds.toggles(Indicator::Led1), 2);
        assert_eq!(leds.toggles(Indicator::Led2), 1);
        assert!(net.calls().is_empty());
    }
}
