//! Point-to-point link establishment.
//!
//! A [LinkSession] owns at most one link. The initiator goes `Idle -> Linking -> Linked`, the
//! responder `Idle -> Listening -> Linked`. `Linked` is terminal: links are never torn down.
use crate::clock::Clock;
use crate::config::LinkConfig;
use crate::device::{Network, RxClient};
use crate::error::NetError;
use crate::sink::IndicatorSink;
use crate::LinkId;

use log::{debug, info, warn};
use std::sync::Arc;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkState {
    Idle,
    Linking,
    Listening,
    Linked(LinkId),
}

/// How long a responder waits for an initiator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ListenMode {
    Timeout { seconds: u32 },
    Forever,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Gave up after {} attempts, last status: {}.", .attempts, .last)]
    Exhausted { attempts: u32, last: NetError },

    #[error("No peer showed up within {}s.", .seconds)]
    ListenTimeout { seconds: u32 },

    #[error("Session already linked on {}.", .0)]
    AlreadyLinked(LinkId),

    #[error("Transport failure.")]
    Transport(#[from] NetError),
}

pub struct LinkSession {
    state: LinkState,
    attempts: Option<u32>,
    retry_delay_ms: u32,
    listen_poll_ms: u32,
}

impl LinkSession {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            state: LinkState::Idle,
            attempts: config.link_attempts,
            retry_delay_ms: config.link_retry_delay_ms,
            listen_poll_ms: config.listen_poll_ms.max(1),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn link_id(&self) -> Option<LinkId> {
        match self.state {
            LinkState::Linked(id) => Some(id),
            _ => None,
        }
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        match self.state {
            LinkState::Linked(id) => Err(SessionError::AlreadyLinked(id)),
            _ => Ok(()),
        }
    }

    /// Initiates a link, retrying with both indicators toggled between attempts.
    pub fn link_to<N, C, I>(&mut self, net: &mut N, clock: &C, indicators: &I) -> Result<LinkId, SessionError>
    where
        N: Network + ?Sized,
        C: Clock + ?Sized,
        I: IndicatorSink + ?Sized,
    {
        self.ensure_idle()?;
        self.state = LinkState::Linking;
        let mut attempts = 0;
        loop {
            attempts += 1;
            match net.link() {
                Ok(id) => {
                    info!("Linked as {} after {} attempts", id, attempts);
                    self.state = LinkState::Linked(id);
                    return Ok(id);
                }
                Err(last) => {
                    debug!("Link attempt {} failed: {}", attempts, last);
                    if self.attempts.map_or(false, |max| attempts >= max) {
                        warn!("Link abandoned after {} attempts", attempts);
                        self.state = LinkState::Idle;
                        return Err(SessionError::Exhausted { attempts, last });
                    }
                }
            }
            indicators.toggle_both();
            clock.delay_ms(self.retry_delay_ms);
        }
    }

    /// Waits for a peer to initiate a link.
    pub fn link_listen<N, C>(&mut self, net: &mut N, clock: &C, mode: ListenMode) -> Result<LinkId, SessionError>
    where
        N: Network + ?Sized,
        C: Clock + ?Sized,
    {
        self.ensure_idle()?;
        self.state = LinkState::Listening;
        let start = clock.ticks();
        loop {
            match net.link_listen() {
                Ok(id) => {
                    info!("Peer linked on {}", id);
                    self.state = LinkState::Linked(id);
                    return Ok(id);
                }
                Err(NetError::Timeout) | Err(NetError::NoLink) => {}
                Err(err) => {
                    self.state = LinkState::Idle;
                    return Err(SessionError::Transport(err));
                }
            }
            if let ListenMode::Timeout { seconds } = mode {
                if clock.elapsed(start) >= clock.seconds(seconds) {
                    debug!("Nobody linked within {}s", seconds);
                    self.state = LinkState::Idle;
                    return Err(SessionError::ListenTimeout { seconds });
                }
            }
            clock.delay_ms(self.listen_poll_ms);
        }
    }
}

/// Starts the network layer, retrying until an access point answers.
///
/// Both indicators toggle between attempts. `attempts` of `None` retries forever.
pub fn join_network<N, C, I>(
    net: &mut N,
    rx_client: Option<Arc<dyn RxClient>>,
    clock: &C,
    indicators: &I,
    attempts: Option<u32>,
    retry_delay_ms: u32,
) -> Result<(), SessionError>
where
    N: Network + ?Sized,
    C: Clock + ?Sized,
    I: IndicatorSink + ?Sized,
{
    let mut made = 0;
    loop {
        made += 1;
        match net.init(rx_client.clone()) {
            Ok(()) => {
                info!("Network joined after {} attempts", made);
                return Ok(());
            }
            Err(last) => {
                debug!("Join attempt {} failed: {}", made, last);
                if attempts.map_or(false, |max| made >= max) {
                    return Err(SessionError::Exhausted { attempts: made, last });
                }
            }
        }
        indicators.toggle_both();
        clock.delay_ms(retry_delay_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sim::ScriptedNetwork;
    use crate::sink::{Indicator, VirtualLeds};

    #[test]
    fn link_to_gives_up_after_configured_attempts() {
        let mut net = ScriptedNetwork::new(4);
        let clock = ManualClock::default();
        let leds = VirtualLeds::new();
        let mut session = LinkSession::new(&LinkConfig::default());
        let result = session.link_to(&mut net, &clock, &leds);
        assert_eq!(
            result,
            Err(SessionError::Exhausted {
                attempts: 10,
                last: NetError::Timeout
            })
        );
        assert_eq!(session.state(), LinkState::Idle);
        assert_eq!(leds.toggles(Indicator::Led1), 9);
        assert_eq!(clock.elapsed_ms(), 9_000);
    }

    #[test]
    fn link_to_reaches_terminal_state() {
        let mut net = ScriptedNetwork::new(4);
        net.script_link([Err(NetError::Timeout), Ok(LinkId::new(1))]);
        let clock = ManualClock::default();
        let mut session = LinkSession::new(&LinkConfig::default());
        assert_eq!(session.link_to(&mut net, &clock, &VirtualLeds::new()), Ok(LinkId::new(1)));
        assert_eq!(session.state(), LinkState::Linked(LinkId::new(1)));
        assert_eq!(
            session.link_listen(&mut net, &clock, ListenMode::Forever),
            Err(SessionError::AlreadyLinked(LinkId::new(1)))
        );
    }

    #[test]
    fn listen_times_out_on_the_tick_source() {
        let mut net = ScriptedNetwork::new(4);
        let clock = ManualClock::default();
        let mut session = LinkSession::new(&LinkConfig::default());
        let result = session.link_listen(&mut net, &clock, ListenMode::Timeout { seconds: 10 });
        assert_eq!(result, Err(SessionError::ListenTimeout { seconds: 10 }));
        assert_eq!(clock.ticks(), 100);
        assert_eq!(net.listens(), 101);
        assert_eq!(session.state(), LinkState::Idle);
    }

    #[test]
    fn join_retries_until_an_access_point_answers() {
        let mut net = ScriptedNetwork::new(4);
        net.script_init([Err(NetError::NoJoin), Err(NetError::NoJoin), Ok(())]);
        let clock = ManualClock::default();
        let leds = VirtualLeds::new();
        join_network(&mut net, None, &clock, &leds, None, 1000).unwrap();
        assert_eq!(leds.toggles(Indicator::Led2), 2);
        assert_eq!(clock.elapsed_ms(), 2_000);
    }
}
