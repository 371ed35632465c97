//! Reliable send and receive engine.
//!
//! Sending with acknowledgement works in bursts: a burst is `misses_in_a_row` attempts, each
//! bounded by the transport's own acknowledgement wait. A burst in which every attempt went
//! unacknowledged suggests the peer moved to another channel. With frequency agility a
//! single ping probe then tries to find it again before one last burst.
//!
//! Receiving drains every queued frame of a link in one go, and [TidFilter] drops repeated
//! application messages.
use crate::config::LinkConfig;
use crate::device::{Network, TxOptions};
use crate::error::NetError;
use crate::LinkId;

use log::{debug, warn};

/// Single unacknowledged send. The status is the transport status.
pub fn send<N: Network + ?Sized>(net: &mut N, link: LinkId, payload: &[u8]) -> Result<(), NetError> {
    net.send(link, payload, TxOptions::empty())
}

/// Outcome of a successful acknowledged send.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SendReport {
    /// Transmit attempts made, the acknowledged one included.
    pub attempts: u32,
    /// Whether a ping probe was needed to resynchronize.
    pub probed: bool,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("No acknowledgement after {} attempts (probed: {}).", .attempts, .probed)]
    NotAcknowledged { attempts: u32, probed: bool },

    #[error("Channel busy for the whole burst ({} attempts).", .attempts)]
    ChannelBusy { attempts: u32 },

    #[error("Transport failure.")]
    Transport(#[from] NetError),
}

/// Acknowledged sends with the burst and probe policy.
#[derive(Copy, Clone, Debug)]
pub struct ReliableSender {
    misses_in_a_row: u8,
    frequency_agility: bool,
}

impl ReliableSender {
    pub fn new(misses_in_a_row: u8, frequency_agility: bool) -> Self {
        Self {
            misses_in_a_row: misses_in_a_row.max(1),
            frequency_agility,
        }
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(config.misses_in_a_row, config.frequency_agility)
    }

    /// Sends `payload` on `link`, requesting an acknowledgement.
    ///
    /// Clear channel failures do not count as misses. When a burst ends without any
    /// acknowledgement, a ping probe is issued at most once, and only with frequency agility
    /// enabled.
    pub fn send_acked<N: Network + ?Sized>(
        &self,
        net: &mut N,
        link: LinkId,
        payload: &[u8],
    ) -> Result<SendReport, SendError> {
        let mut attempts = 0;
        let mut probed = false;
        loop {
            let mut misses = 0;
            for _ in 0..self.misses_in_a_row {
                attempts += 1;
                match net.send(link, payload, TxOptions::ACK_REQ) {
                    Ok(()) => return Ok(SendReport { attempts, probed }),
                    Err(NetError::NoAck) => misses += 1,
                    Err(NetError::TxCcaFail) => debug!("Clear channel assessment failed on {}", link),
                    Err(err) => return Err(SendError::Transport(err)),
                }
            }
            if misses < self.misses_in_a_row {
                return Err(SendError::ChannelBusy { attempts });
            }
            if !self.frequency_agility || probed {
                return Err(SendError::NotAcknowledged { attempts, probed });
            }
            warn!("{} missed {} acknowledgements in a row, channel changed?", link, misses);
            probed = true;
            if let Err(err) = net.ping(link) {
                debug!("Ping on {} failed: {}", link, err);
                return Err(SendError::NotAcknowledged { attempts, probed });
            }
        }
    }
}

/// Receives every frame queued on `link`, handing each one to `on_frame`.
///
/// Stops on a "polled, nothing pending" answer or on [NetError::NoFrame]. Returns the
/// number of frames handed out.
pub fn drain<N, F>(net: &mut N, link: LinkId, buf: &mut [u8], mut on_frame: F) -> Result<usize, NetError>
where
    N: Network + ?Sized,
    F: FnMut(&[u8]),
{
    let mut frames = 0;
    loop {
        match net.receive(link, buf) {
            Ok(0) | Err(NetError::NoFrame) => return Ok(frames),
            Ok(len) => {
                frames += 1;
                on_frame(&buf[..len]);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Sender side transaction id: pre-incremented, so the first id on the air is 1.
#[derive(Copy, Clone, Debug, Default)]
pub struct TidCounter(u8);

impl TidCounter {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn next_tid(&mut self) -> u8 {
        self.0 = self.0.wrapping_add(1);
        self.0
    }
}

/// Receiver side duplicate filter.
///
/// A frame is accepted when its id is strictly greater than the last accepted one, or when
/// it is 0. The wrap rule also accepts a real duplicate of a 0 id.
#[derive(Copy, Clone, Debug, Default)]
pub struct TidFilter {
    last: u8,
}

impl TidFilter {
    pub fn new() -> Self {
        Self { last: 0 }
    }

    /// Checks `tid`, remembering it when accepted.
    pub fn accept(&mut self, tid: u8) -> bool {
        if tid == 0 || tid > self.last {
            self.last = tid;
            true
        } else {
            false
        }
    }

    pub fn last(&self) -> u8 {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Call, ScriptedNetwork};

    const LINK: LinkId = LinkId::new(1);

    #[test]
    fn first_ack_ends_the_burst() {
        let mut net = ScriptedNetwork::new(4);
        net.script_send([Err(NetError::NoAck), Ok(())]);
        let report = ReliableSender::new(2, true).send_acked(&mut net, LINK, &[1, 1]).unwrap();
        assert_eq!(report, SendReport { attempts: 2, probed: false });
        assert_eq!(net.pings(), 0);
    }

    #[test]
    fn successful_probe_earns_one_more_burst() {
        let mut net = ScriptedNetwork::new(4);
        net.script_send([Err(NetError::NoAck), Err(NetError::NoAck), Err(NetError::NoAck), Ok(())]);
        net.script_ping([Ok(())]);
        let report = ReliableSender::new(2, true).send_acked(&mut net, LINK, &[1, 1]).unwrap();
        assert_eq!(report, SendReport { attempts: 4, probed: true });
        assert_eq!(net.pings(), 1);
    }

    #[test]
    fn cca_failures_are_not_misses() {
        let mut net = ScriptedNetwork::new(4);
        net.script_send([Err(NetError::TxCcaFail), Err(NetError::NoAck)]);
        let result = ReliableSender::new(2, true).send_acked(&mut net, LINK, &[1, 1]);
        assert_eq!(result, Err(SendError::ChannelBusy { attempts: 2 }));
        assert_eq!(net.pings(), 0);
    }

    #[test]
    fn hard_transport_errors_stop_at_once() {
        let mut net = ScriptedNetwork::new(4);
        net.script_send([Err(NetError::NoLink)]);
        let result = ReliableSender::new(2, true).send_acked(&mut net, LINK, &[1, 1]);
        assert_eq!(result, Err(SendError::Transport(NetError::NoLink)));
        assert_eq!(net.sends(), 1);
    }

    #[test]
    fn simple_send_never_requests_ack() {
        let mut net = ScriptedNetwork::new(4);
        send(&mut net, LINK, &[2, 1]).unwrap();
        assert_eq!(
            net.calls(),
            &[Call::Send {
                link: LINK,
                payload: vec![2, 1],
                ack: false
            }]
        );
    }

    #[test]
    fn drain_stops_on_empty_poll() {
        let mut net = ScriptedNetwork::new(4);
        net.queue_frame(LINK, &[1, 5]).queue_frame(LINK, &[2, 6]).queue_empty_poll(LINK).queue_frame(LINK, &[1, 7]);
        let mut seen = Vec::new();
        let frames = drain(&mut net, LINK, &mut [0u8; 32], |f| seen.push(f.to_vec())).unwrap();
        assert_eq!(frames, 2);
        assert_eq!(seen, vec![vec![1, 5], vec![2, 6]]);
    }

    #[test]
    fn drain_surfaces_real_failures() {
        let mut net = ScriptedNetwork::new(4);
        net.queue_frame(LINK, &[1, 5]).queue_error(LINK, NetError::NoLink);
        let result = drain(&mut net, LINK, &mut [0u8; 32], |_| {});
        assert_eq!(result, Err(NetError::NoLink));
    }

    #[test]
    fn tid_counter_starts_at_one_and_wraps() {
        let mut tid = TidCounter::new();
        assert_eq!(tid.next_tid(), 1);
        for _ in 0..254 {
            tid.next_tid();
        }
        assert_eq!(tid.next_tid(), 0);
    }

    #[test]
    fn duplicate_after_wrap_is_accepted() {
        let mut filter = TidFilter::new();
        assert!(filter.accept(254));
        assert!(!filter.accept(254));
        assert!(filter.accept(0));
        assert!(filter.accept(0));
        assert!(filter.accept(1));
    }
}
