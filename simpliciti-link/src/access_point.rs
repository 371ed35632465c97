//! Access point side of the star network: join servicing and multi-peer receive.
//!
//! Peers live in a fixed number of slots allocated up front. A slot is taken when a join
//! completes with a successful listen, and by default never given back: once the table is
//! full, new joins stay pending. [SlotPolicy::EvictIdle] opts into reclaiming the slot of a
//! silent peer instead.
use crate::config::{LinkConfig, SlotPolicy};
use crate::device::Network;
use crate::error::NetError;
use crate::semaphore::WorkSemaphores;
use crate::sink::StatusSink;
use crate::{LinkId, MAX_APP_PAYLOAD};

use log::{debug, info, warn};

/// Connected peer and its application shadow state.
#[derive(Clone, Debug)]
pub struct PeerSlot<S> {
    pub link: LinkId,
    pub state: S,
    /// Tick of the last frame received from this peer (or of its join).
    pub last_seen: u32,
}

/// Fixed capacity peer table.
#[derive(Clone, Debug)]
pub struct PeerTable<S, const N: usize> {
    slots: heapless::Vec<PeerSlot<S>, N>,
}

impl<S, const N: usize> Default for PeerTable<S, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, const N: usize> PeerTable<S, N> {
    pub const fn new() -> Self {
        Self {
            slots: heapless::Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.is_full()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn get(&self, index: usize) -> Option<&PeerSlot<S>> {
        self.slots.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut PeerSlot<S>> {
        self.slots.get_mut(index)
    }

    pub fn position(&self, link: LinkId) -> Option<usize> {
        self.slots.iter().position(|s| s.link == link)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerSlot<S>> {
        self.slots.iter()
    }

    fn insert(&mut self, slot: PeerSlot<S>) -> Result<usize, PeerSlot<S>> {
        self.slots.push(slot)?;
        Ok(self.slots.len() - 1)
    }

    /// Index of the peer silent for the longest time, if silent for at least `idle_ticks`.
    fn stalest(&self, now: u32, idle_ticks: u32) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, s)| (i, now.wrapping_sub(s.last_seen)))
            .filter(|(_, idle)| *idle >= idle_ticks)
            .max_by_key(|(_, idle)| *idle)
            .map(|(i, _)| i)
    }
}

/// Result of one pass of join servicing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JoinOutcome {
    /// No join pending.
    Idle,
    /// A join is pending but there is no slot for it. The join stays pending.
    Deferred,
    /// Listening did not produce a link within the configured attempts. The join stays pending.
    NotLinked { last: NetError },
    /// A peer linked and took slot `index`.
    Joined { index: usize, link: LinkId, evicted: Option<LinkId> },
}

/// Join/listen coordinator and peer table of an access point.
pub struct AccessPoint<S, const N: usize> {
    peers: PeerTable<S, N>,
    policy: SlotPolicy,
    listen_attempts: Option<u32>,
}

impl<S: Default, const N: usize> AccessPoint<S, N> {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            peers: PeerTable::new(),
            policy: config.slot_policy,
            listen_attempts: config.listen_attempts,
        }
    }

    pub fn peers(&self) -> &PeerTable<S, N> {
        &self.peers
    }

    pub fn peers_mut(&mut self) -> &mut PeerTable<S, N> {
        &mut self.peers
    }

    /// Promotes one pending joiner to a peer slot.
    ///
    /// Listens until a link comes up (forever unless `listen_attempts` is set), then takes
    /// the slot and consumes one join count. With the table full and no slot to reclaim the
    /// transport is left alone and the join count is not consumed.
    pub fn service_join<T, St>(
        &mut self,
        net: &mut T,
        sems: &WorkSemaphores,
        now: u32,
        status: &St,
    ) -> Result<JoinOutcome, NetError>
    where
        T: Network + ?Sized,
        St: StatusSink + ?Sized,
    {
        if sems.pending_joins() == 0 {
            return Ok(JoinOutcome::Idle);
        }
        let evict = if self.peers.is_full() {
            match self.policy {
                SlotPolicy::NoReclaim => return Ok(JoinOutcome::Deferred),
                SlotPolicy::EvictIdle { idle_ticks } => match self.peers.stalest(now, idle_ticks) {
                    Some(index) => Some(index),
                    None => return Ok(JoinOutcome::Deferred),
                },
            }
        } else {
            None
        };

        let mut attempts = 0;
        let link = loop {
            attempts += 1;
            match net.link_listen() {
                Ok(link) => break link,
                Err(NetError::Timeout | NetError::NoLink) if self.listen_attempts.map_or(true, |max| attempts < max) => {
                    // Keep the pending frames flowing while we wait.
                    net.poll()?;
                }
                Err(last @ (NetError::Timeout | NetError::NoLink)) => {
                    debug!("No link after {} listens: {}", attempts, last);
                    return Ok(JoinOutcome::NotLinked { last });
                }
                Err(err) => return Err(err),
            }
        };

        let slot = PeerSlot {
            link,
            state: S::default(),
            last_seen: now,
        };
        let (index, evicted) = match evict {
            Some(index) => {
                let old = self.peers.slots[index].link;
                warn!("Evicting silent peer on {} for {}", old, link);
                self.peers.slots[index] = slot;
                (index, Some(old))
            }
            None => match self.peers.insert(slot) {
                Ok(index) => (index, None),
                Err(_) => return Ok(JoinOutcome::Deferred),
            },
        };
        sems.take_join();

        let n = self.peers.len();
        info!("{} joined, {} peers", link, n);
        let text = format!("{} device{} connected.", n, if n == 1 { "" } else { "s" });
        status.set_status(0, &text);
        Ok(JoinOutcome::Joined { index, link, evicted })
    }

    /// Receives every pending frame of every peer.
    ///
    /// Each frame consumes one frame count and is handed to `handler` with the peer slot.
    /// Nothing happens when no frame is signaled.
    pub fn service_frames<T, F>(
        &mut self,
        net: &mut T,
        sems: &WorkSemaphores,
        now: u32,
        mut handler: F,
    ) -> Result<usize, NetError>
    where
        T: Network + ?Sized,
        F: FnMut(&mut T, usize, &mut PeerSlot<S>, &[u8]),
    {
        if sems.pending_frames() == 0 {
            return Ok(0);
        }
        let mut buf = [0u8; MAX_APP_PAYLOAD];
        let mut total = 0;
        for index in 0..self.peers.len() {
            let link = self.peers.slots[index].link;
            loop {
                let len = match net.receive(link, &mut buf) {
                    Ok(0) | Err(NetError::NoFrame) => break,
                    Ok(len) => len,
                    Err(err) => return Err(err),
                };
                sems.take_frame();
                total += 1;
                let slot = &mut self.peers.slots[index];
                slot.last_seen = now;
                handler(net, index, slot, &buf[..len]);
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::ScriptedNetwork;
    use crate::sink::NullSink;
    use std::sync::Arc;

    fn ap<const N: usize>(config: &LinkConfig) -> AccessPoint<u8, N> {
        AccessPoint::new(config)
    }

    #[test]
    fn idle_without_join_signal() {
        let mut net = ScriptedNetwork::new(4);
        let mut ap = ap::<2>(&LinkConfig::default());
        assert_eq!(
            ap.service_join(&mut net, &WorkSemaphores::new(), 0, &NullSink).unwrap(),
            JoinOutcome::Idle
        );
        assert_eq!(net.listens(), 0);
    }

    #[test]
    fn join_listens_until_linked() {
        let mut net = ScriptedNetwork::new(4);
        net.script_listen([Err(NetError::Timeout), Err(NetError::Timeout), Ok(LinkId::new(1))]);
        let sems = WorkSemaphores::new();
        sems.signal_join();
        let mut ap = ap::<2>(&LinkConfig::default());
        let outcome = ap.service_join(&mut net, &sems, 7, &NullSink).unwrap();
        assert_eq!(
            outcome,
            JoinOutcome::Joined {
                index: 0,
                link: LinkId::new(1),
                evicted: None
            }
        );
        assert_eq!(net.listens(), 3);
        assert_eq!(sems.pending_joins(), 0);
        assert_eq!(ap.peers().get(0).map(|s| s.last_seen), Some(7));
    }

    #[test]
    fn bounded_listen_leaves_join_pending() {
        let mut net = ScriptedNetwork::new(4);
        let sems = WorkSemaphores::new();
        sems.signal_join();
        let mut config = LinkConfig::default();
        config.listen_attempts = Some(3);
        let mut ap = ap::<2>(&config);
        let outcome = ap.service_join(&mut net, &sems, 0, &NullSink).unwrap();
        assert_eq!(outcome, JoinOutcome::NotLinked { last: NetError::Timeout });
        assert_eq!(net.listens(), 3);
        assert_eq!(sems.pending_joins(), 1);
    }

    #[test]
    fn bounded_listen_reports_the_last_listen_error() {
        let mut net = ScriptedNetwork::new(4);
        net.script_listen([Err(NetError::Timeout), Err(NetError::NoLink)]);
        let sems = WorkSemaphores::new();
        sems.signal_join();
        let mut config = LinkConfig::default();
        config.listen_attempts = Some(2);
        let mut ap = ap::<2>(&config);
        let outcome = ap.service_join(&mut net, &sems, 0, &NullSink).unwrap();
        assert_eq!(outcome, JoinOutcome::NotLinked { last: NetError::NoLink });
        assert_eq!(sems.pending_joins(), 1);
    }

    #[test]
    fn idle_peer_is_evicted_when_opted_in() {
        let mut config = LinkConfig::default();
        config.slot_policy = SlotPolicy::EvictIdle { idle_ticks: 50 };
        let mut net = ScriptedNetwork::new(4);
        net.script_listen([Ok(LinkId::new(1)), Ok(LinkId::new(2)), Ok(LinkId::new(3))]);
        let sems = WorkSemaphores::new();
        let mut ap = ap::<2>(&config);
        for now in [0, 40] {
            sems.signal_join();
            ap.service_join(&mut net, &sems, now, &NullSink).unwrap();
        }
        sems.signal_join();
        assert_eq!(ap.service_join(&mut net, &sems, 45, &NullSink).unwrap(), JoinOutcome::Deferred);
        let outcome = ap.service_join(&mut net, &sems, 60, &NullSink).unwrap();
        assert_eq!(
            outcome,
            JoinOutcome::Joined {
                index: 0,
                link: LinkId::new(3),
                evicted: Some(LinkId::new(1))
            }
        );
        assert_eq!(ap.peers().len(), 2);
    }

    #[test]
    fn frames_are_drained_per_peer() {
        let sems = Arc::new(WorkSemaphores::new());
        let mut net = ScriptedNetwork::new(4);
        net.init(Some(sems.clone())).unwrap();
        net.script_listen([Ok(LinkId::new(1)), Ok(LinkId::new(2))]);
        let mut ap = ap::<4>(&LinkConfig::default());
        for _ in 0..2 {
            sems.signal_join();
            ap.service_join(&mut net, &sems, 0, &NullSink).unwrap();
        }
        net.deliver(LinkId::new(2), &[1, 1]);
        net.deliver(LinkId::new(1), &[2, 1]);
        net.deliver(LinkId::new(2), &[2, 2]);

        let mut seen = Vec::new();
        let n = ap
            .service_frames(&mut net, &sems, 9, |_, index, slot, msg| {
                slot.state = msg[0];
                seen.push((index, msg.to_vec()));
            })
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(sems.pending_frames(), 0);
        assert_eq!(seen, vec![(0, vec![2, 1]), (1, vec![1, 1]), (1, vec![2, 2])]);
        assert_eq!(ap.peers().get(1).map(|s| s.state), Some(2));
    }

    #[test]
    fn long_burst_from_one_peer_is_fully_handled() {
        let sems = Arc::new(WorkSemaphores::new());
        let mut net = ScriptedNetwork::new(4);
        net.init(Some(sems.clone())).unwrap();
        net.script_listen([Ok(LinkId::new(1))]);
        let mut ap = ap::<2>(&LinkConfig::default());
        sems.signal_join();
        ap.service_join(&mut net, &sems, 0, &NullSink).unwrap();
        for i in 0..10u8 {
            net.deliver(LinkId::new(1), &[i]);
        }

        let mut seen = Vec::new();
        let n = ap
            .service_frames(&mut net, &sems, 3, |_, _, _, msg| seen.push(msg[0]))
            .unwrap();
        assert_eq!(n, 10);
        assert_eq!(seen, (0..10).collect::<Vec<u8>>());
        assert_eq!(sems.pending_frames(), 0);
    }
}
