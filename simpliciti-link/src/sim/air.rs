use crate::address::DeviceAddress;
use crate::device::{Network, RadioAction, Role, RxClient, TxOptions};
use crate::error::NetError;
use crate::{LinkId, MAX_APP_PAYLOAD};

use log::{debug, info, trace, warn};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Noise floor (dBm) above which frames on a channel are lost.
pub const INTERFERENCE_DBM: i8 = -70;

const QUIET_DBM: i8 = -100;
const MAX_LINKS: usize = 16;
const INBOX_DEPTH: usize = 8;
const DEFAULT_JOIN_TOKEN: u32 = 0x0506_0708;
const DEFAULT_LINK_TOKEN: u32 = 0x0102_0304;

/// Internal windows of the simulated transport.
#[derive(Copy, Clone, Debug)]
pub struct SimTiming {
    /// How long `link` waits for a listener.
    pub link_window: Duration,
    /// How long one `link_listen` call waits for an initiator.
    pub listen_window: Duration,
    /// Sleep between two checks of the air.
    pub step: Duration,
}

impl Default for SimTiming {
    fn default() -> Self {
        Self {
            link_window: Duration::from_millis(200),
            listen_window: Duration::from_millis(200),
            step: Duration::from_millis(5),
        }
    }
}

struct SimLink {
    id: LinkId,
    peer: usize,
    peer_link: LinkId,
    inbox: VecDeque<Vec<u8>>,
}

struct Node {
    role: Role,
    address: Option<DeviceAddress>,
    channel: u8,
    awake: bool,
    rx_on: bool,
    polling: bool,
    joined: bool,
    join_context: bool,
    join_token: u32,
    link_token: u32,
    power: i8,
    links: Vec<SimLink>,
    uud: VecDeque<Vec<u8>>,
    rx_client: Option<Arc<dyn RxClient>>,
    next_link: u8,
}

impl Node {
    fn new(role: Role, polling: bool) -> Self {
        Self {
            role,
            address: None,
            channel: 0,
            awake: true,
            rx_on: !polling,
            polling,
            joined: false,
            join_context: false,
            join_token: DEFAULT_JOIN_TOKEN,
            link_token: DEFAULT_LINK_TOKEN,
            power: 0,
            links: Vec::new(),
            uud: VecDeque::new(),
            rx_client: None,
            next_link: 1,
        }
    }

    fn link_mut(&mut self, id: LinkId) -> Result<&mut SimLink, NetError> {
        self.links.iter_mut().find(|l| l.id == id).ok_or(NetError::NoLink)
    }

    fn alloc_link(&mut self) -> Result<LinkId, NetError> {
        if self.links.len() >= MAX_LINKS {
            return Err(NetError::NoMem);
        }
        if self.next_link == u8::from(LinkId::UUD) {
            self.next_link += 1;
        }
        let id = LinkId::new(self.next_link);
        self.next_link = self.next_link.wrapping_add(1).max(1);
        Ok(id)
    }

    /// Whether a frame sent on `channel` reaches this node right now.
    fn hears(&self, channel: u8) -> bool {
        self.channel == channel && self.awake && self.rx_on
    }
}

struct LinkRequest {
    id: u64,
    from: usize,
    channel: u8,
    token: u32,
}

struct Air {
    nodes: Vec<Node>,
    noise: Vec<i8>,
    requests: Vec<LinkRequest>,
    accepted: HashMap<u64, LinkId>,
    next_request: u64,
    timing: SimTiming,
}

impl Air {
    fn clear(&self, channel: u8) -> bool {
        self.noise.get(channel as usize).map_or(false, |n| *n <= INTERFERENCE_DBM)
    }
}

/// Simulated radio medium shared by every node.
#[derive(Clone)]
pub struct SimAir {
    inner: Arc<Mutex<Air>>,
}

impl SimAir {
    pub fn new(table_size: u8) -> Self {
        Self::with_timing(table_size, SimTiming::default())
    }

    pub fn with_timing(table_size: u8, timing: SimTiming) -> Self {
        let air = Air {
            nodes: Vec::new(),
            noise: vec![QUIET_DBM; table_size.max(1) as usize],
            requests: Vec::new(),
            accepted: HashMap::new(),
            next_request: 0,
            timing,
        };
        Self {
            inner: Arc::new(Mutex::new(air)),
        }
    }

    /// Adds a node with its receiver on.
    pub fn node(&self, role: Role) -> SimNetwork {
        self.add(role, false)
    }

    /// Adds a sleepy end device whose frames are held for it until it polls.
    pub fn polling_node(&self) -> SimNetwork {
        self.add(Role::EndDevice, true)
    }

    fn add(&self, role: Role, polling: bool) -> SimNetwork {
        let mut air = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        air.nodes.push(Node::new(role, polling));
        SimNetwork {
            air: self.inner.clone(),
            node: air.nodes.len() - 1,
        }
    }

    /// Sets the noise floor of a channel, in dBm.
    pub fn set_noise(&self, channel: u8, dbm: i8) {
        let mut air = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(n) = air.noise.get_mut(channel as usize) {
            *n = dbm;
        }
    }
}

/// One node of a [SimAir].
pub struct SimNetwork {
    air: Arc<Mutex<Air>>,
    node: usize,
}

impl SimNetwork {
    fn lock(&self) -> Result<MutexGuard<'_, Air>, NetError> {
        self.air.lock().map_err(|_| NetError::Radio {
            context: "simulated air lock poisoned".to_owned(),
        })
    }

    /// Runs a callback outside the air lock, releasing the frame when asked to.
    fn notify(&self, target: usize, client: Option<Arc<dyn RxClient>>, link: LinkId) -> Result<(), NetError> {
        let client = match client {
            Some(client) => client,
            None => return Ok(()),
        };
        if client.frame_received(link) {
            let mut air = self.lock()?;
            let node = &mut air.nodes[target];
            if link == LinkId::UUD {
                node.uud.pop_back();
            } else if let Ok(l) = node.link_mut(link) {
                l.inbox.pop_back();
            }
        }
        Ok(())
    }

    fn timing(&self) -> Result<SimTiming, NetError> {
        Ok(self.lock()?.timing)
    }
}

impl Network for SimNetwork {
    fn init(&mut self, rx_client: Option<Arc<dyn RxClient>>) -> Result<(), NetError> {
        let mut air = self.lock()?;
        let me = self.node;
        air.nodes[me].rx_client = rx_client;
        if air.nodes[me].role != Role::EndDevice || air.nodes[me].joined {
            return Ok(());
        }
        let (channel, token) = (air.nodes[me].channel, air.nodes[me].join_token);
        let ap = air.nodes.iter().position(|n| {
            n.role == Role::AccessPoint && n.join_context && n.channel == channel && n.join_token == token
        });
        match ap {
            Some(ap) => {
                air.nodes[me].joined = true;
                let client = air.nodes[ap].rx_client.clone();
                drop(air);
                debug!("Node {} joined access point {}", me, ap);
                self.notify(ap, client, LinkId::UNCONNECTED)
            }
            None => Err(NetError::NoJoin),
        }
    }

    fn set_address(&mut self, address: DeviceAddress) -> Result<(), NetError> {
        self.lock()?.nodes[self.node].address = Some(address);
        Ok(())
    }

    fn address(&self) -> Option<DeviceAddress> {
        self.lock().ok().and_then(|air| air.nodes[self.node].address)
    }

    fn link(&mut self) -> Result<LinkId, NetError> {
        let timing = self.timing()?;
        let request = {
            let mut air = self.lock()?;
            let id = air.next_request;
            air.next_request += 1;
            let node = &air.nodes[self.node];
            let req = LinkRequest {
                id,
                from: self.node,
                channel: node.channel,
                token: node.link_token,
            };
            air.requests.push(req);
            id
        };
        let start = Instant::now();
        loop {
            {
                let mut air = self.lock()?;
                if let Some(link) = air.accepted.remove(&request) {
                    return Ok(link);
                }
                if start.elapsed() >= timing.link_window {
                    air.requests.retain(|r| r.id != request);
                    trace!("Node {} link request {} unanswered", self.node, request);
                    return Err(NetError::Timeout);
                }
            }
            std::thread::sleep(timing.step);
        }
    }

    fn link_listen(&mut self) -> Result<LinkId, NetError> {
        let timing = self.timing()?;
        let start = Instant::now();
        loop {
            {
                let mut air = self.lock()?;
                let me = self.node;
                let (channel, token) = (air.nodes[me].channel, air.nodes[me].link_token);
                let found = air
                    .requests
                    .iter()
                    .position(|r| r.from != me && r.channel == channel && r.token == token);
                if let Some(pos) = found {
                    let req = air.requests.remove(pos);
                    let mine = air.nodes[me].alloc_link()?;
                    let theirs = air.nodes[req.from].alloc_link()?;
                    air.nodes[me].links.push(SimLink {
                        id: mine,
                        peer: req.from,
                        peer_link: theirs,
                        inbox: VecDeque::new(),
                    });
                    air.nodes[req.from].links.push(SimLink {
                        id: theirs,
                        peer: me,
                        peer_link: mine,
                        inbox: VecDeque::new(),
                    });
                    air.accepted.insert(req.id, theirs);
                    info!("Node {} linked with node {} as {}", me, req.from, mine);
                    return Ok(mine);
                }
            }
            if start.elapsed() >= timing.listen_window {
                return Err(NetError::Timeout);
            }
            std::thread::sleep(timing.step);
        }
    }

    fn send(&mut self, link: LinkId, payload: &[u8], options: TxOptions) -> Result<(), NetError> {
        if payload.is_empty() {
            return Err(NetError::NoPayload);
        }
        if payload.len() > MAX_APP_PAYLOAD {
            return Err(NetError::BadParam);
        }
        let me = self.node;
        let mut air = self.lock()?;
        let channel = air.nodes[me].channel;
        if !air.nodes[me].awake {
            return Err(NetError::BadParam);
        }
        let clear = air.clear(channel);

        if link == LinkId::UUD {
            let mut targets = Vec::new();
            if clear {
                for (i, node) in air.nodes.iter_mut().enumerate() {
                    if i != me && node.hears(channel) {
                        node.uud.push_back(payload.to_vec());
                        targets.push((i, node.rx_client.clone()));
                    }
                }
            }
            drop(air);
            for (target, client) in targets {
                self.notify(target, client, LinkId::UUD)?;
            }
            return Ok(());
        }

        let (peer, peer_link) = {
            let l = air.nodes[me].link_mut(link)?;
            (l.peer, l.peer_link)
        };
        let target = &mut air.nodes[peer];
        let stored = clear && (target.polling || target.hears(channel));
        let mut callback = None;
        if stored {
            let wake = target.hears(channel);
            let client = target.rx_client.clone();
            let inbox = &mut target.link_mut(peer_link)?.inbox;
            let evicted = inbox.len() >= INBOX_DEPTH;
            if evicted {
                warn!("Inbox of node {} full, dropping oldest frame", peer);
                inbox.pop_front();
            }
            inbox.push_back(payload.to_vec());
            // A replaced frame was already counted.
            if wake && !evicted {
                callback = client;
            }
        }
        drop(air);
        if callback.is_some() {
            self.notify(peer, callback, peer_link)?;
        }
        if options.contains(TxOptions::ACK_REQ) && !stored {
            trace!("Node {} got no ack from node {}", me, peer);
            return Err(NetError::NoAck);
        }
        Ok(())
    }

    fn receive(&mut self, link: LinkId, buf: &mut [u8]) -> Result<usize, NetError> {
        let mut air = self.lock()?;
        let node = &mut air.nodes[self.node];
        let polling = node.polling;
        let frame = if link == LinkId::UUD {
            node.uud.pop_front()
        } else {
            node.link_mut(link)?.inbox.pop_front()
        };
        match frame {
            Some(frame) => {
                let len = frame.len().min(buf.len());
                buf[..len].copy_from_slice(&frame[..len]);
                Ok(len)
            }
            None if polling => Ok(0),
            None => Err(NetError::NoFrame),
        }
    }

    fn ping(&mut self, link: LinkId) -> Result<(), NetError> {
        let me = self.node;
        let mut air = self.lock()?;
        let peer = air.nodes[me].link_mut(link)?.peer;
        let channel = air.nodes[me].channel;
        if air.clear(channel) && air.nodes[peer].hears(channel) {
            return Ok(());
        }
        let size = air.noise.len() as u8;
        for candidate in 0..size {
            if air.clear(candidate) && air.nodes[peer].hears(candidate) {
                air.nodes[me].channel = candidate;
                info!("Node {} found its peer on channel {}", me, candidate);
                return Ok(());
            }
        }
        Err(NetError::Timeout)
    }

    fn radio(&mut self, action: RadioAction) -> Result<(), NetError> {
        let mut air = self.lock()?;
        let node = &mut air.nodes[self.node];
        match action {
            RadioAction::Sleep => {
                node.awake = false;
                node.rx_on = false;
            }
            RadioAction::Awake => node.awake = true,
            RadioAction::RxOn => {
                node.awake = true;
                node.rx_on = true;
            }
            RadioAction::RxIdle => node.rx_on = false,
        }
        Ok(())
    }

    fn rssi(&mut self) -> Result<i8, NetError> {
        let air = self.lock()?;
        let channel = air.nodes[self.node].channel;
        Ok(air.noise.get(channel as usize).copied().unwrap_or(QUIET_DBM))
    }

    fn set_power(&mut self, dbm: i8) -> Result<(), NetError> {
        self.lock()?.nodes[self.node].power = dbm;
        Ok(())
    }

    fn set_logical_channel(&mut self, channel: u8) -> Result<(), NetError> {
        let mut air = self.lock()?;
        if channel as usize >= air.noise.len() {
            return Err(NetError::BadParam);
        }
        air.nodes[self.node].channel = channel;
        Ok(())
    }

    fn logical_channel(&self) -> u8 {
        self.lock().map(|air| air.nodes[self.node].channel).unwrap_or(0)
    }

    fn frequency_table_size(&self) -> u8 {
        self.lock().map(|air| air.noise.len() as u8).unwrap_or(1)
    }

    fn set_link_token(&mut self, token: u32) -> Result<(), NetError> {
        self.lock()?.nodes[self.node].link_token = token;
        Ok(())
    }

    fn set_join_context(&mut self, enabled: bool) -> Result<(), NetError> {
        let mut air = self.lock()?;
        let node = &mut air.nodes[self.node];
        if node.role != Role::AccessPoint {
            return Err(NetError::BadParam);
        }
        node.join_context = enabled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semaphore::WorkSemaphores;
    use std::thread;

    fn fast() -> SimTiming {
        SimTiming {
            link_window: Duration::from_millis(500),
            listen_window: Duration::from_millis(500),
            step: Duration::from_millis(1),
        }
    }

    #[test]
    fn end_device_joins_only_an_open_access_point() {
        let air = SimAir::with_timing(4, fast());
        let mut ap = air.node(Role::AccessPoint);
        let sems = Arc::new(WorkSemaphores::new());
        ap.init(Some(sems.clone())).unwrap();
        let mut ed = air.node(Role::EndDevice);
        assert_eq!(ed.init(None), Err(NetError::NoJoin));
        ap.set_join_context(true).unwrap();
        ed.init(None).unwrap();
        assert_eq!(sems.pending_joins(), 1);
    }

    #[test]
    fn link_rendezvous_and_acked_send() {
        let air = SimAir::with_timing(4, fast());
        let mut listener = air.node(Role::Peer);
        let mut talker = air.node(Role::Peer);
        let sems = Arc::new(WorkSemaphores::new());
        listener.init(Some(sems.clone())).unwrap();
        talker.init(None).unwrap();

        let handle = thread::spawn(move || {
            let link = talker.link().unwrap();
            talker.send(link, &[1, 1], TxOptions::ACK_REQ).unwrap();
            talker
        });
        let link = listener.link_listen().unwrap();
        let mut talker = handle.join().unwrap();
        assert!(talker.address().is_none());

        let mut buf = [0u8; MAX_APP_PAYLOAD];
        // The talker may have sent before we looked.
        while sems.pending_frames() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(listener.receive(link, &mut buf), Ok(2));
        assert_eq!(&buf[..2], &[1, 1]);
        assert_eq!(listener.receive(link, &mut buf), Err(NetError::NoFrame));

        listener.set_logical_channel(2).unwrap();
        let back = LinkId::new(1);
        assert_eq!(talker.send(back, &[1, 2], TxOptions::ACK_REQ), Err(NetError::NoAck));
        talker.ping(back).unwrap();
        assert_eq!(talker.logical_channel(), 2);
        talker.send(back, &[1, 3], TxOptions::ACK_REQ).unwrap();
    }

    #[test]
    fn polling_node_reports_empty_polls() {
        let air = SimAir::new(2);
        let mut sleepy = air.polling_node();
        assert_eq!(sleepy.receive(LinkId::UUD, &mut [0u8; 4]), Ok(0));
    }

    #[test]
    fn noisy_channel_loses_frames() {
        let air = SimAir::new(2);
        let mut a = air.node(Role::Peer);
        let mut b = air.node(Role::Peer);
        air.set_noise(0, -60);
        assert_eq!(a.rssi(), Ok(-60));
        a.send(LinkId::UUD, &[1], TxOptions::empty()).unwrap();
        assert_eq!(b.receive(LinkId::UUD, &mut [0u8; 4]), Err(NetError::NoFrame));
        air.set_noise(0, -90);
        a.send(LinkId::UUD, &[1], TxOptions::empty()).unwrap();
        assert_eq!(b.receive(LinkId::UUD, &mut [0u8; 4]), Ok(1));
    }

    #[test]
    fn overflowing_inbox_keeps_one_count_per_stored_frame() {
        let air = SimAir::with_timing(4, fast());
        let mut listener = air.node(Role::Peer);
        let mut talker = air.node(Role::Peer);
        let sems = Arc::new(WorkSemaphores::new());
        listener.init(Some(sems.clone())).unwrap();
        talker.init(None).unwrap();

        let handle = thread::spawn(move || {
            let link = talker.link().unwrap();
            for i in 0..INBOX_DEPTH as u8 + 3 {
                talker.send(link, &[i], TxOptions::ACK_REQ).unwrap();
            }
        });
        let link = listener.link_listen().unwrap();
        handle.join().unwrap();

        assert_eq!(sems.pending_frames() as usize, INBOX_DEPTH);
        let mut buf = [0u8; MAX_APP_PAYLOAD];
        assert_eq!(listener.receive(link, &mut buf), Ok(1));
        assert_eq!(buf[0], 3);
        let mut stored = 1;
        while listener.receive(link, &mut buf).is_ok() {
            stored += 1;
        }
        assert_eq!(stored, INBOX_DEPTH);
        for _ in 0..stored {
            assert!(sems.take_frame());
        }
        assert!(!sems.any_pending());
    }
}
