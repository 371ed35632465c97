//! [Network] implementation over a physical transceiver driven through the `radio` HAL traits.
//!
//! Every operation is polled: frames are only read from the transceiver while waiting for a
//! reply (join, link, acknowledgement, ping) or when [Network::poll] is called. Frames that
//! are not the awaited reply are handled on the spot: data frames go to the inbox of their
//! link, management requests are answered.
use embedded_hal::blocking::delay::DelayMs;
use radio::{Power, RadioState, Receive, ReceiveInfo, Rssi, State, Transmit};
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use log::{debug, info, trace, warn};

use ringbuf::HeapRb;
use ringbuf::Rb;
use ringbuf::ring_buffer::RbBase;

use super::device::{Network, RadioAction, Role, RxClient, TxOptions};
use super::frame::{self, FrameFlags, FrameType, Payload, RadioFrame, MGMT_PORT, UUD_PORT};
use crate::address::DeviceAddress;
use crate::error::NetError;
use crate::LinkId;

/// Maximum number of connected links.
pub const MAX_LINKS: usize = 8;

const FIRST_LINK_PORT: u8 = 0x20;
const MAX_RADIO_PACKET: usize = 256;
/// Frames processed by a single call to [Network::poll].
const POLL_BURST: usize = 8;
/// Pending link requests remembered while not listening.
const LINK_REQUEST_BACKLOG: usize = 4;

pub const DEFAULT_JOIN_TOKEN: u32 = 0x0506_0708;
pub const DEFAULT_LINK_TOKEN: u32 = 0x0102_0304;

/// Transceiver capabilities needed by [RadioNetwork].
pub trait LinkRadio<C, E>:
    Transmit<Error = E>
    + Receive<Error = E>
    + Rssi<Error = E>
    + radio::Channel<Channel = C, Error = E>
    + Power<Error = E>
    + State<Error = E>
{
}

impl<
        C: Debug,
        E: Debug,
        T: Transmit<Error = E>
            + Receive<Error = E>
            + Rssi<Error = E>
            + radio::Channel<Channel = C, Error = E>
            + Power<Error = E>
            + State<Error = E>,
    > LinkRadio<C, E> for T
{
}

/// Internal windows and thresholds of the radio transport.
#[derive(Copy, Clone, Debug)]
pub struct RadioTiming {
    /// How long a sender waits for an acknowledgement.
    pub ack_wait_ms: u32,
    /// Delay between two reads of the receiver while waiting.
    pub poll_interval_ms: u32,
    /// The channel is clear when the RSSI is below this level (dBm).
    pub cca_threshold_dbm: i16,
    pub cca_attempts: u8,
    pub cca_backoff_ms: u32,
    /// Upper bound for a transmission to complete.
    pub tx_timeout_ms: u32,
    pub join_window_ms: u32,
    pub link_window_ms: u32,
    /// How long a ping waits for its reply, per channel.
    pub ping_window_ms: u32,
    /// Let an unanswered ping scan the other channels of the table.
    pub frequency_hunting: bool,
    /// Frames kept per link before the oldest is overwritten.
    pub inbox_depth: usize,
}

impl Default for RadioTiming {
    fn default() -> Self {
        Self {
            ack_wait_ms: 30,
            poll_interval_ms: 2,
            cca_threshold_dbm: -75,
            cca_attempts: 4,
            cca_backoff_ms: 3,
            tx_timeout_ms: 100,
            join_window_ms: 500,
            link_window_ms: 500,
            ping_window_ms: 30,
            frequency_hunting: true,
            inbox_depth: 4,
        }
    }
}

struct LinkEntry {
    id: LinkId,
    peer: DeviceAddress,
    local_port: u8,
    remote_port: u8,
    inbox: HeapRb<Payload>,
}

/// A link request seen while nobody was listening.
#[derive(Copy, Clone, Debug)]
struct LinkRequest {
    peer: DeviceAddress,
    remote_port: u8,
    seq: u8,
}

fn radio_error<E: Debug>(err: E) -> NetError {
    NetError::Radio {
        context: format!("{:?}", err),
    }
}

fn frame_error(err: frame::FrameError) -> NetError {
    debug!("Frame refused: {}", err);
    NetError::BadParam
}

/// Network layer over a single transceiver.
pub struct RadioNetwork<'a, T, C, E, D>
where
    T: LinkRadio<C, E>,
    C: Debug,
    E: Debug,
    D: DelayMs<u32>,
{
    radio: T,
    delay: D,
    channels: &'a [C],
    channel: u8,
    role: Role,
    timing: RadioTiming,
    address: Option<DeviceAddress>,
    rx_client: Option<Arc<dyn RxClient>>,
    links: heapless::Vec<LinkEntry, MAX_LINKS>,
    uud: HeapRb<Payload>,
    link_requests: HeapRb<LinkRequest>,
    join_token: u32,
    link_token: u32,
    join_context: bool,
    access_point: Option<DeviceAddress>,
    seq: u8,
    receiving: bool,
    phantom: PhantomData<E>,
}

impl<'a, T, C, E, D> RadioNetwork<'a, T, C, E, D>
where
    T: LinkRadio<C, E>,
    C: Debug,
    E: Debug,
    D: DelayMs<u32>,
{
    /// Wraps `radio`, whose logical channel `n` is `channels[n]`.
    pub fn new(radio: T, delay: D, channels: &'a [C], role: Role, timing: RadioTiming) -> Self {
        assert!(!channels.is_empty(), "No channel declared!");
        assert!(channels.len() <= u8::MAX as usize, "Too many channels declared!");
        Self {
            radio,
            delay,
            channels,
            channel: 0,
            role,
            timing,
            address: None,
            rx_client: None,
            links: heapless::Vec::new(),
            uud: HeapRb::new(timing.inbox_depth.max(1)),
            link_requests: HeapRb::new(LINK_REQUEST_BACKLOG),
            join_token: DEFAULT_JOIN_TOKEN,
            link_token: DEFAULT_LINK_TOKEN,
            join_context: false,
            access_point: None,
            seq: 0,
            receiving: false,
            phantom: PhantomData,
        }
    }

    pub fn with_join_token(mut self, token: u32) -> Self {
        self.join_token = token;
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Address of the access point joined during [Network::init].
    pub fn access_point(&self) -> Option<DeviceAddress> {
        self.access_point
    }

    pub fn link_token(&self) -> u32 {
        self.link_token
    }

    pub fn device(&self) -> &T {
        &self.radio
    }

    pub fn device_mut(&mut self) -> &mut T {
        &mut self.radio
    }

    /// Gives back the transceiver and the delay provider.
    pub fn free(self) -> (T, D) {
        (self.radio, self.delay)
    }

    fn own_address(&self) -> Result<DeviceAddress, NetError> {
        self.address.ok_or(NetError::BadParam)
    }

    fn flags(&self) -> FrameFlags {
        match self.role {
            Role::AccessPoint => FrameFlags::FROM_AP,
            _ => FrameFlags::empty(),
        }
    }

    fn frame(&mut self, kind: FrameType, destination: DeviceAddress, port: u8, payload: &[u8]) -> Result<RadioFrame, NetError> {
        let source = self.own_address()?;
        let flags = self.flags();
        self.seq = self.seq.wrapping_add(1);
        RadioFrame::new(kind, destination, source, port, self.seq, payload)
            .map(|f| f.with_flags(flags))
            .map_err(frame_error)
    }

    /// Answer to `request`, echoing its sequence number and port.
    fn reply(&self, kind: FrameType, request: &RadioFrame, payload: &[u8]) -> Result<RadioFrame, NetError> {
        let source = self.own_address()?;
        RadioFrame::new(kind, request.source, source, request.port, request.seq, payload)
            .map(|f| f.with_flags(self.flags()))
            .map_err(frame_error)
    }

    fn resume_receive(&mut self) -> Result<(), NetError> {
        if self.receiving {
            self.radio.start_receive().map_err(radio_error)?;
        }
        Ok(())
    }

    /// Clear channel assessment on the RSSI of the current channel.
    fn clear_channel(&mut self) -> Result<bool, NetError> {
        for attempt in 0..self.timing.cca_attempts.max(1) {
            let rssi = self.radio.poll_rssi().map_err(radio_error)?;
            if rssi < self.timing.cca_threshold_dbm {
                return Ok(true);
            }
            trace!("Channel {} busy ({} dBm), attempt {}", self.channel, rssi, attempt + 1);
            self.delay.delay_ms(self.timing.cca_backoff_ms);
        }
        Ok(false)
    }

    fn transmit(&mut self, frame: &RadioFrame) -> Result<(), NetError> {
        if !self.clear_channel()? {
            debug!("Channel {} stayed busy, {:?} frame not sent", self.channel, frame.kind);
            return Err(NetError::TxCcaFail);
        }
        let bytes = frame.to_bytes();
        trace!(
            "Transmitting {:?} frame #{} to {} ({} bytes)",
            frame.kind,
            frame.seq,
            frame.destination,
            bytes.len()
        );
        self.radio.start_transmit(&bytes).map_err(radio_error)?;
        let mut waited = 0;
        while !self.radio.check_transmit().map_err(radio_error)? {
            if waited >= self.timing.tx_timeout_ms {
                warn!("Transmission still running after {}ms", waited);
                self.resume_receive()?;
                return Err(NetError::Timeout);
            }
            self.delay.delay_ms(1);
            waited += 1;
        }
        self.resume_receive()
    }

    /// Transmits an answer to a request, a failure only loses the answer.
    fn respond(&mut self, frame: &RadioFrame) {
        if let Err(err) = self.transmit(frame) {
            debug!("{:?} to {} lost: {}", frame.kind, frame.destination, err);
        }
    }

    fn next_frame(&mut self) -> Result<Option<RadioFrame>, NetError> {
        if !self.radio.check_receive(true).map_err(radio_error)? {
            return Ok(None);
        }
        let mut buf = [0u8; MAX_RADIO_PACKET];
        let (size, info) = self.radio.get_received(&mut buf).map_err(radio_error)?;
        match RadioFrame::try_from_bytes(&buf[..size.min(buf.len())]) {
            Ok(frame) => {
                trace!("Received {:?} frame from {} at {} dBm", frame.kind, frame.source, info.rssi());
                Ok(Some(frame))
            }
            Err(err) => {
                debug!("Dropping undecodable packet: {}", err);
                Ok(None)
            }
        }
    }

    /// Reads the receiver for `window_ms` until `accept` picks a frame.
    ///
    /// Other frames are handled as usual. The receiver is turned on for the wait and put
    /// back to idle afterwards if it was off.
    fn wait_for<F>(&mut self, window_ms: u32, accept: F) -> Result<Option<RadioFrame>, NetError>
    where
        F: FnMut(&Self, &RadioFrame) -> bool,
    {
        let was_receiving = self.receiving;
        if !was_receiving {
            self.radio.start_receive().map_err(radio_error)?;
            self.receiving = true;
        }
        let result = self.wait_for_inner(window_ms, accept);
        if !was_receiving {
            self.receiving = false;
            self.radio
                .set_state(<<T as State>::State as RadioState>::idle())
                .map_err(radio_error)?;
        }
        result
    }

    fn wait_for_inner<F>(&mut self, window_ms: u32, mut accept: F) -> Result<Option<RadioFrame>, NetError>
    where
        F: FnMut(&Self, &RadioFrame) -> bool,
    {
        let step = self.timing.poll_interval_ms.max(1);
        let mut waited = 0;
        loop {
            while let Some(frame) = self.next_frame()? {
                if accept(&*self, &frame) {
                    return Ok(Some(frame));
                }
                self.handle(frame)?;
            }
            if waited >= window_ms {
                return Ok(None);
            }
            self.delay.delay_ms(step);
            waited += step;
        }
    }

    fn handle(&mut self, frame: RadioFrame) -> Result<(), NetError> {
        let me = match self.address {
            Some(address) => address,
            None => return Ok(()),
        };
        if !frame.is_for(me) || frame.source == me {
            trace!("{:?} frame for {} ignored", frame.kind, frame.destination);
            return Ok(());
        }
        match frame.kind {
            FrameType::Data => self.deliver(frame),
            FrameType::JoinRequest => self.answer_join(&frame),
            FrameType::LinkRequest => self.remember_link_request(&frame),
            FrameType::PingRequest => {
                let reply = self.reply(FrameType::PingReply, &frame, &[])?;
                self.respond(&reply);
                Ok(())
            }
            other => {
                trace!("Late {:?} frame from {} dropped", other, frame.source);
                Ok(())
            }
        }
    }

    fn deliver(&mut self, frame: RadioFrame) -> Result<(), NetError> {
        let (link, ack) = if frame.port == UUD_PORT {
            (LinkId::UUD, false)
        } else {
            match self
                .links
                .iter()
                .find(|l| l.peer == frame.source && l.local_port == frame.port)
            {
                Some(entry) => (entry.id, frame.flags.contains(FrameFlags::ACK_REQ)),
                None => {
                    debug!("Data from {} on unknown port {:#04x}", frame.source, frame.port);
                    return Ok(());
                }
            }
        };
        if ack {
            let reply = self.reply(FrameType::Ack, &frame, &[])?;
            self.respond(&reply);
        }
        // A frame overwriting the oldest one takes over its count, so the callback stays quiet.
        if self.inbox_mut(link).map_or(false, |inbox| inbox.is_full()) {
            warn!("Inbox of {} full, oldest frame overwritten", link);
            if let Some(inbox) = self.inbox_mut(link) {
                inbox.push_overwrite(frame.payload);
            }
            return Ok(());
        }
        let release = match &self.rx_client {
            Some(client) => client.frame_received(link),
            None => false,
        };
        if release {
            trace!("Frame on {} released by the callback", link);
            return Ok(());
        }
        if let Some(inbox) = self.inbox_mut(link) {
            let _ = inbox.push(frame.payload);
        }
        Ok(())
    }

    fn answer_join(&mut self, frame: &RadioFrame) -> Result<(), NetError> {
        if self.role != Role::AccessPoint || !self.join_context {
            trace!("Join request from {} ignored", frame.source);
            return Ok(());
        }
        if frame.token() != Some(self.join_token) {
            debug!("Join request from {} with a wrong token", frame.source);
            return Ok(());
        }
        let token = self.link_token.to_be_bytes();
        let reply = self.reply(FrameType::JoinReply, frame, &token)?;
        self.respond(&reply);
        info!("{} joined", frame.source);
        if let Some(client) = &self.rx_client {
            client.frame_received(LinkId::UNCONNECTED);
        }
        Ok(())
    }

    fn remember_link_request(&mut self, frame: &RadioFrame) -> Result<(), NetError> {
        let remote_port = match (frame.token(), frame.payload.get(4)) {
            (Some(token), Some(port)) if token == self.link_token => *port,
            _ => {
                trace!("Link request from {} refused", frame.source);
                return Ok(());
            }
        };
        // Our reply got lost, the peer asks again.
        if let Some(local_port) = self
            .links
            .iter()
            .find(|l| l.peer == frame.source && l.remote_port == remote_port)
            .map(|l| l.local_port)
        {
            let reply = self.link_reply(frame.source, frame.seq, local_port)?;
            self.respond(&reply);
            return Ok(());
        }
        let known = self
            .link_requests
            .iter()
            .any(|r| r.peer == frame.source && r.remote_port == remote_port);
        if !known {
            self.link_requests.push_overwrite(LinkRequest {
                peer: frame.source,
                remote_port,
                seq: frame.seq,
            });
        }
        Ok(())
    }

    fn link_payload(&self, local_port: u8) -> [u8; 5] {
        let token = self.link_token.to_be_bytes();
        [token[0], token[1], token[2], token[3], local_port]
    }

    fn link_reply(&self, peer: DeviceAddress, seq: u8, local_port: u8) -> Result<RadioFrame, NetError> {
        let source = self.own_address()?;
        RadioFrame::new(FrameType::LinkReply, peer, source, MGMT_PORT, seq, &self.link_payload(local_port))
            .map(|f| f.with_flags(self.flags()))
            .map_err(frame_error)
    }

    fn next_port(&self) -> u8 {
        FIRST_LINK_PORT + self.links.len() as u8
    }

    fn add_link(&mut self, peer: DeviceAddress, local_port: u8, remote_port: u8) -> Result<LinkId, NetError> {
        let id = LinkId::new(self.links.len() as u8 + 1);
        let entry = LinkEntry {
            id,
            peer,
            local_port,
            remote_port,
            inbox: HeapRb::new(self.timing.inbox_depth.max(1)),
        };
        self.links.push(entry).map_err(|_| NetError::NoMem)?;
        info!("{} up with {} (ports {:#04x}/{:#04x})", id, peer, local_port, remote_port);
        Ok(id)
    }

    fn entry(&self, link: LinkId) -> Result<&LinkEntry, NetError> {
        self.links.iter().find(|l| l.id == link).ok_or(NetError::NoLink)
    }

    fn inbox_mut(&mut self, link: LinkId) -> Option<&mut HeapRb<Payload>> {
        if link == LinkId::UUD {
            return Some(&mut self.uud);
        }
        self.links.iter_mut().find(|l| l.id == link).map(|l| &mut l.inbox)
    }

    /// One ping on the current channel.
    fn probe(&mut self, peer: DeviceAddress) -> Result<bool, NetError> {
        let me = self.own_address()?;
        let request = self.frame(FrameType::PingRequest, peer, MGMT_PORT, &[])?;
        match self.transmit(&request) {
            Ok(()) => {}
            Err(NetError::TxCcaFail) => return Ok(false),
            Err(err) => return Err(err),
        }
        let seq = request.seq;
        let reply = self.wait_for(self.timing.ping_window_ms, |_, f| {
            f.kind == FrameType::PingReply && f.source == peer && f.destination == me && f.seq == seq
        })?;
        Ok(reply.is_some())
    }
}

impl<'a, T, C, E, D> Network for RadioNetwork<'a, T, C, E, D>
where
    T: LinkRadio<C, E>,
    C: Debug,
    E: Debug,
    D: DelayMs<u32>,
{
    fn init(&mut self, rx_client: Option<Arc<dyn RxClient>>) -> Result<(), NetError> {
        self.rx_client = rx_client;
        let channel = self.channel;
        self.set_logical_channel(channel)?;
        self.radio.start_receive().map_err(radio_error)?;
        self.receiving = true;
        if self.role != Role::EndDevice || self.access_point.is_some() {
            info!("Radio network up as {:?} on channel {}", self.role, self.channel);
            return Ok(());
        }

        let me = self.own_address()?;
        let token = self.join_token.to_be_bytes();
        let request = self.frame(FrameType::JoinRequest, DeviceAddress::BROADCAST, MGMT_PORT, &token)?;
        self.transmit(&request)?;
        let seq = request.seq;
        let reply = self.wait_for(self.timing.join_window_ms, |_, f| {
            f.kind == FrameType::JoinReply && f.destination == me && f.seq == seq && f.token().is_some()
        })?;
        match reply.and_then(|f| f.token().map(|token| (f.source, token))) {
            Some((ap, link_token)) => {
                info!("Joined access point {}", ap);
                self.access_point = Some(ap);
                self.link_token = link_token;
                Ok(())
            }
            None => {
                debug!("No access point answered the join request");
                Err(NetError::NoJoin)
            }
        }
    }

    fn set_address(&mut self, address: DeviceAddress) -> Result<(), NetError> {
        self.address = Some(address);
        Ok(())
    }

    fn address(&self) -> Option<DeviceAddress> {
        self.address
    }

    fn link(&mut self) -> Result<LinkId, NetError> {
        let me = self.own_address()?;
        if self.role == Role::EndDevice && self.access_point.is_none() {
            return Err(NetError::NoJoin);
        }
        if self.links.is_full() {
            return Err(NetError::NoMem);
        }
        let local_port = self.next_port();
        let payload = self.link_payload(local_port);
        let request = self.frame(FrameType::LinkRequest, DeviceAddress::BROADCAST, MGMT_PORT, &payload)?;
        self.transmit(&request)?;
        let (seq, token) = (request.seq, self.link_token);
        let reply = self.wait_for(self.timing.link_window_ms, |_, f| {
            f.kind == FrameType::LinkReply
                && f.destination == me
                && f.seq == seq
                && f.token() == Some(token)
                && f.payload.len() == 5
        })?;
        match reply {
            Some(reply) => self.add_link(reply.source, local_port, reply.payload[4]),
            None => Err(NetError::Timeout),
        }
    }

    fn link_listen(&mut self) -> Result<LinkId, NetError> {
        let me = self.own_address()?;
        if self.links.is_full() {
            return Err(NetError::NoMem);
        }
        let request = match self.link_requests.pop() {
            Some(request) => request,
            None => {
                let token = self.link_token;
                let frame = self.wait_for(self.timing.link_window_ms, |net, f| {
                    f.kind == FrameType::LinkRequest
                        && f.is_for(me)
                        && f.source != me
                        && f.token() == Some(token)
                        && f.payload.len() == 5
                        && !net.links.iter().any(|l| l.peer == f.source && l.remote_port == f.payload[4])
                })?;
                match frame {
                    Some(f) => LinkRequest {
                        peer: f.source,
                        remote_port: f.payload[4],
                        seq: f.seq,
                    },
                    None => return Err(NetError::Timeout),
                }
            }
        };
        let local_port = self.next_port();
        let id = self.add_link(request.peer, local_port, request.remote_port)?;
        let reply = self.link_reply(request.peer, request.seq, local_port)?;
        self.respond(&reply);
        Ok(id)
    }

    fn send(&mut self, link: LinkId, payload: &[u8], options: TxOptions) -> Result<(), NetError> {
        if payload.is_empty() {
            return Err(NetError::NoPayload);
        }
        if link == LinkId::UUD {
            let frame = self.frame(FrameType::Data, DeviceAddress::BROADCAST, UUD_PORT, payload)?;
            return self.transmit(&frame);
        }
        let me = self.own_address()?;
        let (peer, port) = {
            let entry = self.entry(link)?;
            (entry.peer, entry.remote_port)
        };
        let ack = options.contains(TxOptions::ACK_REQ);
        let mut frame = self.frame(FrameType::Data, peer, port, payload)?;
        if ack {
            frame.flags |= FrameFlags::ACK_REQ;
        }
        self.transmit(&frame)?;
        if !ack {
            return Ok(());
        }
        let seq = frame.seq;
        let acked = self.wait_for(self.timing.ack_wait_ms, |_, f| {
            f.kind == FrameType::Ack && f.source == peer && f.destination == me && f.seq == seq
        })?;
        match acked {
            Some(_) => Ok(()),
            None => {
                trace!("Frame #{} on {} not acknowledged", seq, link);
                Err(NetError::NoAck)
            }
        }
    }

    fn receive(&mut self, link: LinkId, buf: &mut [u8]) -> Result<usize, NetError> {
        self.poll()?;
        let inbox = self.inbox_mut(link).ok_or(NetError::NoLink)?;
        match inbox.pop() {
            Some(payload) => {
                let len = payload.len().min(buf.len());
                buf[..len].copy_from_slice(&payload[..len]);
                Ok(len)
            }
            None => Err(NetError::NoFrame),
        }
    }

    fn ping(&mut self, link: LinkId) -> Result<(), NetError> {
        let peer = self.entry(link)?.peer;
        if self.probe(peer)? {
            return Ok(());
        }
        let size = self.channels.len();
        if !self.timing.frequency_hunting || size < 2 {
            return Err(NetError::Timeout);
        }
        let home = self.channel;
        for offset in 1..size {
            let candidate = ((home as usize + offset) % size) as u8;
            self.set_logical_channel(candidate)?;
            if self.probe(peer)? {
                info!("Peer of {} found on channel {}", link, candidate);
                return Ok(());
            }
        }
        self.set_logical_channel(home)?;
        Err(NetError::Timeout)
    }

    fn radio(&mut self, action: RadioAction) -> Result<(), NetError> {
        match action {
            RadioAction::Sleep => {
                self.receiving = false;
                self.radio
                    .set_state(<<T as State>::State as RadioState>::sleep())
                    .map_err(radio_error)
            }
            RadioAction::Awake | RadioAction::RxIdle => {
                self.receiving = false;
                self.radio
                    .set_state(<<T as State>::State as RadioState>::idle())
                    .map_err(radio_error)
            }
            RadioAction::RxOn => {
                self.radio.start_receive().map_err(radio_error)?;
                self.receiving = true;
                Ok(())
            }
        }
    }

    fn rssi(&mut self) -> Result<i8, NetError> {
        let dbm = self.radio.poll_rssi().map_err(radio_error)?;
        Ok(dbm.clamp(i8::MIN as i16, i8::MAX as i16) as i8)
    }

    fn set_power(&mut self, dbm: i8) -> Result<(), NetError> {
        self.radio.set_power(dbm).map_err(radio_error)
    }

    fn set_logical_channel(&mut self, channel: u8) -> Result<(), NetError> {
        let channels = self.channels;
        let target = channels.get(channel as usize).ok_or(NetError::BadParam)?;
        self.radio.set_channel(target).map_err(radio_error)?;
        if channel != self.channel {
            debug!("Logical channel {} ({:?})", channel, target);
        }
        self.channel = channel;
        self.resume_receive()
    }

    fn logical_channel(&self) -> u8 {
        self.channel
    }

    fn frequency_table_size(&self) -> u8 {
        self.channels.len() as u8
    }

    fn set_link_token(&mut self, token: u32) -> Result<(), NetError> {
        self.link_token = token;
        Ok(())
    }

    fn set_join_context(&mut self, enabled: bool) -> Result<(), NetError> {
        if self.role != Role::AccessPoint {
            return Err(NetError::BadParam);
        }
        self.join_context = enabled;
        Ok(())
    }

    fn poll(&mut self) -> Result<(), NetError> {
        if !self.receiving {
            return Ok(());
        }
        for _ in 0..POLL_BURST {
            match self.next_frame()? {
                Some(frame) => self.handle(frame)?,
                None => break,
            }
        }
        Ok(())
    }
}
