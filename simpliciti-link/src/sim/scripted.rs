use crate::address::DeviceAddress;
use crate::device::{Network, RadioAction, RxClient, TxOptions};
use crate::error::NetError;
use crate::LinkId;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// A transport operation, as recorded by [ScriptedNetwork].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Init,
    SetAddress(DeviceAddress),
    Link,
    LinkListen,
    Send {
        link: LinkId,
        payload: Vec<u8>,
        ack: bool,
    },
    Receive(LinkId),
    Ping(LinkId),
    Radio(RadioAction),
    Rssi,
    SetPower(i8),
    SetChannel(u8),
    SetLinkToken(u32),
    SetJoinContext(bool),
}

/// Transport replaying scripted results.
///
/// Unscripted operations fall back to: `init`, `send` succeed; `link`, `link_listen` and
/// `ping` time out; `receive` reports [NetError::NoFrame]; `rssi` reads a quiet channel.
pub struct ScriptedNetwork {
    calls: Vec<Call>,
    rx_client: Option<Arc<dyn RxClient>>,
    address: Option<DeviceAddress>,
    channel: u8,
    table_size: u8,
    init_results: VecDeque<Result<(), NetError>>,
    link_results: VecDeque<Result<LinkId, NetError>>,
    listen_results: VecDeque<Result<LinkId, NetError>>,
    send_results: VecDeque<Result<(), NetError>>,
    ping_results: VecDeque<Result<(), NetError>>,
    inbox: HashMap<LinkId, VecDeque<Result<Vec<u8>, NetError>>>,
    rssi: VecDeque<i8>,
    quiet_rssi: i8,
    rssi_reads: usize,
    signal_after_rssi: Option<(usize, LinkId)>,
}

impl ScriptedNetwork {
    pub fn new(table_size: u8) -> Self {
        Self {
            calls: Vec::new(),
            rx_client: None,
            address: None,
            channel: 0,
            table_size: table_size.max(1),
            init_results: VecDeque::new(),
            link_results: VecDeque::new(),
            listen_results: VecDeque::new(),
            send_results: VecDeque::new(),
            ping_results: VecDeque::new(),
            inbox: HashMap::new(),
            rssi: VecDeque::new(),
            quiet_rssi: -100,
            rssi_reads: 0,
            signal_after_rssi: None,
        }
    }

    pub fn script_init(&mut self, results: impl IntoIterator<Item = Result<(), NetError>>) -> &mut Self {
        self.init_results.extend(results);
        self
    }

    pub fn script_link(&mut self, results: impl IntoIterator<Item = Result<LinkId, NetError>>) -> &mut Self {
        self.link_results.extend(results);
        self
    }

    pub fn script_listen(&mut self, results: impl IntoIterator<Item = Result<LinkId, NetError>>) -> &mut Self {
        self.listen_results.extend(results);
        self
    }

    pub fn script_send(&mut self, results: impl IntoIterator<Item = Result<(), NetError>>) -> &mut Self {
        self.send_results.extend(results);
        self
    }

    pub fn script_ping(&mut self, results: impl IntoIterator<Item = Result<(), NetError>>) -> &mut Self {
        self.ping_results.extend(results);
        self
    }

    pub fn script_rssi(&mut self, samples: impl IntoIterator<Item = i8>) -> &mut Self {
        self.rssi.extend(samples);
        self
    }

    /// Fires the receive callback for `link` right after the `n`th RSSI read.
    pub fn signal_after_rssi(&mut self, n: usize, link: LinkId) -> &mut Self {
        self.signal_after_rssi = Some((n, link));
        self
    }

    /// Queues a frame without running the callback.
    pub fn queue_frame(&mut self, link: LinkId, payload: &[u8]) -> &mut Self {
        self.inbox.entry(link).or_default().push_back(Ok(payload.to_vec()));
        self
    }

    /// Queues a "polled, nothing pending" answer.
    pub fn queue_empty_poll(&mut self, link: LinkId) -> &mut Self {
        self.inbox.entry(link).or_default().push_back(Ok(Vec::new()));
        self
    }

    pub fn queue_error(&mut self, link: LinkId, err: NetError) -> &mut Self {
        self.inbox.entry(link).or_default().push_back(Err(err));
        self
    }

    /// Queues a frame and runs the callback, as the radio interrupt would.
    pub fn deliver(&mut self, link: LinkId, payload: &[u8]) {
        self.queue_frame(link, payload);
        self.signal(link);
    }

    /// Runs the callback alone, as a join notification does.
    pub fn signal(&self, link: LinkId) {
        if let Some(client) = &self.rx_client {
            client.frame_received(link);
        }
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn sends(&self) -> usize {
        self.count(|c| matches!(c, Call::Send { .. }))
    }

    pub fn pings(&self) -> usize {
        self.count(|c| matches!(c, Call::Ping(_)))
    }

    pub fn listens(&self) -> usize {
        self.count(|c| matches!(c, Call::LinkListen))
    }
}

impl Network for ScriptedNetwork {
    fn init(&mut self, rx_client: Option<Arc<dyn RxClient>>) -> Result<(), NetError> {
        self.calls.push(Call::Init);
        self.rx_client = rx_client;
        self.init_results.pop_front().unwrap_or(Ok(()))
    }

    fn set_address(&mut self, address: DeviceAddress) -> Result<(), NetError> {
        self.calls.push(Call::SetAddress(address));
        self.address = Some(address);
        Ok(())
    }

    fn address(&self) -> Option<DeviceAddress> {
        self.address
    }

    fn link(&mut self) -> Result<LinkId, NetError> {
        self.calls.push(Call::Link);
        self.link_results.pop_front().unwrap_or(Err(NetError::Timeout))
    }

    fn link_listen(&mut self) -> Result<LinkId, NetError> {
        self.calls.push(Call::LinkListen);
        self.listen_results.pop_front().unwrap_or(Err(NetError::Timeout))
    }

    fn send(&mut self, link: LinkId, payload: &[u8], options: TxOptions) -> Result<(), NetError> {
        self.calls.push(Call::Send {
            link,
            payload: payload.to_vec(),
            ack: options.contains(TxOptions::ACK_REQ),
        });
        self.send_results.pop_front().unwrap_or(Ok(()))
    }

    fn receive(&mut self, link: LinkId, buf: &mut [u8]) -> Result<usize, NetError> {
        self.calls.push(Call::Receive(link));
        match self.inbox.get_mut(&link).and_then(|q| q.pop_front()) {
            Some(Ok(frame)) => {
                let len = frame.len().min(buf.len());
                buf[..len].copy_from_slice(&frame[..len]);
                Ok(len)
            }
            Some(Err(err)) => Err(err),
            None => Err(NetError::NoFrame),
        }
    }

    fn ping(&mut self, link: LinkId) -> Result<(), NetError> {
        self.calls.push(Call::Ping(link));
        self.ping_results.pop_front().unwrap_or(Err(NetError::Timeout))
    }

    fn radio(&mut self, action: RadioAction) -> Result<(), NetError> {
        self.calls.push(Call::Radio(action));
        Ok(())
    }

    fn rssi(&mut self) -> Result<i8, NetError> {
        self.calls.push(Call::Rssi);
        self.rssi_reads += 1;
        let sample = self.rssi.pop_front().unwrap_or(self.quiet_rssi);
        if let Some((n, link)) = self.signal_after_rssi {
            if n == self.rssi_reads {
                self.signal(link);
            }
        }
        Ok(sample)
    }

    fn set_power(&mut self, dbm: i8) -> Result<(), NetError> {
        self.calls.push(Call::SetPower(dbm));
        Ok(())
    }

    fn set_logical_channel(&mut self, channel: u8) -> Result<(), NetError> {
        self.calls.push(Call::SetChannel(channel));
        if channel >= self.table_size {
            return Err(NetError::BadParam);
        }
        self.channel = channel;
        Ok(())
    }

    fn logical_channel(&self) -> u8 {
        self.channel
    }

    fn frequency_table_size(&self) -> u8 {
        self.table_size
    }

    fn set_link_token(&mut self, token: u32) -> Result<(), NetError> {
        self.calls.push(Call::SetLinkToken(token));
        Ok(())
    }

    fn set_join_context(&mut self, enabled: bool) -> Result<(), NetError> {
        self.calls.push(Call::SetJoinContext(enabled));
        Ok(())
    }
}
