use crate::address::DeviceAddress;
use crate::error::NetError;
use crate::LinkId;

use bitflags::bitflags;
use std::sync::Arc;

bitflags! {
    /// Per-frame transmit options.
    pub struct TxOptions: u8 {
        /// Wait for the peer to acknowledge the frame.
        const ACK_REQ = 0b0000_0001;
    }
}

/// Role of a node in the network.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Role {
    /// Accepts joins when its join context is enabled.
    AccessPoint,
    /// Must join an access point during `init`.
    EndDevice,
    /// Works without an access point.
    Peer,
}

/// Radio power and receiver state requested by the application.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RadioAction {
    Sleep,
    Awake,
    RxOn,
    RxIdle,
}

/// Receive callback, run in interrupt context (or the producer thread of a simulated air).
///
/// Implementations must only signal that work is pending. Copying the frame out and acting
/// on it happens later in the main loop.
pub trait RxClient: Send + Sync {
    /// A frame arrived on `link`, or a new device joined when `link` is
    /// [LinkId::UNCONNECTED]. Returning `true` releases the frame immediately instead of
    /// keeping it for [Network::receive].
    fn frame_received(&self, link: LinkId) -> bool;
}

/// Network layer operations the link/session core relies upon.
///
/// Every operation is fallible with a [NetError] status. Implementations are free to block
/// for their own internal windows (acknowledgement wait, link handshake), but never
/// indefinitely.
pub trait Network {
    /// Starts the network layer, joining an access point when the role requires it.
    fn init(&mut self, rx_client: Option<Arc<dyn RxClient>>) -> Result<(), NetError>;

    fn set_address(&mut self, address: DeviceAddress) -> Result<(), NetError>;

    fn address(&self) -> Option<DeviceAddress>;

    /// Initiates a link with a listening peer.
    fn link(&mut self) -> Result<LinkId, NetError>;

    /// Waits (for one transport window) for a peer initiating a link.
    fn link_listen(&mut self) -> Result<LinkId, NetError>;

    fn send(&mut self, link: LinkId, payload: &[u8], options: TxOptions) -> Result<(), NetError>;

    /// Copies the oldest pending frame of `link` into `buf`.
    ///
    /// `Ok(0)` means the transport polled on our behalf and nothing was pending. It is not
    /// the same as [NetError::NoFrame].
    fn receive(&mut self, link: LinkId, buf: &mut [u8]) -> Result<usize, NetError>;

    /// Neutral probe towards the peer of `link`, hunting frequencies if the transport can.
    fn ping(&mut self, link: LinkId) -> Result<(), NetError>;

    fn radio(&mut self, action: RadioAction) -> Result<(), NetError>;

    /// Instant signal strength on the current channel, in dBm.
    fn rssi(&mut self) -> Result<i8, NetError>;

    /// Transmission power, in dBm.
    fn set_power(&mut self, dbm: i8) -> Result<(), NetError>;

    fn set_logical_channel(&mut self, channel: u8) -> Result<(), NetError>;

    fn logical_channel(&self) -> u8;

    fn frequency_table_size(&self) -> u8;

    fn set_link_token(&mut self, token: u32) -> Result<(), NetError>;

    /// Lets an access point accept (or refuse) join requests.
    fn set_join_context(&mut self, enabled: bool) -> Result<(), NetError>;

    /// Gives polled transports a chance to process incoming frames and run the callback.
    fn poll(&mut self) -> Result<(), NetError> {
        Ok(())
    }
}
