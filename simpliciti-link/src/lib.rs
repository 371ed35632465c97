//! Link and session layer of a SimpliciTI-style low-power wireless network.
//!
//! The crate is organised around the [Network](device::Network) trait, the seam between
//! the protocol logic and whatever moves frames over the air. On top of it live the
//! addressing, session, access-point, reliability, frequency agility and dispatch layers.
//!
//! ## Usages
//! ```rust,ignore
//! let sems = Arc::new(WorkSemaphores::new());
//! net.init(Some(sems.clone()))?;
//! net.set_join_context(true)?;
//! let mut ap: AccessPoint<TidFilter, 4> = AccessPoint::new(&config);
//! loop {
//!     ap.service_join(&mut net, &sems, clock.ticks(), &status)?;
//!     ap.service_frames(&mut net, &sems, clock.ticks(), |_net, _index, peer, msg| {
//!         // `peer.state` is the shadow state of the sender.
//!     })?;
//! }
//! ```
pub mod access_point;
pub mod address;
pub mod agility;
pub mod chronos;
pub mod clock;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod reliable;
pub mod semaphore;
pub mod session;
pub mod sim;
pub mod sink;

pub use device::radio;

pub use address::DeviceAddress;
pub use config::LinkConfig;
pub use device::Role;
pub use error::NetError;

/// Largest application payload carried by a single frame.
pub const MAX_APP_PAYLOAD: usize = 32;

/// Opaque handle of a point-to-point link, handed out by the transport.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LinkId(u8);

impl LinkId {
    /// Reported by the receive callback for a device that joined but is not linked yet.
    pub const UNCONNECTED: LinkId = LinkId(0);
    /// Unconnected user datagram port, used for broadcasts.
    pub const UUD: LinkId = LinkId(0x7F);

    pub const fn new(raw: u8) -> Self {
        LinkId(raw)
    }

    pub fn is_connected(&self) -> bool {
        *self != LinkId::UNCONNECTED && *self != LinkId::UUD
    }
}

impl From<u8> for LinkId {
    fn from(inner: u8) -> Self {
        LinkId(inner)
    }
}

impl From<LinkId> for u8 {
    fn from(id: LinkId) -> Self {
        id.0
    }
}

impl core::fmt::Display for LinkId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match *self {
            LinkId::UNCONNECTED => write!(f, "link#-"),
            LinkId::UUD => write!(f, "link#uud"),
            LinkId(n) => write!(f, "link#{}", n),
        }
    }
}
