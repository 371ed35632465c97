//! Everything needed to exchange frames with peers, either over a physical radio module
//! or any other medium implementing [Network].

pub mod device;
pub mod frame;
pub mod radio;

pub use device::*;
