//! Host side transports.
//!
//! [ScriptedNetwork] replays canned results and records every call, for deterministic
//! tests. [SimAir] is an in-process radio medium shared by several threads, each owning a
//! [SimNetwork] node, used by the demo applications.

mod air;
mod scripted;

pub use air::{SimAir, SimNetwork, SimTiming, INTERFERENCE_DBM};
pub use scripted::{Call, ScriptedNetwork};
