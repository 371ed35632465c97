//! Runtime configuration of the link/session layer.
//!
//! Every knob has a default matching the behaviour observed on the reference boards, so
//! `LinkConfig::default()` is what most applications want.

/// What an access point does with a new joiner once every peer slot is taken.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SlotPolicy {
    /// Slots are never reclaimed. Joins stay pending until restart.
    NoReclaim,
    /// The peer silent for the longest time is evicted if silent for at least `idle_ticks`.
    EvictIdle { idle_ticks: u32 },
}

/// Frequency agility scan parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AgilityConfig {
    /// Number of RSSI samples taken per scan.
    pub samples: u8,
    /// Noise floor (dBm) above which a sample counts as interference.
    pub threshold_dbm: i8,
    /// Consecutive interfered samples triggering a channel change.
    pub in_a_row: u8,
    /// Spin between two samples.
    pub sample_delay_ms: u32,
}

impl Default for AgilityConfig {
    fn default() -> Self {
        Self {
            samples: 25,
            threshold_dbm: -70,
            in_a_row: 3,
            sample_delay_ms: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LinkConfig {
    /// Link attempts made by an initiator, `None` retries forever.
    pub link_attempts: Option<u32>,
    /// Spin between two link attempts.
    pub link_retry_delay_ms: u32,
    /// Responder window, in seconds.
    pub listen_timeout_secs: u32,
    /// Spin between two listen polls.
    pub listen_poll_ms: u32,
    /// Listen attempts made by an access point for a pending join, `None` retries forever.
    pub listen_attempts: Option<u32>,
    /// Join attempts at startup, `None` retries forever.
    pub join_attempts: Option<u32>,
    /// Spin between two join attempts.
    pub join_retry_delay_ms: u32,
    /// Acknowledged sends per burst before suspecting a channel change.
    pub misses_in_a_row: u8,
    pub frequency_agility: bool,
    pub agility: AgilityConfig,
    /// Silence after which a receiver reverts to waiting.
    pub packet_timeout_secs: u32,
    /// Main loop iterations between two blink toggles.
    pub blink_period: u8,
    pub slot_policy: SlotPolicy,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            link_attempts: Some(10),
            link_retry_delay_ms: 1000,
            listen_timeout_secs: 10,
            listen_poll_ms: 100,
            listen_attempts: None,
            join_attempts: None,
            join_retry_delay_ms: 1000,
            misses_in_a_row: 2,
            frequency_agility: true,
            agility: AgilityConfig::default(),
            packet_timeout_secs: 5,
            blink_period: 0xF,
            slot_policy: SlotPolicy::NoReclaim,
        }
    }
}

impl LinkConfig {
    pub fn without_agility(mut self) -> Self {
        self.frequency_agility = false;
        self
    }
}
