//! Frequency agility.
//!
//! An access point watches the noise floor of its channel between two bursts of work. When
//! the channel looks jammed it hops to the next entry of the frequency table and blinks both
//! indicators until a peer finds it again (the peers hunt with a ping).
//!
//! ## Usages
//! ```rust,ignore
//! let mut agility = simpliciti_link::agility::from_config(&config);
//! match agility.check_change_channel(&mut net, &clock, &leds, &sems)? {
//!     ScanOutcome::Changed(channel) => status.set_status(1, "Channel changed"),
//!     _ => {}
//! }
//! ```
use crate::clock::Clock;
use crate::config::{AgilityConfig, LinkConfig};
use crate::device::Network;
use crate::error::NetError;
use crate::semaphore::WorkSemaphores;
use crate::sink::{Indicator, IndicatorSink};

use log::{debug, info};

/// Upper bound on the samples kept from one scan.
pub const MAX_SAMPLES: usize = 32;

/// Result of one noise scan.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ScanOutcome {
    /// Every sample was taken and the channel stays.
    Quiet,
    /// Work became pending during the scan, which was abandoned.
    Interrupted,
    /// The channel was jammed, the transport now runs on this logical channel.
    Changed(u8),
}

/// Channel selection strategy, chosen at startup.
pub trait ChannelPolicy: Send {
    fn is_enabled(&self) -> bool;

    /// Moves to the next channel of the table, returning the new logical channel.
    fn change_channel(
        &mut self,
        net: &mut dyn Network,
        indicators: &dyn IndicatorSink,
        sems: &WorkSemaphores,
    ) -> Result<u8, NetError>;

    /// Samples the noise floor and changes channel if it is jammed.
    fn check_change_channel(
        &mut self,
        net: &mut dyn Network,
        clock: &dyn Clock,
        indicators: &dyn IndicatorSink,
        sems: &WorkSemaphores,
    ) -> Result<ScanOutcome, NetError>;
}

/// Builds the policy selected by the configuration.
pub fn from_config(config: &LinkConfig) -> Box<dyn ChannelPolicy> {
    if config.frequency_agility {
        Box::new(FrequencyAgility::new(config.agility))
    } else {
        Box::new(FixedChannel)
    }
}

/// Noise driven channel hopping.
#[derive(Clone, Debug)]
pub struct FrequencyAgility {
    config: AgilityConfig,
    samples: heapless::Vec<i8, MAX_SAMPLES>,
    changes: u32,
}

impl FrequencyAgility {
    pub fn new(config: AgilityConfig) -> Self {
        Self {
            config,
            samples: heapless::Vec::new(),
            changes: 0,
        }
    }

    /// Samples taken by the last scan, oldest first.
    pub fn last_samples(&self) -> &[i8] {
        &self.samples
    }

    /// Channel changes made so far.
    pub fn changes(&self) -> u32 {
        self.changes
    }
}

impl Default for FrequencyAgility {
    fn default() -> Self {
        Self::new(AgilityConfig::default())
    }
}

impl ChannelPolicy for FrequencyAgility {
    fn is_enabled(&self) -> bool {
        true
    }

    fn change_channel(
        &mut self,
        net: &mut dyn Network,
        indicators: &dyn IndicatorSink,
        sems: &WorkSemaphores,
    ) -> Result<u8, NetError> {
        let size = net.frequency_table_size().max(1);
        let next = (net.logical_channel() + 1) % size;
        net.set_logical_channel(next)?;
        self.changes += 1;
        indicators.set(Indicator::Led1, false);
        indicators.set(Indicator::Led2, false);
        sems.start_blink();
        info!("Changed to logical channel {}", next);
        Ok(next)
    }

    fn check_change_channel(
        &mut self,
        net: &mut dyn Network,
        clock: &dyn Clock,
        indicators: &dyn IndicatorSink,
        sems: &WorkSemaphores,
    ) -> Result<ScanOutcome, NetError> {
        self.samples.clear();
        let mut in_a_row = 0u8;
        let total = (self.config.samples as usize).min(MAX_SAMPLES);
        for _ in 0..total {
            // Pending work wins over finishing the scan.
            if sems.any_pending() {
                debug!("Noise scan interrupted after {} samples", self.samples.len());
                return Ok(ScanOutcome::Interrupted);
            }
            clock.delay_ms(self.config.sample_delay_ms);
            let rssi = net.rssi()?;
            let _ = self.samples.push(rssi);
            if rssi > self.config.threshold_dbm {
                in_a_row += 1;
                if in_a_row >= self.config.in_a_row {
                    debug!("Channel {} jammed ({} dBm)", net.logical_channel(), rssi);
                    let channel = self.change_channel(net, indicators, sems)?;
                    return Ok(ScanOutcome::Changed(channel));
                }
            } else {
                in_a_row = 0;
            }
        }
        Ok(ScanOutcome::Quiet)
    }
}

/// Agility disabled: the channel never moves.
#[derive(Copy, Clone, Debug, Default)]
pub struct FixedChannel;

impl ChannelPolicy for FixedChannel {
    fn is_enabled(&self) -> bool {
        false
    }

    fn change_channel(
        &mut self,
        net: &mut dyn Network,
        _indicators: &dyn IndicatorSink,
        _sems: &WorkSemaphores,
    ) -> Result<u8, NetError> {
        Ok(net.logical_channel())
    }

    fn check_change_channel(
        &mut self,
        _net: &mut dyn Network,
        _clock: &dyn Clock,
        _indicators: &dyn IndicatorSink,
        _sems: &WorkSemaphores,
    ) -> Result<ScanOutcome, NetError> {
        Ok(ScanOutcome::Quiet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sim::{Call, ScriptedNetwork};
    use crate::sink::VirtualLeds;
    use crate::LinkId;

    #[test]
    fn quiet_channel_takes_every_sample() {
        let mut net = ScriptedNetwork::new(4);
        let clock = ManualClock::default();
        let sems = WorkSemaphores::new();
        let mut fa = FrequencyAgility::default();
        let outcome = fa.check_change_channel(&mut net, &clock, &VirtualLeds::new(), &sems).unwrap();
        assert_eq!(outcome, ScanOutcome::Quiet);
        assert_eq!(fa.last_samples().len(), 25);
        assert_eq!(clock.elapsed_ms(), 25);
    }

    #[test]
    fn three_loud_samples_in_a_row_change_channel() {
        let mut net = ScriptedNetwork::new(4);
        net.script_rssi([-60, -60, -90, -65, -50, -69]);
        let leds = VirtualLeds::new();
        leds.set(Indicator::Led1, true);
        let sems = WorkSemaphores::new();
        let mut fa = FrequencyAgility::default();
        let outcome = fa.check_change_channel(&mut net, &ManualClock::default(), &leds, &sems).unwrap();
        assert_eq!(outcome, ScanOutcome::Changed(1));
        assert_eq!(fa.last_samples(), &[-60, -60, -90, -65, -50, -69]);
        assert!(!leds.is_on(Indicator::Led1));
        assert!(sems.is_blinking());
    }

    #[test]
    fn threshold_itself_is_not_interference() {
        let mut net = ScriptedNetwork::new(4);
        net.script_rssi([-70; 25]);
        let mut fa = FrequencyAgility::default();
        let outcome = fa
            .check_change_channel(&mut net, &ManualClock::default(), &VirtualLeds::new(), &WorkSemaphores::new())
            .unwrap();
        assert_eq!(outcome, ScanOutcome::Quiet);
    }

    #[test]
    fn scan_yields_to_pending_frame() {
        let sems = std::sync::Arc::new(WorkSemaphores::new());
        let mut net = ScriptedNetwork::new(4);
        net.init(Some(sems.clone())).unwrap();
        net.script_rssi([-50, -50]).signal_after_rssi(2, LinkId::new(1));
        let mut fa = FrequencyAgility::default();
        let outcome = fa
            .check_change_channel(&mut net, &ManualClock::default(), &VirtualLeds::new(), &sems)
            .unwrap();
        assert_eq!(outcome, ScanOutcome::Interrupted);
        assert_eq!(net.count(|c| *c == Call::Rssi), 2);
        assert_eq!(net.logical_channel(), 0);
    }

    #[test]
    fn channel_wraps_around_the_table() {
        let mut net = ScriptedNetwork::new(3);
        net.set_logical_channel(2).unwrap();
        let mut fa = FrequencyAgility::default();
        let channel = fa.change_channel(&mut net, &VirtualLeds::new(), &WorkSemaphores::new()).unwrap();
        assert_eq!(channel, 0);
    }

    #[test]
    fn fixed_channel_never_moves() {
        let mut net = ScriptedNetwork::new(4);
        net.script_rssi([-20; 25]);
        let mut policy = from_config(&LinkConfig::default().without_agility());
        assert!(!policy.is_enabled());
        let outcome = policy
            .check_change_channel(&mut net, &ManualClock::default(), &VirtualLeds::new(), &WorkSemaphores::new())
            .unwrap();
        assert_eq!(outcome, ScanOutcome::Quiet);
        assert!(net.calls().is_empty());
    }
}
