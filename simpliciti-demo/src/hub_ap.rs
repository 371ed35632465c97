//! Hub access point: admits end devices and toggles its indicators on their commands.
use anyhow::Result;
use log::{info, warn};

use simpliciti_link::access_point::{AccessPoint, JoinOutcome};
use simpliciti_link::agility::{self, ScanOutcome};
use simpliciti_link::clock::{Clock, SysTickClock};
use simpliciti_link::device::Network;
use simpliciti_link::dispatch::{Dispatched, Dispatcher, LedToggle};
use simpliciti_link::reliable::TidFilter;
use simpliciti_link::semaphore::WorkSemaphores;
use simpliciti_link::sim::SimAir;
use simpliciti_link::sink::{Indicator, IndicatorSink, LogStatus, StatusSink, VirtualLeds};
use simpliciti_link::{LinkConfig, Role};

use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;

use crate::Deadline;

/// Peers the hub keeps track of.
const HUB_PEERS: usize = 4;
/// Main loop period.
const LOOP_MS: u32 = 10;

pub fn run(air: &SimAir, button: Receiver<()>, deadline: Deadline) -> Result<()> {
    let clock = SysTickClock::default();
    let status = LogStatus { name: "hub-ap" };
    let leds = VirtualLeds::new();
    let mut config = LinkConfig::default();
    // Give up on a silent joiner so the loop keeps turning.
    config.listen_attempts = Some(20);

    let sems = Arc::new(WorkSemaphores::new());
    let mut net = air.node(Role::AccessPoint);
    crate::provision(&mut net, 0)?;
    net.init(Some(sems.clone()))?;
    net.set_join_context(true)?;
    status.set_status(0, "Waiting for devices.");

    let mut ap: AccessPoint<TidFilter, HUB_PEERS> = AccessPoint::new(&config);
    let mut dispatcher = Dispatcher::from_config(LedToggle::new(&leds), &config, &clock);
    let mut policy = agility::from_config(&config);
    let mut button_alive = true;

    while !deadline.passed() {
        if let JoinOutcome::Joined { link, .. } = ap.service_join(&mut net, &sems, clock.ticks(), &status)? {
            info!("Hub serving {}", link);
        }

        ap.service_frames(&mut net, &sems, clock.ticks(), |net, _, slot, msg| {
            match dispatcher.dispatch(net, slot.link, msg, &mut slot.state, clock.ticks()) {
                Ok(Dispatched::Discarded) => {}
                Ok(_) => info!(
                    "{} -> LED1 {} LED2 {}",
                    slot.link,
                    if leds.is_on(Indicator::Led1) { "on" } else { "off" },
                    if leds.is_on(Indicator::Led2) { "on" } else { "off" },
                ),
                Err(err) => warn!("Dispatch on {} failed: {}", slot.link, err),
            }
        })?;

        if button_alive {
            match button.try_recv() {
                Ok(()) => {
                    let channel = policy.change_channel(&mut net, &leds, &sems)?;
                    status.set_status(1, &format!("Manual hop to channel {}.", channel));
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => button_alive = false,
            }
        }

        if !sems.any_pending() {
            let home = net.logical_channel();
            if let ScanOutcome::Changed(channel) = policy.check_change_channel(&mut net, &clock, &leds, &sems)? {
                status.set_status(1, &format!("Channel {} jammed, now on {}.", home, channel));
            }
        }

        if sems.blink_tick(config.blink_period) {
            leds.toggle_both();
        }
        clock.delay_ms(LOOP_MS);
    }

    info!(
        "Hub done: {} peers, {} toggles on LED1, {} on LED2",
        ap.peers().len(),
        leds.toggles(Indicator::Led1),
        leds.toggles(Indicator::Led2),
    );
    Ok(())
}
