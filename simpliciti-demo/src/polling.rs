//! Store-and-forward pair: a talker sending LED commands to a sleepy listener that polls its
//! access point once per second.
use anyhow::Result;
use log::{debug, info, warn};

use simpliciti_link::clock::{Clock, SysTickClock};
use simpliciti_link::device::Network;
use simpliciti_link::dispatch::{Classify, LedCommand};
use simpliciti_link::reliable::{self, TidCounter, TidFilter};
use simpliciti_link::semaphore::WorkSemaphores;
use simpliciti_link::session::{join_network, LinkSession, ListenMode};
use simpliciti_link::sim::SimAir;
use simpliciti_link::sink::{Indicator, IndicatorSink, LogStatus, StatusSink, VirtualLeds};
use simpliciti_link::{LinkConfig, Role, MAX_APP_PAYLOAD};

use std::sync::Arc;
use std::thread;

use crate::{join_board, Deadline};

/// Link token shared by the polling application boards.
pub const POLLING_LINK_TOKEN: u32 = 0x7856_3412;

const SEND_PERIOD_SECS: u32 = 5;
const POLL_PERIOD_MS: u32 = 1000;
/// Every this many messages, the talker addresses LED 1 instead of LED 2.
const LED1_EVERY: u8 = 8;

pub fn run(air: &SimAir, deadline: Deadline) -> Result<()> {
    let ap = {
        let air = air.clone();
        thread::spawn(move || access_point(air, deadline))
    };
    let listener = {
        let air = air.clone();
        thread::spawn(move || listener(air, deadline))
    };
    let talker = {
        let air = air.clone();
        thread::spawn(move || talker(air, deadline))
    };
    join_board("talker", talker)?;
    join_board("listener", listener)?;
    join_board("polling-ap", ap)
}

/// Admits both boards and holds the listener's frames until it polls.
fn access_point(air: SimAir, deadline: Deadline) -> Result<()> {
    let clock = SysTickClock::default();
    let sems = Arc::new(WorkSemaphores::new());
    let mut net = air.node(Role::AccessPoint);
    crate::provision(&mut net, 0)?;
    net.set_link_token(POLLING_LINK_TOKEN)?;
    net.init(Some(sems.clone()))?;
    net.set_join_context(true)?;

    let mut joined = 0;
    while !deadline.passed() {
        while sems.take_join() {
            joined += 1;
            info!("Polling access point: {} devices joined", joined);
        }
        clock.delay_ms(50);
    }
    Ok(())
}

fn talker(air: SimAir, deadline: Deadline) -> Result<()> {
    let clock = SysTickClock::default();
    let leds = VirtualLeds::new();
    let config = LinkConfig::default();

    let mut net = air.node(Role::EndDevice);
    crate::provision(&mut net, 1)?;
    net.set_link_token(POLLING_LINK_TOKEN)?;
    join_network(&mut net, None, &clock, &leds, config.join_attempts, config.join_retry_delay_ms)?;
    // Leave the listener time to start listening.
    clock.delay_ms(500);
    let link = LinkSession::new(&config).link_to(&mut net, &clock, &leds)?;

    let mut tids = TidCounter::new();
    let mut count = 0u8;
    let mut last = clock.ticks();
    while !deadline.passed() {
        if clock.elapsed(last) >= clock.seconds(SEND_PERIOD_SECS) {
            last = clock.ticks();
            count = count.wrapping_add(1);
            let indicator = if count % LED1_EVERY == 0 { Indicator::Led1 } else { Indicator::Led2 };
            let command = LedCommand {
                indicator,
                tid: tids.next_tid(),
            };
            match reliable::send(&mut net, link, &command.to_bytes()) {
                Ok(()) => debug!("Talker sent tid {}", command.tid),
                Err(err) => warn!("Talker send failed: {}", err),
            }
        }
        clock.delay_ms(100);
    }
    Ok(())
}

fn listener(air: SimAir, deadline: Deadline) -> Result<()> {
    let clock = SysTickClock::default();
    let status = LogStatus { name: "listener" };
    let leds = VirtualLeds::new();
    let config = LinkConfig::default();

    let mut net = air.polling_node();
    crate::provision(&mut net, 2)?;
    net.set_link_token(POLLING_LINK_TOKEN)?;
    join_network(&mut net, None, &clock, &leds, config.join_attempts, config.join_retry_delay_ms)?;
    let mut session = LinkSession::new(&config);
    let link = session.link_listen(
        &mut net,
        &clock,
        ListenMode::Timeout {
            seconds: config.listen_timeout_secs,
        },
    )?;
    status.set_status(0, "Linked, polling.");

    let mut filter = TidFilter::new();
    let mut buf = [0u8; MAX_APP_PAYLOAD];
    while !deadline.passed() {
        let frames = reliable::drain(&mut net, link, &mut buf, |payload| match LedCommand::classify(payload) {
            Some(command) if filter.accept(command.tid) => {
                leds.toggle(command.indicator);
                info!("Listener toggled {:?} (tid {})", command.indicator, command.tid);
            }
            Some(command) => debug!("Listener skipped duplicate tid {}", command.tid),
            None => debug!("Listener ignored a {} byte frame", payload.len()),
        })?;
        if frames > 0 {
            status.set_status(1, &format!("{} frames, last tid {}.", frames, filter.last()));
        }
        clock.delay_ms(POLL_PERIOD_MS);
    }
    Ok(())
}
