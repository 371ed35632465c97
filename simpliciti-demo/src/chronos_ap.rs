//! Chronos watch receiver, and simulated watches going through mouse mode, sync mode and
//! silence.
//!
//! The first watch to join is the current one. Halfway through, the change button moves on to
//! the next joined watch.
use anyhow::Result;
use log::{debug, info, warn};

use simpliciti_link::access_point::{AccessPoint, JoinOutcome};
use simpliciti_link::chronos::{
    ChronosHandler, WatchMode, WatchState, STATUS_PACKET_SIZE, SYNC_AP_CMD_GET_STATUS, SYNC_AP_CMD_SET_WATCH,
};
use simpliciti_link::clock::{Clock, SysTickClock};
use simpliciti_link::device::Network;
use simpliciti_link::dispatch::Dispatcher;
use simpliciti_link::reliable;
use simpliciti_link::semaphore::WorkSemaphores;
use simpliciti_link::session::{join_network, LinkSession};
use simpliciti_link::sim::SimAir;
use simpliciti_link::sink::{LogStatus, NullSink, StatusSink};
use simpliciti_link::{LinkConfig, Role, MAX_APP_PAYLOAD};

use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::{join_board, Deadline};

const WATCHES: usize = 2;

pub fn run(air: &SimAir, deadline: Deadline) -> Result<()> {
    let watches: Vec<_> = (0..WATCHES as u8)
        .map(|i| {
            let air = air.clone();
            thread::spawn(move || {
                // Stagger the watches so the first one joins first.
                thread::sleep(Duration::from_millis(1000 * i as u64));
                watch(air, 7 + i, deadline)
            })
        })
        .collect();

    let (change, presses) = std::sync::mpsc::sync_channel(1);
    let change_at = deadline.fraction(0.5);
    let finger = thread::spawn(move || -> Result<()> {
        thread::sleep(change_at.saturating_duration_since(Instant::now()));
        let _ = change.try_send(());
        Ok(())
    });

    access_point(air, presses, deadline)?;
    for (i, handle) in watches.into_iter().enumerate() {
        join_board(&format!("watch-{}", i), handle)?;
    }
    join_board("change-button", finger)
}

/// Watch following `current` in join order, wrapping around.
fn next_watch(current: Option<usize>, joined: usize) -> Option<usize> {
    match (current, joined) {
        (_, 0) => None,
        (None, _) => Some(0),
        (Some(index), n) => Some((index + 1) % n),
    }
}

fn access_point(air: &SimAir, change: Receiver<()>, deadline: Deadline) -> Result<()> {
    let clock = SysTickClock::default();
    let status = LogStatus { name: "chronos" };
    let mut config = LinkConfig::default();
    config.listen_attempts = Some(20);

    let sems = Arc::new(WorkSemaphores::new());
    let mut net = air.node(Role::AccessPoint);
    crate::provision(&mut net, 0)?;
    net.init(Some(sems.clone()))?;
    net.set_join_context(true)?;
    status.set_status(0, "Waiting for a watch.");

    let mut ap: AccessPoint<WatchState, WATCHES> = AccessPoint::new(&config);
    let mut dispatcher = Dispatcher::from_config(ChronosHandler::new(clock.tick_rate()), &config, &clock);
    let mut current: Option<usize> = None;
    let mut switched = false;
    let mut last_report = clock.ticks();
    let mut change_alive = true;

    while !deadline.passed() {
        if let JoinOutcome::Joined { index, link, .. } = ap.service_join(&mut net, &sems, clock.ticks(), &NullSink)? {
            if current.is_none() {
                info!("Watch on {} is now the current one", link);
                current = Some(index);
            } else {
                info!("Watch on {} joined, press change to select it", link);
            }
        }

        if change_alive {
            match change.try_recv() {
                Ok(()) => {
                    current = next_watch(current, ap.peers().len());
                    if let Some(slot) = current.and_then(|index| ap.peers().get(index)) {
                        info!("Switched to the watch on {}", slot.link);
                        status.set_status(0, "Waiting for a watch.");
                    }
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => change_alive = false,
            }
        }

        let now = clock.ticks();
        ap.service_frames(&mut net, &sems, now, |net, index, slot, msg| {
            if current != Some(index) {
                debug!("Ignoring frame from {}, not the current watch", slot.link);
                return;
            }
            if let Err(err) = dispatcher.dispatch(net, slot.link, msg, &mut slot.state, now) {
                warn!("Reply to {} failed: {}", slot.link, err);
            }
        })?;

        if let Some(slot) = current.and_then(|index| ap.peers_mut().get_mut(index)) {
            let watch = &mut slot.state;
            if watch.expire_buttons(now) {
                debug!("Buttons released");
            }
            if dispatcher.liveness_mut().take_expired(now) {
                watch.mode = WatchMode::Unknown;
                status.set_status(0, "Waiting for a watch.");
            }
            // Flip the unit format once, as soon as the time is known.
            if !switched && watch.status.year != 0 {
                dispatcher.handler_mut().request_format_switch();
                switched = true;
            }
            if dispatcher.liveness().is_alive(now) && clock.elapsed(last_report) >= clock.seconds(1) {
                last_report = now;
                report(&status, watch);
            }
        }
        clock.delay_ms(10);
    }
    Ok(())
}

fn report(status: &dyn StatusSink, watch: &WatchState) {
    let text = match watch.mode {
        WatchMode::Mouse => {
            let [x, y, z] = watch.relative_accel();
            format!("Mouse: x {} y {} z {} buttons {:#04x}", x, y, z, watch.buttons)
        }
        WatchMode::Key => format!("Keys: {:#04x}", watch.buttons),
        WatchMode::Sync => {
            let s = &watch.status;
            format!(
                "Sync: {:02}:{:02}:{:02} {}-{:02}-{:02} ({})",
                s.hours,
                s.minutes,
                s.seconds,
                s.year,
                s.month,
                s.day,
                if s.metric { "metric" } else { "imperial" }
            )
        }
        WatchMode::Unknown | WatchMode::Other(_) => return,
    };
    status.set_status(1, &text);
}

/// A watch: a few seconds of mouse mode, then sync mode, then silence.
fn watch(air: SimAir, board: u8, deadline: Deadline) -> Result<()> {
    let clock = SysTickClock::default();
    let config = LinkConfig::default();
    let sync_at = deadline.fraction(0.3);
    let silent_at = deadline.fraction(0.7);

    let mut net = air.node(Role::EndDevice);
    crate::provision(&mut net, board)?;
    join_network(&mut net, None, &clock, &NullSink, config.join_attempts, config.join_retry_delay_ms)?;
    let link = LinkSession::new(&config).link_to(&mut net, &clock, &NullSink)?;

    let mut status = [0u8; STATUS_PACKET_SIZE];
    status[1] = 0x80 | 9;
    status[2] = 41;
    status[4..6].copy_from_slice(&2010u16.to_be_bytes());
    status[6] = 6;
    status[7] = 21;
    status[10..12].copy_from_slice(&231i16.to_be_bytes());
    status[12..14].copy_from_slice(&412i16.to_be_bytes());

    let mut buf = [0u8; MAX_APP_PAYLOAD];
    let mut step = 0u8;
    while Instant::now() < sync_at {
        step = step.wrapping_add(1);
        // Mouse events, with the '#' button pressed now and then.
        let control = if step % 20 == 0 { 0x21 } else { 0x01 };
        let tilt = (step % 32) as i8 - 16;
        reliable::send(&mut net, link, &[control, tilt as u8, (-tilt) as u8, 50])?;
        clock.delay_ms(100);
    }

    info!("Watch {} switching to sync mode", board);
    while Instant::now() < silent_at {
        reliable::send(&mut net, link, &[0x00, 0x00])?;
        clock.delay_ms(200);
        let mut asked = false;
        reliable::drain(&mut net, link, &mut buf, |command| match command.first().copied() {
            Some(SYNC_AP_CMD_GET_STATUS) => asked = true,
            Some(SYNC_AP_CMD_SET_WATCH) if command.len() == STATUS_PACKET_SIZE => {
                status[1..].copy_from_slice(&command[1..]);
                info!("Watch updated, now in {} units", if status[1] & 0x80 != 0 { "metric" } else { "imperial" });
            }
            other => debug!("Watch ignored command {:?}", other),
        })?;
        if asked {
            reliable::send(&mut net, link, &status)?;
        }
        status[3] = (status[3] + 1) % 60;
        clock.delay_ms(300);
    }

    info!("Watch {} going quiet", board);
    Ok(())
}
