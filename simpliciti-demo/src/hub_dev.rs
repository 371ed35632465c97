//! Hub end device: sleeps until its button is pressed, then asks the hub to toggle an LED.
use anyhow::Result;
use log::{info, warn};

use simpliciti_link::clock::SysTickClock;
use simpliciti_link::device::{Network, RadioAction};
use simpliciti_link::dispatch::LedCommand;
use simpliciti_link::reliable::{ReliableSender, SendError, TidCounter};
use simpliciti_link::session::{join_network, LinkSession};
use simpliciti_link::sim::SimAir;
use simpliciti_link::sink::{Indicator, VirtualLeds};
use simpliciti_link::{LinkConfig, Role};

use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::Deadline;

pub fn spawn(air: SimAir, board: u8, button: Receiver<()>, deadline: Deadline) -> JoinHandle<Result<()>> {
    thread::spawn(move || run(air, board, button, deadline))
}

/// Presses a button every `period` until the deadline.
pub fn spawn_finger(button: SyncSender<()>, period: Duration, deadline: Deadline) -> JoinHandle<Result<()>> {
    thread::spawn(move || {
        while !deadline.passed() {
            thread::sleep(period);
            if button.try_send(()).is_err() {
                warn!("Button press lost, the device is still busy");
            }
        }
        Ok(())
    })
}

fn run(air: SimAir, board: u8, button: Receiver<()>, deadline: Deadline) -> Result<()> {
    let clock = SysTickClock::default();
    let leds = VirtualLeds::new();
    let mut config = LinkConfig::default();
    config.link_attempts = None;

    let mut net = air.node(Role::EndDevice);
    crate::provision(&mut net, board)?;
    join_network(&mut net, None, &clock, &leds, config.join_attempts, config.join_retry_delay_ms)?;
    let mut session = LinkSession::new(&config);
    let link = session.link_to(&mut net, &clock, &leds)?;
    net.radio(RadioAction::Sleep)?;

    let sender = ReliableSender::from_config(&config);
    let mut tids = TidCounter::new();
    let indicator = if board % 2 == 1 { Indicator::Led1 } else { Indicator::Led2 };
    let mut sent = 0u32;

    loop {
        match button.recv_timeout(Duration::from_millis(500)) {
            Ok(()) => {
                let command = LedCommand {
                    indicator,
                    tid: tids.next_tid(),
                };
                net.radio(RadioAction::Awake)?;
                let started = Instant::now();
                match sender.send_acked(&mut net, link, &command.to_bytes()) {
                    Ok(report) => {
                        sent += 1;
                        info!(
                            "Board {}: tid {} acknowledged after {} attempts{} in {:?}",
                            board,
                            command.tid,
                            report.attempts,
                            if report.probed { " and a probe" } else { "" },
                            started.elapsed(),
                        );
                    }
                    // The hub is out of reach, the next press tries again.
                    Err(err @ SendError::NotAcknowledged { .. }) | Err(err @ SendError::ChannelBusy { .. }) => {
                        warn!("Board {}: {}", board, err)
                    }
                    Err(err) => return Err(err.into()),
                }
                net.radio(RadioAction::Sleep)?;
            }
            Err(RecvTimeoutError::Timeout) if !deadline.passed() => {}
            Err(_) => break,
        }
    }
    info!("Board {} done, {} commands acknowledged", board, sent);
    Ok(())
}
