//! Alarm cascade between peers, without access point or links.
//!
//! Every board wakes up every few seconds and listens to the broadcast port for a while. A
//! board that raised the alarm itself, or heard it from someone else, repeats it until the end
//! of the run.
use anyhow::Result;
use log::{debug, info};

use simpliciti_link::clock::{Clock, SysTickClock};
use simpliciti_link::device::{Network, RadioAction};
use simpliciti_link::reliable;
use simpliciti_link::sim::{SimAir, SimNetwork};
use simpliciti_link::sink::{IndicatorSink, VirtualLeds};
use simpliciti_link::{LinkId, Role, MAX_APP_PAYLOAD};

use std::thread;
use std::time::Instant;

use crate::{join_board, Deadline};

pub const BAD_NEWS: u8 = 1;

const BOARDS: u8 = 3;
const MONITOR_PERIOD_SECS: u32 = 5;
const MONITOR_WINDOW_MS: u32 = 250;
const BABBLE_PERIOD_MS: u32 = 100;

pub fn run(air: &SimAir, deadline: Deadline) -> Result<()> {
    // The first board smells smoke a third of the way in.
    let smoke_at = deadline.fraction(1.0 / 3.0);
    let boards: Vec<_> = (0..BOARDS)
        .map(|board| {
            let net = air.node(Role::Peer);
            let alarm_at = (board == 0).then_some(smoke_at);
            thread::spawn(move || Board::new(net, board).run(alarm_at, deadline))
        })
        .collect();
    for (board, handle) in boards.into_iter().enumerate() {
        join_board(&format!("cascade-{}", board), handle)?;
    }
    Ok(())
}

struct Board {
    net: SimNetwork,
    id: u8,
    clock: SysTickClock,
    leds: VirtualLeds,
}

impl Board {
    fn new(net: SimNetwork, id: u8) -> Self {
        Self {
            net,
            id,
            clock: SysTickClock::default(),
            leds: VirtualLeds::new(),
        }
    }

    fn run(mut self, alarm_at: Option<Instant>, deadline: Deadline) -> Result<()> {
        crate::provision(&mut self.net, 10 + self.id)?;
        self.net.init(None)?;
        self.net.radio(RadioAction::Sleep)?;

        let mut last_monitor = self.clock.ticks();
        let mut alarmed = false;
        while !deadline.passed() {
            if alarm_at.map_or(false, |at| Instant::now() >= at) && !alarmed {
                info!("Board {} raises the alarm", self.id);
                alarmed = true;
            }
            if !alarmed && self.clock.elapsed(last_monitor) >= self.clock.seconds(MONITOR_PERIOD_SECS) {
                last_monitor = self.clock.ticks();
                if self.monitor()? {
                    info!("Board {} heard the alarm, passing it on", self.id);
                    alarmed = true;
                }
            }
            if alarmed {
                self.babble()?;
                self.clock.delay_ms(BABBLE_PERIOD_MS);
            } else {
                self.clock.delay_ms(MONITOR_WINDOW_MS);
            }
        }
        Ok(())
    }

    /// Listens to the broadcast port for a short window, returning whether bad news came in.
    fn monitor(&mut self) -> Result<bool> {
        self.net.radio(RadioAction::RxOn)?;
        self.clock.delay_ms(MONITOR_WINDOW_MS);
        self.net.radio(RadioAction::RxIdle)?;

        let mut bad_news = false;
        let mut buf = [0u8; MAX_APP_PAYLOAD];
        let heard = reliable::drain(&mut self.net, LinkId::UUD, &mut buf, |payload| {
            bad_news |= payload.first() == Some(&BAD_NEWS);
        })?;
        debug!("Board {} monitored {} broadcasts", self.id, heard);
        self.net.radio(RadioAction::Sleep)?;
        Ok(bad_news)
    }

    fn babble(&mut self) -> Result<()> {
        self.net.radio(RadioAction::Awake)?;
        reliable::send(&mut self.net, LinkId::UUD, &[BAD_NEWS])?;
        self.net.radio(RadioAction::Sleep)?;
        self.leds.toggle_both();
        Ok(())
    }
}
