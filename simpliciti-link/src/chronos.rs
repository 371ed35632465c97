//! Messages exchanged with a Chronos sports watch, and the access point handler for them.
//!
//! The watch sends three kinds of payloads, told apart by length:
//! - 4 bytes, in mouse or key mode: a mode/button byte followed by three accelerometer axes,
//! - 19 bytes, in sync mode: the watch status (time, date, alarm, temperature, altitude),
//! - 2 bytes, in sync mode: "ready to receive", answered with a command.
use crate::dispatch::{Classify, Handler, Reply};

use log::debug;

pub const ACC_PACKET_SIZE: usize = 4;
pub const R2R_PACKET_SIZE: usize = 2;
pub const STATUS_PACKET_SIZE: usize = 19;

pub const SYNC_AP_CMD_GET_STATUS: u8 = 2;
pub const SYNC_AP_CMD_SET_WATCH: u8 = 3;

const EVENT_MASK: u8 = 0x0F;
const MOUSE_EVENTS: u8 = 0x01;
const KEY_EVENTS: u8 = 0x02;
const BUTTON_MASK: u8 = 0x30;
const BUTTON_SHIFT: u8 = 4;

/// Watch button bits, as reported in [WatchState::buttons].
pub const BUTTON_STAR: u8 = 0x02;
pub const BUTTON_NUM: u8 = 0x04;
pub const BUTTON_UP: u8 = 0x08;

/// Operating mode of the watch, as last reported.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum WatchMode {
    #[default]
    Unknown,
    /// Accelerometer and buttons.
    Mouse,
    /// Buttons only (presentation remote).
    Key,
    /// Time synchronisation.
    Sync,
    /// A mode nibble this receiver does not handle.
    Other(u8),
}

/// Time, date and sensor readings of the watch.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct WatchStatus {
    pub metric: bool,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub alarm_hours: u8,
    pub alarm_minutes: u8,
    pub temperature: i16,
    pub altitude: i16,
}

impl WatchStatus {
    fn parse(msg: &[u8; STATUS_PACKET_SIZE]) -> Self {
        Self {
            metric: msg[1] & 0x80 != 0,
            hours: msg[1] & 0x3F,
            minutes: msg[2],
            seconds: msg[3],
            year: u16::from_be_bytes([msg[4], msg[5]]),
            month: msg[6],
            day: msg[7],
            alarm_hours: msg[8],
            alarm_minutes: msg[9],
            temperature: i16::from_be_bytes([msg[10], msg[11]]),
            altitude: i16::from_be_bytes([msg[12], msg[13]]),
        }
    }

    /// `SET_WATCH` command restoring this status with the unit format flipped.
    pub fn set_watch_command(&self) -> [u8; STATUS_PACKET_SIZE] {
        let mut packet = [0u8; STATUS_PACKET_SIZE];
        packet[0] = SYNC_AP_CMD_SET_WATCH;
        packet[1] = (if self.metric { 0x00 } else { 0x80 }) | (self.hours & 0x7F);
        packet[2] = self.minutes;
        packet[3] = self.seconds;
        packet[4..6].copy_from_slice(&self.year.to_be_bytes());
        packet[6] = self.month;
        packet[7] = self.day;
        packet[8] = self.alarm_hours;
        packet[9] = self.alarm_minutes;
        packet[10..12].copy_from_slice(&self.temperature.to_be_bytes());
        packet[12..14].copy_from_slice(&self.altitude.to_be_bytes());
        packet
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChronosMessage {
    ReadyToReceive,
    Motion { control: u8, accel: [i8; 3] },
    Status(WatchStatus),
}

impl Classify for ChronosMessage {
    fn classify(payload: &[u8]) -> Option<Self> {
        match payload.len() {
            R2R_PACKET_SIZE => Some(ChronosMessage::ReadyToReceive),
            ACC_PACKET_SIZE => Some(ChronosMessage::Motion {
                control: payload[0],
                accel: [payload[1] as i8, payload[2] as i8, payload[3] as i8],
            }),
            STATUS_PACKET_SIZE => {
                let mut raw = [0u8; STATUS_PACKET_SIZE];
                raw.copy_from_slice(payload);
                Some(ChronosMessage::Status(WatchStatus::parse(&raw)))
            }
            _ => None,
        }
    }
}

/// Shadow state of one watch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WatchState {
    pub mode: WatchMode,
    /// Button pressed in the last motion packet, see the `BUTTON_*` bits.
    pub buttons: u8,
    /// Smoothed accelerometer readings.
    pub accel: [i16; 3],
    /// Readings taken as the origin by [WatchState::calibrate].
    pub accel_offset: [i16; 3],
    pub status: WatchStatus,
    buttons_clear_at: Option<u32>,
}

impl WatchState {
    /// Takes the current readings as the new origin.
    pub fn calibrate(&mut self) {
        self.accel_offset = self.accel;
    }

    pub fn relative_accel(&self) -> [i16; 3] {
        [
            self.accel[0] - self.accel_offset[0],
            self.accel[1] - self.accel_offset[1],
            self.accel[2] - self.accel_offset[2],
        ]
    }

    /// The watch never reports releases: pressed buttons are cleared after half a second.
    /// Returns `true` when the buttons were just cleared.
    pub fn expire_buttons(&mut self, now: u32) -> bool {
        match self.buttons_clear_at {
            Some(at) if now >= at => {
                self.buttons = 0;
                self.buttons_clear_at = None;
                true
            }
            _ => false,
        }
    }
}

/// Access point side of the watch protocol.
#[derive(Clone, Debug)]
pub struct ChronosHandler {
    tick_rate: u32,
    switch_format: bool,
}

impl ChronosHandler {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            tick_rate,
            switch_format: false,
        }
    }

    /// Asks for the unit format to be flipped on the next "ready to receive".
    pub fn request_format_switch(&mut self) {
        self.switch_format = true;
    }

    pub fn format_switch_pending(&self) -> bool {
        self.switch_format
    }

    fn motion(&self, control: u8, accel: [i8; 3], state: &mut WatchState, now: u32) {
        state.mode = match control & EVENT_MASK {
            MOUSE_EVENTS => WatchMode::Mouse,
            KEY_EVENTS => WatchMode::Key,
            other => WatchMode::Other(other),
        };
        if let WatchMode::Other(mode) = state.mode {
            debug!("Ignoring motion packet in mode {}", mode);
            return;
        }
        if control & BUTTON_MASK != 0 {
            state.buttons = 1 << ((control & BUTTON_MASK) >> BUTTON_SHIFT);
            state.buttons_clear_at = Some(now.wrapping_add(self.tick_rate / 2));
        }
        if state.mode == WatchMode::Mouse {
            for (axis, raw) in state.accel.iter_mut().zip(accel) {
                *axis = (*axis * 3) / 4 + (raw as i16) / 4;
            }
        }
    }
}

impl Handler for ChronosHandler {
    type Message = ChronosMessage;
    type State = WatchState;

    fn handle(&mut self, message: ChronosMessage, state: &mut WatchState, now: u32) -> Option<Reply> {
        match message {
            ChronosMessage::Motion { control, accel } => {
                self.motion(control, accel, state, now);
                None
            }
            ChronosMessage::Status(status) => {
                state.status = status;
                None
            }
            ChronosMessage::ReadyToReceive => {
                state.mode = WatchMode::Sync;
                if self.switch_format {
                    self.switch_format = false;
                    Reply::from_slice(&state.status.set_watch_command()).ok()
                } else {
                    Reply::from_slice(&[SYNC_AP_CMD_GET_STATUS, 0]).ok()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Dispatched, Dispatcher};
    use crate::sim::{Call, ScriptedNetwork};
    use crate::LinkId;

    fn status_packet() -> [u8; STATUS_PACKET_SIZE] {
        let mut msg = [0u8; STATUS_PACKET_SIZE];
        msg[1] = 0x80 | 13;
        msg[2] = 45;
        msg[3] = 30;
        msg[4..6].copy_from_slice(&2010u16.to_be_bytes());
        msg[6] = 3;
        msg[7] = 14;
        msg[8] = 7;
        msg[9] = 5;
        msg[10..12].copy_from_slice(&215i16.to_be_bytes());
        msg[12..14].copy_from_slice(&(-12i16).to_be_bytes());
        msg
    }

    #[test]
    fn status_packet_is_parsed() {
        let msg = status_packet();
        let status = match ChronosMessage::classify(&msg) {
            Some(ChronosMessage::Status(status)) => status,
            other => panic!("unexpected {:?}", other),
        };
        assert!(status.metric);
        assert_eq!((status.hours, status.minutes, status.seconds), (13, 45, 30));
        assert_eq!((status.year, status.month, status.day), (2010, 3, 14));
        assert_eq!((status.alarm_hours, status.alarm_minutes), (7, 5));
        assert_eq!((status.temperature, status.altitude), (215, -12));
    }

    #[test]
    fn other_lengths_are_not_chronos() {
        assert_eq!(ChronosMessage::classify(&[0; 3]), None);
        assert_eq!(ChronosMessage::classify(&[0; 20]), None);
    }

    #[test]
    fn mouse_packet_filters_and_reports_buttons() {
        let mut handler = ChronosHandler::new(10);
        let mut state = WatchState::default();
        state.accel = [40, -40, 8];
        let msg = ChronosMessage::Motion {
            control: 0x21,
            accel: [20, -20, -7],
        };
        assert_eq!(handler.handle(msg, &mut state, 100), None);
        assert_eq!(state.mode, WatchMode::Mouse);
        assert_eq!(state.buttons, BUTTON_NUM);
        // 40*3/4 + 20/4, -40*3/4 + -20/4, 8*3/4 + -7/4
        assert_eq!(state.accel, [35, -35, 5]);
        assert!(!state.expire_buttons(104));
        assert!(state.expire_buttons(105));
        assert_eq!(state.buttons, 0);
    }

    #[test]
    fn key_mode_keeps_accelerometer_untouched() {
        let mut handler = ChronosHandler::new(10);
        let mut state = WatchState::default();
        handler.handle(
            ChronosMessage::Motion {
                control: 0x12,
                accel: [100, 100, 100],
            },
            &mut state,
            0,
        );
        assert_eq!(state.mode, WatchMode::Key);
        assert_eq!(state.buttons, BUTTON_STAR);
        assert_eq!(state.accel, [0, 0, 0]);
    }

    #[test]
    fn unknown_mode_is_ignored() {
        let mut handler = ChronosHandler::new(10);
        let mut state = WatchState::default();
        handler.handle(
            ChronosMessage::Motion {
                control: 0x35,
                accel: [1, 1, 1],
            },
            &mut state,
            0,
        );
        assert_eq!(state.mode, WatchMode::Other(5));
        assert_eq!(state.buttons, 0);
    }

    #[test]
    fn ready_to_receive_asks_status_then_switches_format() {
        let mut net = ScriptedNetwork::new(4);
        let link = LinkId::new(1);
        let mut dispatcher = Dispatcher::new(ChronosHandler::new(10), 50);
        let mut state = WatchState::default();

        dispatcher.dispatch(&mut net, link, &status_packet(), &mut state, 0).unwrap();
        assert_eq!(dispatcher.dispatch(&mut net, link, &[0, 0], &mut state, 1).unwrap(), Dispatched::Replied);
        assert_eq!(state.mode, WatchMode::Sync);

        dispatcher.handler_mut().request_format_switch();
        dispatcher.dispatch(&mut net, link, &[0, 0], &mut state, 2).unwrap();
        assert!(!dispatcher.handler().format_switch_pending());

        let sent: Vec<Vec<u8>> = net
            .calls()
            .iter()
            .filter_map(|c| match c {
                Call::Send { payload, .. } => Some(payload.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(sent[0], vec![SYNC_AP_CMD_GET_STATUS, 0]);
        assert_eq!(sent[1].len(), STATUS_PACKET_SIZE);
        assert_eq!(sent[1][0], SYNC_AP_CMD_SET_WATCH);
        assert_eq!(sent[1][1], 13);
        assert_eq!(&sent[1][2..14], &status_packet()[2..14]);
    }
}
