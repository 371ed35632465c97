//! Access point and end devices talking over the simulated air, each on its own thread.
use simpliciti_link::access_point::AccessPoint;
use simpliciti_link::agility::{self, ScanOutcome};
use simpliciti_link::clock::ManualClock;
use simpliciti_link::device::{Network, TxOptions};
use simpliciti_link::dispatch::{Dispatcher, LedCommand, LedToggle};
use simpliciti_link::reliable::{self, ReliableSender, TidCounter, TidFilter};
use simpliciti_link::semaphore::WorkSemaphores;
use simpliciti_link::session::{join_network, LinkSession};
use simpliciti_link::sim::{SimAir, SimTiming};
use simpliciti_link::sink::{Indicator, NullSink, VirtualLeds};
use simpliciti_link::{DeviceAddress, LinkConfig, Role};

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const PRESSES: usize = 3;

fn fast() -> SimTiming {
    SimTiming {
        link_window: Duration::from_millis(300),
        listen_window: Duration::from_millis(300),
        step: Duration::from_millis(1),
    }
}

#[test]
fn hub_access_point_toggles_for_two_end_devices() {
    let air = SimAir::with_timing(4, fast());
    let mut config = LinkConfig::default();
    config.listen_attempts = Some(50);

    let sems = Arc::new(WorkSemaphores::new());
    let mut ap_net = air.node(Role::AccessPoint);
    ap_net.set_address(DeviceAddress::new([0x01, 0x02, 0x03, 0x04]).unwrap()).unwrap();
    ap_net.init(Some(sems.clone())).unwrap();
    ap_net.set_join_context(true).unwrap();

    let devices: Vec<_> = (0..2u8)
        .map(|i| {
            let mut ed = air.node(Role::EndDevice);
            let config = config.clone();
            thread::spawn(move || {
                let clock = ManualClock::default();
                ed.set_address(DeviceAddress::new([0x10 + i, 0x20, 0x30, 0x40]).unwrap()).unwrap();
                join_network(&mut ed, None, &clock, &NullSink, Some(5), 10).unwrap();
                let mut session = LinkSession::new(&config);
                let link = session.link_to(&mut ed, &clock, &NullSink).unwrap();
                let sender = ReliableSender::from_config(&config);
                let mut tids = TidCounter::new();
                let indicator = if i == 0 { Indicator::Led1 } else { Indicator::Led2 };
                for _ in 0..PRESSES {
                    let command = LedCommand {
                        indicator,
                        tid: tids.next_tid(),
                    };
                    sender.send_acked(&mut ed, link, &command.to_bytes()).unwrap();
                }
            })
        })
        .collect();

    let leds = VirtualLeds::new();
    let mut ap: AccessPoint<TidFilter, 4> = AccessPoint::new(&config);
    let mut dispatcher = Dispatcher::new(LedToggle::new(&leds), 50);
    let deadline = Instant::now() + Duration::from_secs(20);
    while leds.toggles(Indicator::Led1) + leds.toggles(Indicator::Led2) < 2 * PRESSES as u32 {
        assert!(Instant::now() < deadline, "access point starved");
        ap.service_join(&mut ap_net, &sems, 0, &NullSink).unwrap();
        ap.service_frames(&mut ap_net, &sems, 0, |net, _, slot, msg| {
            let _ = dispatcher.dispatch(net, slot.link, msg, &mut slot.state, 0);
        })
        .unwrap();
        thread::sleep(Duration::from_millis(1));
    }
    for device in devices {
        device.join().unwrap();
    }

    assert_eq!(ap.peers().len(), 2);
    assert_eq!(leds.toggles(Indicator::Led1), PRESSES as u32);
    assert_eq!(leds.toggles(Indicator::Led2), PRESSES as u32);
}

#[test]
fn jammed_access_point_hops_and_end_device_follows() {
    let air = SimAir::with_timing(4, fast());
    let config = LinkConfig::default();
    let sems = Arc::new(WorkSemaphores::new());
    let mut ap_net = air.node(Role::Peer);
    ap_net.init(Some(sems.clone())).unwrap();
    let mut ed = air.node(Role::Peer);
    ed.init(None).unwrap();

    let talker = thread::spawn(move || {
        let link = ed.link().unwrap();
        (ed, link)
    });
    let ap_link = ap_net.link_listen().unwrap();
    let (mut ed, link) = talker.join().unwrap();

    air.set_noise(0, -50);
    let clock = ManualClock::default();
    let leds = VirtualLeds::new();
    let mut policy = agility::from_config(&config);
    let outcome = policy
        .check_change_channel(&mut ap_net, &clock, &leds, &sems)
        .unwrap();
    assert_eq!(outcome, ScanOutcome::Changed(1));
    assert!(sems.is_blinking());

    let sender = ReliableSender::from_config(&config);
    let report = sender.send_acked(&mut ed, link, &[1, 1]).unwrap();
    assert!(report.probed);
    assert_eq!(ed.logical_channel(), 1);

    let mut buf = [0u8; 8];
    assert_eq!(ap_net.receive(ap_link, &mut buf), Ok(2));
    assert!(!sems.is_blinking());
}

#[test]
fn burst_beyond_the_inbox_leaves_agility_free_to_hop() {
    let air = SimAir::with_timing(4, fast());
    let config = LinkConfig::default();
    let sems = Arc::new(WorkSemaphores::new());
    let mut ap_net = air.node(Role::Peer);
    ap_net.init(Some(sems.clone())).unwrap();
    let mut ed = air.node(Role::Peer);
    ed.init(None).unwrap();

    let talker = thread::spawn(move || {
        let link = ed.link().unwrap();
        for i in 0..11u8 {
            ed.send(link, &[i], TxOptions::empty()).unwrap();
        }
    });
    let ap_link = ap_net.link_listen().unwrap();
    talker.join().unwrap();

    let mut buf = [0u8; 8];
    let mut kept = Vec::new();
    let drained = reliable::drain(&mut ap_net, ap_link, &mut buf, |payload| kept.push(payload[0])).unwrap();
    for _ in 0..drained {
        sems.take_frame();
    }
    assert_eq!(kept.last(), Some(&10));
    assert!(!sems.any_pending());

    air.set_noise(0, -50);
    let clock = ManualClock::default();
    let mut policy = agility::from_config(&config);
    let outcome = policy
        .check_change_channel(&mut ap_net, &clock, &VirtualLeds::new(), &sems)
        .unwrap();
    assert_eq!(outcome, ScanOutcome::Changed(1));
}
