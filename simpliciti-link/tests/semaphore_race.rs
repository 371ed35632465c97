//! Receive callbacks firing from another thread while the main loop drains the counters.
use simpliciti_link::device::RxClient;
use simpliciti_link::semaphore::WorkSemaphores;
use simpliciti_link::LinkId;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

const BURSTS: usize = 50;
const BURST_LEN: usize = 4;

#[test]
fn counters_never_give_more_than_they_got() {
    for _ in 0..20 {
        let sems = Arc::new(WorkSemaphores::new());
        let done = Arc::new(AtomicBool::new(false));

        let isr = {
            let sems = sems.clone();
            let done = done.clone();
            thread::spawn(move || {
                for burst in 0..BURSTS {
                    for _ in 0..BURST_LEN {
                        sems.frame_received(LinkId::new(1));
                    }
                    if burst % 5 == 0 {
                        sems.frame_received(LinkId::UNCONNECTED);
                    }
                    thread::yield_now();
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let mut frames = 0usize;
        let mut joins = 0usize;
        loop {
            let finished = done.load(Ordering::SeqCst);
            while sems.take_frame() {
                frames += 1;
            }
            while sems.take_join() {
                joins += 1;
            }
            assert!(frames <= BURSTS * BURST_LEN);
            assert!(joins <= BURSTS / 5);
            if finished {
                break;
            }
            thread::yield_now();
        }
        isr.join().unwrap();

        while sems.take_frame() {
            frames += 1;
        }
        while sems.take_join() {
            joins += 1;
        }
        assert_eq!(frames, BURSTS * BURST_LEN);
        assert_eq!(joins, BURSTS / 5);
        assert_eq!(sems.pending_frames(), 0);
        assert!(!sems.take_frame());
    }
}

#[test]
fn frame_callback_stops_the_blink() {
    let sems = WorkSemaphores::new();
    sems.start_blink();
    assert!(!sems.frame_received(LinkId::new(2)));
    assert!(!sems.is_blinking());
    assert_eq!(sems.pending_frames(), 1);

    sems.start_blink();
    sems.frame_received(LinkId::UNCONNECTED);
    assert!(sems.is_blinking());
}
