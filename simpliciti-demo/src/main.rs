use anyhow::{anyhow, bail, Context, Result};
use log::info;

use simpliciti_link::address::{set_device_address, AddressSource, MacAddress};
use simpliciti_link::device::Network;
use simpliciti_link::sim::SimAir;

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

mod cascade;
mod chronos_ap;
mod hub_ap;
mod hub_dev;
mod polling;

/// Logical channels of the simulated frequency table.
const CHANNELS: u8 = 4;
const DEFAULT_RUN_SECS: u64 = 30;

const USAGE: &str = "usage: simpliciti-demo [hub|polling|cascade|chronos] [seconds]";

/// End of the run, shared by every simulated board.
#[derive(Copy, Clone, Debug)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(run: Duration) -> Self {
        Deadline(Instant::now() + run)
    }

    pub fn passed(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Instant `fraction` of the way from now to the deadline.
    pub fn fraction(&self, fraction: f32) -> Instant {
        let left = self.0.saturating_duration_since(Instant::now());
        Instant::now() + left.mul_f32(fraction)
    }
}

/// Gives a simulated board its address, derived from a made up MAC.
pub fn provision<N: Network + ?Sized>(net: &mut N, board: u8) -> Result<()> {
    let mac = MacAddress([0x00, 0x12, 0x4B, 0x10 + board, 0x20 + board, 0x30 + board]);
    set_device_address(net, AddressSource::Hardware(&mac))
        .with_context(|| format!("Board {} has no address", board))?;
    Ok(())
}

/// Waits for a board thread, turning a panic into an error.
pub fn join_board(name: &str, handle: JoinHandle<Result<()>>) -> Result<()> {
    handle
        .join()
        .map_err(|_| anyhow!("Board {} panicked.", name))?
        .with_context(|| format!("Board {} failed", name))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let scenario = args.next().unwrap_or_else(|| "hub".to_owned());
    let seconds = match args.next() {
        Some(arg) => arg
            .parse::<u64>()
            .with_context(|| format!("Invalid run time: {}\n{}", arg, USAGE))?,
        None => DEFAULT_RUN_SECS,
    };

    let air = SimAir::new(CHANNELS);
    let deadline = Deadline::after(Duration::from_secs(seconds));
    info!("Running the {} scenario for {}s", scenario, seconds);

    match scenario.as_str() {
        "hub" => hub(&air, deadline)?,
        "polling" => polling::run(&air, deadline)?,
        "cascade" => cascade::run(&air, deadline)?,
        "chronos" => chronos_ap::run(&air, deadline)?,
        other => bail!("Unknown scenario: {}\n{}", other, USAGE),
    }

    println!("Stopping!");
    Ok(())
}

/// One hub access point and two button-driven end devices. A third of the way in, the home
/// channel gets jammed; two thirds in, the access point button forces another hop.
fn hub(air: &SimAir, deadline: Deadline) -> Result<()> {
    let mut handles = Vec::new();
    let (ap_button, ap_presses) = std::sync::mpsc::sync_channel(1);

    for board in 1..=2u8 {
        let (button, presses) = std::sync::mpsc::sync_channel(4);
        handles.push((
            format!("finger-{}", board),
            hub_dev::spawn_finger(button, Duration::from_millis(1500 + 700 * board as u64), deadline),
        ));
        handles.push((
            format!("ed-{}", board),
            hub_dev::spawn(air.clone(), board, presses, deadline),
        ));
    }

    let jam_at = deadline.fraction(1.0 / 3.0);
    let hop_at = deadline.fraction(2.0 / 3.0);
    let jammer = {
        let air = air.clone();
        std::thread::spawn(move || -> Result<()> {
            std::thread::sleep(jam_at.saturating_duration_since(Instant::now()));
            if !deadline.passed() {
                info!("Jamming channel 0");
                air.set_noise(0, -40);
            }
            std::thread::sleep(hop_at.saturating_duration_since(Instant::now()));
            // The access point may be slow to pick the press up, that's fine.
            let _ = ap_button.try_send(());
            Ok(())
        })
    };
    handles.push(("jammer".to_owned(), jammer));

    hub_ap::run(air, ap_presses, deadline)?;
    for (name, handle) in handles {
        join_board(&name, handle)?;
    }
    Ok(())
}
