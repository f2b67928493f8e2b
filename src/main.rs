//! # PostOS Demo Firmware
//!
//! Three processes exercising the kernel API:
//!
//! | Process    | pid | Priority | Behavior |
//! |------------|-----|----------|----------|
//! | `clock`    | 11  | HIGH     | Wakes itself once per second with `delayed_send` and logs the time |
//! | `producer` | 1   | MEDIUM   | Sends a numbered block to the consumer, then sleeps 250 ticks |
//! | `consumer` | 2   | LOW      | Receives blocks, logs their contents, releases them |
//!
//! On the LPC1768 (`target_os = "none"`) SysTick drives the tick at 1 kHz
//! and the firmware runs forever. On a host the same processes run on the
//! hosted port, with a lowest-priority `ticker` process standing in for
//! SysTick; the simulation stops after a fixed number of ticks.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

use postos::arch::Port;
use postos::config::{PID_CLOCK, PID_USER_FIRST, TICK_HZ};
use postos::{Kernel, KernelError, Pid, Priority, ProcInit};

const PID_PRODUCER: Pid = PID_USER_FIRST;
const PID_CONSUMER: Pid = PID_USER_FIRST + 1;

/// Ticks between two produced items.
const PRODUCE_PERIOD: u32 = 250;

// ---------------------------------------------------------------------------
// Processes
// ---------------------------------------------------------------------------

/// Block the caller for `ticks` by sending itself a delayed message.
fn sleep<P: Port>(k: &'static Kernel<P>, me: Pid, ticks: u32) -> Result<(), KernelError> {
    let block = k.request_memory_block()?;
    k.delayed_send(me, block, ticks)?;
    let wake = k.receive()?;
    k.release_memory_block(wake.payload)
}

/// Wall clock service. One block circulates through the timer forever.
fn clock<P: Port>(k: &'static Kernel<P>) {
    let mut block = match k.request_memory_block() {
        Ok(block) => block,
        Err(e) => {
            log::error!("clock: no block: {}", e);
            return;
        }
    };
    let mut seconds: u32 = 0;
    loop {
        if let Err(e) = k.delayed_send(PID_CLOCK, block, TICK_HZ) {
            log::error!("clock: {}", e);
            return;
        }
        match k.receive() {
            Ok(msg) => block = msg.payload,
            Err(e) => {
                log::error!("clock: {}", e);
                return;
            }
        }
        seconds += 1;
        log::info!(
            "clock {:02}:{:02}:{:02}",
            seconds / 3600 % 24,
            seconds / 60 % 60,
            seconds % 60
        );
    }
}

fn produce<P: Port>(k: &'static Kernel<P>, item: u32) -> Result<(), KernelError> {
    let block = k.request_memory_block()?;
    k.write_block(block, 0, &item.to_le_bytes())?;
    k.send(PID_CONSUMER, block)?;
    sleep(k, PID_PRODUCER, PRODUCE_PERIOD)
}

fn producer<P: Port>(k: &'static Kernel<P>) {
    for item in 0u32.. {
        if let Err(e) = produce(k, item) {
            log::error!("producer: {}", e);
            return;
        }
    }
}

fn consume<P: Port>(k: &'static Kernel<P>) -> Result<(), KernelError> {
    let msg = k.receive()?;
    let mut item = [0u8; 4];
    k.read_block(msg.payload, 0, &mut item)?;
    log::info!(
        "tick {}: item {} from pid {}",
        k.ticks(),
        u32::from_le_bytes(item),
        msg.sender
    );
    k.release_memory_block(msg.payload)
}

fn consumer<P: Port>(k: &'static Kernel<P>) {
    loop {
        if let Err(e) = consume(k) {
            log::error!("consumer: {}", e);
            return;
        }
    }
}

/// Register the demo processes.
fn register<P: Port>(k: &'static Kernel<P>) -> Result<(), KernelError> {
    k.create_process(ProcInit {
        pid: PID_CLOCK,
        priority: Priority::HIGH,
        entry: clock::<P>,
    })?;
    k.create_process(ProcInit {
        pid: PID_PRODUCER,
        priority: Priority::MEDIUM,
        entry: producer::<P>,
    })?;
    k.create_process(ProcInit {
        pid: PID_CONSUMER,
        priority: Priority::LOW,
        entry: consumer::<P>,
    })
}

// ---------------------------------------------------------------------------
// LPC1768 firmware
// ---------------------------------------------------------------------------

#[cfg(target_os = "none")]
use cortex_m_rt::{entry, exception};
#[cfg(target_os = "none")]
use panic_halt as _;
#[cfg(target_os = "none")]
use postos::arch::cortex_m3::CortexM3;

#[cfg(target_os = "none")]
static KERNEL: Kernel<CortexM3> = Kernel::new(CortexM3::new());

/// Firmware entry point. Registers the processes, starts SysTick and
/// launches the kernel. Does not return.
#[cfg(target_os = "none")]
#[entry]
fn main() -> ! {
    if let Some(mut cp) = cortex_m::Peripherals::take() {
        if register(&KERNEL).is_ok() {
            CortexM3::set_interrupt_priorities();
            CortexM3::configure_systick(&mut cp.SYST);
            let _ = KERNEL.start();
        }
    }
    loop {
        cortex_m::asm::wfi();
    }
}

#[cfg(target_os = "none")]
#[exception]
fn SysTick() {
    KERNEL.handle_tick();
}

// ---------------------------------------------------------------------------
// Host simulation
// ---------------------------------------------------------------------------

#[cfg(all(not(target_os = "none"), feature = "std"))]
mod host {
    use super::*;
    use postos::arch::hosted::Hosted;
    use postos::config::PID_USER_LAST;

    /// Simulated run time.
    const HOST_TICKS: u32 = 5 * TICK_HZ;

    const PID_TICKER: Pid = PID_USER_LAST;

    /// Stands in for SysTick. Returning ends the simulation.
    fn ticker(k: &'static Kernel<Hosted>) {
        for _ in 0..HOST_TICKS {
            k.handle_tick();
            if k.release_processor().is_err() {
                return;
            }
        }
        log::info!(
            "simulated {} ticks, {} context switches",
            k.ticks(),
            k.context_switches()
        );
    }

    pub fn run() -> Result<(), KernelError> {
        let k: &'static Kernel<Hosted> = Box::leak(Box::new(Kernel::new(Hosted::new())));
        register(k)?;
        k.create_process(ProcInit {
            pid: PID_TICKER,
            priority: Priority::LOWEST,
            entry: ticker,
        })?;
        k.start()
    }
}

#[cfg(all(not(target_os = "none"), feature = "std"))]
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = host::run() {
        log::error!("simulation failed to boot: {}", e);
        std::process::exit(1);
    }
}

#[cfg(all(not(target_os = "none"), not(feature = "std")))]
fn main() {
    eprintln!("the host simulation needs the `std` feature");
}
