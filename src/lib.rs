//! # PostOS: Priority-Based Message-Passing RTOS
//!
//! A preemptive, priority-based, message-passing real-time kernel for
//! single-core microcontrollers (NXP LPC17xx, ARM Cortex-M3).
//!
//! ## Overview
//!
//! Processes are statically registered at boot and communicate only by
//! sending memory blocks to each other's mailboxes. The kernel provides:
//!
//! - **Two fixed-block pools**: general-purpose memory blocks and message
//!   envelopes. Exhaustion blocks an ordinary caller until a release
//! - **Five priority levels** with FIFO order inside a level. Level 4 is
//!   reserved for the idle process, which is always ready
//! - **Mailboxes** with blocking and non-blocking receive
//! - **Delayed delivery** driven by the periodic tick
//! - **Interrupt-context processes** (timer, UART) that never block
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │               Processes (user / system)                │
//! ├────────────────────────────────────────────────────────┤
//! │                Kernel API (kernel.rs)                  │
//! │   allocate · release · send · receive · delayed_send   │
//! │   release_processor · set/get_priority · handle_tick   │
//! ├──────────────┬──────────────┬──────────────────────────┤
//! │  Scheduler   │  Block pools │  Mailboxes / Delay queue │
//! │ scheduler.rs │  memory.rs   │  message.rs · timer.rs   │
//! │  queue.rs    │              │                          │
//! ├──────────────┴──────────────┴──────────────────────────┤
//! │      Process table (process.rs) · Guard (sync.rs)      │
//! ├────────────────────────────────────────────────────────┤
//! │     Port layer (arch/cortex_m3.rs · arch/hosted.rs)    │
//! │     PendSV switch · SysTick · thread baton (host)      │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Process Space
//!
//! | pid    | Role                                   | Priority |
//! |--------|----------------------------------------|----------|
//! | 0      | idle                                   | 4        |
//! | 1–6    | user processes                         | 0–3      |
//! | 7–13   | system services                        | 0–3      |
//! | 14     | timer i-process (interrupt context)    | —        |
//! | 15     | UART i-process (interrupt context)     | —        |
//!
//! ## Memory Model
//!
//! - **No heap**: all kernel state lives in one [`kernel::Kernel`] value,
//!   usually a `static`
//! - **Fixed-size tables**: `[Pcb; NUM_PROCS]`, two `BlockPool`s
//! - **Index-linked lists**: mailboxes and the delay queue link envelopes
//!   by pool index, never by pointer
//! - **Guarded sections**: every access to shared state masks interrupts
//!   through [`sync::AtomicGuard`]
//!
//! ## Features
//!
//! - `std` (default): the hosted port, used by the tests and the host
//!   simulation. Firmware builds use `--no-default-features`.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod arch;
pub mod config;
pub mod error;
pub mod kernel;
pub mod memory;
pub mod message;
pub mod process;
pub mod queue;
pub mod scheduler;
pub mod sync;
pub mod timer;

pub use error::KernelError;
pub use kernel::Kernel;
pub use memory::{BlockAddr, PoolKind};
pub use message::Message;
pub use process::{Pid, Priority, ProcInit, ProcState};
