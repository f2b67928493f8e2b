//! # PostOS Configuration
//!
//! Compile-time constants governing the process table, the memory pools,
//! and the tick source. All limits are fixed at compile time; there is no dynamic
//! allocation.

use crate::process::Pid;

// ---------------------------------------------------------------------------
// Process table
// ---------------------------------------------------------------------------

/// Number of process control blocks. Every kernel, system, and user
/// process owns one slot, indexed by pid.
pub const NUM_PROCS: usize = 16;

/// Number of priority levels. Level 0 is the most urgent; the last level
/// is reserved for the idle process.
pub const NUM_PRIORITIES: usize = 5;

/// The idle (null) process. Always runnable at the idle level.
pub const PID_NULL: Pid = 0;

/// First and last pid of the user process range.
pub const PID_USER_FIRST: Pid = 1;
pub const PID_USER_LAST: Pid = 6;

/// System service processes.
pub const PID_A: Pid = 7;
pub const PID_B: Pid = 8;
pub const PID_C: Pid = 9;
pub const PID_SET_PRIO: Pid = 10;
pub const PID_CLOCK: Pid = 11;
pub const PID_KCD: Pid = 12;
pub const PID_CRT: Pid = 13;

/// Privileged interrupt-context processes. They run inside interrupt
/// handlers and must never block.
pub const PID_TIMER_IPROC: Pid = 14;
pub const PID_UART_IPROC: Pid = 15;

/// Returns `true` for the pids reserved to interrupt-context processes.
#[inline]
pub const fn is_privileged(pid: Pid) -> bool {
    pid == PID_TIMER_IPROC || pid == PID_UART_IPROC
}

// ---------------------------------------------------------------------------
// Memory pools
// ---------------------------------------------------------------------------

/// Number of blocks in each pool.
pub const NUM_MEM_BLOCKS: usize = 40;

/// Size in bytes of one general-purpose memory block.
pub const MEM_BLOCK_SIZE: usize = 128;

/// Number of message envelopes.
pub const NUM_ENVELOPES: usize = NUM_MEM_BLOCKS;

// ---------------------------------------------------------------------------
// Tick source and stacks
// ---------------------------------------------------------------------------

/// SysTick frequency in Hz. One tick is the unit of `delayed_send` delays.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (LPC1768 running from the 100 MHz PLL).
pub const SYSTEM_CLOCK_HZ: u32 = 100_000_000;

/// Per-process stack size in bytes on the Cortex-M port. Must hold the
/// deepest call chain plus the hardware exception frame (32 bytes) and
/// the software-saved R4–R11 (32 bytes).
pub const STACK_SIZE: usize = 512;

/// Number of consecutive idle dispatches after which the hosted port
/// reports a simulation that can no longer make progress.
pub const HOSTED_IDLE_LIMIT: u32 = 100_000;
