//! # Cortex-M3 Port Layer
//!
//! Hardware-specific code for the NXP LPC17xx (ARM Cortex-M3, Thumb-2).
//! Implements context switching via PendSV, SysTick configuration, and
//! interrupt masking for the atomic section guard.
//!
//! ## Context Switch Mechanism
//!
//! Processes run in Thread mode on the process stack (PSP). On exception
//! entry the hardware stacks R0–R3, R12, LR, PC, and xPSR onto the process
//! stack; the PendSV handler saves and restores R4–R11 by hand, so a saved
//! context is nothing more than the process stack pointer.
//!
//! `switch_context` records the two context slots and pends PendSV. The
//! caller is outside any atomic section, so PendSV fires right away; when
//! the old process is dispatched again it resumes just after the pend.
//!
//! ## Interrupt Priorities
//!
//! SysTick and PendSV both run at the lowest priority, so a context switch
//! never preempts a device interrupt handler.

use core::arch::{asm, naked_asm};
use core::ptr;

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SCB;

use crate::config::{NUM_PROCS, STACK_SIZE, SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::process::{Pid, ProcEntry};
use crate::sync::InterruptMask;

use super::Port;

/// Initial xPSR of a new process: only the Thumb bit set.
const INITIAL_XPSR: u32 = 0x0100_0000;

const STACK_WORDS: usize = STACK_SIZE / 8;

/// Per-process stacks, 8-byte aligned as required by AAPCS.
static mut STACKS: [[u64; STACK_WORDS]; NUM_PROCS] = [[0; STACK_WORDS]; NUM_PROCS];

/// Context slots of the pending switch, consumed by PendSV.
static mut SWITCH_FROM: *mut ArmContext = ptr::null_mut();
static mut SWITCH_TO: *const ArmContext = ptr::null();

/// Saved process stack pointer.
#[derive(Debug, Clone, Copy)]
pub struct ArmContext {
    sp: *mut u32,
}

// Safety: the pointer always points into the owning process's stack in
// `STACKS` and is only touched by the kernel and PendSV.
unsafe impl Send for ArmContext {}

/// The Cortex-M3 port.
pub struct CortexM3;

impl CortexM3 {
    pub const fn new() -> Self {
        CortexM3
    }

    /// Configure SysTick to fire at `TICK_HZ` from the processor clock.
    /// Each tick enters `SysTick`, which calls `Kernel::handle_tick`.
    pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
        let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
        syst.set_reload(reload);
        syst.clear_current();
        syst.set_clock_source(SystClkSource::Core);
        syst.enable_counter();
        syst.enable_interrupt();
    }

    /// Set PendSV and SysTick to the lowest interrupt priority.
    pub fn set_interrupt_priorities() {
        unsafe {
            // System Handler Priority Register 3 (SHPR3): 0xE000_ED20
            // Bits [23:16] = PendSV priority
            // Bits [31:24] = SysTick priority
            let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
            let val = ptr::read_volatile(shpr3);
            ptr::write_volatile(shpr3, val | (0xFF << 16) | (0xFF << 24));
        }
    }
}

impl Default for CortexM3 {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptMask for CortexM3 {
    #[inline]
    fn mask_interrupts(&self) {
        cortex_m::interrupt::disable();
    }

    #[inline]
    fn unmask_interrupts(&self) {
        unsafe { cortex_m::interrupt::enable() };
    }
}

impl Port for CortexM3 {
    type Context = ArmContext;

    const INITIAL_CONTEXT: ArmContext = ArmContext {
        sp: ptr::null_mut(),
    };

    /// Build the initial stack frame of a process.
    ///
    /// ## Stack Layout (top = high address, growing down)
    ///
    /// ```text
    /// [Hardware stacked frame]
    ///   xPSR  (Thumb bit set)
    ///   PC    (process_entry)
    ///   LR    (process_exit)
    ///   R12   (0)
    ///   R3    (0)
    ///   R2    (0)
    ///   R1    (entry)
    ///   R0    (kernel)
    /// [Software saved context]
    ///   R11..R4 (0)            <- saved sp
    /// ```
    fn initial_context<K: Sync + 'static>(
        &self,
        pid: Pid,
        entry: ProcEntry<K>,
        kernel: &'static K,
    ) -> ArmContext {
        let stack = unsafe { ptr::addr_of_mut!(STACKS[pid]) } as usize;
        let top = (stack + STACK_SIZE) & !0x07;
        let frame = (top - 16 * 4) as *mut u32;

        unsafe {
            for i in 0..8 {
                *frame.add(i) = 0; // R4–R11
            }
            *frame.add(8) = kernel as *const K as u32; // R0
            *frame.add(9) = entry as usize as u32; // R1
            *frame.add(10) = 0; // R2
            *frame.add(11) = 0; // R3
            *frame.add(12) = 0; // R12
            *frame.add(13) = process_exit as usize as u32; // LR
            *frame.add(14) = (process_entry::<K> as usize as u32) & !1; // PC
            *frame.add(15) = INITIAL_XPSR;
        }

        ArmContext { sp: frame }
    }

    unsafe fn switch_context(&self, from: (Pid, *mut ArmContext), to: (Pid, *const ArmContext)) {
        SWITCH_FROM = from.1;
        SWITCH_TO = to.1;
        SCB::set_pendsv();
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }

    unsafe fn launch(&self, _pid: Pid, context: *const ArmContext) {
        start_first_process((*context).sp);
    }

    /// Sleep until the next interrupt; the tick may have readied someone.
    fn idle(&self) {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// Process entry and exit
// ---------------------------------------------------------------------------

/// First code a process executes: R0 holds the kernel, R1 the entry point.
extern "C" fn process_entry<K: Sync + 'static>(kernel: &'static K, entry: ProcEntry<K>) -> ! {
    entry(kernel);
    process_exit()
}

/// Processes never return; park one that does.
extern "C" fn process_exit() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// First process launch
// ---------------------------------------------------------------------------

/// Switch Thread mode to PSP and branch into the first process.
///
/// # Safety
/// Must only be called once, with a frame built by `initial_context`.
unsafe fn start_first_process(psp: *mut u32) -> ! {
    asm!(
        // Skip the software-saved R4-R11
        "adds r0, #32",
        "msr psp, r0",

        // Thread mode uses PSP from here on (CONTROL.SPSEL = 1)
        "movs r0, #2",
        "msr control, r0",
        "isb",

        // Unstack the hardware frame by hand
        "pop {{r0-r3, r12}}",
        "pop {{r4}}",          // LR: process_exit
        "pop {{r5}}",          // PC: process_entry
        "pop {{r6}}",          // xPSR: discarded
        "mov lr, r4",
        "orr r5, r5, #1",      // Thumb state for bx

        "cpsie i",
        "bx r5",

        in("r0") psp,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler. Performs the context switch.
///
/// ## Sequence
/// 1. Push R4–R11 onto the outgoing process stack
/// 2. Store the resulting PSP into the outgoing context slot
/// 3. Load the incoming PSP and pop its R4–R11
/// 4. Return to Thread mode on PSP; the hardware unstacks the rest
///
/// # Safety
/// Naked handler called directly by the NVIC.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",

        // r0 = swap_stacks(r0)
        "bl {swap}",

        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",

        // EXC_RETURN: Thread mode, PSP
        "ldr r0, =0xFFFFFFFD",
        "bx r0",

        swap = sym swap_stacks,
    );
}

/// Save the outgoing stack pointer and return the incoming one.
///
/// # Safety
/// Called from PendSV with a switch recorded by `switch_context`.
unsafe extern "C" fn swap_stacks(psp: *mut u32) -> *mut u32 {
    let from = SWITCH_FROM;
    if !from.is_null() {
        (*from).sp = psp;
    }
    SWITCH_FROM = ptr::null_mut();
    (*SWITCH_TO).sp
}
