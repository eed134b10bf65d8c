//! Register layout of the per-thread debug block.
//!
//! Offsets are relative to the thread target's "reg" base address. The
//! fake backend emulates the same layout, so everything built on these
//! constants is host-testable.

/// Run-control command register.
pub const THREAD_CTRL: u64 = 0x00;
/// Thread status word, see [crate::chip::ThreadStatus].
pub const THREAD_STATUS: u64 = 0x08;
/// Next instruction address.
pub const THREAD_NIA: u64 = 0x10;
/// Mode bits (attention enable).
pub const THREAD_MODE: u64 = 0x18;
/// General purpose register file, 32 consecutive 64-bit slots.
pub const THREAD_GPR: u64 = 0x100;
/// Special purpose register window, indexed by SPR number.
pub const THREAD_SPR: u64 = 0x300;

pub const CTRL_START: u64 = 1 << 0;
pub const CTRL_STOP: u64 = 1 << 1;
pub const CTRL_SSTEP: u64 = 1 << 2;

/// Attention instructions trap instead of being ignored.
pub const MODE_ATTN: u64 = 1 << 0;

pub const STAT_ACTIVE: u64 = 1 << 0;
pub const STAT_QUIESCED: u64 = 1 << 1;

/// SPR number of the link register.
pub const SPR_LR: u64 = 8;

/// Width of the attention trap instruction; the NIA must be rewound by this
/// much after a trap.
pub const TRAP_INSTRUCTION_WIDTH: u64 = 4;
