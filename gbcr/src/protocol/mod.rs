//! GBCR wire protocol.

pub mod frame;

pub use frame::{ACK_LEN, AckFrame, CommandFrame, FRAME_LEN, Opcode, encode_hex16};

/// Size of a block returned by `RDBK`.
pub const BLOCK_SIZE: usize = 0x1000;

/// Size of a flash page written by `WRST`.
pub const PAGE_SIZE: usize = 0x100;

/// Length of the `READINFO` payload.
pub const BOARD_INFO_LEN: usize = 16;

/// Length of the `COMPTIME` payload (date chunk followed by time chunk).
pub const COMPILE_TIME_LEN: usize = 32;

/// Length of the `DEVIDSST` payload.
pub const DEVICE_ID_LEN: usize = 2;

/// Length of the `ESST` payload (big-endian attempt count).
pub const ERASE_RESULT_LEN: usize = 2;
