use mio_v06::Token;

// tokens of the reactor and receive polls

pub const PTB: usize = 0x40;
pub const STOP_POLL_TOKEN: Token = Token(PTB);
pub const TIMED_EVENT_TIMER: Token = Token(PTB + 0x1);
pub const TIMED_EVENT_COMMAND: Token = Token(PTB + 0x2);
pub const ASYNC_WRITER_WAKE: Token = Token(PTB + 0x3);
pub const ASYNC_WRITER_STOP: Token = Token(PTB + 0x4);
/// listening sockets get `USERTRAFFIC_TOKEN_BASE + index`
pub const USERTRAFFIC_TOKEN_BASE: usize = PTB + 0x10;
