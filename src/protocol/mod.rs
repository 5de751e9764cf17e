//! Line protocol spoken with the database host
//!
//! Every input line is one JSON array naming a command; every output line is
//! one JSON value (a log frame, a result or an error).

pub mod codec;
pub mod command;
pub mod frame;

pub use codec::{read_line, to_spaced_string, FrameWriter, SpacedFormatter};
pub use command::Command;
pub use frame::Frame;
