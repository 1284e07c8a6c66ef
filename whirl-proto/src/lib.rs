//! Shared protocol definitions for the Whirl wire format.

pub mod close;
pub mod codec;
pub mod history;
pub mod message;
