//! Per-socket tasks: one reader, one writer, one pinger.

pub(crate) mod ping;
pub(crate) mod read;
pub(crate) mod write;
