//! RLOG live streaming.
//!
//! [`RlogServer`] is a [`LogDataReceiver`](crate::LogDataReceiver) that
//! sends each cycle to dashboard clients over TCP using the encoding in
//! [`encoder`].

pub mod encoder;
mod server;

pub use encoder::{RlogDecoder, RlogEncoder, RLOG_REVISION};
pub use server::{RlogServer, RlogServerConfig, DEFAULT_RLOG_PORT, RLOG_ACCEPT_THREAD_NAME};
