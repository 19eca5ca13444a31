#![doc = include_str!("../README.md")]

mod error;
#[cfg(test)]
mod mock;
mod pool;
mod queue;
mod result;
mod task;
mod telemetry;
pub mod transport;

pub use crate::error::*;
pub use crate::pool::*;
pub use crate::queue::*;
pub use crate::result::WorkerResult;
pub use crate::task::{ResultHandle, Wait};
pub use crate::transport::{
    BoxError, Call, CallOptions, Callback, Transport,
    await_call::await_call,
    normalize::{NormalizingCall, NormalizingTransport},
};
#[cfg(feature = "http")]
pub use crate::transport::http::{HttpCall, HttpTransport};
