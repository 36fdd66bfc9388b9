//! Request correlation.
//!
//! Every issued command gets a request id from a shared wrapping
//! counter; the in-flight entry lives in exactly one place, the
//! correlation table or the offline queue, until its continuation fires
//! exactly once.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;
use rmpv::Value;
use tokio::sync::oneshot;
use tnt_wire::RequestCode;

use crate::error::DriverError;

/// Request ids wrap to zero past this bound, safely larger than any
/// plausible outstanding-request count.
pub const MAX_REQUEST_ID: u32 = 3_000_000;

/// Allocate the next request id from the shared counter, wrapping past
/// [`MAX_REQUEST_ID`].
pub(crate) fn next_request_id(counter: &AtomicU32) -> u32 {
    counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
            Some(if n >= MAX_REQUEST_ID { 0 } else { n + 1 })
        })
        .unwrap_or(0)
}

/// One issued command awaiting its response. Keeps the encoded frame so
/// requests lost to a dropped transport can be replayed on reconnect.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub sync: u32,
    pub code: RequestCode,
    pub frame: Bytes,
    pub tx: oneshot::Sender<Result<Value, DriverError>>,
}

impl PendingRequest {
    /// Resolve with the response payload. Ping and auth replies carry an
    /// empty body and normalize to boolean true.
    pub fn fulfill(self, data: Value) {
        let value = match self.code {
            RequestCode::Ping | RequestCode::Auth => Value::Boolean(true),
            _ => data,
        };
        let _ = self.tx.send(Ok(value));
    }

    /// Resolve with a failure.
    pub fn reject(self, err: DriverError) {
        let _ = self.tx.send(Err(err));
    }
}

/// Ordered collection of in-flight requests keyed by request id.
#[derive(Debug, Default)]
pub(crate) struct CorrelationTable {
    entries: VecDeque<PendingRequest>,
}

impl CorrelationTable {
    pub fn insert(&mut self, pending: PendingRequest) {
        self.entries.push_back(pending);
    }

    /// Find and remove the entry with the given id, preserving the
    /// relative order of the remainder. First match wins; ids are unique
    /// among outstanding requests so it is also the only match.
    pub fn take(&mut self, sync: u32) -> Option<PendingRequest> {
        let pos = self.entries.iter().position(|p| p.sync == sync)?;
        self.entries.remove(pos)
    }

    /// Remove every entry in insertion order.
    pub fn drain(&mut self) -> impl Iterator<Item = PendingRequest> + '_ {
        self.entries.drain(..)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
