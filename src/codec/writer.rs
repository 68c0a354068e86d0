//! Outbound request writer.
//!
//! Holds the serialized request head and optional body for one request and
//! pushes them into a non-blocking sink across as many writability
//! notifications as it takes.

use std::io;

use bytes::{Buf, Bytes};

/// Partial-write aware request encoder.
#[derive(Debug)]
pub struct RequestWriter {
    head: Bytes,
    body: Bytes,
}

impl RequestWriter {
    pub fn new(head: Bytes, body: Option<Bytes>) -> Self {
        Self {
            head,
            body: body.unwrap_or_default(),
        }
    }

    /// Bytes not yet accepted by the sink.
    pub fn remaining(&self) -> usize {
        self.head.len() + self.body.len()
    }

    /// Drive pending bytes into `sink`.
    ///
    /// Returns `Ok(true)` once everything has been written and `Ok(false)` when
    /// the sink would block with bytes still pending. Any other I/O error,
    /// including a sink that accepts zero bytes, is a transport fault.
    pub fn write<F>(&mut self, mut sink: F) -> io::Result<bool>
    where
        F: FnMut(&[u8]) -> io::Result<usize>,
    {
        while self.remaining() > 0 {
            let chunk = if self.head.has_remaining() {
                &mut self.head
            } else {
                &mut self.body
            };

            match sink(chunk.chunk()) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => chunk.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}
