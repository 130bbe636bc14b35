//! Kernel event log with pluggable backends.
//!
//! Kernel events are emitted as binary *records* framed in HDLC packets:
//! sequence number, record id, optional 32-bit microsecond timestamp,
//! payload, and an inverted 8-bit checksum, terminated by `0x7E`. Bytes
//! equal to the flag or escape value are escaped with `0x7D` and XOR `0x20`.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

pub mod records;

/// Maximum payload length for a single record (excluding header/checksum).
const DEFAULT_MAX_RECORD_LEN: usize = 64;

const FLAG: u8 = 0x7E;
const ESC: u8 = 0x7D;
const ESC_XOR: u8 = 0x20;

/// Configuration for the tracer.
#[derive(Debug, Clone)]
pub struct KevlogConfig {
    pub max_record_len: usize,
    pub include_timestamp: bool,
}

impl Default for KevlogConfig {
    fn default() -> Self {
        Self {
            max_record_len: DEFAULT_MAX_RECORD_LEN,
            include_timestamp: true,
        }
    }
}

/// A single kernel event record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub seq: u8,
    pub record_type: u8,
    pub timestamp: Option<Duration>,
    pub payload: Vec<u8>,
}

/// Errors that can occur while emitting records.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("backend error: {0}")]
    Backend(#[from] io::Error),
}

/// Backend trait that consumes HDLC framed bytes.
pub trait TraceBackend: Send + Sync {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError>;
}

/// Backend that writes frames to any `Write` implementation.
pub struct WriterBackend<W: Write + Send + 'static> {
    writer: Mutex<W>,
}

impl<W: Write + Send + 'static> WriterBackend<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send + 'static> TraceBackend for WriterBackend<W> {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError> {
        let mut guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        guard.write_all(frame).map_err(TraceError::from)
    }
}

/// Backend that keeps every frame in memory; used by tests and post-mortem dumps.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every frame written so far.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TraceBackend for MemoryBackend {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError> {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(frame.to_vec());
        Ok(())
    }
}

/// Record encoder.
pub struct Tracer<B: TraceBackend> {
    backend: B,
    cfg: KevlogConfig,
    seq: u8,
    epoch: Instant,
}

/// Shareable handle around a [`Tracer`].
pub struct TracerHandle<B: TraceBackend> {
    inner: Arc<Mutex<Tracer<B>>>,
}

impl<B: TraceBackend> Clone for TracerHandle<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: TraceBackend> Tracer<B> {
    pub fn new(cfg: KevlogConfig, backend: B) -> Self {
        Self {
            backend,
            cfg,
            seq: 0,
            epoch: Instant::now(),
        }
    }

    pub fn into_handle(self) -> TracerHandle<B> {
        TracerHandle {
            inner: Arc::new(Mutex::new(self)),
        }
    }

    pub fn record(
        &mut self,
        record_type: u8,
        payload: &[u8],
        with_timestamp: bool,
    ) -> Result<Record, TraceError> {
        if payload.len() > self.cfg.max_record_len {
            return Err(TraceError::PayloadTooLarge(payload.len()));
        }

        let timestamp = if self.cfg.include_timestamp && with_timestamp {
            Some(self.epoch.elapsed())
        } else {
            None
        };

        self.seq = self.seq.wrapping_add(1);
        let record = Record {
            seq: self.seq,
            record_type,
            timestamp,
            payload: payload.to_vec(),
        };

        let frame = encode_frame(&record);
        self.backend.write_frame(&frame)?;
        Ok(record)
    }
}

/// Encodes `record` into an escaped, checksummed HDLC frame.
pub fn encode_frame(record: &Record) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(record.payload.len() + 8);
    let mut checksum: u8 = 0;

    let push_escaped = |dest: &mut Vec<u8>, byte: u8| {
        if byte == FLAG || byte == ESC {
            dest.push(ESC);
            dest.push(byte ^ ESC_XOR);
        } else {
            dest.push(byte);
        }
    };

    let mut push_summed = |dest: &mut Vec<u8>, byte: u8| {
        checksum = checksum.wrapping_add(byte);
        push_escaped(dest, byte);
    };

    push_summed(&mut bytes, record.seq);
    push_summed(&mut bytes, record.record_type);

    if let Some(ts) = record.timestamp {
        for byte in (ts.as_micros() as u32).to_le_bytes() {
            push_summed(&mut bytes, byte);
        }
    }

    for &byte in &record.payload {
        push_summed(&mut bytes, byte);
    }

    push_escaped(&mut bytes, !checksum);
    bytes.push(FLAG);
    bytes
}

/// Reverses [`encode_frame`]'s escaping and verifies the checksum.
///
/// Returns the unescaped body (without checksum and flag), or `None` when the
/// frame is truncated or corrupt.
pub fn decode_frame(frame: &[u8]) -> Option<Vec<u8>> {
    let (&last, body) = frame.split_last()?;
    if last != FLAG {
        return None;
    }

    let mut out = Vec::with_capacity(body.len());
    let mut escaped = false;
    for &byte in body {
        if escaped {
            out.push(byte ^ ESC_XOR);
            escaped = false;
        } else if byte == ESC {
            escaped = true;
        } else {
            out.push(byte);
        }
    }
    if escaped {
        return None;
    }

    let checksum = out.pop()?;
    let sum = out.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    (!sum == checksum).then_some(out)
}

impl<B: TraceBackend + 'static> TracerHandle<B> {
    pub fn emit(&self, record_type: u8, payload: &[u8]) -> Result<Record, TraceError> {
        self.emit_internal(record_type, payload, false)
    }

    pub fn emit_with_timestamp(
        &self,
        record_type: u8,
        payload: &[u8],
    ) -> Result<Record, TraceError> {
        self.emit_internal(record_type, payload, true)
    }

    fn emit_internal(
        &self,
        record_type: u8,
        payload: &[u8],
        with_timestamp: bool,
    ) -> Result<Record, TraceError> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.record(record_type, payload, with_timestamp)
    }

    /// Returns a hook suitable for `KernelBuilder::with_trace_hook`.
    pub fn hook(&self) -> TraceHook {
        let inner = Arc::clone(&self.inner);
        Arc::new(move |record_type, payload, with_timestamp| {
            let mut guard = inner.lock().unwrap_or_else(|e| e.into_inner());
            guard
                .record(record_type, payload, with_timestamp)
                .map(|_| ())
        })
    }
}

pub type TraceHook = Arc<dyn Fn(u8, &[u8], bool) -> Result<(), TraceError> + Send + Sync>;
