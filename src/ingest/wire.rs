//! Wire framing at the transport boundary (pipe, datagram, file).
//!
//! One frame on the wire is a fixed 64-byte little-endian header followed by
//! `payload_bytes` of channel-major `i16` samples:
//!
//! ```text
//! off  size  field
//!   0     4  magic = 0x32484647 ("GFH2")
//!   4     4  header_bytes = 64
//!   8     8  sequence
//!  16     8  producer_ts_ns
//!  24     4  channel_count
//!  28     4  block_length_samples (per channel)
//!  32     4  payload_bytes = channel_count * block_length_samples * 2
//!  36     4  header_crc (reserved, written as 0)
//!  40     8  sample_rate_hz (f64)
//!  48     8  first_sample_index
//!  56     8  producer_drops_total
//! ```
//!
//! Datagram receivers call [`decode_frame`] and skip anything it rejects.
//! Stream receivers use [`WireSource`], which resynchronizes on the magic
//! after a malformed header.

use crate::ingest::{DataSource, FrameBuffer, ReadError, SourceInfo};
use crate::ingest::ring_source::DropCounter;
use crate::pipeline::{BatchView, BatchWriter, ExecContext, Frame, Stage, StageResult};
use std::io::{self, Read, Write};
use std::sync::Arc;
use thiserror::Error;

pub const FRAME_MAGIC: u32 = 0x3248_4647;
pub const HEADER_LEN: usize = 64;

/// Upper bound on a single frame payload, guarding against corrupt lengths.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("bad frame magic 0x{0:08x}")]
    BadMagic(u32),

    #[error("truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("unsupported header size {0}")]
    HeaderSize(u32),

    #[error("payload size {payload_bytes} does not match {channel_count} x {block_length} samples")]
    PayloadMismatch {
        payload_bytes: u32,
        channel_count: u32,
        block_length: u32,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WireHeader {
    pub sequence: u64,
    pub producer_ts_ns: u64,
    pub channel_count: u32,
    pub block_length_samples: u32,
    pub payload_bytes: u32,
    pub sample_rate_hz: f64,
    pub first_sample_index: u64,
    pub producer_drops_total: u64,
}

fn u32_at(bytes: &[u8], off: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&bytes[off..off + 4]);
    u32::from_le_bytes(b)
}

fn u64_at(bytes: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&bytes[off..off + 8]);
    u64::from_le_bytes(b)
}

impl WireHeader {
    pub fn for_frame(frame: &Frame, producer_drops_total: u64) -> Self {
        Self {
            sequence: frame.sequence,
            producer_ts_ns: frame.producer_ts_ns,
            channel_count: frame.channel_count,
            block_length_samples: frame.samples_per_channel,
            payload_bytes: (frame.len() * 2) as u32,
            sample_rate_hz: frame.sample_rate_hz,
            first_sample_index: frame.first_sample_index,
            producer_drops_total,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&FRAME_MAGIC.to_le_bytes());
        out[4..8].copy_from_slice(&(HEADER_LEN as u32).to_le_bytes());
        out[8..16].copy_from_slice(&self.sequence.to_le_bytes());
        out[16..24].copy_from_slice(&self.producer_ts_ns.to_le_bytes());
        out[24..28].copy_from_slice(&self.channel_count.to_le_bytes());
        out[28..32].copy_from_slice(&self.block_length_samples.to_le_bytes());
        out[32..36].copy_from_slice(&self.payload_bytes.to_le_bytes());
        // 36..40: header_crc, reserved
        out[40..48].copy_from_slice(&self.sample_rate_hz.to_le_bytes());
        out[48..56].copy_from_slice(&self.first_sample_index.to_le_bytes());
        out[56..64].copy_from_slice(&self.producer_drops_total.to_le_bytes());
        out
    }

    /// Parse and validate the first [`HEADER_LEN`] bytes of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < HEADER_LEN {
            return Err(WireError::Truncated {
                needed: HEADER_LEN,
                available: bytes.len(),
            });
        }
        let magic = u32_at(bytes, 0);
        if magic != FRAME_MAGIC {
            return Err(WireError::BadMagic(magic));
        }
        let header_bytes = u32_at(bytes, 4);
        if header_bytes as usize != HEADER_LEN {
            return Err(WireError::HeaderSize(header_bytes));
        }

        let header = Self {
            sequence: u64_at(bytes, 8),
            producer_ts_ns: u64_at(bytes, 16),
            channel_count: u32_at(bytes, 24),
            block_length_samples: u32_at(bytes, 28),
            payload_bytes: u32_at(bytes, 32),
            sample_rate_hz: f64::from_bits(u64_at(bytes, 40)),
            first_sample_index: u64_at(bytes, 48),
            producer_drops_total: u64_at(bytes, 56),
        };

        let expected = header.channel_count as u64 * header.block_length_samples as u64 * 2;
        if expected != header.payload_bytes as u64 || expected as usize > MAX_PAYLOAD_BYTES {
            return Err(WireError::PayloadMismatch {
                payload_bytes: header.payload_bytes,
                channel_count: header.channel_count,
                block_length: header.block_length_samples,
            });
        }
        Ok(header)
    }
}

/// Serialize `frame` as one wire frame.
pub fn encode_frame(frame: &Frame, producer_drops_total: u64) -> Vec<u8> {
    let header = WireHeader::for_frame(frame, producer_drops_total);
    let mut out = Vec::with_capacity(HEADER_LEN + header.payload_bytes as usize);
    out.extend_from_slice(&header.to_bytes());
    for s in frame.samples() {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

fn decode_payload(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

/// Decode one complete datagram into an owned frame.
pub fn decode_frame(datagram: &[u8]) -> Result<(WireHeader, Frame), WireError> {
    let header = WireHeader::decode(datagram)?;
    let end = HEADER_LEN + header.payload_bytes as usize;
    if datagram.len() < end {
        return Err(WireError::Truncated {
            needed: end,
            available: datagram.len(),
        });
    }

    let samples = decode_payload(&datagram[HEADER_LEN..end]);
    let mut frame = Frame::from_samples(header.channel_count, header.block_length_samples, samples)
        .map_err(|_| WireError::PayloadMismatch {
            payload_bytes: header.payload_bytes,
            channel_count: header.channel_count,
            block_length: header.block_length_samples,
        })?;
    frame.sequence = header.sequence;
    frame.producer_ts_ns = header.producer_ts_ns;
    frame.sample_rate_hz = header.sample_rate_hz;
    frame.first_sample_index = header.first_sample_index;
    Ok((header, frame))
}

/// Frame whose header has been consumed but whose payload is still arriving.
struct PendingPayload {
    header: WireHeader,
    payload: Vec<u8>,
    filled: usize,
}

/// [`DataSource`] over a byte stream of wire frames.
///
/// Non-blocking readers are supported: a `WouldBlock` anywhere inside a frame
/// reports [`ReadError::NoData`] and the next call resumes where it stopped.
pub struct WireSource<R> {
    reader: R,
    info: SourceInfo,
    header_buf: Vec<u8>,
    pending: Option<PendingPayload>,
    last_header: Option<WireHeader>,
    resyncs: u64,
}

impl<R: Read + Send> WireSource<R> {
    /// `channel_count` and `sample_rate_hz` describe the stream until the
    /// first header arrives; after that each header is authoritative.
    pub fn new(reader: R, channel_count: u32, sample_rate_hz: f64) -> Self {
        Self {
            reader,
            info: SourceInfo {
                channel_count,
                sample_rate_hz,
                is_realtime: true,
            },
            header_buf: Vec::with_capacity(HEADER_LEN),
            pending: None,
            last_header: None,
            resyncs: 0,
        }
    }

    /// Number of times the reader had to scan for the next magic.
    pub fn resync_count(&self) -> u64 {
        self.resyncs
    }

    pub fn last_header(&self) -> Option<&WireHeader> {
        self.last_header.as_ref()
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Fill `header_buf` to a full header. `Ok(false)` on clean EOF.
    fn fill_header(&mut self) -> io::Result<bool> {
        while self.header_buf.len() < HEADER_LEN {
            let start = self.header_buf.len();
            self.header_buf.resize(HEADER_LEN, 0);
            match self.reader.read(&mut self.header_buf[start..]) {
                Ok(0) => {
                    self.header_buf.truncate(start);
                    return Ok(false);
                }
                Ok(n) => self.header_buf.truncate(start + n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    self.header_buf.truncate(start)
                }
                Err(e) => {
                    self.header_buf.truncate(start);
                    return Err(e);
                }
            }
        }
        Ok(true)
    }

    /// Drop bytes up to the next possible magic in `header_buf`.
    fn skip_to_next_magic(&mut self) {
        let magic = FRAME_MAGIC.to_le_bytes();
        let next = (1..self.header_buf.len())
            .find(|&i| {
                let tail = &self.header_buf[i..];
                let n = tail.len().min(4);
                tail[..n] == magic[..n]
            })
            .unwrap_or(self.header_buf.len());
        self.header_buf.drain(..next);
    }

    /// Read into `pending` until its payload is complete. `Ok(false)` on EOF.
    fn fill_payload(&mut self, pending: &mut PendingPayload) -> io::Result<bool> {
        while pending.filled < pending.payload.len() {
            match self.reader.read(&mut pending.payload[pending.filled..]) {
                Ok(0) => return Ok(false),
                Ok(n) => pending.filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    fn next_header(&mut self) -> Result<WireHeader, ReadError> {
        let mut resyncing = false;
        loop {
            match self.fill_header() {
                Ok(true) => {}
                Ok(false) => return Err(ReadError::EndOfStream),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(ReadError::NoData),
                Err(e) => return Err(ReadError::Error(e.to_string())),
            }

            match WireHeader::decode(&self.header_buf) {
                Ok(header) => {
                    self.header_buf.clear();
                    return Ok(header);
                }
                Err(e) => {
                    if !resyncing {
                        resyncing = true;
                        self.resyncs += 1;
                        tracing::warn!("Wire stream malformed ({}), resynchronizing", e);
                    }
                    self.skip_to_next_magic();
                }
            }
        }
    }
}

impl<R: Read + Send> DataSource for WireSource<R> {
    fn info(&self) -> SourceInfo {
        self.info
    }

    fn read_frame(&mut self) -> Result<FrameBuffer, ReadError> {
        let mut pending = match self.pending.take() {
            Some(pending) => pending,
            None => {
                let header = self.next_header()?;
                PendingPayload {
                    header,
                    payload: vec![0u8; header.payload_bytes as usize],
                    filled: 0,
                }
            }
        };

        match self.fill_payload(&mut pending) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    "Wire stream ended inside frame {} payload",
                    pending.header.sequence
                );
                return Err(ReadError::EndOfStream);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.pending = Some(pending);
                return Err(ReadError::NoData);
            }
            Err(e) => return Err(ReadError::Error(e.to_string())),
        }

        let PendingPayload {
            header, payload, ..
        } = pending;
        self.info.channel_count = header.channel_count;
        self.info.sample_rate_hz = header.sample_rate_hz;
        self.last_header = Some(header);

        Ok(FrameBuffer {
            sequence: header.sequence,
            producer_ts_ns: header.producer_ts_ns,
            channel_count: header.channel_count,
            samples_per_channel: header.block_length_samples,
            samples: decode_payload(&payload),
        })
    }
}

/// Sink stage writing each input frame to a byte stream.
pub struct WireSinkStage<W> {
    writer: W,
    drop_counters: Vec<Arc<DropCounter>>,
    frames_written: u64,
}

impl<W: Write + Send> WireSinkStage<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            drop_counters: Vec::new(),
            frames_written: 0,
        }
    }

    /// Report the summed drops of `counters` in every header.
    pub fn with_drop_counters(mut self, counters: Vec<Arc<DropCounter>>) -> Self {
        self.drop_counters = counters;
        self
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn producer_drops(&self) -> u64 {
        self.drop_counters.iter().map(|c| c.total_dropped()).sum()
    }
}

impl<W: Write + Send> Stage for WireSinkStage<W> {
    fn name(&self) -> &str {
        "WireSink"
    }

    fn process(
        &mut self,
        input: &mut BatchView,
        _output: &mut BatchWriter,
        _ctx: &ExecContext,
    ) -> StageResult {
        if input.is_empty() {
            return StageResult::NoData;
        }
        let drops = self.producer_drops();
        while let Some(frame) = input.take() {
            let bytes = encode_frame(&frame, drops);
            if let Err(e) = self.writer.write_all(&bytes) {
                tracing::error!("Wire sink write failed at frame {}: {}", frame.sequence, e);
                return StageResult::Error;
            }
            self.frames_written += 1;
        }
        match self.writer.flush() {
            Ok(()) => StageResult::Ok,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => StageResult::Retry,
            Err(e) => {
                tracing::error!("Wire sink flush failed: {}", e);
                StageResult::Error
            }
        }
    }

    fn on_stop(&mut self) {
        if let Err(e) = self.writer.flush() {
            tracing::warn!("Wire sink final flush failed: {}", e);
        }
    }
}
