//! Ingestion paths feeding a running pipeline
//!
//! Covers the byte-stream path (wire frames with corruption in between),
//! the wire sink as a pipeline stage, and the ring path driven by a
//! dedicated ingestion thread.

mod common;

use common::builders::FrameBuilder;
use common::{wait_until, Passthrough, SequenceSource};
use scope_pipeline::ingest::wire::{FRAME_MAGIC, HEADER_LEN};
use scope_pipeline::ingest::{
    decode_frame, encode_frame, ring_link, DataSource, IngestionThread, ManualSource, ReadError,
    WireSinkStage, WireSource,
};
use scope_pipeline::pipeline::{PipelineRuntime, SourceStage, StageOptions, FLAG_DISCONTINUITY};
use scope_pipeline::BackpressurePolicy;
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};

/// Writer appending into a buffer the test can inspect while the sink owns it.
#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn wire_stream(sequences: &[u64], garbage_after: usize) -> Vec<u8> {
    let mut bytes = Vec::new();
    for (i, &seq) in sequences.iter().enumerate() {
        let frame = FrameBuilder::new(2, 16)
            .sequence(seq)
            .sample_rate(250_000.0)
            .build();
        bytes.extend(encode_frame(&frame, 0));
        if i == garbage_after {
            // A torn header: valid magic, nonsense after it.
            bytes.extend_from_slice(&FRAME_MAGIC.to_le_bytes());
            bytes.extend_from_slice(&[0xAB; 37]);
        }
    }
    bytes
}

#[test]
fn test_wire_source_resyncs_after_garbage() {
    let mut source = WireSource::new(Cursor::new(wire_stream(&[0, 1, 2, 3], 1)), 1, 1.0);

    let mut sequences = Vec::new();
    loop {
        match source.read_frame() {
            Ok(buffer) => {
                assert_eq!(buffer.channel_count, 2);
                assert_eq!(buffer.channel(1).unwrap()[3], 1003);
                sequences.push(buffer.sequence);
            }
            Err(ReadError::EndOfStream) => break,
            Err(e) => panic!("unexpected read error: {}", e),
        }
    }

    assert_eq!(sequences, vec![0, 1, 2, 3]);
    assert_eq!(source.resync_count(), 1);
    assert_eq!(source.info().sample_rate_hz, 250_000.0);
    assert_eq!(source.last_header().map(|h| h.sequence), Some(3));
}

#[test]
fn test_wire_stream_through_runtime() {
    // Frame 3 is missing from the stream.
    let stream = wire_stream(&[0, 1, 2, 4, 5], 2);
    let source = SourceStage::new(WireSource::new(Cursor::new(stream), 2, 250_000.0));
    let stats = source.stats();

    let mut runtime = PipelineRuntime::default();
    runtime.add_stage(source, StageOptions::default()).unwrap();
    runtime.add_stage(Passthrough, StageOptions::default()).unwrap();
    runtime.start().unwrap();
    assert!(wait_until(|| runtime.telemetry()[1].frames_processed == 5));
    runtime.stop();

    let frames: Vec<_> = std::iter::from_fn(|| runtime.poll_output()).collect();
    assert_eq!(
        frames.iter().map(|f| f.sequence).collect::<Vec<_>>(),
        vec![0, 1, 2, 4, 5]
    );
    assert_eq!(
        frames.iter().map(|f| f.first_sample_index).collect::<Vec<_>>(),
        vec![0, 16, 32, 64, 80]
    );
    assert_ne!(frames[3].flags & FLAG_DISCONTINUITY, 0);
    assert_eq!(frames[4].flags & FLAG_DISCONTINUITY, 0);
    assert!(frames.iter().all(|f| f.sample_rate_hz == 250_000.0));
    assert_eq!(stats.sequence_gaps(), 1);
    assert_eq!(stats.frames(), 5);
}

#[test]
fn test_wire_sink_stage_writes_frames() {
    let sink_buffer = SharedBuffer::default();
    let mut runtime = PipelineRuntime::default();
    runtime
        .add_stage(SequenceSource::new(6), StageOptions::default())
        .unwrap();
    runtime
        .add_stage(
            WireSinkStage::new(sink_buffer.clone()),
            StageOptions::new(4, BackpressurePolicy::DropOldest),
        )
        .unwrap();
    runtime.start().unwrap();

    let frame_len = HEADER_LEN + 2;
    assert!(wait_until(|| sink_buffer.bytes().len() == 6 * frame_len));
    runtime.stop();
    assert!(runtime.poll_output().is_none());

    let bytes = sink_buffer.bytes();
    let sequences: Vec<u64> = bytes
        .chunks(frame_len)
        .map(|datagram| {
            let (header, frame) = decode_frame(datagram).unwrap();
            assert_eq!(header.channel_count, 1);
            assert_eq!(header.payload_bytes, 2);
            assert_eq!(frame.samples(), &[0]);
            frame.sequence
        })
        .collect();
    assert_eq!(sequences, (0..6).collect::<Vec<u64>>());
}

#[test]
fn test_ring_path_delivers_every_sample() {
    let buffers: Vec<_> = (0..10)
        .map(|seq| {
            FrameBuilder::new(2, 100)
                .sequence(seq)
                .samples(
                    (0..200)
                        .map(|i| (seq * 100 + i % 100) as i16 + if i >= 100 { 5000 } else { 0 })
                        .collect(),
                )
                .build_buffer()
        })
        .collect();
    let producer = ManualSource::finite(2, 48_000.0, buffers);

    let (feeder, ring_source) = ring_link(2, 4096, 64, 48_000.0);
    let source = SourceStage::new(ring_source);
    let source_stats = source.stats();

    let mut runtime = PipelineRuntime::default();
    runtime.add_stage(source, StageOptions::default()).unwrap();
    runtime
        .add_stage(Passthrough, StageOptions::new(64, BackpressurePolicy::Block))
        .unwrap();
    let events = runtime.events();
    runtime.start().unwrap();

    let mut ingestion = IngestionThread::spawn(producer, feeder).unwrap();
    let ingest_stats = ingestion.stats();

    // 1000 samples per channel: 15 full blocks of 64 and a 40-sample tail.
    assert!(wait_until(|| runtime.telemetry()[1].frames_processed == 16));
    ingestion.stop();
    runtime.stop();

    assert!(ingest_stats.is_finished());
    assert_eq!(ingest_stats.frames(), 10);
    assert_eq!(ingest_stats.samples_pushed(), 2000);
    assert_eq!(source_stats.frames(), 16);

    let frames: Vec<_> = std::iter::from_fn(|| runtime.poll_output()).collect();
    assert_eq!(frames.len(), 16);
    assert_eq!(frames[15].samples_per_channel, 40);
    assert_eq!(frames[15].first_sample_index, 960);

    let ch0: Vec<i16> = frames
        .iter()
        .flat_map(|f| f.channel(0).unwrap().to_vec())
        .collect();
    let ch1: Vec<i16> = frames
        .iter()
        .flat_map(|f| f.channel(1).unwrap().to_vec())
        .collect();
    assert_eq!(ch0, (0..1000).map(|i| i as i16).collect::<Vec<_>>());
    assert_eq!(ch1, (0..1000).map(|i| i as i16 + 5000).collect::<Vec<_>>());

    let exited: Vec<_> = events.try_iter().collect();
    assert!(!exited.is_empty());
}
