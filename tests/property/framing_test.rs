// tests/property/framing_test.rs

//! Property-based tests for terminator framing
//! Tests that frames survive any chunking of the byte stream intact and in order

use crate::support::duplex_connection;
use bytes::Bytes;
use linewire::connection::{ByteTerminatedReader, ReadOutcome};
use proptest::prelude::*;
use tokio::io::AsyncWriteExt;

const TERMINATOR: u8 = b'\n';

fn payloads() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(
        prop::collection::vec(any::<u8>().prop_filter("no terminator", |b| *b != TERMINATOR), 0..48),
        1..16,
    )
}

fn encode(payloads: &[Vec<u8>]) -> Vec<u8> {
    let mut wire = Vec::new();
    for p in payloads {
        wire.extend_from_slice(p);
        wire.push(TERMINATOR);
    }
    wire
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_read_frame_any_buffer_size(
        payloads in payloads(),
        buffer_size in 1usize..64
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (conn, mut peer) = duplex_connection(TERMINATOR);
            let wire = encode(&payloads);
            peer.write_all(&wire).await.unwrap();

            let mut total_read = 0;
            for expected in &payloads {
                match conn.read_frame(buffer_size, 0).await.unwrap() {
                    ReadOutcome::Frame { payload, bytes_read } => {
                        assert_eq!(&payload[..], &expected[..]);
                        total_read += bytes_read;
                    }
                    other => panic!("expected a frame, got {:?}", other),
                }
            }

            // Every byte on the wire is accounted for exactly once.
            assert_eq!(total_read, wire.len());
            assert_eq!(conn.stats().received as usize, wire.len());
        });
    }

    #[test]
    fn test_reader_any_chunking(
        payloads in payloads(),
        chunk_size in 1usize..32
    ) {
        let wire = encode(&payloads);
        let mut reader = ByteTerminatedReader::new(TERMINATOR);
        let mut frames: Vec<Bytes> = Vec::new();

        let mut chunks = wire.chunks(chunk_size);
        while frames.len() < payloads.len() {
            if let Some(frame) = reader.take_buffered_frame() {
                frames.push(frame);
                continue;
            }
            let mut acc = reader.begin_frame();
            loop {
                let chunk = chunks.next().expect("ran out of input before all frames decoded");
                if let Some(frame) = reader.feed(&mut acc, chunk) {
                    frames.push(frame);
                    break;
                }
            }
        }

        prop_assert_eq!(frames.len(), payloads.len());
        for (frame, expected) in frames.iter().zip(&payloads) {
            prop_assert_eq!(&frame[..], &expected[..]);
        }
        prop_assert_eq!(reader.pending(), 0);
        prop_assert!(chunks.next().is_none());
    }
}
