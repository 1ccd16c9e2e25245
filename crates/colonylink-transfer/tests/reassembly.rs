//! End-to-end reassembly: sender stream → shuffled delivery → assembler.

use std::time::Instant;

use bytes::Bytes;
use colonylink_protocol::SaveFileChunk;
use colonylink_transfer::{Assembler, ChunkOutcome, ChunkSend, ChunkStream, StreamStatus};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

// =========================================================================
// Helpers
// =========================================================================

fn payload(len: usize) -> Bytes {
    (0..len)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8)
        .collect::<Vec<_>>()
        .into()
}

fn all_chunks(file_id: &str, data: &Bytes, chunk_size: usize) -> Vec<SaveFileChunk> {
    let mut stream = ChunkStream::new(file_id, data.clone(), chunk_size, usize::MAX).unwrap();
    let mut chunks = Vec::new();
    assert_eq!(
        stream.pump(|c| {
            chunks.push(c);
            ChunkSend::Accepted
        }),
        StreamStatus::Finished
    );
    chunks
}

// =========================================================================
// The 10 000 / 1 000 scenario
// =========================================================================

#[test]
fn test_ten_chunk_payload_completes_exactly_on_last_chunk() {
    let data = payload(10_000);
    let chunks = all_chunks("Colony.sav", &data, 1_000);
    assert_eq!(chunks.len(), 10);

    let mut rng = StdRng::seed_from_u64(10);
    let (first_nine, last) = chunks.split_at(9);
    let mut first_nine = first_nine.to_vec();
    first_nine.shuffle(&mut rng);

    let mut asm = Assembler::default();
    let now = Instant::now();
    for chunk in &first_nine {
        let outcome = asm.receive(chunk, now);
        assert!(
            !matches!(outcome, ChunkOutcome::Completed(_) | ChunkOutcome::Rejected(_)),
            "{outcome:?}"
        );
    }
    assert_eq!(asm.percent("Colony.sav"), Some(90));

    match asm.receive(&last[0], now) {
        ChunkOutcome::Completed(done) => {
            assert_eq!(done.total_chunks, 10);
            assert_eq!(done.payload, data);
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

// =========================================================================
// Permutations with duplicates
// =========================================================================

#[test]
fn test_any_permutation_with_duplicates_rebuilds_payload() {
    for (seed, (len, chunk_size)) in [(1_000, 100), (2_345, 256), (4_096, 4_096), (9_999, 1_000)]
        .into_iter()
        .enumerate()
    {
        let data = payload(len);
        let mut delivery = all_chunks("w", &data, chunk_size);
        let dupes: Vec<_> = delivery.iter().step_by(3).cloned().collect();
        delivery.extend(dupes);

        let mut rng = StdRng::seed_from_u64(seed as u64);
        delivery.shuffle(&mut rng);

        let mut asm = Assembler::default();
        let now = Instant::now();
        let mut completed = None;
        for chunk in &delivery {
            if let ChunkOutcome::Completed(done) = asm.receive(chunk, now) {
                completed = Some(done.payload);
                break;
            }
        }

        assert_eq!(completed.as_ref(), Some(&data), "len={len} chunk={chunk_size}");
    }
}

// =========================================================================
// Monotonic progress
// =========================================================================

#[test]
fn test_progress_is_monotonic_and_hits_100_only_at_completion() {
    let data = payload(20_000);
    let mut delivery = all_chunks("w", &data, 700);
    let dupes: Vec<_> = delivery.iter().take(5).cloned().collect();
    delivery.extend(dupes);
    delivery.shuffle(&mut StdRng::seed_from_u64(99));

    let mut asm = Assembler::default();
    let now = Instant::now();
    let mut last_percent = 0u8;
    let mut last_report = 0u8;
    let mut done = false;

    for chunk in &delivery {
        match asm.receive(chunk, now) {
            ChunkOutcome::Started(p) | ChunkOutcome::Progress(p) | ChunkOutcome::Duplicate(p) => {
                assert!(p.percent >= last_percent);
                assert!(p.percent < 100);
                last_percent = p.percent;
                if let Some(r) = p.report {
                    assert!(r >= last_report);
                    last_report = r;
                }
            }
            ChunkOutcome::Completed(c) => {
                assert_eq!(c.payload, data);
                done = true;
                break;
            }
            ChunkOutcome::Rejected(e) => panic!("unexpected rejection: {e}"),
        }
    }
    assert!(done);
}

// =========================================================================
// Backpressure
// =========================================================================

#[test]
fn test_stream_with_intermittent_busy_link_delivers_every_chunk_once() {
    let data = payload(7_500);
    let mut stream = ChunkStream::new("w", data.clone(), 1_000, 2).unwrap();
    let mut asm = Assembler::default();
    let now = Instant::now();
    let mut attempt = 0u32;
    let mut result = None;

    for _tick in 0..100 {
        let status = stream.pump(|chunk| {
            attempt += 1;
            if attempt % 3 == 0 {
                return ChunkSend::Busy;
            }
            if let ChunkOutcome::Completed(done) = asm.receive(&chunk, now) {
                result = Some(done.payload);
            }
            ChunkSend::Accepted
        });
        if status == StreamStatus::Finished {
            break;
        }
    }

    assert!(stream.is_finished());
    assert_eq!(result, Some(data));
}
