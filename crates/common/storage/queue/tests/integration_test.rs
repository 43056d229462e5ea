// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    collections::HashSet,
    fs,
    sync::{Arc, Barrier},
    thread,
    time::Duration,
};

use bytes::Bytes;
use mqstore_queue::{FlushMode, QueueError, QueueStore, StoreBuilder};
use tempfile::TempDir;
use test_case::test_case;

fn small_store(temp_dir: &TempDir, shard_count: u32) -> QueueStore {
    StoreBuilder::new(temp_dir.path())
        .shard_count(shard_count)
        .segment_size(64 * 1024)
        .index_segment_size(512)
        .max_name_len(64)
        .max_payload_len(4096)
        .flush_mode(FlushMode::Async)
        .build()
        .unwrap()
}

fn payloads(items: &[&str]) -> Vec<Bytes> {
    items.iter().map(|s| Bytes::copy_from_slice(s.as_bytes())).collect()
}

#[test]
fn test_put_and_get_across_queues() {
    let temp_dir = TempDir::new().unwrap();
    let store = small_store(&temp_dir, 4);

    store.put("A", b"hello").unwrap();
    store.put("B", b"world").unwrap();
    store.put("A", b"again").unwrap();

    assert_eq!(store.get("A", 0, 2), payloads(&["hello", "again"]));
    assert_eq!(store.get("B", 0, 5), payloads(&["world"]));
    assert!(store.get("C", 0, 1).is_empty());
    assert_eq!(store.queue_count(), 2);
    assert_eq!(store.len("A"), 2);
    assert_eq!(store.len("C"), 0);

    store.shutdown().unwrap();
}

#[test]
fn test_unknown_queue_is_not_created_by_reads() {
    let temp_dir = TempDir::new().unwrap();
    let store = small_store(&temp_dir, 4);

    assert!(store.get("ghost", 0, 10).is_empty());
    assert_eq!(store.queue_count(), 0);
    assert!(store.directory().lookup(b"ghost").is_none());
}

#[test_case(0, 3, &["m0", "m1", "m2"] ; "prefix")]
#[test_case(3, 10, &["m3", "m4"] ; "count clipped at end")]
#[test_case(4, 1, &["m4"] ; "last message")]
#[test_case(5, 1, &[] ; "offset at end")]
#[test_case(100, 5, &[] ; "offset beyond end")]
#[test_case(2, 0, &[] ; "zero count")]
fn test_get_offset_and_count(offset: u64, count: u64, expected: &[&str]) {
    let temp_dir = TempDir::new().unwrap();
    let store = small_store(&temp_dir, 2);
    for i in 0..5 {
        store.put("q", format!("m{i}")).unwrap();
    }

    assert_eq!(store.get("q", offset, count), payloads(expected));
}

#[test]
fn test_large_payload_is_not_truncated() {
    let temp_dir = TempDir::new().unwrap();
    let store = small_store(&temp_dir, 4);
    let payload: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();

    store.put("big", &payload).unwrap();

    assert_eq!(store.get("big", 0, 1), vec![Bytes::from(payload)]);
}

#[test]
fn test_framing_overflow_leaves_queue_absent() {
    let temp_dir = TempDir::new().unwrap();
    let store = small_store(&temp_dir, 4);

    let err = store.put("too-big", vec![0u8; 4097]).unwrap_err();
    assert!(matches!(err, QueueError::FramingOverflow { field: "payload", .. }));

    let long_name = "n".repeat(65);
    let err = store.put(&long_name, b"x").unwrap_err();
    assert!(matches!(err, QueueError::FramingOverflow { field: "queue name", .. }));

    assert_eq!(store.queue_count(), 0);
    assert!(store.get("too-big", 0, 1).is_empty());

    store.put("ok", b"fine").unwrap();
    assert_eq!(store.directory().lookup(b"ok").unwrap().id(), 0);
}

#[test]
fn test_failed_first_put_leaves_queue_unknown() {
    let temp_dir = TempDir::new().unwrap();
    let store = small_store(&temp_dir, 4);

    // A plain file where the first queue's index directory belongs makes
    // index growth fail.
    let index_root = temp_dir.path().join("index");
    fs::create_dir_all(&index_root).unwrap();
    let blocker = index_root.join("00000000");
    fs::write(&blocker, b"not a directory").unwrap();

    let err = store.put("q", b"x").unwrap_err();
    assert!(matches!(err, QueueError::CapacityExhausted { .. }));
    assert_eq!(store.queue_count(), 0);
    assert_eq!(store.len("q"), 0);
    assert!(store.get("q", 0, 1).is_empty());
    assert!(store.directory().lookup(b"q").is_none());

    store.flush().unwrap();
    drop(store);
    fs::remove_file(&blocker).unwrap();

    let store = small_store(&temp_dir, 4);
    assert_eq!(store.queue_count(), 0);
    store.put("q", b"x").unwrap();
    assert_eq!(store.queue_count(), 1);
    assert_eq!(store.get("q", 0, 1), payloads(&["x"]));
}

#[test]
fn test_retry_after_failed_first_put_reuses_identity() {
    let temp_dir = TempDir::new().unwrap();
    let store = small_store(&temp_dir, 4);

    let index_root = temp_dir.path().join("index");
    fs::create_dir_all(&index_root).unwrap();
    let blocker = index_root.join("00000000");
    fs::write(&blocker, b"not a directory").unwrap();

    assert!(store.put("q", b"lost").is_err());
    fs::remove_file(&blocker).unwrap();

    store.put("q", b"kept").unwrap();
    assert_eq!(store.queue_count(), 1);
    assert_eq!(store.directory().lookup(b"q").unwrap().id(), 0);
    assert_eq!(store.get("q", 0, 10), payloads(&["kept"]));
}

#[test]
fn test_queues_sharing_a_shard_stay_separate() {
    let temp_dir = TempDir::new().unwrap();
    let store = small_store(&temp_dir, 2);

    // Identities 0 and 2 both land on shard 0.
    for i in 0..20 {
        store.put("even-a", format!("a{i}")).unwrap();
        store.put("odd", format!("o{i}")).unwrap();
        store.put("even-b", format!("b{i}")).unwrap();
    }

    let a = store.directory().lookup(b"even-a").unwrap();
    let b = store.directory().lookup(b"even-b").unwrap();
    assert_eq!(a.shard_id(), b.shard_id());

    let shard = store.pool().get(a.shard_id()).unwrap();
    let a_positions = a.index().read_range(0, 100).unwrap();
    let b_positions = b.index().read_range(0, 100).unwrap();
    assert!(a_positions.windows(2).all(|w| w[0] < w[1]));
    assert!(b_positions.windows(2).all(|w| w[0] < w[1]));

    let scanned: Vec<(u64, u64)> = shard
        .scan_from(0)
        .map(|(pos, frame)| (pos, frame.queue_id))
        .collect();
    assert_eq!(scanned.len(), 40);
    for (pos, queue_id) in scanned {
        let expected = if queue_id == a.id() { &a_positions } else { &b_positions };
        assert!(expected.contains(&pos));
    }

    let expected_a: Vec<Bytes> = (0..20).map(|i| Bytes::from(format!("a{i}"))).collect();
    assert_eq!(store.get("even-a", 0, 100), expected_a);
}

#[test]
fn test_concurrent_writers_and_readers() {
    const THREADS: usize = 8;
    const MESSAGES: usize = 200;

    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(small_store(&temp_dir, 4));
    let barrier = Arc::new(Barrier::new(THREADS * 2));

    let writers: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = store.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for i in 0..MESSAGES {
                    // Two threads share each queue name.
                    let queue = format!("queue-{}", t % (THREADS / 2));
                    store.put(&queue, format!("{t}:{i}")).unwrap();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = store.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let queue = format!("queue-{}", t % (THREADS / 2));
                let mut seen = 0;
                while seen < 2 * MESSAGES {
                    let page = store.get(&queue, 0, u64::MAX);
                    assert!(page.len() >= seen, "visible prefix shrank");
                    seen = page.len();
                    thread::yield_now();
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }

    assert_eq!(store.queue_count(), THREADS / 2);
    for q in 0..THREADS / 2 {
        let page = store.get(format!("queue-{q}"), 0, u64::MAX);
        assert_eq!(page.len(), 2 * MESSAGES);

        let unique: HashSet<&Bytes> = page.iter().collect();
        assert_eq!(unique.len(), page.len(), "duplicate message in queue-{q}");

        // Each writer's messages appear in the order it wrote them.
        for t in [q, q + THREADS / 2] {
            let prefix = format!("{t}:");
            let order: Vec<usize> = page
                .iter()
                .filter_map(|p| std::str::from_utf8(p).ok()?.strip_prefix(&prefix)?.parse().ok())
                .collect();
            assert_eq!(order, (0..MESSAGES).collect::<Vec<_>>());
        }
    }
}

#[test]
fn test_concurrent_puts_to_one_queue_match_shard_contents() {
    const THREADS: usize = 8;
    const MESSAGES: usize = 300;

    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(small_store(&temp_dir, 4));
    let barrier = Arc::new(Barrier::new(THREADS));

    let writers: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = store.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for i in 0..MESSAGES {
                    store.put("hot", format!("{t}:{i}")).unwrap();
                }
            })
        })
        .collect();
    for handle in writers {
        handle.join().unwrap();
    }

    let queue = store.directory().lookup(b"hot").unwrap();
    let positions = queue.index().read_range(0, u64::MAX).unwrap();
    assert_eq!(positions.len(), THREADS * MESSAGES);
    assert!(positions.windows(2).all(|w| w[0] < w[1]));

    let shard = store.pool().get(queue.shard_id()).unwrap();
    let scanned: Vec<u64> = shard
        .scan_from(0)
        .filter(|(_, frame)| frame.queue_id == queue.id())
        .map(|(pos, _)| pos)
        .collect();
    assert_eq!(positions, scanned);

    for pos in &positions {
        let frame = shard.read(*pos).unwrap();
        assert_eq!(frame.name.as_ref(), b"hot");
    }
}

#[test]
fn test_segments_roll_under_load() {
    let temp_dir = TempDir::new().unwrap();
    let store = StoreBuilder::new(temp_dir.path())
        .shard_count(1)
        .segment_size(4096)
        .index_segment_size(64)
        .max_name_len(16)
        .max_payload_len(1000)
        .flush_mode(FlushMode::Async)
        .build()
        .unwrap();

    let payload = vec![7u8; 1000];
    for _ in 0..20 {
        store.put("roll", &payload).unwrap();
    }

    assert!(store.pool().get(0).unwrap().segment_count() >= 5);
    let page = store.get("roll", 0, 100);
    assert_eq!(page.len(), 20);
    assert!(page.iter().all(|p| p.as_ref() == payload.as_slice()));
}

#[test]
fn test_recovery_after_shutdown() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = small_store(&temp_dir, 4);
        for i in 0..50 {
            store.put(format!("q{}", i % 5), format!("msg-{i}")).unwrap();
        }
        store.shutdown().unwrap();
    }

    let store = small_store(&temp_dir, 4);
    assert_eq!(store.queue_count(), 5);
    for q in 0..5 {
        let expected: Vec<Bytes> = (0..10)
            .map(|j| Bytes::from(format!("msg-{}", q + 5 * j)))
            .collect();
        assert_eq!(store.get(format!("q{q}"), 0, 100), expected);
    }

    store.put("q0", b"after restart").unwrap();
    store.put("new", b"fresh").unwrap();
    assert_eq!(store.len("q0"), 11);
    assert_eq!(store.directory().lookup(b"new").unwrap().id(), 5);
}

#[test]
fn test_recovery_replays_past_checkpoint() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = small_store(&temp_dir, 2);
        store.put("a", b"before").unwrap();
        store.flush().unwrap();
        store.put("a", b"after").unwrap();
        store.put("b", b"unseen queue").unwrap();
        // Skip the final checkpoint; the shared mapping still holds the writes.
        std::mem::forget(store);
    }

    let store = small_store(&temp_dir, 2);
    assert_eq!(store.get("a", 0, 10), payloads(&["before", "after"]));
    assert_eq!(store.get("b", 0, 10), payloads(&["unseen queue"]));
}

#[test]
fn test_recovery_without_manifest() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = small_store(&temp_dir, 3);
        for i in 0..12 {
            store.put(format!("q{}", i % 4), format!("{i}")).unwrap();
        }
        store.shutdown().unwrap();
    }
    for name in ["manifest.1", "manifest.2", "manifest.current"] {
        let _ = fs::remove_file(temp_dir.path().join(name));
    }

    let store = small_store(&temp_dir, 3);
    assert_eq!(store.queue_count(), 4);
    assert_eq!(store.get("q1", 0, 10), payloads(&["1", "5", "9"]));
    store.put("q4", b"x").unwrap();
    assert_eq!(store.directory().lookup(b"q4").unwrap().id(), 4);
}

#[test]
fn test_reopen_with_different_shard_count_fails() {
    let temp_dir = TempDir::new().unwrap();
    small_store(&temp_dir, 4).shutdown().unwrap();

    let result = StoreBuilder::new(temp_dir.path())
        .shard_count(8)
        .segment_size(64 * 1024)
        .index_segment_size(512)
        .max_name_len(64)
        .max_payload_len(4096)
        .build();
    assert!(matches!(result, Err(QueueError::InvalidConfig { .. })));
}

#[test]
fn test_batch_flusher_checkpoints_in_background() {
    let temp_dir = TempDir::new().unwrap();
    let store = StoreBuilder::new(temp_dir.path())
        .shard_count(2)
        .segment_size(64 * 1024)
        .index_segment_size(512)
        .max_name_len(64)
        .max_payload_len(4096)
        .flush_mode(FlushMode::Batch {
            bytes:    256,
            interval: Duration::from_millis(20),
        })
        .build()
        .unwrap();

    for i in 0..32 {
        store.put("batched", format!("payload-{i:04}")).unwrap();
    }

    let manifest = temp_dir.path().join("manifest.current");
    for _ in 0..100 {
        if manifest.exists() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(manifest.exists());

    store.shutdown().unwrap();
    let store = small_store(&temp_dir, 2);
    assert_eq!(store.len("batched"), 32);
}
