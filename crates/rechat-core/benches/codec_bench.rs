//! Criterion benchmarks for the ReChat frame codec.
//!
//! Measures encode and decode latency for each message type, with `img`
//! payloads at a few representative sizes.
//!
//! Run with:
//! ```bash
//! cargo bench --package rechat-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rechat_core::protocol::codec::{encode_frame, DEFAULT_MAX_FRAME_LEN};
use rechat_core::protocol::messages::{PresenceEvent, RosterEntry, WireMessage};

// ── Message fixtures ──────────────────────────────────────────────────────────

fn make_hello() -> WireMessage {
    WireMessage::Hello {
        id: "bench@example.com".to_string(),
        name: Some("benchmark-peer".to_string()),
    }
}

fn make_presence_req() -> WireMessage {
    WireMessage::PresenceReq
}

fn make_roster(entries: usize) -> WireMessage {
    WireMessage::Roster {
        list: (0..entries)
            .map(|i| RosterEntry {
                id: format!("peer-{i}"),
                addr: format!("10.0.0.{}", i % 250 + 1),
            })
            .collect(),
    }
}

fn make_presence() -> WireMessage {
    WireMessage::Presence {
        event: PresenceEvent::Online,
        id: "bench@example.com".to_string(),
        name: Some("benchmark-peer".to_string()),
    }
}

fn make_msg() -> WireMessage {
    WireMessage::Msg {
        from: "alice".to_string(),
        to: Some("bob".to_string()),
        body: "a fairly typical chat line, neither tiny nor huge".to_string(),
        ts: 1_700_000_000.25,
    }
}

fn make_img(payload_len: usize) -> WireMessage {
    let bytes = vec![0xA5u8; payload_len];
    WireMessage::image(
        "alice".to_string(),
        Some("bob".to_string()),
        &bytes,
        "bench.png".to_string(),
    )
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

fn bench_encode(c: &mut Criterion) {
    let messages: &[(&str, WireMessage)] = &[
        ("Hello", make_hello()),
        ("PresenceReq", make_presence_req()),
        ("Roster(16)", make_roster(16)),
        ("Presence", make_presence()),
        ("Msg", make_msg()),
        ("Img(4KiB)", make_img(4 * 1024)),
        ("Img(256KiB)", make_img(256 * 1024)),
    ];

    let mut group = c.benchmark_group("encode_frame");
    for (name, msg) in messages {
        group.bench_with_input(BenchmarkId::new("msg", name), msg, |b, msg| {
            b.iter(|| encode_frame(black_box(msg)).expect("encode must succeed"))
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");

    let messages: &[(&str, WireMessage)] = &[
        ("Hello", make_hello()),
        ("Roster(16)", make_roster(16)),
        ("Msg", make_msg()),
        ("Img(4KiB)", make_img(4 * 1024)),
        ("Img(256KiB)", make_img(256 * 1024)),
    ];

    let mut group = c.benchmark_group("read_frame");
    for (name, msg) in messages {
        let bytes = encode_frame(msg).expect("encode must succeed for benchmark setup");
        group.bench_with_input(BenchmarkId::new("msg", name), &bytes, |b, bytes| {
            b.iter(|| {
                rt.block_on(async {
                    rechat_core::read_frame(&mut black_box(bytes.as_slice()), DEFAULT_MAX_FRAME_LEN)
                        .await
                        .expect("decode must succeed")
                })
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
