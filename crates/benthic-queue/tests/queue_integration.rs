//! # Integration tests: queues under a mock clock
//!
//! Long-horizon fairness, TTL behavior, and the full stack: DCCL-encoded
//! frames flowing through queues, the modem boundary, and back through the
//! receive dispatch. The "modem" is simulated by passing frames directly.

use bytes::Bytes;
use quanta::Clock;
use std::time::Duration;

use benthic_dccl::engine::{Codec, CodecConfig};
use benthic_dccl::header::Header;
use benthic_dccl::schema::{
    DynamicMessage, FieldDef, FieldKind, FieldOptions, Label, MessageSchema, NumericType, Value,
};
use benthic_dccl::QUERY_DESTINATION_ID;
use benthic_queue::{DataRequest, QueueConfig, QueueEvent, QueueManager};

fn query(frame: u32) -> DataRequest {
    DataRequest {
        frame,
        dest: QUERY_DESTINATION_ID,
        max_bytes: 32,
    }
}

fn stream_cfg(stream_id: u32, p0: f64, tau: Duration) -> QueueConfig {
    QueueConfig {
        stream_id,
        name: format!("stream-{stream_id}"),
        capacity: 64,
        ttl: Duration::from_secs(7200),
        base_priority: p0,
        time_constant: tau,
        ack: false,
        on_demand: false,
        dest_filter: None,
    }
}

// ─── Fairness ───────────────────────────────────────────────────────────────

/// Two queues with equal `P0/τ` converge to a 1:1 selection ratio: P0=10,
/// τ=10 s against P0=1, τ=1 s. After 1000 selections the split is within 5%.
#[test]
fn selection_ratio_approaches_p0_over_tau() {
    let (clock, mock) = Clock::mock();
    let mut mgr = QueueManager::with_clock(clock);
    mgr.add_queue(stream_cfg(1, 10.0, Duration::from_secs(10)))
        .unwrap();
    mgr.add_queue(stream_cfg(2, 1.0, Duration::from_secs(1)))
        .unwrap();

    let mut counts = [0u32; 2];
    for i in 0..1000u32 {
        // Infinite supply: keep one message in each queue.
        for stream in [1u32, 2] {
            if mgr.queue(stream).unwrap().queued_len() == 0 {
                let msg = mgr
                    .queue(stream)
                    .unwrap()
                    .cfg()
                    .message(Bytes::copy_from_slice(&[stream as u8; 8]), 2);
                mgr.push(stream, msg).unwrap();
            }
        }
        mock.increment(Duration::from_secs(1));
        let frame = mgr.next_frame(&DataRequest {
            frame: i,
            dest: QUERY_DESTINATION_ID,
            max_bytes: 8, // exactly one message per frame
        });
        match frame.unwrap().data[0] {
            1 => counts[0] += 1,
            2 => counts[1] += 1,
            other => panic!("unexpected stream tag {other}"),
        }
    }

    let ratio = counts[0] as f64 / counts[1] as f64;
    assert!(
        (0.95..=1.05).contains(&ratio),
        "P0/τ are equal, expected ~1:1, got {}:{} (ratio {ratio:.3})",
        counts[0],
        counts[1]
    );
}

// ─── TTL ────────────────────────────────────────────────────────────────────

#[test]
fn one_second_ttl_expires_exactly_once() {
    let (clock, mock) = Clock::mock();
    let mut mgr = QueueManager::with_clock(clock);
    let mut cfg = stream_cfg(1, 1.0, Duration::from_secs(10));
    cfg.ttl = Duration::from_secs(1);
    mgr.add_queue(cfg).unwrap();

    let msg = mgr
        .queue(1)
        .unwrap()
        .cfg()
        .message(Bytes::from_static(&[0xAB; 4]), 2);
    mgr.push(1, msg).unwrap();

    mock.increment(Duration::from_secs(2));
    assert!(
        mgr.next_frame(&query(0)).is_none(),
        "entry created 2s ago with ttl 1s must not be selected"
    );

    let expired: Vec<_> = mgr
        .drain_events()
        .filter(|e| matches!(e, QueueEvent::Expired { stream_id: 1, .. }))
        .collect();
    assert_eq!(expired.len(), 1, "exactly one expiry notification");
    assert_eq!(mgr.expire_all(), 0);
}

// ─── Full stack ─────────────────────────────────────────────────────────────

fn report_schema() -> MessageSchema {
    MessageSchema {
        name: "DepthReport".into(),
        dccl_id: Some(8),
        fields: vec![
            FieldDef {
                name: "depth_m".into(),
                label: Label::Required,
                kind: FieldKind::Numeric(NumericType::Int32),
                options: FieldOptions {
                    min: Some(0.0),
                    max: Some(6000.0),
                    ..Default::default()
                },
            },
            FieldDef {
                name: "ok".into(),
                label: Label::Required,
                kind: FieldKind::Bool,
                options: FieldOptions::default(),
            },
        ],
    }
}

/// Encode with the codec, queue, pull a frame, "transmit", dispatch on the
/// receive side, decode, ack. The whole send path of one report.
#[test]
fn encoded_report_rides_a_frame_end_to_end() {
    let mut codec = Codec::new(CodecConfig::default()).unwrap();
    codec.load(report_schema()).unwrap();

    let mut report = DynamicMessage::new();
    report.set("depth_m", Value::Integer(1500));
    report.set("ok", Value::Bool(true));
    let bytes = codec.encode(&Header::new(8, 100, 1, 2), &report).unwrap();

    // Sender side.
    let (clock, _mock) = Clock::mock();
    let mut mgr = QueueManager::with_clock(clock);
    let mut cfg = stream_cfg(1, 1.0, Duration::from_secs(10));
    cfg.ack = true;
    mgr.add_queue(cfg).unwrap();

    let msg = mgr.queue(1).unwrap().cfg().message(bytes.clone(), 2);
    mgr.push(1, msg).unwrap();

    let frame = mgr.next_frame(&query(3)).unwrap();
    assert_eq!(frame.dest, 2);
    assert_eq!(frame.message_count, 1);
    assert_eq!(frame.data, bytes, "single-message frame is the raw encoding");

    // Receiver side: id peek routes without a full decode.
    let (rclock, _m) = Clock::mock();
    let mut receiver = QueueManager::with_clock(rclock);
    let id = receiver.handle_inbox(frame.data.clone()).unwrap();
    assert_eq!(id, 8);

    let (header, decoded) = codec.decode(&frame.data).unwrap();
    assert_eq!(header.src, 1);
    assert_eq!(decoded, report);

    // The modem confirms the frame; the entry completes.
    assert_eq!(mgr.handle_ack(3), 1);
    assert_eq!(mgr.queue(1).unwrap().len(), 0);
    assert!((mgr.stats().ack_rate() - 1.0).abs() < 1e-9);
}

/// Two small encoded reports pack into one frame; the leading header gets
/// the multimessage flag and the trailing one stays clean.
#[test]
fn two_reports_pack_with_multimessage_flag() {
    let mut codec = Codec::new(CodecConfig::default()).unwrap();
    codec.load(report_schema()).unwrap();

    let mut encode = |depth: i64| {
        let mut m = DynamicMessage::new();
        m.set("depth_m", Value::Integer(depth));
        m.set("ok", Value::Bool(true));
        codec.encode(&Header::new(8, 0, 1, 2), &m).unwrap()
    };
    let first = encode(100);
    let second = encode(200);
    let each = first.len();

    let (clock, _mock) = Clock::mock();
    let mut mgr = QueueManager::with_clock(clock);
    mgr.add_queue(stream_cfg(1, 1.0, Duration::from_secs(10)))
        .unwrap();
    for b in [first.clone(), second.clone()] {
        let msg = mgr.queue(1).unwrap().cfg().message(b, 2);
        mgr.push(1, msg).unwrap();
    }

    let frame = mgr.next_frame(&query(0)).unwrap();
    assert_eq!(frame.message_count, 2);
    assert_eq!(frame.data.len(), 2 * each);

    // Leading message now reads as multimessage; the decoder still accepts
    // it, and the second message is byte-identical to its original encoding.
    let (h1, m1) = codec.decode(&frame.data[..each]).unwrap();
    assert!(h1.multimessage);
    assert_eq!(m1.get("depth_m"), Some(&Value::Integer(100)));
    assert_eq!(&frame.data[each..], &second[..]);
}
