// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire framing benchmarks: the hot paths of the discovery and data planes.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use constellation::config::Dictionary;
use constellation::message::cdtp::{CdtpHeader, CdtpMessage};
use constellation::message::{ChirpMessage, ChirpMessageType};
use constellation::protocol::cdtp::MessageType;
use constellation::protocol::ServiceIdentifier;
use constellation::transport::frame::{encode_unit, FrameDecoder};

fn chirp_roundtrip(c: &mut Criterion) {
    let msg = ChirpMessage::with_names(
        ChirpMessageType::Offer,
        "edda",
        "Dummy.t1",
        ServiceIdentifier::Data,
        47123,
    );
    let wire = msg.assemble();

    c.bench_function("chirp_assemble", |b| b.iter(|| black_box(msg).assemble()));
    c.bench_function("chirp_disassemble", |b| {
        b.iter(|| ChirpMessage::disassemble(black_box(&wire)).expect("valid"))
    });
}

fn dictionary_roundtrip(c: &mut Criterion) {
    let mut dict = Dictionary::new();
    dict.insert("run_id", "benchmark");
    dict.insert("_eor_timeout", 10u64);
    dict.insert("rate", 2.5f64);
    dict.insert("channels", vec![1i64, 2, 3, 4, 5, 6, 7, 8]);
    let wire = dict.assemble();

    c.bench_function("dictionary_assemble", |b| b.iter(|| black_box(&dict).assemble()));
    c.bench_function("dictionary_disassemble", |b| {
        b.iter(|| Dictionary::disassemble(black_box(&wire)).expect("valid"))
    });
}

fn cdtp_data_message(c: &mut Criterion) {
    let mut msg = CdtpMessage::with_frames(
        CdtpHeader::new("Dummy.t1", 42, MessageType::Data),
        1,
    );
    msg.add_payload(vec![0xAB; 4096]);
    let frames = msg.assemble();

    c.bench_function("cdtp_assemble", |b| b.iter(|| black_box(&msg).assemble()));
    c.bench_function("cdtp_disassemble", |b| {
        b.iter(|| CdtpMessage::disassemble(black_box(&frames)).expect("valid"))
    });
}

fn unit_framing(c: &mut Criterion) {
    let frames = vec![vec![0u8; 64], vec![0xCD; 16 * 1024]];
    let wire = encode_unit(&frames);

    c.bench_function("unit_encode", |b| b.iter(|| encode_unit(black_box(&frames))));
    c.bench_function("unit_decode", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            decoder.push(black_box(&wire));
            decoder.next_unit().expect("valid").expect("complete")
        })
    });
}

criterion_group!(benches, chirp_roundtrip, dictionary_roundtrip, cdtp_data_message, unit_framing);
criterion_main!(benches);
