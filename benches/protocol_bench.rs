use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tokio::io::duplex;

use tn5250_core::lib5250::codes::*;
use tn5250_core::lib5250::record::{RecordHeader, OP_PUT_GET};
use tn5250_core::lib5250::stream::{escape_record, RecordStream};
use tn5250_core::{Session, SessionConfig};

/// A sign-on style screen: text, three input fields and a read.
fn signon_screen() -> Vec<u8> {
    let mut data = vec![ESC, CMD_CLEAR_UNIT, ESC, CMD_WRITE_TO_DISPLAY, 0x00, CC2_UNLOCK];
    for row in 1..=20u8 {
        data.extend_from_slice(&[SBA, row, 2]);
        data.extend(std::iter::repeat(0xC1 + row % 9).take(60));
    }
    for row in [6u8, 7, 8] {
        data.extend_from_slice(&[SBA, row, 53, SF, 0x40, 0x00, 0x24, 0x00, 0x0A]);
    }
    data.extend_from_slice(&[ESC, CMD_READ_MDT_FIELDS, 0x00, 0x00]);
    escape_record(&RecordHeader::new(OP_PUT_GET).encode(&data))
}

fn bench_framing(c: &mut Criterion) {
    let wire = signon_screen();
    c.bench_function("frame_records", |b| {
        b.iter(|| {
            let (client, _host) = duplex(64);
            let mut stream = RecordStream::new(client);
            stream.ingest(black_box(&wire)).unwrap();
            black_box(stream.get_record())
        })
    });
}

fn bench_decode(c: &mut Criterion) {
    let wire = signon_screen();
    c.bench_function("decode_signon_screen", |b| {
        b.iter(|| {
            let (client, _host) = duplex(64);
            let mut session = Session::new(SessionConfig::new(), client).unwrap();
            session.stream_mut().ingest(black_box(&wire)).unwrap();
            black_box(session.process_pending_records())
        })
    });
}

criterion_group!(benches, bench_framing, bench_decode);
criterion_main!(benches);
