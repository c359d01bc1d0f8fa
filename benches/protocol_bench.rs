use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mecaff::error::MecaffResult;
use mecaff::lib3270::{BufferAddress, CommandCode, DataOutStream3270, FieldFlags, OrderParser, RecordAssembler, RecordSink};
use mecaff::lib3270::TerminalCapabilities;
use mecaff::transport::{DataDecoder, DataEncoder, EncodedTransport, TransportEncoding, TransportMode};

/// Counts what the parser delivers
#[derive(Default)]
struct CountingSink {
    strings: usize,
    fields: usize,
}

impl RecordSink for CountingSink {
    fn command(&mut self, _command: CommandCode) -> MecaffResult<()> {
        Ok(())
    }

    fn host_string(&mut self, text: &[u8], _at: &BufferAddress) -> MecaffResult<()> {
        self.strings += text.len();
        Ok(())
    }

    fn start_field(&mut self, _flags: FieldFlags) -> MecaffResult<()> {
        self.fields += 1;
        Ok(())
    }

    fn structured_field(&mut self, _record: &[u8]) -> MecaffResult<()> {
        Ok(())
    }
}

fn full_screen() -> Vec<u8> {
    (0..1920u32).map(|i| 0x40 + (i % 64) as u8).collect()
}

/// A CP screen: 22 output lines, status and input field
fn host_screen() -> Vec<u8> {
    let mut out = DataOutStream3270::new(80);
    out.cmd_erase_write(true, false, false);
    for row in 1..=22 {
        out.set_buffer_address(row, 1)
            .start_field(true, false, false, false, false)
            .append_ascii(&format!("DMSLST002I FILE 'PROFILE{row:02} EXEC A1' LISTED"));
    }
    out.set_buffer_address(23, 1)
        .start_field(true, false, true, false, false)
        .append_ascii("RUNNING   VM370")
        .set_buffer_address(24, 1)
        .start_field(false, false, false, false, false)
        .insert_cursor()
        .telnet_eor();
    out.as_bytes().to_vec()
}

fn bench_encode_screen(c: &mut Criterion) {
    let screen = full_screen();
    let enc = TransportEncoding::new(TransportMode::Tn3215);

    c.bench_function("encode_screen_3215", |b| {
        b.iter(|| {
            let mut encoder = DataEncoder::new(enc.clone());
            encoder.reset().encode_int(black_box(4711)).encode_data(black_box(&screen));
            black_box(encoder.as_bytes().len())
        })
    });
}

fn bench_decode_screen(c: &mut Criterion) {
    let enc = TransportEncoding::new(TransportMode::Tn3270);
    let mut encoder = DataEncoder::new(enc.clone());
    encoder.reset().encode_data(&full_screen());
    let encoded = encoder.as_bytes().to_vec();

    c.bench_function("decode_screen_3270", |b| {
        b.iter(|| {
            let mut decoder = DataDecoder::new(enc.clone());
            decoder.use_buffer(black_box(&encoded));
            decoder.test_for_start();
            black_box(decoder.decode_data())
        })
    });
}

fn bench_input_transfer(c: &mut Criterion) {
    let caps = TerminalCapabilities::from_terminal_type("IBM-3278-2");
    let input = full_screen();

    c.bench_function("fullscreen_input_chunks", |b| {
        let mut transport = EncodedTransport::with_session_id(TransportMode::Tn3215, &caps, 1, 1);
        b.iter(|| {
            transport.prepare_full_screen_input_transfer(black_box(&input));
            let mut total = 0;
            while let Some(chunk) = transport.take_next_chunk() {
                total += chunk.len();
            }
            black_box(total)
        })
    });
}

fn bench_parse_host_screen(c: &mut Criterion) {
    let record = host_screen();

    c.bench_function("parse_host_screen", |b| {
        b.iter(|| {
            let mut assembler = RecordAssembler::new();
            let mut parser = OrderParser::new();
            let mut sink = CountingSink::default();
            let (head, tail) = record.split_at(record.len() / 2);
            let _ = assembler.push(black_box(head));
            if let Ok(Some(complete)) = assembler.push(black_box(tail)) {
                let _ = parser.process(&complete, &mut sink);
            }
            black_box((sink.strings, sink.fields))
        })
    });
}

criterion_group!(
    benches,
    bench_encode_screen,
    bench_decode_screen,
    bench_input_transfer,
    bench_parse_host_screen
);
criterion_main!(benches);
