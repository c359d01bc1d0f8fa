//! Console behavior seen from the session side: host output is paced by the
//! More... state, and fullscreen programs drive the console through FSIO
//! commands handled by the encoded transport.

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use mecaff::console::{
    ConsoleControl, ConsoleGeometry, ConsoleInputSink, ConsoleState, InputState, LineTag, SinkAction, Vm3270Console,
};
use mecaff::error::MecaffResult;
use mecaff::lib3270::TerminalCapabilities;
use mecaff::protocol_common::{ascii_to_ebcdic_vec, shared_writer};
use mecaff::transport::{DataDecoder, DataEncoder, EncodedTransport, TransportEncoding, TransportMode};

const SESSION_ID: u32 = 4711;

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    actions: Mutex<Vec<SinkAction>>,
}

impl ConsoleInputSink for RecordingSink {
    fn console_action(&self, action: SinkAction) -> MecaffResult<bool> {
        self.actions.lock().unwrap().push(action);
        Ok(false)
    }
}

impl RecordingSink {
    fn take(&self) -> Vec<SinkAction> {
        std::mem::take(&mut *self.actions.lock().unwrap())
    }
}

fn started_console(sink: &Arc<RecordingSink>) -> (Arc<Vm3270Console>, Capture) {
    let capture = Capture::default();
    let sink: Arc<dyn ConsoleInputSink> = sink.clone();
    let console = Arc::new(Vm3270Console::new(
        9,
        ConsoleGeometry::new(24, 80),
        0,
        shared_writer(capture.clone()),
        Arc::downgrade(&sink),
    ));
    console.start().unwrap();
    console.set_input_state(InputState::VmRead).unwrap();
    (console, capture)
}

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(10));
    }
}

fn command(cmd: char) -> DataEncoder {
    let mut encoder = DataEncoder::new(TransportEncoding::new(TransportMode::Tn3215));
    encoder.reset().append_char(cmd);
    encoder
}

fn response(transport: &mut EncodedTransport) -> DataDecoder {
    let chunk = transport.take_next_chunk().expect("response chunk");
    let mut decoder = DataDecoder::new(TransportEncoding::new(TransportMode::Tn3215));
    decoder.use_buffer(&chunk);
    assert!(decoder.test_for_start());
    decoder
}

#[test]
fn test_more_state_blocks_host_output_until_enter() {
    let sink = Arc::new(RecordingSink::default());
    let (console, _capture) = started_console(&sink);
    console.set_input_state(InputState::Running).unwrap();

    let written = Arc::new(AtomicUsize::new(0));
    let writer = {
        let console = Arc::clone(&console);
        let written = Arc::clone(&written);
        thread::spawn(move || {
            for i in 0..30 {
                console.append_host_line(&ascii_to_ebcdic_vec(&format!("line {i}"))).unwrap();
                written.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    wait_for("More... state", || console.state() == ConsoleState::More);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(written.load(Ordering::SeqCst), 20);
    assert!(!writer.is_finished());

    console.process_bytes_from_terminal(&[0x7D, 0x5B, 0x60, 0xFF, 0xEF]).unwrap();
    writer.join().unwrap();
    assert_eq!(written.load(Ordering::SeqCst), 30);
    assert_eq!(console.state(), ConsoleState::Running);
    assert!(sink.take().is_empty());
    console.close();
}

#[test]
fn test_fullscreen_program_cycle() {
    let sink = Arc::new(RecordingSink::default());
    let (console, capture) = started_console(&sink);
    let caps = TerminalCapabilities::from_terminal_type("IBM-3278-2");
    let mut transport = EncodedTransport::with_session_id(TransportMode::Tn3215, &caps, 9, SESSION_ID);

    let mut init = command('W');
    init.encode_int(SESSION_ID).encode_int(1).encode_int(5);
    assert!(transport.handle_host_line(init.as_bytes(), &*console).unwrap());
    let mut rc = response(&mut transport);
    assert_eq!((rc.next_char(), rc.decode_int()), ('W', 0));
    assert_eq!(console.state(), ConsoleState::FsOut);

    capture.0.lock().unwrap().clear();
    let mut write = command('F');
    write.encode_data(&[0xF5, 0xC3, 0x11, 0x40, 0x40]);
    assert!(transport.handle_host_line(write.as_bytes(), &*console).unwrap());
    let screen = capture.0.lock().unwrap().clone();
    assert_eq!(screen.first(), Some(&0xF5));
    assert!(console.may_read_full_screen());

    let mut read = command('I');
    read.encode_int(SESSION_ID);
    assert!(transport.handle_host_line(read.as_bytes(), &*console).unwrap());
    assert!(transport.is_host_requesting_fs_in());
    let actions = console
        .read_full_screen(transport.fs_in_timeout(), transport.fs_in_grace_period())
        .unwrap();
    assert!(actions.is_empty());
    assert_eq!(console.state(), ConsoleState::FsIn);

    console.process_bytes_from_terminal(&[0x7D, 0x40, 0x40, 0xFF, 0xEF]).unwrap();
    let input = match sink.take().as_slice() {
        [SinkAction::FullScreenInput(input)] => input.clone(),
        other => panic!("unexpected actions {other:?}"),
    };
    assert_eq!(input, vec![0x7D, 0x40, 0x40]);

    transport.reset_fs_in_request();
    transport.prepare_full_screen_input_transfer(&input);
    let mut received = Vec::new();
    while transport.available_chunks() > 0 {
        let mut chunk = response(&mut transport);
        let code = chunk.next_char();
        assert!(code == 'i' || code == 'I');
        received.extend(chunk.decode_data());
    }
    assert_eq!(received, input);
    console.transfer_completed().unwrap();
    console.close();
}

#[test]
fn test_foreign_session_cannot_take_the_screen() {
    let sink = Arc::new(RecordingSink::default());
    let (console, _capture) = started_console(&sink);
    let caps = TerminalCapabilities::from_terminal_type("IBM-3278-2");
    let mut transport = EncodedTransport::with_session_id(TransportMode::Tn3215, &caps, 9, SESSION_ID);

    let mut init = command('W');
    init.encode_int(SESSION_ID + 1).encode_int(1).encode_int(5);
    assert!(transport.handle_host_line(init.as_bytes(), &*console).unwrap());
    let mut rc = response(&mut transport);
    assert_eq!((rc.next_char(), rc.decode_int()), ('W', 2));
    assert_eq!(console.state(), ConsoleState::VmRead);

    let mut read = command('I');
    read.encode_int(SESSION_ID);
    transport.handle_host_line(read.as_bytes(), &*console).unwrap();
    let mut rc = response(&mut transport);
    assert_eq!((rc.next_char(), rc.decode_int()), ('E', 1));
    console.close();
}

#[test]
fn test_four_long_lines_fill_the_output_zone() {
    let sink = Arc::new(RecordingSink::default());
    let (console, _capture) = started_console(&sink);
    console.set_input_state(InputState::Running).unwrap();
    let before = console.output_line_count();

    // 3 x 6 rows, then 4 rows reaching the 22 row output zone
    let lines: Vec<Vec<u8>> = [480, 470, 401, 300]
        .iter()
        .enumerate()
        .map(|(i, &len)| ascii_to_ebcdic_vec(&format!("{i}").repeat(len)))
        .collect();

    let writer = {
        let console = Arc::clone(&console);
        let lines = lines.clone();
        thread::spawn(move || {
            for line in &lines {
                console.append_host_line(line).unwrap();
            }
        })
    };

    wait_for("More... state", || console.state() == ConsoleState::More);
    assert_eq!(console.output_line_count(), before + 4);
    assert!(!writer.is_finished());

    console.process_bytes_from_terminal(&[0x7D, 0x5B, 0x60, 0xFF, 0xEF]).unwrap();
    writer.join().unwrap();
    assert_eq!(console.state(), ConsoleState::Running);
    assert_eq!(console.output_line_count(), before + 4);
    let shown: Vec<(Vec<u8>, LineTag)> = lines.into_iter().map(|line| (line, LineTag::HostOutput)).collect();
    assert_eq!(console.last_output_lines(4), shown);
    console.close();
}
