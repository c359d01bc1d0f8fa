//! FSIO commands in 3270 mode (EBCDIC transport) against a mock console.

use std::sync::Mutex;

use mecaff::console::{Attr, Color, ConsoleControl, ConsoleElement, DisplayAttrs};
use mecaff::error::MecaffResult;
use mecaff::lib3270::TerminalCapabilities;
use mecaff::protocol_common::ascii_to_ebcdic_vec;
use mecaff::transport::fsio::{RC_BAD_SESSION, RC_NOT_AVAILABLE, TRANSPORT_VERSION};
use mecaff::transport::{DataDecoder, DataEncoder, EncodedTransport, TransportEncoding, TransportMode};

const SESSION_ID: u32 = 0x0BAD_CAFE;

#[derive(Default)]
struct MockConsole {
    attrs: Mutex<DisplayAttrs>,
    pf: Mutex<Vec<Option<String>>>,
    screen: Mutex<Vec<u8>>,
    acquisitions: Mutex<Vec<bool>>,
    owned: Mutex<bool>,
    redraws: Mutex<usize>,
}

impl MockConsole {
    fn new() -> Self {
        let console = Self::default();
        *console.pf.lock().unwrap() = vec![None; 25];
        console
    }
}

impl ConsoleControl for MockConsole {
    fn attr(&self, elem: ConsoleElement) -> Attr {
        self.attrs.lock().unwrap().get(elem)
    }
    fn set_attr(&self, elem: ConsoleElement, attr: Attr) {
        self.attrs.lock().unwrap().set(elem, attr);
    }
    fn pf_command(&self, pf: u32) -> Option<String> {
        self.pf.lock().unwrap().get(pf as usize).cloned().flatten()
    }
    fn set_pf_command(&self, pf: u32, command: Option<&str>) {
        self.pf.lock().unwrap()[pf as usize] = command.map(str::to_string);
    }
    fn redraw_screen(&self) -> MecaffResult<()> {
        *self.redraws.lock().unwrap() += 1;
        Ok(())
    }
    fn acquire_full_screen(&self, requires_previous_full_screen: bool) -> MecaffResult<bool> {
        self.acquisitions.lock().unwrap().push(requires_previous_full_screen);
        let granted = !requires_previous_full_screen;
        *self.owned.lock().unwrap() = granted;
        Ok(granted)
    }
    fn write_full_screen(&self, stream3270: &[u8]) -> MecaffResult<()> {
        self.screen.lock().unwrap().extend_from_slice(stream3270);
        Ok(())
    }
    fn may_read_full_screen(&self) -> bool {
        *self.owned.lock().unwrap()
    }
    fn set_fs_lock_timeout(&self, _value: i32) -> MecaffResult<()> {
        Ok(())
    }
    fn set_flow_mode(&self, _flow_mode: bool) -> MecaffResult<()> {
        Ok(())
    }
}

fn transport(terminal_type: &str) -> EncodedTransport {
    let caps = TerminalCapabilities::from_terminal_type(terminal_type);
    EncodedTransport::with_session_id(TransportMode::Tn3270, &caps, 4, SESSION_ID)
}

fn command(cmd: char) -> DataEncoder {
    let mut encoder = DataEncoder::new(TransportEncoding::new(TransportMode::Tn3270));
    encoder.reset().append_char(cmd);
    encoder
}

fn response(transport: &mut EncodedTransport) -> DataDecoder {
    let chunk = transport.take_next_chunk().expect("response chunk");
    let mut decoder = DataDecoder::new(TransportEncoding::new(TransportMode::Tn3270));
    decoder.use_buffer(&chunk);
    assert!(decoder.test_for_start());
    decoder
}

#[test]
fn test_term_data_describes_a_color_terminal() {
    let mut t = transport("IBM-3279-5-E");
    let console = MockConsole::new();
    console.set_pf_command(3, Some("!CMDCLR"));
    console.set_pf_command(12, Some("!CMDPREV"));

    assert!(t.handle_host_line(command('T').as_bytes(), &console).unwrap());
    let mut d = response(&mut t);
    assert_eq!(d.next_char(), 'T');
    assert_eq!(d.decode_int(), TRANSPORT_VERSION);
    assert_eq!(d.decode_data(), ascii_to_ebcdic_vec("IBM-3279-5-E"));
    assert_eq!((d.decode_int(), d.decode_int()), (27, 132));
    assert_eq!((d.decode_int(), d.decode_int(), d.decode_int()), (1, 1, 1));
    assert_eq!(d.decode_int(), SESSION_ID);
    assert_eq!(d.decode_int(), 3270);
    for elem in ConsoleElement::ALL {
        assert_eq!(d.decode_int(), elem.index());
        d.decode_int();
    }
    assert_eq!(d.decode_int(), (1 << 2) | (1 << 11));
    assert!(!d.had_parse_error());
}

#[test]
fn test_pf_data_for_assigned_and_free_keys() {
    let mut t = transport("IBM-3278-2");
    let console = MockConsole::new();
    console.set_pf_command(4, Some("FILELIST"));

    let mut cmd = command('t');
    cmd.encode_int(4);
    assert!(t.handle_host_line(cmd.as_bytes(), &console).unwrap());
    let mut d = response(&mut t);
    assert_eq!(d.next_char(), 't');
    assert_eq!(d.decode_int(), 8);
    assert_eq!(d.remaining_to_string().as_deref(), Some("FILELIST"));

    let mut cmd = command('t');
    cmd.encode_int(5);
    t.handle_host_line(cmd.as_bytes(), &console).unwrap();
    let mut d = response(&mut t);
    assert_eq!((d.next_char(), d.decode_int()), ('t', 0));

    let mut cmd = command('t');
    cmd.encode_int(25);
    assert!(!t.handle_host_line(cmd.as_bytes(), &console).unwrap());
}

#[test]
fn test_console_attributes_are_set_and_redrawn() {
    let mut t = transport("IBM-3279-2-E");
    let console = MockConsole::new();
    let mut cmd = command('C');
    // CmdInput: white highlighted, OutNormal: green
    cmd.encode_int(2).encode_int(4).encode_int(107).encode_int(0).encode_int(4);
    assert!(t.handle_host_line(cmd.as_bytes(), &console).unwrap());
    assert_eq!(console.attr(ConsoleElement::CmdInput), Attr::new(Color::White, true));
    assert_eq!(console.attr(ConsoleElement::OutNormal), Attr::new(Color::Green, false));
    assert_eq!(*console.redraws.lock().unwrap(), 1);
    let mut d = response(&mut t);
    assert_eq!((d.next_char(), d.decode_int()), ('C', 0));
}

#[test]
fn test_foreign_session_ids_are_rejected() {
    let mut t = transport("IBM-3278-2");
    let console = MockConsole::new();

    let mut cmd = command('W');
    cmd.encode_int(SESSION_ID ^ 1).encode_int(1).encode_int(100);
    assert!(t.handle_host_line(cmd.as_bytes(), &console).unwrap());
    let mut d = response(&mut t);
    assert_eq!((d.next_char(), d.decode_int()), ('W', RC_BAD_SESSION));
    assert!(console.acquisitions.lock().unwrap().is_empty());

    let mut cmd = command('I');
    cmd.encode_int(SESSION_ID ^ 1);
    assert!(t.handle_host_line(cmd.as_bytes(), &console).unwrap());
    let mut d = response(&mut t);
    assert_eq!((d.next_char(), d.decode_int()), ('E', RC_BAD_SESSION));
    assert!(!t.is_host_requesting_fs_in());
}

#[test]
fn test_write_requires_previous_screen() {
    let mut t = transport("IBM-3278-2");
    let console = MockConsole::new();

    // Write (0) only modifies an existing fullscreen
    let mut cmd = command('W');
    cmd.encode_int(SESSION_ID).encode_int(0).encode_int(10);
    t.handle_host_line(cmd.as_bytes(), &console).unwrap();
    let mut d = response(&mut t);
    assert_eq!((d.next_char(), d.decode_int()), ('W', RC_NOT_AVAILABLE));

    // Erase/Write (1) starts a new one
    let mut cmd = command('W');
    cmd.encode_int(SESSION_ID).encode_int(1).encode_int(10);
    t.handle_host_line(cmd.as_bytes(), &console).unwrap();
    let mut d = response(&mut t);
    assert_eq!((d.next_char(), d.decode_int()), ('W', 0));
    assert_eq!(*console.acquisitions.lock().unwrap(), vec![true, false]);

    let mut cmd = command('F');
    cmd.encode_data(&[0xF5, 0xC3, 0x11, 0x5D, 0x7F]);
    assert!(t.handle_host_line(cmd.as_bytes(), &console).unwrap());
    assert_eq!(*console.screen.lock().unwrap(), vec![0xF5, 0xC3, 0x11, 0x5D, 0x7F]);
}

#[test]
fn test_broken_commands_are_plain_output() {
    let mut t = transport("IBM-3278-2");
    let console = MockConsole::new();

    assert!(!t.handle_host_line(&ascii_to_ebcdic_vec("R; T=0.01/0.01 10:00:00"), &console).unwrap());
    assert!(!t.handle_host_line(command('Z').as_bytes(), &console).unwrap());

    // data block without its final byte pair
    let mut cmd = command('F');
    cmd.encode_data(&[0x11, 0x40]);
    let bytes = cmd.as_bytes();
    assert!(!t.handle_host_line(&bytes[..bytes.len() - 2], &console).unwrap());
    assert!(console.screen.lock().unwrap().is_empty());

    // ASCII start sequence is not recognized in 3270 mode
    assert!(!t.handle_host_line(b"<{>}T", &console).unwrap());
    assert_eq!(t.available_chunks(), 0);
}
