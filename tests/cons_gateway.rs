//! End-to-end CONS session over localhost sockets: a scripted 3270 terminal
//! and a fake Hercules console port talk through a running gateway.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use mecaff::config::{GatewayConfig, LineMode};
use mecaff::network::Gateway;
use mecaff::protocol_common::ascii_to_ebcdic_vec;
use mecaff::protocol_common::telnet_base::*;
use mecaff::session::SessionKind;

const IO_TIMEOUT: Duration = Duration::from_secs(10);

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Read until `needle` shows up in the accumulated data.
fn read_until_contains(stream: &mut TcpStream, seen: &mut Vec<u8>, needle: &[u8]) {
    let deadline = Instant::now() + IO_TIMEOUT;
    let mut buf = [0u8; 4096];
    while !contains(seen, needle) {
        assert!(Instant::now() < deadline, "timed out waiting for {needle:02X?}");
        let n = stream.read(&mut buf).expect("read failed");
        assert!(n > 0, "connection closed while waiting for {needle:02X?}");
        seen.extend_from_slice(&buf[..n]);
    }
}

fn expect_then_answer(terminal: &mut TcpStream, request: &[u8], answer: &[u8]) {
    let mut received = vec![0u8; request.len()];
    terminal.read_exact(&mut received).expect("negotiation request");
    assert_eq!(received, request);
    terminal.write_all(answer).unwrap();
}

/// Answer the gateway's negotiation as an IBM-3278-2 emulator would.
fn negotiate_terminal(terminal: &mut TcpStream) {
    expect_then_answer(terminal, &TN_DO_TERMINAL_TYPE, &TN_WILL_TERMINAL_TYPE);
    expect_then_answer(terminal, &TN_SB_SEND_TERMINAL_TYPE, &build_terminal_type_is(b"IBM-3278-2"));
    expect_then_answer(terminal, &TN_DO_END_OF_RECORD, &TN_WILL_END_OF_RECORD);
    expect_then_answer(terminal, &TN_WILL_END_OF_RECORD, &TN_DO_END_OF_RECORD);
    expect_then_answer(terminal, &TN_DO_BINARY, &TN_WILL_BINARY);
    expect_then_answer(terminal, &TN_WILL_BINARY, &TN_DO_BINARY);
}

fn enter(text: &str) -> Vec<u8> {
    let mut packet = vec![0x7D, 0x5B, 0x60, 0x11, 0x5B, 0x4E];
    packet.extend(ascii_to_ebcdic_vec(text));
    packet.extend_from_slice(&TN_EOR);
    packet
}

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + IO_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_cons_session_end_to_end() {
    let hercules = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = GatewayConfig {
        vm_host_name: "127.0.0.1".into(),
        vm_host_port: hercules.local_addr().unwrap().port(),
        listen: LineMode::Cons,
        no_dynamic: true,
        ..GatewayConfig::default()
    };
    let gateway = Gateway::new(config);
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    gateway.spawn_listener(SessionKind::Cons, listener).unwrap();

    let mut terminal = TcpStream::connect(("127.0.0.1", port)).unwrap();
    terminal.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
    let (mut host, _) = hercules.accept().unwrap();
    host.set_read_timeout(Some(IO_TIMEOUT)).unwrap();

    negotiate_terminal(&mut terminal);
    let mut screen = Vec::new();
    read_until_contains(&mut terminal, &mut screen, &TN_EOR);
    assert_eq!(screen[0], 0xF5, "initial screen is painted with Erase/Write");

    host.write_all(b"VM/370 Online\r\nHHCTE006A Enter input for console device 0009\r\n").unwrap();
    read_until_contains(&mut terminal, &mut screen, &ascii_to_ebcdic_vec("VM/370 Online"));
    read_until_contains(&mut terminal, &mut screen, &ascii_to_ebcdic_vec("VM read"));
    wait_for("session registration", || gateway.active_sessions() == 1);

    terminal.write_all(&enter("q disk")).unwrap();
    let mut host_input = Vec::new();
    read_until_contains(&mut host, &mut host_input, b"q disk\r\n");

    drop(terminal);
    let mut rest = Vec::new();
    let eof = host.read_to_end(&mut rest).is_ok();
    assert!(eof, "host side is closed with the terminal");
    wait_for("session cleanup", || gateway.active_sessions() == 0);
    gateway.stop();
}

#[test]
fn test_terminal_without_3270_support_is_dropped() {
    let hercules = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = GatewayConfig {
        vm_host_name: "127.0.0.1".into(),
        vm_host_port: hercules.local_addr().unwrap().port(),
        no_dynamic: true,
        ..GatewayConfig::default()
    };
    let gateway = Gateway::new(config);
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    gateway.spawn_listener(SessionKind::Cons, listener).unwrap();

    let mut terminal = TcpStream::connect(("127.0.0.1", port)).unwrap();
    terminal.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
    let (mut host, _) = hercules.accept().unwrap();
    host.set_read_timeout(Some(IO_TIMEOUT)).unwrap();

    expect_then_answer(&mut terminal, &TN_DO_TERMINAL_TYPE, &[0xFF, 0xFC, 0x18]);
    let mut rest = Vec::new();
    assert!(terminal.read_to_end(&mut rest).is_ok());
    assert!(host.read_to_end(&mut Vec::new()).is_ok());
    assert_eq!(gateway.active_sessions(), 0);
    gateway.stop();
}
