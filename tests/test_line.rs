use conduit::io::{Buffer, LineState};
use conduit::Error;

#[test]
fn test_line_read_one_byte_at_a_time() {
    let mut buffer = Buffer::new(1);
    let mut line = String::new();
    let mut state = LineState::Idle;

    for &byte in b"GET / HTTP/1.1\r\n" {
        assert_ne!(state, LineState::Complete);

        buffer.fill(&[byte]);
        buffer.flip();
        state = buffer.drain_line(&mut line, state).unwrap();
        buffer.flip();

        if byte == b'\r' {
            assert_eq!(state, LineState::CarriageReturn);
        }
    }

    assert_eq!(state, LineState::Complete);
    assert_eq!(line, "GET / HTTP/1.1");
}

#[test]
fn test_line_stops_after_terminator() {
    let mut buffer = Buffer::new(64);
    buffer.fill(b"Host: a\r\nAccept: */*\r\n");
    buffer.flip();

    let mut line = String::new();
    let state = buffer.drain_line(&mut line, LineState::Idle).unwrap();
    assert_eq!(state, LineState::Complete);
    assert_eq!(line, "Host: a");

    line.clear();
    let state = buffer.drain_line(&mut line, LineState::Idle).unwrap();
    assert_eq!(state, LineState::Complete);
    assert_eq!(line, "Accept: */*");
    assert!(buffer.is_empty());
}

#[test]
fn test_line_incomplete_keeps_reading_state() {
    let mut buffer = Buffer::new(64);
    buffer.fill(b"partial");
    buffer.flip();

    let mut line = String::new();
    let state = buffer.drain_line(&mut line, LineState::Idle).unwrap();

    assert_eq!(state, LineState::Reading);
    assert_eq!(line, "partial");
}

#[test]
fn test_empty_line() {
    let mut buffer = Buffer::new(8);
    buffer.fill(b"\r\n");
    buffer.flip();

    let mut line = String::new();
    assert_eq!(
        buffer.drain_line(&mut line, LineState::Idle).unwrap(),
        LineState::Complete
    );
    assert!(line.is_empty());
}

#[test]
fn test_lone_carriage_return_fails() {
    let mut buffer = Buffer::new(8);
    buffer.fill(b"AB\rC");
    buffer.flip();

    let mut line = String::new();
    let result = buffer.drain_line(&mut line, LineState::Idle);

    assert!(matches!(result, Err(Error::MalformedLine { found: b'C' })));
}

#[test]
fn test_lone_carriage_return_across_fills() {
    let mut buffer = Buffer::new(8);
    buffer.fill(b"AB\r");
    buffer.flip();

    let mut line = String::new();
    let state = buffer.drain_line(&mut line, LineState::Idle).unwrap();
    assert_eq!(state, LineState::CarriageReturn);

    buffer.flip();
    buffer.fill(b"x");
    buffer.flip();

    assert!(matches!(
        buffer.drain_line(&mut line, state),
        Err(Error::MalformedLine { found: b'x' })
    ));
}
