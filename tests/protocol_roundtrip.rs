//! Cross-crate integration test: a request is framed by `shepherd-wire`,
//! decoded back into a `Request`, dispatched by `shepherd-server`, and
//! the resulting reply is itself framed and decoded — exercising the
//! full control-protocol loop without opening a real TCP socket.

use shepherd_server::dispatch;
use shepherd_server::flags::DaemonFlags;
use shepherd_server::lock_registry::ConnectionLocks;
use shepherd_wire::{Message, Mode, Reply, Request};

fn roundtrip(msg: &Message) -> Message {
    let mut buf = Vec::new();
    msg.write_to(&mut buf).unwrap();
    Message::read_from(&mut &buf[..]).unwrap()
}

#[test]
fn ping_survives_the_wire_and_comes_back_pong_with_the_same_id() {
    let dir = tempfile::tempdir().unwrap();
    let mut locks = ConnectionLocks::new(dir.path().join("lock"));
    let flags = DaemonFlags::new();

    let on_wire = Message::empty(Mode::Control, Request::Ping as u8, 42);
    let decoded = roundtrip(&on_wire);
    assert_eq!(decoded.id, 42);
    let req = Request::from_u8(decoded.cmd).unwrap();
    assert_eq!(req, Request::Ping);

    let reply = dispatch::handle(req, decoded.id, &mut locks, &flags, false);
    let reply_on_wire = roundtrip(&reply);
    assert_eq!(reply_on_wire.id, 42);
    assert_eq!(Reply::from_u8(reply_on_wire.cmd).unwrap(), Reply::Pong);
}

#[test]
fn borrow_state_while_private_is_refused_over_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let mut locks = ConnectionLocks::new(dir.path().join("lock"));
    let flags = DaemonFlags::new();
    flags.set_private(true);

    let on_wire = Message::empty(Mode::Control, Request::BorrowState as u8, 1);
    let decoded = roundtrip(&on_wire);
    let req = Request::from_u8(decoded.cmd).unwrap();

    let reply = dispatch::handle(req, decoded.id, &mut locks, &flags, flags.is_private());
    let reply_on_wire = roundtrip(&reply);
    assert_eq!(
        Reply::from_u8(reply_on_wire.cmd).unwrap(),
        Reply::NotAuthorized
    );
}

#[test]
fn welcome_is_the_first_thing_a_new_connection_would_see() {
    let welcome = Message::welcome(0);
    let decoded = roundtrip(&welcome);
    assert_eq!(Reply::from_u8(decoded.cmd).unwrap(), Reply::Welcome);
    match decoded.payload {
        shepherd_wire::Payload::Attrs(attrs) => {
            assert_eq!(attrs[0].as_str().unwrap(), shepherd_wire::PROTOCOL_VERSION);
        }
        _ => panic!("expected an attrs payload"),
    }
}

#[test]
fn an_unknown_request_code_is_rejected_before_it_ever_reaches_dispatch() {
    // Byte 255 isn't assigned to any `Request` variant; framing and
    // decoding the header/payload succeeds, but turning the command
    // byte into a `Request` must fail cleanly rather than panic.
    let on_wire = Message::empty(Mode::Control, 255, 3);
    let decoded = roundtrip(&on_wire);
    assert!(Request::from_u8(decoded.cmd).is_err());
}
