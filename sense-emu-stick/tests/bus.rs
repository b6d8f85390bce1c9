use std::net::{Ipv4Addr, SocketAddr};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use sense_emu_stick::{
    Action, Binding, Direction, InputEvent, StickAddress, StickClient, StickServer, HELLO,
};

fn wait_for_readers(server: &StickServer, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while server.reader_count() != count {
        assert!(
            Instant::now() < deadline,
            "expected {count} readers, have {}",
            server.reader_count()
        );
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn loopback() -> StickAddress {
    StickAddress::Udp(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
}

#[test]
fn test_udp_reader_receives_broadcast() {
    let server = StickServer::bind(loopback()).unwrap();
    let client = StickClient::connect(server.address().clone()).unwrap();
    wait_for_readers(&server, 1);

    server
        .send(&InputEvent::new(1234.5, Direction::Up, Action::Pressed))
        .unwrap();
    let event = client
        .read_event(Some(Duration::from_secs(2)))
        .unwrap()
        .expect("event not delivered");
    assert_eq!(event.direction, Direction::Up);
    assert_eq!(event.action, Action::Pressed);
    assert!((event.timestamp - 1234.5).abs() < 1e-6);
}

#[test]
fn test_read_times_out_without_events() {
    let server = StickServer::bind(loopback()).unwrap();
    let client = StickClient::connect(server.address().clone()).unwrap();
    wait_for_readers(&server, 1);

    let started = Instant::now();
    assert!(client
        .read_event(Some(Duration::from_millis(200)))
        .unwrap()
        .is_none());
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(client.get_events().unwrap().is_empty());
}

#[test]
fn test_get_events_drains_queue_in_order() {
    let server = StickServer::bind(loopback()).unwrap();
    let client = StickClient::connect(server.address().clone()).unwrap();
    wait_for_readers(&server, 1);

    server.send_key(Direction::Middle, Action::Pressed).unwrap();
    server.send_key(Direction::Middle, Action::Released).unwrap();
    let first = client.wait_for_event(false).unwrap();
    assert_eq!(first.action, Action::Pressed);

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut rest = Vec::new();
    while rest.is_empty() && Instant::now() < deadline {
        rest = client.get_events().unwrap();
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].direction, Direction::Middle);
    assert_eq!(rest[0].action, Action::Released);
}

#[test]
fn test_callbacks_run_direction_then_any() {
    let server = StickServer::bind(loopback()).unwrap();
    let mut client = StickClient::connect(server.address().clone()).unwrap();
    wait_for_readers(&server, 1);

    let (tx, rx) = mpsc::channel();
    let direction_tx = tx.clone();
    client
        .on(Direction::Left, move |e| {
            let _ = direction_tx.send(("left", e.action));
        })
        .unwrap();
    client
        .on_any(move |e| {
            let _ = tx.send(("any", e.action));
        })
        .unwrap();
    assert!(client.callbacks_running());

    server.send_key(Direction::Left, Action::Held).unwrap();
    let timeout = Duration::from_secs(2);
    assert_eq!(rx.recv_timeout(timeout).unwrap(), ("left", Action::Held));
    assert_eq!(rx.recv_timeout(timeout).unwrap(), ("any", Action::Held));

    server.send_key(Direction::Down, Action::Pressed).unwrap();
    assert_eq!(rx.recv_timeout(timeout).unwrap(), ("any", Action::Pressed));

    client.clear_callback(Binding::Direction(Direction::Left)).unwrap();
    assert!(client.callbacks_running());
    client.clear_callback(Binding::Any).unwrap();
    assert!(!client.callbacks_running());
}

#[test]
fn test_only_hello_registers_reader() {
    let server = StickServer::bind(loopback()).unwrap();
    let target = match server.address() {
        StickAddress::Udp(addr) => *addr,
        #[cfg(unix)]
        other => panic!("unexpected {other}"),
    };

    let stranger = std::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    stranger.send_to(b"GARBAGE", target).unwrap();
    stranger.send_to(b"hello!", target).unwrap();
    // Two serve cycles to drain both datagrams
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(server.reader_count(), 0);

    stranger.send_to(HELLO, target).unwrap();
    wait_for_readers(&server, 1);
}

#[test]
fn test_reader_connects_before_server() {
    // Reserve a port, then free it for the server to take later
    let probe = std::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let address = StickAddress::Udp(probe.local_addr().unwrap());
    drop(probe);

    let client = StickClient::connect(address.clone()).unwrap();
    std::thread::sleep(Duration::from_millis(300));
    let server = StickServer::bind(address).unwrap();
    // The next hello, at most a second later, registers the reader
    wait_for_readers(&server, 1);

    server.send_key(Direction::Right, Action::Released).unwrap();
    let event = client.read_event(Some(Duration::from_secs(2))).unwrap();
    assert_eq!(event.map(|e| e.direction), Some(Direction::Right));
}

#[cfg(unix)]
mod unix {
    use std::os::unix::net::UnixDatagram;

    use sense_emu_registers::SensorFile;

    use super::*;

    #[test]
    fn test_unix_reader_receives_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let address = StickAddress::in_dir(dir.path(), StickAddress::DEFAULT_PORT);
        let server = StickServer::bind(address.clone()).unwrap();
        assert!(SensorFile::Stick.path_in(dir.path()).exists());

        let client = StickClient::connect(address).unwrap();
        wait_for_readers(&server, 1);
        server.send_key(Direction::Down, Action::Pressed).unwrap();
        let event = client.read_event(Some(Duration::from_secs(2))).unwrap();
        assert_eq!(event.map(|e| e.direction), Some(Direction::Down));
    }

    #[test]
    fn test_silent_reader_receives_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let address = StickAddress::in_dir(dir.path(), StickAddress::DEFAULT_PORT);
        let server = StickServer::bind(address).unwrap();

        let silent = UnixDatagram::bind(dir.path().join("silent")).unwrap();
        silent
            .set_read_timeout(Some(Duration::from_millis(300)))
            .unwrap();
        server.send_key(Direction::Up, Action::Pressed).unwrap();

        let mut buf = [0u8; 64];
        assert!(silent.recv(&mut buf).is_err());
        assert_eq!(server.reader_count(), 0);
    }

    #[test]
    fn test_vanished_reader_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let address = StickAddress::in_dir(dir.path(), StickAddress::DEFAULT_PORT);
        let server = StickServer::bind(address.clone()).unwrap();

        let client = StickClient::connect(address).unwrap();
        wait_for_readers(&server, 1);
        drop(client);

        // A hello still queued at the server may re-add the reader once
        let deadline = Instant::now() + Duration::from_secs(5);
        while server.reader_count() != 0 {
            assert!(Instant::now() < deadline, "reader never pruned");
            server.send_key(Direction::Up, Action::Pressed).unwrap();
            std::thread::sleep(Duration::from_millis(150));
        }
    }

    #[test]
    fn test_close_removes_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = SensorFile::Stick.path_in(dir.path());
        let mut server = StickServer::bind(StickAddress::Unix(path.clone())).unwrap();
        server.close();
        assert!(!path.exists());
        assert!(server.send_key(Direction::Up, Action::Pressed).is_err());
    }
}
