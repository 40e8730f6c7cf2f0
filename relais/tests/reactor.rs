use crossbeam_channel::{unbounded, Receiver, Sender};
use relais::stats::TaskId;
use relais::{
    ConnectHandler, Reactor, ReactorBuilder, ReadHandler, SocketHandler, WriteHandler,
};

use std::collections::HashSet;
use std::io::{Read, Write};
use std::mem::ManuallyDrop;
use std::net::{TcpListener, TcpStream};
use std::os::fd::{FromRawFd, IntoRawFd, RawFd};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

const EVENT_WAIT: Duration = Duration::from_secs(5);
const NO_EVENT_WAIT: Duration = Duration::from_millis(400);

/// A connected socket pair: a non-blocking raw fd for the reactor and a
/// blocking peer stream for the test to drive.
fn connected_pair() -> (RawFd, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    let client = TcpStream::connect(addr).expect("Failed to connect to listener");
    let (server, _) = listener.accept().expect("Failed to accept connection");
    server
        .set_nonblocking(true)
        .expect("Failed to set non-blocking");

    (server.into_raw_fd(), client)
}

/// Records every callback it receives on a channel.
struct Probe {
    events: Sender<&'static str>,
    deadline: Option<Instant>,
}

impl Probe {
    fn new(deadline: Option<Instant>) -> (Arc<Self>, Receiver<&'static str>) {
        let (events, rx) = unbounded();
        (Arc::new(Self { events, deadline }), rx)
    }
}

impl SocketHandler for Probe {
    fn description(&self) -> String {
        "probe".to_owned()
    }

    fn timeout_at(&self) -> Option<Instant> {
        self.deadline
    }

    fn timed_out(&self) {
        let _ = self.events.send("timed out");
    }

    fn closed(&self) {
        let _ = self.events.send("closed");
    }
}

impl ReadHandler for Probe {
    fn read(&self) {
        let _ = self.events.send("read");
    }
}

impl WriteHandler for Probe {
    fn write(&self) {
        let _ = self.events.send("write");
    }
}

impl ConnectHandler for Probe {
    fn connected(&self) {
        let _ = self.events.send("connected");
    }
}

/// Reads one byte per event and immediately re-registers itself,
/// reporting the thread each callback ran on.
struct Rebounder {
    fd: RawFd,
    reactor: Arc<Reactor>,
    threads: Sender<String>,
    me: Weak<Rebounder>,
}

impl Rebounder {
    fn new(fd: RawFd, reactor: Arc<Reactor>) -> (Arc<Self>, Receiver<String>) {
        let (threads, rx) = unbounded();
        let handler = Arc::new_cyclic(|me| Self {
            fd,
            reactor,
            threads,
            me: me.clone(),
        });
        (handler, rx)
    }
}

impl SocketHandler for Rebounder {
    fn description(&self) -> String {
        "rebounder".to_owned()
    }

    fn timed_out(&self) {}

    fn closed(&self) {}
}

impl ReadHandler for Rebounder {
    fn read(&self) {
        let name = thread::current().name().unwrap_or("unnamed").to_owned();

        let mut byte = [0; 1];
        let mut stream = ManuallyDrop::new(unsafe { TcpStream::from_raw_fd(self.fd) });
        let _ = stream.read(&mut byte);

        if let Some(me) = self.me.upgrade() {
            self.reactor.wait_for_read(self.fd, me);
        }
        let _ = self.threads.send(name);
    }
}

#[test]
fn test_read_readiness_fires_once() {
    let reactor = ReactorBuilder::new().build().expect("Failed to build reactor");
    let (fd, mut client) = connected_pair();

    let (probe, events) = Probe::new(None);
    reactor.wait_for_read(fd, probe);

    client.write_all(b"x").expect("Failed to write to stream");
    assert_eq!(
        events.recv_timeout(EVENT_WAIT).expect("Failed to get read event"),
        "read"
    );

    // The registration was used up; more data does not fire again.
    client.write_all(b"y").expect("Failed to write to stream");
    assert!(events.recv_timeout(NO_EVENT_WAIT).is_err());

    reactor.shutdown();
}

#[test]
fn test_write_readiness_fires() {
    let reactor = ReactorBuilder::new().build().expect("Failed to build reactor");
    let (fd, _client) = connected_pair();

    let (probe, events) = Probe::new(None);
    reactor.wait_for_write(fd, probe);

    assert_eq!(
        events.recv_timeout(EVENT_WAIT).expect("Failed to get write event"),
        "write"
    );

    reactor.shutdown();
}

#[test]
fn test_connect_completion_fires() {
    let reactor = ReactorBuilder::new().build().expect("Failed to build reactor");

    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    let stream = TcpStream::connect(addr).expect("Failed to connect to listener");
    stream
        .set_nonblocking(true)
        .expect("Failed to set non-blocking");
    let fd = stream.into_raw_fd();

    let (probe, events) = Probe::new(None);
    reactor.wait_for_connect(fd, probe);

    assert_eq!(
        events
            .recv_timeout(EVENT_WAIT)
            .expect("Failed to get connect event"),
        "connected"
    );

    reactor.shutdown();
}

#[test]
fn test_timeout_fires_exactly_once() {
    let reactor = ReactorBuilder::new().build().expect("Failed to build reactor");
    let (fd, _client) = connected_pair();

    let (probe, events) = Probe::new(Some(Instant::now() + Duration::from_millis(100)));
    reactor.wait_for_read(fd, probe);

    assert_eq!(
        events
            .recv_timeout(EVENT_WAIT)
            .expect("Failed to get timeout event"),
        "timed out"
    );
    assert!(events.recv_timeout(NO_EVENT_WAIT).is_err());

    reactor.shutdown();
}

#[test]
fn test_cancel_prevents_delivery() {
    let reactor = ReactorBuilder::new().build().expect("Failed to build reactor");
    let (fd, mut client) = connected_pair();

    let (probe, events) = Probe::new(None);
    reactor.wait_for_read(fd, probe.clone());

    let handler: Arc<dyn SocketHandler> = probe;
    reactor.cancel(fd, &handler);

    // Cancelling again is a no-op.
    reactor.cancel(fd, &handler);

    client.write_all(b"x").expect("Failed to write to stream");
    assert!(events.recv_timeout(NO_EVENT_WAIT).is_err());

    reactor.shutdown();
}

#[test]
fn test_close_notifies_live_registrations() {
    let reactor = ReactorBuilder::new().build().expect("Failed to build reactor");
    let (fd, _client) = connected_pair();

    let (probe, events) = Probe::new(None);
    reactor.wait_for_read(fd, probe);

    reactor.close(fd);

    assert_eq!(
        events
            .recv_timeout(EVENT_WAIT)
            .expect("Failed to get closed event"),
        "closed"
    );

    reactor.shutdown();
}

#[test]
fn test_registrations_spread_over_selectors() {
    let reactor = ReactorBuilder::new()
        .selector_threads(3)
        .build()
        .expect("Failed to build reactor");

    let mut events = Vec::new();
    let mut clients = Vec::new();

    for _ in 0..6 {
        let (fd, mut client) = connected_pair();
        let (probe, rx) = Probe::new(None);
        reactor.wait_for_read(fd, probe);
        client.write_all(b"x").expect("Failed to write to stream");
        events.push(rx);
        clients.push(client);
    }

    for rx in events {
        assert_eq!(
            rx.recv_timeout(EVENT_WAIT).expect("Failed to get read event"),
            "read"
        );
    }

    reactor.shutdown();
}

#[test]
fn test_channel_keeps_its_selector() {
    let reactor = ReactorBuilder::new()
        .selector_threads(2)
        .build()
        .expect("Failed to build reactor");
    let (fd, mut client) = connected_pair();

    let (handler, threads) = Rebounder::new(fd, reactor.clone());
    reactor.wait_for_read(fd, handler);

    // Each write fires the handler once; it re-registers from inside
    // its own callback. Every callback must land on the same selector.
    let mut seen = HashSet::new();
    for _ in 0..5 {
        client.write_all(b"x").expect("Failed to write to stream");
        let name = threads
            .recv_timeout(EVENT_WAIT)
            .expect("Failed to get callback thread name");
        seen.insert(name);
    }

    assert_eq!(seen.len(), 1, "callbacks ran on selectors {seen:?}");

    reactor.shutdown();
}

#[test]
fn test_sub_millisecond_timeout_fires() {
    let reactor = ReactorBuilder::new().build().expect("Failed to build reactor");
    let (fd, _client) = connected_pair();

    let (probe, events) = Probe::new(Some(Instant::now() + Duration::from_micros(300)));
    reactor.wait_for_read(fd, probe);

    assert_eq!(
        events
            .recv_timeout(EVENT_WAIT)
            .expect("Failed to get timeout event"),
        "timed out"
    );

    reactor.shutdown();
}

#[test]
fn test_background_task_is_recorded() {
    let reactor = ReactorBuilder::new().build().expect("Failed to build reactor");

    let (tx, rx) = unbounded();
    let ti = TaskId::new("test", "background job");
    reactor.run_thread_task(
        Box::new(move || {
            let _ = tx.send(());
        }),
        ti,
    );

    rx.recv_timeout(EVENT_WAIT).expect("Failed to run background task");

    // The completion entry lands just after the job returns.
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let totals = reactor.statistics().total_time_spent();
        if totals.get("test").is_some_and(|t| t.completed() == 1) {
            break;
        }
        assert!(Instant::now() < deadline, "Completion was never recorded");
        std::thread::sleep(Duration::from_millis(10));
    }

    reactor.shutdown();
}
