use crossbeam_channel::{unbounded, Receiver, Sender};
use relais::buffer::BufferPool;
use relais::sender::{BlockSender, BlockSentListener};
use relais::traffic::TrafficTotals;
use relais::ReactorBuilder;

use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::os::fd::{IntoRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

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

struct SendProbe {
    events: Sender<&'static str>,
}

impl SendProbe {
    fn new() -> (Arc<Self>, Receiver<&'static str>) {
        let (events, rx) = unbounded();
        (Arc::new(Self { events }), rx)
    }
}

impl BlockSentListener for SendProbe {
    fn block_sent(&self) {
        let _ = self.events.send("sent");
    }

    fn timed_out(&self) {
        let _ = self.events.send("timed out");
    }

    fn failed(&self, _error: std::io::Error) {
        let _ = self.events.send("failed");
    }
}

#[test]
fn test_plain_block_reaches_the_peer() {
    let reactor = ReactorBuilder::new().build().expect("Failed to build reactor");
    let pool = Arc::new(BufferPool::new());
    let (fd, mut client) = connected_pair();

    let mut buffer = pool.get_buffer();
    let ptr = buffer.as_ptr();
    buffer[..5].copy_from_slice(b"hello");

    let (probe, events) = SendProbe::new();
    let sender = BlockSender::new(
        fd,
        reactor.clone(),
        pool.clone(),
        Arc::new(TrafficTotals::new()),
        buffer,
        5,
        false,
        probe,
    );
    sender.send();

    let mut received = [0; 5];
    client
        .read_exact(&mut received)
        .expect("Failed to read sent block");
    assert_eq!(&received, b"hello");

    assert_eq!(
        events
            .recv_timeout(Duration::from_secs(5))
            .expect("Failed to get sent event"),
        "sent"
    );
    assert!(events.recv_timeout(Duration::from_millis(400)).is_err());

    // The block buffer was returned to the pool before the callback.
    assert_eq!(pool.get_buffer().as_ptr(), ptr);

    reactor.shutdown();
}

#[test]
fn test_chunked_block_is_framed() {
    let reactor = ReactorBuilder::new().build().expect("Failed to build reactor");
    let pool = Arc::new(BufferPool::new());
    let (fd, mut client) = connected_pair();

    let totals = Arc::new(TrafficTotals::new());

    let mut buffer = pool.get_buffer();
    buffer[..5].copy_from_slice(b"hello");

    let (probe, events) = SendProbe::new();
    let sender = BlockSender::new(
        fd,
        reactor.clone(),
        pool,
        totals.clone(),
        buffer,
        5,
        true,
        probe,
    );
    sender.send();

    let mut received = [0; 10];
    client
        .read_exact(&mut received)
        .expect("Failed to read sent block");
    assert_eq!(&received, b"5\r\nhello\r\n");

    assert_eq!(
        events
            .recv_timeout(Duration::from_secs(5))
            .expect("Failed to get sent event"),
        "sent"
    );
    assert_eq!(totals.total_written(), 10);

    reactor.shutdown();
}

#[test]
fn test_empty_chunked_block() {
    let reactor = ReactorBuilder::new().build().expect("Failed to build reactor");
    let pool = Arc::new(BufferPool::new());
    let (fd, mut client) = connected_pair();

    let buffer = pool.get_buffer();
    let (probe, events) = SendProbe::new();
    let sender = BlockSender::new(
        fd,
        reactor.clone(),
        pool,
        Arc::new(TrafficTotals::new()),
        buffer,
        0,
        true,
        probe,
    );
    sender.send();

    // A zero length chunk is the chunked stream terminator.
    let mut received = [0; 5];
    client
        .read_exact(&mut received)
        .expect("Failed to read sent block");
    assert_eq!(&received, b"0\r\n\r\n");

    assert_eq!(
        events
            .recv_timeout(Duration::from_secs(5))
            .expect("Failed to get sent event"),
        "sent"
    );

    reactor.shutdown();
}
