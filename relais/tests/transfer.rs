use crossbeam_channel::{unbounded, Receiver, Sender};
use relais::traffic::TrafficTotals;
use relais::transfer::{
    FileTransferable, Transferable, TransferHandler, TransferredListener,
};
use relais::ReactorBuilder;

use std::io::{self, Read, Write};
use std::mem::ManuallyDrop;
use std::net::{TcpListener, TcpStream};
use std::os::fd::{FromRawFd, IntoRawFd, RawFd};
use std::sync::Arc;
use std::thread;
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

struct TransferProbe {
    events: Sender<&'static str>,
}

impl TransferProbe {
    fn new() -> (Arc<Self>, Receiver<&'static str>) {
        let (events, rx) = unbounded();
        (Arc::new(Self { events }), rx)
    }
}

impl TransferredListener for TransferProbe {
    fn transfer_ok(&self) {
        let _ = self.events.send("ok");
    }

    fn failed(&self, _error: io::Error) {
        let _ = self.events.send("failed");
    }
}

/// An in-memory source that moves one byte per call, so a transfer takes
/// as many rounds as the range has bytes.
struct TrickleSource {
    data: Vec<u8>,
}

impl Transferable for TrickleSource {
    fn length(&self) -> u64 {
        self.data.len() as u64
    }

    fn transfer_to(&self, pos: u64, count: u64, out: RawFd) -> io::Result<u64> {
        let pos = pos as usize;
        let chunk = (count as usize).min(1);

        let mut stream = ManuallyDrop::new(unsafe { TcpStream::from_raw_fd(out) });
        match stream.write(&self.data[pos..pos + chunk]) {
            Ok(n) => Ok(n as u64),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }
}

#[test]
fn test_trickle_transfer_delivers_whole_range() {
    let reactor = ReactorBuilder::new()
        .default_timeout(Duration::from_secs(10))
        .build()
        .expect("Failed to build reactor");
    let (fd, mut client) = connected_pair();

    let data: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
    let expected = data.clone();
    let source = Arc::new(TrickleSource { data });

    let totals = Arc::new(TrafficTotals::new());
    let (probe, events) = TransferProbe::new();

    let handler = TransferHandler::new(
        reactor.clone(),
        fd,
        source,
        0,
        expected.len() as u64,
        totals.clone(),
        probe,
    );
    handler.transfer();

    let mut received = vec![0; expected.len()];
    client
        .read_exact(&mut received)
        .expect("Failed to read transferred data");
    assert_eq!(received, expected);

    assert_eq!(
        events
            .recv_timeout(Duration::from_secs(5))
            .expect("Failed to get transfer result"),
        "ok"
    );
    assert!(events.recv_timeout(Duration::from_millis(400)).is_err());
    assert_eq!(totals.total_transferred_from(), expected.len() as u64);
    assert_eq!(totals.total_transferred_to(), expected.len() as u64);

    reactor.shutdown();
}

#[test]
fn test_transfer_of_a_subrange() {
    let reactor = ReactorBuilder::new().build().expect("Failed to build reactor");
    let (fd, mut client) = connected_pair();

    let source = Arc::new(TrickleSource {
        data: b"0123456789".to_vec(),
    });
    let (probe, events) = TransferProbe::new();

    let handler = TransferHandler::new(
        reactor.clone(),
        fd,
        source,
        2,
        5,
        Arc::new(TrafficTotals::new()),
        probe,
    );
    handler.transfer();

    let mut received = [0; 5];
    client
        .read_exact(&mut received)
        .expect("Failed to read transferred data");
    assert_eq!(&received, b"23456");

    assert_eq!(
        events
            .recv_timeout(Duration::from_secs(5))
            .expect("Failed to get transfer result"),
        "ok"
    );

    reactor.shutdown();
}

#[test]
#[should_panic(expected = "transfer range extends past the end")]
fn test_out_of_range_transfer_panics() {
    let reactor = ReactorBuilder::new().build().expect("Failed to build reactor");
    let (fd, _client) = connected_pair();

    let source = Arc::new(TrickleSource {
        data: b"short".to_vec(),
    });
    let (probe, _events) = TransferProbe::new();

    let _ = TransferHandler::new(
        reactor,
        fd,
        source,
        0,
        6,
        Arc::new(TrafficTotals::new()),
        probe,
    );
}

#[test]
fn test_file_transfer() {
    let reactor = ReactorBuilder::new()
        .default_timeout(Duration::from_secs(10))
        .build()
        .expect("Failed to build reactor");
    let (fd, mut client) = connected_pair();

    let contents: Vec<u8> = (0..64 * 1024).map(|i| (i % 199) as u8).collect();
    let path = std::env::temp_dir().join(format!("relais-transfer-{}", std::process::id()));
    std::fs::write(&path, &contents).expect("Failed to write test file");

    let source = Arc::new(FileTransferable::new(&path).expect("Failed to open test file"));
    assert_eq!(source.length(), contents.len() as u64);

    let (probe, events) = TransferProbe::new();
    let handler = TransferHandler::new(
        reactor.clone(),
        fd,
        source,
        0,
        contents.len() as u64,
        Arc::new(TrafficTotals::new()),
        probe,
    );
    handler.transfer();

    let reader = thread::spawn(move || {
        let mut received = vec![0; contents.len()];
        client
            .read_exact(&mut received)
            .expect("Failed to read transferred file");
        assert_eq!(received, contents);
    });

    assert_eq!(
        events
            .recv_timeout(Duration::from_secs(5))
            .expect("Failed to get transfer result"),
        "ok"
    );
    reader.join().expect("Reader thread panicked");

    std::fs::remove_file(&path).expect("Failed to remove test file");
    reactor.shutdown();
}
