#[cfg(test)]
mod peer;

extern crate captains_log;
extern crate log;
pub use captains_log::logfn;
use captains_log::*;
use drbfire::server::Broker;
use drbfire::{RendezvousAddress, RendezvousConfig, RendezvousStream};
use rstest::*;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;

pub const TEST_IP: &str = "127.0.0.1";

#[fixture]
pub fn runner() -> TestRunner {
    TestRunner::new()
}

impl fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "")
    }
}

pub struct TestRunner {
    pub rt: Runtime,
}

impl TestRunner {
    pub fn new() -> Self {
        recipe::raw_file_logger("/tmp/drbfire_test.log", Level::Trace).test().build().expect("log");
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(
                std::thread::available_parallelism()
                    .unwrap_or(std::num::NonZero::new(1).unwrap())
                    .into(),
            )
            .enable_all()
            .build()
            .expect("runtime");
        Self { rt }
    }

    pub fn block_on<F: Future<Output = ()>>(&self, f: F) {
        self.rt.block_on(f);
    }
}

/// A broker on a free pair of ports of the loopback interface.
pub async fn start_broker() -> Broker {
    let addr = RendezvousAddress::new(TEST_IP, 0);
    Broker::bind(&addr, RendezvousConfig::server()).await.expect("bind broker")
}

/// Plain listeners on two adjacent free ports, standing in for a broker.
pub async fn scripted_broker() -> (RendezvousAddress, TcpListener, TcpListener) {
    for _ in 0..16 {
        let main = TcpListener::bind((TEST_IP, 0)).await.expect("bind");
        let port = main.local_addr().unwrap().port();
        if port == u16::MAX {
            continue;
        }
        if let Ok(signal) = TcpListener::bind((TEST_IP, port + 1)).await {
            return (RendezvousAddress::new(TEST_IP, port), main, signal);
        }
    }
    panic!("no adjacent free ports");
}

/// Poll `cond` until it holds, panic after 5 seconds.
pub async fn wait_until<F: Fn() -> bool>(cond: F) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Dial a MAIN port by hand, presenting `ticket` followed by `payload`.
pub async fn raw_main(addr: &RendezvousAddress, ticket: u32, payload: &[u8]) -> TcpStream {
    let mut conn = TcpStream::connect((addr.host.as_str(), addr.port)).await.expect("dial main");
    conn.write_all(&ticket.to_be_bytes()).await.expect("write ticket");
    conn.write_all(payload).await.expect("write payload");
    conn
}

/// Dial a SIGNAL port by hand and read the ticket issued.
pub async fn raw_signal(addr: &RendezvousAddress) -> (TcpStream, u32) {
    let mut conn =
        TcpStream::connect((addr.host.as_str(), addr.port + 1)).await.expect("dial signal");
    let mut buf = [0u8; 4];
    conn.read_exact(&mut buf).await.expect("read ticket");
    (conn, u32::from_be_bytes(buf))
}

pub async fn read_byte<R: AsyncReadExt + Unpin>(r: &mut R) -> u8 {
    let mut b = [0u8; 1];
    r.read_exact(&mut b).await.expect("read byte");
    b[0]
}

/// True once the other side closed the connection.
pub async fn closed_by_peer(conn: &mut TcpStream) -> bool {
    let mut b = [0u8; 1];
    match tokio::time::timeout(Duration::from_secs(5), conn.read(&mut b)).await {
        Ok(Ok(0)) | Ok(Err(_)) => true,
        _ => false,
    }
}

pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Echo everything until the other side shuts down its write direction.
pub async fn echo(conn: RendezvousStream) {
    let (mut r, mut w) = tokio::io::split(conn);
    let _ = tokio::io::copy(&mut r, &mut w).await;
}

/// Send `data` through an echoing counterpart and collect what comes back.
pub async fn round_trip(conn: RendezvousStream, data: Vec<u8>) -> Vec<u8> {
    let (mut r, mut w) = tokio::io::split(conn);
    let writer = tokio::spawn(async move {
        w.write_all(&data).await.expect("write payload");
        w.shutdown().await.expect("shutdown");
        w
    });
    let mut back = Vec::new();
    r.read_to_end(&mut back).await.expect("read back");
    let _ = writer.await;
    back
}
