use crate::*;
use drbfire::client::PeerServer;
use drbfire::error::DrbFireError;
use drbfire::{Role, open, open_server};

#[logfn]
#[rstest]
fn test_peer_accept(runner: TestRunner) {
    runner.block_on(async move {
        let (addr, main, signal) = scripted_broker().await;
        let script = tokio::spawn(async move {
            let (mut s, _) = signal.accept().await.expect("signal accept");
            s.write_all(&5u32.to_be_bytes()).await.unwrap();
            s.write_all(&[0]).await.unwrap();
            let (mut m, _) = main.accept().await.expect("main accept");
            let mut buf = [0u8; 4];
            m.read_exact(&mut buf).await.unwrap();
            assert_eq!(u32::from_be_bytes(buf), 5);
            m.write_all(b"a").await.unwrap();
            (s, m)
        });
        let server = open_server(&addr.to_string(), RendezvousConfig::client()).await.expect("open");
        assert_eq!(server.role(), Role::Client);
        assert_eq!(server.ticket(), Some(5));
        assert_eq!(server.uri(), addr.with_ticket(5).to_string());
        let mut c = server.accept().await.expect("accept");
        assert_eq!(c.ticket(), 5);
        assert_eq!(read_byte(&mut c).await, b'a');
        // spent until the next accept reserves again
        assert_eq!(server.ticket(), None);
        let _ = script.await.expect("join");
        server.close().await;
    });
}

#[logfn]
#[rstest]
fn test_peer_open_server_reports_ticket(runner: TestRunner) {
    runner.block_on(async move {
        let (addr, _main, signal) = scripted_broker().await;
        let script = tokio::spawn(async move {
            let (mut s1, _) = signal.accept().await.expect("accept");
            s1.write_all(&5u32.to_be_bytes()).await.unwrap();
            let (mut s2, _) = signal.accept().await.expect("accept");
            s2.write_all(&7u32.to_be_bytes()).await.unwrap();
            (s1, s2)
        });
        let first = PeerServer::connect(&addr, RendezvousConfig::client()).await.expect("first");
        assert_eq!(first.ticket(), Some(5));
        let second = PeerServer::connect(&addr, RendezvousConfig::client()).await.expect("second");
        assert_eq!(second.ticket(), Some(7));
        let _ = tokio::time::timeout(Duration::from_secs(2), script)
            .await
            .expect("scripted broker not reached")
            .expect("join");
        first.close().await;
        second.close().await;
        assert!(first.is_closed());
    });
}

#[logfn]
#[rstest]
#[case(None)]
#[case(Some(9))]
fn test_client_open_dials_main_only(runner: TestRunner, #[case] ticket: Option<u32>) {
    runner.block_on(async move {
        // no signal listener at all: open must not need one
        let main = TcpListener::bind((TEST_IP, 0)).await.expect("bind");
        let mut addr = RendezvousAddress::new(TEST_IP, main.local_addr().unwrap().port());
        if let Some(t) = ticket {
            addr = addr.with_ticket(t);
        }
        let script = tokio::spawn(async move {
            let (mut m, _) = main.accept().await.expect("main accept");
            let mut buf = [0u8; 4];
            m.read_exact(&mut buf).await.unwrap();
            u32::from_be_bytes(buf)
        });
        let conn = open(&addr.to_string(), &RendezvousConfig::client()).await.expect("open");
        assert_eq!(conn.ticket(), ticket.unwrap_or(0));
        let seen = script.await.expect("join");
        assert_eq!(seen, ticket.unwrap_or(0));
    });
}

#[logfn]
#[rstest]
fn test_peer_close_unblocks_accept(runner: TestRunner) {
    runner.block_on(async move {
        let (addr, _main, signal) = scripted_broker().await;
        let script = tokio::spawn(async move {
            let (mut s, _) = signal.accept().await.expect("accept");
            s.write_all(&3u32.to_be_bytes()).await.unwrap();
            // hold on without ever completing
            let mut b = [0u8; 1];
            let _ = s.read(&mut b).await;
        });
        let peer = std::sync::Arc::new(
            PeerServer::connect(&addr, RendezvousConfig::client()).await.expect("connect"),
        );
        let p = peer.clone();
        let accept = tokio::spawn(async move { p.accept().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        peer.close().await;
        let r = tokio::time::timeout(Duration::from_secs(2), accept)
            .await
            .expect("accept still blocked")
            .expect("join");
        assert!(matches!(r, Err(DrbFireError::BrokerClosed)));
        assert!(matches!(peer.accept().await, Err(DrbFireError::BrokerClosed)));
        // giving up the reservation hangs up the signal connection
        tokio::time::timeout(Duration::from_secs(2), script).await.expect("hangup").expect("join");
    });
}

#[logfn]
#[rstest]
fn test_peer_broker_unreachable(runner: TestRunner) {
    runner.block_on(async move {
        // bind then drop, so nothing listens there
        let port = {
            let l = TcpListener::bind((TEST_IP, 0)).await.expect("bind");
            l.local_addr().unwrap().port()
        };
        let uri = format!("drbfire://{}:{}", TEST_IP, port);
        let r = open_server(&uri, RendezvousConfig::client()).await;
        assert!(matches!(r, Err(DrbFireError::Connection(_))));
        let r = open(&uri, &RendezvousConfig::client()).await;
        assert!(matches!(r, Err(DrbFireError::Connection(_))));
        let r = open("druby://127.0.0.1:1", &RendezvousConfig::client()).await;
        assert!(matches!(r, Err(DrbFireError::BadScheme(_))));
    });
}
