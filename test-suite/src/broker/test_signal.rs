use crate::*;
use drbfire::error::{DrbFireError, ViolationKind};
use std::collections::HashSet;

#[logfn]
#[rstest]
fn test_tickets_follow_connection_order(runner: TestRunner) {
    runner.block_on(async move {
        let broker = start_broker().await;
        let addr = broker.address().clone();
        let mut conns = Vec::new();
        for _ in 0..8 {
            let conn = TcpStream::connect((TEST_IP, addr.port + 1)).await.expect("dial signal");
            conns.push(conn);
        }
        // read after all are connected: tickets were issued on accept
        for (i, conn) in conns.iter_mut().enumerate() {
            let mut buf = [0u8; 4];
            conn.read_exact(&mut buf).await.expect("read ticket");
            assert_eq!(u32::from_be_bytes(buf), i as u32 + 1);
        }
        assert_eq!(broker.last_ticket(), 8);
        assert_eq!(broker.reservations(), 8);
        broker.close().await;
    });
}

#[logfn]
#[rstest]
#[case(2)]
#[case(32)]
fn test_concurrent_signal_connections(runner: TestRunner, #[case] n: u32) {
    runner.block_on(async move {
        let broker = start_broker().await;
        let addr = broker.address().clone();
        let mut ths = Vec::new();
        for _ in 0..n {
            let addr = addr.clone();
            ths.push(tokio::spawn(async move { raw_signal(&addr).await }));
        }
        let mut seen = HashSet::new();
        let mut conns = Vec::new();
        for th in ths {
            let (conn, ticket) = th.await.expect("join");
            assert!(seen.insert(ticket), "ticket {} issued twice", ticket);
            conns.push(conn);
        }
        assert_eq!(seen, (1..=n).collect::<HashSet<u32>>());
        broker.close().await;
    });
}

#[logfn]
#[rstest]
fn test_tickets_scoped_to_broker(runner: TestRunner) {
    runner.block_on(async move {
        let a = start_broker().await;
        let b = start_broker().await;
        let (_a1, t) = raw_signal(a.address()).await;
        assert_eq!(t, 1);
        let (_a2, t) = raw_signal(a.address()).await;
        assert_eq!(t, 2);
        let (_b1, t) = raw_signal(b.address()).await;
        assert_eq!(t, 1);
        a.close().await;
        b.close().await;

        // a new broker on the same ports starts over
        let c = Broker::bind(a.address(), RendezvousConfig::server()).await.expect("rebind");
        let (_c1, t) = raw_signal(c.address()).await;
        assert_eq!(t, 1);
        c.close().await;
    });
}

#[logfn]
#[rstest]
fn test_signal_hangup_drops_reservation(runner: TestRunner) {
    runner.block_on(async move {
        let broker = start_broker().await;
        let (conn, ticket) = raw_signal(broker.address()).await;
        assert_eq!(ticket, 1);
        assert_eq!(broker.reservations(), 1);
        drop(conn);
        wait_until(|| broker.reservations() == 0).await;

        // the abandoned ticket is not reissued and can no longer be claimed
        let (_conn, ticket) = raw_signal(broker.address()).await;
        assert_eq!(ticket, 2);
        match broker.open_ticket(1).await {
            Err(DrbFireError::ProtocolViolation { ticket: 1, kind: ViolationKind::Consumed }) => {}
            other => panic!("unexpected {:?}", other),
        }
        broker.close().await;
    });
}
