use crate::*;
use drbfire::error::DrbFireError;
use std::sync::Arc;

#[logfn]
#[rstest]
#[case(1)]
#[case(4)]
fn test_close_unblocks_pending_accepts(runner: TestRunner, #[case] n: usize) {
    runner.block_on(async move {
        let broker = Arc::new(start_broker().await);
        let mut ths = Vec::new();
        for _ in 0..n {
            let b = broker.clone();
            ths.push(tokio::spawn(async move { b.accept().await }));
        }
        wait_until(|| broker.pending_accepts() == n).await;
        broker.close().await;
        for th in ths {
            let r = tokio::time::timeout(Duration::from_secs(2), th)
                .await
                .expect("accept still blocked after close")
                .expect("join");
            assert!(matches!(r, Err(DrbFireError::BrokerClosed)));
        }
        assert!(broker.is_closed());
        assert!(matches!(broker.accept().await, Err(DrbFireError::BrokerClosed)));
        assert!(matches!(broker.open_ticket(1).await, Err(DrbFireError::BrokerClosed)));
    });
}

#[logfn]
#[rstest]
fn test_close_releases_ports(runner: TestRunner) {
    runner.block_on(async move {
        let broker = start_broker().await;
        let addr = broker.address().clone();
        let (_signal, _) = raw_signal(&addr).await;
        let _main = raw_main(&addr, 0, b"q").await;
        wait_until(|| broker.queued() == 1).await;
        broker.close().await;
        drop(TcpListener::bind((TEST_IP, addr.port)).await.expect("main port released"));
        drop(TcpListener::bind((TEST_IP, addr.port + 1)).await.expect("signal port released"));
    });
}

#[logfn]
#[rstest]
fn test_close_fails_callback_and_peer(runner: TestRunner) {
    runner.block_on(async move {
        let broker = Arc::new(start_broker().await);
        let uri = broker.address().to_string();
        let peer = drbfire::open_server(&uri, RendezvousConfig::client()).await.expect("peer");
        let peer_accept = tokio::spawn(async move { peer.accept().await });

        // a raw holder that never dials in after being signalled
        let (mut holder, ticket) = raw_signal(broker.address()).await;
        let b = broker.clone();
        let callback = tokio::spawn(async move { b.open_ticket(ticket).await });
        assert_eq!(read_byte(&mut holder).await, drbfire::channel::signal::COMPLETION);

        broker.close().await;
        let r = tokio::time::timeout(Duration::from_secs(2), callback)
            .await
            .expect("callback still blocked")
            .expect("join");
        assert!(matches!(r, Err(DrbFireError::BrokerClosed)));
        let r = tokio::time::timeout(Duration::from_secs(2), peer_accept)
            .await
            .expect("peer accept still blocked")
            .expect("join");
        assert!(matches!(r, Err(DrbFireError::BrokerClosed)));
    });
}

#[logfn]
#[rstest]
fn test_drop_closes_broker(runner: TestRunner) {
    runner.block_on(async move {
        let broker = start_broker().await;
        let addr = broker.address().clone();
        let (mut signal, _) = raw_signal(&addr).await;
        drop(broker);
        // the signal connection is hung up once the handler sees the shutdown
        assert!(closed_by_peer(&mut signal).await);
    });
}
