use apcups_scan::config::ClientConfig;
use apcups_scan::scanner::scan;
use std::time::Duration;
use tokio::net::TcpListener;

#[tokio::test]
async fn slash_30_with_one_listener() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let cfg = ClientConfig::default()
        .with_port(port)
        .with_dial_timeout(Duration::from_millis(500));

    // 127.0.0.1-3 are all loopback on Linux; only .1 has the listener.
    let found = scan("127.0.0.0/30", &cfg).await;
    assert_eq!(found, vec![format!("127.0.0.1:{port}")]);
}

#[tokio::test]
async fn non_ipv4_network_scans_nothing() {
    let cfg = ClientConfig::default().with_dial_timeout(Duration::from_millis(100));
    for network in ["", "192.168.1.0", "192.168.1.0/33", "fe80::/64", "lan"] {
        assert!(scan(network, &cfg).await.is_empty(), "{network}");
    }
}
