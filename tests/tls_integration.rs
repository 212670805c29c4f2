#![cfg(feature = "tls-rustls")]

mod harness;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use harness::{TestBroker, fast_config, records};
use mqfleet::tls::{TlsConnector, TlsError, client_config_with_ca_file};
use mqfleet::{BrokerAddr, ConnectOptions, Error, MqttClient, MqttTransport, QoS, run_fleet};
use rcgen::{CertifiedKey, generate_simple_self_signed};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;

struct TestPki {
    acceptor: TlsAcceptor,
    ca_file: tempfile::NamedTempFile,
}

fn generate_test_pki() -> TestPki {
    let CertifiedKey { cert, key_pair } =
        generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();

    let cert_der = CertificateDer::from(cert.der().to_vec());
    let key_der = PrivateKeyDer::Pkcs8(key_pair.serialize_der().into());
    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .unwrap();

    let mut ca_file = tempfile::NamedTempFile::new().unwrap();
    ca_file.write_all(cert.pem().as_bytes()).unwrap();
    ca_file.flush().unwrap();

    TestPki {
        acceptor: TlsAcceptor::from(Arc::new(server_config)),
        ca_file,
    }
}

fn tls_options(port: u16, pki: &TestPki) -> ConnectOptions {
    let client_config = client_config_with_ca_file(pki.ca_file.path()).unwrap();
    ConnectOptions::new(BrokerAddr::tls("localhost", port))
        .with_connect_timeout(Duration::from_secs(5))
        .with_tls_config(client_config)
}

#[tokio::test]
async fn test_tls_session_publish_roundtrip() {
    let pki = generate_test_pki();
    let (broker, addr) = TestBroker::spawn_tls(pki.acceptor.clone()).await;

    let client = MqttClient::connect(tls_options(addr.port(), &pki).with_client_id("tls-1"))
        .await
        .unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    client
        .subscribe(
            "secure/topic",
            QoS::AtLeastOnce,
            Arc::new(move |d: &mqfleet::Delivery| {
                let _ = tx.send(d.payload.clone());
            }),
        )
        .await
        .unwrap();
    client
        .publish("secure/topic", QoS::AtLeastOnce, bytes::Bytes::from_static(b"sealed"))
        .await
        .unwrap();

    let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&got[..], b"sealed");

    client.disconnect().await.unwrap();
    broker.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fleet_over_tls() {
    let pki = generate_test_pki();
    let (broker, addr) = TestBroker::spawn_tls(pki.acceptor.clone()).await;
    let transport = MqttTransport::new(tls_options(addr.port(), &pki));

    let summary = run_fleet(Arc::new(transport), records(3), fast_config(3, 1, 3))
        .await
        .unwrap();

    assert_eq!(summary.received, 3);
    broker.shutdown().await;
}

#[tokio::test]
async fn test_untrusted_broker_certificate_fails() {
    let pki = generate_test_pki();
    let (broker, addr) = TestBroker::spawn_tls(pki.acceptor.clone()).await;

    // Trusts only the public roots, not the self-signed test CA.
    let options = ConnectOptions::new(BrokerAddr::tls("localhost", addr.port()))
        .with_connect_timeout(Duration::from_secs(5))
        .with_tls_config(mqfleet::tls::client_config_with_webpki_roots());

    let result = MqttClient::connect(options).await;
    assert!(matches!(result, Err(Error::Tls(_))), "{:?}", result.err());
    broker.shutdown().await;
}

#[tokio::test]
async fn test_invalid_dns_name() {
    let connector = TlsConnector::new(mqfleet::tls::client_config_with_webpki_roots());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let stream = TcpStream::connect(addr).await.unwrap();
    let result = connector.connect("invalid..name", stream).await;

    assert!(matches!(result, Err(TlsError::InvalidDnsName(_))));
}

#[test]
fn test_ca_file_without_certificates() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"not a certificate\n").unwrap();

    let result = client_config_with_ca_file(file.path());
    assert!(matches!(result, Err(TlsError::NoCertificatesFound)));
}
