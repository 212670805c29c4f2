//! TLS support for `ssl://` / `mqtts://` broker addresses.
//!
//! Backed by rustls (feature `tls-rustls`).

mod rustls_impl;

pub use rustls_impl::{
    TlsConnector, TlsError, TlsStream, client_config_with_ca_file, load_certs_from_file,
};

use std::sync::Arc;
use tokio_rustls::rustls::ClientConfig;

/// Client config trusting the bundled Mozilla root set.
pub fn client_config_with_webpki_roots() -> Arc<ClientConfig> {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Arc::new(config)
}
