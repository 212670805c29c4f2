//! Registration service client.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Default registration endpoint.
pub const DEFAULT_REGISTRATION_URL: &str = "http://reg.yunba.io:8383/device/reg/";

/// Credentials issued for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub client_id: String,
    pub username: String,
    pub password: String,
}

/// Issues client credentials for a device id.
pub trait Registrar: Send + Sync + 'static {
    fn register(&self, device_id: &str) -> impl Future<Output = Result<Registration>> + Send;
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    #[serde(rename = "a")]
    app_key: &'a str,
    #[serde(rename = "p")]
    platform: u32,
    #[serde(rename = "d")]
    device_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    #[serde(rename = "c", default)]
    client_id: String,
    #[serde(rename = "u", default)]
    username: String,
    #[serde(rename = "p", default)]
    password: String,
    #[serde(rename = "errcode", alias = "status", default)]
    error_code: i64,
}

impl RegisterResponse {
    fn into_registration(self) -> Result<Registration> {
        if self.error_code != 0 {
            return Err(Error::RegistrationRejected {
                code: self.error_code,
            });
        }
        if self.client_id.is_empty() {
            return Err(Error::Registration("response has no client id".to_string()));
        }
        Ok(Registration {
            client_id: self.client_id,
            username: self.username,
            password: self.password,
        })
    }
}

/// JSON-over-HTTP registrar.
#[derive(Debug, Clone)]
pub struct HttpRegistrar {
    url: String,
    app_key: String,
    platform: u32,
    client: Client,
}

impl HttpRegistrar {
    /// Create a registrar posting to `url` on behalf of `app_key`.
    pub fn new(url: impl Into<String>, app_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Registration(e.to_string()))?;

        Ok(Self {
            url: url.into(),
            app_key: app_key.into(),
            platform: 0,
            client,
        })
    }

    /// Platform code sent with every request (default 0).
    #[must_use]
    pub fn with_platform(mut self, platform: u32) -> Self {
        self.platform = platform;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Registrar for HttpRegistrar {
    async fn register(&self, device_id: &str) -> Result<Registration> {
        let request = RegisterRequest {
            app_key: &self.app_key,
            platform: self.platform,
            device_id,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Registration(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Registration(format!(
                "{} returned HTTP {}",
                self.url,
                status.as_u16()
            )));
        }

        let body: RegisterResponse = response
            .json()
            .await
            .map_err(|e| Error::Registration(e.to_string()))?;
        debug!(device_id, client_id = %body.client_id, code = body.error_code, "registration response");

        body.into_registration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn decode(json: &str) -> Result<Registration> {
        serde_json::from_str::<RegisterResponse>(json)
            .unwrap()
            .into_registration()
    }

    #[test]
    fn test_request_field_names() {
        let request = RegisterRequest {
            app_key: "key",
            platform: 0,
            device_id: "171",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({"a": "key", "p": 0, "d": "171"}));
    }

    #[test]
    fn test_decode_success() {
        let reg = decode(r#"{"c":"0001-abc","u":"user","p":"pass"}"#).unwrap();
        assert_eq!(
            reg,
            Registration {
                client_id: "0001-abc".to_string(),
                username: "user".to_string(),
                password: "pass".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_error_code() {
        let result = decode(r#"{"errcode":3}"#);
        assert!(matches!(result, Err(Error::RegistrationRejected { code: 3 })));

        let result = decode(r#"{"c":"x","status":-1}"#);
        assert!(matches!(result, Err(Error::RegistrationRejected { code: -1 })));
    }

    #[test]
    fn test_decode_missing_client_id() {
        assert!(matches!(decode("{}"), Err(Error::Registration(_))));
    }

    /// Serve one HTTP request with `status` and `body`; yields the request body.
    async fn serve_once(status: u16, body: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/device/reg/", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            let request_body = loop {
                let n = stream.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some((head, rest)) = text.split_once("\r\n\r\n") {
                    let len = head
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if rest.len() >= len {
                        break rest.to_string();
                    }
                }
                if n == 0 {
                    break String::new();
                }
            };
            let response = format!(
                "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(request_body);
        });

        (url, rx)
    }

    #[tokio::test]
    async fn test_http_register() {
        let (url, request) = serve_once(200, r#"{"c":"cid","u":"u","p":"p"}"#).await;
        let registrar = HttpRegistrar::new(url, "appkey").unwrap();

        let reg = registrar.register("420").await.unwrap();
        assert_eq!(reg.client_id, "cid");

        let sent: serde_json::Value = serde_json::from_str(&request.await.unwrap()).unwrap();
        assert_eq!(sent["a"], "appkey");
        assert_eq!(sent["p"], 0);
        assert_eq!(sent["d"], "420");
    }

    #[tokio::test]
    async fn test_http_register_sends_platform() {
        let (url, request) = serve_once(200, r#"{"c":"cid","u":"u","p":"p"}"#).await;
        let registrar = HttpRegistrar::new(url, "appkey").unwrap().with_platform(3);

        registrar.register("7").await.unwrap();

        let sent: serde_json::Value = serde_json::from_str(&request.await.unwrap()).unwrap();
        assert_eq!(sent["p"], 3);
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let (url, _request) = serve_once(500, "{}").await;
        let registrar = HttpRegistrar::new(url, "appkey").unwrap();
        let result = registrar.register("1").await;
        assert!(matches!(result, Err(Error::Registration(msg)) if msg.contains("500")));
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        drop(listener);

        let registrar = HttpRegistrar::new(url, "appkey").unwrap();
        assert!(matches!(
            registrar.register("1").await,
            Err(Error::Registration(_))
        ));
    }
}
