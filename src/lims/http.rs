// src/lims/http.rs
//
// LIMS sink that POSTs each bundle as JSON. Called from the blocking reader
// thread, so every push is driven to completion on the shared runtime handle.

use reqwest::Client;
use std::time::Duration;
use tokio::runtime::Handle;

use super::{LimsSink, ResultBundle};
use crate::error::BridgeError;
use crate::settings::LimsSettings;

pub struct HttpLimsSink {
    client: Client,
    url: String,
    username: Option<String>,
    password: Option<String>,
    runtime: Handle,
}

impl HttpLimsSink {
    pub fn new(settings: &LimsSettings, runtime: Handle) -> Result<Self, BridgeError> {
        let client = Client::builder()
            .user_agent(concat!("aia360-bridge/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| BridgeError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpLimsSink {
            client,
            url: settings.url.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            runtime,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send(&self, bundle: &ResultBundle) -> Result<(), BridgeError> {
        let mut request = self.client.post(&self.url).json(bundle);
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_ref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| BridgeError::push(bundle, format!("Failed to reach LIMS: {}", e)))?;

        if !response.status().is_success() {
            return Err(BridgeError::push(
                bundle,
                format!("LIMS returned status: {}", response.status()),
            ));
        }

        Ok(())
    }
}

impl LimsSink for HttpLimsSink {
    fn push(&mut self, bundle: &ResultBundle) -> Result<(), BridgeError> {
        self.runtime.block_on(self.send(bundle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ExtractedResult;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn bundle() -> ResultBundle {
        ResultBundle::for_result(&ExtractedResult {
            sample_id: "S55".to_string(),
            analyte_code: "TSH".to_string(),
            value: "2.1".to_string(),
            unit: None,
            flag: None,
            timestamp: None,
            bounds: None,
        })
    }

    fn settings(url: String, username: Option<&str>) -> LimsSettings {
        LimsSettings {
            url,
            username: username.map(str::to_string),
            password: username.map(|_| "secret".to_string()),
            timeout_secs: 5,
        }
    }

    /// Accept one connection, read the whole request, answer with `status`.
    /// The join handle yields the raw request text.
    fn one_shot_server(status: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/api/results", listener.local_addr().unwrap());

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];

            loop {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);

                let text = String::from_utf8_lossy(&request);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                status
            );
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        (url, handle)
    }

    #[test]
    fn test_push_posts_json_with_basic_auth() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (url, server) = one_shot_server("200 OK");
        let mut sink = HttpLimsSink::new(&settings(url, Some("bridge")), runtime.handle().clone()).unwrap();

        sink.push(&bundle()).unwrap();

        let request = server.join().unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /api/results"));
        assert!(lower.contains("authorization: basic "));
        assert!(lower.contains("content-type: application/json"));
        assert!(request.contains("\"testCode\":\"TSH\""));
        assert!(request.contains("\"patientId\":\"S55\""));
    }

    #[test]
    fn test_non_success_status_is_push_error() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (url, server) = one_shot_server("500 Internal Server Error");
        let mut sink = HttpLimsSink::new(&settings(url, None), runtime.handle().clone()).unwrap();

        let err = sink.push(&bundle()).unwrap_err();
        let request = server.join().unwrap();

        assert!(!request.to_ascii_lowercase().contains("authorization:"));
        match err {
            BridgeError::Push { sample_id, test_code, message } => {
                assert_eq!(sample_id, "S55");
                assert_eq!(test_code, "TSH");
                assert!(message.contains("500"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unreachable_lims_is_push_error() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut sink = HttpLimsSink::new(
            &settings("http://127.0.0.1:1/results".to_string(), None),
            runtime.handle().clone(),
        )
        .unwrap();

        assert!(matches!(sink.push(&bundle()), Err(BridgeError::Push { .. })));
        assert_eq!(sink.url(), "http://127.0.0.1:1/results");
    }
}
