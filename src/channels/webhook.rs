//! Webhook delivery.
//!
//! POSTs the fixed alert JSON to the configured endpoint with an
//! identifying User-Agent. Any non-2xx response, network failure, or
//! timeout is a failed attempt.

use std::time::Duration;

use chrono::Utc;

use crate::db::{AlertDb, Severity, WebhookBody};
use crate::error::EngineError;

/// Bound on one webhook call, including connect time.
pub const WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// Identifying header sent with every webhook call.
pub const WEBHOOK_USER_AGENT: &str = "obralert-webhook/0.4";

/// HTTP sender for webhook notifications. Cheap to clone; the underlying
/// reqwest client shares its connection pool.
#[derive(Clone)]
pub struct WebhookSender {
    client: reqwest::Client,
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// POST one alert payload. Ok only on a 2xx response.
    pub async fn deliver(&self, url: &str, body: &WebhookBody) -> Result<(), String> {
        let resp = self
            .client
            .post(url)
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .header(reqwest::header::USER_AGENT, WEBHOOK_USER_AGENT)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("webhook request failed: {}", e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("webhook endpoint returned {}: {}", status, text));
        }
        Ok(())
    }
}

/// Validate a webhook endpoint before enabling the channel.
///
/// POSTs a synthetic payload flagged `test: true` to the caller-supplied
/// URL. With `alert_id`, the payload carries that alert's real figures.
/// Never touches the notification store. Returns success plus a status
/// text suitable for showing in the configuration form.
pub async fn test_webhook(
    db: &AlertDb,
    sender: &WebhookSender,
    url: &str,
    alert_id: Option<&str>,
) -> Result<(bool, String), EngineError> {
    let body = match alert_id {
        Some(id) => {
            let alert = db.get_alert(id)?;
            WebhookBody {
                alert_type: alert.severity,
                deviation_percentage: alert.deviation_pct,
                deviation_amount: alert.deviation_amount,
                obra_id: alert.project_id,
                timestamp: Utc::now().to_rfc3339(),
                test: Some(true),
            }
        }
        None => WebhookBody {
            alert_type: Severity::Medium,
            deviation_percentage: 12.5,
            deviation_amount: 1_250.0,
            obra_id: "obra-teste".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            test: Some(true),
        },
    };

    match sender.deliver(url, &body).await {
        Ok(()) => Ok((true, "webhook endpoint accepted the test payload".to_string())),
        Err(e) => {
            log::info!("Webhook test against {} failed: {}", url, e);
            Ok((false, e))
        }
    }
}

#[cfg(test)]
pub mod test_server {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    /// Minimal loopback HTTP stub: accepts `connections` requests, replies
    /// with `status_line`, and forwards each raw request over the channel.
    pub fn spawn(status_line: &'static str, connections: usize) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            for _ in 0..connections {
                let Ok((mut stream, _)) = listener.accept() else { break };
                let mut raw = Vec::new();
                let mut buf = [0u8; 4096];
                // Read headers, then the Content-Length body
                while !raw.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => raw.extend_from_slice(&buf[..n]),
                    }
                }
                let text = String::from_utf8_lossy(&raw).to_string();
                let content_length = text
                    .lines()
                    .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(str::trim).map(String::from))
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(0);
                let body_start = raw
                    .windows(4)
                    .position(|w| w == b"\r\n\r\n")
                    .map(|p| p + 4)
                    .unwrap_or(raw.len());
                while raw.len() < body_start + content_length {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => raw.extend_from_slice(&buf[..n]),
                    }
                }

                let _ = tx.send(String::from_utf8_lossy(&raw).to_string());
                let response = format!(
                    "{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status_line
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });

        (format!("http://{}", addr), rx)
    }
}
