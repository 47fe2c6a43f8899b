//! Fire-and-forget side effects (emails, webhooks) decoupled from the
//! request path, plus the signed webhook client used for challenge
//! delivery. Queue failures are logged, never surfaced to callers.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 hex signature over the serialized JSON payload, keyed with
/// the per-tenant webhook secret.
pub fn sign_payload(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    let digest = mac.finalize().into_bytes();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Transport for signed webhook deliveries.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, url: &str, secret: &str, payload: &Value) -> Result<(), AuthError>;
}

pub struct HttpWebhookSender {
    client: reqwest::Client,
}

impl HttpWebhookSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for HttpWebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, url: &str, secret: &str, payload: &Value) -> Result<(), AuthError> {
        let body = payload.to_string();
        let signature = sign_payload(secret, &body);

        let response = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .header("x-gatehouse-signature", signature)
            .body(body)
            .send()
            .await
            .map_err(|e| AuthError::UpstreamProvider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::UpstreamProvider(format!(
                "webhook endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// A queued side effect. Email events are handed to the platform's external
/// templated-email dispatcher endpoint; webhook events go straight to the
/// tenant's configured URL.
#[derive(Debug, Clone)]
pub enum OutboundEvent {
    ConfirmationEmail { tenant: String, email: String, token: String },
    /// Recovery or magic-link email; `link_type` names the verify type the
    /// embedded token redeems as.
    LinkEmail { tenant: String, email: String, token: String, link_type: &'static str },
    WelcomeEmail { tenant: String, email: String },
    LoginAlert { tenant: String, email: String },
    LoginWebhook { tenant: String, url: String, secret: String, payload: Value },
}

/// Handle for enqueueing side effects; the caller never awaits delivery.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<OutboundEvent>,
}

const QUEUE_DEPTH: usize = 1024;
const MAX_DELIVERY_ATTEMPTS: u32 = 3;

impl Dispatcher {
    /// Spawn the background worker. `email_endpoint` is the external email
    /// dispatcher; when unset, email events are logged and dropped.
    pub fn spawn(sender: Arc<dyn WebhookSender>, email_endpoint: Option<String>) -> Self {
        let (tx, mut rx) = mpsc::channel::<OutboundEvent>(QUEUE_DEPTH);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                deliver_with_retry(&*sender, email_endpoint.as_deref(), event).await;
            }
        });

        Self { tx }
    }

    pub fn enqueue(&self, event: OutboundEvent) {
        if let Err(e) = self.tx.try_send(event) {
            warn!("outbound queue full, dropping side effect: {}", e);
        }
    }
}

async fn deliver_with_retry(
    sender: &dyn WebhookSender,
    email_endpoint: Option<&str>,
    event: OutboundEvent,
) {
    let (url, secret, payload) = match route_event(email_endpoint, &event) {
        Some(parts) => parts,
        None => {
            debug!("no email dispatcher configured, dropping {:?}", kind(&event));
            return;
        }
    };

    let mut backoff = Duration::from_millis(200);
    for attempt in 1..=MAX_DELIVERY_ATTEMPTS {
        match sender.send(&url, &secret, &payload).await {
            Ok(()) => return,
            Err(e) if attempt < MAX_DELIVERY_ATTEMPTS => {
                debug!("outbound delivery attempt {} failed: {}", attempt, e);
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => {
                warn!("outbound {} delivery failed after {} attempts: {}", kind(&event), attempt, e);
            }
        }
    }
}

fn kind(event: &OutboundEvent) -> &'static str {
    match event {
        OutboundEvent::ConfirmationEmail { .. } => "confirmation_email",
        OutboundEvent::LinkEmail { .. } => "link_email",
        OutboundEvent::WelcomeEmail { .. } => "welcome_email",
        OutboundEvent::LoginAlert { .. } => "login_alert",
        OutboundEvent::LoginWebhook { .. } => "login_webhook",
    }
}

fn route_event(
    email_endpoint: Option<&str>,
    event: &OutboundEvent,
) -> Option<(String, String, Value)> {
    match event {
        OutboundEvent::ConfirmationEmail { tenant, email, token } => {
            email_endpoint.map(|url| {
                (
                    url.to_string(),
                    String::new(),
                    serde_json::json!({
                        "type": "confirmation", "tenant": tenant,
                        "email": email, "token": token,
                    }),
                )
            })
        }
        OutboundEvent::LinkEmail { tenant, email, token, link_type } => {
            email_endpoint.map(|url| {
                (
                    url.to_string(),
                    String::new(),
                    serde_json::json!({
                        "type": *link_type, "tenant": tenant,
                        "email": email, "token": token,
                    }),
                )
            })
        }
        OutboundEvent::WelcomeEmail { tenant, email } => email_endpoint.map(|url| {
            (
                url.to_string(),
                String::new(),
                serde_json::json!({ "type": "welcome", "tenant": tenant, "email": email }),
            )
        }),
        OutboundEvent::LoginAlert { tenant, email } => email_endpoint.map(|url| {
            (
                url.to_string(),
                String::new(),
                serde_json::json!({ "type": "login_alert", "tenant": tenant, "email": email }),
            )
        }),
        OutboundEvent::LoginWebhook { url, secret, payload, .. } => {
            Some((url.clone(), secret.clone(), payload.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSender {
        calls: Mutex<Vec<(String, Value)>>,
        fail_first: Mutex<u32>,
    }

    impl RecordingSender {
        fn new(fail_first: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail_first: Mutex::new(fail_first),
            })
        }
    }

    #[async_trait]
    impl WebhookSender for RecordingSender {
        async fn send(&self, url: &str, _secret: &str, payload: &Value) -> Result<(), AuthError> {
            let mut remaining = self.fail_first.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(AuthError::UpstreamProvider("boom".into()));
            }
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), payload.clone()));
            Ok(())
        }
    }

    #[test]
    fn signature_is_deterministic_and_keyed() {
        let body = r#"{"code":"123456"}"#;
        let a = sign_payload("secret-1", body);
        let b = sign_payload("secret-1", body);
        let c = sign_payload("secret-2", body);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn dispatcher_delivers_webhooks() {
        let sender = RecordingSender::new(0);
        let dispatcher = Dispatcher::spawn(sender.clone(), None);

        dispatcher.enqueue(OutboundEvent::LoginWebhook {
            tenant: "t".into(),
            url: "https://hooks.example.com/login".into(),
            secret: "s".into(),
            payload: serde_json::json!({"event": "login"}),
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let calls = sender.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "https://hooks.example.com/login");
    }

    #[tokio::test]
    async fn dispatcher_retries_transient_failures() {
        let sender = RecordingSender::new(2);
        let dispatcher = Dispatcher::spawn(sender.clone(), None);

        dispatcher.enqueue(OutboundEvent::LoginWebhook {
            tenant: "t".into(),
            url: "https://hooks.example.com/login".into(),
            secret: "s".into(),
            payload: serde_json::json!({}),
        });

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(sender.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn email_events_without_endpoint_are_dropped() {
        let sender = RecordingSender::new(0);
        let dispatcher = Dispatcher::spawn(sender.clone(), None);

        dispatcher.enqueue(OutboundEvent::WelcomeEmail {
            tenant: "t".into(),
            email: "a@b.com".into(),
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sender.calls.lock().unwrap().is_empty());
    }
}
