use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info};

use crate::{
    config::Config,
    consumer::PushGateway,
    error::DeliveryError,
    models::{
        fcm::{FcmMessage, FcmNotification, FcmRequest, FcmSendResponse},
        message::PushMessage,
    },
};

const FCM_SCOPES: &[&str] = &["https://www.googleapis.com/auth/firebase.messaging"];

pub struct FcmClient {
    http_client: Client,
    endpoint: String,
    fcm_project_id: String,
}

impl FcmClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        info!(project_id = %config.fcm_project_id, "FCM client initialized");

        Ok(Self {
            http_client,
            endpoint: config.fcm_endpoint.clone(),
            fcm_project_id: config.fcm_project_id.clone(),
        })
    }

    async fn dispatch(&self, request: &FcmRequest) -> Result<String, DeliveryError> {
        let provider = gcp_auth::provider()
            .await
            .map_err(|e| DeliveryError::Transient(format!("FCM auth provider failed: {}", e)))?;

        let token = provider
            .token(FCM_SCOPES)
            .await
            .map_err(|e| DeliveryError::Transient(format!("FCM token fetch failed: {}", e)))?;

        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.endpoint, self.fcm_project_id
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token.as_str())
            .json(request)
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(format!("FCM request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            let body: FcmSendResponse = response
                .json()
                .await
                .map_err(|e| DeliveryError::Transient(format!("FCM response unreadable: {}", e)))?;

            return Ok(body.name.unwrap_or_default());
        }

        let body = response.text().await.unwrap_or_default();

        // Invalid argument, sender mismatch and unregistered tokens are
        // authoritative rejections; retrying them can never succeed.
        match status {
            StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Err(
                DeliveryError::Permanent(format!("FCM rejected request ({}): {}", status, body)),
            ),
            _ => Err(DeliveryError::Transient(format!(
                "FCM request failed ({}): {}",
                status, body
            ))),
        }
    }
}

#[async_trait]
impl PushGateway for FcmClient {
    async fn send(&self, message: &PushMessage) -> Result<String, DeliveryError> {
        debug!(
            request_id = %message.request_id,
            recipient_id = %message.recipient_id,
            "Sending FCM push notification"
        );

        let mut data = message.payload.data.clone().unwrap_or_default();
        data.insert("request_id".to_string(), message.request_id.clone());

        let request = FcmRequest {
            message: FcmMessage {
                token: message.device_token.clone(),
                notification: FcmNotification {
                    title: message.payload.title.clone(),
                    body: message.payload.body.clone(),
                },
                data: Some(data),
            },
        };

        let message_id = self.dispatch(&request).await?;

        info!(
            request_id = %message.request_id,
            fcm_message_id = %message_id,
            "FCM push notification sent"
        );

        Ok(message_id)
    }
}
