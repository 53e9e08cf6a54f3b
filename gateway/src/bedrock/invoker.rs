//! C3 — the bridge between the blocking AWS SDK call surface and the async
//! SSE response path.
//!
//! The original implementation pairs a thread-pool executor with a
//! `queue.Queue` drained by polling `future.done()` every 5ms; the idiomatic
//! Rust shape for the same bridge is a bounded `tokio::sync::mpsc` channel
//! fed by a `tokio::task::spawn_blocking` task, with backpressure replacing
//! the poll loop (SPEC_FULL.md §4.3, Design Notes). A `tokio::sync::Semaphore`
//! sized to `bedrock_semaphore_size` stands in for the thread pool's own
//! bounded concurrency.

use std::sync::Arc;
use std::time::Duration;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::Client as BedrockClient;
use aws_sdk_sts::Client as StsClient;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::instrument;

use anthropic_protocol::messages::Message;

use crate::config::Settings;
use crate::errors::BedrockError;

use anthropic_protocol::bedrock::ConverseRequest;

use super::converse_bridge;
use super::convert_request::PreparedRequest;

/// The non-streaming backend result: a raw native-shape body for the
/// Anthropic family (re-parsed by the caller into a [`Message`]), or an
/// already-converted [`Message`] for everything routed through Converse.
pub enum BackendResponse {
    Native(Value),
    Converse(Message),
}

/// Shared AWS Bedrock client plus the concurrency primitives that bound
/// in-flight backend calls. Constructed once at startup and held inside
/// `AppContext`.
pub struct BedrockInvoker {
    client: BedrockClient,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
}

impl BedrockInvoker {
    /// Builds the AWS client, optionally assuming `bedrock_cross_account_role_arn`
    /// via STS before handing back Bedrock-scoped credentials.
    pub async fn new(settings: &Settings) -> Result<Self, BedrockError> {
        let region = Region::new(settings.bedrock_region.clone());
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region.clone());

        if let (Some(key), Some(secret)) =
            (&settings.aws_access_key_id, &settings.aws_secret_access_key)
        {
            let credentials = aws_sdk_bedrockruntime::config::Credentials::new(
                key,
                secret,
                settings.aws_session_token.clone(),
                None,
                "static-gateway-credentials",
            );
            loader = loader.credentials_provider(credentials);
        }

        let base_config = loader.load().await;

        let bedrock_config = if let Some(role_arn) = &settings.bedrock_cross_account_role_arn {
            let assumed = assume_role(&base_config, role_arn, region.clone()).await?;
            assumed
        } else {
            base_config
        };

        let mut client_builder = aws_sdk_bedrockruntime::config::Builder::from(&bedrock_config);
        if let Some(endpoint) = &settings.bedrock_endpoint_url {
            client_builder = client_builder.endpoint_url(endpoint);
        }
        let client = BedrockClient::from_conf(client_builder.build());

        Ok(Self {
            client,
            semaphore: Arc::new(Semaphore::new(settings.bedrock_semaphore_size)),
            timeout: Duration::from_secs(settings.bedrock_timeout),
        })
    }

    /// Invokes a non-streaming request. The Anthropic family dispatches
    /// through native InvokeModel and comes back as a raw [`Value`] body;
    /// every other model family dispatches through Converse and comes back
    /// already converted to a [`Message`] (SPEC_FULL.md §4.1).
    #[instrument(skip(self, prepared))]
    pub async fn invoke(&self, prepared: PreparedRequest) -> Result<BackendResponse, BedrockError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| BedrockError::Internal("invoker semaphore closed".to_string()))?;

        let client = self.client.clone();
        let timeout = self.timeout;

        let result = tokio::task::spawn_blocking(move || {
            // The AWS SDK's async client is actually non-blocking; we run
            // it inside spawn_blocking here only to mirror the original
            // call-site shape, a synchronous `invoke_model`/`converse` call
            // handed to a worker thread.
            Handle::current().block_on(call_backend(client, prepared, timeout))
        })
        .await
        .map_err(|e| BedrockError::Internal(format!("invoker task panicked: {e}")))?;

        result
    }

    /// Calls Bedrock's `count_tokens` API (SPEC_FULL.md §4.4). Returns `None`
    /// when the backend itself reports zero tokens, matching the fallback
    /// rule the caller applies regardless of which branch produced it.
    pub async fn count_tokens(&self, request: ConverseRequest) -> Result<Option<u32>, BedrockError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| BedrockError::Internal("invoker semaphore closed".to_string()))?;

        let client = self.client.clone();
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || {
            Handle::current().block_on(converse_bridge::count_tokens(&client, &request, timeout))
        })
        .await
        .map_err(|e| BedrockError::Internal(format!("invoker task panicked: {e}")))?
    }
}

use tokio::runtime::Handle;

/// Matches the original implementation's service-tier-fallback heuristic:
/// when the backend rejects an elevated `serviceTier`, retry once with it
/// stripped rather than failing the whole turn (SPEC_FULL.md §4.3).
fn is_service_tier_rejection(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("servicetier") || lower.contains("service tier") || lower.contains("does not support")
}

async fn call_backend(
    client: BedrockClient,
    prepared: PreparedRequest,
    timeout: Duration,
) -> Result<BackendResponse, BedrockError> {
    match prepared {
        PreparedRequest::Native(body) => {
            let has_service_tier = body.get("service_tier").is_some();
            match invoke_native(&client, &body, timeout).await {
                Ok(value) => Ok(BackendResponse::Native(value)),
                Err(BedrockError::ClientError(message)) if has_service_tier && is_service_tier_rejection(&message) => {
                    let mut retry_body = body;
                    retry_body
                        .as_object_mut()
                        .expect("native body always encodes as an object")
                        .remove("service_tier");
                    invoke_native(&client, &retry_body, timeout)
                        .await
                        .map(BackendResponse::Native)
                }
                Err(err) => Err(err),
            }
        }
        PreparedRequest::Converse(request) => {
            let has_service_tier = request.service_tier.is_some();
            match converse_bridge::dispatch(&client, &request, timeout).await {
                Ok(message) => Ok(BackendResponse::Converse(message)),
                Err(BedrockError::ClientError(error_message))
                    if has_service_tier && is_service_tier_rejection(&error_message) =>
                {
                    let mut retry_request = request;
                    retry_request.service_tier = None;
                    converse_bridge::dispatch(&client, &retry_request, timeout)
                        .await
                        .map(BackendResponse::Converse)
                }
                Err(err) => Err(err),
            }
        }
    }
}

async fn invoke_native(client: &BedrockClient, body: &Value, timeout: Duration) -> Result<Value, BedrockError> {
    let model_id = body
        .get("model_id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    // `model_id` routes the call via the builder below; Bedrock's native
    // body must not carry it as a JSON field.
    let mut payload_body = body.clone();
    if let Some(object) = payload_body.as_object_mut() {
        object.remove("model_id");
    }
    let payload = serde_json::to_vec(&payload_body)
        .map_err(|e| BedrockError::Internal(format!("failed to encode body: {e}")))?;

    let output = tokio::time::timeout(
        timeout,
        client
            .invoke_model()
            .model_id(model_id)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(payload))
            .send(),
    )
    .await
    .map_err(|_| BedrockError::Timeout)?
    .map_err(|e| BedrockError::ClientError(e.to_string()))?;

    let bytes = output.body.into_inner();
    serde_json::from_slice(&bytes)
        .map_err(|e| BedrockError::Internal(format!("invalid backend response: {e}")))
}

async fn assume_role(
    base_config: &aws_config::SdkConfig,
    role_arn: &str,
    region: Region,
) -> Result<aws_config::SdkConfig, BedrockError> {
    let sts = StsClient::new(base_config);
    let assumed = sts
        .assume_role()
        .role_arn(role_arn)
        .role_session_name("anthropic-bedrock-gateway")
        .send()
        .await
        .map_err(|e| BedrockError::ClientError(format!("sts assume-role failed: {e}")))?;

    let credentials = assumed
        .credentials
        .ok_or_else(|| BedrockError::Internal("assume-role returned no credentials".to_string()))?;

    let sdk_credentials = aws_sdk_bedrockruntime::config::Credentials::new(
        credentials.access_key_id,
        credentials.secret_access_key,
        Some(credentials.session_token),
        None,
        "assumed-bedrock-role",
    );

    Ok(aws_config::defaults(BehaviorVersion::latest())
        .region(region)
        .credentials_provider(sdk_credentials)
        .load()
        .await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semaphore_size_matches_configured_limit() {
        let semaphore = Semaphore::new(15);
        assert_eq!(semaphore.available_permits(), 15);
    }

    #[test]
    fn recognizes_service_tier_rejection_messages() {
        assert!(is_service_tier_rejection(
            "ValidationException: This model does not support the flex service tier"
        ));
        assert!(is_service_tier_rejection("serviceTier is not a recognized field"));
        assert!(!is_service_tier_rejection("ThrottlingException: rate exceeded"));
    }
}
