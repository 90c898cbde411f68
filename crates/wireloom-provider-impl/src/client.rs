//! Client Factory (C5): one pooled `wreq::Client` per provider descriptor,
//! with bounded retries on pre-body transport errors only.

use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use wireloom_provider_core::errors::{ProviderError, ProviderResult};
use wireloom_provider_core::headers::Headers;
use wireloom_provider_core::provider::{ProviderDescriptor, UpstreamBody, UpstreamHttpResponse};

/// Builds a client configured from a provider's connect/request timeouts.
/// Connection pooling is `wreq`'s default per-host pool; we don't tune it
/// further since the spec only names timeouts and retry count as knobs.
pub fn build_client(descriptor: &ProviderDescriptor) -> ProviderResult<wreq::Client> {
    wreq::Client::builder()
        .connect_timeout(descriptor.connect_timeout)
        .timeout(descriptor.request_timeout)
        .build()
        .map_err(|err| ProviderError::Other(format!("building http client: {err}")))
}

/// Sends a non-streaming request, retrying up to `descriptor.retry_count`
/// times on errors that occurred before any response bytes arrived (connect
/// failures, DNS errors, timeouts while awaiting headers). A transport error
/// that happens after headers are in hand is never retried, since the spec
/// forbids retrying once a body byte may have reached the client.
pub async fn send_with_retry(
    client: &wreq::Client,
    descriptor: &ProviderDescriptor,
    method: http::Method,
    url: &str,
    headers: &Headers,
    body: Bytes,
) -> ProviderResult<wreq::Response> {
    let mut attempt = 0;
    loop {
        let mut builder = client.request(method.clone(), url);
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !body.is_empty() {
            builder = builder.body(body.clone());
        }

        match builder.send().await {
            Ok(response) => return Ok(response),
            Err(err) if attempt < descriptor.retry_count && is_pre_body_error(&err) => {
                attempt += 1;
                tokio::time::sleep(backoff(attempt)).await;
            }
            Err(err) => {
                return Err(ProviderError::Other(format!(
                    "upstream request to {url} failed: {err}"
                )));
            }
        }
    }
}

/// Sends the request and converts the `wreq::Response` into our
/// `UpstreamHttpResponse`, buffering the whole body for unary calls or
/// relaying it chunk-by-chunk through a channel for streaming calls.
pub async fn send(
    client: &wreq::Client,
    descriptor: &ProviderDescriptor,
    method: http::Method,
    url: &str,
    headers: &Headers,
    body: Bytes,
    stream: bool,
) -> ProviderResult<UpstreamHttpResponse> {
    let response = send_with_retry(client, descriptor, method, url, headers, body).await?;
    let status = response.status().as_u16();
    let response_headers: Headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();

    if !stream {
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ProviderError::Other(format!("reading upstream body: {err}")))?;
        return Ok(UpstreamHttpResponse {
            status,
            headers: response_headers,
            body: UpstreamBody::Bytes(bytes),
        });
    }

    let (tx, rx) = tokio::sync::mpsc::channel(32);
    tokio::spawn(async move {
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let item = chunk.map_err(|err| ProviderError::Other(format!("stream read failed: {err}")));
            if tx.send(item).await.is_err() {
                break;
            }
        }
    });

    Ok(UpstreamHttpResponse {
        status,
        headers: response_headers,
        body: UpstreamBody::Stream(rx),
    })
}

fn is_pre_body_error(err: &wreq::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(100 * 2u64.pow(attempt.min(5)))
}
