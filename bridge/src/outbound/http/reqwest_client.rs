//! Reqwest-backed outbound client.
//!
//! Every request carries the active trace as a W3C `traceparent` (and
//! `tracestate` when present) for a fresh child span, so downstream services
//! join the caller's trace.

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method};
use tracing::debug;
use url::Url;

use crate::domain::ports::{
    OutboundClient, OutboundError, ReceivedResponse, RequestSpec, StreamedResponse, Verb,
};
use crate::domain::{AmbientContext, TRACEPARENT_HEADER, TRACESTATE_HEADER};

const PREMATURE_CLOSE_MARKERS: [&str; 2] = [
    "connection closed before message completed",
    "incomplete message",
];

/// Outbound client over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    /// Build a client with an explicit per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`OutboundError::InvalidRequest`] when the reqwest client
    /// cannot be constructed.
    pub fn new(timeout: Duration) -> Result<Self, OutboundError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| OutboundError::invalid_request(err.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an already configured reqwest client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn prepare(&self, verb: Verb, url: &Url, spec: RequestSpec) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method_for(verb), url.clone());
        for (name, value) in &spec.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let outbound = AmbientContext::capture().trace().child();
        builder = builder.header(TRACEPARENT_HEADER, outbound.to_traceparent());
        if let Some(state) = outbound.trace_state() {
            builder = builder.header(TRACESTATE_HEADER, state);
        }
        debug!(
            method = verb.as_str(),
            %url,
            span_id = %outbound.span_id(),
            "sending outbound request"
        );
        match spec.body {
            Some(body) => builder.body(body),
            None => builder,
        }
    }
}

#[async_trait]
impl OutboundClient for ReqwestClient {
    async fn request(
        &self,
        verb: Verb,
        url: &Url,
        spec: RequestSpec,
    ) -> Result<ReceivedResponse, OutboundError> {
        let response = self
            .prepare(verb, url, spec)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response.bytes().await.map_err(map_transport_error)?;
        Ok(ReceivedResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }

    async fn stream(
        &self,
        verb: Verb,
        url: &Url,
        spec: RequestSpec,
    ) -> Result<StreamedResponse, OutboundError> {
        let response = self
            .prepare(verb, url, spec)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(map_transport_error))
            .boxed();
        Ok(StreamedResponse {
            status,
            headers,
            body,
        })
    }
}

fn method_for(verb: Verb) -> Method {
    match verb {
        Verb::Get => Method::GET,
        Verb::Post => Method::POST,
        Verb::Put => Method::PUT,
        Verb::Patch => Method::PATCH,
        Verb::Delete => Method::DELETE,
        Verb::Head => Method::HEAD,
    }
}

fn collect_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_owned(), value.to_owned()))
        })
        .collect()
}

fn map_transport_error(error: reqwest::Error) -> OutboundError {
    if error.is_timeout() {
        OutboundError::timeout(error.to_string())
    } else if error.is_connect() {
        OutboundError::connect(error.to_string())
    } else if is_premature_close(&error) {
        OutboundError::connection_reset(error.to_string())
    } else if error.is_builder() {
        OutboundError::invalid_request(error.to_string())
    } else if error.is_decode() {
        OutboundError::decode(error.to_string())
    } else {
        OutboundError::transport(error.to_string())
    }
}

/// Walk the source chain looking for a connection that died mid-response.
fn is_premature_close(error: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if is_reset_kind(io_err.kind()) {
                return true;
            }
        }
        let rendered = err.to_string();
        if PREMATURE_CLOSE_MARKERS
            .iter()
            .any(|marker| rendered.contains(marker))
        {
            return true;
        }
        current = err.source();
    }
    false
}

fn is_reset_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}
