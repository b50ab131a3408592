//! Transport backed by the `ureq` HTTP client.
//!
//! The agent is configured per call from the current settings, so changes
//! made through `settings_mut` (timeouts, TLS) take effect on the next
//! request. Status codes >= 400 are returned as data; classifying them is the
//! normalizer's job.

use std::sync::Arc;

use tracing::trace;
use ureq::tls::{Certificate, RootCerts, TlsConfig};
use ureq::Agent;

use crate::error::{Error, Result};
use crate::http::{Headers, HttpMethod, HttpRequest, RawResponse};
use crate::transport::{Transport, TransportKind, TransportSettings};

/// Headers ureq computes itself from the request it sends.
const MANAGED_HEADERS: [&str; 3] = ["host", "content-length", "connection"];

/// Transport that delegates HTTP to `ureq`.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    settings: TransportSettings,
}

impl UreqTransport {
    pub fn new(settings: TransportSettings) -> Self {
        Self { settings }
    }

    fn agent(&self) -> Result<Agent> {
        let timeouts = &self.settings.timeouts;
        let rw = timeouts.rw_duration();
        let mut builder = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_connect(timeouts.open())
            .timeout_send_request(rw)
            .timeout_send_body(rw)
            .timeout_recv_response(rw)
            .timeout_recv_body(rw);

        if let Some(path) = &self.settings.endpoint.cert_path {
            let pem = std::fs::read(path).map_err(|e| {
                Error::transport(format!("cannot read TLS certificate {}: {e}", path.display()))
            })?;
            let cert = Certificate::from_pem(&pem)
                .map_err(|e| Error::transport(format!("invalid TLS certificate: {e}")))?;
            let tls = TlsConfig::builder()
                .root_certs(RootCerts::Specific(Arc::new(vec![cert])))
                .build();
            builder = builder.tls_config(tls);
        }

        Ok(builder.build().new_agent())
    }
}

impl Transport for UreqTransport {
    fn issue(&self, request: &HttpRequest) -> Result<RawResponse> {
        let agent = self.agent()?;
        let url = format!("{}{}", self.settings.endpoint.base_url(), request.path);
        let body = request.body.as_deref();

        let result = match (request.method, body) {
            (HttpMethod::Get, _) => with_headers(agent.get(&url), request).call(),
            (HttpMethod::Head, _) => with_headers(agent.head(&url), request).call(),
            (HttpMethod::Delete, _) => with_headers(agent.delete(&url), request).call(),
            (HttpMethod::Post, Some(bytes)) => with_headers(agent.post(&url), request).send(bytes),
            (HttpMethod::Post, None) => with_headers(agent.post(&url), request).send_empty(),
            (HttpMethod::Put, Some(bytes)) => with_headers(agent.put(&url), request).send(bytes),
            (HttpMethod::Put, None) => with_headers(agent.put(&url), request).send_empty(),
        };
        let mut response = result.map_err(ureq_error)?;

        let status = response.status().as_u16();
        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.append(name.as_str(), value);
            }
        }

        let body = if request.method == HttpMethod::Head {
            Vec::new()
        } else {
            response.body_mut().read_to_vec().map_err(ureq_error)?
        };
        trace!(status, bytes = body.len(), "ureq response received");

        Ok(RawResponse {
            status,
            headers,
            body,
            method: request.method,
        })
    }

    fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut TransportSettings {
        &mut self.settings
    }

    fn kind(&self) -> Option<TransportKind> {
        Some(TransportKind::Ureq)
    }
}

fn with_headers<B>(mut builder: ureq::RequestBuilder<B>, request: &HttpRequest) -> ureq::RequestBuilder<B> {
    for (name, value) in request.headers.iter() {
        if MANAGED_HEADERS.contains(&name) {
            continue;
        }
        builder = builder.header(name, value);
    }
    if let Some(line) = request.cookie_line() {
        builder = builder.header("cookie", line.as_str());
    }
    builder
}

fn ureq_error(err: ureq::Error) -> Error {
    match err {
        ureq::Error::Timeout(reason) => Error::transport(format!("timed out: {reason}")),
        other => Error::transport(other.to_string()),
    }
}
