//! Client forwarder
//!
//! Replays a `TunnelRequest` against the local origin and packs the origin's
//! answer into a `TunnelResponse`. Failures become a 502 so the relay never
//! waits for a response that will not come.

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use ntnl_common::validation::validate_path;
use ntnl_common::{
    Result, TunnelError, TunnelRequest, TunnelResponse, headers_to_map, map_to_headers,
    strip_hop_by_hop,
};
use reqwest::{Client, Method};
use std::collections::HashMap;
use std::io::Read;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Codings the forwarder can turn back into identity
const ACCEPTED_ENCODINGS: &str = "gzip, deflate";

pub struct Forwarder {
    client: Client,
    local_address: String,
}

impl Forwarder {
    /// `local_address` is the origin base URL, e.g. "http://127.0.0.1:3000"
    pub fn new(local_address: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TunnelError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            local_address: local_address.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    /// Answer one relayed request; never fails
    pub async fn forward(&self, request: TunnelRequest) -> TunnelResponse {
        let start_time = Instant::now();
        let request_id = request.id.clone();
        let summary = format!("{} {}", request.method, request.path);

        match self.call_origin(request).await {
            Ok(response) => {
                debug!(
                    "{} -> {} ({}ms)",
                    summary,
                    response.status_code,
                    start_time.elapsed().as_millis()
                );
                response
            }
            Err(e) => {
                warn!("Local service error for {}: {}", summary, e);
                TunnelResponse::bad_gateway(request_id)
            }
        }
    }

    async fn call_origin(&self, request: TunnelRequest) -> Result<TunnelResponse> {
        let path = validate_path(&request.path).map_err(|e| TunnelError::HttpError(e.to_string()))?;
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| TunnelError::HttpError(format!("Unsupported HTTP method: {}", request.method)))?;
        let url = format!("{}{}", self.local_address, path);

        let mut builder = self
            .client
            .request(method, &url)
            .headers(map_to_headers(&outgoing_headers(request.headers)));
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TunnelError::HttpError(e.to_string()))?;

        let status_code = response.status().as_u16();
        let mut headers = headers_to_map(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| TunnelError::HttpError(e.to_string()))?;
        let body = decode_content(&mut headers, body.to_vec())?;

        let mut tunnel_response = TunnelResponse::new(request.id, status_code);
        tunnel_response.headers = headers;
        tunnel_response.body = (!body.is_empty()).then_some(body);
        Ok(tunnel_response)
    }
}

/// Headers sent to the origin
///
/// The client recomputes `content-length`, and `accept-encoding` is narrowed
/// to codings that `decode_content` can undo.
pub fn outgoing_headers(headers: HashMap<String, String>) -> HashMap<String, String> {
    let mut headers = strip_hop_by_hop(headers);
    headers.remove("content-length");
    if let Some(accept) = headers.get_mut("accept-encoding") {
        *accept = ACCEPTED_ENCODINGS.to_string();
    }
    headers
}

/// Undo a gzip or deflate `content-encoding`, fixing the headers to match
pub fn decode_content(headers: &mut HashMap<String, String>, body: Vec<u8>) -> Result<Vec<u8>> {
    let Some(encoding) = headers
        .get("content-encoding")
        .map(|v| v.trim().to_ascii_lowercase())
    else {
        return Ok(body);
    };

    let decoded = match encoding.as_str() {
        _ if body.is_empty() => body,
        "gzip" | "x-gzip" => read_all(GzDecoder::new(body.as_slice()))?,
        "deflate" => match read_all(ZlibDecoder::new(body.as_slice())) {
            Ok(decoded) => decoded,
            // Some servers send raw deflate without the zlib wrapper
            Err(_) => read_all(DeflateDecoder::new(body.as_slice()))?,
        },
        "identity" => body,
        other => {
            warn!("Leaving unsupported content-encoding {} in place", other);
            return Ok(body);
        }
    };

    headers.remove("content-encoding");
    headers.insert("content-length".to_string(), decoded.len().to_string());
    Ok(decoded)
}

fn read_all(mut reader: impl Read) -> Result<Vec<u8>> {
    let mut decoded = Vec::new();
    reader.read_to_end(&mut decoded)?;
    Ok(decoded)
}
