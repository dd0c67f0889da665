use anyhow::Context;
use futures_util::TryStreamExt;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{self, HeaderMap, HeaderName};
use hyper::{Method, Request, Response, StatusCode};

use crate::body::{text_response, BoxBody, BoxError};

/// Headers that describe a single hop and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

/// Forward a plain HTTP request (target listings, version info, the
/// DevTools frontend) to the remote endpoint and stream back its answer.
pub async fn forward(
    req: Request<Incoming>,
    client: &reqwest::Client,
    remote: &str,
) -> Response<BoxBody> {
    let target = target_url(remote, req.uri());
    match forward_inner(req, client, &target).await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(%target, error = ?err, "pass-through request failed");
            text_response(StatusCode::BAD_GATEWAY, format!("{err:#}"))
        }
    }
}

async fn forward_inner(
    req: Request<Incoming>,
    client: &reqwest::Client,
    target: &str,
) -> anyhow::Result<Response<BoxBody>> {
    let method = req.method().clone();
    let mut headers = req.headers().clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    headers.remove(header::UPGRADE);

    let body = if method == Method::GET || method == Method::HEAD {
        bytes::Bytes::new()
    } else {
        req.into_body()
            .collect()
            .await
            .context("failed to read request body")?
            .to_bytes()
    };

    tracing::debug!(%method, %target, "pass-through");

    let upstream = client
        .request(method, target)
        .headers(headers)
        .body(body)
        .send()
        .await
        .with_context(|| format!("upstream request to {target} failed"))?;

    let mut response = Response::builder().status(upstream.status());
    if let Some(response_headers) = response.headers_mut() {
        *response_headers = upstream.headers().clone();
        strip_hop_by_hop(response_headers);
    }

    let stream = upstream
        .bytes_stream()
        .map_ok(Frame::data)
        .map_err(|err| Box::new(err) as BoxError);

    response
        .body(StreamBody::new(stream).boxed_unsync())
        .context("failed to build pass-through response")
}

fn target_url(remote: &str, uri: &hyper::Uri) -> String {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    format!("http://{remote}{path_and_query}")
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}
