//! Outbound HTTP plumbing used by the webhook notifier.

mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Result, bail};
use serde::Serialize;

/// POSTs `body` as JSON to `url` and fails on any non-success status.
pub async fn post_json<C: HttpClient, T: Serialize + ?Sized>(
    client: &C,
    url: &str,
    body: &T,
) -> Result<()> {
    let mut req = reqwest::Request::new(reqwest::Method::POST, url.parse()?);
    req.headers_mut().insert(
        reqwest::header::CONTENT_TYPE,
        reqwest::header::HeaderValue::from_static("application/json"),
    );
    *req.body_mut() = Some(serde_json::to_vec(body)?.into());

    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        bail!("POST {url} returned {status}");
    }
    Ok(())
}
