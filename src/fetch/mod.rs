//! HTTP plumbing shared by the upstream API fetcher and the table store.

mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Result, bail};
use std::time::Duration;

/// Issues a GET for `url` and returns the body text, failing on non-2xx status.
pub async fn fetch_text<C: HttpClient + ?Sized>(
    client: &C,
    url: reqwest::Url,
    timeout: Option<Duration>,
) -> Result<String> {
    let mut req = reqwest::Request::new(reqwest::Method::GET, url);
    *req.timeout_mut() = timeout;

    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("upstream returned status {}: {}", status, body);
    }
    Ok(resp.text().await?)
}
