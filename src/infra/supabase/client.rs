use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Method, Request, Url};
use std::time::Duration;
use tracing::debug;

use crate::config::StoreConfig;
use crate::fetch::auth::ApiKey;
use crate::fetch::{BasicClient, HttpClient};
use crate::record::StoredRecord;
use crate::services::table_store::{StoreError, TableStore};

/// HTTP stack used against Supabase: the key travels both as `apikey` and
/// as a bearer token.
pub type SupabaseHttp = ApiKey<ApiKey<BasicClient>>;

const PAGE_SIZE: usize = 1000;

/// PostgREST client for `<project>/rest/v1/<table>`.
pub struct SupabaseClient<C = SupabaseHttp> {
    http: C,
    base_url: Url,
    page_size: usize,
}

impl SupabaseClient {
    pub fn new(config: &StoreConfig, timeout: Duration) -> anyhow::Result<Self> {
        let basic = BasicClient::with_timeout(timeout)?;
        let http = ApiKey::new(ApiKey::bearer(basic, &config.key)?, "apikey", &config.key)?;
        Ok(Self::with_client(http, config.url.clone()))
    }
}

impl<C: HttpClient> SupabaseClient<C> {
    pub fn with_client(http: C, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            page_size: PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn table_url(&self, table: &str) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|_| StoreError::BadUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["rest", "v1", table]);
        Ok(url)
    }

    async fn send(&self, req: Request) -> Result<reqwest::Response, StoreError> {
        let resp = self.http.execute(req).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl<C: HttpClient> TableStore for SupabaseClient<C> {
    async fn insert(&self, table: &str, rows: &[StoredRecord]) -> Result<(), StoreError> {
        let body = serde_json::to_vec(rows)?;

        let mut req = Request::new(Method::POST, self.table_url(table)?);
        let headers = req.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("Prefer", HeaderValue::from_static("return=minimal"));
        *req.body_mut() = Some(body.into());

        self.send(req).await?;
        debug!(table, rows = rows.len(), "Batch inserted");
        Ok(())
    }

    async fn select_all(&self, table: &str) -> Result<Vec<StoredRecord>, StoreError> {
        let mut rows = Vec::new();
        let mut offset = 0;

        loop {
            let mut url = self.table_url(table)?;
            url.query_pairs_mut()
                .append_pair("select", "*")
                .append_pair("order", "city.asc,time.asc")
                .append_pair("limit", &self.page_size.to_string())
                .append_pair("offset", &offset.to_string());

            let resp = self.send(Request::new(Method::GET, url)).await?;
            let bytes = resp.bytes().await?;
            let page: Vec<StoredRecord> = serde_json::from_slice(&bytes)?;

            let fetched = page.len();
            rows.extend(page);
            debug!(table, offset, fetched, "Fetched page");

            if fetched < self.page_size {
                break;
            }
            offset += fetched;
        }

        Ok(rows)
    }
}
