use async_trait::async_trait;
use reqwest::{Request, Response};
use std::sync::Arc;

/// Sends a prepared request. Implemented by the real client, the credential
/// decorators, and scripted clients in tests.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}

#[async_trait]
impl<C: HttpClient + ?Sized> HttpClient for Arc<C> {
    async fn execute(&self, req: Request) -> reqwest::Result<Response> {
        self.as_ref().execute(req).await
    }
}
