use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::{Fetched, Probe, Request, Target, Transport};
use crate::data::{FetchConfig, PR_CONTENT_DISPOSITION, PR_CONTENT_TYPE, PR_URL, Properties};
use crate::error::{FetchError, Result};

/// Production HTTP transport using reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        if let Some(timeout) = config.connect_timeout() {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| FetchError::Config(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(|e| FetchError::Config(e.to_string()))?;
        Ok(Self { client })
    }

    fn url<'a>(&self, request: &'a Request) -> Result<&'a url::Url> {
        match &request.target {
            Target::Url(u) => Ok(u),
            other => Err(FetchError::transport(other, "not an http target")),
        }
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let mut builder = builder;
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            response = builder.send() => {
                response.map_err(|e| FetchError::transport(&request.target, e))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::transport(&request.target, format!("HTTP {status}")));
        }
        Ok(response)
    }
}

fn response_properties(response: &reqwest::Response) -> Properties {
    let mut properties = Properties::new();
    properties.insert(PR_URL, json!(response.url().to_string()));

    let headers = response.headers();
    for (key, header) in [
        (PR_CONTENT_TYPE, reqwest::header::CONTENT_TYPE),
        (PR_CONTENT_DISPOSITION, reqwest::header::CONTENT_DISPOSITION),
    ] {
        if let Some(value) = headers.get(header).and_then(|v| v.to_str().ok()) {
            properties.insert(key, json!(value));
        }
    }
    properties
}

#[async_trait]
impl Transport for HttpTransport {
    async fn probe(&self, request: &Request, cancel: &CancellationToken) -> Result<Probe> {
        let url = self.url(request)?.clone();
        let response = self.send(self.client.head(url), request, cancel).await?;

        let size = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        Ok(Probe {
            size,
            properties: response_properties(&response),
        })
    }

    async fn fetch(&self, request: &Request, cancel: &CancellationToken) -> Result<Fetched> {
        let url = self.url(request)?.clone();
        let response = self.send(self.client.get(url), request, cancel).await?;

        let size = response.content_length();
        let properties = response_properties(&response);
        let target = request.target.to_string();
        let body = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| FetchError::transport(&target, e)));

        Ok(Fetched {
            size,
            body: Box::pin(body),
            properties,
        })
    }
}
