//! 远程存储 - 业务能力层
//!
//! 只负责"列出资源 / 下载资源"两种能力，重试和落盘由获取服务负责。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;

/// 单个资源的默认大小上限
pub const DEFAULT_MAX_ASSET_SIZE: u64 = 64 * 1024 * 1024;

/// 预分配缓冲区的上限，声明的长度只作为提示
const PREALLOC_LIMIT: u64 = 8 * 1024 * 1024;

/// 远程资源描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAsset {
    pub id: String,
    /// 所属作业
    pub assignment: String,
    /// 文件名
    pub name: String,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
    /// 直接下载地址，缺省时使用 `{base}/assets/{id}/content`
    #[serde(default)]
    pub url: Option<String>,
}

/// 远程存储能力
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 列出资源；`assignment` 为 `None` 时列出全部
    async fn list(&self, assignment: Option<&str>) -> Result<Vec<RemoteAsset>, StoreError>;

    /// 下载资源内容
    async fn download(&self, asset: &RemoteAsset) -> Result<Vec<u8>, StoreError>;
}

/// 基于 HTTP 的远程存储
pub struct HttpStore {
    client: Client,
    base_url: String,
    token: Option<String>,
    max_asset_size: u64,
}

impl HttpStore {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Fatal(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            max_asset_size: DEFAULT_MAX_ASSET_SIZE,
        })
    }

    /// 超过上限的资源按不可重试错误处理
    pub fn with_max_asset_size(mut self, max: u64) -> Self {
        self.max_asset_size = max;
        self
    }

    fn too_large(&self, asset: &RemoteAsset, size: u64) -> StoreError {
        StoreError::Fatal(format!(
            "资源 {} 超过大小上限 ({} > {} 字节)",
            asset.name, size, self.max_asset_size
        ))
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn content_url(&self, asset: &RemoteAsset) -> String {
        asset
            .url
            .clone()
            .unwrap_or_else(|| format!("{}/assets/{}/content", self.base_url, asset.id))
    }
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn list(&self, assignment: Option<&str>) -> Result<Vec<RemoteAsset>, StoreError> {
        let url = format!("{}/assets", self.base_url);
        let mut request = self.get(&url);
        if let Some(id) = assignment {
            request = request.query(&[("assignment", id)]);
        }

        debug!("列出远程资源: {} (作业: {:?})", url, assignment);
        let assets = request
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<RemoteAsset>>()
            .await?;
        debug!("远程返回 {} 个资源", assets.len());
        Ok(assets)
    }

    async fn download(&self, asset: &RemoteAsset) -> Result<Vec<u8>, StoreError> {
        let url = self.content_url(asset);
        let response = self.get(&url).send().await?.error_for_status()?;

        if let Some(declared) = response.content_length() {
            if declared > self.max_asset_size {
                return Err(self.too_large(asset, declared));
            }
        }

        let total = response.content_length().or(asset.size);
        let capacity = total.unwrap_or(0).min(PREALLOC_LIMIT) as usize;
        let mut bytes = Vec::with_capacity(capacity);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let received = (bytes.len() + chunk.len()) as u64;
            if received > self.max_asset_size {
                return Err(self.too_large(asset, received));
            }
            bytes.extend_from_slice(&chunk);
        }

        debug!(
            "下载完成: {} ({} / {:?} 字节)",
            asset.name,
            bytes.len(),
            total
        );
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// 对每个连接都返回同一段原始 HTTP 响应
    async fn raw_http_server(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        format!("http://{}", addr)
    }

    fn asset(name: &str, size: Option<u64>) -> RemoteAsset {
        RemoteAsset {
            id: "42".into(),
            assignment: "A1".into(),
            name: name.into(),
            sha256: None,
            size,
            modified: None,
            url: None,
        }
    }

    #[tokio::test]
    async fn test_download_streams_body() {
        let base = raw_http_server(
            "HTTP/1.1 200 OK\r\nContent-Length: 8\r\nConnection: close\r\n\r\nvoce,10\n",
        )
        .await;
        let store = HttpStore::new(base, None, Duration::from_secs(5)).unwrap();
        let bytes = store.download(&asset("mario-rossi.csv", None)).await.unwrap();
        assert_eq!(bytes, b"voce,10\n");
    }

    #[tokio::test]
    async fn test_huge_declared_length_is_rejected_not_allocated() {
        let base = raw_http_server(
            "HTTP/1.1 200 OK\r\nContent-Length: 9000000000000000000\r\nConnection: close\r\n\r\n",
        )
        .await;
        let store = HttpStore::new(base, None, Duration::from_secs(5)).unwrap();
        let err = store.download(&asset("mario-rossi.csv", None)).await.unwrap_err();
        assert!(matches!(err, StoreError::Fatal(_)));
        assert!(!err.is_transient());
    }

    const CHUNKED_BODY: &str = "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n8\r\nvoce,10\n\r\n0\r\n\r\n";

    #[tokio::test]
    async fn test_listing_size_is_only_a_hint() {
        // 清单声明的大小离谱，实际内容很小
        let base = raw_http_server(CHUNKED_BODY).await;
        let store = HttpStore::new(base, None, Duration::from_secs(5)).unwrap();
        let bytes = store
            .download(&asset("mario-rossi.csv", Some(u64::MAX)))
            .await
            .unwrap();
        assert_eq!(bytes.len(), 8);
    }

    #[tokio::test]
    async fn test_streamed_body_over_limit_is_rejected() {
        let base = raw_http_server(CHUNKED_BODY).await;
        let store = HttpStore::new(base, None, Duration::from_secs(5))
            .unwrap()
            .with_max_asset_size(4);
        let err = store.download(&asset("mario-rossi.csv", None)).await.unwrap_err();
        assert!(matches!(err, StoreError::Fatal(_)));
    }

    #[test]
    fn test_asset_from_listing_json() {
        let json = r#"[
            {"id":"42","assignment":"A1","name":"mario-rossi.xlsx",
             "sha256":"abc","size":10,"modified":"2024-03-01T10:00:00Z"},
            {"id":"43","assignment":"A2","name":"anna-bianchi.ods"}
        ]"#;
        let assets: Vec<RemoteAsset> = serde_json::from_str(json).unwrap();
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].size, Some(10));
        assert!(assets[0].modified.is_some());
        assert_eq!(assets[1].sha256, None);
    }

    #[test]
    fn test_content_url_fallback() {
        let store = HttpStore::new("https://store.local/api/", None, Duration::from_secs(5)).unwrap();
        let mut asset = RemoteAsset {
            id: "42".into(),
            assignment: "A1".into(),
            name: "x.xlsx".into(),
            sha256: None,
            size: None,
            modified: None,
            url: None,
        };
        assert_eq!(
            store.content_url(&asset),
            "https://store.local/api/assets/42/content"
        );
        asset.url = Some("https://cdn.local/x".into());
        assert_eq!(store.content_url(&asset), "https://cdn.local/x");
    }
}
