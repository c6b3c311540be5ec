//! etcd v3 JSON gateway client.
//!
//! Talks to etcd's grpc-gateway (`/v3/kv/*`) over HTTP. Keys and values are
//! base64 in the JSON bodies; prefix scans use a `range_end` formed by
//! incrementing the last byte of the prefix that is not `0xff`.
//!
//! Endpoints are tried in order until one answers.

use crate::core::error::{FredError, FredResult};
use crate::nameservice::CoordinationStore;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct PutRequest {
    key: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct RangeRequest {
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    range_end: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KeyValue {
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<KeyValue>,
}

#[derive(Debug, Deserialize)]
struct DeleteRangeResponse {
    #[serde(default)]
    deleted: Option<String>,
}

/// Compute the etcd range end covering every key with `prefix`.
pub fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    // All bytes were 0xff: scan to the end of the keyspace.
    vec![0]
}

/// Coordination store backed by an etcd cluster.
#[derive(Debug, Clone)]
pub struct EtcdGatewayStore {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl EtcdGatewayStore {
    /// Create a client for the given gateway endpoints
    /// (e.g. `http://127.0.0.1:2379`).
    pub fn new(endpoints: Vec<String>, timeout: Duration) -> FredResult<Self> {
        if endpoints.is_empty() {
            return Err(FredError::invalid("etcd store needs at least one endpoint"));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FredError::internal(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            client,
            endpoints: endpoints
                .into_iter()
                .map(|e| e.trim_end_matches('/').to_string())
                .collect(),
        })
    }

    async fn call<B, R>(&self, path: &str, body: &B) -> FredResult<R>
    where
        B: Serialize + Sync,
        R: for<'de> Deserialize<'de>,
    {
        let mut last_err = None;

        for endpoint in &self.endpoints {
            let url = format!("{}{}", endpoint, path);
            let response = match self.client.post(&url).json(body).send().await {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!(endpoint = %endpoint, error = %e, "etcd endpoint unreachable");
                    last_err = Some(FredError::transport(endpoint.as_str(), e.to_string()));
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                last_err = Some(FredError::transport(
                    endpoint.as_str(),
                    format!("etcd returned {}: {}", status, text),
                ));
                continue;
            }

            return response.json::<R>().await.map_err(|e| {
                FredError::decode(format!("malformed etcd response from {}: {}", endpoint, e))
            });
        }

        Err(last_err.unwrap_or_else(|| FredError::internal("no etcd endpoints configured")))
    }

    fn decode_b64(field: &str, value: &str) -> FredResult<String> {
        let bytes = STANDARD
            .decode(value)
            .map_err(|e| FredError::decode(format!("etcd {} is not base64: {}", field, e)))?;
        String::from_utf8(bytes)
            .map_err(|e| FredError::decode(format!("etcd {} is not UTF-8: {}", field, e)))
    }

    fn range(prefix: &str) -> RangeRequest {
        RangeRequest {
            key: STANDARD.encode(prefix),
            range_end: Some(STANDARD.encode(prefix_range_end(prefix.as_bytes()))),
        }
    }
}

#[async_trait]
impl CoordinationStore for EtcdGatewayStore {
    async fn put(&self, key: &str, value: &str) -> FredResult<()> {
        let body = PutRequest {
            key: STANDARD.encode(key),
            value: STANDARD.encode(value),
        };
        let _: serde_json::Value = self.call("/v3/kv/put", &body).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> FredResult<Option<String>> {
        let body = RangeRequest {
            key: STANDARD.encode(key),
            range_end: None,
        };
        let response: RangeResponse = self.call("/v3/kv/range", &body).await?;
        response
            .kvs
            .first()
            .map(|kv| Self::decode_b64("value", &kv.value))
            .transpose()
    }

    async fn get_prefix(&self, prefix: &str) -> FredResult<Vec<(String, String)>> {
        let response: RangeResponse = self.call("/v3/kv/range", &Self::range(prefix)).await?;
        let mut pairs = response
            .kvs
            .iter()
            .map(|kv| {
                Ok((
                    Self::decode_b64("key", &kv.key)?,
                    Self::decode_b64("value", &kv.value)?,
                ))
            })
            .collect::<FredResult<Vec<_>>>()?;
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(pairs)
    }

    async fn delete_prefix(&self, prefix: &str) -> FredResult<usize> {
        let response: DeleteRangeResponse =
            self.call("/v3/kv/deleterange", &Self::range(prefix)).await?;
        // int64 fields arrive as JSON strings from the gateway.
        Ok(response
            .deleted
            .and_then(|d| d.parse::<usize>().ok())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_range_end() {
        assert_eq!(prefix_range_end(b"kg-a-"), b"kg-a.".to_vec());
        assert_eq!(prefix_range_end(b"a\xff"), b"b".to_vec());
        assert_eq!(prefix_range_end(b"\xff\xff"), vec![0]);
    }

    #[test]
    fn test_requires_endpoint() {
        assert!(EtcdGatewayStore::new(Vec::new(), Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_range_request_body() {
        let body = serde_json::to_value(EtcdGatewayStore::range("kg-")).unwrap();
        assert_eq!(body["key"], STANDARD.encode("kg-"));
        assert_eq!(body["range_end"], STANDARD.encode("kg."));
    }
}
