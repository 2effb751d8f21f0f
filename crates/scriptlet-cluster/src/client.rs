//! Client for another member's management endpoint.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::client::conn::http1::SendRequest;
use serde::de::DeserializeOwned;
use tracing::debug;

use scriptlet_core::{ClusterMemberState, Resources};

use crate::error::{ClusterError, ClusterResult};
use crate::server::ApiResponse;

/// How to reach other members.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Bearer token sent with every request.
    pub token: Option<String>,
    /// Bound on TCP connect plus the HTTP handshake.
    pub connect_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            token: None,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// An open HTTP/1 connection to one member.
pub struct MemberClient {
    address: String,
    token: Option<String>,
    sender: SendRequest<Empty<Bytes>>,
}

impl MemberClient {
    /// Connect to the member listening on `address` (`host:port`).
    pub async fn connect(address: &str, options: &ClientOptions) -> ClusterResult<Self> {
        let handshake = async {
            let stream = tokio::net::TcpStream::connect(address)
                .await
                .map_err(|source| ClusterError::Connect {
                    address: address.to_string(),
                    source,
                })?;

            let io = hyper_util::rt::TokioIo::new(stream);
            hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| ClusterError::Http(e.to_string()))
        };

        let (sender, conn) = tokio::time::timeout(options.connect_timeout, handshake)
            .await
            .map_err(|_| ClusterError::ConnectTimeout(address.to_string()))??;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "member connection closed");
            }
        });

        debug!(%address, "connected to member");
        Ok(Self {
            address: address.to_string(),
            token: options.token.clone(),
            sender,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Hardware resources of the member.
    pub async fn resources(&mut self) -> ClusterResult<Resources> {
        self.get("/1.0/resources").await
    }

    /// Health and load of the member named `name`.
    pub async fn member_state(&mut self, name: &str) -> ClusterResult<ClusterMemberState> {
        self.get(&format!("/1.0/cluster/members/{name}/state")).await
    }

    async fn get<T: DeserializeOwned>(&mut self, path: &str) -> ClusterResult<T> {
        let uri = format!("http://{}{path}", self.address);
        let mut builder = http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", &self.address)
            .header("user-agent", "scriptlet/0.1");
        if let Some(token) = &self.token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let req = builder
            .body(Empty::<Bytes>::new())
            .map_err(|e| ClusterError::Http(e.to_string()))?;

        let resp = self
            .sender
            .send_request(req)
            .await
            .map_err(|e| ClusterError::Http(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ClusterError::Http(e.to_string()))?
            .to_bytes();

        let envelope: ApiResponse<T> = serde_json::from_slice(&body)
            .map_err(|e| ClusterError::Decode(format!("{uri}: {e}")))?;

        match envelope {
            ApiResponse {
                success: true,
                data: Some(data),
                ..
            } if status.is_success() => Ok(data),
            ApiResponse { error, .. } => Err(ClusterError::Status {
                status: status.as_u16(),
                message: error.unwrap_or_else(|| "missing data".to_string()),
            }),
        }
    }
}
