//! Member management endpoint.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/1.0/resources` | Hardware resources of this member |
//! | GET | `/1.0/cluster/members/{name}/state` | Health and load of this member |
//!
//! Every response uses the [`ApiResponse`] envelope. When a token is
//! configured, requests must carry `Authorization: Bearer <token>`.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ClusterError;
use crate::host::LocalMember;

/// JSON envelope shared by the endpoint and [`crate::MemberClient`].
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// Shared state for endpoint handlers.
#[derive(Clone)]
pub struct MemberEndpointState {
    pub local: Arc<dyn LocalMember>,
    pub token: Option<String>,
}

/// Build the member endpoint router.
pub fn member_router(local: Arc<dyn LocalMember>, token: Option<String>) -> Router {
    Router::new()
        .route("/1.0/resources", get(get_resources))
        .route("/1.0/cluster/members/{name}/state", get(get_member_state))
        .with_state(MemberEndpointState { local, token })
}

fn authorize(state: &MemberEndpointState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = state.token.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented == Some(expected) {
        Ok(())
    } else {
        warn!("rejected unauthenticated member request");
        Err(error_response("not authorized", StatusCode::UNAUTHORIZED))
    }
}

fn probe_error(e: ClusterError) -> Response {
    match e {
        ClusterError::UnknownMember(_) => error_response(&e.to_string(), StatusCode::NOT_FOUND),
        _ => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// GET /1.0/resources
pub async fn get_resources(
    State(state): State<MemberEndpointState>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    debug!("serving member resources");
    match state.local.resources() {
        Ok(resources) => ApiResponse::ok(resources).into_response(),
        Err(e) => probe_error(e),
    }
}

/// GET /1.0/cluster/members/{name}/state
pub async fn get_member_state(
    State(state): State<MemberEndpointState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    debug!(member = %name, "serving member state");
    match state.local.member_state(&name) {
        Ok(member_state) => ApiResponse::ok(member_state).into_response(),
        Err(e) => probe_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use scriptlet_core::{ClusterMemberState, Resources};
    use tower::ServiceExt;

    use crate::error::ClusterResult;

    struct FixedMember;

    impl LocalMember for FixedMember {
        fn resources(&self) -> ClusterResult<Resources> {
            let mut r = Resources::default();
            r.cpu.total = 8;
            Ok(r)
        }

        fn member_state(&self, name: &str) -> ClusterResult<ClusterMemberState> {
            if name != "node-1" {
                return Err(ClusterError::UnknownMember(name.to_string()));
            }
            let mut s = ClusterMemberState::default();
            s.sysinfo.logical_cpus = 8;
            Ok(s)
        }
    }

    fn router(token: Option<&str>) -> Router {
        member_router(Arc::new(FixedMember), token.map(str::to_string))
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn resources_envelope() {
        let resp = router(None)
            .oneshot(Request::get("/1.0/resources").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["cpu"]["total"], 8);
    }

    #[tokio::test]
    async fn unknown_member_state_is_not_found() {
        let resp = router(None)
            .oneshot(
                Request::get("/1.0/cluster/members/node-9/state")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let json = body_json(resp).await;
        assert_eq!(json["success"], false);
    }

    #[test]
    fn error_envelope_decodes_without_data() {
        let resp: ApiResponse<Resources> =
            serde_json::from_str(r#"{"success": false, "error": "member unavailable"}"#).unwrap();
        assert!(!resp.success);
        assert!(resp.data.is_none());
        assert_eq!(resp.error.as_deref(), Some("member unavailable"));
    }

    #[tokio::test]
    async fn token_required_when_configured() {
        let resp = router(Some("secret"))
            .oneshot(Request::get("/1.0/resources").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = router(Some("secret"))
            .oneshot(
                Request::get("/1.0/cluster/members/node-1/state")
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["data"]["sysinfo"]["logical_cpus"], 8);
    }
}
