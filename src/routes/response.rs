//! Response envelope and request helpers shared by the REST handlers.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{error, warn};

use crate::server::AppState;
use crate::types::{ExamdeskError, Result};

pub type FullBody = Full<Bytes>;

/// Largest request body accepted
pub const MAX_BODY_BYTES: usize = 64 * 1024;

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<FullBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Cache-Control", "no-store")
        .body(Full::new(Bytes::from(json)))
        .unwrap()
}

/// `{ "success": true, ...payload }`. Non-object payloads go under `data`.
pub fn success_response<T: Serialize>(payload: &T) -> Response<FullBody> {
    let body = match serde_json::to_value(payload) {
        Ok(Value::Object(mut map)) => {
            map.insert("success".into(), Value::Bool(true));
            Value::Object(map)
        }
        Ok(other) => json!({ "success": true, "data": other }),
        Err(e) => {
            return error_response(&ExamdeskError::Internal(format!(
                "Response encoding failed: {}",
                e
            )))
        }
    };
    json_response(StatusCode::OK, &body)
}

/// `{ "success": false, "error": ..., "limits"?: ... }` with the mapped status
pub fn error_response(err: &ExamdeskError) -> Response<FullBody> {
    let status = err.status_code();
    if status.is_server_error() {
        error!(error = %err, "Request failed");
    } else {
        warn!(status = status.as_u16(), error = %err, "Request rejected");
    }

    let mut body = json!({
        "success": false,
        "error": err.public_message(),
    });
    if let Some(limits) = err.limits() {
        body["limits"] = json!(limits);
    }
    json_response(status, &body)
}

/// Map a handler result onto the envelope
pub fn respond<T: Serialize>(result: Result<T>) -> Response<FullBody> {
    match result {
        Ok(payload) => success_response(&payload),
        Err(e) => error_response(&e),
    }
}

/// Collect a bounded request body
pub async fn read_body(req: Request<Incoming>) -> Result<Bytes> {
    Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|_| ExamdeskError::Validation("Invalid or oversized request body".into()))
}

/// Collect and parse a JSON body; an empty body parses as `{}`
pub async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T> {
    let bytes = read_body(req).await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::from_str("{}")?);
    }
    Ok(serde_json::from_slice(&bytes)?)
}

/// Query string as a map; later duplicates win
pub fn query_params<B>(req: &Request<B>) -> HashMap<String, String> {
    req.uri()
        .query()
        .and_then(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).ok())
        .map(|pairs| pairs.into_iter().collect())
        .unwrap_or_default()
}

/// Resolve the bearer token to a user id
pub fn authenticate<B>(req: &Request<B>, state: &AppState) -> Result<String> {
    let header = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    state.jwt.authenticate(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{UsageLimits, WindowUsage};
    use http_body_util::BodyExt;

    async fn body_json(resp: Response<FullBody>) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_success_envelope_merges_payload() {
        let resp = success_response(&json!({ "count": 3 }));
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["count"], 3);

        let body = body_json(success_response(&vec![1, 2])).await;
        assert_eq!(body["data"], json!([1, 2]));
    }

    #[tokio::test]
    async fn test_error_envelope_carries_limits() {
        let err = ExamdeskError::limit_exceeded(
            "Daily evaluation limit reached",
            UsageLimits {
                daily: WindowUsage::new(10, 10),
                monthly: WindowUsage::new(200, 10),
            },
        );
        let resp = error_response(&err);
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Daily evaluation limit reached");
        assert_eq!(body["limits"]["daily"]["remaining"], 0);

        let body = body_json(error_response(&ExamdeskError::Database("secret host".into()))).await;
        assert_eq!(body["error"], "Internal server error");
        assert!(body.get("limits").is_none());
    }

    #[test]
    fn test_query_params() {
        let req = Request::builder()
            .uri("/api/mcq/progress?subject=Business%20Law&limit=5&page=2")
            .body(())
            .unwrap();
        let params = query_params(&req);
        assert_eq!(params.get("subject").map(String::as_str), Some("Business Law"));
        assert_eq!(params.get("limit").map(String::as_str), Some("5"));
        assert!(params.get("unit").is_none());
    }
}
