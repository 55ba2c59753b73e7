//! Quiz REST endpoints under `/api/mcq`
//!
//! Every handler authenticates the bearer token first and answers with the
//! `{ success, ... }` envelope.

use hyper::body::Incoming;
use hyper::{Request, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::routes::response::{authenticate, query_params, read_json, respond, FullBody};
use crate::server::AppState;
use crate::services::evaluation::{SubmitMeta, DEFAULT_TIME_SPENT_SECS};
use crate::services::generation::GenerateParams;
use crate::services::progress::AttemptFilter;
use crate::services::reports::{parse_recent_count, Pagination};
use crate::types::{ExamdeskError, Result};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody {
    #[serde(default)]
    level: String,
    #[serde(default)]
    subject: String,
    #[serde(default, alias = "chapter_name")]
    chapter: String,
    #[serde(default, alias = "unit_name")]
    unit: Option<String>,
    #[serde(default)]
    difficulty: String,
    #[serde(default, alias = "num_questions")]
    num_questions: Value,
}

/// Accept a number or a numeric string; anything else fails range validation
fn count_value(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody {
    #[serde(default)]
    mcq_id: Value,
    #[serde(default)]
    user_answer: Value,
    #[serde(default)]
    time_spent: Option<i64>,
}

fn filter_from(params: &HashMap<String, String>) -> AttemptFilter {
    let pick = |key: &str| {
        params
            .get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    AttemptFilter {
        subject: pick("subject"),
        chapter: pick("chapter"),
        unit: pick("unit"),
    }
}

fn pagination_from(params: &HashMap<String, String>) -> Result<Pagination> {
    Pagination::from_query(
        params.get("limit").map(String::as_str),
        params.get("page").map(String::as_str),
    )
}

/// POST /api/mcq/generate
pub async fn handle_generate(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    respond(generate(req, &state).await)
}

async fn generate(req: Request<Incoming>, state: &AppState) -> Result<Value> {
    let user_id = authenticate(&req, state)?;
    let body: GenerateBody = read_json(req).await?;

    let params = GenerateParams {
        level: body.level,
        subject: body.subject,
        chapter: body.chapter,
        unit: body.unit,
        difficulty: body.difficulty,
        num_questions: count_value(&body.num_questions),
    };
    let result = state.orchestrator.generate(&user_id, params).await?;

    Ok(json!({
        "setId": result.set_id,
        "plan": result.plan,
        "requested": result.requested,
        "count": result.count,
        "mcqs": result.items,
    }))
}

/// POST /api/mcq/submit
pub async fn handle_submit(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    respond(submit(req, &state).await)
}

async fn submit(req: Request<Incoming>, state: &AppState) -> Result<Value> {
    let user_id = authenticate(&req, state)?;
    let body: SubmitBody = read_json(req).await?;

    let item_id = body
        .mcq_id
        .as_str()
        .ok_or_else(|| ExamdeskError::Validation("Invalid mcqId".into()))?;
    let user_answer = body
        .user_answer
        .as_str()
        .ok_or_else(|| ExamdeskError::Validation("Invalid userAnswer".into()))?;
    let meta = SubmitMeta {
        time_spent: body
            .time_spent
            .filter(|t| *t >= 0)
            .unwrap_or(DEFAULT_TIME_SPENT_SECS),
    };

    let outcome = state
        .engine
        .submit(&user_id, item_id, user_answer, meta)
        .await?;
    info!(user_id = %user_id, item_id = %item_id, correct = outcome.evaluation.is_correct, "Answer submitted");

    Ok(json!({
        "evaluationId": outcome.evaluation.evaluation_id,
        "isCorrect": outcome.evaluation.is_correct,
        "score": outcome.evaluation.score,
        "message": outcome.verdict(),
        "question": outcome.question,
        "options": outcome.options,
        "correctAnswer": outcome.evaluation.correct_answer,
        "explanation": outcome.explanation,
        "userAnswer": outcome.evaluation.user_answer,
        "limits": { "evaluations": outcome.limits },
    }))
}

/// GET /api/mcq/dashboard
pub async fn handle_dashboard(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    let result = match authenticate(&req, &state) {
        Ok(user_id) => state.reports.dashboard(&user_id).await,
        Err(e) => Err(e),
    };
    respond(result)
}

/// GET /api/mcq/progress
pub async fn handle_progress(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    respond(progress(&req, &state).await)
}

async fn progress(req: &Request<Incoming>, state: &AppState) -> Result<Value> {
    let user_id = authenticate(req, state)?;
    let params = query_params(req);
    let pagination = pagination_from(&params)?;
    let page = state
        .reports
        .progress(&user_id, &filter_from(&params), pagination)
        .await?;
    Ok(serde_json::to_value(page)?)
}

/// GET /api/mcq/results
pub async fn handle_results(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    respond(results(&req, &state).await)
}

async fn results(req: &Request<Incoming>, state: &AppState) -> Result<Value> {
    let user_id = authenticate(req, state)?;
    let params = query_params(req);
    let pagination = pagination_from(&params)?;
    let page = state
        .reports
        .results(&user_id, &filter_from(&params), pagination)
        .await?;
    Ok(serde_json::to_value(page)?)
}

/// GET /api/mcq/last-attempted, optionally narrowed by subject/chapter/unit
pub async fn handle_last_attempted(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    respond(last_attempted(&req, &state).await)
}

async fn last_attempted(req: &Request<Incoming>, state: &AppState) -> Result<Value> {
    let user_id = authenticate(req, state)?;
    let filter = filter_from(&query_params(req));
    let view = state.reports.last_attempted(&user_id, &filter).await?;
    Ok(json!({ "data": view }))
}

/// GET /api/mcq/last-attempted-list?limit=N
pub async fn handle_last_attempted_list(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Response<FullBody> {
    respond(last_attempted_list(&req, &state).await)
}

async fn last_attempted_list(req: &Request<Incoming>, state: &AppState) -> Result<Value> {
    let user_id = authenticate(req, state)?;
    let params = query_params(req);
    let count = parse_recent_count(params.get("limit").map(String::as_str))?;

    let views = state.reports.recent_attempts(&user_id, count).await?;
    if views.is_empty() {
        return Err(ExamdeskError::NotFound("No MCQ attempted yet".into()));
    }
    Ok(json!({ "count": views.len(), "data": views }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_body_aliases() {
        let body: GenerateBody = serde_json::from_value(json!({
            "level": "Final",
            "subject": "taxation",
            "chapter_name": "GST",
            "unit_name": "Returns",
            "difficulty": "easy",
            "numQuestions": "7"
        }))
        .unwrap();
        assert_eq!(body.chapter, "GST");
        assert_eq!(body.unit.as_deref(), Some("Returns"));
        assert_eq!(count_value(&body.num_questions), 7);

        let body: GenerateBody = serde_json::from_value(json!({ "numQuestions": 3 })).unwrap();
        assert_eq!(count_value(&body.num_questions), 3);
        assert_eq!(count_value(&json!(true)), 0);
    }

    #[test]
    fn test_filter_ignores_blank_values() {
        let mut params = HashMap::new();
        params.insert("subject".to_string(), "taxation".to_string());
        params.insert("chapter".to_string(), "  ".to_string());
        let filter = filter_from(&params);
        assert_eq!(filter.subject.as_deref(), Some("taxation"));
        assert!(filter.chapter.is_none());
        assert!(filter.unit.is_none());
    }
}
