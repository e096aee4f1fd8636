//! HTTP endpoints
//!
//! GET  /health        liveness
//! GET  /tools         operation listing
//! POST /tools/{name}  invoke an operation with a JSON parameter object

use crate::envelope::{ErrorCategory, ResultEnvelope};
use crate::orchestrator::{CallContext, ToolOrchestrator};
use actix_web::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use actix_web::http::StatusCode;
use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use serde_json::Value;

/// Header whose value is attached to invocation logs
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Register every endpoint
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(list_tools)
        .service(invoke_tool);
}

#[get("/health")]
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[get("/tools")]
pub async fn list_tools(orchestrator: web::Data<ToolOrchestrator>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "tools": orchestrator.operations(),
    }))
}

#[post("/tools/{name}")]
pub async fn invoke_tool(
    orchestrator: web::Data<ToolOrchestrator>,
    req: HttpRequest,
    name: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    let params = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(params) => params,
            Err(e) => {
                return respond(&ResultEnvelope::error_with_detail(
                    ErrorCategory::InvalidParams,
                    format!("request body is not valid JSON: {}", e),
                ))
            }
        }
    };

    let authorization = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let mut call = CallContext::from_authorization(authorization);

    if let Some(request_id) = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        call = call.with_request_id(request_id);
    }

    let envelope = orchestrator.invoke(&name, &call, params).await;
    respond(&envelope)
}

fn respond(envelope: &ResultEnvelope) -> HttpResponse {
    let status =
        StatusCode::from_u16(envelope.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut response = HttpResponse::build(status);
    if status == StatusCode::UNAUTHORIZED {
        response.insert_header((WWW_AUTHENTICATE, "Bearer"));
    }
    response.json(envelope)
}
