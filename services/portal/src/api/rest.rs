//! Portal REST API
//!
//! Route groups: provider webhooks (dial-in, call events, payment
//! processors), agent-runtime tool actions (bearer-authenticated), public
//! tokenized audio, and the user-scoped control surface. Session handling
//! and CSRF live in the fronting layer, not here.

use axum::body::Bytes;
use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use voxway_core::VoxwayError;

use crate::actions;
use crate::agents::{self, projector, AgentInput};
use crate::calls::{coordinator, reducer};
use crate::deposits;
use crate::dialer;
use crate::numbers;
use crate::state::AppState;
use crate::types::CampaignStatus;
use crate::users;
use crate::webhooks::verify;

pub struct ApiError(VoxwayError);

impl From<VoxwayError> for ApiError {
    fn from(err: VoxwayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        let body = Json(json!({
            "error": self.0.to_string(),
            "code": self.0.error_code(),
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(health))
        // Telephony provider webhooks
        .route("/dial-in/{agent_name}", post(dialin_webhook))
        .route("/events", post(events_webhook))
        // Public tokenized audio
        .route(
            "/public/agents/{agent_id}/background-audio.wav",
            get(serve_agent_audio),
        )
        .route(
            "/public/campaigns/{campaign_id}/audio.wav",
            get(serve_campaign_audio),
        )
        // Tool actions (agent-runtime bearer auth)
        .route("/actions/send-email", post(action_send_email))
        .route("/actions/send-sms", post(action_send_sms))
        .route("/actions/send-mail", post(action_send_mail))
        .route("/actions/send-video-meeting-link", post(action_meeting_link))
        .route("/actions/create-payment-link", post(action_payment_link))
        .route("/actions/log-message", post(action_log_message))
        // Payment processor webhooks
        .route("/webhooks/square", post(square_webhook))
        .route("/webhooks/stripe", post(stripe_webhook))
        .route("/webhooks/crypto", post(crypto_webhook))
        .route("/webhooks/ach", post(ach_webhook))
        // Wallet
        .route("/v1/users/{user_id}/balance", get(get_balance))
        .route("/v1/users/{user_id}/transactions", get(list_transactions))
        .route("/v1/users/{user_id}/adjust", post(adjust_balance))
        .route("/v1/users/{user_id}/cdrs", get(list_cdrs))
        // Deposits
        .route("/v1/users/{user_id}/deposits/card", post(deposit_card))
        .route("/v1/users/{user_id}/deposits/crypto", post(deposit_crypto))
        .route("/v1/users/{user_id}/deposits/ach", post(deposit_ach))
        // SMTP settings
        .route("/v1/users/{user_id}/smtp-settings", put(put_smtp_settings))
        // Doc templates
        .route("/v1/users/{user_id}/templates", post(upload_template))
        // Agents
        .route(
            "/v1/users/{user_id}/agents",
            get(list_agents).post(create_agent),
        )
        .route(
            "/v1/users/{user_id}/agents/{agent_id}",
            get(get_agent).put(update_agent).delete(delete_agent),
        )
        .route(
            "/v1/users/{user_id}/agents/{agent_id}/background-audio",
            post(upload_agent_audio),
        )
        // Numbers
        .route(
            "/v1/users/{user_id}/numbers",
            get(list_numbers).post(purchase_number),
        )
        .route(
            "/v1/users/{user_id}/numbers/available",
            get(search_numbers),
        )
        .route(
            "/v1/users/{user_id}/numbers/{number_id}",
            axum::routing::delete(release_number),
        )
        .route(
            "/v1/users/{user_id}/numbers/{number_id}/assign",
            post(assign_number),
        )
        .route(
            "/v1/users/{user_id}/numbers/{number_id}/unassign",
            post(unassign_number),
        )
        // Dialer
        .route("/v1/users/{user_id}/campaigns", post(create_campaign))
        .route(
            "/v1/users/{user_id}/campaigns/{campaign_id}",
            get(get_campaign),
        )
        .route(
            "/v1/users/{user_id}/campaigns/{campaign_id}/status",
            post(set_campaign_status),
        )
        .route(
            "/v1/users/{user_id}/campaigns/{campaign_id}/leads",
            get(list_leads).post(upload_leads),
        )
        .route(
            "/v1/users/{user_id}/campaigns/{campaign_id}/audio",
            post(upload_campaign_audio),
        )
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "db": state.pool.is_healthy().await,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ---- Telephony webhooks ----

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

async fn dialin_webhook(
    State(state): State<AppState>,
    Path(_agent_name): Path<String>,
    Query(query): Query<TokenQuery>,
    Json(raw): Json<Value>,
) -> ApiResult<Json<Value>> {
    coordinator::verify_dialin_token(&state, query.token.as_deref())?;

    let req: coordinator::DialinRequest = serde_json::from_value(raw.clone())
        .map_err(|e| VoxwayError::Validation(format!("Invalid dial-in payload: {}", e)))?;

    coordinator::handle_dialin(&state, req, raw).await?;
    Ok(Json(json!({ "status": "started" })))
}

fn parse_events(raw: Value) -> Vec<reducer::CallEvent> {
    let items = match raw {
        Value::Object(ref map) if map.contains_key("events") => {
            raw["events"].as_array().cloned().unwrap_or_default()
        }
        other => vec![other],
    };
    items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect()
}

async fn events_webhook(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    Json(raw): Json<Value>,
) -> ApiResult<Json<Value>> {
    coordinator::verify_dialin_token(&state, query.token.as_deref())?;

    let events = parse_events(raw);
    let mut matched = 0usize;
    for event in &events {
        let result = if event.is_dialout() {
            dialer::reduce_dialout_event(&state, event).await
        } else {
            reducer::reduce_dialin_event(&state, event).await
        };
        match result {
            Ok(true) => matched += 1,
            Ok(false) => {}
            Err(e) => {
                tracing::error!(event_type = %event.event_type, error = %e, "Event reduction failed");
            }
        }
    }
    Ok(Json(json!({ "received": events.len(), "matched": matched })))
}

// ---- Public audio ----

#[derive(Deserialize)]
struct AudioTokenQuery {
    token: String,
}

async fn serve_agent_audio(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
    Query(query): Query<AudioTokenQuery>,
) -> ApiResult<Response> {
    let (mime, audio) = projector::get_background_audio(&state, agent_id, &query.token).await?;
    Ok(([(axum::http::header::CONTENT_TYPE, mime)], audio).into_response())
}

async fn serve_campaign_audio(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
    Query(query): Query<AudioTokenQuery>,
) -> ApiResult<Response> {
    let audio = dialer::get_campaign_audio(&state, campaign_id, &query.token).await?;
    Ok((
        [(axum::http::header::CONTENT_TYPE, "audio/wav".to_string())],
        audio,
    )
        .into_response())
}

// ---- Tool actions ----

async fn bearer_agent(state: &AppState, headers: &HeaderMap) -> Result<crate::types::Agent, VoxwayError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| VoxwayError::Auth("Missing bearer token".into()))?;
    actions::authenticate(state, token).await
}

/// Map an in-flight duplicate to 202, per the idempotency contract.
fn action_result(result: Result<actions::ActionResponse, VoxwayError>) -> Response {
    match result {
        Ok(response) => Json(response).into_response(),
        Err(VoxwayError::Conflict(message)) => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "in_progress", "detail": message })),
        )
            .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn action_send_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<actions::email::SendEmailRequest>,
) -> Response {
    let agent = match bearer_agent(&state, &headers).await {
        Ok(agent) => agent,
        Err(e) => return ApiError(e).into_response(),
    };
    action_result(actions::email::send_email(&state, &agent, req).await)
}

async fn action_send_sms(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<actions::sms::SendSmsRequest>,
) -> Response {
    let agent = match bearer_agent(&state, &headers).await {
        Ok(agent) => agent,
        Err(e) => return ApiError(e).into_response(),
    };
    action_result(actions::sms::send_sms(&state, &agent, req).await)
}

async fn action_send_mail(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<actions::mail::SendMailRequest>,
) -> Response {
    let agent = match bearer_agent(&state, &headers).await {
        Ok(agent) => agent,
        Err(e) => return ApiError(e).into_response(),
    };
    action_result(actions::mail::send_physical_mail(&state, &agent, req).await)
}

async fn action_meeting_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<actions::meeting::MeetingLinkRequest>,
) -> Response {
    let agent = match bearer_agent(&state, &headers).await {
        Ok(agent) => agent,
        Err(e) => return ApiError(e).into_response(),
    };
    action_result(actions::meeting::create_meeting_link(&state, &agent, req).await)
}

async fn action_payment_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<actions::payment_link::PaymentLinkRequest>,
) -> ApiResult<Json<actions::payment_link::PaymentLinkResponse>> {
    let agent = bearer_agent(&state, &headers).await?;
    let response = actions::payment_link::create_payment_link(&state, &agent, req).await?;
    Ok(Json(response))
}

async fn action_log_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<actions::message_log::LogMessageRequest>,
) -> ApiResult<Json<Value>> {
    let agent = bearer_agent(&state, &headers).await?;
    actions::message_log::log_message(&state, &agent, req).await?;
    Ok(Json(json!({ "status": "logged" })))
}

// ---- Payment processor webhooks (raw body first, parse second) ----

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn square_webhook(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let payments = &state.config.payments;
    let signature = header_str(&headers, "x-square-hmacsha256-signature").unwrap_or("");
    let actual_url = format!("{}{}", state.config.public_base_url, uri.path());

    let verified = payments
        .square_webhook_signature_key
        .as_deref()
        .map(|key| {
            verify::verify_square(
                key,
                payments.square_notification_url.as_deref(),
                &actual_url,
                &body,
                signature,
            )
        })
        .unwrap_or(false);
    verify::require_verified(
        "square",
        payments.square_webhook_signature_key.as_deref(),
        verified,
    )?;

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| VoxwayError::Validation(format!("Invalid JSON: {}", e)))?;
    deposits::square::handle_webhook(&state, &payload).await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    const TOLERANCE_SECS: i64 = 300;
    let payments = &state.config.payments;
    let signature = header_str(&headers, "stripe-signature").unwrap_or("");

    let verified = payments
        .stripe_webhook_secret
        .as_deref()
        .map(|secret| {
            verify::verify_stripe(secret, signature, &body, Utc::now().timestamp(), TOLERANCE_SECS)
        })
        .unwrap_or(false);
    verify::require_verified("stripe", payments.stripe_webhook_secret.as_deref(), verified)?;

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| VoxwayError::Validation(format!("Invalid JSON: {}", e)))?;
    deposits::stripe::handle_webhook(&state, &payload).await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn crypto_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let payments = &state.config.payments;
    let signature = header_str(&headers, "x-nowpayments-sig").unwrap_or("");

    let verified = payments
        .crypto_ipn_secret
        .as_deref()
        .map(|secret| verify::verify_crypto_ipn(secret, &body, signature))
        .unwrap_or(false);
    verify::require_verified("crypto", payments.crypto_ipn_secret.as_deref(), verified)?;

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| VoxwayError::Validation(format!("Invalid JSON: {}", e)))?;
    deposits::crypto::handle_ipn(&state, &payload).await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn ach_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let payments = &state.config.payments;
    let signature = header_str(&headers, "x-signature").unwrap_or("");

    let verified = payments
        .ach_webhook_secret
        .as_deref()
        .map(|secret| verify::verify_ach(secret, &body, signature))
        .unwrap_or(false);
    verify::require_verified("ach", payments.ach_webhook_secret.as_deref(), verified)?;

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| VoxwayError::Validation(format!("Invalid JSON: {}", e)))?;
    deposits::ach::handle_webhook(&state, &payload).await?;
    Ok(Json(json!({ "status": "ok" })))
}

// ---- Wallet ----

async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let balance = state.ledger.balance(user_id).await?;
    Ok(Json(json!({ "balance": balance })))
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<i64>,
}

async fn list_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Value>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let transactions = state.ledger.transactions(user_id, limit).await?;
    Ok(Json(json!({ "transactions": transactions })))
}

#[derive(Deserialize)]
struct AdjustRequest {
    amount: Decimal,
    description: String,
}

async fn adjust_balance(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<AdjustRequest>,
) -> ApiResult<Json<Value>> {
    let entry = users::admin_adjust(&state, user_id, req.amount, &req.description).await?;
    Ok(Json(json!({
        "transaction_id": entry.transaction_id,
        "balance_before": entry.balance_before,
        "balance_after": entry.balance_after,
    })))
}

async fn list_cdrs(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Value>> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let conn = state.pool.get().await.map_err(VoxwayError::from)?;
    let rows = conn
        .query(
            "SELECT kind, call_id, call_domain, from_number, to_number, time_start, \
             time_end, billsec, price, status FROM cdrs \
             WHERE user_id = $1 ORDER BY time_start DESC LIMIT $2",
            &[&user_id, &limit],
        )
        .await
        .map_err(|e| VoxwayError::Database(e.to_string()))?;

    let cdrs: Vec<Value> = rows
        .iter()
        .map(|row| {
            json!({
                "kind": row.get::<_, String>("kind"),
                "call_id": row.get::<_, Option<String>>("call_id"),
                "call_domain": row.get::<_, Option<String>>("call_domain"),
                "from_number": row.get::<_, String>("from_number"),
                "to_number": row.get::<_, String>("to_number"),
                "time_start": row.get::<_, chrono::DateTime<Utc>>("time_start"),
                "time_end": row.get::<_, Option<chrono::DateTime<Utc>>>("time_end"),
                "billsec": row.get::<_, i32>("billsec"),
                "price": row.get::<_, Option<Decimal>>("price"),
                "status": row.get::<_, String>("status"),
            })
        })
        .collect();
    Ok(Json(json!({ "cdrs": cdrs })))
}

// ---- Deposits ----

#[derive(Deserialize)]
struct DepositRequest {
    amount: Decimal,
    email: Option<String>,
}

async fn deposit_card(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<DepositRequest>,
) -> ApiResult<Json<deposits::CheckoutLink>> {
    let link =
        deposits::create_card_checkout(&state, user_id, req.amount, req.email.as_deref()).await?;
    Ok(Json(link))
}

async fn deposit_crypto(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<DepositRequest>,
) -> ApiResult<Json<deposits::CheckoutLink>> {
    let link = deposits::crypto::create_deposit_invoice(&state, user_id, req.amount).await?;
    Ok(Json(link))
}

async fn deposit_ach(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<DepositRequest>,
) -> ApiResult<Json<deposits::CheckoutLink>> {
    let email = req
        .email
        .ok_or_else(|| VoxwayError::Validation("Email is required for ACH".into()))?;
    let link = deposits::ach::create_deposit_invoice(&state, user_id, req.amount, &email).await?;
    Ok(Json(link))
}

// ---- SMTP settings / templates ----

async fn put_smtp_settings(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<users::SmtpSettingsInput>,
) -> ApiResult<Json<Value>> {
    users::upsert_smtp_settings(&state, user_id, req).await?;
    Ok(Json(json!({ "status": "saved" })))
}

#[derive(Deserialize)]
struct TemplateQuery {
    name: String,
    filename: String,
}

async fn upload_template(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<TemplateQuery>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let template_id =
        users::upload_doc_template(&state, user_id, &query.name, &query.filename, body.to_vec())
            .await?;
    Ok(Json(json!({ "template_id": template_id })))
}

// ---- Agents ----

async fn list_agents(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let agents = agents::list_agents(&state, user_id).await?;
    Ok(Json(json!({ "agents": agents })))
}

async fn create_agent(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(input): Json<AgentInput>,
) -> ApiResult<Json<crate::types::Agent>> {
    let agent = agents::create_agent(&state, user_id, input).await?;
    Ok(Json(agent))
}

async fn get_agent(
    State(state): State<AppState>,
    Path((user_id, agent_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<crate::types::Agent>> {
    Ok(Json(agents::get_agent(&state, user_id, agent_id).await?))
}

async fn update_agent(
    State(state): State<AppState>,
    Path((user_id, agent_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<AgentInput>,
) -> ApiResult<Json<crate::types::Agent>> {
    let agent = agents::update_agent(&state, user_id, agent_id, input).await?;
    Ok(Json(agent))
}

async fn delete_agent(
    State(state): State<AppState>,
    Path((user_id, agent_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Value>> {
    agents::delete_agent(&state, user_id, agent_id).await?;
    Ok(Json(json!({ "status": "deleted" })))
}

async fn upload_agent_audio(
    State(state): State<AppState>,
    Path((user_id, agent_id)): Path<(Uuid, Uuid)>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    projector::upload_background_audio(&state, user_id, agent_id, body.to_vec()).await?;
    Ok(Json(json!({ "status": "uploaded" })))
}

// ---- Numbers ----

#[derive(Deserialize)]
struct NumberSearchQuery {
    region: Option<String>,
    city: Option<String>,
}

async fn search_numbers(
    State(state): State<AppState>,
    Path(_user_id): Path<Uuid>,
    Query(query): Query<NumberSearchQuery>,
) -> ApiResult<Json<Value>> {
    let available = state
        .telephony
        .list_available_numbers(query.region.as_deref(), query.city.as_deref())
        .await?;
    let numbers: Vec<Value> = available
        .iter()
        .map(|n| json!({ "number": n.number, "region": n.region, "city": n.city }))
        .collect();
    Ok(Json(json!({ "numbers": numbers })))
}

async fn list_numbers(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let numbers = numbers::list_numbers(&state, user_id).await?;
    Ok(Json(json!({ "numbers": numbers })))
}

#[derive(Deserialize)]
struct PurchaseRequest {
    number: Option<String>,
}

async fn purchase_number(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<PurchaseRequest>,
) -> ApiResult<Json<crate::types::ExternalNumber>> {
    let number = numbers::purchase_number(&state, user_id, req.number.as_deref()).await?;
    Ok(Json(number))
}

async fn release_number(
    State(state): State<AppState>,
    Path((user_id, number_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Value>> {
    numbers::release_number(&state, user_id, number_id).await?;
    Ok(Json(json!({ "status": "released" })))
}

#[derive(Deserialize)]
struct AssignRequest {
    agent_id: Uuid,
}

async fn assign_number(
    State(state): State<AppState>,
    Path((user_id, number_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<AssignRequest>,
) -> ApiResult<Json<crate::types::ExternalNumber>> {
    let number = numbers::assign_agent(&state, user_id, number_id, req.agent_id).await?;
    Ok(Json(number))
}

async fn unassign_number(
    State(state): State<AppState>,
    Path((user_id, number_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Value>> {
    numbers::unassign_agent(&state, user_id, number_id).await?;
    Ok(Json(json!({ "status": "unassigned" })))
}

// ---- Dialer ----

async fn create_campaign(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(input): Json<dialer::CampaignInput>,
) -> ApiResult<Json<crate::types::Campaign>> {
    let campaign = dialer::create_campaign(&state, user_id, input).await?;
    Ok(Json(campaign))
}

async fn get_campaign(
    State(state): State<AppState>,
    Path((user_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<crate::types::Campaign>> {
    Ok(Json(dialer::get_campaign(&state, user_id, campaign_id).await?))
}

#[derive(Deserialize)]
struct CampaignStatusRequest {
    status: String,
}

async fn set_campaign_status(
    State(state): State<AppState>,
    Path((user_id, campaign_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<CampaignStatusRequest>,
) -> ApiResult<Json<crate::types::Campaign>> {
    let status = CampaignStatus::parse_str(&req.status)
        .ok_or_else(|| VoxwayError::Validation(format!("Unknown status: {}", req.status)))?;
    let campaign = dialer::set_campaign_status(&state, user_id, campaign_id, status).await?;
    Ok(Json(campaign))
}

async fn upload_leads(
    State(state): State<AppState>,
    Path((user_id, campaign_id)): Path<(Uuid, Uuid)>,
    body: Bytes,
) -> ApiResult<Json<dialer::IngestReport>> {
    let report = dialer::upload_leads(&state, user_id, campaign_id, &body).await?;
    Ok(Json(report))
}

async fn list_leads(
    State(state): State<AppState>,
    Path((user_id, campaign_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Value>> {
    let limit = query.limit.unwrap_or(200).clamp(1, 2000);
    let leads = dialer::list_leads(&state, user_id, campaign_id, limit).await?;
    Ok(Json(json!({ "leads": leads })))
}

async fn upload_campaign_audio(
    State(state): State<AppState>,
    Path((user_id, campaign_id)): Path<(Uuid, Uuid)>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    dialer::upload_campaign_audio(&state, user_id, campaign_id, body.to_vec()).await?;
    Ok(Json(json!({ "status": "uploaded" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_events_single() {
        let raw = json!({
            "type": "dialin.connected",
            "call_id": "c1",
            "call_domain": "d1",
        });
        let events = parse_events(raw);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "dialin.connected");
    }

    #[test]
    fn test_parse_events_batch() {
        let raw = json!({
            "events": [
                { "type": "dialin.connected", "call_id": "c1", "call_domain": "d1" },
                { "type": "dialin.stopped", "call_id": "c1", "call_domain": "d1" },
            ]
        });
        let events = parse_events(raw);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, "dialin.stopped");
    }

    #[test]
    fn test_parse_events_skips_malformed() {
        let raw = json!({ "events": [ { "no_type": true }, { "type": "dialin.warning" } ] });
        let events = parse_events(raw);
        assert_eq!(events.len(), 1);
    }
}
