// src/handlers/assistant.rs
//
// The session & routing orchestrator behind POST /api/medical-assistant.
// One request may carry an image, a text message, or both; the handler
// resolves the conversation session, runs the image branch (classification,
// analysis, prediction persistence) and/or the text branch (scope filter,
// intent routing, retrieval or directory lookup or general chat, chat
// persistence), and assembles the combined payload. Adapters are invoked
// sequentially; a failed call surfaces immediately, no retries.

use crate::chat_client::{cited_answer_prompt, diagnosis_prompt, ChatModelClient};
use crate::classifier_client::Prediction;
use crate::errors::{AdapterError, AssistantError};
use crate::models::assistant::*;
use crate::routing::{
    determine_intent, extract_specialization, followup_actions, is_healthcare_question, Intent,
    REFUSAL_MESSAGE,
};
use crate::search_client::RetrievedDocument;
use crate::AppState;
use axum::{
    extract::{Extension, FromRequest, Multipart, Path, Request},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Classifier scores below this percentage are never persisted; the caller
/// is asked for a better image instead.
pub const CONFIDENCE_THRESHOLD: f64 = 65.0;

const IMAGE_DIR: &str = "uploads/skin_images";

pub fn assistant_routes() -> Router {
    Router::new()
        .route("/api/medical-assistant", post(medical_assistant))
        .route("/api/chat/history/:session_id", get(get_chat_history))
}

// ---------------------------------------------------------------------------
// Request parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct AssistantJsonPayload {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Default)]
struct AssistantInput {
    message: String,
    user_id: Option<String>,
    session_id: Option<String>,
    image: Option<Vec<u8>>,
}

/// Accepts either JSON or multipart form data (the latter carries the image
/// part). Unknown parts are ignored.
async fn parse_assistant_request(request: Request) -> Result<AssistantInput, Response> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false);

    if is_multipart {
        let mut multipart = Multipart::from_request(request, &()).await.map_err(|e| {
            tracing::warn!("Failed to read multipart body: {}", e);
            bad_request_payload("Malformed multipart body")
        })?;

        let mut input = AssistantInput::default();
        while let Some(field) = multipart.next_field().await.map_err(|e| {
            tracing::warn!("Failed to parse multipart field: {}", e);
            bad_request_payload("Malformed multipart body")
        })? {
            match field.name() {
                Some("message") => {
                    input.message = field.text().await.unwrap_or_default();
                }
                Some("user_id") => {
                    input.user_id = field.text().await.ok();
                }
                Some("session_id") => {
                    input.session_id = field.text().await.ok();
                }
                Some("image") => {
                    let bytes = field.bytes().await.map_err(|e| {
                        tracing::warn!("Failed to read image field: {}", e);
                        bad_request_payload("Could not read image attachment")
                    })?;
                    if !bytes.is_empty() {
                        input.image = Some(bytes.to_vec());
                    }
                }
                _ => {}
            }
        }
        Ok(input)
    } else {
        let Json(payload) = Json::<AssistantJsonPayload>::from_request(request, &())
            .await
            .map_err(|e| {
                tracing::warn!("Failed to parse assistant request body: {}", e);
                bad_request_payload("Malformed request body")
            })?;
        Ok(AssistantInput {
            message: payload.message.unwrap_or_default(),
            user_id: payload.user_id,
            session_id: payload.session_id,
            image: None,
        })
    }
}

fn bad_request_payload(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(AssistantErrorResponse {
            error: message.to_string(),
            suggested_actions: vec![],
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Session resolution
// ---------------------------------------------------------------------------

/// Anonymous callers carry an `anon_` placeholder and are never linked to a
/// user row.
fn is_anonymous(user_id: &str) -> bool {
    user_id.starts_with("anon_")
}

fn anonymous_user_id() -> String {
    format!("anon_{}", &Uuid::new_v4().to_string()[..8])
}

/// A malformed session token is recovered locally by generating a fresh one.
fn resolve_session_token(supplied: Option<&str>) -> Uuid {
    match supplied {
        Some(raw) => Uuid::parse_str(raw).unwrap_or_else(|_| {
            tracing::debug!("Malformed session token '{}', generating a new one", raw);
            Uuid::new_v4()
        }),
        None => Uuid::new_v4(),
    }
}

/// Fetch-or-create keyed by session token; idempotent for a valid token.
async fn get_or_create_session(
    state: &AppState,
    session_token: Uuid,
    user_db_id: Option<i32>,
) -> Result<ConversationSession, sqlx::Error> {
    if let Some(session) = sqlx::query_as::<_, ConversationSession>(
        "SELECT session_id, user_id, predicted_disease, confidence_score, created_at
         FROM conversation_sessions WHERE session_id = $1",
    )
    .bind(session_token)
    .fetch_optional(&state.db_pool)
    .await?
    {
        return Ok(session);
    }

    let session = sqlx::query_as::<_, ConversationSession>(
        "INSERT INTO conversation_sessions (session_id, user_id)
         VALUES ($1, $2)
         ON CONFLICT (session_id) DO UPDATE SET session_id = EXCLUDED.session_id
         RETURNING session_id, user_id, predicted_disease, confidence_score, created_at",
    )
    .bind(session_token)
    .bind(user_db_id)
    .fetch_one(&state.db_pool)
    .await?;

    tracing::info!("Created conversation session {}", session.session_id);
    Ok(session)
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

enum ImageOutcome {
    LowConfidence { condition: String, confidence: f64 },
    Diagnosed { diagnosis: DiagnosisPayload, condition: String },
}

struct TextOutcome {
    text: String,
    sources: Option<Vec<RetrievedDocument>>,
    suggested_actions: Vec<String>,
}

async fn medical_assistant(
    Extension(state): Extension<Arc<AppState>>,
    request: Request,
) -> Response {
    let input = match parse_assistant_request(request).await {
        Ok(input) => input,
        Err(response) => return response,
    };

    let user_ref = input
        .user_id
        .clone()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(anonymous_user_id);
    let user_db_id = if is_anonymous(&user_ref) {
        None
    } else {
        user_ref.parse::<i32>().ok()
    };

    let session_token = resolve_session_token(input.session_id.as_deref());
    let session = match get_or_create_session(&state, session_token, user_db_id).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("Failed to resolve session: {}", e);
            return server_error();
        }
    };
    let session_id = session.session_id.to_string();

    let mut response = AssistantResponse {
        session_id: session_id.clone(),
        status: "success".to_string(),
        message: None,
        diagnosis: None,
        chat_response: None,
        suggested_actions: vec![],
    };

    // Image branch. A low-confidence classification short-circuits the whole
    // request without persisting anything; a confident one folds a
    // synthesized followup message into the text branch.
    let mut message = input.message.clone();
    let mut is_followup = false;

    if let Some(ref image_bytes) = input.image {
        match process_image(&state, &session, user_db_id, &message, image_bytes).await {
            Ok(ImageOutcome::LowConfidence { condition, confidence }) => {
                response.status = "low_confidence".to_string();
                response.diagnosis = Some(DiagnosisPayload {
                    condition: condition.clone(),
                    confidence,
                    analysis: None,
                    prediction_id: None,
                });
                response.message = Some(low_confidence_message(&condition, confidence));
                response.suggested_actions = vec![
                    "upload_new_image".to_string(),
                    "find_specialist".to_string(),
                ];
                return (StatusCode::OK, Json(response)).into_response();
            }
            Ok(ImageOutcome::Diagnosed { diagnosis, condition }) => {
                response.diagnosis = Some(diagnosis);
                response.suggested_actions = vec![
                    "explain_diagnosis".to_string(),
                    "treatment_options".to_string(),
                ];
                message = format!("I was diagnosed with {}. {}", condition, message);
                is_followup = true;
            }
            Err(e) => {
                tracing::warn!("Image branch failed: {}", e);
                return (
                    StatusCode::BAD_REQUEST,
                    Json(AssistantErrorResponse {
                        error: e.to_string(),
                        suggested_actions: vec![
                            "retry_upload".to_string(),
                            "contact_support".to_string(),
                        ],
                    }),
                )
                    .into_response();
            }
        }
    }

    // Text branch runs when there is a message or when no image was supplied.
    if !message.is_empty() || input.image.is_none() {
        let effective_message = if message.is_empty() {
            "Explain this diagnosis".to_string()
        } else {
            message
        };

        match process_text(
            &state,
            &session,
            user_db_id,
            &effective_message,
            &input.message,
            is_followup,
        )
        .await
        {
            Ok((chat, actions)) => {
                response.chat_response = Some(chat);
                if !actions.is_empty() {
                    response.suggested_actions = actions;
                }
            }
            Err(e) => {
                tracing::warn!("Text branch failed: {}", e);
                return (
                    StatusCode::BAD_REQUEST,
                    Json(AssistantErrorResponse {
                        error: text_branch_error(&e),
                        suggested_actions: vec![],
                    }),
                )
                    .into_response();
            }
        }
    }

    (StatusCode::OK, Json(response)).into_response()
}

/// Any failure inside the text branch, chat persistence included, surfaces
/// as a 400 "Chat processing failed" message. 500 stays reserved for session
/// resolution.
fn text_branch_error(e: &AssistantError) -> String {
    match e {
        AssistantError::TextBranch(_) => e.to_string(),
        other => format!("Chat processing failed: {}", other),
    }
}

fn server_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(AssistantErrorResponse {
            error: "Server error".to_string(),
            suggested_actions: vec![],
        }),
    )
        .into_response()
}

fn low_confidence_message(condition: &str, confidence: f64) -> String {
    format!(
        "Possible {} detected ({:.1}% confidence). For better accuracy:\n\
         1. Upload a clearer, closer photo\n\
         2. Ensure good lighting\n\
         3. Consult a dermatologist",
        condition, confidence
    )
}

// ---------------------------------------------------------------------------
// Image branch
// ---------------------------------------------------------------------------

async fn process_image(
    state: &AppState,
    session: &ConversationSession,
    user_db_id: Option<i32>,
    symptoms: &str,
    image_bytes: &[u8],
) -> Result<ImageOutcome, AssistantError> {
    let classifier = state
        .classifier_client
        .as_ref()
        .ok_or(AssistantError::ImageBranch(AdapterError::NotConfigured))?;

    let prediction = classifier
        .predict(image_bytes)
        .await
        .map_err(AssistantError::ImageBranch)?;

    handle_prediction(state, session, user_db_id, symptoms, image_bytes, prediction).await
}

/// Applies the confidence threshold to a classification result: below it,
/// nothing is written; at or above it, the analysis is generated and the
/// prediction committed together with the session's diagnosis fields.
async fn handle_prediction(
    state: &AppState,
    session: &ConversationSession,
    user_db_id: Option<i32>,
    symptoms: &str,
    image_bytes: &[u8],
    prediction: Prediction,
) -> Result<ImageOutcome, AssistantError> {
    if prediction.confidence < CONFIDENCE_THRESHOLD {
        // Below-threshold attempts are deliberately not persisted.
        tracing::info!(
            "Low-confidence classification for session {}: {} ({:.1}%)",
            session.session_id,
            prediction.label,
            prediction.confidence
        );
        return Ok(ImageOutcome::LowConfidence {
            condition: prediction.label,
            confidence: prediction.confidence,
        });
    }

    let chat_client = state
        .chat_client
        .as_ref()
        .ok_or(AssistantError::ImageBranch(AdapterError::NotConfigured))?;

    hydrate_session_memory(state, chat_client, session).await?;

    let analysis = chat_client
        .generate(
            &diagnosis_prompt(&prediction.label, prediction.confidence, symptoms),
            &session.session_id.to_string(),
            &state.session_memory,
        )
        .await
        .map_err(AssistantError::ImageBranch)?;

    let image_path = store_image(image_bytes).await?;

    // Prediction insert and the session's denormalized diagnosis fields are
    // committed together.
    let mut tx = state.db_pool.begin().await?;

    let row: (i32,) = sqlx::query_as(
        "INSERT INTO skin_disease_predictions
            (session_id, user_id, image_path, symptoms, predicted_disease, confidence_score, chatbot_response)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING id",
    )
    .bind(session.session_id)
    .bind(user_db_id)
    .bind(&image_path)
    .bind(symptoms)
    .bind(&prediction.label)
    .bind(prediction.confidence)
    .bind(&analysis)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE conversation_sessions SET predicted_disease = $1, confidence_score = $2
         WHERE session_id = $3",
    )
    .bind(&prediction.label)
    .bind(prediction.confidence)
    .bind(session.session_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        "Persisted prediction {} for session {}: {} ({:.1}%)",
        row.0,
        session.session_id,
        prediction.label,
        prediction.confidence
    );

    Ok(ImageOutcome::Diagnosed {
        condition: prediction.label.clone(),
        diagnosis: DiagnosisPayload {
            condition: prediction.label,
            confidence: prediction.confidence,
            analysis: Some(analysis),
            prediction_id: Some(row.0),
        },
    })
}

async fn store_image(image_bytes: &[u8]) -> Result<String, AssistantError> {
    tokio::fs::create_dir_all(IMAGE_DIR).await?;
    let path = format!("{}/{}.png", IMAGE_DIR, Uuid::new_v4());
    tokio::fs::write(&path, image_bytes).await?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Text branch
// ---------------------------------------------------------------------------

/// Rebuilds session memory from persisted chat rows when the in-process
/// entry is missing (restart or eviction). Runs before every generation
/// call, whichever branch it comes from.
async fn hydrate_session_memory(
    state: &AppState,
    chat_client: &ChatModelClient,
    session: &ConversationSession,
) -> Result<(), sqlx::Error> {
    let session_key = session.session_id.to_string();
    if state.session_memory.history(&session_key).await.is_some() {
        return Ok(());
    }

    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT user_message, chatbot_response FROM chat_history
         WHERE session_id = $1 ORDER BY created_at DESC LIMIT 20",
    )
    .bind(session.session_id)
    .fetch_all(&state.db_pool)
    .await?
    .into_iter()
    .rev()
    .collect();

    chat_client
        .rehydrate_memory(&session_key, rows, &state.session_memory)
        .await;
    Ok(())
}

/// Routes the effective message and persists the turn. The stored row keeps
/// `raw_message`, the text the caller actually sent.
async fn process_text(
    state: &AppState,
    session: &ConversationSession,
    user_db_id: Option<i32>,
    message: &str,
    raw_message: &str,
    is_followup: bool,
) -> Result<(ChatResponsePayload, Vec<String>), AssistantError> {
    let outcome = route_text(state, session, message, is_followup).await?;

    let metadata = serde_json::json!({
        "sources": outcome.sources,
        "suggested_actions": outcome.suggested_actions,
    });

    let row: (i32, chrono::DateTime<chrono::Utc>) = sqlx::query_as(
        "INSERT INTO chat_history (session_id, user_id, user_message, chatbot_response, metadata)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id, created_at",
    )
    .bind(session.session_id)
    .bind(user_db_id)
    .bind(raw_message)
    .bind(&outcome.text)
    .bind(&metadata)
    .fetch_one(&state.db_pool)
    .await?;

    Ok((
        ChatResponsePayload {
            id: row.0,
            user_message: raw_message.to_string(),
            chatbot_response: outcome.text,
            created_at: row.1,
        },
        outcome.suggested_actions,
    ))
}

async fn route_text(
    state: &AppState,
    session: &ConversationSession,
    message: &str,
    is_followup: bool,
) -> Result<TextOutcome, AssistantError> {
    if !is_healthcare_question(message) {
        return Ok(TextOutcome {
            text: REFUSAL_MESSAGE.to_string(),
            sources: None,
            suggested_actions: vec![],
        });
    }

    let mut intent = determine_intent(message, is_followup);

    if intent == Intent::MedicalSearch {
        match medical_search(state, session, message).await? {
            Some(outcome) => return Ok(outcome),
            // No retrieval results: fall through to general chat.
            None => intent = Intent::GeneralChat,
        }
    }

    if intent == Intent::DermatologistQuery {
        return dermatologist_query(state, message).await;
    }

    general_chat(state, session, message).await
}

async fn medical_search(
    state: &AppState,
    session: &ConversationSession,
    message: &str,
) -> Result<Option<TextOutcome>, AssistantError> {
    let Some(ref search_client) = state.search_client else {
        tracing::warn!("Search service not configured, falling back to general chat");
        return Ok(None);
    };

    let results = search_client
        .search(message, 5)
        .await
        .map_err(AssistantError::TextBranch)?;

    if results.is_empty() {
        return Ok(None);
    }

    let chat_client = state
        .chat_client
        .as_ref()
        .ok_or(AssistantError::TextBranch(AdapterError::NotConfigured))?;

    hydrate_session_memory(state, chat_client, session).await?;

    let context = results
        .iter()
        .map(|doc| format!("[{}] {}", doc.source, doc.content))
        .collect::<Vec<_>>()
        .join("\n");

    let text = chat_client
        .generate(
            &cited_answer_prompt(message, &context),
            &session.session_id.to_string(),
            &state.session_memory,
        )
        .await
        .map_err(AssistantError::TextBranch)?;

    Ok(Some(TextOutcome {
        text,
        sources: Some(results.into_iter().take(3).collect()),
        suggested_actions: vec![
            "more_details".to_string(),
            "dermatologist_referral".to_string(),
        ],
    }))
}

async fn dermatologist_query(
    state: &AppState,
    message: &str,
) -> Result<TextOutcome, AssistantError> {
    let rows = match extract_specialization(message) {
        Some(condition) => {
            let pattern = format!("%{}%", condition);
            sqlx::query_as::<_, Dermatologist>(
                "SELECT id, name, email, specialization, phone_number FROM dermatologists
                 WHERE (specialization ILIKE '%dermatology%' OR name ILIKE '%dermatology%')
                   AND (specialization ILIKE $1 OR name ILIKE $1)
                 ORDER BY name LIMIT 5",
            )
            .bind(&pattern)
            .fetch_all(&state.db_pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, Dermatologist>(
                "SELECT id, name, email, specialization, phone_number FROM dermatologists
                 WHERE specialization ILIKE '%dermatology%' OR name ILIKE '%dermatology%'
                 ORDER BY name LIMIT 5",
            )
            .fetch_all(&state.db_pool)
            .await?
        }
    };

    if rows.is_empty() {
        return Ok(TextOutcome {
            text: "I couldn't find dermatologists matching your criteria. \
                   Would you like to expand your search?"
                .to_string(),
            sources: None,
            suggested_actions: vec!["broaden_search".to_string()],
        });
    }

    Ok(TextOutcome {
        text: format!(
            "I found these dermatologists matching your query:\n{}",
            format_dermatologists(&rows)
        ),
        sources: None,
        suggested_actions: vec!["book_appointment".to_string(), "more_options".to_string()],
    })
}

fn format_dermatologists(rows: &[Dermatologist]) -> String {
    rows.iter()
        .map(|d| {
            let mut line = format!("- {} ({})", d.name, d.specialization);
            if let Some(ref phone) = d.phone_number {
                line.push_str(&format!(", {}", phone));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

async fn general_chat(
    state: &AppState,
    session: &ConversationSession,
    message: &str,
) -> Result<TextOutcome, AssistantError> {
    let chat_client = state
        .chat_client
        .as_ref()
        .ok_or(AssistantError::TextBranch(AdapterError::NotConfigured))?;

    hydrate_session_memory(state, chat_client, session).await?;

    let text = chat_client
        .generate(message, &session.session_id.to_string(), &state.session_memory)
        .await
        .map_err(AssistantError::TextBranch)?;

    Ok(TextOutcome {
        text,
        sources: None,
        suggested_actions: followup_actions(message),
    })
}

// ---------------------------------------------------------------------------
// Chat history
// ---------------------------------------------------------------------------

async fn get_chat_history(
    Path(session_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let session_token = Uuid::parse_str(&session_id).map_err(|_| StatusCode::BAD_REQUEST)?;

    let rows = sqlx::query_as::<_, ChatHistory>(
        "SELECT id, session_id, user_id, user_message, chatbot_response, metadata, created_at
         FROM chat_history WHERE session_id = $1 ORDER BY created_at ASC LIMIT 200",
    )
    .bind(session_token)
    .fetch_all(&state.db_pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to fetch chat history for {}: {}", session_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let predictions = sqlx::query_as::<_, SkinDiseasePrediction>(
        "SELECT id, session_id, user_id, image_path, symptoms, predicted_disease,
                confidence_score, chatbot_response, created_at
         FROM skin_disease_predictions WHERE session_id = $1 ORDER BY created_at ASC",
    )
    .bind(session_token)
    .fetch_all(&state.db_pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to fetch predictions for {}: {}", session_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(serde_json::json!({
        "success": true,
        "session_id": session_id,
        "history": rows,
        "predictions": predictions,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_placeholder_is_detected() {
        assert!(is_anonymous("anon_1a2b3c4d"));
        assert!(!is_anonymous("42"));
        assert!(!is_anonymous("anonymous"));
    }

    #[test]
    fn generated_anonymous_ids_carry_the_prefix() {
        let id = anonymous_user_id();
        assert!(id.starts_with("anon_"));
        assert_eq!(id.len(), "anon_".len() + 8);
    }

    #[test]
    fn valid_session_tokens_are_reused() {
        let token = Uuid::new_v4();
        assert_eq!(resolve_session_token(Some(&token.to_string())), token);
    }

    #[test]
    fn malformed_session_tokens_are_regenerated() {
        let resolved = resolve_session_token(Some("not-a-uuid"));
        assert_ne!(resolved.to_string(), "not-a-uuid");
        // And missing tokens get a fresh one too.
        let a = resolve_session_token(None);
        let b = resolve_session_token(None);
        assert_ne!(a, b);
    }

    #[test]
    fn low_confidence_message_contains_guidance() {
        let msg = low_confidence_message("eczema", 52.34);
        assert!(msg.starts_with("Possible eczema detected (52.3% confidence)."));
        assert!(msg.contains("Upload a clearer, closer photo"));
        assert!(msg.contains("Consult a dermatologist"));
    }

    #[test]
    fn threshold_is_strictly_below_sixty_five() {
        assert!(64.999 < CONFIDENCE_THRESHOLD);
        assert!(!(65.0 < CONFIDENCE_THRESHOLD));
    }

    #[test]
    fn dermatologist_listing_is_one_line_per_row() {
        let rows = vec![
            Dermatologist {
                id: 1,
                name: "Dr. Ada Okoro".to_string(),
                email: None,
                specialization: "Dermatology - Acne".to_string(),
                phone_number: Some("0700000000".to_string()),
            },
            Dermatologist {
                id: 2,
                name: "Dr. Sam Lee".to_string(),
                email: None,
                specialization: "General Dermatology".to_string(),
                phone_number: None,
            },
        ];
        let listing = format_dermatologists(&rows);
        assert_eq!(
            listing,
            "- Dr. Ada Okoro (Dermatology - Acne), 0700000000\n- Dr. Sam Lee (General Dermatology)"
        );
    }

    #[test]
    fn database_failures_in_the_text_branch_read_as_chat_errors() {
        let db_err = AssistantError::Database(sqlx::Error::RowNotFound);
        assert!(text_branch_error(&db_err).starts_with("Chat processing failed:"));

        let adapter_err = AssistantError::TextBranch(AdapterError::NotConfigured);
        assert_eq!(
            text_branch_error(&adapter_err),
            "Chat processing failed: service is not configured"
        );
    }

    // Database-backed tests below run against a per-test database provisioned
    // by sqlx with the crate's migrations applied.

    use sqlx::PgPool;

    fn test_state(pool: PgPool) -> AppState {
        AppState {
            db_pool: pool,
            classifier_client: None,
            search_client: None,
            chat_client: None,
            session_memory: crate::memory::SessionMemory::default(),
        }
    }

    #[sqlx::test]
    async fn repeated_session_token_resolves_the_same_row(pool: PgPool) {
        let state = test_state(pool);
        let token = Uuid::new_v4();

        let first = get_or_create_session(&state, token, None).await.unwrap();
        let second = get_or_create_session(&state, token, None).await.unwrap();
        assert_eq!(first.session_id, second.session_id);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversation_sessions")
            .fetch_one(&state.db_pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[sqlx::test]
    async fn low_confidence_prediction_creates_no_rows(pool: PgPool) {
        let state = test_state(pool);
        let session = get_or_create_session(&state, Uuid::new_v4(), None)
            .await
            .unwrap();

        let prediction = Prediction {
            label: "acne".to_string(),
            confidence: 40.0,
        };
        let outcome =
            handle_prediction(&state, &session, None, "itchy forehead", b"unused", prediction)
                .await
                .unwrap();
        assert!(matches!(outcome, ImageOutcome::LowConfidence { .. }));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM skin_disease_predictions")
            .fetch_one(&state.db_pool)
            .await
            .unwrap();
        assert_eq!(count, 0);

        // The session's denormalized diagnosis fields stay untouched too.
        let refreshed = get_or_create_session(&state, session.session_id, None)
            .await
            .unwrap();
        assert!(refreshed.predicted_disease.is_none());
        assert!(refreshed.confidence_score.is_none());
    }

    #[sqlx::test]
    async fn text_turn_persists_exactly_one_chat_row(pool: PgPool) {
        let state = test_state(pool);
        let session = get_or_create_session(&state, Uuid::new_v4(), None)
            .await
            .unwrap();

        sqlx::query("INSERT INTO dermatologists (name, specialization) VALUES ($1, $2)")
            .bind("Dr. Ada Okoro")
            .bind("General Dermatology")
            .execute(&state.db_pool)
            .await
            .unwrap();

        let message = "can you recommend a dermatologist";
        let (chat, actions) = process_text(&state, &session, None, message, message, false)
            .await
            .unwrap();
        assert!(chat.chatbot_response.contains("Dr. Ada Okoro"));
        assert_eq!(actions, vec!["book_appointment", "more_options"]);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_history")
            .fetch_one(&state.db_pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        // A second turn adds exactly one more row.
        process_text(&state, &session, None, message, message, false)
            .await
            .unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_history")
            .fetch_one(&state.db_pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[sqlx::test]
    async fn chat_row_keeps_the_callers_original_message(pool: PgPool) {
        let state = test_state(pool);
        let session = get_or_create_session(&state, Uuid::new_v4(), None)
            .await
            .unwrap();

        // Routing sees the effective text; the stored row keeps what the
        // caller sent, empty included.
        let (chat, _) = process_text(&state, &session, None, "recommend a doctor", "", false)
            .await
            .unwrap();
        assert_eq!(chat.user_message, "");

        let stored: String =
            sqlx::query_scalar("SELECT user_message FROM chat_history WHERE id = $1")
                .bind(chat.id)
                .fetch_one(&state.db_pool)
                .await
                .unwrap();
        assert_eq!(stored, "");
    }

    #[sqlx::test]
    async fn cold_memory_is_rehydrated_from_chat_rows(pool: PgPool) {
        let state = test_state(pool);
        let session = get_or_create_session(&state, Uuid::new_v4(), None)
            .await
            .unwrap();

        sqlx::query(
            "INSERT INTO chat_history (session_id, user_message, chatbot_response, metadata)
             VALUES ($1, $2, $3, '{}')",
        )
        .bind(session.session_id)
        .bind("what is acne")
        .bind("a skin condition")
        .execute(&state.db_pool)
        .await
        .unwrap();

        // The endpoint is never contacted: rehydration only touches the
        // database and the in-process store.
        let chat_client =
            ChatModelClient::new("http://localhost:1".to_string(), "test-key".to_string());
        hydrate_session_memory(&state, &chat_client, &session)
            .await
            .unwrap();

        let turns = state
            .session_memory
            .history(&session.session_id.to_string())
            .await
            .expect("memory hydrated");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "what is acne");
        assert_eq!(turns[1].content, "a skin condition");
    }
}
