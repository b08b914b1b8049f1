// src/models/assistant.rs
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct Dermatologist {
    pub id: i32,
    pub name: String,
    pub email: Option<String>,
    pub specialization: String,
    pub phone_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NewDermatologist {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub specialization: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct ConversationSession {
    pub session_id: Uuid,
    pub user_id: Option<i32>,
    pub predicted_disease: Option<String>,
    pub confidence_score: Option<f64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct SkinDiseasePrediction {
    pub id: i32,
    pub session_id: Uuid,
    pub user_id: Option<i32>,
    pub image_path: String,
    pub symptoms: String,
    pub predicted_disease: String,
    pub confidence_score: f64,
    pub chatbot_response: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct ChatHistory {
    pub id: i32,
    pub session_id: Uuid,
    pub user_id: Option<i32>,
    pub user_message: String,
    pub chatbot_response: String,
    pub metadata: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Diagnosis block of the assistant response payload.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosisPayload {
    pub condition: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction_id: Option<i32>,
}

/// Chat block of the assistant response payload.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponsePayload {
    pub id: i32,
    pub user_message: String,
    pub chatbot_response: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Combined payload returned by POST /api/medical-assistant.
///
/// `status` is "success" for normal turns and "low_confidence" when the
/// classifier score fell below the persistence threshold; in the latter case
/// `message` carries guidance text and no prediction row exists.
#[derive(Debug, Serialize)]
pub struct AssistantResponse {
    pub session_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub diagnosis: Option<DiagnosisPayload>,
    pub chat_response: Option<ChatResponsePayload>,
    pub suggested_actions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AssistantErrorResponse {
    pub error: String,
    pub suggested_actions: Vec<String>,
}
