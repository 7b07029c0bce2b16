// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use axum::{body::Bytes, extract::State, Json};
use serde::Serialize;
use tracing::{error, info};

use crate::api::{ApiError, AppState};

pub const MISSING_QUESTION: &str = "Please provide a \"question\" field in the request body.";

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub question: String,
    pub answer: String,
}

/// Pull a non-blank `question` string out of a JSON body, as submitted.
fn extract_question(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let question = value.get("question")?.as_str()?;
    (!question.trim().is_empty()).then(|| question.to_string())
}

/// POST /ask - Answer a question from the knowledge graph and documents
///
/// The body is parsed by hand so that malformed JSON gets the same 400
/// message as a missing field.
pub async fn ask(State(state): State<AppState>, body: Bytes) -> Result<Json<AskResponse>, ApiError> {
    let question =
        extract_question(&body).ok_or_else(|| ApiError::BadRequest(MISSING_QUESTION.to_string()))?;
    info!(question_len = question.len(), "Received question");

    // The retriever trims; the response echoes the original text.
    let answer = tokio::time::timeout(state.request_timeout, state.retriever.answer(&question))
        .await
        .map_err(|_| {
            error!(timeout = ?state.request_timeout, "Answer timed out");
            ApiError::Internal(format!(
                "Request timed out after {}s",
                state.request_timeout.as_secs()
            ))
        })?
        .map_err(|e| {
            error!(error = %e, "Failed to answer question");
            ApiError::Internal(e.to_string())
        })?;

    Ok(Json(AskResponse { question, answer }))
}
