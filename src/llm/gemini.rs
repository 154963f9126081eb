//! Wire types for the remote turn-alternating backend (Gemini `generateContent`).
//!
//! The request side is strict: roles are `user` and `model` only, and turns
//! must alternate. The response side is loose: depending on the endpoint the
//! body is either one response object or an array of them, and any field may
//! be missing. [`GeminiBody`] resolves that once, at deserialization.

use serde::{Deserialize, Serialize};

/// Roles understood by the remote backend. There is no system role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Part {
    pub text: String,
}

/// One turn of the outbound conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Content {
    pub role: TurnRole,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part { text: text.into() }],
        }
    }
}

/// The outbound payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
}

/// One response object. Every level is optional; blocked or empty
/// candidates simply contribute no text.
#[derive(Debug, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResponsePart {
    #[serde(default)]
    pub text: Option<String>,
}

impl GenerateContentResponse {
    fn texts(&self) -> impl Iterator<Item = &str> {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
    }
}

/// The two body shapes the remote backend may answer with.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum GeminiBody {
    Batch(Vec<GenerateContentResponse>),
    Single(GenerateContentResponse),
}

impl GeminiBody {
    /// Concatenates every text fragment of every candidate, in order.
    pub fn text(&self) -> String {
        match self {
            Self::Single(one) => one.texts().collect(),
            Self::Batch(many) => many.iter().flat_map(|r| r.texts()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_native_shape() {
        let req = GenerateContentRequest {
            contents: vec![Content::text(TurnRole::Model, "ok")],
        };
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"contents":[{"role":"model","parts":[{"text":"ok"}]}]}"#
        );
    }

    #[test]
    fn single_object_body() {
        let body: GeminiBody = serde_json::from_str(
            concat!(
                r#"{"candidates":[{"content":{"role":"model","#,
                r#""parts":[{"text":"Hel"},{"text":"lo"}]}}]}"#,
            ),
        )
        .unwrap();
        assert!(matches!(body, GeminiBody::Single(_)));
        assert_eq!(body.text(), "Hello");
    }

    #[test]
    fn array_body_concatenates_across_responses() {
        let body: GeminiBody = serde_json::from_str(
            r#"[
                {"candidates":[{"content":{"parts":[{"text":"The "}]}}]},
                {"candidates":[{"content":{"parts":[{"text":"answer"}]}}]},
                {"candidates":[{"finishReason":"STOP"}],"usageMetadata":{"totalTokenCount":9}}
            ]"#,
        )
        .unwrap();
        assert!(matches!(body, GeminiBody::Batch(_)));
        assert_eq!(body.text(), "The answer");
    }

    #[test]
    fn all_candidates_contribute() {
        let body: GeminiBody = serde_json::from_str(
            concat!(
                r#"{"candidates":[{"content":{"parts":[{"text":"a"}]}},"#,
                r#"{"content":{"parts":[{"text":"b"}]}}]}"#,
            ),
        )
        .unwrap();
        assert_eq!(body.text(), "ab");
    }

    #[test]
    fn missing_fields_yield_empty_text() {
        let body: GeminiBody = serde_json::from_str(r#"{"promptFeedback":{}}"#).unwrap();
        assert_eq!(body.text(), "");
    }

    #[test]
    fn scalar_body_is_rejected() {
        assert!(serde_json::from_str::<GeminiBody>(r#""nope""#).is_err());
    }
}
