//! Semantic annotation through an OpenAI-compatible chat completions API.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AnnotationOutput, AnnotationProvenance, AnnotationRequest, Annotator, StageKind};
use crate::error::StageError;
use crate::{http, sanitize};

pub const DEFAULT_LLM_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o";
pub const PROMPT_VERSION: &str = "v1.0";
pub const ANNOTATION_VERSION: &str = "v1.0";

/// Transcript characters kept in the prompt.
const MAX_TRANSCRIPT_CHARS: usize = 4000;

static RE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").unwrap());

const SYSTEM_PROMPT: &str = "You are an analyst of short-form social video and image ads. \
Reply with a single JSON object and nothing else.";

/// Escapes chat-template control sequences so user content cannot open a new turn.
fn sanitize_for_prompt(text: &str) -> String {
    text.replace("<|", "< |")
        .replace("|>", "| >")
        .replace("<s>", "< s >")
        .replace("</s>", "< / s >")
        .replace("[INST]", "[ INST ]")
        .replace("[/INST]", "[ / INST ]")
        .replace("<<SYS>>", "< < SYS > >")
        .replace("<</SYS>>", "< < / SYS > >")
}

fn build_prompt(request: &AnnotationRequest) -> String {
    let transcript: String = sanitize_for_prompt(&request.transcript)
        .chars()
        .take(MAX_TRANSCRIPT_CHARS)
        .collect();
    let transcript = if transcript.trim().is_empty() {
        "(no speech)".to_string()
    } else {
        transcript
    };

    let tags = |t: &[String]| {
        if t.is_empty() {
            "none".to_string()
        } else {
            t.iter()
                .map(|s| sanitize_for_prompt(s))
                .collect::<Vec<_>>()
                .join(", ")
        }
    };

    format!(
        r#"Annotate this creative for the "{niche}" niche.

Transcript:
"""
{transcript}
"""

Visual features:
- shots: {shots}
- faces detected: {faces}
- products detected: {products}
- on-screen text regions: {text_regions}
- scene tags: {scene}
- style tags: {style}

Return JSON with exactly these fields:
{{
  "hook_type": "question | statement | visual | trend | other",
  "hook_text": "the opening hook, verbatim when spoken",
  "hook_strength_score": 0.0-1.0,
  "cta_type": "link_bio | shop_now | follow | comment | none",
  "cta_clarity_score": 0.0-1.0,
  "sentiment_overall": "positive | neutral | negative",
  "pacing_style": "fast | medium | slow",
  "virality_score": 0.0-1.0
}}"#,
        niche = sanitize_for_prompt(&request.niche),
        transcript = transcript,
        shots = request.vision.num_shots,
        faces = request.vision.face_masks.len(),
        products = request.vision.product_masks.len(),
        text_regions = request.vision.text_regions.len(),
        scene = tags(&request.vision.scene_tags),
        style = tags(&request.vision.style_tags),
    )
}

/// Pulls the first balanced JSON object out of a model reply, tolerating
/// code fences and surrounding prose.
fn extract_json(response: &str) -> &str {
    let body = RE_FENCE
        .captures(response)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(response);

    let start = match body.find('{') {
        Some(idx) => idx,
        None => return body.trim(),
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in body[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return &body[start..start + i + 1];
                }
            }
            _ => {}
        }
    }

    &body[start..]
}

fn parse_annotation(reply: &str) -> Result<AnnotationOutput, StageError> {
    let json = extract_json(reply);
    let output: AnnotationOutput =
        serde_json::from_str(json).map_err(|e| StageError::MalformedOutput {
            stage: StageKind::Annotation,
            reason: format!(
                "{} in reply: {}",
                e,
                sanitize::truncate_body(json, http::MAX_ERROR_BODY_LENGTH)
            ),
        })?;
    output.validate()?;
    Ok(output)
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

pub struct LlmAnnotator {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
}

impl LlmAnnotator {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http::create_http_client(Some(timeout))?,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint)
    }
}

#[async_trait]
impl Annotator for LlmAnnotator {
    fn provenance(&self) -> AnnotationProvenance {
        AnnotationProvenance {
            model_name: self.model.clone(),
            prompt_version: PROMPT_VERSION.to_string(),
            annotation_version: ANNOTATION_VERSION.to_string(),
        }
    }

    async fn annotate(&self, request: &AnnotationRequest) -> Result<AnnotationOutput, StageError> {
        let inference = |reason: String| StageError::Inference {
            stage: StageKind::Annotation,
            reason,
        };

        let prompt = build_prompt(request);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        debug!("Requesting annotation from {}", self.model);

        let mut http_request = self.client.post(self.completions_url()).json(&body);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key.expose_secret());
        }

        let response = http_request
            .send()
            .await
            .map_err(|e| inference(e.to_string()))?;
        if !response.status().is_success() {
            return Err(inference(http::error_summary(response).await));
        }

        let chat: ChatResponse = response.json().await.map_err(|e| StageError::MalformedOutput {
            stage: StageKind::Annotation,
            reason: e.to_string(),
        })?;

        let reply = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if reply.trim().is_empty() {
            warn!("Model returned an empty annotation reply");
            return Err(StageError::MalformedOutput {
                stage: StageKind::Annotation,
                reason: "empty reply".to_string(),
            });
        }

        parse_annotation(&reply)
    }
}
