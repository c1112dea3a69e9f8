//! Gemini provider over the `generateContent` REST endpoint.

use std::path::Path;
use std::time::Duration;

use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn};

use super::{AiError, AiProvider, GeneratedImage};
use crate::adapt::format::mime_type_for;
use crate::adapt::metadata::{DetectedObject, FaceBox};
use crate::config::AiConfig;
use crate::sanitize::{redact_path, truncate_prompt};

/// Upper bound on error bodies copied into errors and logs.
const MAX_ERROR_BODY_LENGTH: usize = 200;

const FACE_PROMPT: &str = r#"Look at this image and identify any human faces. For each face you find:
1. Estimate the bounding box as percentages of image dimensions (0-100)
2. Estimate confidence level (0.0 to 1.0)

Return ONLY a JSON response in this exact format:
{"faces": [{"x": 25, "y": 30, "width": 20, "height": 25, "confidence": 0.95}]}

If no faces are found, return: {"faces": []}"#;

const OBJECT_PROMPT: &str = r#"Analyze this image and identify the main physical objects or products, ignoring any text overlays or backgrounds.
For each significant object:
1. Provide a descriptive label
2. Estimate bounding box as percentages (0-100)
3. Estimate confidence (0.0 to 1.0)

Return ONLY a JSON response in this exact format:
{"objects": [{"label": "product_name", "confidence": 0.95, "x": 45, "y": 55, "width": 15, "height": 30}]}

If no clear objects are visible, return: {"objects": []}"#;

const NSFW_PROMPT: &str = "Analyze this image for NSFW or inappropriate content. Respond with only 'YES' if NSFW/inappropriate or 'NO' if safe. Do not include any other text.";

pub struct GeminiProvider {
    client: reqwest::blocking::Client,
    api_key: SecretString,
    base_url: String,
    analysis_model: String,
    editor_model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    Inline { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseModalities")]
    response_modalities: Vec<&'static str>,
}

#[derive(Debug, Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<ResponseInlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize, Default)]
struct FacesEnvelope {
    #[serde(default)]
    faces: Vec<FaceBox>,
}

#[derive(Debug, Deserialize, Default)]
struct ObjectsEnvelope {
    #[serde(default)]
    objects: Vec<DetectedObject>,
}

impl GeminiProvider {
    pub fn new(api_key: SecretString, config: &AiConfig) -> Result<Self, AiError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            analysis_model: config.analysis_model.clone(),
            editor_model: config.editor_model.clone(),
        })
    }

    fn generate(
        &self,
        model: &str,
        prompt: &str,
        image: &Path,
        want_image: bool,
    ) -> Result<GenerateResponse, AiError> {
        let bytes = std::fs::read(image).map_err(|e| AiError::ReadImage {
            path: image.to_path_buf(),
            source: e,
        })?;

        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text { text: prompt },
                    Part::Inline {
                        inline_data: InlineData {
                            mime_type: mime_type_for(image),
                            data: base64::engine::general_purpose::STANDARD.encode(&bytes),
                        },
                    },
                ],
            }],
            generation_config: want_image.then(|| GenerationConfig {
                response_modalities: vec!["TEXT", "IMAGE"],
            }),
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        debug!("POST {} for {}", url, redact_path(image));

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AiError::Api {
                status: status.as_u16(),
                body: truncate_prompt(&body, MAX_ERROR_BODY_LENGTH),
            });
        }

        Ok(response.json::<GenerateResponse>()?)
    }

    fn generate_image(&self, prompt: &str, image: &Path) -> Result<GeneratedImage, AiError> {
        let response = self.generate(&self.editor_model, prompt, image, true)?;
        first_image(&response)
    }
}

impl AiProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn detect_faces(&self, image: &Path) -> Result<Vec<FaceBox>, AiError> {
        let _span = info_span!("detect_faces", file = %redact_path(image)).entered();
        let response = self.generate(&self.analysis_model, FACE_PROMPT, image, false)?;
        let envelope: FacesEnvelope = parse_json_reply(&first_text(&response))?;
        Ok(envelope.faces)
    }

    fn detect_objects(&self, image: &Path) -> Result<Vec<DetectedObject>, AiError> {
        let _span = info_span!("detect_objects", file = %redact_path(image)).entered();
        let response = self.generate(&self.analysis_model, OBJECT_PROMPT, image, false)?;
        let envelope: ObjectsEnvelope = parse_json_reply(&first_text(&response))?;
        Ok(envelope.objects)
    }

    fn detect_nsfw(&self, image: &Path) -> Result<bool, AiError> {
        let _span = info_span!("detect_nsfw", file = %redact_path(image)).entered();
        let response = self.generate(&self.analysis_model, NSFW_PROMPT, image, false)?;
        Ok(is_nsfw_reply(&first_text(&response)))
    }

    fn resize_image(
        &self,
        image: &Path,
        width: u32,
        height: u32,
        prompt: Option<&str>,
    ) -> Result<GeneratedImage, AiError> {
        let _span = info_span!(
            "ai_resize",
            file = %redact_path(image),
            width,
            height,
            prompt = %prompt.map(|p| truncate_prompt(p, 80)).unwrap_or_default(),
        )
        .entered();
        self.generate_image(&resize_prompt(width, height, prompt), image)
    }

    fn edit_image(&self, image: &Path, prompt: &str) -> Result<GeneratedImage, AiError> {
        let _span = info_span!(
            "ai_edit",
            file = %redact_path(image),
            prompt = %truncate_prompt(prompt, 80),
        )
        .entered();
        self.generate_image(prompt, image)
    }
}

fn resize_prompt(width: u32, height: u32, prompt: Option<&str>) -> String {
    let base = format!(
        "Using the provided image, resize it to exactly {w}x{h} pixels.\n\
         Preserve the entire original image content by intelligently extending the background or adding padding if necessary.\n\
         Do not crop or remove any part of the original image.\n\
         The final output must have the exact dimensions {w}x{h}.\n\
         Maintain the original style and lighting.",
        w = width,
        h = height
    );
    match prompt.filter(|p| !p.trim().is_empty()) {
        Some(p) => format!("{}\n\nAdditionally, apply the following creative edit: {}", base, p),
        None => base,
    }
}

fn first_text(response: &GenerateResponse) -> String {
    response
        .candidates
        .iter()
        .filter_map(|c| c.content.as_ref())
        .flat_map(|c| c.parts.iter())
        .find_map(|p| p.text.clone())
        .unwrap_or_default()
}

fn first_image(response: &GenerateResponse) -> Result<GeneratedImage, AiError> {
    let inline = response
        .candidates
        .iter()
        .filter_map(|c| c.content.as_ref())
        .flat_map(|c| c.parts.iter())
        .find_map(|p| p.inline_data.as_ref())
        .ok_or_else(|| AiError::InvalidResponse("no image in response".to_string()))?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(inline.data.as_bytes())
        .map_err(|e| AiError::InvalidResponse(format!("invalid base64 image data: {}", e)))?;

    Ok(GeneratedImage {
        bytes,
        mime_type: inline.mime_type.clone(),
    })
}

/// Extracts the JSON object from a model reply, tolerating markdown fences
/// and prose around it.
fn parse_json_reply<T: serde::de::DeserializeOwned + Default>(text: &str) -> Result<T, AiError> {
    let cleaned = text.replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Ok(T::default());
    }

    let candidate = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => cleaned,
    };

    serde_json::from_str(candidate).map_err(|e| {
        warn!(
            "Unparseable model reply: {} ({})",
            truncate_prompt(cleaned, MAX_ERROR_BODY_LENGTH),
            e
        );
        AiError::InvalidResponse(format!("invalid JSON reply: {}", e))
    })
}

fn is_nsfw_reply(text: &str) -> bool {
    let upper = text.trim().to_uppercase();
    upper.contains("YES") || upper.contains("TRUE")
}
