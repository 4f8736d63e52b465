//! Gemini collaborator: trip recommendations and the price guardrail.
//!
//! Both features degrade rather than block. A missing API key disables them
//! outright, a provider failure on the price check falls open to "fair", and
//! only a malformed recommendation payload is surfaced to the user (as one
//! upstream error, with nothing saved).

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::{error::AppError, models::trip::RecommendationBundle};

#[derive(Clone)]
pub struct GeminiService {
    http: Client,
    api_key: Option<String>,
    api_base: Url,
    model: String,
}

/// Outcome of the fair-price guardrail. `flagged` blocks the save until the
/// user consciously proceeds; `message` carries the assistant's wording.
#[derive(Debug, Clone, Default)]
pub struct PriceVerdict {
    pub flagged: bool,
    pub message: Option<String>,
}

impl PriceVerdict {
    fn fair() -> Self {
        Self::default()
    }
}

/// Destination packing checklist grouped by category, in the JSON shape the
/// assistant is prompted for.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PackingList {
    #[serde(default)]
    pub categories: Vec<PackingCategory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackingCategory {
    pub name: String,
    #[serde(default)]
    pub items: Vec<String>,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GeminiService {
    pub fn new(http: Client, api_key: Option<String>, api_base: Url, model: String) -> Self {
        if api_key.is_none() {
            warn!("no Gemini API key configured; recommendations and price checks are off");
        }
        Self {
            http,
            api_key,
            api_base,
            model,
        }
    }

    /// Raw text generation. `Ok(None)` means the feature is unconfigured.
    pub async fn generate(&self, prompt: &str) -> Result<Option<String>, AppError> {
        let Some(api_key) = &self.api_key else {
            return Ok(None);
        };

        let url = self
            .api_base
            .join(&format!("models/{}:generateContent", self.model))
            .map_err(|err| AppError::Config(format!("invalid Gemini endpoint: {err}")))?;

        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };

        let response = self
            .http
            .post(url)
            .query(&[("key", api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|err| AppError::Upstream(format!("assistant request failed: {err}")))?;

        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "assistant returned {}",
                response.status()
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|err| AppError::Upstream(format!("assistant response unreadable: {err}")))?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        Ok(Some(text))
    }

    /// Asks for a structured recommendation bundle for a new trip.
    /// `Ok(None)` when unconfigured; `Err(Upstream)` when the assistant
    /// answers with something no balanced-JSON extraction can save.
    pub async fn plan_trip(
        &self,
        destination: &str,
        purpose: Option<&str>,
        duration_days: i64,
        budget: f64,
    ) -> Result<Option<RecommendationBundle>, AppError> {
        let prompt = format!(
            "Plan budget trip details for a traveler in {destination} for {duration_days} days.\n\
             Purpose: {}.\n\
             Total budget: {budget}.\n\n\
             Return a JSON object with exactly these fields:\n\
             {{\n\
                 \"food\": [{{\"name\": \"Name\", \"cost\": \"approx cost\", \"desc\": \"short desc\"}}],\n\
                 \"places\": [{{\"name\": \"Name\", \"ticket\": \"ticket price\", \"desc\": \"short desc\"}}],\n\
                 \"stays\": [{{\"name\": \"Name\", \"price\": \"price per night\", \"desc\": \"short desc\"}}],\n\
                 \"travel_tips\": [\"tip1\", \"tip2\"]\n\
             }}\n\
             Do not include markdown or backticks. Just raw JSON.",
            purpose.unwrap_or("Leisure")
        );

        let Some(text) = self.generate(&prompt).await? else {
            return Ok(None);
        };

        let Some(raw) = extract_json(&text) else {
            return Err(AppError::Upstream(
                "assistant returned no JSON plan".to_string(),
            ));
        };

        let bundle = serde_json::from_str(raw)
            .map_err(|err| AppError::Upstream(format!("assistant returned a malformed plan: {err}")))?;
        debug!(destination, "recommendation bundle generated");
        Ok(Some(bundle))
    }

    /// Asks for a packing checklist grouped by category. Same contract as
    /// `plan_trip`: `Ok(None)` when unconfigured, `Err(Upstream)` on an
    /// unusable answer.
    pub async fn packing_list(&self, destination: &str) -> Result<Option<PackingList>, AppError> {
        let prompt = format!(
            "Generate a smart packing list for a trip to {destination}.\n\
             Return the response STRICTLY as a valid JSON object with this structure:\n\
             {{ \"categories\": [ {{ \"name\": \"Category Name\", \"items\": [\"item1\", \"item2\"] }} ] }}.\n\
             Do NOT include markdown formatting like ```json. Only return the raw JSON string."
        );

        let Some(text) = self.generate(&prompt).await? else {
            return Ok(None);
        };

        let Some(raw) = extract_json(&text) else {
            return Err(AppError::Upstream(
                "assistant returned no JSON packing list".to_string(),
            ));
        };

        let list: PackingList = serde_json::from_str(raw).map_err(|err| {
            AppError::Upstream(format!("assistant returned a malformed packing list: {err}"))
        })?;
        debug!(destination, categories = list.categories.len(), "packing list generated");
        Ok(Some(list))
    }

    /// The guardrail never errors: anything short of a clear "expensive"
    /// verdict allows the expense.
    pub async fn check_price(&self, item: &str, cost: f64, city: &str) -> PriceVerdict {
        let prompt = format!(
            "I am a tourist in {city}. I am paying {cost} for {item}. \
             Is this fair, expensive, or cheap for a budget traveler? \
             Answer in one short sentence starting with 'Fair', 'Expensive', or 'Cheap'."
        );

        match self.generate(&prompt).await {
            Ok(Some(text)) if is_expensive(&text) => PriceVerdict {
                flagged: true,
                message: Some(text),
            },
            Ok(_) => PriceVerdict::fair(),
            Err(err) => {
                warn!(error = %err, "price check unavailable; allowing expense");
                PriceVerdict::fair()
            }
        }
    }
}

/// First balanced `{...}` region of the text, if any. The provider does not
/// guarantee markdown-free output, so fences and prose around the JSON are
/// expected.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn is_expensive(text: &str) -> bool {
    text.to_lowercase().contains("expensive")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyless() -> GeminiService {
        GeminiService::new(
            Client::new(),
            None,
            Url::parse("https://example.invalid/v1beta/").expect("url"),
            "gemini-flash-latest".to_string(),
        )
    }

    #[test]
    fn extracts_json_from_fenced_markdown() {
        let text = "```json\n{\"food\": [], \"places\": []}\n```";
        assert_eq!(extract_json(text), Some("{\"food\": [], \"places\": []}"));
    }

    #[test]
    fn extracts_first_balanced_region_with_nesting() {
        let text = "Here you go: {\"a\": {\"b\": 1}} and some trailing {junk";
        assert_eq!(extract_json(text), Some("{\"a\": {\"b\": 1}}"));
    }

    #[test]
    fn no_braces_means_no_extraction() {
        assert_eq!(extract_json("sorry, I cannot help with that"), None);
        assert_eq!(extract_json("unbalanced {\"a\": 1"), None);
    }

    #[test]
    fn expensive_substring_flags_a_warning() {
        assert!(is_expensive(
            "This is quite Expensive for a budget traveler"
        ));
        assert!(!is_expensive("Fair price for the area"));
        assert!(!is_expensive("Cheap, go for it"));
    }

    #[test]
    fn packing_list_parses_the_prompted_shape() {
        let raw = r#"{
            "categories": [
                {"name": "Clothing", "items": ["rain jacket", "hiking boots"]},
                {"name": "Documents", "items": []}
            ]
        }"#;
        let list: PackingList = serde_json::from_str(raw).expect("parse list");
        assert_eq!(list.categories.len(), 2);
        assert_eq!(list.categories[0].items.len(), 2);
        assert!(list.categories[1].items.is_empty());
    }

    #[tokio::test]
    async fn keyless_service_is_fail_open() {
        let service = keyless();
        assert!(service.generate("hi").await.expect("ok").is_none());
        assert!(service
            .plan_trip("Goa", None, 4, 5000.0)
            .await
            .expect("ok")
            .is_none());
        assert!(service.packing_list("Goa").await.expect("ok").is_none());
        let verdict = service.check_price("Taxi", 250.0, "Goa").await;
        assert!(!verdict.flagged);
        assert!(verdict.message.is_none());
    }
}
