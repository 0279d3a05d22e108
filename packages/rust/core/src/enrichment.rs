//! Enrichment orchestrator.
//!
//! Asks an external generative-text service to fill in a record's
//! description, ingredients and steps. Candidate endpoints are tried in
//! order; an endpoint failure moves on to the next candidate, a quota
//! failure cools down first. A reply that is not the expected JSON is
//! degraded to line-split steps, and when every candidate is exhausted the
//! offline synthesis path answers instead. [`Enricher::enrich`] never fails.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use larder_ingest::parse_quantity;
use larder_shared::{
    CatalogRecord, EndpointDescriptor, EnrichmentConfig, Ingredient, LarderError, PacingConfig,
    RecordDraft, Result, is_stale_error,
};

use crate::pacing::Pacer;
use crate::synthesis;

const USER_AGENT: &str = concat!("larder/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Request / result types
// ---------------------------------------------------------------------------

/// What the orchestrator knows about the item it enriches.
#[derive(Debug, Clone)]
pub struct EnrichmentRequest {
    pub name: String,
    pub ingredients: Vec<Ingredient>,
    pub tools: Vec<String>,
    /// Current description; stale error text is already scrubbed to `None`.
    pub description: Option<String>,
}

impl EnrichmentRequest {
    pub fn from_record(record: &CatalogRecord) -> Self {
        let description = record
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty() && !is_stale_error(d))
            .map(String::from);
        if record.description.is_some() && description.is_none() {
            debug!(name = %record.name, "discarding stale description");
        }
        Self {
            name: record.name.clone(),
            ingredients: record.ingredients.clone(),
            tools: record.tools.clone(),
            description,
        }
    }

    fn prompt(&self) -> String {
        let ingredients = if self.ingredients.is_empty() {
            "unknown".to_string()
        } else {
            self.ingredients
                .iter()
                .map(Ingredient::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        let tools = if self.tools.is_empty() {
            "unknown".to_string()
        } else {
            self.tools.join(", ")
        };
        format!(
            "You are a chef. Write the recipe for \"{name}\".\n\
             Known ingredients: {ingredients}.\n\
             Known tools: {tools}.\n\
             Current description: {description}.\n\
             Keep the steps consistent with the ingredients.\n\
             Reply with JSON only, shaped as \
             {{\"description\": \"one appealing sentence\", \
             \"ingredients\": [{{\"name\": \"\", \"quantity\": 0, \"unit\": \"\"}}], \
             \"steps\": [\"Step one\", \"Step two\"]}}",
            name = self.name,
            description = self.description.as_deref().unwrap_or("none"),
        )
    }
}

/// Fields produced by one enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentResult {
    pub description: Option<String>,
    pub ingredients: Option<Vec<Ingredient>>,
    /// Never empty.
    pub steps: Vec<String>,
    /// Model that answered, or the offline synthesis tag.
    pub source_endpoint: String,
}

impl EnrichmentResult {
    /// Overwrite the draft's fields with every non-empty field of this result.
    /// Absent or empty fields never erase existing content.
    pub fn merge_into(&self, draft: &mut RecordDraft) {
        if let Some(description) = self.description.as_deref().filter(|d| !d.trim().is_empty()) {
            draft.description = Some(description.to_string());
        }
        if let Some(ingredients) = self.ingredients.as_ref().filter(|i| !i.is_empty()) {
            draft.ingredients = ingredients.clone();
        }
        if !self.steps.is_empty() {
            draft.steps = self.steps.clone();
        }
    }
}

/// What the caller sees: the result and whether it came from synthesis.
#[derive(Debug, Clone)]
pub struct EnrichmentOutcome {
    pub result: EnrichmentResult,
    pub used_fallback: bool,
}

/// Fixed cooldown applied after the service reports an exhausted quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub quota_cooldown: Duration,
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            quota_cooldown: Duration::ZERO,
        }
    }
}

impl From<&PacingConfig> for BackoffPolicy {
    fn from(config: &PacingConfig) -> Self {
        Self {
            quota_cooldown: config.quota_cooldown,
        }
    }
}

/// Why a single candidate call did not produce a result.
#[derive(Debug)]
enum CallFailure {
    Endpoint(String),
    Quota(String),
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Multi-candidate client for the generative service.
pub struct Enricher {
    client: Client,
    config: EnrichmentConfig,
    backoff: BackoffPolicy,
    pacer: Option<Arc<Pacer>>,
}

impl Enricher {
    pub fn new(config: &EnrichmentConfig, backoff: BackoffPolicy) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| LarderError::Enrichment(format!("failed to build HTTP client: {e}")))?;

        if config.api_key.is_none() && !config.endpoints.is_empty() {
            warn!("no API key configured, enrichment will use offline synthesis only");
        }

        Ok(Self {
            client,
            config: config.clone(),
            backoff,
            pacer: None,
        })
    }

    /// Gate every outbound call through a shared pacer.
    pub fn with_pacer(mut self, pacer: Arc<Pacer>) -> Self {
        self.pacer = Some(pacer);
        self
    }

    /// Whether any endpoint will actually be called.
    pub fn is_online(&self) -> bool {
        self.config.api_key.is_some() && !self.config.endpoints.is_empty()
    }

    /// Enrich one item. Falls back to offline synthesis; never errors.
    #[instrument(skip_all, fields(name = %request.name))]
    pub async fn enrich(&self, request: &EnrichmentRequest) -> EnrichmentOutcome {
        if let Some(api_key) = self.config.api_key.as_deref() {
            let prompt = request.prompt();
            for endpoint in &self.config.endpoints {
                match self.attempt(endpoint, api_key, &prompt).await {
                    Ok(result) => {
                        info!(model = %endpoint.model, steps = result.steps.len(), "enriched");
                        return EnrichmentOutcome {
                            result,
                            used_fallback: false,
                        };
                    }
                    Err(CallFailure::Endpoint(reason)) => {
                        warn!(model = %endpoint.model, %reason, "endpoint failed, trying next candidate");
                    }
                    Err(CallFailure::Quota(reason)) => {
                        warn!(model = %endpoint.model, %reason, "quota exhausted, cooling down");
                        self.cool_down().await;
                    }
                }
            }
            warn!("all endpoints exhausted, using offline synthesis");
        }

        EnrichmentOutcome {
            result: synthesis::synthesize(request),
            used_fallback: true,
        }
    }

    /// One candidate: pace, call, interpret.
    async fn attempt(
        &self,
        endpoint: &EndpointDescriptor,
        api_key: &str,
        prompt: &str,
    ) -> std::result::Result<EnrichmentResult, CallFailure> {
        if let Some(pacer) = &self.pacer {
            pacer.wait().await;
        }
        let text = self.call(endpoint, api_key, prompt).await?;
        interpret(&text, &endpoint.model)
    }

    async fn call(
        &self,
        endpoint: &EndpointDescriptor,
        api_key: &str,
        prompt: &str,
    ) -> std::result::Result<String, CallFailure> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": self.config.temperature,
                "maxOutputTokens": self.config.max_output_tokens,
            }
        });

        debug!(url = %endpoint.generate_url(), "calling endpoint");
        let response = self
            .client
            .post(endpoint.generate_url())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CallFailure::Endpoint(format!("request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CallFailure::Endpoint(format!("failed to read body: {e}")))?;

        if status == StatusCode::TOO_MANY_REQUESTS
            || (!status.is_success() && mentions_quota(&text))
        {
            return Err(CallFailure::Quota(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(CallFailure::Endpoint(format!(
                "HTTP {status}: {}",
                truncate(&text, 200)
            )));
        }

        let content = envelope_text(text)?;
        if content.trim().is_empty() {
            return Err(CallFailure::Endpoint("empty response text".into()));
        }
        Ok(content)
    }

    async fn cool_down(&self) {
        match &self.pacer {
            Some(pacer) => pacer.penalize(self.backoff.quota_cooldown).await,
            None if !self.backoff.quota_cooldown.is_zero() => {
                tokio::time::sleep(self.backoff.quota_cooldown).await;
            }
            None => {}
        }
    }
}

fn mentions_quota(body: &str) -> bool {
    body.contains("RESOURCE_EXHAUSTED") || body.to_lowercase().contains("quota")
}

/// Pull the generated text out of a `generateContent` envelope.
/// A body that is not an envelope is returned as raw text.
fn envelope_text(body: String) -> std::result::Result<String, CallFailure> {
    match serde_json::from_str::<Value>(&body) {
        Ok(value) if value.get("candidates").is_some() => value
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| CallFailure::Endpoint("response has no candidate text".into())),
        _ => Ok(body),
    }
}

/// Truncate to at most `max_chars` characters for log output.
fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Payload extraction
// ---------------------------------------------------------------------------

// Keys a generated payload may use for each field. Models answer in
// English or Indonesian and do not always keep the requested names.
const DESCRIPTION_KEYS: &[&str] = &["description", "desc", "deskripsi"];
const INGREDIENT_KEYS: &[&str] = &["ingredients", "bahan"];
const STEP_KEYS: &[&str] = &["steps", "step", "instructions", "langkah"];
const NAME_KEYS: &[&str] = &["name", "nama"];
const QUANTITY_KEYS: &[&str] = &["quantity", "qty", "jumlah"];
const UNIT_KEYS: &[&str] = &["unit", "satuan"];

/// First non-null value under any of `keys`.
fn field<'a>(object: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| object.get(*k))
        .find(|v| !v.is_null())
}

/// Turn generated text into a result, degrading non-JSON replies to line-split steps.
///
/// Elements of the wrong shape inside a JSON payload are dropped one by one;
/// they never turn the whole reply into degraded text.
fn interpret(text: &str, source: &str) -> std::result::Result<EnrichmentResult, CallFailure> {
    match extract_payload(text) {
        Some(payload) => {
            let steps: Vec<String> = match field(&payload, STEP_KEYS) {
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(clean_text)
                    .collect(),
                Some(Value::String(block)) => block.lines().map(clean_text).collect(),
                _ => Vec::new(),
            };
            let steps: Vec<String> = steps.into_iter().filter(|s| !s.is_empty()).collect();
            if steps.is_empty() {
                return Err(CallFailure::Endpoint("payload has no steps".into()));
            }

            let ingredients = match field(&payload, INGREDIENT_KEYS) {
                Some(Value::Array(items)) => Some(
                    items
                        .iter()
                        .filter_map(to_ingredient)
                        .collect::<Vec<_>>(),
                ),
                _ => None,
            }
            .filter(|items| !items.is_empty());

            Ok(EnrichmentResult {
                description: field(&payload, DESCRIPTION_KEYS)
                    .and_then(Value::as_str)
                    .map(clean_text)
                    .filter(|d| !d.is_empty()),
                ingredients,
                steps,
                source_endpoint: source.to_string(),
            })
        }
        None => {
            let steps = degrade(text);
            if steps.is_empty() {
                return Err(CallFailure::Endpoint("reply has no usable lines".into()));
            }
            debug!(lines = steps.len(), "reply is not JSON, degraded to line-split steps");
            Ok(EnrichmentResult {
                description: None,
                ingredients: None,
                steps,
                source_endpoint: source.to_string(),
            })
        }
    }
}

fn strip_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "")
}

/// Parse the JSON object between the first `{` and the last `}`.
fn extract_payload(text: &str) -> Option<Value> {
    let unfenced = strip_fences(text);
    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str::<Value>(&unfenced[start..=end])
        .ok()
        .filter(Value::is_object)
}

fn to_ingredient(raw: &Value) -> Option<Ingredient> {
    match raw {
        Value::String(text) => {
            let name = clean_text(text);
            (!name.is_empty()).then(|| Ingredient::named(name))
        }
        Value::Object(_) => {
            let name = clean_text(field(raw, NAME_KEYS)?.as_str()?);
            if name.is_empty() {
                return None;
            }
            let quantity = match field(raw, QUANTITY_KEYS) {
                Some(Value::Number(n)) => n.as_f64().filter(|q| q.is_finite() && *q >= 0.0),
                Some(Value::String(s)) => Some(parse_quantity(s)),
                _ => None,
            }
            .unwrap_or(0.0);
            let unit = match field(raw, UNIT_KEYS) {
                Some(Value::String(u)) => Some(clean_text(u)),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            }
            .filter(|u| !u.is_empty());
            Some(Ingredient {
                name,
                quantity,
                unit: unit.unwrap_or_else(|| larder_shared::UNIT_AS_NEEDED.to_string()),
            })
        }
        _ => None,
    }
}

/// Non-empty cleaned lines of a reply that is not JSON.
fn degrade(text: &str) -> Vec<String> {
    strip_fences(text)
        .lines()
        .map(clean_text)
        .filter(|line| line.chars().any(char::is_alphanumeric))
        .collect()
}

/// Strip markup glyphs, leading bullets and step numbering; collapse whitespace.
fn clean_text(text: &str) -> String {
    static LEADING_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)^\s*(?:(?:step|langkah)\s*\d+\s*[:.)-]?|\d+[.):]|[-•*+>]+)(?:\s+|$)")
            .expect("valid regex")
    });
    static GLYPH_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[*#`~]+").expect("valid regex"));

    let unglyphed = GLYPH_RE.replace_all(text, "");
    let unmarked = LEADING_MARKER_RE.replace(&unglyphed, "");
    unmarked
        .split_whitespace()
        .map(|token| token.trim_matches('_'))
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
