/// AI-assist call sites: prompt construction, completion, and normalization of
/// the model's reply into the shape each endpoint returns.
///
/// Each structured call site pairs a prompt with a `Shape` and a fallback; the
/// shaping functions are pure so the parsing rules can be tested without a model.
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::info;

use marketplace_common::llm::LlmClient;
use marketplace_common::normalize::{normalize, Shape};

use crate::cache::AssistCache;
use crate::error::AppError;

const MENTOR_SYSTEM: &str = "You are an expert project mentor. Always return only valid JSON as described.";
const HELPER_SYSTEM: &str = "You are a helpful assistant. Always return only valid JSON as described.";
const REVIEWER_SYSTEM: &str = "You are an expert project reviewer. Always return only valid JSON as described.";
const CHAT_SYSTEM: &str = "You are a helpful assistant for a project marketplace platform.";

const SUGGESTION_PREVIEW_CHARS: usize = 200;

const MARKETPLACE_SITES: &[&str] = &[
    "https://projectbazaar.in/",
    "https://www.buyprojectcode.in/",
    "https://www.pantechsolutions.net/",
    "https://takeoffprojects.com/",
    "https://www.projectsforyou.com/",
    "https://www.fiverr.com/",
    "https://www.upwork.com/",
    "https://github.com/",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistKind {
    Suggestions,
    Websites,
    DomainIdeas,
    Improvement,
}

impl AssistKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Suggestions => "suggestions",
            Self::Websites => "websites",
            Self::DomainIdeas => "domain_ideas",
            Self::Improvement => "improvement",
        }
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            Self::Suggestions | Self::DomainIdeas => MENTOR_SYSTEM,
            Self::Websites => HELPER_SYSTEM,
            Self::Improvement => REVIEWER_SYSTEM,
        }
    }

    fn prompt(&self, input: &str) -> String {
        match self {
            Self::Suggestions => format!(
                "Based on the query '{input}', suggest 5 innovative project ideas. Format your response \
as a JSON array with objects containing: title, description, difficulty \
(beginner/intermediate/advanced), technologies (array), estimated_time."
            ),
            Self::Websites => format!(
                "Check the following websites: {} and other similar platforms where students can buy, \
sell, or find academic/engineering projects. For the query '{input}', search each website and \
indicate if they are selling or offering this particular project or something very similar. \
For each, return: name, url (as a hyperlink if possible), description, category, and a field \
'sells_project' (true/false), and a short note on match/finding. If you cannot find the project \
on a site, say so in the note. Format your response as a JSON array as described.",
                MARKETPLACE_SITES.join(", ")
            ),
            Self::DomainIdeas => format!(
                "Generate 10 creative project ideas for the domain '{input}'. Focus on innovative, \
practical projects that students can build. Format as JSON array with title, description, and \
key_features."
            ),
            Self::Improvement => format!(
                "Analyze this project idea and suggest improvements: '{input}'. Provide suggestions \
for: technical enhancements, feature additions, best practices, potential challenges and \
solutions. Format as JSON with keys: improvements, technical_suggestions (array), \
feature_suggestions (array)."
            ),
        }
    }

    /// Turn a raw completion into the endpoint's result. Never fails.
    fn shape_reply(&self, input: &str, raw: &str) -> Shaped {
        let mut degraded = false;
        let value = match self {
            Self::Suggestions => normalize(raw, Shape::Array, |raw| {
                degraded = true;
                suggestions_fallback(input, raw)
            }),
            Self::Websites => normalize(raw, Shape::Array, |raw| {
                degraded = true;
                websites_fallback(raw)
            }),
            Self::DomainIdeas => normalize(raw, Shape::Array, |_| {
                degraded = true;
                json!([])
            }),
            Self::Improvement => {
                let shape = Shape::Object {
                    unwrap_key: Some("improvement"),
                };
                match normalize(raw, shape, |_| Value::Null) {
                    Value::Object(map) => improvement_from(input, map),
                    _ => {
                        degraded = true;
                        improvement_fallback(input, raw)
                    }
                }
            }
        };
        Shaped { value, degraded }
    }
}

/// A shaped reply. `degraded` marks values built by a fallback rather than
/// parsed from the model's JSON.
struct Shaped {
    value: Value,
    degraded: bool,
}

fn suggestions_fallback(query: &str, raw: &str) -> Value {
    let preview: String = raw.chars().take(SUGGESTION_PREVIEW_CHARS).collect();
    json!([{
        "title": format!("Project Idea for {query}"),
        "description": format!("{preview}..."),
        "difficulty": "intermediate",
        "technologies": ["Python", "JavaScript"],
        "estimated_time": "2-4 weeks",
    }])
}

fn websites_fallback(raw: &str) -> Value {
    json!([{ "name": "AI Response", "description": raw }])
}

/// Project a parsed object onto the improvement response, defaulting missing keys.
fn improvement_from(idea: &str, mut map: Map<String, Value>) -> Value {
    let mut take = |key: &str, default: Value| map.remove(key).unwrap_or(default);
    json!({
        "original_idea": take("original_idea", json!(idea)),
        "improvements": take("improvements", json!("")),
        "technical_suggestions": take("technical_suggestions", json!([])),
        "feature_suggestions": take("feature_suggestions", json!([])),
    })
}

fn improvement_fallback(idea: &str, raw: &str) -> Value {
    json!({
        "original_idea": idea,
        "improvements": raw,
        "technical_suggestions": [],
        "feature_suggestions": [],
    })
}

#[derive(Clone)]
pub struct AssistService {
    llm: Arc<LlmClient>,
    cache: AssistCache,
}

impl AssistService {
    pub fn new(llm: Arc<LlmClient>, cache: AssistCache) -> Self {
        Self { llm, cache }
    }

    /// Run a structured call site. Results are cached per kind and input.
    pub async fn run(&self, kind: AssistKind, input: &str) -> Result<Value, AppError> {
        let input = required(input, kind)?;
        if let Some(cached) = self.cache.get(kind.as_str(), input).await {
            return Ok(cached);
        }

        let raw = self
            .llm
            .complete(&kind.prompt(input), Some(kind.system_prompt()))
            .await?;
        let Shaped { value, degraded } = kind.shape_reply(input, &raw);
        info!(
            kind = kind.as_str(),
            items = value.as_array().map(Vec::len),
            degraded,
            "assist response normalized"
        );

        // A fallback is served once; the next request asks the model again.
        if !degraded {
            self.cache.set(kind.as_str(), input, &value).await;
        }
        Ok(value)
    }

    /// Free-form help, returned as the model wrote it.
    pub async fn chat(&self, message: &str) -> Result<String, AppError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(AppError::BadRequest("message must not be empty".to_string()));
        }
        let prompt = format!(
            "User message: '{message}'. Provide a helpful, concise response related to project \
development, programming, or academic guidance."
        );
        Ok(self.llm.complete(&prompt, Some(CHAT_SYSTEM)).await?)
    }
}

fn required(input: &str, kind: AssistKind) -> Result<&str, AppError> {
    let input = input.trim();
    if input.is_empty() {
        let field = match kind {
            AssistKind::Suggestions | AssistKind::Websites => "query",
            AssistKind::DomainIdeas => "domain",
            AssistKind::Improvement => "idea",
        };
        return Err(AppError::BadRequest(format!("{field} must not be empty")));
    }
    Ok(input)
}
