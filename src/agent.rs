//! Test-case generation agent.
//!
//! Builds a prompt from the user query and the retrieved context, sends it
//! to the configured model through a [`Generator`], and decodes the reply
//! into a [`TestSuite`]. Malformed model output is a
//! [`Error::GenerationParse`]; there are no placeholder test cases.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::config::{GenerationConfig, GenerationProviderKind};
use crate::error::{Error, Result};
use crate::models::TestSuite;
use crate::remote;
use crate::retrieve::RetrievalContext;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const GEMINI_DEFAULT_MODEL: &str = "gemini-1.5-flash";
const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";

const SYSTEM_INSTRUCTIONS: &str = "\
You are an expert test case designer. Using the provided context, generate comprehensive \
test cases for the user query.

Generate 5 to 8 test cases covering different scenarios and test types:
- Generic test cases (high-level, unstructured definitions)
- Functional test cases (detailed steps)
- Edge cases and boundary conditions
- Error handling scenarios
- Integration scenarios (if applicable)

GENERIC test cases have a title, a summary, test_type \"generic\", a priority, optional \
preconditions, an unstructured description of what to test, and labels. They have no steps \
and no expected_result.

NON-GENERIC test cases have a title, a summary, a test_type (functional, integration, api, \
ui, performance or security), a priority, optional preconditions, ordered steps with action, \
data and expected_result, an overall expected_result, an executable test_script when \
applicable, labels and components.

Return only a JSON object matching this schema:";

const SUITE_SCHEMA: &str = r#"{
  "query": "<the user query>",
  "test_cases": [
    {
      "title": "Descriptive test case title",
      "summary": "Brief description of what this test validates",
      "test_type": "generic|functional|integration|api|ui|performance|security",
      "priority": "high|medium|low",
      "preconditions": "Setup requirements or null",
      "description": "Unstructured definition for generic tests or null",
      "labels": ["label1", "label2"],
      "steps": [
        {"action": "Step description", "data": "Input data as string or JSON object", "expected_result": "What should happen"}
      ],
      "expected_result": "Overall expected outcome or null for generic tests",
      "test_script": "Executable script code or null",
      "components": ["component1"]
    }
  ],
  "total_count": 0
}"#;

/// A text-completion backend.
#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;
    /// Send the prompt and return the model's raw text reply.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    Ok(match config.provider {
        GenerationProviderKind::Disabled => Arc::new(DisabledGenerator),
        GenerationProviderKind::Gemini => Arc::new(GeminiGenerator::new(config)?),
        GenerationProviderKind::OpenAI => Arc::new(OpenAIGenerator::new(config)?),
    })
}

/// Generate a test suite for `query` from the retrieved context.
pub async fn generate(
    generator: &dyn Generator,
    query: &str,
    context: &RetrievalContext,
) -> Result<TestSuite> {
    let prompt = build_prompt(query, &context.render());
    let raw = generator.complete(&prompt).await?;
    let suite = parse_suite(query, &raw)?;
    tracing::info!(
        generator = generator.name(),
        test_cases = suite.total_count,
        context_chunks = context.chunks.len(),
        degraded = context.degraded,
        "generated test suite"
    );
    Ok(suite)
}

pub fn build_prompt(query: &str, context: &str) -> String {
    let context = if context.trim().is_empty() {
        "(no matching documentation found)"
    } else {
        context
    };
    format!(
        "{}\n{}\n\nContext from documentation:\n{}\n\nUser Query: {}\n\n\
         Generate a mix of generic and detailed test cases. Generic test cases have a \
         description but no steps or expected_result.",
        SYSTEM_INSTRUCTIONS, SUITE_SCHEMA, context, query
    )
}

/// Decode a model reply: strip Markdown fences, take the outermost JSON
/// object, and normalise `query` and `total_count`.
pub fn parse_suite(query: &str, raw: &str) -> Result<TestSuite> {
    let text = strip_fences(raw);
    let start = text
        .find('{')
        .ok_or_else(|| Error::GenerationParse("no JSON object in model output".to_string()))?;
    let end = text
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| Error::GenerationParse("unterminated JSON object in model output".to_string()))?;

    let mut suite: TestSuite = serde_json::from_str(&text[start..=end])
        .map_err(|e| Error::GenerationParse(e.to_string()))?;
    if suite.test_cases.is_empty() {
        return Err(Error::GenerationParse(
            "model returned no test cases".to_string(),
        ));
    }
    suite.query = query.to_string();
    suite.total_count = suite.test_cases.len();
    Ok(suite)
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string line (e.g. "json").
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

// ============ Providers ============

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(Error::Config("generation provider is disabled".to_string()))
    }
}

/// Gemini `generateContent` with a JSON response MIME type.
pub struct GeminiGenerator {
    client: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    temperature: f32,
    max_retries: u32,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            client: remote::client(config.timeout_secs)?,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| GEMINI_DEFAULT_MODEL.to_string()),
            api_key: remote::api_key("GEMINI_API_KEY")?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": self.temperature,
                "responseMimeType": "application/json",
            },
        });
        let json = remote::post_json("gemini generation", self.max_retries, || {
            self.client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
        })
        .await?;
        gemini_text(&json)
    }
}

fn gemini_text(json: &serde_json::Value) -> Result<String> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| Error::GenerationParse("model returned no candidates".to_string()))?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.trim().is_empty() {
        return Err(Error::GenerationParse("model returned empty text".to_string()));
    }
    Ok(text)
}

/// OpenAI chat completions in JSON-object mode.
pub struct OpenAIGenerator {
    client: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    temperature: f32,
    max_retries: u32,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            client: remote::client(config.timeout_secs)?,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_MODEL.to_string()),
            api_key: remote::api_key("OPENAI_API_KEY")?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": "You write software test cases and reply with JSON only." },
                { "role": "user", "content": prompt },
            ],
        });
        let json = remote::post_json("openai generation", self.max_retries, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .filter(|c| !c.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::GenerationParse("model returned no choices".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, TestType};

    const SUITE: &str = r#"{
        "query": "ignored",
        "test_cases": [
            {
                "title": "Reject invalid password",
                "summary": "Login fails with wrong password",
                "test_type": "api",
                "priority": "high",
                "steps": [
                    {"action": "POST /login", "data": {"user": "alice", "password": "nope"}, "expected_result": "401"}
                ],
                "expected_result": "Access denied",
                "labels": ["login"],
                "components": ["auth"]
            },
            {
                "title": "Login overview",
                "summary": "Generic login validation",
                "test_type": "generic",
                "priority": "medium",
                "description": "Check the login flow end to end",
                "steps": null
            }
        ],
        "total_count": 99
    }"#;

    #[test]
    fn parse_suite_normalises_query_and_count() {
        let suite = parse_suite("Login API", SUITE).unwrap();
        assert_eq!(suite.query, "Login API");
        assert_eq!(suite.total_count, 2);
        assert_eq!(suite.test_cases[0].test_type, TestType::Api);
        assert_eq!(suite.test_cases[0].priority, Priority::High);
        assert!(suite.test_cases[1].steps.is_empty());
    }

    #[test]
    fn parse_suite_strips_fences_and_prose() {
        let fenced = format!("```json\n{}\n```", SUITE);
        assert_eq!(parse_suite("q", &fenced).unwrap().total_count, 2);

        let chatty = format!("Here are your tests:\n{}\nGood luck!", SUITE);
        assert_eq!(parse_suite("q", &chatty).unwrap().total_count, 2);
    }

    #[test]
    fn malformed_output_is_a_parse_error() {
        for raw in ["", "no json here", "{\"test_cases\": [", "{\"test_cases\": []}", "} {"] {
            let err = parse_suite("q", raw).unwrap_err();
            assert!(matches!(err, Error::GenerationParse(_)), "raw: {:?}", raw);
        }
    }

    #[test]
    fn prompt_contains_context_and_query() {
        let prompt = build_prompt("Login API", "Source: a.docx\nSection: Login\nContent: x");
        assert!(prompt.contains("expert test case designer"));
        assert!(prompt.contains("Source: a.docx"));
        assert!(prompt.ends_with("description but no steps or expected_result."));
        assert!(prompt.contains("User Query: Login API"));
        assert!(build_prompt("q", "  ").contains("(no matching documentation found)"));
    }

    #[test]
    fn gemini_text_joins_parts() {
        let json = json!({"candidates": [{"content": {"parts": [{"text": "{\"a\""}, {"text": ": 1}"}]}}]});
        assert_eq!(gemini_text(&json).unwrap(), "{\"a\": 1}");
        let err = gemini_text(&json!({"candidates": []})).unwrap_err();
        assert!(matches!(err, Error::GenerationParse(_)));
    }

    #[tokio::test]
    async fn disabled_generator_errors() {
        let g = create_generator(&GenerationConfig {
            provider: GenerationProviderKind::Disabled,
            ..GenerationConfig::default()
        })
        .unwrap();
        assert!(g.complete("x").await.is_err());
    }
}
