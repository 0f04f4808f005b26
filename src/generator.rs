/// DeepSeek text generation.
///
/// Builds a prompt from the configured mode (themes, keywords, or current
/// headlines), calls the chat-completion API with jittered sampling
/// parameters, and returns cleaned post text. Failure is an explicit
/// domain result, never an escaping error: callers treat it as "try
/// again later".

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::{Config, PostMode};
use crate::filter::HeadlineFilter;
use crate::news::NewsCollector;
use crate::themes::{
    pick_avoiding, GenerationHistory, GenerationRecord, KEYWORD_POOL, POST_ENDINGS, POST_FORMATS,
    POST_THEMES,
};

const API_URL: &str = "https://api.deepseek.com/v1/chat/completions";
const MODEL: &str = "deepseek-chat";
const MAX_TOKENS: u32 = 600;
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// How many recent selections to avoid repeating.
const AVOID_RECENT: usize = 3;
const HISTORY_LEN: usize = 10;

/// Why a generation attempt produced no text.
#[derive(Debug, Clone)]
pub enum GenerationFailure {
    /// The API answered with a non-success status.
    Api { status: u16, body: String },
    /// The request never completed.
    Network(String),
    /// A success response that carried no usable completion.
    EmptyCompletion,
    /// A success response whose body could not be decoded.
    Malformed(String),
}

impl fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api { status, body } => write!(f, "API error {}: {}", status, body),
            Self::Network(e) => write!(f, "network error: {}", e),
            Self::EmptyCompletion => write!(f, "empty completion"),
            Self::Malformed(e) => write!(f, "malformed response: {}", e),
        }
    }
}

/// What was fed into the prompt, kept for observability.
#[derive(Debug, Clone)]
pub enum SelectionInfo {
    Themed {
        theme: String,
        format: String,
        ending: String,
    },
    Keywords(Vec<String>),
    Headlines(usize),
}

/// A successful generation: the text plus the exact prompt and selection
/// that produced it.
#[derive(Debug, Clone)]
pub struct GeneratedPost {
    pub text: String,
    pub prompt: String,
    pub selection: SelectionInfo,
}

/// Text generation boundary, stubbed in tests.
#[async_trait]
pub trait PostGenerator: Send + Sync {
    async fn generate(&self) -> Result<GeneratedPost, GenerationFailure>;
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: &'static str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    top_p: f32,
    presence_penalty: f32,
    frequency_penalty: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Payload requested in structured mode.
#[derive(Debug, Deserialize)]
struct StructuredPost {
    #[serde(default)]
    theme: Option<String>,
    post: String,
}

/// Sampling parameters, re-jittered within fixed bounds on every call to
/// reduce textual repetition across consecutive generations.
#[derive(Debug, Clone, Copy)]
struct SamplingParams {
    temperature: f32,
    top_p: f32,
    presence_penalty: f32,
    frequency_penalty: f32,
}

impl SamplingParams {
    fn jittered<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            temperature: rng.gen_range(0.85..=0.95),
            top_p: rng.gen_range(0.92..=0.96),
            presence_penalty: rng.gen_range(0.6..=0.8),
            frequency_penalty: rng.gen_range(0.7..=0.9),
        }
    }
}

pub struct DeepSeekClient {
    api_key: String,
    api_url: String,
    http_client: reqwest::Client,
    mode: PostMode,
    history: Mutex<GenerationHistory>,
    collector: NewsCollector,
    filter: HeadlineFilter,
}

impl DeepSeekClient {
    pub fn new(config: &Config) -> Self {
        Self {
            api_key: config.deepseek_api_key.clone(),
            api_url: API_URL.to_string(),
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            mode: config.post_mode,
            history: Mutex::new(GenerationHistory::new(HISTORY_LEN)),
            collector: NewsCollector::new(config.news_feeds.clone()),
            filter: HeadlineFilter::new(),
        }
    }

    /// One chat-completion call. Returns the raw completion text.
    async fn complete(&self, prompt: &str) -> Result<String, GenerationFailure> {
        let params = SamplingParams::jittered(&mut rand::thread_rng());
        log::debug!(
            "Requesting completion (temperature {:.2}, top_p {:.2})",
            params.temperature,
            params.top_p
        );

        let request = ChatRequest {
            model: MODEL,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt.to_string(),
            }],
            temperature: params.temperature,
            top_p: params.top_p,
            presence_penalty: params.presence_penalty,
            frequency_penalty: params.frequency_penalty,
            max_tokens: MAX_TOKENS,
            stream: false,
        };

        let response = self
            .http_client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationFailure::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationFailure::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationFailure::Malformed(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(GenerationFailure::EmptyCompletion);
        }

        Ok(content)
    }

    /// Draw theme, format and ending, avoiding the last few selections
    /// when alternatives exist.
    async fn draw_selection(&self) -> (String, String, String) {
        let history = self.history.lock().await;
        let recent_themes = history.recent_themes(AVOID_RECENT);
        let recent_formats = history.recent_formats(AVOID_RECENT);
        let recent_endings = history.recent_endings(AVOID_RECENT);
        drop(history);

        let mut rng = rand::thread_rng();
        let theme = pick_avoiding(POST_THEMES, &recent_themes, &mut rng).to_string();
        let format = pick_avoiding(POST_FORMATS, &recent_formats, &mut rng).to_string();
        let ending = pick_avoiding(POST_ENDINGS, &recent_endings, &mut rng).to_string();
        (theme, format, ending)
    }

    async fn record_generation(&self, theme: &str, format: &str, ending: &str, text: &str) {
        let mut history = self.history.lock().await;
        history.record(GenerationRecord {
            theme: theme.to_string(),
            format: format.to_string(),
            ending: ending.to_string(),
            post_text: text.to_string(),
            timestamp: chrono::Utc::now(),
        });
    }

    async fn generate_themed(&self) -> Result<GeneratedPost, GenerationFailure> {
        let (theme, format, ending) = self.draw_selection().await;
        let prompt = themed_prompt(&theme, &format, &ending);

        let raw = self.complete(&prompt).await?;
        let text = clean_response(&raw);
        if text.is_empty() {
            return Err(GenerationFailure::EmptyCompletion);
        }

        self.record_generation(&theme, &format, &ending, &text).await;
        log::info!("Generated themed post ({} chars)", text.chars().count());

        Ok(GeneratedPost {
            text,
            prompt,
            selection: SelectionInfo::Themed {
                theme,
                format,
                ending,
            },
        })
    }

    /// Ask for a JSON payload first; tolerate code fences and surrounding
    /// prose by extracting the first well-balanced object. A payload that
    /// cannot be recovered falls back to the plain themed path.
    async fn generate_structured(&self) -> Result<GeneratedPost, GenerationFailure> {
        let (theme, format, ending) = self.draw_selection().await;
        let prompt = structured_prompt(&theme, &format, &ending);

        let raw = self.complete(&prompt).await?;
        let payload = extract_json_object(&raw)
            .and_then(|json| serde_json::from_str::<StructuredPost>(json).ok());

        let Some(payload) = payload else {
            log::warn!("Structured response had no usable JSON payload, falling back");
            return self.generate_themed().await;
        };

        let text = clean_response(&payload.post);
        if text.is_empty() {
            log::warn!("Structured payload carried an empty post, falling back");
            return self.generate_themed().await;
        }

        let theme = payload.theme.unwrap_or(theme);
        self.record_generation(&theme, &format, &ending, &text).await;
        log::info!("Generated structured post ({} chars)", text.chars().count());

        Ok(GeneratedPost {
            text,
            prompt,
            selection: SelectionInfo::Themed {
                theme,
                format,
                ending,
            },
        })
    }

    async fn generate_keywords(&self) -> Result<GeneratedPost, GenerationFailure> {
        let keywords: Vec<String> = {
            let mut rng = rand::thread_rng();
            KEYWORD_POOL
                .choose_multiple(&mut rng, 3)
                .map(|k| k.to_string())
                .collect()
        };

        let prompt = keywords_prompt(&keywords);
        let raw = self.complete(&prompt).await?;
        let text = clean_response(&raw);
        if text.is_empty() {
            return Err(GenerationFailure::EmptyCompletion);
        }

        log::info!("Generated keyword post from {:?}", keywords);

        Ok(GeneratedPost {
            text,
            prompt,
            selection: SelectionInfo::Keywords(keywords),
        })
    }

    /// Embed filtered current headlines into the prompt. No fresh news is
    /// not an error: the themed path takes over.
    async fn generate_news(&self) -> Result<GeneratedPost, GenerationFailure> {
        let headlines = self.collector.recent_headlines(20).await;
        let selected = self.filter.select(&headlines, 5);

        if selected.is_empty() {
            log::info!("No fresh headlines available, falling back to themed generation");
            return self.generate_themed().await;
        }

        let listing = selected
            .iter()
            .map(|h| format!("- {} ({})", h.title, h.source))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = news_prompt(&listing);
        let raw = self.complete(&prompt).await?;
        let text = clean_response(&raw);
        if text.is_empty() {
            return Err(GenerationFailure::EmptyCompletion);
        }

        log::info!("Generated news post from {} headlines", selected.len());

        Ok(GeneratedPost {
            text,
            prompt,
            selection: SelectionInfo::Headlines(selected.len()),
        })
    }
}

#[async_trait]
impl PostGenerator for DeepSeekClient {
    async fn generate(&self) -> Result<GeneratedPost, GenerationFailure> {
        match self.mode {
            PostMode::Themed => self.generate_themed().await,
            PostMode::Structured => self.generate_structured().await,
            PostMode::Keywords => self.generate_keywords().await,
            PostMode::News => self.generate_news().await,
        }
    }
}

const STYLE_RULES: &str = "Length: 225-375 characters.\n\n\
Important instructions:\n\
- Use a conversational but literate style\n\
- Avoid cliches and worn-out phrasing\n\
- Offer an idea the reader can apply\n\
- Include an element of surprise or a new perspective\n\
- Use HTML formatting: wrap the opening phrase in <b> tags and key terms in <i> tags\n";

const NO_COMMENTS_RULE: &str = "\nIMPORTANT: comments are disabled on the channel, \
so do not invite discussion and do not ask questions that expect replies.";

fn themed_prompt(theme: &str, format: &str, ending: &str) -> String {
    format!(
        "Write a post for a Telegram channel on the theme: {theme}.\n\
         The post should take the form of {format}.\n\n\
         {STYLE_RULES}- {ending}\n{NO_COMMENTS_RULE}"
    )
}

fn structured_prompt(theme: &str, format: &str, ending: &str) -> String {
    format!(
        "Write a post for a Telegram channel on the theme: {theme}.\n\
         The post should take the form of {format}.\n\n\
         {STYLE_RULES}- {ending}\n{NO_COMMENTS_RULE}\n\n\
         Respond with a single JSON object of the form \
         {{\"theme\": \"...\", \"post\": \"...\"}} and nothing else."
    )
}

fn keywords_prompt(keywords: &[String]) -> String {
    format!(
        "Write a post for a Telegram channel inspired by these notions: {}.\n\n\
         {STYLE_RULES}{NO_COMMENTS_RULE}",
        keywords.join(", ")
    )
}

fn news_prompt(listing: &str) -> String {
    format!(
        "Today's headlines:\n{listing}\n\n\
         Write a post for a Telegram channel: a reflection on a single thread \
         connecting these events, without retelling them.\n\n\
         {STYLE_RULES}{NO_COMMENTS_RULE}"
    )
}

/// The first well-balanced JSON object inside `text`, tolerating code
/// fences and surrounding prose.
pub(crate) fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in text.as_bytes().iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    // Brace bytes are ASCII, so both bounds sit on char boundaries
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Trim the completion and drop wrapping code fences / quote marks.
pub(crate) fn clean_response(raw: &str) -> String {
    let mut text = raw.trim();

    if let Some(stripped) = text.strip_prefix("```") {
        // An optional language tag occupies the rest of the fence line
        text = match stripped.find('\n') {
            Some(idx) => &stripped[idx + 1..],
            None => stripped,
        };
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped;
    }

    let text = text.trim();
    let text = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text);

    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_object_from_fenced_response() {
        let raw = "Sure, here it is:\n```json\n{\"theme\": \"t\", \"post\": \"p\"}\n```\nHope that helps!";
        let json = extract_json_object(raw).unwrap();
        let parsed: StructuredPost = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.post, "p");
        assert_eq!(parsed.theme.as_deref(), Some("t"));
    }

    #[test]
    fn extracts_first_balanced_object_with_nesting() {
        let raw = "{\"a\": {\"b\": 1}, \"c\": \"}\"} {\"second\": true}";
        assert_eq!(
            extract_json_object(raw).unwrap(),
            "{\"a\": {\"b\": 1}, \"c\": \"}\"}"
        );
    }

    #[test]
    fn extraction_handles_escaped_quotes_inside_strings() {
        let raw = "noise {\"post\": \"he said \\\"hi\\\" {not a brace}\"} tail";
        let json = extract_json_object(raw).unwrap();
        let parsed: StructuredPost = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.post, "he said \"hi\" {not a brace}");
    }

    #[test]
    fn extraction_fails_without_balanced_object() {
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("{\"unterminated\": ").is_none());
    }

    #[test]
    fn cleans_fences_and_wrapping_quotes() {
        assert_eq!(clean_response("```html\n<b>Post</b>\n```"), "<b>Post</b>");
        assert_eq!(clean_response("\"quoted text\""), "quoted text");
        assert_eq!(clean_response("  plain  "), "plain");
        // A lone leading quote is content, not wrapping
        assert_eq!(clean_response("\"unbalanced"), "\"unbalanced");
    }

    #[test]
    fn jittered_params_stay_within_bounds() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let p = SamplingParams::jittered(&mut rng);
            assert!((0.85..=0.95).contains(&p.temperature));
            assert!((0.92..=0.96).contains(&p.top_p));
            assert!((0.6..=0.8).contains(&p.presence_penalty));
            assert!((0.7..=0.9).contains(&p.frequency_penalty));
        }
    }

    #[test]
    fn themed_prompt_carries_selection_and_length_target() {
        let prompt = themed_prompt("the theme", "the format", "the ending");
        assert!(prompt.contains("the theme"));
        assert!(prompt.contains("the format"));
        assert!(prompt.contains("the ending"));
        assert!(prompt.contains("225-375"));
    }
}
