//! Wire types for the Shiru HTTP API and their conversion into records.
//!
//! The server is inconsistent about field names (snake and camel case, old and
//! new sentence fields), so every alternative is deserialized into its own
//! field and the conversion picks the preferred one.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{Annotation, HistoryRecord, Profile, WordRecord};

/// Parse the many shapes a creation time arrives in: RFC 3339, HTTP-date
/// (RFC 2822, what the server's JSON encoder emits for datetimes), naive ISO
/// timestamps, or epoch milliseconds.
pub fn parse_creation_time(value: &Value) -> Option<DateTime<Utc>> {
  match value {
    Value::String(s) => {
      let s = s.trim();
      if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
      }
      if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
      }
      ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|dt| dt.and_utc())
    }
    Value::Number(n) => n
      .as_i64()
      .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
    _ => None,
  }
}

fn first_time(candidates: &[&Option<Value>]) -> Option<DateTime<Utc>> {
  candidates
    .iter()
    .filter_map(|v| v.as_ref())
    .find_map(parse_creation_time)
}

fn first_text(candidates: &[&Option<String>]) -> String {
  candidates
    .iter()
    .filter_map(|v| v.as_deref())
    .find(|s| !s.is_empty())
    .unwrap_or_default()
    .to_string()
}

// ============================================================================
// Auth
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiLoginRequest<'a> {
  pub id_token: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ApiLoginResponse {
  pub token: String,
  pub user: Profile,
}

#[derive(Debug, Deserialize)]
pub struct ApiUserResponse {
  pub user: Profile,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
  pub error: Option<String>,
}

// ============================================================================
// Wordbook
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiWord {
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub word: String,
  #[serde(default)]
  pub kana: Option<String>,
  #[serde(default)]
  pub reading: Option<String>,
  #[serde(default)]
  pub meaning: String,
  #[serde(default)]
  pub created_at: Option<Value>,
  #[serde(default, rename = "createdAt")]
  pub created_at_iso: Option<Value>,
}

impl ApiWord {
  pub fn into_record(self) -> WordRecord {
    WordRecord {
      timestamp: first_time(&[&self.created_at_iso, &self.created_at]),
      reading: first_text(&[&self.kana, &self.reading]),
      id: self.id,
      word: self.word,
      meaning: self.meaning,
    }
  }
}

/// New wordbook entry as sent to the server.
#[derive(Debug, Clone, Serialize)]
pub struct WordDraft {
  pub word: String,
  pub kana: String,
  pub meaning: String,
}

/// Partial wordbook update; unset fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WordPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub word: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub kana: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub meaning: Option<String>,
}

impl WordPatch {
  pub fn is_empty(&self) -> bool {
    self.word.is_none() && self.kana.is_none() && self.meaning.is_none()
  }

  pub fn apply(&self, record: &mut WordRecord) {
    if let Some(word) = &self.word {
      record.word = word.clone();
    }
    if let Some(kana) = &self.kana {
      record.reading = kana.clone();
    }
    if let Some(meaning) = &self.meaning {
      record.meaning = meaning.clone();
    }
  }
}

/// Dictionary lookup request for the AI translation endpoint.
#[derive(Debug, Serialize)]
pub struct ApiTranslateRequest<'a> {
  pub model: &'a str,
  pub query: &'a str,
  pub system_prompt: &'a str,
}

pub const TRANSLATE_MODEL: &str = "gpt-4o-mini";

pub const TRANSLATE_PROMPT: &str = "You are a Japanese-Chinese dictionary. For the given Japanese \
word reply only with JSON: {\"word\": \"word\", \"kana\": \"reading\", \"meaning\": \
\"Chinese meaning\", \"example\": \"example sentence\", \"exampleMeaning\": \"its translation\"}";

/// A looked-up word, ready to be saved.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Translation {
  pub word: String,
  #[serde(default)]
  pub kana: String,
  #[serde(default)]
  pub meaning: String,
  #[serde(default)]
  pub example: Option<String>,
  #[serde(default, rename = "exampleMeaning")]
  pub example_meaning: Option<String>,
}

impl Translation {
  /// Parse whatever the translation endpoint returned.
  ///
  /// The server answers with the object itself, with `{"content": text}` when
  /// the model's reply was not clean JSON, or with a raw completion. Text is
  /// searched for the outermost `{...}`.
  pub fn from_response(value: Value) -> Option<Self> {
    let text = match &value {
      Value::Object(map) if map.contains_key("word") => {
        return serde_json::from_value(value).ok();
      }
      Value::String(text) => text.as_str(),
      _ => value
        .get("content")
        .or_else(|| value.pointer("/choices/0/message/content"))
        .and_then(Value::as_str)?,
    };

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
      return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
  }

  pub fn into_draft(self) -> WordDraft {
    WordDraft {
      word: self.word,
      kana: self.kana,
      meaning: self.meaning,
    }
  }
}

// ============================================================================
// History
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ApiPosition {
  #[serde(default)]
  pub x: f64,
  #[serde(default)]
  pub y: f64,
}

#[derive(Debug, Deserialize)]
pub struct ApiAnnotation {
  #[serde(default)]
  pub word: String,
  #[serde(default)]
  pub kana: Option<String>,
  #[serde(default)]
  pub reading: Option<String>,
  #[serde(default)]
  pub meaning: String,
  pub position_x: Option<f64>,
  pub position_y: Option<f64>,
  pub position: Option<ApiPosition>,
}

impl ApiAnnotation {
  pub fn into_annotation(self) -> Annotation {
    let nested = self.position.unwrap_or_default();
    Annotation {
      reading: first_text(&[&self.kana, &self.reading]),
      word: self.word,
      meaning: self.meaning,
      position_x: self.position_x.unwrap_or(nested.x),
      position_y: self.position_y.unwrap_or(nested.y),
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiHistoryItem {
  #[serde(default)]
  pub id: String,
  #[serde(default, rename = "historyId")]
  pub history_id: Option<String>,
  pub image_url: Option<String>,
  #[serde(rename = "imageUrl")]
  pub image_url_camel: Option<String>,
  pub sentence_japanese: Option<String>,
  pub sentence: Option<String>,
  pub sentence_chinese: Option<String>,
  pub translated_sentence: Option<String>,
  #[serde(rename = "translatedSentence")]
  pub translated_sentence_camel: Option<String>,
  pub word_count: Option<u32>,
  #[serde(rename = "wordCount")]
  pub word_count_camel: Option<u32>,
  #[serde(default)]
  pub words: Vec<ApiAnnotation>,
  pub created_at: Option<Value>,
  #[serde(rename = "createdAt")]
  pub created_at_iso: Option<Value>,
}

impl ApiHistoryItem {
  pub fn into_record(self) -> HistoryRecord {
    let words: Vec<Annotation> = self
      .words
      .into_iter()
      .map(ApiAnnotation::into_annotation)
      .collect();
    let id = if self.id.is_empty() {
      self.history_id.unwrap_or_default()
    } else {
      self.id
    };
    let image_url = first_text(&[&self.image_url, &self.image_url_camel]);

    HistoryRecord {
      id,
      image_url: (!image_url.is_empty()).then_some(image_url),
      sentence: first_text(&[&self.sentence_japanese, &self.sentence]),
      translated_sentence: first_text(&[
        &self.sentence_chinese,
        &self.translated_sentence,
        &self.translated_sentence_camel,
      ]),
      word_count: self
        .word_count
        .or(self.word_count_camel)
        .unwrap_or(words.len() as u32),
      words,
      timestamp: first_time(&[&self.created_at_iso, &self.created_at]),
    }
  }
}
