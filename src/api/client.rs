use async_trait::async_trait;
use reqwest::{multipart, RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::types::{
  ApiErrorBody, ApiHistoryItem, ApiLoginRequest, ApiLoginResponse, ApiTranslateRequest,
  ApiUserResponse, ApiWord, Translation, WordDraft, WordPatch, TRANSLATE_MODEL, TRANSLATE_PROMPT,
};
use super::Remote;
use crate::config::ApiConfig;
use crate::credential::{CredentialCache, TokenValidator};
use crate::error::RemoteError;
use crate::network::ConnectivityProbe;
use crate::resource::Fetched;
use crate::store::{HistoryRecord, Profile, Storage, WordRecord};

/// How a request is authenticated.
enum Auth<'a> {
  /// Current session token, if any; a 401 clears the session
  Session,
  /// An explicit token being checked; a 401 only reports the rejection
  Explicit(&'a str),
  /// No authorization header
  Anonymous,
}

/// Shiru HTTP API client.
pub struct ApiClient<S: Storage> {
  http: reqwest::Client,
  base_url: Url,
  credentials: Arc<CredentialCache<S>>,
}

impl<S: Storage + 'static> ApiClient<S> {
  pub fn new(config: &ApiConfig, credentials: Arc<CredentialCache<S>>) -> Result<Self, RemoteError> {
    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| RemoteError::Transport(format!("failed to create http client: {}", e)))?;

    let base_url = Url::parse(&config.base_url)
      .map_err(|e| RemoteError::Transport(format!("invalid api url {}: {}", config.base_url, e)))?;

    Ok(Self {
      http,
      base_url,
      credentials,
    })
  }

  fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
    self
      .base_url
      .join(path)
      .map_err(|e| RemoteError::Transport(format!("invalid endpoint {}: {}", path, e)))
  }

  /// Attach authorization, send, and map failures.
  async fn send(&self, request: RequestBuilder, auth: Auth<'_>) -> Result<Response, RemoteError> {
    let request = match &auth {
      Auth::Session => {
        self.credentials.migrate_legacy(self).await;
        match self.credentials.get_token() {
          Some((token, _)) => request.bearer_auth(token),
          None => request,
        }
      }
      Auth::Explicit(token) => request.bearer_auth(token),
      Auth::Anonymous => request,
    };

    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    match status {
      StatusCode::UNAUTHORIZED => {
        if matches!(auth, Auth::Session) {
          warn!("session token rejected by server");
          self.credentials.invalidate_session();
        }
        Err(RemoteError::Unauthorized)
      }
      StatusCode::NOT_FOUND => Err(RemoteError::NotFound),
      _ => {
        let message = response
          .json::<ApiErrorBody>()
          .await
          .ok()
          .and_then(|body| body.error)
          .unwrap_or_else(|| "request failed".to_string());
        Err(RemoteError::Status {
          status: status.as_u16(),
          message,
        })
      }
    }
  }

  async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
    let url = self.endpoint(path)?;
    let response = self.send(self.http.get(url), Auth::Session).await?;
    Ok(response.json().await?)
  }

  async fn delete(&self, path: &str) -> Result<(), RemoteError> {
    let url = self.endpoint(path)?;
    self.send(self.http.delete(url), Auth::Session).await?;
    Ok(())
  }

  async fn into_fetched(response: Response, fallback_type: &str) -> Result<Fetched, RemoteError> {
    let content_type = response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
      .filter(|v| !v.is_empty())
      .unwrap_or_else(|| fallback_type.to_string());
    let bytes = response.bytes().await?;
    Ok(Fetched::new(bytes.to_vec(), content_type))
  }
}

#[async_trait]
impl<S: Storage + 'static> TokenValidator for ApiClient<S> {
  async fn verify_token(&self, token: &str) -> Result<Profile, RemoteError> {
    let url = self.endpoint("/api/auth/verify")?;
    let response = self.send(self.http.get(url), Auth::Explicit(token)).await?;
    let body: ApiUserResponse = response.json().await?;
    Ok(body.user)
  }
}

#[async_trait]
impl<S: Storage + 'static> Remote for ApiClient<S> {
  async fn ping(&self) -> Result<(), RemoteError> {
    let url = self.endpoint("/api/ping")?;
    self.send(self.http.get(url), Auth::Anonymous).await?;
    Ok(())
  }

  async fn exchange_id_token(&self, id_token: &str) -> Result<(String, Profile), RemoteError> {
    let url = self.endpoint("/api/auth/google")?;
    let request = self.http.post(url).json(&ApiLoginRequest { id_token });
    let response = self.send(request, Auth::Anonymous).await?;
    let body: ApiLoginResponse = response.json().await?;
    Ok((body.token, body.user))
  }

  async fn list_words(&self) -> Result<Vec<WordRecord>, RemoteError> {
    let words: Vec<ApiWord> = self.get_json("/api/wordbook").await?;
    Ok(words.into_iter().map(ApiWord::into_record).collect())
  }

  async fn add_word(&self, draft: &WordDraft) -> Result<WordRecord, RemoteError> {
    let url = self.endpoint("/api/wordbook/add")?;
    let response = self
      .send(self.http.post(url).json(draft), Auth::Session)
      .await?;
    let word: ApiWord = response.json().await?;
    Ok(word.into_record())
  }

  async fn update_word(&self, id: &str, patch: &WordPatch) -> Result<(), RemoteError> {
    let url = self.endpoint(&format!("/api/wordbook/{}", id))?;
    self
      .send(self.http.put(url).json(patch), Auth::Session)
      .await?;
    Ok(())
  }

  async fn delete_word(&self, id: &str) -> Result<(), RemoteError> {
    self.delete(&format!("/api/wordbook/{}", id)).await
  }

  async fn translate(&self, word: &str) -> Result<Translation, RemoteError> {
    let url = self.endpoint("/api/ai/translate")?;
    let request = self.http.post(url).json(&ApiTranslateRequest {
      model: TRANSLATE_MODEL,
      query: word,
      system_prompt: TRANSLATE_PROMPT,
    });
    let response = self.send(request, Auth::Session).await?;
    let body: serde_json::Value = response.json().await?;
    Translation::from_response(body)
      .ok_or_else(|| RemoteError::Decode(format!("no dictionary entry in reply for {}", word)))
  }

  async fn list_history(&self) -> Result<Vec<HistoryRecord>, RemoteError> {
    let items: Vec<ApiHistoryItem> = self.get_json("/api/history").await?;
    Ok(items.into_iter().map(ApiHistoryItem::into_record).collect())
  }

  async fn get_history(&self, id: &str) -> Result<HistoryRecord, RemoteError> {
    let item: ApiHistoryItem = self.get_json(&format!("/api/history/{}", id)).await?;
    Ok(item.into_record())
  }

  async fn delete_history(&self, id: &str) -> Result<(), RemoteError> {
    self.delete(&format!("/api/history/{}", id)).await
  }

  async fn analyze_image(
    &self,
    image: Vec<u8>,
    filename: &str,
  ) -> Result<HistoryRecord, RemoteError> {
    let url = self.endpoint("/api/image/analyze")?;
    let part = multipart::Part::bytes(image).file_name(filename.to_string());
    let form = multipart::Form::new().part("image", part);
    let response = self
      .send(self.http.post(url).multipart(form), Auth::Session)
      .await?;
    let item: ApiHistoryItem = response.json().await?;
    Ok(item.into_record())
  }

  async fn speak(&self, text: &str) -> Result<Fetched, RemoteError> {
    let url = self.endpoint("/api/tts/speak")?;
    let request = self
      .http
      .post(url)
      .json(&serde_json::json!({ "text": text }));
    let response = self.send(request, Auth::Session).await?;
    Self::into_fetched(response, "audio/mpeg").await
  }

  async fn fetch_bytes(&self, url: &str) -> Result<Fetched, RemoteError> {
    debug!(url, "downloading resource");
    let response = self.send(self.http.get(url), Auth::Anonymous).await?;
    Self::into_fetched(response, "application/octet-stream").await
  }
}

#[async_trait]
impl<S: Storage + 'static> ConnectivityProbe for ApiClient<S> {
  async fn probe(&self) -> bool {
    match self.ping().await {
      Ok(()) => true,
      Err(e) => {
        debug!("api not reachable: {}", e);
        false
      }
    }
  }
}
