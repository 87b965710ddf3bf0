//! REST client for the hosted notes backend.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};

use super::{RemoteError, RemoteNoteStore, RemoteResult};
use crate::error::{Error, Result};
use crate::models::{Note, NoteId};
use crate::util::{compact_text, is_http_url, non_blank};

/// Notes backend reached over HTTP with a bearer token.
///
/// `GET/POST {base}/notes`, `PATCH/DELETE {base}/notes/{id}`.
#[derive(Clone)]
pub struct HttpNoteStore {
    base_url: Url,
    access_token: Option<String>,
    timeout: Duration,
    client: Client,
}

impl std::fmt::Debug for HttpNoteStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpNoteStore")
            .field("base_url", &self.base_url.as_str())
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct CreateNoteBody<'a> {
    content: &'a str,
    latitude: f64,
    longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    accuracy: Option<f64>,
}

#[derive(Debug, Serialize)]
struct UpdateNoteBody<'a> {
    content: &'a str,
    latitude: f64,
    longitude: f64,
    accuracy: Option<f64>,
    version: i64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

impl HttpNoteStore {
    pub fn new(
        base_url: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            base_url,
            access_token: non_blank(access_token),
            timeout,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn notes_url(&self, id: Option<&NoteId>) -> RemoteResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                RemoteError::Rejected(format!("base url {} cannot take a path", self.base_url))
            })?;
            segments.pop_if_empty().push("notes");
            if let Some(id) = id {
                segments.push(id.as_str());
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RemoteResult<RequestBuilder> {
        let token = self
            .access_token
            .as_deref()
            .ok_or(RemoteError::NotAuthenticated)?;
        Ok(request
            .bearer_auth(token)
            .header("Accept", "application/json"))
    }

    async fn send(&self, request: RequestBuilder, id: Option<&NoteId>) -> RemoteResult<Response> {
        let response = self
            .authorize(request)?
            .send()
            .await
            .map_err(|error| self.transport_error(&error))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body, id))
    }

    async fn read_note(&self, response: Response) -> RemoteResult<Note> {
        response
            .json::<Note>()
            .await
            .map_err(|error| self.transport_error(&error))
    }

    fn transport_error(&self, error: &reqwest::Error) -> RemoteError {
        if error.is_timeout() {
            RemoteError::Timeout(self.timeout)
        } else if error.is_decode() {
            RemoteError::InvalidResponse(compact_text(&error.to_string()))
        } else {
            RemoteError::Transient(compact_text(&error.to_string()))
        }
    }
}

impl RemoteNoteStore for HttpNoteStore {
    async fn create_note(&self, note: &Note) -> RemoteResult<Note> {
        let body = CreateNoteBody {
            content: &note.content,
            latitude: note.latitude,
            longitude: note.longitude,
            accuracy: note.accuracy,
        };
        let request = self.client.post(self.notes_url(None)?).json(&body);
        let response = self.send(request, None).await?;
        self.read_note(response).await
    }

    async fn update_note(&self, note: &Note) -> RemoteResult<Note> {
        let body = UpdateNoteBody {
            content: &note.content,
            latitude: note.latitude,
            longitude: note.longitude,
            accuracy: note.accuracy,
            version: note.version,
        };
        let request = self.client.patch(self.notes_url(Some(&note.id))?).json(&body);
        let response = self.send(request, Some(&note.id)).await?;
        self.read_note(response).await
    }

    async fn delete_note(&self, id: &NoteId) -> RemoteResult<()> {
        let request = self.client.delete(self.notes_url(Some(id))?);
        self.send(request, Some(id)).await?;
        Ok(())
    }

    async fn get_notes(&self) -> RemoteResult<Vec<Note>> {
        let request = self.client.get(self.notes_url(None)?);
        let response = self.send(request, None).await?;
        response
            .json::<Vec<Note>>()
            .await
            .map_err(|error| self.transport_error(&error))
    }
}

fn normalize_base_url(raw: String) -> Result<Url> {
    let base_url = non_blank(Some(raw))
        .ok_or_else(|| Error::Config("API base URL must not be empty".to_string()))?;
    if !is_http_url(&base_url) {
        return Err(Error::Config(
            "API base URL must include http:// or https://".to_string(),
        ));
    }
    Url::parse(base_url.trim_end_matches('/'))
        .map_err(|error| Error::Config(format!("invalid API base URL '{base_url}': {error}")))
}

/// Map a non-success status onto the retry classes.
fn classify_status(status: StatusCode, body: &str, id: Option<&NoteId>) -> RemoteError {
    let subject = || id.map_or_else(|| parse_api_error(status, body), ToString::to_string);
    match status {
        StatusCode::UNAUTHORIZED => RemoteError::NotAuthenticated,
        StatusCode::FORBIDDEN => RemoteError::Forbidden(subject()),
        StatusCode::NOT_FOUND => RemoteError::NotFound(subject()),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            RemoteError::Transient(parse_api_error(status, body))
        }
        status if status.is_server_error() => RemoteError::Transient(parse_api_error(status, body)),
        _ => RemoteError::Rejected(parse_api_error(status, body)),
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", compact_text(&message), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store(base: &str) -> HttpNoteStore {
        HttpNoteStore::new(base, Some("secret-token".to_string()), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn new_rejects_invalid_base_urls() {
        let timeout = Duration::from_secs(1);
        assert!(HttpNoteStore::new("", None, timeout).is_err());
        assert!(HttpNoteStore::new("api.example.com", None, timeout).is_err());
        assert!(HttpNoteStore::new("https://api.example.com/", None, timeout).is_ok());
    }

    #[test]
    fn notes_url_appends_escaped_id() {
        let store = store("https://api.example.com/v1/");
        assert_eq!(
            store.notes_url(None).unwrap().as_str(),
            "https://api.example.com/v1/notes"
        );
        assert_eq!(
            store
                .notes_url(Some(&NoteId::new("a b/c")))
                .unwrap()
                .as_str(),
            "https://api.example.com/v1/notes/a%20b%2Fc"
        );
    }

    #[test]
    fn debug_redacts_access_token() {
        let debug = format!("{:?}", store("https://api.example.com"));
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn status_codes_map_to_retry_classes() {
        let id = NoteId::new("n1");
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, "", Some(&id)),
            RemoteError::NotAuthenticated
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN, "", Some(&id)),
            RemoteError::Forbidden("n1".to_string())
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, "", Some(&id)),
            RemoteError::NotFound("n1".to_string())
        );
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "", None).is_retryable());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "", None).is_retryable());
        assert_eq!(
            classify_status(
                StatusCode::UNPROCESSABLE_ENTITY,
                r#"{"message":"content too long"}"#,
                Some(&id)
            ),
            RemoteError::Rejected("content too long (422)".to_string())
        );
    }

    #[test]
    fn parse_api_error_falls_back_to_body_or_status() {
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, r#"{"error":"upstream"}"#),
            "upstream (502)"
        );
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, "  gateway down "),
            "gateway down (502)"
        );
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
    }

    #[tokio::test]
    async fn calls_without_token_are_not_authenticated() {
        let store =
            HttpNoteStore::new("https://api.example.com", None, Duration::from_secs(1)).unwrap();
        assert_eq!(
            store.get_notes().await,
            Err(RemoteError::NotAuthenticated)
        );
    }
}
