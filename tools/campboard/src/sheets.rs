use crate::config::CredentialsConfig;
use crate::credentials::{AuthMethod, Authenticator};
use crate::runtime::{Clock, FileSystem, ProcessRunner, SheetSource};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// One worksheet row keyed by its header cell.
pub type SheetRow = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRequest {
    pub sheet_id: String,
    pub sheet_name: String,
    pub credentials: CredentialsConfig,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    Config,
    Auth,
    Quota,
    Timeout,
    Transport,
    Malformed,
    Api,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SourceError {
    pub kind: SourceErrorKind,
    pub status: Option<u16>,
    pub api_status: Option<String>,
    pub message: String,
}

impl SourceError {
    pub fn new(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            api_status: None,
            message: message.into(),
        }
    }

    /// Builds an error from free text when no structured code is available.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = if mentions_quota(&message) {
            SourceErrorKind::Quota
        } else {
            SourceErrorKind::Api
        };
        Self::new(kind, message)
    }

    /// Builds an error from an HTTP failure and its (possibly empty) Google error body.
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed = serde_json::from_str::<GoogleErrorEnvelope>(body)
            .ok()
            .map(|envelope| envelope.error);
        let api_status = parsed.as_ref().and_then(|e| e.status.clone());
        let message = parsed
            .as_ref()
            .and_then(|e| e.message.clone())
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| {
                let snippet = body.chars().take(200).collect::<String>();
                format!("HTTP {status}: {}", snippet.trim())
            });
        let code = parsed.as_ref().and_then(|e| e.code).unwrap_or(status);

        let kind = if code == 429 || api_status.as_deref() == Some("RESOURCE_EXHAUSTED") {
            SourceErrorKind::Quota
        } else if code == 401
            || code == 403
            || matches!(
                api_status.as_deref(),
                Some("UNAUTHENTICATED") | Some("PERMISSION_DENIED")
            )
        {
            SourceErrorKind::Auth
        } else {
            SourceErrorKind::Api
        };

        Self {
            kind,
            status: Some(status),
            api_status,
            message,
        }
    }

    pub fn is_quota(&self) -> bool {
        self.kind == SourceErrorKind::Quota
    }
}

fn mentions_quota(message: &str) -> bool {
    message.contains("429") || message.contains("Quota exceeded")
}

#[derive(Debug, Deserialize)]
struct GoogleErrorEnvelope {
    error: GoogleErrorBody,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    code: Option<u16>,
    message: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Turns a value grid into header-keyed rows.
///
/// The first row is the header. Short rows are padded with empty strings and
/// rows with no non-empty cell are skipped. Columns with a blank header are
/// ignored.
pub fn grid_to_rows(values: &[Vec<Value>]) -> Vec<SheetRow> {
    let Some((header, body)) = values.split_first() else {
        return Vec::new();
    };
    let header = header.iter().map(cell_to_header).collect::<Vec<_>>();

    body.iter()
        .filter(|row| row.iter().any(|cell| !is_blank(cell)))
        .map(|row| {
            header
                .iter()
                .enumerate()
                .filter(|(_, name)| !name.is_empty())
                .map(|(idx, name)| {
                    let cell = row
                        .get(idx)
                        .cloned()
                        .unwrap_or_else(|| Value::String(String::new()));
                    (name.clone(), cell)
                })
                .collect::<SheetRow>()
        })
        .collect()
}

fn cell_to_header(cell: &Value) -> String {
    match cell {
        Value::String(text) => text.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_blank(cell: &Value) -> bool {
    match cell {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

pub fn values_url(api_base: &str, sheet_id: &str, sheet_name: &str) -> Result<Url, SourceError> {
    let mut url = Url::parse(api_base)
        .map_err(|e| SourceError::new(SourceErrorKind::Config, e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| SourceError::new(SourceErrorKind::Config, "invalid sheets api base"))?
        .push(sheet_id)
        .push("values")
        .push(sheet_name);
    url.query_pairs_mut()
        .append_pair("majorDimension", "ROWS")
        .append_pair("valueRenderOption", "UNFORMATTED_VALUE");
    Ok(url)
}

/// Reads worksheets through the Google Sheets v4 values endpoint.
pub struct GoogleSheetsSource {
    client: Option<Client>,
    authenticator: Authenticator,
    api_base: String,
}

impl GoogleSheetsSource {
    pub fn new(
        clock: Arc<dyn Clock>,
        file_system: Arc<dyn FileSystem>,
        process_runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            client: Client::builder().build().ok(),
            authenticator: Authenticator::new(clock, file_system, process_runner),
            api_base: SHEETS_API_BASE.to_string(),
        }
    }

    /// Points the client at another `.../v4/spreadsheets` root.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn send(&self, request: &SheetRequest, auth: &AuthMethod) -> Result<String, SourceError> {
        let client = self.client.as_ref().ok_or_else(|| {
            SourceError::new(SourceErrorKind::Transport, "http client unavailable")
        })?;
        let url = values_url(&self.api_base, &request.sheet_id, &request.sheet_name)?;
        // The key travels as a header so it never appears in a URL or an error built from one.
        let builder = match auth {
            AuthMethod::ApiKey(key) => client.get(url).header(API_KEY_HEADER, key.as_str()),
            AuthMethod::Bearer(token) => client.get(url).bearer_auth(token),
        }
        .timeout(request.timeout);

        let response = builder.send().map_err(transport_error)?;
        let status = response.status();
        let body = response.text().map_err(transport_error)?;
        if status != StatusCode::OK {
            return Err(SourceError::from_response(status.as_u16(), &body));
        }
        Ok(body)
    }
}

/// Classifies a client failure from its kind alone; the request URL is stripped
/// and no free-text quota matching is applied.
pub(crate) fn transport_error(error: reqwest::Error) -> SourceError {
    let error = error.without_url();
    if error.is_timeout() {
        return SourceError::new(
            SourceErrorKind::Timeout,
            format!("request timed out: {}", error_chain(&error)),
        );
    }
    if let Some(status) = error.status() {
        return SourceError::from_response(status.as_u16(), "");
    }
    SourceError::new(SourceErrorKind::Transport, error_chain(&error))
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut cause = error.source();
    while let Some(inner) = cause {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        cause = inner.source();
    }
    message
}

impl SheetSource for GoogleSheetsSource {
    fn fetch_records(&self, request: &SheetRequest) -> Result<Vec<SheetRow>, SourceError> {
        let auth = self
            .authenticator
            .resolve(&request.credentials, request.timeout)?;
        let body = match self.send(request, &auth) {
            Err(err) if err.kind == SourceErrorKind::Auth => {
                self.authenticator.invalidate();
                return Err(err);
            }
            other => other?,
        };
        let range: ValueRange = serde_json::from_str(&body).map_err(|e| {
            SourceError::new(
                SourceErrorKind::Malformed,
                format!("unexpected values payload: {e}"),
            )
        })?;
        Ok(grid_to_rows(&range.values))
    }
}
