use std::fs;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::listing::{AuthenticationInfo, Listing, NewListing, User};
use crate::reputation::Vote;
use crate::search::SearchQuery;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/";
pub const ERROR_PREFIX: &str = "Servlet Error:";
pub const SUCCESS_MESSAGE: &str = "Servlet Success";

pub const CREATE_LISTING_PATH: &str = "/create-listing";
pub const UPDATE_LISTING_PATH: &str = "/update-listing";
pub const CREATE_PREVIEW_PATH: &str = "/create-listing-preview";
pub const UPDATE_PREVIEW_PATH: &str = "/update-listing-preview";
pub const LISTING_KEY_PARAM: &str = "listing-key";

/// A create preview answers with one listing, an update preview with the
/// stored listing followed by the edited one.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum PreviewBody {
    Pair(Vec<Listing>),
    Single(Box<Listing>),
}

/// True when `message` is a servlet error sentinel carrying some detail.
pub fn is_error_message(message: &str) -> bool {
    message.len() > ERROR_PREFIX.len() && message.starts_with(ERROR_PREFIX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServletMessage {
    Success,
    Error(String),
    Unrecognized(String),
}

impl ServletMessage {
    pub fn classify(message: &str) -> Self {
        let trimmed = message.trim();
        if is_error_message(trimmed) {
            ServletMessage::Error(trimmed.to_string())
        } else if trimmed == SUCCESS_MESSAGE {
            ServletMessage::Success
        } else {
            ServletMessage::Unrecognized(trimmed.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServletError {
    #[error("{0}")]
    Servlet(String),
    #[error("unrecognized servlet response: {0:?}")]
    Unrecognized(String),
    #[error("servlet http error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("servlet: decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Decodes a JSON body, turning an error sentinel string into `ServletError::Servlet`.
pub fn decode_body<T>(body: &str) -> std::result::Result<T, ServletError>
where
    T: DeserializeOwned,
{
    let value: Value = serde_json::from_str(body.trim())?;
    if let Value::String(message) = &value {
        if is_error_message(message) {
            return Err(ServletError::Servlet(message.clone()));
        }
    }
    Ok(serde_json::from_value(value)?)
}

/// Interprets a body that should carry the success sentinel.
pub fn expect_success(body: &str) -> std::result::Result<(), ServletError> {
    let trimmed = body.trim();
    let message = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::String(message)) => message,
        Ok(_) => return Err(ServletError::Unrecognized(trimmed.to_string())),
        Err(_) => trimmed.to_string(),
    };
    match ServletMessage::classify(&message) {
        ServletMessage::Success => Ok(()),
        ServletMessage::Error(message) => Err(ServletError::Servlet(message)),
        ServletMessage::Unrecognized(message) => Err(ServletError::Unrecognized(message)),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("servlet client user agent required");
        }
        let base = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url =
            Url::parse(&base).with_context(|| format!("servlet: invalid base url {base}"))?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .cookie_store(true)
                .build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn authentication(&self) -> Result<AuthenticationInfo> {
        let body = self.request(Method::GET, "/authentication", &[])?;
        decode_body(&body).context("servlet: authentication")
    }

    pub fn fetch_listings(&self, query: &SearchQuery) -> Result<Vec<Listing>> {
        let body = self.request(Method::GET, "/fetch-listings", &query.to_params())?;
        decode_body(&body).context("servlet: fetch listings")
    }

    pub fn fetch_listing(&self, key: &str) -> Result<Listing> {
        let params = [(LISTING_KEY_PARAM.to_string(), key.to_string())];
        let body = self.request(Method::GET, "/fetch-listing", &params)?;
        decode_body(&body).context("servlet: fetch listing")
    }

    pub fn fetch_user(&self) -> Result<User> {
        let body = self.request(Method::GET, "/fetch-user", &[])?;
        decode_body(&body).context("servlet: fetch user")
    }

    pub fn fetch_user_listings(&self, keys: &[String]) -> Result<Vec<Listing>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let params = [("listing-keys".to_string(), keys.join(","))];
        let body = self.request(Method::GET, "/fetch-user-listings", &params)?;
        decode_body(&body).context("servlet: fetch user listings")
    }

    /// Records a vote. The response body is not inspected.
    pub fn update_reputation(&self, vote: Vote, key: &str) -> Result<()> {
        let params = [
            ("key".to_string(), key.to_string()),
            ("vote".to_string(), vote.as_str().to_string()),
        ];
        self.request(Method::POST, "/reputation", &params)?;
        Ok(())
    }

    pub fn delete_listing(&self, key: &str) -> Result<()> {
        let params = [(LISTING_KEY_PARAM.to_string(), key.to_string())];
        let body = self.request(Method::POST, "/delete-listing", &params)?;
        expect_success(&body).context("servlet: delete listing")
    }

    /// Asks the blobstore for a one-shot upload URL that forwards to `servlet_path`.
    pub fn blobstore_upload_url(&self, servlet_path: &str) -> Result<Url> {
        let params = [("servlet-url".to_string(), servlet_path.to_string())];
        let body = self.request(Method::GET, "/blobstore-upload-url", &params)?;
        let raw: String = decode_body(&body).context("servlet: blobstore upload url")?;
        match Url::parse(&raw) {
            Ok(url) => Ok(url),
            Err(_) => self
                .base_url
                .join(&raw)
                .with_context(|| format!("servlet: invalid upload url {raw}")),
        }
    }

    /// Creates a listing, or updates the listing `key` when given.
    pub fn submit_listing(&self, listing: &NewListing, key: Option<&str>) -> Result<()> {
        let servlet_path = match key {
            Some(_) => UPDATE_LISTING_PATH,
            None => CREATE_LISTING_PATH,
        };
        let body = self.post_form(servlet_path, listing, key)?;
        expect_success(&body).context("servlet: submit listing")
    }

    /// Renders the form server-side without storing it.
    pub fn preview_listing(&self, listing: &NewListing, key: Option<&str>) -> Result<Vec<Listing>> {
        let servlet_path = match key {
            Some(_) => UPDATE_PREVIEW_PATH,
            None => CREATE_PREVIEW_PATH,
        };
        let body = self.post_form(servlet_path, listing, key)?;
        let preview: PreviewBody = decode_body(&body).context("servlet: preview listing")?;
        Ok(match preview {
            PreviewBody::Pair(listings) => listings,
            PreviewBody::Single(listing) => vec![*listing],
        })
    }

    fn post_form(&self, servlet_path: &str, listing: &NewListing, key: Option<&str>) -> Result<String> {
        let upload_url = self.blobstore_upload_url(servlet_path)?;
        let form = build_form(listing, key)?;

        tracing::info!(servlet = servlet_path, "posting listing form");
        let resp = self
            .http
            .post(upload_url)
            .header(USER_AGENT, self.user_agent.clone())
            .header(ACCEPT, "application/json")
            .multipart(form)
            .send()?;
        check_status(resp)
    }

    fn request(&self, method: Method, path: &str, params: &[(String, String)]) -> Result<String> {
        let mut url = self.base_url.join(path)?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }

        tracing::debug!(%method, %url, "servlet request");
        let resp = self
            .http
            .request(method, url)
            .header(USER_AGENT, self.user_agent.clone())
            .header(ACCEPT, "application/json")
            .send()?;
        check_status(resp)
    }
}

fn check_status(resp: Response) -> Result<String> {
    let status = resp.status();
    let body = resp.text().unwrap_or_default();
    if status.is_success() {
        Ok(body)
    } else {
        Err(ServletError::Http {
            status: status.as_u16(),
            body,
        }
        .into())
    }
}

fn build_form(listing: &NewListing, key: Option<&str>) -> Result<Form> {
    let mut form = Form::new();
    for (name, value) in listing.text_fields() {
        form = form.text(name, value);
    }
    if let Some(key) = key {
        form = form.text(LISTING_KEY_PARAM, key.to_string());
    }
    if let Some(path) = listing.image.as_ref() {
        let bytes = fs::read(path)
            .with_context(|| format!("servlet: read image {}", path.display()))?;
        let mime = tree_magic_mini::from_u8(&bytes);
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "image".to_string());
        let part = Part::bytes(bytes).file_name(file_name).mime_str(mime)?;
        form = form.part("image", part);
    }
    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_error_messages() {
        assert!(is_error_message("Servlet Error: listing not found"));
        assert!(!is_error_message("Servlet Success"));
        assert!(!is_error_message("Servlet Error:"));
        assert!(!is_error_message("error: Servlet Error: nested"));
    }

    #[test]
    fn classifies_sentinels() {
        assert_eq!(ServletMessage::classify("Servlet Success"), ServletMessage::Success);
        assert_eq!(
            ServletMessage::classify("Servlet Error: User is not logged in."),
            ServletMessage::Error("Servlet Error: User is not logged in.".into())
        );
        assert_eq!(
            ServletMessage::classify("ok"),
            ServletMessage::Unrecognized("ok".into())
        );
    }

    #[test]
    fn decode_body_surfaces_error_sentinel() {
        let err = decode_body::<Vec<Listing>>("\"Servlet Error: bad key\"\n").unwrap_err();
        assert!(matches!(err, ServletError::Servlet(ref m) if m == "Servlet Error: bad key"));
    }

    #[test]
    fn decode_body_reads_plain_strings() {
        let url: String = decode_body("\"/_ah/upload/abc\"").unwrap();
        assert_eq!(url, "/_ah/upload/abc");
    }

    #[test]
    fn expect_success_accepts_json_and_bare_sentinels() {
        assert!(expect_success("\"Servlet Success\"\n").is_ok());
        assert!(expect_success("Servlet Success").is_ok());
        assert!(matches!(
            expect_success("\"Servlet Error: nope\""),
            Err(ServletError::Servlet(_))
        ));
        assert!(matches!(
            expect_success("[1, 2]"),
            Err(ServletError::Unrecognized(_))
        ));
    }

    #[test]
    fn preview_body_accepts_one_or_two_listings() {
        let single: PreviewBody =
            decode_body(r#"{"name": "Coat drive", "type": "event", "upvotes": 0}"#).unwrap();
        assert!(matches!(single, PreviewBody::Single(ref l) if l.name == "Coat drive"));

        let pair: PreviewBody =
            decode_body(r#"[{"key": "k1", "name": "Old"}, {"key": "k1", "name": "New"}]"#).unwrap();
        assert!(matches!(pair, PreviewBody::Pair(ref l) if l.len() == 2 && l[1].name == "New"));
    }

    #[test]
    fn client_requires_user_agent() {
        assert!(Client::new(ClientConfig::default()).is_err());
    }
}
