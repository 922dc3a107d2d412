use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::reputation::Vote;

pub const MAX_NAME_LEN: usize = 50;
pub const MAX_CONTENT_LEN: usize = 256;
pub const MAX_LOCATION_LEN: usize = 256;
pub const MAX_TAGS_LEN: usize = 256;
pub const DEFAULT_IMAGE_URL: &str = "https://i.imgur.com/wE5wDVZ.png";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ListingType {
    #[default]
    Fundraiser,
    Petition,
    Event,
    Other,
}

impl ListingType {
    pub const ALL: [ListingType; 4] = [
        ListingType::Fundraiser,
        ListingType::Petition,
        ListingType::Event,
        ListingType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ListingType::Fundraiser => "fundraiser",
            ListingType::Petition => "petition",
            ListingType::Event => "event",
            ListingType::Other => "other",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ListingType::Fundraiser => "Fundraiser",
            ListingType::Petition => "Petition",
            ListingType::Event => "Event",
            ListingType::Other => "Other",
        }
    }

    /// Code used by the `type-filters` search parameter.
    pub fn filter_code(&self) -> u8 {
        match self {
            ListingType::Fundraiser => 1,
            ListingType::Petition => 2,
            ListingType::Event => 3,
            ListingType::Other => 4,
        }
    }

    pub fn next(&self) -> ListingType {
        let index = Self::ALL.iter().position(|t| t == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }

    pub fn previous(&self) -> ListingType {
        let index = Self::ALL.iter().position(|t| t == self).unwrap_or(0);
        Self::ALL[(index + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

impl fmt::Display for ListingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub listing_type: ListingType,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub how_to_help: String,
    #[serde(default)]
    pub website: String,
    #[serde(default, rename = "imageURL")]
    pub image_url: String,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub date_created: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub upvotes: u64,
    #[serde(default)]
    pub downvotes: u64,
    #[serde(default)]
    pub vote: Vote,
    #[serde(default)]
    pub is_owner_user: bool,
}

impl Listing {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        if let Some(millis) = self.timestamp {
            return Utc.timestamp_millis_opt(millis).single();
        }
        DateTime::parse_from_rfc3339(&self.date_created)
            .ok()
            .map(|date| date.with_timezone(&Utc))
    }

    pub fn created_label(&self) -> String {
        match self.created_at() {
            Some(date) => date.format("%b %-d, %Y").to_string(),
            None => self.date_created.clone(),
        }
    }

    pub fn tag_list(&self) -> Vec<String> {
        split_list(&self.tags)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub created_listing_keys: String,
    #[serde(default)]
    pub upvoted_listing_keys: String,
}

impl User {
    pub fn created_keys(&self) -> Vec<String> {
        split_list(&self.created_listing_keys)
    }

    pub fn upvoted_keys(&self) -> Vec<String> {
        split_list(&self.upvoted_listing_keys)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationInfo {
    #[serde(deserialize_with = "bool_from_flag")]
    pub user_is_logged_in: bool,
    #[serde(default, deserialize_with = "bool_from_flag")]
    pub user_is_admin: bool,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub login_link: Option<String>,
    #[serde(default)]
    pub logout_link: Option<String>,
}

impl AuthenticationInfo {
    /// Label and target of the login/logout link shown in the header.
    pub fn link(&self) -> Option<(&'static str, &str)> {
        if self.user_is_logged_in {
            self.logout_link.as_deref().map(|url| ("Logout", url))
        } else {
            self.login_link.as_deref().map(|url| ("Login", url))
        }
    }
}

// The servlet sends "true"/"false" strings; accept real booleans too.
fn bool_from_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Text(text) => text.trim().eq_ignore_ascii_case("true"),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Name,
    Type,
    Location,
    Description,
    HowToHelp,
    Website,
    Tags,
    Image,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Name,
        Field::Type,
        Field::Location,
        Field::Description,
        Field::HowToHelp,
        Field::Website,
        Field::Tags,
        Field::Image,
    ];

    /// Multipart form parameter name.
    pub fn param(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Type => "type",
            Field::Location => "location",
            Field::Description => "description",
            Field::HowToHelp => "howToHelp",
            Field::Website => "website",
            Field::Tags => "tags",
            Field::Image => "image",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Field::Name => "Name",
            Field::Type => "Type",
            Field::Location => "Location",
            Field::Description => "Description",
            Field::HowToHelp => "How to help",
            Field::Website => "Website",
            Field::Tags => "Tags",
            Field::Image => "Image file",
        }
    }

    /// Character limit shown as a remaining count while typing.
    pub fn max_len(&self) -> Option<usize> {
        match self {
            Field::Name => Some(MAX_NAME_LEN),
            Field::Description | Field::HowToHelp => Some(MAX_CONTENT_LEN),
            Field::Tags => Some(MAX_TAGS_LEN),
            _ => None,
        }
    }

    /// Fields an edit can revert to the stored listing's value.
    pub fn is_revertible(&self) -> bool {
        matches!(
            self,
            Field::Name | Field::Location | Field::Description | Field::HowToHelp | Field::Tags
        )
    }
}

/// Words never offered as tags.
const TAG_STOPWORDS: [&str; 10] = ["and", "a", "an", "the", "at", "to", "this", "is", "in", "for"];

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("{0} is required")]
    Missing(Field),
    #[error("{field} must be at most {max} characters")]
    TooLong { field: Field, max: usize },
    #[error("website must be an http(s) URL")]
    InvalidWebsite,
    #[error("image {path}: {reason}")]
    InvalidImage { path: String, reason: String },
}

impl FieldError {
    pub fn field(&self) -> Field {
        match self {
            FieldError::Missing(field) => *field,
            FieldError::TooLong { field, .. } => *field,
            FieldError::InvalidWebsite => Field::Website,
            FieldError::InvalidImage { .. } => Field::Image,
        }
    }
}

/// Contents of the new/update listing form.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewListing {
    pub name: String,
    pub listing_type: Option<ListingType>,
    pub location: String,
    pub description: String,
    pub how_to_help: String,
    pub website: String,
    pub tags: String,
    pub image: Option<PathBuf>,
}

impl NewListing {
    pub fn from_listing(listing: &Listing) -> Self {
        Self {
            name: listing.name.clone(),
            listing_type: Some(listing.listing_type),
            location: listing.location.clone(),
            description: listing.description.clone(),
            how_to_help: listing.how_to_help.clone(),
            website: listing.website.clone(),
            tags: listing.tags.clone(),
            image: None,
        }
    }

    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        check_text(&mut errors, Field::Name, &self.name, MAX_NAME_LEN);
        if self.listing_type.is_none() {
            errors.push(FieldError::Missing(Field::Type));
        }
        check_text(&mut errors, Field::Location, &self.location, MAX_LOCATION_LEN);
        check_text(
            &mut errors,
            Field::Description,
            &self.description,
            MAX_CONTENT_LEN,
        );
        check_text(
            &mut errors,
            Field::HowToHelp,
            &self.how_to_help,
            MAX_CONTENT_LEN,
        );
        check_text(&mut errors, Field::Tags, &self.tags, MAX_TAGS_LEN);

        let website = self.website.trim();
        if !website.is_empty() {
            let valid = Url::parse(website)
                .map(|url| matches!(url.scheme(), "http" | "https"))
                .unwrap_or(false);
            if !valid {
                errors.push(FieldError::InvalidWebsite);
            }
        }

        if let Some(path) = self.image.as_ref() {
            if let Err(reason) = check_image(path) {
                errors.push(FieldError::InvalidImage {
                    path: path.display().to_string(),
                    reason,
                });
            }
        }

        errors
    }

    pub fn text(&self, field: Field) -> Option<&str> {
        match field {
            Field::Name => Some(&self.name),
            Field::Location => Some(&self.location),
            Field::Description => Some(&self.description),
            Field::HowToHelp => Some(&self.how_to_help),
            Field::Website => Some(&self.website),
            Field::Tags => Some(&self.tags),
            Field::Type | Field::Image => None,
        }
    }

    fn text_mut(&mut self, field: Field) -> Option<&mut String> {
        match field {
            Field::Name => Some(&mut self.name),
            Field::Location => Some(&mut self.location),
            Field::Description => Some(&mut self.description),
            Field::HowToHelp => Some(&mut self.how_to_help),
            Field::Website => Some(&mut self.website),
            Field::Tags => Some(&mut self.tags),
            Field::Type | Field::Image => None,
        }
    }

    /// Characters left before `field` hits its limit; negative once over.
    pub fn remaining(&self, field: Field) -> Option<i64> {
        let max = field.max_len()?;
        let used = self.text(field)?.chars().count();
        Some(max as i64 - used as i64)
    }

    /// Copies `field` back from `original`. Returns false when nothing changed.
    pub fn revert(&mut self, field: Field, original: &NewListing) -> bool {
        if !field.is_revertible() {
            return false;
        }
        let (Some(target), Some(value)) = (self.text_mut(field), original.text(field)) else {
            return false;
        };
        if *target == *value {
            return false;
        }
        *target = value.to_string();
        true
    }

    /// Tag suggestions: the parts of the location, then words used more
    /// than once across name, description and how-to-help. Tags already
    /// entered are skipped.
    pub fn suggest_tags(&self) -> Vec<String> {
        let current: Vec<String> = split_list(&self.tags.to_lowercase());
        let mut suggestions: Vec<String> = Vec::new();
        let offer = |tag: &str, suggestions: &mut Vec<String>| {
            if !tag.is_empty()
                && !current.iter().any(|t| t == tag)
                && !suggestions.iter().any(|t| t == tag)
            {
                suggestions.push(tag.to_string());
            }
        };

        for part in self.location.to_lowercase().split(',') {
            offer(part.trim(), &mut suggestions);
        }

        let text = [&self.name, &self.description, &self.how_to_help]
            .iter()
            .map(|value| value.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        let mut counts: Vec<(&str, usize)> = Vec::new();
        for word in text
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|word| !word.is_empty() && !TAG_STOPWORDS.contains(word))
        {
            match counts.iter_mut().find(|(seen, _)| *seen == word) {
                Some((_, count)) => *count += 1,
                None => counts.push((word, 1)),
            }
        }
        for (word, count) in counts {
            if count > 1 {
                offer(word, &mut suggestions);
            }
        }
        suggestions
    }

    /// Appends `tag` to the comma-separated tag list.
    pub fn add_tag(&mut self, tag: &str) {
        let existing = self.tags.trim_end();
        if existing.is_empty() || existing.ends_with(',') {
            self.tags = format!("{existing}{tag}");
        } else {
            self.tags = format!("{existing}, {tag}");
        }
    }

    /// Text parts of the multipart submission, in form order.
    pub fn text_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (Field::Name.param(), self.name.trim().to_string()),
            (
                Field::Type.param(),
                self.listing_type
                    .map(|t| t.as_str().to_string())
                    .unwrap_or_default(),
            ),
            (Field::Location.param(), self.location.trim().to_string()),
            (Field::Description.param(), self.description.trim().to_string()),
            (Field::HowToHelp.param(), self.how_to_help.trim().to_string()),
            (Field::Website.param(), self.website.trim().to_string()),
            (Field::Tags.param(), self.tags.trim().to_lowercase()),
        ]
    }
}

fn check_text(errors: &mut Vec<FieldError>, field: Field, value: &str, max: usize) {
    let len = value.trim().chars().count();
    if len == 0 {
        errors.push(FieldError::Missing(field));
    } else if len > max {
        errors.push(FieldError::TooLong { field, max });
    }
}

fn check_image(path: &std::path::Path) -> std::result::Result<(), String> {
    if !path.is_file() {
        return Err("file not found".into());
    }
    let bytes = std::fs::read(path).map_err(|err| err.to_string())?;
    let format = image::guess_format(&bytes).map_err(|_| "not an image file".to_string())?;
    match format {
        image::ImageFormat::Png
        | image::ImageFormat::Jpeg
        | image::ImageFormat::Gif
        | image::ImageFormat::WebP => Ok(()),
        other => Err(format!("unsupported image format {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn filled() -> NewListing {
        NewListing {
            name: "Coat drive".into(),
            listing_type: Some(ListingType::Event),
            location: "Pittsburgh, PA".into(),
            description: "Collecting winter coats.".into(),
            how_to_help: "Drop off coats at the library.".into(),
            website: String::new(),
            tags: "Winter,Clothing".into(),
            image: None,
        }
    }

    #[test]
    fn listing_decodes_servlet_json() {
        let raw = r#"{
            "key": "agxzfmxpc3Rpbmdz",
            "name": "Coat drive",
            "type": "event",
            "location": "Pittsburgh, PA",
            "description": "Collecting winter coats.",
            "howToHelp": "Drop off coats.",
            "website": "https://example.org",
            "imageURL": "https://i.imgur.com/wE5wDVZ.png",
            "timestamp": 1596240000000,
            "views": 12,
            "upvotes": 5,
            "downvotes": 2,
            "vote": "upvote",
            "isOwnerUser": true
        }"#;
        let listing: Listing = serde_json::from_str(raw).unwrap();
        assert_eq!(listing.listing_type, ListingType::Event);
        assert_eq!(listing.how_to_help, "Drop off coats.");
        assert_eq!(listing.vote, Vote::Upvote);
        assert!(listing.is_owner_user);
        assert_eq!(listing.created_label(), "Aug 1, 2020");
    }

    #[test]
    fn listing_defaults_missing_fields() {
        let listing: Listing = serde_json::from_str(r#"{"key": "k"}"#).unwrap();
        assert_eq!(listing.vote, Vote::Neutral);
        assert_eq!(listing.upvotes, 0);
        assert!(!listing.is_owner_user);
    }

    #[test]
    fn authentication_reads_string_flags() {
        let raw = r#"{"userIsLoggedIn": "false", "userIsAdmin": "false", "loginLink": "/_ah/login"}"#;
        let info: AuthenticationInfo = serde_json::from_str(raw).unwrap();
        assert!(!info.user_is_logged_in);
        assert_eq!(info.link(), Some(("Login", "/_ah/login")));

        let raw = r#"{"userIsLoggedIn": "true", "userEmail": "a@b.c", "logoutLink": "/_ah/logout"}"#;
        let info: AuthenticationInfo = serde_json::from_str(raw).unwrap();
        assert!(info.user_is_logged_in);
        assert_eq!(info.link(), Some(("Logout", "/_ah/logout")));
    }

    #[test]
    fn user_splits_key_lists() {
        let user = User {
            created_listing_keys: "a, b,,c".into(),
            upvoted_listing_keys: " ".into(),
            ..User::default()
        };
        assert_eq!(user.created_keys(), vec!["a", "b", "c"]);
        assert!(user.upvoted_keys().is_empty());
    }

    #[test]
    fn validation_accepts_complete_form() {
        assert!(filled().validate().is_empty());
    }

    #[test]
    fn validation_enforces_name_length() {
        let mut form = filled();
        form.name = "x".repeat(MAX_NAME_LEN);
        assert!(form.validate().is_empty());
        form.name.push('x');
        assert_eq!(
            form.validate(),
            vec![FieldError::TooLong {
                field: Field::Name,
                max: MAX_NAME_LEN
            }]
        );
    }

    #[test]
    fn validation_reports_missing_fields() {
        let errors = NewListing::default().validate();
        let fields: Vec<Field> = errors.iter().map(FieldError::field).collect();
        assert_eq!(
            fields,
            vec![
                Field::Name,
                Field::Type,
                Field::Location,
                Field::Description,
                Field::HowToHelp,
                Field::Tags
            ]
        );
    }

    #[test]
    fn validation_checks_website_and_image() {
        let dir = tempdir().unwrap();
        let text = dir.path().join("notes.txt");
        std::fs::write(&text, "hello").unwrap();

        let mut form = filled();
        form.website = "ftp://example.org".into();
        form.image = Some(text);
        let errors = form.validate();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0], FieldError::InvalidWebsite);
        assert_eq!(errors[1].field(), Field::Image);
    }

    #[test]
    fn image_format_comes_from_file_contents() {
        let dir = tempdir().unwrap();
        let fake = dir.path().join("notes.png");
        std::fs::write(&fake, "just some text, not an image").unwrap();
        let mut form = filled();
        form.image = Some(fake);
        let errors = form.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field(), Field::Image);

        let real = dir.path().join("upload.bin");
        std::fs::write(&real, b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR").unwrap();
        form.image = Some(real);
        assert!(form.validate().is_empty());
    }

    #[test]
    fn remaining_counts_track_limits() {
        let mut form = filled();
        assert_eq!(form.remaining(Field::Name), Some(40));
        assert_eq!(form.remaining(Field::Location), None);
        form.name = "x".repeat(MAX_NAME_LEN + 3);
        assert_eq!(form.remaining(Field::Name), Some(-3));
    }

    #[test]
    fn tag_suggestions_use_location_and_repeated_words() {
        let form = NewListing {
            name: "Winter coat drive".into(),
            location: "Pittsburgh, PA".into(),
            description: "Collecting winter coats for the winter shelter.".into(),
            how_to_help: "Drop off a coat at the shelter.".into(),
            tags: "Winter".into(),
            ..NewListing::default()
        };
        assert_eq!(form.suggest_tags(), vec!["pittsburgh", "pa", "coat", "shelter"]);
    }

    #[test]
    fn add_tag_keeps_comma_list_tidy() {
        let mut form = NewListing::default();
        form.add_tag("food");
        assert_eq!(form.tags, "food");
        form.add_tag("local");
        assert_eq!(form.tags, "food, local");
        form.tags = "food,".into();
        form.add_tag("local");
        assert_eq!(form.tags, "food,local");
    }

    #[test]
    fn revert_restores_stored_values() {
        let original = filled();
        let mut form = original.clone();
        form.name = "Renamed".into();
        form.website = "https://example.org".into();

        assert!(form.revert(Field::Name, &original));
        assert_eq!(form.name, "Coat drive");
        assert!(!form.revert(Field::Name, &original));
        assert!(!form.revert(Field::Website, &original));
        assert_eq!(form.website, "https://example.org");
    }

    #[test]
    fn text_fields_lowercase_tags() {
        let fields = filled().text_fields();
        assert!(fields.contains(&("tags", "winter,clothing".to_string())));
        assert!(fields.contains(&("type", "event".to_string())));
    }
}
