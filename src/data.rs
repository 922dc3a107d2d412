use anyhow::{bail, Context, Result};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::listing::{AuthenticationInfo, Listing, ListingType, NewListing, User};
use crate::reputation::{reduce, ReputationState, Vote};
use crate::search::SearchQuery;
use crate::servlet;

pub trait AuthService: Send + Sync {
    fn authenticate(&self) -> Result<AuthenticationInfo>;
}

pub trait ListingService: Send + Sync {
    fn search(&self, query: &SearchQuery) -> Result<Vec<Listing>>;
    fn listing(&self, key: &str) -> Result<Listing>;
    fn user_listings(&self, keys: &[String]) -> Result<Vec<Listing>>;
    fn submit(&self, listing: &NewListing, key: Option<&str>) -> Result<()>;
    /// The listing as it would look once submitted. Updates return the
    /// stored listing first and the edited one second.
    fn preview(&self, listing: &NewListing, key: Option<&str>) -> Result<Vec<Listing>>;
    fn delete(&self, key: &str) -> Result<()>;
}

pub trait UserService: Send + Sync {
    fn current_user(&self) -> Result<User>;
}

pub trait ReputationService: Send + Sync {
    fn update_reputation(&self, vote: Vote, key: &str) -> Result<()>;
}

pub struct ServletAuthService {
    client: Arc<servlet::Client>,
}

impl ServletAuthService {
    pub fn new(client: Arc<servlet::Client>) -> Self {
        Self { client }
    }
}

impl AuthService for ServletAuthService {
    fn authenticate(&self) -> Result<AuthenticationInfo> {
        self.client.authentication().context("check authentication")
    }
}

pub struct ServletListingService {
    client: Arc<servlet::Client>,
}

impl ServletListingService {
    pub fn new(client: Arc<servlet::Client>) -> Self {
        Self { client }
    }
}

impl ListingService for ServletListingService {
    fn search(&self, query: &SearchQuery) -> Result<Vec<Listing>> {
        self.client.fetch_listings(query).context("fetch listings")
    }

    fn listing(&self, key: &str) -> Result<Listing> {
        self.client.fetch_listing(key).context("fetch listing")
    }

    fn user_listings(&self, keys: &[String]) -> Result<Vec<Listing>> {
        self.client
            .fetch_user_listings(keys)
            .context("fetch user listings")
    }

    fn submit(&self, listing: &NewListing, key: Option<&str>) -> Result<()> {
        self.client
            .submit_listing(listing, key)
            .context("submit listing")
    }

    fn preview(&self, listing: &NewListing, key: Option<&str>) -> Result<Vec<Listing>> {
        self.client
            .preview_listing(listing, key)
            .context("preview listing")
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.client.delete_listing(key).context("delete listing")
    }
}

pub struct ServletUserService {
    client: Arc<servlet::Client>,
}

impl ServletUserService {
    pub fn new(client: Arc<servlet::Client>) -> Self {
        Self { client }
    }
}

impl UserService for ServletUserService {
    fn current_user(&self) -> Result<User> {
        self.client.fetch_user().context("fetch user")
    }
}

pub struct ServletReputationService {
    client: Arc<servlet::Client>,
}

impl ServletReputationService {
    pub fn new(client: Arc<servlet::Client>) -> Self {
        Self { client }
    }
}

impl ReputationService for ServletReputationService {
    fn update_reputation(&self, vote: Vote, key: &str) -> Result<()> {
        self.client.update_reputation(vote, key)
    }
}

#[derive(Default)]
pub struct MockAuthService;

impl AuthService for MockAuthService {
    fn authenticate(&self) -> Result<AuthenticationInfo> {
        Ok(AuthenticationInfo {
            user_is_logged_in: true,
            user_is_admin: false,
            user_email: Some("demo@example.org".into()),
            login_link: None,
            logout_link: Some("http://localhost:8080/_ah/logout".into()),
        })
    }
}

struct Board {
    listings: Vec<Listing>,
    next_key: u64,
}

impl Board {
    fn seeded() -> Self {
        let listings = mock_listings();
        let next_key = listings.len() as u64 + 1;
        Self { listings, next_key }
    }

    fn allocate_key(&mut self) -> String {
        let key = format!("demo-{}", self.next_key);
        self.next_key += 1;
        key
    }
}

/// In-memory listing board used by `--demo`.
pub struct MockListingService {
    board: Arc<RwLock<Board>>,
}

impl Default for MockListingService {
    fn default() -> Self {
        Self {
            board: Arc::new(RwLock::new(Board::seeded())),
        }
    }
}

impl MockListingService {
    /// A reputation service that records votes on this board.
    pub fn reputation_service(&self) -> MockReputationService {
        MockReputationService {
            board: Arc::clone(&self.board),
        }
    }
}

impl ListingService for MockListingService {
    fn search(&self, query: &SearchQuery) -> Result<Vec<Listing>> {
        let board = self.board.read();
        Ok(board
            .listings
            .iter()
            .filter(|listing| {
                query.type_filters.is_empty() || query.is_selected(listing.listing_type)
            })
            .cloned()
            .collect())
    }

    fn listing(&self, key: &str) -> Result<Listing> {
        match self.board.read().listings.iter().find(|l| l.key == key) {
            Some(listing) => Ok(listing.clone()),
            None => bail!("Servlet Error: listing {key} not found"),
        }
    }

    fn user_listings(&self, keys: &[String]) -> Result<Vec<Listing>> {
        Ok(self
            .board
            .read()
            .listings
            .iter()
            .filter(|listing| keys.contains(&listing.key))
            .cloned()
            .collect())
    }

    fn submit(&self, form: &NewListing, key: Option<&str>) -> Result<()> {
        let mut board = self.board.write();
        match key {
            Some(key) => {
                let Some(existing) = board.listings.iter_mut().find(|l| l.key == key) else {
                    bail!("Servlet Error: listing {key} not found");
                };
                apply_form(existing, form);
            }
            None => {
                let mut listing = fresh_listing(form);
                listing.key = board.allocate_key();
                board.listings.push(listing);
            }
        }
        Ok(())
    }

    fn preview(&self, form: &NewListing, key: Option<&str>) -> Result<Vec<Listing>> {
        let errors = form.validate();
        if let Some(err) = errors.first() {
            bail!("Servlet Error: {err}");
        }
        match key {
            Some(key) => {
                let original = self.listing(key)?;
                let mut updated = original.clone();
                apply_form(&mut updated, form);
                Ok(vec![original, updated])
            }
            None => Ok(vec![fresh_listing(form)]),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut board = self.board.write();
        let before = board.listings.len();
        board.listings.retain(|listing| listing.key != key);
        if board.listings.len() == before {
            bail!("Servlet Error: listing {key} not found");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockUserService;

impl UserService for MockUserService {
    fn current_user(&self) -> Result<User> {
        Ok(User {
            username: "Demo Organizer".into(),
            email: "demo@example.org".into(),
            bio: "Sample profile provided for offline browsing.".into(),
            created_listing_keys: "demo-1,demo-3".into(),
            upvoted_listing_keys: "demo-2".into(),
        })
    }
}

/// Applies votes to a [`MockListingService`] board the way the servlet
/// stores them, so a reload shows the vote again.
pub struct MockReputationService {
    board: Arc<RwLock<Board>>,
}

impl ReputationService for MockReputationService {
    fn update_reputation(&self, vote: Vote, key: &str) -> Result<()> {
        let mut board = self.board.write();
        let Some(listing) = board.listings.iter_mut().find(|l| l.key == key) else {
            bail!("Servlet Error: listing {key} not found");
        };
        // A neutral submission clears whichever control was clicked before.
        let Some(control) = vote.clicked_control().or(listing.vote.clicked_control()) else {
            return Ok(());
        };
        if listing.vote == vote {
            return Ok(());
        }
        let state = ReputationState::seed(key, listing.vote, listing.upvotes, listing.downvotes);
        let next = reduce(&state, control).state;
        listing.vote = next.vote;
        listing.upvotes = next.upvotes;
        listing.downvotes = next.downvotes;
        tracing::debug!(key, vote = %vote, "mock reputation update");
        Ok(())
    }
}

fn apply_form(listing: &mut Listing, form: &NewListing) {
    listing.name = form.name.trim().to_string();
    listing.listing_type = form.listing_type.unwrap_or(listing.listing_type);
    listing.location = form.location.trim().to_string();
    listing.description = form.description.trim().to_string();
    listing.how_to_help = form.how_to_help.trim().to_string();
    listing.website = form.website.trim().to_string();
    listing.tags = form.tags.trim().to_lowercase();
}

fn fresh_listing(form: &NewListing) -> Listing {
    let mut listing = Listing {
        image_url: crate::listing::DEFAULT_IMAGE_URL.to_string(),
        timestamp: Some(chrono::Utc::now().timestamp_millis()),
        is_owner_user: true,
        ..Listing::default()
    };
    apply_form(&mut listing, form);
    listing
}

fn mock_listings() -> Vec<Listing> {
    let sample = |key: &str, name: &str, listing_type: ListingType, vote: Vote| Listing {
        key: key.into(),
        name: name.into(),
        listing_type,
        location: "Pittsburgh, PA".into(),
        description: format!("{name} needs volunteers and donations this month."),
        how_to_help: "Share the listing and sign up on the website.".into(),
        website: "https://example.org".into(),
        image_url: crate::listing::DEFAULT_IMAGE_URL.into(),
        tags: "community,local".into(),
        timestamp: Some(1_596_240_000_000),
        views: 40,
        upvotes: 12,
        downvotes: 1,
        vote,
        is_owner_user: key != "demo-2",
        ..Listing::default()
    };

    vec![
        sample("demo-1", "Neighborhood food drive", ListingType::Fundraiser, Vote::Neutral),
        sample("demo-2", "Save the riverside park", ListingType::Petition, Vote::Upvote),
        sample("demo-3", "Community cleanup day", ListingType::Event, Vote::Downvote),
        sample("demo-4", "Tool lending library", ListingType::Other, Vote::Neutral),
    ]
}
