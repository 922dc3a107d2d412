use std::io::{self, Stdout};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use parking_lot::Mutex;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Tabs, Wrap};
use ratatui::{Frame, Terminal};
use unicode_width::UnicodeWidthStr;
use url::Url;

use crate::config;
use crate::data::{AuthService, ListingService, ReputationService, UserService};
use crate::listing::{
    AuthenticationInfo, Field, FieldError, Listing, ListingType, NewListing, User,
};
use crate::reputation::{Vote, VoteControl};
use crate::search::SearchQuery;
use crate::view::{self, Element, ElementVoteView};
use crate::widget::{Instance, SharedWidget, ViewId, WidgetRegistry};

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Page {
    Search,
    Detail,
    Profile,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum CardList {
    Search,
    Profile,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ProfileTab {
    Created,
    Upvoted,
}

impl ProfileTab {
    fn title(&self) -> &'static str {
        match self {
            ProfileTab::Created => "Created Listings",
            ProfileTab::Upvoted => "Upvoted Listings",
        }
    }

    fn index(&self) -> usize {
        match self {
            ProfileTab::Created => 0,
            ProfileTab::Upvoted => 1,
        }
    }

    fn toggle(&self) -> ProfileTab {
        match self {
            ProfileTab::Created => ProfileTab::Upvoted,
            ProfileTab::Upvoted => ProfileTab::Created,
        }
    }

    fn keys(&self, user: &User) -> Vec<String> {
        match self {
            ProfileTab::Created => user.created_keys(),
            ProfileTab::Upvoted => user.upvoted_keys(),
        }
    }
}

/// One listing on screen: its preview and detailed elements, both bound to
/// the listing's shared vote widget.
struct ListingCard {
    listing: Listing,
    preview: Arc<Mutex<Element>>,
    detailed: Arc<Mutex<Element>>,
    widget: SharedWidget,
    view_ids: Vec<ViewId>,
}

impl ListingCard {
    fn bind(listing: Listing, registry: &WidgetRegistry) -> Self {
        let preview = Arc::new(Mutex::new(view::listing_preview(&listing)));
        let detailed = Arc::new(Mutex::new(view::listing_detailed(&listing)));
        let widget = registry.refresh(&listing);
        let view_ids = {
            let mut widget = widget.lock();
            vec![
                widget.subscribe(Box::new(ElementVoteView::new(
                    Instance::Preview,
                    listing.key.clone(),
                    Arc::clone(&preview),
                ))),
                widget.subscribe(Box::new(ElementVoteView::new(
                    Instance::Detailed,
                    listing.key.clone(),
                    Arc::clone(&detailed),
                ))),
            ]
        };
        Self {
            listing,
            preview,
            detailed,
            widget,
            view_ids,
        }
    }

    fn unbind(self, registry: &WidgetRegistry) {
        registry.detach(&self.listing.key, &self.view_ids);
    }
}

struct ListingForm {
    editing: Option<String>,
    original: Option<NewListing>,
    values: NewListing,
    image_input: String,
    active: usize,
    errors: Vec<FieldError>,
    submitting: bool,
    previewing: bool,
    preview: Option<Vec<Listing>>,
}

impl ListingForm {
    fn create() -> Self {
        Self {
            editing: None,
            original: None,
            values: NewListing::default(),
            image_input: String::new(),
            active: 0,
            errors: Vec::new(),
            submitting: false,
            previewing: false,
            preview: None,
        }
    }

    fn edit(listing: &Listing) -> Self {
        let values = NewListing::from_listing(listing);
        Self {
            editing: Some(listing.key.clone()),
            original: Some(values.clone()),
            values,
            ..Self::create()
        }
    }

    fn is_busy(&self) -> bool {
        self.submitting || self.previewing
    }

    fn title(&self) -> &'static str {
        if self.editing.is_some() {
            "Edit listing"
        } else {
            "New listing"
        }
    }

    fn active_field(&self) -> Field {
        Field::ALL[self.active.min(Field::ALL.len() - 1)]
    }

    fn is_last_field(&self) -> bool {
        self.active + 1 >= Field::ALL.len()
    }

    fn next(&mut self) {
        self.active = (self.active + 1) % Field::ALL.len();
    }

    fn previous(&mut self) {
        self.active = (self.active + Field::ALL.len() - 1) % Field::ALL.len();
    }

    fn focus(&mut self, field: Field) {
        if let Some(index) = Field::ALL.iter().position(|f| *f == field) {
            self.active = index;
        }
    }

    fn value_mut(&mut self) -> Option<&mut String> {
        match self.active_field() {
            Field::Name => Some(&mut self.values.name),
            Field::Type => None,
            Field::Location => Some(&mut self.values.location),
            Field::Description => Some(&mut self.values.description),
            Field::HowToHelp => Some(&mut self.values.how_to_help),
            Field::Website => Some(&mut self.values.website),
            Field::Tags => Some(&mut self.values.tags),
            Field::Image => Some(&mut self.image_input),
        }
    }

    fn display_value(&self, field: Field) -> String {
        match field {
            Field::Name => self.values.name.clone(),
            Field::Type => match self.values.listing_type {
                Some(listing_type) => format!("< {} >", listing_type.label()),
                None => "(←/→ to choose)".to_string(),
            },
            Field::Location => self.values.location.clone(),
            Field::Description => self.values.description.clone(),
            Field::HowToHelp => self.values.how_to_help.clone(),
            Field::Website => self.values.website.clone(),
            Field::Tags => self.values.tags.clone(),
            Field::Image => self.image_input.clone(),
        }
    }

    fn insert_char(&mut self, ch: char) {
        if self.active_field() == Field::Type {
            if ch == ' ' {
                self.cycle_type(true);
            }
            return;
        }
        if let Some(value) = self.value_mut() {
            value.push(ch);
            self.preview = None;
        }
    }

    fn backspace(&mut self) {
        if let Some(value) = self.value_mut() {
            value.pop();
            self.preview = None;
        }
    }

    fn cycle_type(&mut self, forward: bool) {
        self.values.listing_type = Some(match self.values.listing_type {
            None => ListingType::default(),
            Some(current) if forward => current.next(),
            Some(current) => current.previous(),
        });
        self.preview = None;
    }

    /// Puts the active field back to the stored listing's value.
    fn revert_active(&mut self) -> bool {
        let field = self.active_field();
        let Some(original) = self.original.as_ref() else {
            return false;
        };
        let reverted = self.values.revert(field, original);
        if reverted {
            self.errors.retain(|err| err.field() != field);
            self.preview = None;
        }
        reverted
    }

    fn accept_tag_suggestion(&mut self) -> Option<String> {
        let tag = self.values.suggest_tags().into_iter().next()?;
        self.values.add_tag(&tag);
        self.preview = None;
        Some(tag)
    }

    /// Validates the form, keeping the errors for display.
    fn prepare(&mut self) -> bool {
        let image = self.image_input.trim();
        self.values.image = if image.is_empty() {
            None
        } else {
            Some(PathBuf::from(image))
        };
        self.errors = self.values.validate();
        if let Some(first) = self.errors.first() {
            let field = first.field();
            self.focus(field);
            return false;
        }
        true
    }

    fn errors_for(&self, field: Field) -> impl Iterator<Item = &FieldError> {
        self.errors.iter().filter(move |err| err.field() == field)
    }
}

enum AsyncResponse {
    Auth {
        result: Result<AuthenticationInfo>,
    },
    Listings {
        request_id: u64,
        result: Result<Vec<Listing>>,
    },
    User {
        result: Result<User>,
    },
    UserListings {
        request_id: u64,
        result: Result<Vec<Listing>>,
    },
    EditListing {
        result: Result<Listing>,
    },
    Submitted {
        editing: Option<String>,
        result: Result<()>,
    },
    Previewed {
        result: Result<Vec<Listing>>,
    },
    Deleted {
        key: String,
        name: String,
        result: Result<()>,
    },
}

#[derive(Clone)]
pub struct Options {
    pub status_message: String,
    pub query: SearchQuery,
    pub auth_service: Arc<dyn AuthService>,
    pub listing_service: Arc<dyn ListingService>,
    pub user_service: Arc<dyn UserService>,
    pub reputation_service: Arc<dyn ReputationService>,
    pub base_url: Option<Url>,
    pub config_path: Option<PathBuf>,
}

pub struct Model {
    status_message: String,
    page: Page,
    detail_from: CardList,
    detail_scroll: u16,
    query: SearchQuery,
    cards: Vec<ListingCard>,
    selected: usize,
    profile_user: Option<User>,
    profile_tab: ProfileTab,
    profile_cards: Vec<ListingCard>,
    profile_selected: usize,
    auth: Option<AuthenticationInfo>,
    form: Option<ListingForm>,
    location_input: Option<String>,
    confirm_delete: Option<(String, String)>,
    error: Option<String>,
    registry: WidgetRegistry,
    auth_service: Arc<dyn AuthService>,
    listing_service: Arc<dyn ListingService>,
    user_service: Arc<dyn UserService>,
    base_url: Option<Url>,
    config_path: Option<PathBuf>,
    needs_redraw: bool,
    spinner: Spinner,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
    in_flight: usize,
    next_request_id: u64,
    pending_listings: Option<u64>,
    pending_profile: Option<u64>,
}

impl Model {
    pub fn new(options: Options) -> Self {
        let (response_tx, response_rx) = unbounded();
        Self {
            status_message: options.status_message,
            page: Page::Search,
            detail_from: CardList::Search,
            detail_scroll: 0,
            query: options.query,
            cards: Vec::new(),
            selected: 0,
            profile_user: None,
            profile_tab: ProfileTab::Created,
            profile_cards: Vec::new(),
            profile_selected: 0,
            auth: None,
            form: None,
            location_input: None,
            confirm_delete: None,
            error: None,
            registry: WidgetRegistry::new(Some(options.reputation_service)),
            auth_service: options.auth_service,
            listing_service: options.listing_service,
            user_service: options.user_service,
            base_url: options.base_url,
            config_path: options.config_path,
            needs_redraw: true,
            spinner: Spinner::new(),
            response_tx,
            response_rx,
            in_flight: 0,
            next_request_id: 0,
            pending_listings: None,
            pending_profile: None,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        self.start();
        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    /// Kicks off the authentication check and the first search.
    fn start(&mut self) {
        let service = Arc::clone(&self.auth_service);
        self.spawn_request(move || AsyncResponse::Auth {
            result: service.authenticate(),
        });
        self.reload_listings();
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        match self.handle_key(key.code) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => self.show_error(format!("{err:#}")),
                        }
                    }
                } else {
                    self.mark_dirty();
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.is_loading() {
                    if self.spinner.advance() {
                        self.mark_dirty();
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn is_loading(&self) -> bool {
        self.in_flight > 0
    }

    fn show_error<S: Into<String>>(&mut self, message: S) {
        let message = message.into();
        tracing::warn!("{message}");
        self.error = Some(message);
        self.mark_dirty();
    }

    fn next_request_id(&mut self) -> u64 {
        self.next_request_id += 1;
        self.next_request_id
    }

    fn spawn_request<F>(&mut self, job: F)
    where
        F: FnOnce() -> AsyncResponse + Send + 'static,
    {
        self.in_flight += 1;
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let _ = tx.send(job());
        });
        self.mark_dirty();
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        changed
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match message {
            AsyncResponse::Auth { result } => match result {
                Ok(info) => {
                    tracing::info!(logged_in = info.user_is_logged_in, "authentication checked");
                    self.auth = Some(info);
                }
                Err(err) => self.show_error(format!("Failed to check login status: {err:#}")),
            },
            AsyncResponse::Listings { request_id, result } => {
                if self.pending_listings != Some(request_id) {
                    return;
                }
                self.pending_listings = None;
                match result {
                    Ok(listings) => self.replace_search_cards(listings),
                    Err(err) => self.show_error(format!("Failed to load listings: {err:#}")),
                }
            }
            AsyncResponse::User { result } => match result {
                Ok(user) => {
                    self.profile_user = Some(user);
                    self.load_profile_tab();
                }
                Err(err) => {
                    self.page = Page::Search;
                    self.show_error(format!("Failed to load your profile: {err:#}"));
                }
            },
            AsyncResponse::UserListings { request_id, result } => {
                if self.pending_profile != Some(request_id) {
                    return;
                }
                self.pending_profile = None;
                match result {
                    Ok(listings) => self.replace_profile_cards(listings),
                    Err(err) => {
                        self.show_error(format!("Failed to load {}: {err:#}", self.profile_tab.title()))
                    }
                }
            }
            AsyncResponse::EditListing { result } => match result {
                Ok(listing) => {
                    self.status_message = format!("Editing \"{}\".", listing.name);
                    self.form = Some(ListingForm::edit(&listing));
                }
                Err(err) => self.show_error(format!("Failed to load listing: {err:#}")),
            },
            AsyncResponse::Submitted { editing, result } => match result {
                Ok(()) => {
                    self.form = None;
                    self.status_message = match editing {
                        Some(_) => "Listing updated.".to_string(),
                        None => "Listing created.".to_string(),
                    };
                    self.profile_user = None;
                    if self.page == Page::Detail {
                        self.page = Page::Search;
                    }
                    self.reload_listings();
                }
                Err(err) => {
                    if let Some(form) = self.form.as_mut() {
                        form.submitting = false;
                    }
                    self.show_error(format!("Failed to submit listing: {err:#}"));
                }
            },
            AsyncResponse::Previewed { result } => {
                let Some(form) = self.form.as_mut() else {
                    return;
                };
                form.previewing = false;
                match result {
                    Ok(listings) => {
                        self.status_message = "Preview ready.".to_string();
                        form.preview = Some(listings);
                    }
                    Err(err) => self.show_error(format!("Failed to preview listing: {err:#}")),
                }
            }
            AsyncResponse::Deleted { key, name, result } => match result {
                Ok(()) => {
                    self.remove_listing(&key);
                    self.status_message = if self.cards.is_empty() {
                        format!("Deleted \"{name}\". No listings")
                    } else {
                        format!("Deleted \"{name}\".")
                    };
                }
                Err(err) => self.show_error(format!("Failed to delete \"{name}\": {err:#}")),
            },
        }
        self.mark_dirty();
    }

    fn reload_listings(&mut self) {
        let request_id = self.next_request_id();
        self.pending_listings = Some(request_id);
        let service = Arc::clone(&self.listing_service);
        let query = self.query.clone();
        tracing::debug!(query = %query.summary(), "loading listings");
        self.status_message = format!("Loading listings ({})…", query.summary());
        self.spawn_request(move || AsyncResponse::Listings {
            request_id,
            result: service.search(&query),
        });
    }

    fn replace_search_cards(&mut self, listings: Vec<Listing>) {
        for card in self.cards.drain(..) {
            card.unbind(&self.registry);
        }
        self.cards = listings
            .into_iter()
            .map(|listing| ListingCard::bind(listing, &self.registry))
            .collect();
        self.selected = self.selected.min(self.cards.len().saturating_sub(1));
        if self.page == Page::Detail && self.detail_from == CardList::Search {
            self.page = Page::Search;
        }
        self.status_message = match self.cards.len() {
            0 => "No listings".to_string(),
            1 => "Showing 1 listing.".to_string(),
            n => format!("Showing {n} listings."),
        };
    }

    fn replace_profile_cards(&mut self, listings: Vec<Listing>) {
        for card in self.profile_cards.drain(..) {
            card.unbind(&self.registry);
        }
        self.profile_cards = listings
            .into_iter()
            .map(|listing| ListingCard::bind(listing, &self.registry))
            .collect();
        self.profile_selected = 0;
        self.status_message = format!(
            "{}: {} listing(s).",
            self.profile_tab.title(),
            self.profile_cards.len()
        );
    }

    fn remove_listing(&mut self, key: &str) {
        let mut removed = Vec::new();
        for list in [&mut self.cards, &mut self.profile_cards] {
            let mut index = 0;
            while index < list.len() {
                if list[index].listing.key == key {
                    removed.push(list.remove(index));
                } else {
                    index += 1;
                }
            }
        }
        for card in removed {
            card.unbind(&self.registry);
        }
        self.selected = self.selected.min(self.cards.len().saturating_sub(1));
        self.profile_selected = self
            .profile_selected
            .min(self.profile_cards.len().saturating_sub(1));
        if self.page == Page::Detail {
            self.page = match self.detail_from {
                CardList::Search => Page::Search,
                CardList::Profile => Page::Profile,
            };
        }
    }

    fn logged_in(&self) -> bool {
        self.auth.as_ref().is_some_and(|auth| auth.user_is_logged_in)
    }

    fn require_login(&mut self, action: &str) -> bool {
        if self.logged_in() {
            return true;
        }
        self.status_message = format!("Log in to {action}. Press L to open the login page.");
        self.mark_dirty();
        false
    }

    fn active_list(&self) -> CardList {
        match self.page {
            Page::Search => CardList::Search,
            Page::Profile => CardList::Profile,
            Page::Detail => self.detail_from,
        }
    }

    fn current_card(&self) -> Option<&ListingCard> {
        match self.active_list() {
            CardList::Search => self.cards.get(self.selected),
            CardList::Profile => self.profile_cards.get(self.profile_selected),
        }
    }

    fn move_selection(&mut self, delta: isize) {
        let (selected, len) = match self.active_list() {
            CardList::Search => (&mut self.selected, self.cards.len()),
            CardList::Profile => (&mut self.profile_selected, self.profile_cards.len()),
        };
        if len == 0 {
            return;
        }
        let next = (*selected as isize + delta).clamp(0, len as isize - 1);
        *selected = next as usize;
        self.mark_dirty();
    }

    fn vote_selected(&mut self, control: VoteControl) {
        if !self.require_login("vote") {
            return;
        }
        let Some(card) = self.current_card() else {
            self.status_message = "No listing selected.".to_string();
            return;
        };
        let name = card.listing.name.clone();
        let transition = card.widget.lock().click(control);
        let action_word = match transition.state.vote {
            Vote::Upvote => "Upvoted",
            Vote::Downvote => "Downvoted",
            Vote::Neutral => "Cleared vote on",
        };
        self.status_message = format!("{action_word} \"{name}\".");
        self.mark_dirty();
    }

    fn open_detail(&mut self) {
        if self.current_card().is_none() {
            return;
        }
        self.detail_from = self.active_list();
        self.detail_scroll = 0;
        self.page = Page::Detail;
        self.mark_dirty();
    }

    fn close_detail(&mut self) {
        self.page = match self.detail_from {
            CardList::Search => Page::Search,
            CardList::Profile => Page::Profile,
        };
        self.mark_dirty();
    }

    fn open_profile(&mut self) {
        if !self.require_login("view your profile") {
            return;
        }
        self.page = Page::Profile;
        if self.profile_user.is_some() {
            self.load_profile_tab();
        } else {
            let service = Arc::clone(&self.user_service);
            self.status_message = "Loading profile…".to_string();
            self.spawn_request(move || AsyncResponse::User {
                result: service.current_user(),
            });
        }
    }

    fn load_profile_tab(&mut self) {
        let Some(user) = self.profile_user.as_ref() else {
            return;
        };
        let keys = self.profile_tab.keys(user);
        let request_id = self.next_request_id();
        self.pending_profile = Some(request_id);
        let service = Arc::clone(&self.listing_service);
        self.status_message = format!("Loading {}…", self.profile_tab.title());
        self.spawn_request(move || AsyncResponse::UserListings {
            request_id,
            result: service.user_listings(&keys),
        });
    }

    fn new_listing(&mut self) {
        if !self.require_login("create a listing") {
            return;
        }
        self.form = Some(ListingForm::create());
        self.status_message = "New listing: fill in the form.".to_string();
        self.mark_dirty();
    }

    /// Owner-only actions; returns the selected listing's key and name.
    fn owned_selection(&mut self, action: &str) -> Option<(String, String)> {
        if !self.require_login(action) {
            return None;
        }
        let Some(card) = self.current_card() else {
            self.status_message = "No listing selected.".to_string();
            return None;
        };
        if !card.listing.is_owner_user {
            self.status_message = format!("You can only {action} your own listings.");
            self.mark_dirty();
            return None;
        }
        Some((card.listing.key.clone(), card.listing.name.clone()))
    }

    fn edit_selected(&mut self) {
        let Some((key, name)) = self.owned_selection("edit") else {
            return;
        };
        let service = Arc::clone(&self.listing_service);
        self.status_message = format!("Loading \"{name}\" for editing…");
        self.spawn_request(move || AsyncResponse::EditListing {
            result: service.listing(&key),
        });
    }

    fn delete_selected(&mut self) {
        if let Some(target) = self.owned_selection("delete") {
            self.confirm_delete = Some(target);
            self.mark_dirty();
        }
    }

    fn preview_form(&mut self) {
        let Some(form) = self.form.as_mut() else {
            return;
        };
        if form.is_busy() {
            return;
        }
        if !form.prepare() {
            self.status_message = format!("Fix {} field error(s) before previewing.", form.errors.len());
            self.mark_dirty();
            return;
        }
        form.previewing = true;
        let values = form.values.clone();
        let editing = form.editing.clone();
        let service = Arc::clone(&self.listing_service);
        self.status_message = "Building preview…".to_string();
        self.spawn_request(move || AsyncResponse::Previewed {
            result: service.preview(&values, editing.as_deref()),
        });
    }

    fn submit_form(&mut self) {
        let Some(form) = self.form.as_mut() else {
            return;
        };
        if form.is_busy() {
            return;
        }
        if !form.prepare() {
            self.status_message = format!("Fix {} field error(s) before submitting.", form.errors.len());
            self.mark_dirty();
            return;
        }
        form.submitting = true;
        let values = form.values.clone();
        let editing = form.editing.clone();
        let service = Arc::clone(&self.listing_service);
        self.status_message = "Submitting listing…".to_string();
        self.spawn_request(move || {
            let result = service.submit(&values, editing.as_deref());
            AsyncResponse::Submitted { editing, result }
        });
    }

    fn resolve_link(&self, raw: &str) -> Option<Url> {
        Url::parse(raw)
            .ok()
            .or_else(|| self.base_url.as_ref().and_then(|base| base.join(raw).ok()))
    }

    fn open_link(&mut self, label: &str, raw: &str) {
        let Some(url) = self.resolve_link(raw) else {
            self.show_error(format!("Cannot open {label}: invalid URL {raw}"));
            return;
        };
        match webbrowser::open(url.as_str()) {
            Ok(_) => {
                self.status_message = format!("Opened {label} in your browser.");
                self.mark_dirty();
            }
            Err(err) => self.show_error(format!("Failed to open {label}: {err} (URL: {url})")),
        }
    }

    fn open_auth_link(&mut self) {
        let link = self
            .auth
            .as_ref()
            .and_then(|auth| auth.link())
            .map(|(label, url)| (label, url.to_string()));
        match link {
            Some((label, url)) => {
                self.open_link(&format!("{label} page"), &url);
                // The session changes in the browser; check again.
                let service = Arc::clone(&self.auth_service);
                self.spawn_request(move || AsyncResponse::Auth {
                    result: service.authenticate(),
                });
            }
            None => {
                self.status_message = "No login link available yet.".to_string();
                self.mark_dirty();
            }
        }
    }

    fn open_website(&mut self) {
        let Some(card) = self.current_card() else {
            return;
        };
        let website = card.listing.website.trim().to_string();
        if website.is_empty() {
            self.status_message = "This listing has no website.".to_string();
            self.mark_dirty();
            return;
        }
        self.open_link("website", &website);
    }

    fn save_search_defaults(&mut self) {
        match config::save_search_defaults(self.config_path.clone(), &self.query) {
            Ok(path) => {
                self.status_message = format!("Saved search defaults to {}.", path.display());
                self.mark_dirty();
            }
            Err(err) => self.show_error(format!("Failed to save search defaults: {err:#}")),
        }
    }

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        if self.error.is_some() {
            if matches!(code, KeyCode::Esc | KeyCode::Enter | KeyCode::Char('q')) {
                self.error = None;
                self.mark_dirty();
            }
            return Ok(false);
        }

        if let Some((key, name)) = self.confirm_delete.clone() {
            match code {
                KeyCode::Char('y') | KeyCode::Char('Y') => {
                    self.confirm_delete = None;
                    let service = Arc::clone(&self.listing_service);
                    self.status_message = format!("Deleting \"{name}\"…");
                    self.spawn_request(move || {
                        let result = service.delete(&key);
                        AsyncResponse::Deleted { key, name, result }
                    });
                }
                KeyCode::Char('n') | KeyCode::Esc => {
                    self.confirm_delete = None;
                    self.status_message = "Delete cancelled.".to_string();
                    self.mark_dirty();
                }
                _ => {}
            }
            return Ok(false);
        }

        if self.form.is_some() {
            self.handle_form_key(code);
            return Ok(false);
        }

        if self.location_input.is_some() {
            self.handle_location_key(code);
            return Ok(false);
        }

        match code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('u') => self.vote_selected(VoteControl::Upvote),
            KeyCode::Char('d') => self.vote_selected(VoteControl::Downvote),
            KeyCode::Char('L') => self.open_auth_link(),
            KeyCode::Char('o') => self.open_website(),
            KeyCode::Char('n') => self.new_listing(),
            KeyCode::Char('e') => self.edit_selected(),
            KeyCode::Char('x') => self.delete_selected(),
            _ => match self.page {
                Page::Search => self.handle_search_key(code),
                Page::Detail => self.handle_detail_key(code),
                Page::Profile => self.handle_profile_key(code),
            },
        }
        Ok(false)
    }

    fn handle_search_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('j') | KeyCode::Down => self.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => self.move_selection(-1),
            KeyCode::Enter | KeyCode::Char('l') | KeyCode::Right => self.open_detail(),
            KeyCode::Char('r') => self.reload_listings(),
            KeyCode::Char(ch @ '1'..='4') => {
                let index = (ch as usize) - ('1' as usize);
                self.query.toggle_type(ListingType::ALL[index]);
                self.reload_listings();
            }
            KeyCode::Char('s') => {
                self.query.sort = self.query.sort.next();
                self.reload_listings();
            }
            KeyCode::Char('m') => {
                self.query.cycle_radius();
                self.reload_listings();
            }
            KeyCode::Char('/') => {
                self.location_input = Some(self.query.location.clone());
                self.mark_dirty();
            }
            KeyCode::Char('w') => self.save_search_defaults(),
            KeyCode::Char('p') => self.open_profile(),
            _ => {}
        }
    }

    fn handle_detail_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc | KeyCode::Char('h') | KeyCode::Left | KeyCode::Backspace => {
                self.close_detail()
            }
            KeyCode::Char('j') | KeyCode::Down => {
                self.detail_scroll = self.detail_scroll.saturating_add(1);
                self.mark_dirty();
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.detail_scroll = self.detail_scroll.saturating_sub(1);
                self.mark_dirty();
            }
            _ => {}
        }
    }

    fn handle_profile_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc | KeyCode::Char('h') | KeyCode::Left => {
                self.page = Page::Search;
                self.mark_dirty();
            }
            KeyCode::Tab | KeyCode::BackTab => {
                self.profile_tab = self.profile_tab.toggle();
                self.load_profile_tab();
            }
            KeyCode::Char('j') | KeyCode::Down => self.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => self.move_selection(-1),
            KeyCode::Enter | KeyCode::Char('l') | KeyCode::Right => self.open_detail(),
            KeyCode::Char('r') => {
                self.profile_user = None;
                self.open_profile();
            }
            _ => {}
        }
    }

    fn handle_form_key(&mut self, code: KeyCode) {
        let Some(form) = self.form.as_mut() else {
            return;
        };
        if form.is_busy() {
            return;
        }
        match code {
            KeyCode::Esc => {
                self.form = None;
                self.status_message = "Form discarded.".to_string();
            }
            KeyCode::F(2) => self.preview_form(),
            KeyCode::F(3) => {
                self.status_message = match form.accept_tag_suggestion() {
                    Some(tag) => format!("Added tag \"{tag}\"."),
                    None => "No tag suggestions.".to_string(),
                };
            }
            KeyCode::F(4) => {
                let field = form.active_field();
                self.status_message = if form.original.is_none() {
                    "Nothing to undo on a new listing.".to_string()
                } else if form.revert_active() {
                    format!("{} restored.", field.label())
                } else {
                    format!("{} is unchanged.", field.label())
                };
            }
            KeyCode::Tab | KeyCode::Down => form.next(),
            KeyCode::BackTab | KeyCode::Up => form.previous(),
            KeyCode::Left if form.active_field() == Field::Type => form.cycle_type(false),
            KeyCode::Right if form.active_field() == Field::Type => form.cycle_type(true),
            KeyCode::Enter => {
                if form.is_last_field() {
                    self.submit_form();
                } else {
                    form.next();
                }
            }
            KeyCode::Backspace => form.backspace(),
            KeyCode::Char(ch) => form.insert_char(ch),
            _ => {}
        }
        self.mark_dirty();
    }

    fn handle_location_key(&mut self, code: KeyCode) {
        let Some(input) = self.location_input.as_mut() else {
            return;
        };
        match code {
            KeyCode::Esc => self.location_input = None,
            KeyCode::Enter => {
                self.query.location = input.trim().to_string();
                self.location_input = None;
                self.reload_listings();
            }
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Char(ch) => input.push(ch),
            _ => {}
        }
        self.mark_dirty();
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        self.draw_status(frame, layout[0]);

        match self.page {
            Page::Search => self.draw_search(frame, layout[1]),
            Page::Detail => self.draw_detail(frame, layout[1]),
            Page::Profile => self.draw_profile(frame, layout[1]),
        }

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center);
        frame.render_widget(footer, layout[2]);

        if self.form.is_some() {
            self.draw_form(frame, layout[1]);
        }
        if let Some((_, name)) = self.confirm_delete.as_ref() {
            let body = Text::from(vec![
                Line::from(format!("Delete \"{name}\"?")),
                Line::default(),
                Line::from(Span::styled(
                    "y confirm · n cancel",
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                )),
            ]);
            draw_popup(frame, layout[1], "Delete listing", body, COLOR_ERROR, 50, 30);
        }
        if let Some(message) = self.error.as_ref() {
            let body = Text::from(vec![
                Line::from(message.clone()),
                Line::default(),
                Line::from(Span::styled(
                    "Press Esc or Enter to dismiss",
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                )),
            ]);
            draw_popup(frame, layout[1], "Error", body, COLOR_ERROR, 60, 40);
        }
    }

    fn auth_label(&self) -> String {
        match self.auth.as_ref() {
            None => "checking login…".to_string(),
            Some(auth) if auth.user_is_logged_in => {
                let who = auth.user_email.as_deref().unwrap_or("signed in");
                format!("{who} · Logout (L)")
            }
            Some(_) => "Login (L)".to_string(),
        }
    }

    fn draw_status(&self, frame: &mut Frame<'_>, area: Rect) {
        let auth_label = self.auth_label();
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Min(0),
                Constraint::Length(auth_label.width() as u16 + 2),
            ])
            .split(area);

        let status_text = if self.is_loading() {
            format!("{} {}", self.spinner.frame(), self.status_message)
        } else {
            self.status_message.clone()
        };
        let style = Style::default()
            .fg(COLOR_TEXT_PRIMARY)
            .bg(COLOR_PANEL_FOCUSED_BG)
            .add_modifier(Modifier::BOLD);
        frame.render_widget(Paragraph::new(status_text).style(style), chunks[0]);
        let auth_color = if self.logged_in() {
            COLOR_SUCCESS
        } else {
            COLOR_ACCENT
        };
        frame.render_widget(
            Paragraph::new(auth_label)
                .style(style.fg(auth_color))
                .alignment(Alignment::Right),
            chunks[1],
        );
    }

    fn search_header(&self) -> Vec<Line<'static>> {
        let mut filters: Vec<Span<'static>> = Vec::new();
        for (index, listing_type) in ListingType::ALL.iter().enumerate() {
            let selected = self.query.is_selected(*listing_type);
            let mark = if selected { "x" } else { " " };
            let style = if selected {
                Style::default().fg(COLOR_ACCENT)
            } else {
                Style::default().fg(COLOR_TEXT_SECONDARY)
            };
            filters.push(Span::styled(
                format!("[{mark}] {} {}  ", index + 1, listing_type.label()),
                style,
            ));
        }
        filters.push(Span::styled(
            format!("sort: {} (s)  radius: {} mi (m)", self.query.sort, self.query.radius_miles),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        ));

        let location = match self.location_input.as_ref() {
            Some(input) => Line::from(vec![
                Span::styled("Location: ", Style::default().fg(COLOR_ACCENT)),
                Span::styled(
                    format!("{input}▏"),
                    Style::default()
                        .fg(COLOR_TEXT_PRIMARY)
                        .add_modifier(Modifier::BOLD),
                ),
            ]),
            None => Line::from(Span::styled(
                format!("Location: {} (/ to change)", {
                    let location = self.query.location.trim();
                    if location.is_empty() {
                        "anywhere"
                    } else {
                        location
                    }
                }),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )),
        };
        vec![Line::from(filters), location]
    }

    fn draw_search(&self, frame: &mut Frame<'_>, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(4), Constraint::Min(0)])
            .split(area);

        let header = Paragraph::new(self.search_header())
            .block(panel_block("Search", true))
            .wrap(Wrap { trim: true });
        frame.render_widget(header, chunks[0]);
        draw_card_list(frame, chunks[1], "Listings", &self.cards, self.selected);
    }

    fn draw_detail(&self, frame: &mut Frame<'_>, area: Rect) {
        let Some(card) = self.current_card() else {
            return;
        };
        let width = area.width.saturating_sub(2) as usize;
        let mut lines = view::render_lines(&card.detailed.lock(), width);
        if card.listing.is_owner_user {
            lines.push(Line::default());
            lines.push(Line::from(Span::styled(
                "You created this listing: e edit · x delete",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )));
        }
        let paragraph = Paragraph::new(Text::from(lines))
            .block(panel_block(&card.listing.name, true))
            .scroll((self.detail_scroll, 0));
        frame.render_widget(paragraph, area);
    }

    fn draw_profile(&self, frame: &mut Frame<'_>, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(5),
                Constraint::Length(3),
                Constraint::Min(0),
            ])
            .split(area);

        let header = match self.profile_user.as_ref() {
            Some(user) => vec![
                Line::from(Span::styled(
                    user.username.clone(),
                    Style::default()
                        .fg(COLOR_TEXT_PRIMARY)
                        .add_modifier(Modifier::BOLD),
                )),
                Line::from(Span::styled(
                    user.email.clone(),
                    Style::default().fg(COLOR_ACCENT),
                )),
                Line::from(user.bio.clone()),
            ],
            None => vec![Line::from("Loading profile…")],
        };
        frame.render_widget(
            Paragraph::new(header)
                .block(panel_block("Profile", false))
                .wrap(Wrap { trim: true }),
            chunks[0],
        );

        let tabs = Tabs::new(vec![ProfileTab::Created.title(), ProfileTab::Upvoted.title()])
            .select(self.profile_tab.index())
            .block(panel_block("Tab to switch", false))
            .style(Style::default().fg(COLOR_TEXT_SECONDARY))
            .highlight_style(
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            );
        frame.render_widget(tabs, chunks[1]);

        draw_card_list(
            frame,
            chunks[2],
            self.profile_tab.title(),
            &self.profile_cards,
            self.profile_selected,
        );
    }

    fn draw_form(&self, frame: &mut Frame<'_>, area: Rect) {
        let Some(form) = self.form.as_ref() else {
            return;
        };
        let mut lines: Vec<Line<'static>> = Vec::new();
        for field in Field::ALL {
            let active = form.active_field() == field;
            let label_style = if active {
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(COLOR_TEXT_SECONDARY)
            };
            let mut value = form.display_value(field);
            if active && field != Field::Type {
                value.push('▏');
            }
            let mut spans = vec![
                Span::styled(format!("{:>12}: ", field.label()), label_style),
                Span::styled(value, Style::default().fg(COLOR_TEXT_PRIMARY)),
            ];
            if let Some(left) = form.values.remaining(field) {
                let color = if left < 0 { COLOR_ERROR } else { COLOR_TEXT_SECONDARY };
                spans.push(Span::styled(format!("  ({left} left)"), Style::default().fg(color)));
            }
            lines.push(Line::from(spans));
            if field == Field::Tags {
                let suggestions = form.values.suggest_tags();
                if !suggestions.is_empty() {
                    let offered: Vec<String> =
                        suggestions.iter().map(|tag| format!("+ {tag}")).collect();
                    lines.push(Line::from(Span::styled(
                        format!("{:>14}{}", "", offered.join("  ")),
                        Style::default().fg(COLOR_ACCENT),
                    )));
                }
            }
            for err in form.errors_for(field) {
                lines.push(Line::from(Span::styled(
                    format!("{:>14}{err}", ""),
                    Style::default().fg(COLOR_ERROR),
                )));
            }
        }
        lines.push(Line::default());
        let hint = if form.submitting {
            "Submitting…"
        } else if form.previewing {
            "Building preview…"
        } else if form.original.is_some() {
            "Tab/↑↓ move · ←/→ pick type · F2 preview · F3 add tag · F4 undo field · Enter on Image file submits · Esc discard"
        } else {
            "Tab/↑↓ move · ←/→ pick type · F2 preview · F3 add tag · Enter on Image file submits · Esc discard"
        };
        lines.push(Line::from(Span::styled(
            hint,
            Style::default()
                .fg(COLOR_TEXT_SECONDARY)
                .add_modifier(Modifier::ITALIC),
        )));

        if let Some(preview) = form.preview.as_ref() {
            let width = (area.width as usize * 80 / 100).saturating_sub(4);
            for (index, listing) in preview.iter().enumerate() {
                let title = match (preview.len(), index) {
                    (1, _) => "Preview",
                    (_, 0) => "Original listing",
                    _ => "Updated listing",
                };
                lines.push(Line::default());
                lines.push(Line::from(Span::styled(
                    title,
                    Style::default()
                        .fg(COLOR_ACCENT)
                        .add_modifier(Modifier::BOLD),
                )));
                lines.extend(view::render_lines(&view::painted_preview(listing), width));
            }
        }
        draw_popup(frame, area, form.title(), Text::from(lines), COLOR_ACCENT, 80, 80);
    }

    fn footer_text(&self) -> String {
        if self.error.is_some() {
            return "Esc/Enter dismiss".to_string();
        }
        if self.confirm_delete.is_some() {
            return "y delete · n cancel".to_string();
        }
        if self.form.is_some() {
            return "Tab next field · Enter next/submit · F2 preview · Esc discard".to_string();
        }
        if self.location_input.is_some() {
            return "Type a location · Enter search · Esc cancel".to_string();
        }
        let mut parts: Vec<&str> = Vec::new();
        match self.page {
            Page::Search => {
                parts.push("j/k move · Enter open");
                parts.push("u/d vote");
                parts.push("1-4 types · s sort · m radius · / location · w save · r refresh");
                parts.push("n new · e edit · x delete · p profile");
            }
            Page::Detail => {
                parts.push("Esc back · j/k scroll");
                parts.push("u/d vote · o website");
                parts.push("e edit · x delete");
            }
            Page::Profile => {
                parts.push("Tab switch tab · j/k move · Enter open");
                parts.push("u/d vote · Esc back");
            }
        }
        parts.push("L login/logout · q quit");
        parts.join(" · ")
    }
}

fn panel_block(title: &str, focused: bool) -> Block<'static> {
    let border = if focused {
        COLOR_BORDER_FOCUSED
    } else {
        COLOR_PANEL_FOCUSED_BG
    };
    Block::default()
        .title(Span::styled(
            title.to_string(),
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
        .style(Style::default().bg(COLOR_PANEL_BG).fg(COLOR_TEXT_PRIMARY))
}

fn draw_popup(
    frame: &mut Frame<'_>,
    area: Rect,
    title: &str,
    body: Text<'static>,
    accent: Color,
    percent_x: u16,
    percent_y: u16,
) {
    let popup_area = centered_rect(percent_x, percent_y, area);
    frame.render_widget(Clear, popup_area);
    let popup = Paragraph::new(body)
        .block(panel_block(title, true).border_style(Style::default().fg(accent)))
        .wrap(Wrap { trim: false });
    frame.render_widget(popup, popup_area);
}

fn card_items(cards: &[ListingCard], width: usize) -> Vec<ListItem<'static>> {
    cards
        .iter()
        .map(|card| {
            let mut lines = view::render_lines(&card.preview.lock(), width);
            lines.push(Line::default());
            ListItem::new(lines)
        })
        .collect()
}

fn draw_card_list(
    frame: &mut Frame<'_>,
    area: Rect,
    title: &str,
    cards: &[ListingCard],
    selected: usize,
) {
    if cards.is_empty() {
        let empty = Paragraph::new(Span::styled(
            "No listings",
            Style::default()
                .fg(COLOR_TEXT_SECONDARY)
                .add_modifier(Modifier::ITALIC),
        ))
        .alignment(Alignment::Center)
        .block(panel_block(title, true));
        frame.render_widget(empty, area);
        return;
    }

    let width = area.width.saturating_sub(4) as usize;
    let list = List::new(card_items(cards, width))
        .block(panel_block(title, true))
        .highlight_style(Style::default().bg(COLOR_PANEL_SELECTED_BG))
        .highlight_symbol("▌ ");
    let mut state = ListState::default();
    state.select(Some(selected.min(cards.len() - 1)));
    frame.render_stateful_widget(list, area, &mut state);
}
