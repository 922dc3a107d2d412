use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use parking_lot::{Mutex, RwLock};

use crate::data::ReputationService;
use crate::listing::Listing;
use crate::reputation::{self, ReputationState, Transition, Vote, VoteControl};

pub const CLICKED_CLASS: &str = "reputation-button-clicked";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instance {
    Preview,
    Detailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Button(VoteControl),
    Count(VoteControl),
}

/// Address of a vote control or its counter inside a rendered listing.
pub fn element_id(kind: ElementKind, instance: Instance, key: &str) -> String {
    let preview = match instance {
        Instance::Preview => "preview-",
        Instance::Detailed => "",
    };
    match kind {
        ElementKind::Button(control) => {
            format!("reputation-{}-{preview}{key}", control.as_str())
        }
        ElementKind::Count(control) => {
            format!("reputation-{preview}count-{}s-{key}", control.as_str())
        }
    }
}

pub trait VoteView: Send {
    fn instance(&self) -> Instance;
    fn render(&mut self, state: &ReputationState);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewId(u64);

/// One listing's vote state and every view bound to it.
pub struct VoteWidget {
    state: ReputationState,
    views: Vec<(ViewId, Box<dyn VoteView>)>,
    next_view: u64,
    sync: Option<Arc<dyn ReputationService>>,
}

impl VoteWidget {
    pub fn new(state: ReputationState, sync: Option<Arc<dyn ReputationService>>) -> Self {
        Self {
            state,
            views: Vec::new(),
            next_view: 0,
            sync,
        }
    }

    pub fn from_listing(listing: &Listing, sync: Option<Arc<dyn ReputationService>>) -> Self {
        let state = ReputationState::seed(
            listing.key.clone(),
            listing.vote,
            listing.upvotes,
            listing.downvotes,
        );
        Self::new(state, sync)
    }

    pub fn state(&self) -> &ReputationState {
        &self.state
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn instances(&self) -> Vec<Instance> {
        self.views.iter().map(|(_, view)| view.instance()).collect()
    }

    /// Binds a view and paints the current state onto it.
    pub fn subscribe(&mut self, mut view: Box<dyn VoteView>) -> ViewId {
        let id = ViewId(self.next_view);
        self.next_view += 1;
        view.render(&self.state);
        self.views.push((id, view));
        id
    }

    pub fn unsubscribe(&mut self, id: ViewId) -> bool {
        let before = self.views.len();
        self.views.retain(|(view_id, _)| *view_id != id);
        self.views.len() != before
    }

    /// Handles a click on either instance of `control`.
    ///
    /// Every view is repainted from the new state before this returns; the
    /// backend call is dispatched afterwards and never awaited.
    pub fn click(&mut self, control: VoteControl) -> Transition {
        let transition = reputation::reduce(&self.state, control);
        tracing::debug!(
            key = %self.state.key,
            from = %transition.previous.vote,
            to = %transition.state.vote,
            upvotes = transition.state.upvotes,
            downvotes = transition.state.downvotes,
            "vote transition"
        );
        self.state = transition.state.clone();
        self.broadcast();
        self.dispatch(transition.submitted());
        transition
    }

    /// Replaces the state wholesale and repaints, without contacting the backend.
    pub fn reset(&mut self, state: ReputationState) {
        self.state = state;
        self.broadcast();
    }

    fn broadcast(&mut self) {
        for (_, view) in self.views.iter_mut() {
            view.render(&self.state);
        }
    }

    fn dispatch(&self, vote: Vote) {
        let Some(service) = self.sync.as_ref().map(Arc::clone) else {
            return;
        };
        let key = self.state.key.clone();
        let spawned = thread::Builder::new()
            .name("reputation-sync".into())
            .spawn(move || {
                if let Err(err) = service.update_reputation(vote, &key) {
                    tracing::warn!(key = %key, vote = %vote, "reputation update failed: {err:#}");
                }
            });
        if let Err(err) = spawned {
            tracing::warn!("failed to spawn reputation sync: {err}");
        }
    }
}

pub type SharedWidget = Arc<Mutex<VoteWidget>>;

/// Widgets keyed by listing key, so every card of a listing shares one state.
pub struct WidgetRegistry {
    widgets: RwLock<HashMap<String, SharedWidget>>,
    sync: Option<Arc<dyn ReputationService>>,
}

impl WidgetRegistry {
    pub fn new(sync: Option<Arc<dyn ReputationService>>) -> Self {
        Self {
            widgets: RwLock::new(HashMap::new()),
            sync,
        }
    }

    /// Returns the widget for `listing`, seeding a new one on first sight.
    pub fn widget_for(&self, listing: &Listing) -> SharedWidget {
        if let Some(existing) = self.widgets.read().get(&listing.key) {
            return Arc::clone(existing);
        }
        let mut widgets = self.widgets.write();
        let entry = widgets.entry(listing.key.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(VoteWidget::from_listing(
                listing,
                self.sync.clone(),
            )))
        });
        Arc::clone(entry)
    }

    /// Like [`widget_for`](Self::widget_for), but an existing widget is
    /// reseeded (and its views repainted) when `listing` carries newer
    /// reputation values from the server.
    pub fn refresh(&self, listing: &Listing) -> SharedWidget {
        let widget = self.widget_for(listing);
        {
            let mut guard = widget.lock();
            let fresh = ReputationState::seed(
                listing.key.clone(),
                listing.vote,
                listing.upvotes,
                listing.downvotes,
            );
            if *guard.state() != fresh {
                tracing::debug!(key = %listing.key, "reseeding vote widget from server");
                guard.reset(fresh);
            }
        }
        widget
    }

    pub fn get(&self, key: &str) -> Option<SharedWidget> {
        self.widgets.read().get(key).cloned()
    }

    /// Unbinds `ids` from the widget of `key` and drops the widget once no
    /// view remains.
    pub fn detach(&self, key: &str, ids: &[ViewId]) {
        let mut widgets = self.widgets.write();
        let empty = match widgets.get(key) {
            Some(widget) => {
                let mut widget = widget.lock();
                for id in ids {
                    widget.unsubscribe(*id);
                }
                widget.view_count() == 0
            }
            None => return,
        };
        if empty {
            widgets.remove(key);
        }
    }

    pub fn release(&self, key: &str) -> bool {
        self.widgets.write().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.widgets.write().clear();
    }

    pub fn len(&self) -> usize {
        self.widgets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.widgets.read().is_empty()
    }
}
