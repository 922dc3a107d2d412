use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Upvote,
    Downvote,
    #[default]
    Neutral,
}

impl Vote {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vote::Upvote => "upvote",
            Vote::Downvote => "downvote",
            Vote::Neutral => "neutral",
        }
    }

    /// The control highlighted while this vote is active, if any.
    pub fn clicked_control(&self) -> Option<VoteControl> {
        match self {
            Vote::Upvote => Some(VoteControl::Upvote),
            Vote::Downvote => Some(VoteControl::Downvote),
            Vote::Neutral => None,
        }
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("'{0}' is an invalid vote type")]
pub struct InvalidVote(pub String);

impl FromStr for Vote {
    type Err = InvalidVote;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upvote" => Ok(Vote::Upvote),
            "downvote" => Ok(Vote::Downvote),
            "neutral" => Ok(Vote::Neutral),
            other => Err(InvalidVote(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteControl {
    Upvote,
    Downvote,
}

impl VoteControl {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteControl::Upvote => "upvote",
            VoteControl::Downvote => "downvote",
        }
    }

    fn vote(&self) -> Vote {
        match self {
            VoteControl::Upvote => Vote::Upvote,
            VoteControl::Downvote => Vote::Downvote,
        }
    }
}

/// The vote value `control` submits when clicked while `current` is active.
///
/// Clicking the highlighted control clears the vote; clicking the other one
/// switches sides directly.
pub fn next_vote(current: Vote, control: VoteControl) -> Vote {
    if current.clicked_control() == Some(control) {
        Vote::Neutral
    } else {
        control.vote()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReputationState {
    pub key: String,
    pub vote: Vote,
    pub upvotes: u64,
    pub downvotes: u64,
}

impl ReputationState {
    /// Builds the state a listing view starts from. The control matching
    /// `vote` is the clicked one; seeding twice yields the same state.
    pub fn seed(key: impl Into<String>, vote: Vote, upvotes: u64, downvotes: u64) -> Self {
        Self {
            key: key.into(),
            vote,
            upvotes,
            downvotes,
        }
    }

    pub fn is_clicked(&self, control: VoteControl) -> bool {
        self.vote.clicked_control() == Some(control)
    }

    pub fn count(&self, control: VoteControl) -> u64 {
        match control {
            VoteControl::Upvote => self.upvotes,
            VoteControl::Downvote => self.downvotes,
        }
    }

    fn count_mut(&mut self, control: VoteControl) -> &mut u64 {
        match control {
            VoteControl::Upvote => &mut self.upvotes,
            VoteControl::Downvote => &mut self.downvotes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub control: VoteControl,
    pub previous: ReputationState,
    pub state: ReputationState,
}

impl Transition {
    pub fn submitted(&self) -> Vote {
        self.state.vote
    }

    /// The state before the click, for callers that reconcile a failed sync.
    pub fn rollback(&self) -> ReputationState {
        self.previous.clone()
    }
}

/// Applies one click to `state` and returns the transition.
pub fn reduce(state: &ReputationState, control: VoteControl) -> Transition {
    let next = next_vote(state.vote, control);
    let mut updated = state.clone();

    match next.clicked_control() {
        Some(target) => {
            let counter = updated.count_mut(target);
            *counter = counter.saturating_add(1);
            if let Some(prior) = state.vote.clicked_control() {
                if prior != target {
                    let counter = updated.count_mut(prior);
                    *counter = counter.saturating_sub(1);
                }
            }
        }
        None => {
            let counter = updated.count_mut(control);
            *counter = counter.saturating_sub(1);
        }
    }
    updated.vote = next;

    Transition {
        control,
        previous: state.clone(),
        state: updated,
    }
}
