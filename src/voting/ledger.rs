use chrono::{DateTime, Utc};

use crate::error::SurveyError;
use crate::models::{Snapshot, SurveyState, Vote};

/// In-memory vote ledger: one vote per session, counters kept in step.
///
/// The ledger never touches storage. The caller validates, applies, persists
/// and, if persistence fails, reverts.
#[derive(Debug)]
pub struct Ledger {
    state: SurveyState,
}

impl Ledger {
    pub fn new(state: SurveyState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &SurveyState {
        &self.state
    }

    /// Check a submission and build the vote it would record. Does not mutate.
    pub fn validate<S: AsRef<str>>(
        &self,
        session_id: &str,
        requested: &[S],
        now: DateTime<Utc>,
    ) -> Result<Vote, SurveyError> {
        if session_id.is_empty() {
            return Err(SurveyError::MissingSession);
        }
        if self.state.votes.contains_key(session_id) {
            return Err(SurveyError::AlreadyVoted);
        }

        let selections = self.state.catalog().filter_selections(requested);
        if selections.is_empty() {
            return Err(SurveyError::NoValidSelections);
        }

        Ok(Vote {
            session_id: session_id.to_string(),
            selections,
            accepted_at: now,
        })
    }

    /// Record a vote produced by [`Ledger::validate`].
    pub fn apply(&mut self, vote: Vote) {
        for option in &vote.selections {
            self.state.tally.increment(option);
        }
        self.state.votes.insert(vote.session_id.clone(), vote);
    }

    /// Undo [`Ledger::apply`] for a vote whose write did not commit.
    pub fn revert(&mut self, session_id: &str) -> Option<Vote> {
        let vote = self.state.votes.remove(session_id)?;
        for option in &vote.selections {
            self.state.tally.decrement(option);
        }
        Some(vote)
    }

    /// Swap in a whole new state, e.g. after a reset has been persisted.
    pub fn replace(&mut self, state: SurveyState) {
        self.state = state;
    }

    pub fn snapshot(&self, online_users: usize) -> Snapshot {
        Snapshot {
            tallies: self.state.tally.clone(),
            total_votes: self.state.total_votes(),
            online_users,
        }
    }
}
