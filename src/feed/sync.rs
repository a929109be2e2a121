// Per-post like synchronisation state machine - pure, explicit transitions
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a post's like affordance stands relative to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Local values match the last confirmed server state.
    Synced,

    /// Viewer liked locally; the write has not been confirmed yet.
    OptimisticallyLiked,

    /// Viewer unliked locally; the write has not been confirmed yet.
    OptimisticallyUnliked,

    /// A write failed; authoritative state is being (or must be) refetched.
    Reconciling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: SyncState,
    pub event: &'static str,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cannot apply {} in {} state", self.event, self.from.state_name())
    }
}

impl std::error::Error for InvalidTransition {}

impl SyncState {
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Synced => "Synced",
            Self::OptimisticallyLiked => "OptimisticallyLiked",
            Self::OptimisticallyUnliked => "OptimisticallyUnliked",
            Self::Reconciling => "Reconciling",
        }
    }

    pub fn is_optimistic(&self) -> bool {
        matches!(self, Self::OptimisticallyLiked | Self::OptimisticallyUnliked)
    }

    /// Transition: any state → Optimistic*. Toggling is always allowed; the
    /// optimistic step is never skipped.
    pub fn toggled(self, now_liked: bool) -> Self {
        if now_liked {
            Self::OptimisticallyLiked
        } else {
            Self::OptimisticallyUnliked
        }
    }

    /// Transition: Optimistic* → Synced
    pub fn write_succeeded(self) -> Result<Self, InvalidTransition> {
        if self.is_optimistic() {
            Ok(Self::Synced)
        } else {
            Err(InvalidTransition {
                from: self,
                event: "write_succeeded",
            })
        }
    }

    /// Transition: Optimistic* → Reconciling
    pub fn write_failed(self) -> Result<Self, InvalidTransition> {
        if self.is_optimistic() {
            Ok(Self::Reconciling)
        } else {
            Err(InvalidTransition {
                from: self,
                event: "write_failed",
            })
        }
    }

    /// Transition: Reconciling → Synced
    pub fn reconciled(self) -> Result<Self, InvalidTransition> {
        match self {
            Self::Reconciling => Ok(Self::Synced),
            other => Err(InvalidTransition {
                from: other,
                event: "reconciled",
            }),
        }
    }
}

/// Bookkeeping the controller keeps next to each loaded post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostSync {
    pub state: SyncState,
    /// Latest like flag the viewer asked for.
    pub desired: bool,
    /// Last like flag the server is known to hold for the viewer. `None`
    /// after a failed reconcile, meaning the next write must go out
    /// unconditionally.
    pub server_liked: Option<bool>,
    /// A writer task currently owns this post's backend writes.
    pub writer_active: bool,
    /// Bumped on every toggle, so a refetch can tell whether the viewer acted
    /// while it was in flight.
    pub intent_seq: u64,
    /// Local values were rebuilt from a page fetched while a write was in
    /// flight; the writer must refetch before settling.
    pub needs_verify: bool,
}

impl PostSync {
    pub fn synced(server_liked: bool) -> Self {
        Self {
            state: SyncState::Synced,
            desired: server_liked,
            server_liked: Some(server_liked),
            writer_active: false,
            intent_seq: 0,
            needs_verify: false,
        }
    }

    /// Record a local toggle.
    pub fn record_toggle(&mut self, now_liked: bool) {
        self.state = self.state.toggled(now_liked);
        self.desired = now_liked;
        self.intent_seq += 1;
    }

    /// Whether the backend still needs a write to match the latest intent.
    pub fn needs_write(&self) -> bool {
        self.server_liked != Some(self.desired)
    }

    /// Count to show for a post whose fetched values say `fetched_liked`
    /// while the viewer's latest intent is `desired`.
    pub fn intended_count(&self, fetched_count: u64, fetched_liked: bool) -> u64 {
        match (self.desired, fetched_liked) {
            (true, false) => fetched_count + 1,
            (false, true) => fetched_count.saturating_sub(1),
            _ => fetched_count,
        }
    }

    /// Settle into `Synced` from whichever state authoritative data arrived in.
    pub fn settle(&mut self) {
        self.state = match self.state {
            SyncState::Synced => SyncState::Synced,
            SyncState::Reconciling => SyncState::Reconciling
                .reconciled()
                .unwrap_or(SyncState::Synced),
            optimistic => optimistic.write_succeeded().unwrap_or(SyncState::Synced),
        };
    }
}
