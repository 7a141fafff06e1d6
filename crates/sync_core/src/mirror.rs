use std::sync::Arc;

use shared::domain::{Generation, MirrorState};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::binding::Binding;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The read belonged to a superseded binding and was dropped.
    StaleGenerationDiscard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub generation: Generation,
    /// Values read in this pass, whether or not they were committed.
    pub fetched: MirrorState,
    pub committed: usize,
    pub discarded: usize,
    pub failed: usize,
}

impl RefreshReport {
    pub fn is_stale(&self) -> bool {
        self.discarded > 0
    }
}

/// Cached greeting, balance and owner of the installed binding.
pub struct StateMirror {
    state: watch::Sender<MirrorState>,
    installed: watch::Receiver<Option<Arc<Binding>>>,
}

impl StateMirror {
    pub fn new(installed: watch::Receiver<Option<Arc<Binding>>>) -> Self {
        let (state, _) = watch::channel(MirrorState::default());
        Self { state, installed }
    }

    pub fn snapshot(&self) -> MirrorState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MirrorState> {
        self.state.subscribe()
    }

    fn installed_generation(&self) -> Option<Generation> {
        self.installed
            .borrow()
            .as_ref()
            .map(|binding| binding.generation())
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        self.installed_generation() == Some(generation)
    }

    /// Clears every field, tagging the empty state with `generation`.
    pub fn reset(&self, generation: Option<Generation>) {
        self.state.send_replace(MirrorState {
            generation,
            ..MirrorState::default()
        });
    }

    /// Applies `apply` only if `generation` is still the installed binding.
    pub fn commit(
        &self,
        generation: Generation,
        apply: impl FnOnce(&mut MirrorState),
    ) -> CommitOutcome {
        if !self.is_current(generation) {
            debug!(
                "mirror: discarding read for generation={generation} installed={:?}",
                self.installed_generation()
            );
            return CommitOutcome::StaleGenerationDiscard;
        }

        self.state.send_modify(|state| {
            if state.generation != Some(generation) {
                *state = MirrorState::for_generation(generation);
            }
            apply(state);
        });
        CommitOutcome::Committed
    }

    /// Reads greeting, balance and owner concurrently; each result is
    /// committed as soon as it arrives, subject to the generation gate.
    pub async fn refresh(&self, binding: &Binding) -> RefreshReport {
        let generation = binding.generation();

        let greeting = async {
            let read = binding.greet().await;
            self.settle(generation, "greeting", read, |state, value| {
                state.greeting = Some(value)
            })
        };
        let balance = async {
            let read = binding.balance().await;
            self.settle(generation, "balance", read, |state, value| {
                state.balance_wei = Some(value)
            })
        };
        let owner = async {
            let read = binding.owner().await;
            self.settle(generation, "owner", read, |state, value| {
                state.owner = Some(value)
            })
        };

        let (greeting, balance, owner) = futures::join!(greeting, balance, owner);

        let mut report = RefreshReport {
            generation,
            fetched: MirrorState::for_generation(generation),
            committed: 0,
            discarded: 0,
            failed: 0,
        };
        report.fetched.greeting = report.tally(greeting);
        report.fetched.balance_wei = report.tally(balance);
        report.fetched.owner = report.tally(owner);
        report
    }

    fn settle<T: Clone>(
        &self,
        generation: Generation,
        field: &'static str,
        read: anyhow::Result<T>,
        apply: impl FnOnce(&mut MirrorState, T),
    ) -> FieldRead<T> {
        match read {
            Ok(value) => {
                let outcome = self.commit(generation, |state| apply(state, value.clone()));
                FieldRead::Read(value, outcome)
            }
            Err(err) => {
                warn!("mirror: {field} read failed generation={generation}: {err:#}");
                FieldRead::Failed
            }
        }
    }
}

enum FieldRead<T> {
    Read(T, CommitOutcome),
    Failed,
}

impl RefreshReport {
    fn tally<T>(&mut self, read: FieldRead<T>) -> Option<T> {
        match read {
            FieldRead::Read(value, CommitOutcome::Committed) => {
                self.committed += 1;
                Some(value)
            }
            FieldRead::Read(value, CommitOutcome::StaleGenerationDiscard) => {
                self.discarded += 1;
                Some(value)
            }
            FieldRead::Failed => {
                self.failed += 1;
                None
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/mirror_tests.rs"]
mod tests;
