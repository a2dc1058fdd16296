//! Periodic snapshotting of dirty sections.
//!
//! The scheduler is a deterministic state machine: callers feed it the
//! current time through [`SnapshotScheduler::poll`], which hands out at most
//! one [`TickTicket`] per due interval. Firing a ticket re-reads the section
//! state at that moment. Each `start` opens a new generation; a ticket from a
//! generation that has since been stopped is discarded instead of executed.

use std::cell::Cell;
use std::rc::Rc;

use formkeep_core::{EditSessionId, EntityId, EntityType, FieldValue, SectionName};
use formkeep_storage::{EntityMarker, SectionRecord, SnapshotStore, StorageError, StorageKey};

use crate::error::EngineError;

/// The current state of one section, as seen at tick time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionState {
    pub name: SectionName,
    pub is_dirty: bool,
    pub values: FieldValue,
}

/// Anything that can report the latest section state on demand.
pub trait DirtySectionSource {
    fn section_states(&self) -> Vec<SectionState>;
}

/// Shared between a scheduler and the handle of its current run.
#[derive(Debug, Default)]
struct ActiveRun {
    generation: Cell<Option<u64>>,
}

impl ActiveRun {
    fn is(&self, generation: u64) -> bool {
        self.generation.get() == Some(generation)
    }

    fn release(&self, generation: u64) -> bool {
        if self.is(generation) {
            self.generation.set(None);
            true
        } else {
            false
        }
    }
}

/// Owning handle of one scheduler run. Stopping it (or dropping it) is the
/// only way the run ends; both are idempotent.
#[derive(Debug)]
#[must_use = "dropping the handle stops the scheduler"]
pub struct SchedulerHandle {
    generation: u64,
    active: Rc<ActiveRun>,
}

impl SchedulerHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_active(&self) -> bool {
        self.active.is(self.generation)
    }

    /// Returns whether this call ended the run.
    pub fn stop(&self) -> bool {
        let stopped = self.active.release(self.generation);
        if stopped {
            tracing::debug!(generation = self.generation, "snapshot scheduler stopped");
        }
        stopped
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A due tick, valid only while its generation is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickTicket {
    generation: u64,
    due_ms: u64,
}

impl TickTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn due_ms(&self) -> u64 {
        self.due_ms
    }
}

/// One storage write or removal that failed during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceFailure {
    pub key: StorageKey,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub written: Vec<SectionName>,
    pub removed: Vec<SectionName>,
    pub failures: Vec<PersistenceFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickReport {
    /// The ticket's run was stopped before it fired.
    Discarded,
    Completed(TickSummary),
}

impl TickReport {
    pub fn is_discarded(&self) -> bool {
        matches!(self, TickReport::Discarded)
    }

    pub fn summary(&self) -> Option<&TickSummary> {
        match self {
            TickReport::Completed(summary) => Some(summary),
            TickReport::Discarded => None,
        }
    }

    pub fn failures(&self) -> &[PersistenceFailure] {
        self.summary().map(|s| s.failures.as_slice()).unwrap_or(&[])
    }
}

#[derive(Debug)]
struct Run {
    generation: u64,
    session: EditSessionId,
    entity_id: EntityId,
    next_due_ms: u64,
}

#[derive(Debug)]
pub struct SnapshotScheduler {
    entity_type: EntityType,
    interval_ms: u64,
    active: Rc<ActiveRun>,
    next_generation: u64,
    run: Option<Run>,
}

impl SnapshotScheduler {
    pub fn new(entity_type: EntityType, interval_ms: u64) -> Self {
        Self {
            entity_type,
            interval_ms: interval_ms.max(1),
            active: Rc::new(ActiveRun::default()),
            next_generation: 1,
            run: None,
        }
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn is_running(&self) -> bool {
        self.run
            .as_ref()
            .is_some_and(|run| self.active.is(run.generation))
    }

    /// Begin snapshotting for `entity_id`. The first tick is due one interval
    /// after `now_ms`.
    pub fn start(
        &mut self,
        session: EditSessionId,
        entity_id: EntityId,
        now_ms: u64,
    ) -> Result<SchedulerHandle, EngineError> {
        if self.is_running() {
            return Err(EngineError::SchedulerAlreadyRunning);
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        self.active.generation.set(Some(generation));
        self.run = Some(Run {
            generation,
            session,
            entity_id,
            next_due_ms: now_ms.saturating_add(self.interval_ms),
        });
        tracing::debug!(
            entity_type = %self.entity_type,
            entity_id = %entity_id,
            session = %session,
            generation,
            "snapshot scheduler started"
        );
        Ok(SchedulerHandle {
            generation,
            active: Rc::clone(&self.active),
        })
    }

    /// Stop the current run, if any. Idempotent.
    pub fn stop(&mut self) {
        if let Some(run) = self.run.take() {
            self.active.release(run.generation);
        }
    }

    /// Hand out the due ticket, if any, and re-arm one interval after `now_ms`.
    /// Several missed intervals still yield a single ticket.
    pub fn poll(&mut self, now_ms: u64) -> Option<TickTicket> {
        if !self.is_running() {
            self.run = None;
            return None;
        }
        let interval = self.interval_ms;
        let run = self.run.as_mut()?;
        if now_ms < run.next_due_ms {
            return None;
        }
        let ticket = TickTicket {
            generation: run.generation,
            due_ms: run.next_due_ms,
        };
        run.next_due_ms = now_ms.saturating_add(interval);
        Some(ticket)
    }

    /// Execute a ticket against the latest section state. Storage failures
    /// are logged and reported, never returned as errors.
    pub fn fire<D, S>(&self, ticket: TickTicket, source: &D, store: &mut S, now_ms: u64) -> TickReport
    where
        D: DirtySectionSource + ?Sized,
        S: SnapshotStore + ?Sized,
    {
        let Some(run) = self
            .run
            .as_ref()
            .filter(|run| run.generation == ticket.generation && self.active.is(run.generation))
        else {
            tracing::debug!(generation = ticket.generation, "stale snapshot tick discarded");
            return TickReport::Discarded;
        };

        let states = source.section_states();
        let any_dirty = states.iter().any(|s| s.is_dirty);
        let mut summary = TickSummary::default();

        if any_dirty {
            let marker = EntityMarker {
                entity_id: run.entity_id,
                saved_at_ms: now_ms,
            };
            let result = store.put_marker(&self.entity_type, &marker);
            self.note(run, &mut summary, StorageKey::entity_marker(&self.entity_type), result);
        }

        for state in states {
            let key = StorageKey::section(&self.entity_type, &state.name);
            if state.is_dirty {
                let record = SectionRecord {
                    entity_id: run.entity_id,
                    values: state.values,
                    saved_at_ms: now_ms,
                };
                let result = store.put_section_record(&self.entity_type, &state.name, &record);
                if self.note(run, &mut summary, key, result) {
                    summary.written.push(state.name);
                }
            } else {
                match store.remove_section_record(&self.entity_type, &state.name) {
                    Ok(true) => summary.removed.push(state.name),
                    Ok(false) => {}
                    Err(error) => {
                        self.note(run, &mut summary, key, Err::<(), _>(error));
                    }
                }
            }
        }

        if !any_dirty {
            let result = store.remove(&StorageKey::entity_marker(&self.entity_type));
            self.note(run, &mut summary, StorageKey::entity_marker(&self.entity_type), result);
        }

        tracing::debug!(
            entity_type = %self.entity_type,
            session = %run.session,
            written = summary.written.len(),
            removed = summary.removed.len(),
            failures = summary.failures.len(),
            "snapshot tick"
        );
        TickReport::Completed(summary)
    }

    fn note<T>(
        &self,
        run: &Run,
        summary: &mut TickSummary,
        key: StorageKey,
        result: Result<T, StorageError>,
    ) -> bool {
        match result {
            Ok(_) => true,
            Err(error) => {
                tracing::warn!(
                    session = %run.session,
                    key = %key,
                    error = %error,
                    "snapshot write failed, skipping"
                );
                summary.failures.push(PersistenceFailure {
                    key,
                    error: error.to_string(),
                });
                false
            }
        }
    }
}
