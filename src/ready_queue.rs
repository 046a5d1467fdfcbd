//! Front-stage ready queue shared by the scheduler and its workers.
//!
//! Each priority level owns a lock-free FIFO injector. The level map itself
//! is only write-locked the first time a priority shows up, so workers
//! taking groups never contend with producers on the scheduler's lock.

use crate::job::{JobGroup, Priority};
use crossbeam::deque::{Injector, Steal};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Priority-ordered multi-producer/multi-consumer queue of [`JobGroup`]s.
#[derive(Default)]
pub struct ReadyQueue {
    levels: RwLock<BTreeMap<Priority, Arc<Injector<JobGroup>>>>,
    len: AtomicUsize,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a group visible to workers.
    pub fn push(&self, group: JobGroup) {
        let priority = group.priority();
        let existing = self
            .levels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&priority)
            .cloned();

        let level = match existing {
            Some(level) => level,
            None => self
                .levels
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(priority)
                .or_default()
                .clone(),
        };

        self.len.fetch_add(1, Ordering::Release);
        level.push(group);
    }

    /// Removes the oldest group of the highest non-empty priority.
    ///
    /// Never blocks; returns `None` when nothing is ready.
    pub fn take(&self) -> Option<JobGroup> {
        let levels = self.levels.read().unwrap_or_else(PoisonError::into_inner);

        for level in levels.values().rev() {
            loop {
                match level.steal() {
                    Steal::Success(group) => {
                        self.len.fetch_sub(1, Ordering::AcqRel);
                        return Some(group);
                    }
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }
        None
    }

    /// Approximate number of groups waiting to be claimed.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
