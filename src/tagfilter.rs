// Per-tag enable and minimum-level filtering

use crate::level::Level;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Keyed gate consulted after the global level gate.
///
/// Tags default to enabled at Debug. While no rule has been configured the
/// check is a single relaxed atomic load, keeping the hot path untouched.
#[derive(Default)]
pub struct TagFilter {
    active: AtomicBool,
    rules: Mutex<Rules>,
}

#[derive(Default)]
struct Rules {
    enabled: HashMap<String, bool>,
    levels: HashMap<String, Level>,
}

impl TagFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tag_enabled(&self, tag: &str, enabled: bool) {
        self.lock_rules().enabled.insert(tag.to_owned(), enabled);
        self.active.store(true, Ordering::Release);
    }

    pub fn set_tag_level(&self, tag: &str, level: Level) {
        self.lock_rules().levels.insert(tag.to_owned(), level);
        self.active.store(true, Ordering::Release);
    }

    /// Whether a message with this tag and level may pass.
    pub fn allows(&self, tag: &str, level: Level) -> bool {
        if !self.active.load(Ordering::Relaxed) {
            return true;
        }
        let rules = self.lock_rules();
        if !rules.enabled.get(tag).copied().unwrap_or(true) {
            return false;
        }
        let minimum = rules.levels.get(tag).copied().unwrap_or(Level::Debug);
        level.passes(minimum)
    }

    fn lock_rules(&self) -> MutexGuard<'_, Rules> {
        self.rules.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
