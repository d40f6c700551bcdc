//! Action name resolution.
//!
//! Every registered action is stored under one canonical name: the protocol
//! name with a trailing `_async` removed, converted to PascalCase
//! (`send_group_msg_async` -> `SendGroupMsg`). Two lookup structures are
//! built from the same canonical names and always agree.

use std::collections::HashMap;

use serde_json::Value;

use crate::dispatch::BotContext;
use crate::error::ActionError;

pub type Handler = fn(&BotContext<'_>, &Value) -> Result<Value, ActionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lookup {
    #[default]
    Keyed,
    Sorted,
}

impl Lookup {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "keyed" => Some(Lookup::Keyed),
            "sorted" => Some(Lookup::Sorted),
            _ => None,
        }
    }
}

/// Canonical registry key for a protocol action name, or `None` when the
/// name is not lowercase snake_case (`[a-z0-9]` words joined by single
/// underscores, optionally ending in `_async`).
pub fn canonical_action_name(action: &str) -> Option<String> {
    let base = action.strip_suffix("_async").unwrap_or(action);
    let well_formed = !base.is_empty()
        && base.split('_').all(|word| {
            !word.is_empty()
                && word
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        });
    well_formed.then(|| pascal_case(base))
}

fn pascal_case(snake: &str) -> String {
    snake
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Immutable once built; share it behind an `Arc`.
pub struct ActionRegistry {
    keyed: HashMap<String, Handler>,
    sorted: Vec<(String, Handler)>,
}

impl ActionRegistry {
    /// The registry of every protocol action this bridge serves.
    pub fn build() -> Self {
        Self::from_table(crate::actions::ACTIONS)
    }

    pub fn from_table(table: &[(&str, Handler)]) -> Self {
        let mut keyed = HashMap::with_capacity(table.len());
        let mut sorted = Vec::with_capacity(table.len());
        for (name, handler) in table {
            let canonical = pascal_case(name);
            keyed.insert(canonical.clone(), *handler);
            sorted.push((canonical, *handler));
        }
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        sorted.dedup_by(|a, b| a.0 == b.0);
        Self { keyed, sorted }
    }

    /// Hash lookup by canonical name.
    pub fn get(&self, canonical: &str) -> Option<Handler> {
        self.keyed.get(canonical).copied()
    }

    /// Binary search by canonical name.
    pub fn search(&self, canonical: &str) -> Option<Handler> {
        self.sorted
            .binary_search_by(|(name, _)| name.as_str().cmp(canonical))
            .ok()
            .map(|i| self.sorted[i].1)
    }

    pub fn resolve(&self, action: &str, lookup: Lookup) -> Option<Handler> {
        let canonical = canonical_action_name(action)?;
        match lookup {
            Lookup::Keyed => self.get(&canonical),
            Lookup::Sorted => self.search(&canonical),
        }
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sorted.iter().map(|(name, _)| name.as_str())
    }
}
