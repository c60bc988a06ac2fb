//! Generation-tagged global binding registry.
//!
//! Every top-level name a bundle declares is recorded against the
//! generation that was current when it was evaluated. Dropping a generation
//! removes exactly those names, so nothing from load N-1 is visible to load
//! N. Baseline bindings (runtime globals such as `React`) are never dropped;
//! a bundle that shadows one only hides it until its generation is dropped.

use std::collections::BTreeMap;

use serde_json::Value;

/// Opaque reference to a callable owned by a realm.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentRef {
    pub name: String,
    /// Realm-specific handle.
    pub handle: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Callable(ComponentRef),
    Value(Value),
    Object(BTreeMap<String, Binding>),
}

impl Binding {
    pub fn as_callable(&self) -> Option<&ComponentRef> {
        match self {
            Binding::Callable(component) => Some(component),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Binding::Value(Value::Null))
    }
}

#[derive(Debug, Clone)]
struct Tagged {
    generation: u64,
    binding: Binding,
}

#[derive(Debug, Clone, Default)]
pub struct GlobalScope {
    baseline: BTreeMap<String, Binding>,
    bindings: BTreeMap<String, Tagged>,
    generation: u64,
}

impl GlobalScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_baseline<I>(baseline: I) -> Self
    where
        I: IntoIterator<Item = (String, Binding)>,
    {
        Self {
            baseline: baseline.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Register a runtime global that survives every generation drop.
    pub fn set_baseline(&mut self, name: impl Into<String>, binding: Binding) {
        self.baseline.insert(name.into(), binding);
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Open a fresh generation; subsequent declarations belong to it.
    pub fn begin_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Remove every binding declared in `generation`. Returns the removed
    /// names in sorted order.
    pub fn drop_generation(&mut self, generation: u64) -> Vec<String> {
        let removed: Vec<String> = self
            .bindings
            .iter()
            .filter(|(_, tagged)| tagged.generation == generation)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &removed {
            self.bindings.remove(name);
        }
        removed
    }

    /// Declare (or redeclare) a binding in the current generation.
    pub fn declare(&mut self, name: impl Into<String>, binding: Binding) {
        self.bindings.insert(
            name.into(),
            Tagged {
                generation: self.generation,
                binding,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings
            .get(name)
            .map(|tagged| &tagged.binding)
            .or_else(|| self.baseline.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names declared in `generation`, sorted.
    pub fn declared_in(&self, generation: u64) -> Vec<String> {
        self.bindings
            .iter()
            .filter(|(_, tagged)| tagged.generation == generation)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Callable names visible right now, closest to `target` first.
    /// Names sharing a case-insensitive substring with `target` rank first.
    pub fn nearby_callables(&self, target: &str, limit: usize) -> Vec<String> {
        let needle = target.to_ascii_lowercase();
        let mut names: Vec<&String> = self
            .bindings
            .iter()
            .filter(|(_, tagged)| tagged.binding.as_callable().is_some())
            .map(|(name, _)| name)
            .filter(|name| !name.starts_with("__"))
            .collect();
        names.sort_by_key(|name| {
            let lower = name.to_ascii_lowercase();
            let related = !needle.is_empty() && (lower.contains(&needle) || needle.contains(&lower));
            (!related, (*name).clone())
        });
        names.into_iter().take(limit).cloned().collect()
    }
}
