//! # Smooth Weighted Round-Robin
//!
//! Deterministic weight-proportional rotation in the style of Nginx's
//! `smooth_weighted` upstream selection: each pick raises every entry's
//! current weight by its effective weight, takes the maximum, and charges
//! the winner the sum of all effective weights. Over one full cycle of
//! `sum(weights)` picks each entry wins exactly `weight` times, with the
//! picks spread as evenly as the weights allow.
//!
//! The selector is thread-compatible, not thread-safe; wrap it in a lock to
//! share it across tasks. Use it where a deterministic rotation is
//! preferred over the resolver's random sampling.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
struct WeightedItem<T> {
    value: T,
    weight: i64,
    current_weight: i64,
    effective_weight: i64,
}

/// Smooth weighted round-robin selector over values of type `T`.
#[derive(Debug, Clone, Default)]
pub struct SmoothWeighted<T> {
    items: Vec<WeightedItem<T>>,
    index: HashMap<T, usize>,
}

impl<T: Clone + Eq + Hash> SmoothWeighted<T> {
    /// Create an empty selector.
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Add `value` with the given weight, or update its weight if already
    /// present.
    ///
    /// On a weight change the entry's round-local credit is reset to the
    /// new weight; its effective weight is left to converge through
    /// subsequent picks. Re-adding with an unchanged weight is a no-op.
    pub fn add(&mut self, value: T, weight: i64) {
        match self.index.get(&value) {
            None => {
                self.index.insert(value.clone(), self.items.len());
                self.items.push(WeightedItem {
                    value,
                    weight,
                    current_weight: 0,
                    effective_weight: weight,
                });
            }
            Some(&position) => {
                let item = &mut self.items[position];
                if item.weight != weight {
                    item.weight = weight;
                    item.current_weight = weight;
                }
            }
        }
    }

    /// Remove `value` if present.
    pub fn delete(&mut self, value: &T) {
        let Some(position) = self.index.remove(value) else {
            return;
        };
        self.items.swap_remove(position);
        if let Some(moved) = self.items.get(position) {
            self.index.insert(moved.value.clone(), position);
        }
    }

    /// Restore every entry to its freshly-added state: effective weight
    /// back to the configured weight, round-local credit cleared.
    pub fn reset(&mut self) {
        for item in &mut self.items {
            item.effective_weight = item.weight;
            item.current_weight = 0;
        }
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
    }

    /// Configured weights of all entries.
    pub fn all(&self) -> HashMap<T, i64> {
        self.items
            .iter()
            .map(|item| (item.value.clone(), item.weight))
            .collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the selector holds no entries.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Pick the next value in the rotation; `None` when empty.
    pub fn next(&mut self) -> Option<&T> {
        if self.items.len() <= 1 {
            return self.items.first().map(|item| &item.value);
        }

        let mut total = 0;
        let mut best: Option<usize> = None;
        let mut best_current = i64::MIN;
        for (position, item) in self.items.iter_mut().enumerate() {
            total += item.effective_weight;
            item.current_weight += item.effective_weight;
            if best.is_none() || item.current_weight > best_current {
                best = Some(position);
                best_current = item.current_weight;
            }
        }

        let position = best?;
        self.items[position].current_weight -= total;
        Some(&self.items[position].value)
    }
}
