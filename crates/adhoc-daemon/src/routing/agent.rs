//! The RL agent: two pure capabilities layered over the routing table so the
//! policy and the learning rule stay swappable independently of each other and of the table's
//! storage.

use adhoc_common::MacAddr;
use rand::distr::{
    weighted::WeightedIndex,
    Distribution,
};
use std::collections::HashMap;

/// Softmax action selection: samples a neighbor with probability proportional to
/// `exp(v / tau)`, restricted to the neighbors the caller reports as currently alive.
pub struct ActionSelector;

impl ActionSelector {
    /// Returns `None` if `entries` is empty or none of its neighbors are alive.
    pub fn select(entries: &HashMap<MacAddr, f32>, is_alive: impl Fn(MacAddr) -> bool, tau: f32) -> Option<MacAddr> {
        let candidates: Vec<(MacAddr, f32)> = entries
            .iter()
            .filter(|(mac, _)| is_alive(**mac))
            .map(|(mac, v)| (*mac, *v))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let max_value = candidates.iter().map(|(_, v)| *v).fold(f32::NEG_INFINITY, f32::max);
        let weights: Vec<f32> = candidates.iter().map(|(_, v)| ((v - max_value) / tau).exp()).collect();

        let dist = WeightedIndex::new(&weights).ok()?;
        let index = dist.sample(&mut rand::rng());
        Some(candidates[index].0)
    }
}

/// Incremental mean value update: `v <- v + alpha * (reward - v)`.
pub struct ValueEstimator;

impl ValueEstimator {
    pub fn update(current: f32, reward: f32, alpha: f32) -> f32 {
        current + alpha * (reward - current)
    }
}
