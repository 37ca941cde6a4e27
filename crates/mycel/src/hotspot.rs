//! Per-call-site execution counters driving tier promotion (spec.md §4.8).
//!
//! Each call site (identified by the `Rc<AstNode>` pointer of its function
//! body — stable for the process lifetime since closures hold the body by
//! `Rc`) accumulates an interpretation count and an argument-type fingerprint
//! history. Once the warm/hot thresholds are crossed and the last
//! `type_stability_window` calls agreed on argument types, the site becomes
//! a promotion candidate.

use std::collections::HashMap;

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PromotionState {
    Cold,
    Warm,
    Hot,
    Compiled,
    /// Promotion was attempted and rejected (unsupported construct, or a
    /// trace failed to stabilize) — never retried for this site.
    Blacklisted,
}

/// A coarse fingerprint of a call's argument types, used to detect whether a
/// call site is monomorphic enough to be worth specializing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeFingerprint(Vec<&'static str>);

impl TypeFingerprint {
    pub fn of(args: &[Value], heap: &crate::heap::Heap) -> Self {
        Self(args.iter().map(|v| v.type_name(heap)).collect())
    }
}

#[derive(Debug, Default)]
struct SiteStats {
    call_count: u32,
    state: Option<PromotionState>,
    recent_fingerprints: std::collections::VecDeque<TypeFingerprint>,
    /// Ticks since this site was last called. Reset to 0 on every
    /// `record_call`; `tick` increments every other site's and demotes one
    /// that's gone cold for too long (spec.md §4.8 "counts age each
    /// adaptive-executor tick").
    ticks_since_call: u32,
}

/// Tracks every observed call site. Owned by the [`crate::interpreter::Interpreter`]
/// (or the adaptive executor) for the process's lifetime.
pub struct HotSpotTracker {
    sites: HashMap<usize, SiteStats>,
    warm_threshold: u32,
    hot_threshold: u32,
    stability_window: u32,
    decay_after_ticks: u32,
}

impl HotSpotTracker {
    pub fn new(warm_threshold: u32, hot_threshold: u32, stability_window: u32) -> Self {
        Self::with_decay(warm_threshold, hot_threshold, stability_window, crate::config::DEFAULT_DECAY_AFTER_TICKS)
    }

    pub fn with_decay(warm_threshold: u32, hot_threshold: u32, stability_window: u32, decay_after_ticks: u32) -> Self {
        Self { sites: HashMap::new(), warm_threshold, hot_threshold, stability_window, decay_after_ticks }
    }

    fn site_key(body_ptr: usize) -> usize {
        body_ptr
    }

    /// Records one interpreted call at `body_ptr`, returning the
    /// [`PromotionState`] the site is now in.
    pub fn record_call(&mut self, body_ptr: usize, fingerprint: TypeFingerprint) -> PromotionState {
        let window = self.stability_window as usize;
        let warm_threshold = self.warm_threshold;
        let hot_threshold = self.hot_threshold;
        let stats = self.sites.entry(Self::site_key(body_ptr)).or_default();
        stats.ticks_since_call = 0;
        if stats.state == Some(PromotionState::Blacklisted) {
            return PromotionState::Blacklisted;
        }
        stats.call_count += 1;
        stats.recent_fingerprints.push_back(fingerprint);
        if stats.recent_fingerprints.len() > window {
            stats.recent_fingerprints.pop_front();
        }

        let new_state = if stats.state == Some(PromotionState::Compiled) {
            PromotionState::Compiled
        } else if stats.call_count >= hot_threshold && Self::is_stable(&stats.recent_fingerprints, window) {
            PromotionState::Hot
        } else if stats.call_count >= warm_threshold {
            PromotionState::Warm
        } else {
            PromotionState::Cold
        };
        stats.state = Some(new_state);
        new_state
    }

    /// Ages every tracked site by one adaptive-executor tick (spec.md §4.8
    /// "counts age each adaptive-executor tick"). A site untouched for
    /// `decay_after_ticks` ticks has its count halved and its cached
    /// fingerprint history cleared; once its count drops back below
    /// `warm_threshold` its state reverts to `Cold` so the next call
    /// re-tree-walks and re-warms rather than jumping straight back to a
    /// stale cached tier. `Compiled`/`Blacklisted` sites are left alone —
    /// decay only un-promotes a site that was merely `Warm`/`Hot`, it never
    /// invalidates a function body that's already been compiled (the
    /// compiled bytecode stays correct and cheap to keep around).
    pub fn tick(&mut self) {
        for stats in self.sites.values_mut() {
            if matches!(stats.state, Some(PromotionState::Compiled) | Some(PromotionState::Blacklisted)) {
                continue;
            }
            stats.ticks_since_call += 1;
            if stats.ticks_since_call < self.decay_after_ticks {
                continue;
            }
            stats.ticks_since_call = 0;
            stats.call_count /= 2;
            stats.recent_fingerprints.clear();
            if stats.call_count < self.warm_threshold {
                stats.state = Some(PromotionState::Cold);
            }
        }
    }

    pub fn mark_compiled(&mut self, body_ptr: usize) {
        if let Some(stats) = self.sites.get_mut(&Self::site_key(body_ptr)) {
            stats.state = Some(PromotionState::Compiled);
        }
    }

    pub fn blacklist(&mut self, body_ptr: usize) {
        self.sites.entry(Self::site_key(body_ptr)).or_default().state = Some(PromotionState::Blacklisted);
    }

    pub fn state_of(&self, body_ptr: usize) -> PromotionState {
        self.sites.get(&Self::site_key(body_ptr)).and_then(|s| s.state).unwrap_or(PromotionState::Cold)
    }

    fn is_stable(history: &std::collections::VecDeque<TypeFingerprint>, window: usize) -> bool {
        history.len() >= window && history.iter().all(|f| f == &history[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    #[test]
    fn promotes_cold_to_warm_to_hot() {
        let mut tracker = HotSpotTracker::new(2, 4, 2);
        let heap = Heap::new();
        let fp = TypeFingerprint::of(&[Value::Number(1.0)], &heap);
        assert_eq!(tracker.record_call(1, fp.clone()), PromotionState::Cold);
        assert_eq!(tracker.record_call(1, fp.clone()), PromotionState::Warm);
        assert_eq!(tracker.record_call(1, fp.clone()), PromotionState::Warm);
        assert_eq!(tracker.record_call(1, fp), PromotionState::Hot);
    }

    #[test]
    fn unstable_types_block_hot_promotion() {
        let mut tracker = HotSpotTracker::new(1, 2, 2);
        let heap = Heap::new();
        let fp_num = TypeFingerprint::of(&[Value::Number(1.0)], &heap);
        let fp_str = TypeFingerprint::of(&[Value::Str("x".into())], &heap);
        tracker.record_call(1, fp_num);
        let state = tracker.record_call(1, fp_str);
        assert_eq!(state, PromotionState::Warm);
    }

    #[test]
    fn blacklisted_site_never_promotes_again() {
        let mut tracker = HotSpotTracker::new(1, 2, 1);
        tracker.blacklist(1);
        let heap = Heap::new();
        let fp = TypeFingerprint::of(&[], &heap);
        assert_eq!(tracker.record_call(1, fp), PromotionState::Blacklisted);
    }

    #[test]
    fn an_idle_site_decays_back_to_cold() {
        let mut tracker = HotSpotTracker::with_decay(2, 100, 1, 3);
        let heap = Heap::new();
        let fp = TypeFingerprint::of(&[Value::Number(1.0)], &heap);
        tracker.record_call(1, fp.clone());
        assert_eq!(tracker.record_call(1, fp), PromotionState::Warm);

        for _ in 0..3 {
            tracker.tick();
        }
        assert_eq!(tracker.state_of(1), PromotionState::Cold);
    }

    #[test]
    fn ticking_resets_after_a_fresh_call() {
        let mut tracker = HotSpotTracker::with_decay(2, 100, 1, 3);
        let heap = Heap::new();
        let fp = TypeFingerprint::of(&[Value::Number(1.0)], &heap);
        tracker.record_call(1, fp.clone());
        tracker.record_call(1, fp.clone());
        tracker.tick();
        tracker.tick();
        // A call resets the idle counter, so one more tick isn't enough to decay.
        tracker.record_call(1, fp);
        tracker.tick();
        assert_eq!(tracker.state_of(1), PromotionState::Warm);
    }

    #[test]
    fn compiled_sites_are_immune_to_decay() {
        let mut tracker = HotSpotTracker::with_decay(1, 2, 1, 1);
        let heap = Heap::new();
        let fp = TypeFingerprint::of(&[Value::Number(1.0)], &heap);
        tracker.record_call(1, fp);
        tracker.mark_compiled(1);
        for _ in 0..5 {
            tracker.tick();
        }
        assert_eq!(tracker.state_of(1), PromotionState::Compiled);
    }
}
