//! Who receives which streams (C9, §4.9).
//!
//! Three independent dimensions: global advertisements, global scanner
//! state, and per-peripheral connection/notify events.

use std::collections::{HashMap, HashSet};

use crate::ids::SessionId;

#[derive(Default)]
pub struct SubscriptionRegistry {
    ads: HashSet<SessionId>,
    scanner_state: HashSet<SessionId>,
    per_peripheral: HashMap<u64, HashSet<SessionId>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_ads(&mut self, session: SessionId) {
        self.ads.insert(session);
    }

    pub fn unsubscribe_ads(&mut self, session: SessionId) {
        self.ads.remove(&session);
    }

    pub fn ad_subscriber_count(&self) -> usize {
        self.ads.len()
    }

    pub fn ads_subscribers(&self) -> impl Iterator<Item = &SessionId> {
        self.ads.iter()
    }

    pub fn subscribe_scanner_state(&mut self, session: SessionId) {
        self.scanner_state.insert(session);
    }

    pub fn scanner_state_subscribers(&self) -> impl Iterator<Item = &SessionId> {
        self.scanner_state.iter()
    }

    pub fn subscribe_peripheral(&mut self, session: SessionId, address_key: u64) {
        self.per_peripheral.entry(address_key).or_default().insert(session);
    }

    /// Every session with an open notify subscription on `address_key`
    /// (I3): only these may receive notifications from that peripheral.
    pub fn peripheral_subscribers(&self, address_key: u64) -> impl Iterator<Item = &SessionId> {
        self.per_peripheral
            .get(&address_key)
            .into_iter()
            .flat_map(|set| set.iter())
    }

    /// Removes `session` from every dimension atomically (§4.9).
    pub fn remove_session(&mut self, session: SessionId) {
        self.ads.remove(&session);
        self.scanner_state.remove(&session);
        for set in self.per_peripheral.values_mut() {
            set.remove(&session);
        }
        self.per_peripheral.retain(|_, set| !set.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_session_clears_every_dimension() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe_ads(1);
        registry.subscribe_scanner_state(1);
        registry.subscribe_peripheral(1, 42);
        registry.remove_session(1);
        assert_eq!(registry.ad_subscriber_count(), 0);
        assert_eq!(registry.scanner_state_subscribers().count(), 0);
        assert_eq!(registry.peripheral_subscribers(42).count(), 0);
    }

    #[test]
    fn per_peripheral_subscriptions_are_isolated() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe_peripheral(1, 1);
        registry.subscribe_peripheral(2, 2);
        assert_eq!(registry.peripheral_subscribers(1).count(), 1);
        assert_eq!(registry.peripheral_subscribers(2).count(), 1);
    }
}
