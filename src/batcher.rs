//! Coalesces advertisements into bounded batches (C4, §4.4, I4).
//!
//! Runs on the scanner's task (single producer); no locking needed.

use std::time::Instant;

use ble_proto::messages::RawAdvertisement;

pub struct Batcher {
    max: usize,
    current: Vec<RawAdvertisement>,
    eldest_at: Option<Instant>,
}

impl Batcher {
    pub fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            current: Vec::new(),
            eldest_at: None,
        }
    }

    /// Appends `ad`; returns `Some(batch)` if the batch just reached `max`.
    pub fn add(&mut self, ad: RawAdvertisement) -> Option<Vec<RawAdvertisement>> {
        if self.current.is_empty() {
            self.eldest_at = Some(Instant::now());
        }
        self.current.push(ad);
        if self.current.len() >= self.max {
            return Some(self.take());
        }
        None
    }

    /// Called by the flush timer; flushes if non-empty and the eldest
    /// element has aged past `flush_interval`.
    pub fn tick(&mut self, flush_interval: std::time::Duration) -> Option<Vec<RawAdvertisement>> {
        let eldest = self.eldest_at?;
        if eldest.elapsed() >= flush_interval {
            Some(self.take())
        } else {
            None
        }
    }

    fn take(&mut self) -> Vec<RawAdvertisement> {
        self.eldest_at = None;
        std::mem::take(&mut self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ad(address: u64) -> RawAdvertisement {
        RawAdvertisement {
            address,
            address_type: 0,
            rssi: -50,
            data: vec![],
        }
    }

    #[test]
    fn flushes_immediately_at_capacity() {
        let mut batcher = Batcher::new(2);
        assert!(batcher.add(ad(1)).is_none());
        let batch = batcher.add(ad(2)).unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn seventeen_ads_become_two_batches_of_sixteen_and_one() {
        let mut batcher = Batcher::new(16);
        let mut flushed = Vec::new();
        for i in 0..17 {
            if let Some(batch) = batcher.add(ad(i)) {
                flushed.push(batch);
            }
        }
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].len(), 16);
        let remainder = batcher.tick(std::time::Duration::from_millis(0)).unwrap();
        assert_eq!(remainder.len(), 1);
    }

    #[test]
    fn tick_does_not_flush_a_fresh_batch() {
        let mut batcher = Batcher::new(16);
        batcher.add(ad(1));
        assert!(batcher
            .tick(std::time::Duration::from_secs(60))
            .is_none());
    }

    #[test]
    fn empty_batcher_never_flushes() {
        let mut batcher = Batcher::new(16);
        assert!(batcher.tick(std::time::Duration::from_millis(0)).is_none());
    }
}
