// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use tokio::sync::mpsc;

/// Accepts block plaintexts for opportunistic reinsertion.
///
/// Healing is best-effort: implementations may drop offers under
/// backpressure and callers must not rely on acceptance.
pub trait HealingQueue: Send + Sync {
    /// Offers a block plaintext for reinsertion. Returns whether the offer
    /// was accepted.
    fn queue(&self, data: Vec<u8>) -> bool;
}

/// A healing queue that drops every offer.
pub struct NullHealingQueue;

impl HealingQueue for NullHealingQueue {
    fn queue(&self, _data: Vec<u8>) -> bool {
        false
    }
}

/// A healing queue handing offers to a bounded channel, dropping on
/// backpressure.
pub struct ChannelHealingQueue {
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelHealingQueue {
    /// Creates a new [`ChannelHealingQueue`] with the given capacity.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl HealingQueue for ChannelHealingQueue {
    fn queue(&self, data: Vec<u8>) -> bool {
        match self.tx.try_send(data) {
            Ok(()) => true,
            Err(_) => {
                log::trace!("Healing queue full, dropping offer.");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_queue_accepts_until_full() {
        let (queue, mut rx) = ChannelHealingQueue::new(2);

        assert!(queue.queue(vec![1]));
        assert!(queue.queue(vec![2]));
        assert!(!queue.queue(vec![3]));

        assert_eq!(rx.try_recv().unwrap(), vec![1]);
        assert_eq!(rx.try_recv().unwrap(), vec![2]);
    }
}
