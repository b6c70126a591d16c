//! Delivery invariant tracking.
//!
//! - No duplicates: each sequence number is dispatched at most once
//! - No phantoms: every dispatched sequence number was sent
//! - Ordering: dispatch order equals send order
//! - Completeness: after quiescence everything sent was dispatched

use std::collections::HashSet;

/// Tracks sent and dispatched sequence numbers for one message stream.
#[derive(Debug, Default, Clone)]
pub struct DeliveryInvariants {
    /// Sequence numbers in send order.
    pub sent: Vec<u64>,
    /// Sequence numbers in dispatch order.
    pub received: Vec<u64>,
    seen: HashSet<u64>,
    /// Dispatches of an already seen sequence number.
    pub duplicates: u64,
}

impl DeliveryInvariants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&mut self, sequence: u64) {
        self.sent.push(sequence);
    }

    /// Record a dispatch. Returns true if it was a duplicate.
    pub fn record_received(&mut self, sequence: u64) -> bool {
        self.received.push(sequence);
        let duplicate = !self.seen.insert(sequence);
        if duplicate {
            self.duplicates += 1;
        }
        duplicate
    }

    /// Invariants that hold at every point of a run.
    pub fn validate_always(&self) {
        assert_eq!(self.duplicates, 0, "duplicate dispatches detected");

        let sent: HashSet<u64> = self.sent.iter().copied().collect();
        for sequence in &self.received {
            assert!(
                sent.contains(sequence),
                "dispatched message {sequence} was never sent"
            );
        }

        let expected: Vec<u64> = self
            .sent
            .iter()
            .copied()
            .filter(|s| self.seen.contains(s))
            .collect();
        assert_eq!(self.received, expected, "dispatch order differs from send order");
    }

    /// Invariants that hold once both sides are quiet and nothing was lost.
    pub fn validate_complete(&self) {
        self.validate_always();
        assert_eq!(
            self.received.len(),
            self.sent.len(),
            "sent {} messages but dispatched {}",
            self.sent.len(),
            self.received.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_delivery_validates() {
        let mut inv = DeliveryInvariants::new();
        for s in 0..3 {
            inv.record_sent(s);
        }
        for s in 0..3 {
            assert!(!inv.record_received(s));
        }
        inv.validate_complete();
    }

    #[test]
    #[should_panic(expected = "dispatch order differs")]
    fn test_reordering_is_caught() {
        let mut inv = DeliveryInvariants::new();
        inv.record_sent(0);
        inv.record_sent(1);
        inv.record_received(1);
        inv.record_received(0);
        inv.validate_always();
    }

    #[test]
    #[should_panic(expected = "duplicate")]
    fn test_duplicate_is_caught() {
        let mut inv = DeliveryInvariants::new();
        inv.record_sent(0);
        inv.record_received(0);
        inv.record_received(0);
        inv.validate_always();
    }
}
