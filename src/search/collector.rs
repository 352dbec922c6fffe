//! Top-k selection.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::core::distance::Scorer;
use crate::core::types::VectorId;

/// A scored candidate.
///
/// `cost` is the metric-normalized rank key (smaller is better); `score` is
/// the value reported to callers.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub cost: f32,
    pub id: VectorId,
    pub score: f32,
}

impl Candidate {
    pub fn new(scorer: &Scorer, id: VectorId, score: f32) -> Self {
        Candidate {
            cost: scorer.cost(score),
            id,
            score,
        }
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    /// Better candidates order first: lower cost, then lower id.
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost
            .total_cmp(&other.cost)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Keeps the `k` best candidates seen so far.
///
/// The heap is a max-heap on [`Candidate`] order, so its top is the worst
/// retained candidate and is the one evicted by a better arrival.
#[derive(Debug, Clone)]
pub struct TopKCollector {
    k: usize,
    heap: BinaryHeap<Candidate>,
}

impl TopKCollector {
    pub fn new(k: usize) -> Self {
        TopKCollector {
            k,
            heap: BinaryHeap::with_capacity(k.min(4096) + 1),
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.k
    }

    /// Worst retained candidate, once the collector is full.
    pub fn threshold(&self) -> Option<&Candidate> {
        if self.is_full() { self.heap.peek() } else { None }
    }

    /// Offer a candidate. Returns whether it was retained.
    pub fn push(&mut self, candidate: Candidate) -> bool {
        if self.k == 0 {
            return false;
        }
        if self.heap.len() < self.k {
            self.heap.push(candidate);
            return true;
        }
        match self.heap.peek() {
            Some(worst) if candidate < *worst => {
                self.heap.pop();
                self.heap.push(candidate);
                true
            }
            _ => false,
        }
    }

    /// Fold another collector's candidates into this one.
    pub fn merge(&mut self, other: TopKCollector) {
        for candidate in other.heap {
            self.push(candidate);
        }
    }

    /// Retained candidates, best first.
    pub fn into_sorted_vec(self) -> Vec<Candidate> {
        self.heap.into_sorted_vec()
    }
}
