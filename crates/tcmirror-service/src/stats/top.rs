use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

struct Ranked<T> {
    score: f64,
    seq: usize,
    item: T,
}

impl<T> PartialEq for Ranked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Ranked<T> {}

impl<T> PartialOrd for Ranked<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Ranked<T> {
    // earlier items rank higher on ties
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Selects the `n` items with the highest `score`, highest first.
///
/// Keeps at most `n` items in memory while consuming `items`.
pub fn top_by<T, F>(items: impl IntoIterator<Item = T>, n: usize, score: F) -> Vec<T>
where
    F: Fn(&T) -> f64,
{
    if n == 0 {
        return Vec::new();
    }

    let mut heap = BinaryHeap::with_capacity(n + 1);
    for (seq, item) in items.into_iter().enumerate() {
        heap.push(Reverse(Ranked {
            score: score(&item),
            seq,
            item,
        }));
        if heap.len() > n {
            heap.pop();
        }
    }

    // ascending order of `Reverse` is descending order of the ranking
    heap.into_sorted_vec()
        .into_iter()
        .map(|Reverse(ranked)| ranked.item)
        .collect()
}
