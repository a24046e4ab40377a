//! Sentence units and greedy size-bounded bucket packing.
//!
//! Units are consumed in arrival order so earlier-submitted requests are
//! never starved by later, larger ones. Units whose decoding-parameter
//! signatures differ never share a bucket: a batched call executes with one
//! decoder configuration.

use crate::config::{DecodingParams, ParamSignature};
use crate::request::UnitId;
use std::collections::VecDeque;
use std::path::PathBuf;

/// One sentence-level unit of work, the atomic unit of batching.
#[derive(Debug, Clone, PartialEq)]
pub struct SentenceUnit {
    /// Identity: owning request plus sequence index
    pub id: UnitId,
    /// Text span to synthesize
    pub text: String,
    /// Estimated token length from segmentation
    pub est_tokens: usize,
    /// Resolved reference-voice audio path
    pub voice_path: PathBuf,
    /// Decoding parameters of the owning request
    pub params: DecodingParams,
    /// Unit cap this request wants for any bucket it joins
    pub bucket_limit: usize,
}

impl SentenceUnit {
    /// Batching compatibility signature of this unit.
    #[must_use]
    pub const fn signature(&self) -> ParamSignature {
        self.params.signature()
    }
}

/// A size-bounded group of compatible sentence units, consumed exactly once
/// by a single batched inference call.
#[derive(Debug, Clone)]
pub struct Bucket {
    units: Vec<SentenceUnit>,
    total_tokens: usize,
}

impl Bucket {
    /// Units in this bucket, in packing order.
    #[must_use]
    pub fn units(&self) -> &[SentenceUnit] {
        &self.units
    }

    /// Number of units in this bucket.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the bucket holds no units.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Sum of the estimated token lengths of all member units.
    #[must_use]
    pub const fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    /// Shared parameter signature of every member unit.
    #[must_use]
    pub fn signature(&self) -> ParamSignature {
        // A bucket is never constructed empty.
        self.units[0].signature()
    }

    /// Identities of the member units.
    #[must_use]
    pub fn unit_ids(&self) -> Vec<UnitId> {
        self.units.iter().map(|u| u.id).collect()
    }

    /// Consume the bucket, yielding its units.
    #[must_use]
    pub fn into_units(self) -> Vec<SentenceUnit> {
        self.units
    }
}

/// Pop the next bucket from the pending pool.
///
/// The front unit fixes the bucket's parameter signature and seeds the unit
/// cap with its own `bucket_limit`; the pool is then scanned in arrival
/// order, skipping incompatible units (they stay put for a later pass). The
/// cap is the running minimum of the members' limits, so a request's hint
/// can both enlarge and shrink the bucket relative to the scheduler default,
/// and the token budget scales with it (`cap * max_tokens_per_sentence`).
/// The bucket closes when adding a unit would exceed either bound. A single
/// unit already at or over the token budget becomes a singleton bucket.
///
/// Returns `None` when the pool is empty.
pub fn take_next(
    pool: &mut VecDeque<SentenceUnit>,
    max_tokens_per_sentence: usize,
) -> Option<Bucket> {
    let front = pool.front()?;
    let signature = front.signature();

    let mut cap = front.bucket_limit.max(1);
    let mut tokens = 0;
    let mut taken_indices: Vec<usize> = Vec::new();

    for (i, unit) in pool.iter().enumerate() {
        if unit.signature() != signature {
            continue;
        }
        let unit_cap = cap.min(unit.bucket_limit.max(1));
        if taken_indices.len() >= unit_cap {
            break;
        }
        let budget = unit_cap.saturating_mul(max_tokens_per_sentence);
        if !taken_indices.is_empty() && tokens + unit.est_tokens > budget {
            break;
        }
        taken_indices.push(i);
        tokens += unit.est_tokens;
        cap = unit_cap;
        if taken_indices.len() >= cap {
            break;
        }
    }

    let mut units = Vec::with_capacity(taken_indices.len());
    let mut remaining = VecDeque::with_capacity(pool.len() - taken_indices.len());
    let mut cursor = taken_indices.iter().copied().peekable();
    for (i, unit) in pool.drain(..).enumerate() {
        if cursor.peek() == Some(&i) {
            cursor.next();
            units.push(unit);
        } else {
            remaining.push_back(unit);
        }
    }
    *pool = remaining;

    Some(Bucket {
        units,
        total_tokens: tokens,
    })
}

/// Pack all pending units into buckets.
///
/// Equivalent to repeatedly calling [`take_next`] until the pool drains.
/// Deterministic: identical input order and limits reproduce identical
/// bucket contents and order.
#[must_use]
pub fn build(units: Vec<SentenceUnit>, max_tokens_per_sentence: usize) -> Vec<Bucket> {
    let mut pool: VecDeque<SentenceUnit> = units.into();
    let mut buckets = Vec::new();
    while let Some(bucket) = take_next(&mut pool, max_tokens_per_sentence) {
        buckets.push(bucket);
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestId;
    use proptest::prelude::*;

    fn unit(request: RequestId, index: u32, est_tokens: usize) -> SentenceUnit {
        SentenceUnit {
            id: UnitId::new(request, index),
            text: format!("unit {index}"),
            est_tokens,
            voice_path: PathBuf::from("/voices/ref.wav"),
            params: DecodingParams::default(),
            bucket_limit: 4,
        }
    }

    fn with_limit(mut unit: SentenceUnit, bucket_limit: usize) -> SentenceUnit {
        unit.bucket_limit = bucket_limit;
        unit
    }

    fn unit_with_params(
        request: RequestId,
        index: u32,
        est_tokens: usize,
        params: DecodingParams,
    ) -> SentenceUnit {
        SentenceUnit {
            params,
            ..unit(request, index, est_tokens)
        }
    }

    #[test]
    fn test_five_units_cap_four_gives_two_buckets() {
        let request = RequestId::new();
        let units: Vec<_> = (0..5).map(|i| unit(request, i, 10)).collect();
        let buckets = build(units, 120);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].len(), 4);
        assert_eq!(buckets[1].len(), 1);
    }

    #[test]
    fn test_token_budget_closes_bucket() {
        let request = RequestId::new();
        // Budget is 2 * 100 = 200; three 90-token units split 2 + 1.
        let units: Vec<_> = (0..3).map(|i| with_limit(unit(request, i, 90), 2)).collect();
        let buckets = build(units, 100);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].len(), 2);
        assert_eq!(buckets[0].total_tokens(), 180);
        assert_eq!(buckets[1].len(), 1);
    }

    #[test]
    fn test_oversized_unit_becomes_singleton() {
        let request = RequestId::new();
        // First unit alone meets the 4 * 30 = 120 budget.
        let units = vec![unit(request, 0, 120), unit(request, 1, 10)];
        let buckets = build(units, 30);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].len(), 1);
        assert_eq!(buckets[0].total_tokens(), 120);
    }

    #[test]
    fn test_incompatible_signatures_never_share() {
        let request = RequestId::new();
        let beams1 = DecodingParams::default().with_num_beams(1);
        let units = vec![
            unit(request, 0, 10),
            unit_with_params(request, 1, 10, beams1.clone()),
            unit(request, 2, 10),
            unit_with_params(request, 3, 10, beams1),
        ];
        let buckets = build(units, 120);
        assert_eq!(buckets.len(), 2);
        for bucket in &buckets {
            let signature = bucket.signature();
            assert!(bucket.units().iter().all(|u| u.signature() == signature));
        }
        // Arrival order preserved within each signature partition.
        assert_eq!(buckets[0].units()[0].id.index, 0);
        assert_eq!(buckets[0].units()[1].id.index, 2);
        assert_eq!(buckets[1].units()[0].id.index, 1);
        assert_eq!(buckets[1].units()[1].id.index, 3);
    }

    #[test]
    fn test_bucket_limit_hint_lowers_cap() {
        let request = RequestId::new();
        let mut units: Vec<_> = (0..4).map(|i| unit(request, i, 10)).collect();
        units[0].bucket_limit = 2;
        let buckets = build(units, 120);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].len(), 2);
        assert_eq!(buckets[1].len(), 2);
    }

    #[test]
    fn test_bucket_limit_hint_raises_cap() {
        let request = RequestId::new();
        let units: Vec<_> = (0..6).map(|i| with_limit(unit(request, i, 10), 6)).collect();
        let buckets = build(units, 120);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].len(), 6);
    }

    #[test]
    fn test_mixed_limits_take_minimum() {
        let request = RequestId::new();
        // Front unit asks for 6, a later member asks for 2: the bucket
        // closes at 2 and the rest wait for the next pass.
        let units = vec![
            with_limit(unit(request, 0, 10), 6),
            with_limit(unit(request, 1, 10), 2),
            with_limit(unit(request, 2, 10), 6),
        ];
        let buckets = build(units, 120);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].len(), 2);
        assert_eq!(buckets[1].len(), 1);
    }

    #[test]
    fn test_take_next_skips_incompatible_front_stays() {
        let request = RequestId::new();
        let beams1 = DecodingParams::default().with_num_beams(1);
        let mut pool: VecDeque<_> = vec![
            unit(request, 0, 10),
            unit_with_params(request, 1, 10, beams1),
            unit(request, 2, 10),
        ]
        .into();
        let bucket = take_next(&mut pool, 120).unwrap();
        assert_eq!(bucket.len(), 2);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.front().unwrap().id.index, 1);
    }

    #[test]
    fn test_empty_pool() {
        let mut pool: VecDeque<SentenceUnit> = VecDeque::new();
        assert!(take_next(&mut pool, 120).is_none());
    }

    #[test]
    fn test_determinism() {
        let request = RequestId::new();
        let units: Vec<_> = (0..10)
            .map(|i| with_limit(unit(request, i, (i as usize % 5) * 20 + 5), 3))
            .collect();
        let a = build(units.clone(), 60);
        let b = build(units, 60);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.unit_ids(), y.unit_ids());
        }
    }

    proptest! {
        #[test]
        fn prop_buckets_respect_limits(
            lens in prop::collection::vec(1usize..=120, 1..40),
            beams in prop::collection::vec(1u32..=3, 1..40),
            max_bucket_size in 1usize..=8,
        ) {
            let request = RequestId::new();
            let max_tokens = 120usize;
            let budget = max_bucket_size * max_tokens;
            let units: Vec<_> = lens
                .iter()
                .zip(beams.iter().cycle())
                .enumerate()
                .map(|(i, (&len, &nb))| with_limit(
                    unit_with_params(
                        request,
                        i as u32,
                        len,
                        DecodingParams::default().with_num_beams(nb),
                    ),
                    max_bucket_size,
                ))
                .collect();
            let total = units.len();
            let buckets = build(units, max_tokens);

            let mut seen = 0;
            for bucket in &buckets {
                prop_assert!(!bucket.is_empty());
                prop_assert!(bucket.len() <= max_bucket_size);
                // Over-budget buckets only as singletons.
                if bucket.len() > 1 {
                    prop_assert!(bucket.total_tokens() <= budget);
                }
                let signature = bucket.signature();
                prop_assert!(bucket.units().iter().all(|u| u.signature() == signature));
                seen += bucket.len();
            }
            prop_assert_eq!(seen, total);
        }

        #[test]
        fn prop_arrival_order_within_signature(
            lens in prop::collection::vec(1usize..=50, 1..30),
        ) {
            let request = RequestId::new();
            let units: Vec<_> = lens
                .iter()
                .enumerate()
                .map(|(i, &len)| unit(request, i as u32, len))
                .collect();
            let buckets = build(units, 120);
            let flattened: Vec<u32> = buckets
                .iter()
                .flat_map(|b| b.units().iter().map(|u| u.id.index))
                .collect();
            let mut sorted = flattened.clone();
            sorted.sort_unstable();
            prop_assert_eq!(flattened, sorted);
        }
    }
}
