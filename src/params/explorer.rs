//! Parameter Space Explorer: spec §4.2. Streaming Cartesian-product
//! enumeration with O(1) extra memory (mixed-radix counter over
//! per-parameter materialized value arrays), indexed random access, and
//! batched parallel enumeration.

use super::definition::ParameterDefinition;
use super::set::ParameterSet;
use super::value::ParamValue;
use crate::errors::CoreError;
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;

/// How often (in combinations produced) enumeration checks the cancellation
/// signal, per spec §4.2/§5.
const CANCEL_CHECK_INTERVAL: u64 = 1000;

pub struct MemoryEstimate {
    pub parameter_count: usize,
    pub total_combinations: Option<i64>,
    pub bytes_per_combination: usize,
    pub streaming_bytes: usize,
    pub materialized_bytes: Option<i64>,
}

/// Transforms an ordered array of parameter definitions into the full
/// Cartesian product of their value sets, exactly once, in mixed-radix
/// order (rightmost parameter varies fastest).
pub struct ParameterSpaceExplorer {
    names: Vec<String>,
    values: Vec<Vec<ParamValue>>,
    radii: Vec<i64>,
    total: Option<i64>,
}

impl ParameterSpaceExplorer {
    pub fn new(defs: &[ParameterDefinition]) -> Result<Self, CoreError> {
        if defs.is_empty() {
            return Err(CoreError::EmptyDefinitions);
        }
        let names: Vec<String> = defs.iter().map(|d| d.name.clone()).collect();
        let values: Vec<Vec<ParamValue>> = defs.iter().map(ParameterDefinition::generate_values).collect();
        let radii: Vec<i64> = values.iter().map(|v| v.len() as i64).collect();

        let total = if radii.iter().any(|&r| r == 0) {
            Some(0)
        } else {
            radii.iter().try_fold(1i64, |acc, &r| acc.checked_mul(r))
        };

        Ok(Self {
            names,
            values,
            radii,
            total,
        })
    }

    /// Product of per-parameter value counts; `None` ("unknown") if any
    /// factor is unknown (there is none here — `generate_values` is always
    /// finite) or the product overflows `i64`.
    #[must_use]
    pub fn total_combinations(&self) -> Option<i64> {
        self.total
    }

    /// Mixed-radix decode of an arbitrary linear index into its
    /// per-parameter indices, rightmost parameter varying fastest.
    fn decode(&self, mut index: i64) -> Vec<usize> {
        let mut out = vec![0usize; self.radii.len()];
        for i in (0..self.radii.len()).rev() {
            let radix = self.radii[i].max(1);
            out[i] = (index % radix) as usize;
            index /= radix;
        }
        out
    }

    fn set_from_indices(&self, indices: &[usize]) -> ParameterSet {
        let mut set = ParameterSet::new();
        for (i, name) in self.names.iter().enumerate() {
            set.insert(name.clone(), self.values[i][indices[i]]);
        }
        set
    }

    /// O(P) mixed-radix decode at an arbitrary index. Fails with
    /// `index-out-of-range` outside `[0, total)`.
    pub fn get_by_index(&self, index: i64) -> Result<ParameterSet, CoreError> {
        let total = self.total.unwrap_or(i64::MAX);
        if index < 0 || index >= total {
            return Err(CoreError::IndexOutOfRange { index, total });
        }
        Ok(self.set_from_indices(&self.decode(index)))
    }

    /// Streaming enumeration of the full Cartesian product exactly once:
    /// O(1) extra memory beyond the iterator's own mixed-radix counter, one
    /// `ParameterSet` materialized per `next()` call rather than all of
    /// them up front. Checks `cancel` every [`CANCEL_CHECK_INTERVAL`]
    /// combinations yielded.
    pub fn enumerate(&self, cancel: Option<CancellationToken>) -> Result<EnumerateIter<'_>, CoreError> {
        let total = self
            .total
            .ok_or_else(|| CoreError::InvalidArgument("total combinations overflow i64".into()))?;
        Ok(EnumerateIter {
            explorer: self,
            indices: vec![0usize; self.radii.len()],
            produced: 0,
            total,
            cancel,
            done: false,
        })
    }

    /// Advances a mixed-radix counter by one, rightmost digit fastest.
    fn increment(indices: &mut [usize], radii: &[i64]) {
        for i in (0..indices.len()).rev() {
            indices[i] += 1;
            if (indices[i] as i64) < radii[i] {
                return;
            }
            indices[i] = 0;
        }
    }

    /// Partitions `[0, total)` into contiguous batches of `batch_size`,
    /// computing each batch in parallel by indexed lookup (never by
    /// concurrent mutation of a shared counter — spec §9), bounded by
    /// `max_parallelism`, preserving global order between and within
    /// batches.
    pub fn enumerate_batches(
        &self,
        batch_size: i64,
        max_parallelism: usize,
    ) -> Result<Vec<Vec<ParameterSet>>, CoreError> {
        if batch_size <= 0 {
            return Err(CoreError::InvalidArgument("batch_size must be > 0".into()));
        }
        let total = self
            .total
            .ok_or_else(|| CoreError::InvalidArgument("total combinations overflow i64".into()))?;

        let starts: Vec<i64> = (0..total).step_by(batch_size as usize).collect();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_parallelism.max(1))
            .build()
            .map_err(|e| CoreError::InvalidArgument(e.to_string()))?;

        pool.install(|| {
            starts
                .par_iter()
                .map(|&start| {
                    let end = (start + batch_size).min(total);
                    (start..end)
                        .map(|i| self.get_by_index(i))
                        .collect::<Result<Vec<_>, _>>()
                })
                .collect::<Result<Vec<_>, _>>()
        })
    }

    #[must_use]
    pub fn memory_estimate(&self) -> MemoryEstimate {
        let bytes_per_combination = self.names.len() * (24 /* String overhead amortized */ + 16);
        MemoryEstimate {
            parameter_count: self.names.len(),
            total_combinations: self.total,
            bytes_per_combination,
            streaming_bytes: bytes_per_combination,
            materialized_bytes: self.total.map(|t| t * bytes_per_combination as i64),
        }
    }
}

/// Lazily yields one combination per `next()` call, advancing a mixed-radix
/// counter in place. Holds no state proportional to `total` — a caller that
/// drops this after consuming a handful of items never pays for the rest.
pub struct EnumerateIter<'a> {
    explorer: &'a ParameterSpaceExplorer,
    indices: Vec<usize>,
    produced: i64,
    total: i64,
    cancel: Option<CancellationToken>,
    done: bool,
}

impl Iterator for EnumerateIter<'_> {
    type Item = Result<ParameterSet, CoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.produced >= self.total {
            return None;
        }
        if self.produced > 0 && self.produced % CANCEL_CHECK_INTERVAL as i64 == 0 {
            if let Some(token) = &self.cancel {
                if token.is_cancelled() {
                    self.done = true;
                    return Some(Err(CoreError::OperationCancelled));
                }
            }
        }
        let set = self.explorer.set_from_indices(&self.indices);
        ParameterSpaceExplorer::increment(&mut self.indices, &self.explorer.radii);
        self.produced += 1;
        Some(Ok(set))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.total - self.produced).max(0) as usize;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::value::ParamKind;

    fn def(name: &str, min: i64, max: i64, step: i64) -> ParameterDefinition {
        ParameterDefinition::new(
            name,
            ParamKind::Integer,
            Some(ParamValue::Integer(min)),
            Some(ParamValue::Integer(max)),
            None,
            Some(ParamValue::Integer(step)),
            true,
        )
        .unwrap()
    }

    // S1 — Enumeration count.
    #[test]
    fn s1_enumeration_count_and_ordering() {
        let defs = vec![def("x", 1, 5, 1), def("y", 10, 12, 1), def("z", 0, 1, 1)];
        let explorer = ParameterSpaceExplorer::new(&defs).unwrap();
        assert_eq!(explorer.total_combinations(), Some(30));

        let all: Vec<ParameterSet> = explorer.enumerate(None).unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(all.len(), 30);

        let first = &all[0];
        assert_eq!(first.get("x"), Some(&ParamValue::Integer(1)));
        assert_eq!(first.get("y"), Some(&ParamValue::Integer(10)));
        assert_eq!(first.get("z"), Some(&ParamValue::Integer(0)));

        let last = &all[29];
        assert_eq!(last.get("x"), Some(&ParamValue::Integer(5)));
        assert_eq!(last.get("y"), Some(&ParamValue::Integer(12)));
        assert_eq!(last.get("z"), Some(&ParamValue::Integer(1)));
    }

    #[test]
    fn get_by_index_matches_enumerate_nth() {
        let defs = vec![def("x", 1, 5, 1), def("y", 10, 12, 1)];
        let explorer = ParameterSpaceExplorer::new(&defs).unwrap();
        let all: Vec<ParameterSet> = explorer.enumerate(None).unwrap().collect::<Result<_, _>>().unwrap();
        for (i, expected) in all.iter().enumerate() {
            let got = explorer.get_by_index(i as i64).unwrap();
            assert_eq!(&got, expected);
        }
    }

    #[test]
    fn index_out_of_range_errors() {
        let defs = vec![def("x", 1, 5, 1)];
        let explorer = ParameterSpaceExplorer::new(&defs).unwrap();
        assert!(matches!(
            explorer.get_by_index(-1),
            Err(CoreError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            explorer.get_by_index(5),
            Err(CoreError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn empty_definitions_rejected() {
        assert!(matches!(
            ParameterSpaceExplorer::new(&[]),
            Err(CoreError::EmptyDefinitions)
        ));
    }

    #[test]
    fn batches_cover_total_in_order() {
        let defs = vec![def("x", 1, 5, 1), def("y", 10, 12, 1)];
        let explorer = ParameterSpaceExplorer::new(&defs).unwrap();
        let batches = explorer.enumerate_batches(4, 2).unwrap();
        let flattened: Vec<_> = batches.into_iter().flatten().collect();
        let direct: Vec<ParameterSet> = explorer.enumerate(None).unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(flattened, direct);
    }

    #[test]
    fn zero_value_parameter_yields_empty_enumeration() {
        // An inverted or zero-width range is rejected at construction, so we
        // simulate "emits zero values" via an unbounded parameter with no
        // default: generate_values() returns empty, total_combinations is 0.
        let zero_def = ParameterDefinition::new(
            "z",
            ParamKind::Integer,
            None,
            None,
            None,
            None,
            false,
        )
        .unwrap();
        let explorer = ParameterSpaceExplorer::new(&[zero_def]).unwrap();
        assert_eq!(explorer.total_combinations(), Some(0));
        assert_eq!(explorer.enumerate(None).unwrap().count(), 0);
    }

    #[test]
    fn enumerate_is_lazy_and_cancellable() {
        let defs = vec![def("x", 1, 5000, 1)];
        let explorer = ParameterSpaceExplorer::new(&defs).unwrap();
        let token = CancellationToken::new();
        let mut iter = explorer.enumerate(Some(token.clone())).unwrap();

        // Pulling a handful of items never advances past CANCEL_CHECK_INTERVAL,
        // so cancelling afterward is still observed on the next pull.
        for _ in 0..5 {
            assert!(iter.next().unwrap().is_ok());
        }
        token.cancel();
        for _ in 0..(CANCEL_CHECK_INTERVAL - 5) {
            assert!(iter.next().unwrap().is_ok());
        }
        assert!(matches!(iter.next(), Some(Err(CoreError::OperationCancelled))));
        assert!(iter.next().is_none());
    }
}
