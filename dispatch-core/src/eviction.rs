//! Age-based eviction with self-tuning capacity.

use crate::backend::GpuBackend;
use crate::record::CompiledPassRecord;

/// Runs one collection pass over `records`, in place.
///
/// Sorts by `last_used_frame` descending (most recent first), then walks
/// from the midpoint forward, skipping anything younger than `min_age`
/// frames, and evicts everything from the first eligible index to the end.
/// Returns the number of records evicted; `0` means the caller should
/// double its capacity bound instead, since nothing could be reclaimed.
///
/// Starting the scan at the midpoint guarantees at least half of the
/// records survive a single collection even when all records are of
/// comparable age, which keeps steady workloads from thrashing.
pub fn collect<B: GpuBackend>(
    records: &mut Vec<CompiledPassRecord<B>>,
    backend: &mut B,
    current_frame: u64,
    min_age: u32,
) -> usize {
    records.sort_by(|a, b| b.last_used_frame.cmp(&a.last_used_frame));

    // Ceiling division so the "at least half survive" guarantee holds for
    // odd record counts too (floor division would only guarantee 2 of 5).
    let midpoint = (records.len() + 1) / 2;
    let mut evict_from = None;
    for (i, r) in records.iter().enumerate().skip(midpoint) {
        let age = current_frame.saturating_sub(r.last_used_frame);
        if age >= min_age as u64 {
            evict_from = Some(i);
            break;
        }
    }

    let evict_from = match evict_from {
        Some(i) => i,
        None => return 0,
    };

    let evicted = records.split_off(evict_from);
    let count = evicted.len();
    for record in evicted {
        if let Some(pass) = record.pass {
            backend.pass_destroy(pass);
        }
        if let Some(buf) = record.ubo_buffer {
            backend.buf_destroy(buf);
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use crate::record::RasterMatchKey;
    use crate::signature::Signature;

    fn dummy_record(backend: &mut MockBackend, last_used: u64) -> CompiledPassRecord<MockBackend> {
        let pass = backend.alloc_pass();
        CompiledPassRecord {
            signature: Signature(last_used),
            pass: Some(pass),
            last_used_frame: last_used,
            kind: crate::backend::PassKind::Compute,
            raster_key: RasterMatchKey::default(),
            variables: Vec::new(),
            descriptors: Vec::new(),
            push_constant_scratch: Vec::new(),
            ubo_buffer: None,
            ubo_host_scratch: Vec::new(),
            vertex_scratch: Vec::new(),
            cached_program: None,
        }
    }

    #[test]
    fn at_least_half_survive_when_all_same_age() {
        let mut backend = MockBackend::new();
        let mut records: Vec<_> = (0..10).map(|_| dummy_record(&mut backend, 0)).collect();
        let evicted = collect(&mut records, &mut backend, 20, 10);
        assert!(evicted > 0);
        assert!(records.len() >= 5);
    }

    #[test]
    fn young_records_are_never_evicted() {
        let mut backend = MockBackend::new();
        let mut records: Vec<_> = (0..10).map(|_| dummy_record(&mut backend, 19)).collect();
        let evicted = collect(&mut records, &mut backend, 20, 10);
        assert_eq!(evicted, 0);
        assert_eq!(records.len(), 10);
    }

    #[test]
    fn eviction_prefers_oldest_records() {
        let mut backend = MockBackend::new();
        let mut records = vec![
            dummy_record(&mut backend, 0),
            dummy_record(&mut backend, 0),
            dummy_record(&mut backend, 15),
            dummy_record(&mut backend, 15),
        ];
        collect(&mut records, &mut backend, 20, 10);
        assert!(records.iter().all(|r| r.last_used_frame >= 15));
    }
}
