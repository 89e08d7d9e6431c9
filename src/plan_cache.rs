use std::collections::BTreeMap;
use log::debug;
use crate::plan::{CacheKey, CommPlan, PlanDescriptor};




/**
 * Refers to a plan stored in a `PlanCache`. A handle stays meaningful until
 * the next lookup on the same cache, which may evict the plan; after that
 * `PlanCache::get` returns `None` for it rather than a different plan.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PlanHandle {
    key: CacheKey,
    serial: u64,
}




/**
 * Summary of the contents of a cache, as reported when it is flushed.
 */
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub size: u64,
    pub reused: u64,
    pub bytes: u64,
}




struct Entry<P, const DIM: usize> {
    descriptor: P,
    plan: CommPlan<DIM>,
}




/**
 * A bounded cache of communication plans, bucketed by `CacheKey`. Entries
 * are ordered by key and then by insertion, which is the iteration order of
 * the aging sweep and of eviction.
 *
 * When a miss finds the cache full, entries that were never reused are
 * dropped front to back until there is room. If every entry has been
 * reused, the front entry (smallest key) goes instead.
 */
pub struct PlanCache<P, const DIM: usize> {
    entries: BTreeMap<(CacheKey, u64), Entry<P, DIM>>,
    enabled: bool,
    max_size: Option<usize>,
    next_serial: u64,
    name: &'static str,
}




// ============================================================================
impl<P, const DIM: usize> PlanCache<P, DIM>
where
    P: PlanDescriptor<DIM>
{


    /**
     * Create a cache. A `max_size` of -1 means unbounded. A disabled cache
     * keeps only the most recently built plan.
     */
    pub fn new(name: &'static str, enabled: bool, max_size: i64) -> Self {
        let max_size = if max_size < 0 { None } else { Some(max_size as usize) };
        let enabled = enabled && max_size != Some(0);

        Self {
            entries: BTreeMap::new(),
            enabled,
            max_size,
            next_serial: 0,
            name,
        }
    }


    pub fn len(&self) -> usize {
        self.entries.len()
    }


    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }


    pub fn is_enabled(&self) -> bool {
        self.enabled
    }


    /**
     * Return a handle to the plan for the given descriptor, building and
     * inserting it if there is none. Returns `None` if the plan would have
     * no work for this rank; such plans are never stored.
     */
    pub fn lookup(&mut self, descriptor: &P, my_rank: usize) -> Option<PlanHandle> {
        let key = descriptor.cache_key();

        if self.enabled {
            if let Some(handle) = self.find(key, descriptor) {
                debug!("{}: hit on key {}", self.name, key);
                return Some(handle);
            }
            self.make_room();
        } else {
            self.entries.clear();
        }

        debug!("{}: building plan for key {}", self.name, key);
        let plan = descriptor.build(my_rank);

        if plan.is_empty() {
            return None;
        }

        let serial = self.next_serial;
        self.next_serial += 1;
        self.entries.insert((key, serial), Entry { descriptor: descriptor.clone(), plan });

        Some(PlanHandle { key, serial })
    }


    /**
     * Return the plan behind a handle, if it is still in the cache.
     */
    pub fn get(&self, handle: PlanHandle) -> Option<&CommPlan<DIM>> {
        self.entries.get(&(handle.key, handle.serial)).map(|entry| &entry.plan)
    }


    /**
     * Return the size, number of reused entries, and estimated bytes held.
     */
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats { size: self.entries.len() as u64, ..CacheStats::default() };

        for entry in self.entries.values() {
            stats.bytes += entry.plan.bytes() as u64;

            if entry.plan.reused() {
                stats.reused += 1;
            }
        }
        stats
    }


    /**
     * Drop every plan.
     */
    pub fn clear(&mut self) {
        self.entries.clear()
    }


    fn find(&mut self, key: CacheKey, descriptor: &P) -> Option<PlanHandle> {
        self.entries
            .range_mut((key, 0)..=(key, u64::MAX))
            .find(|(_, entry)| entry.descriptor == *descriptor)
            .map(|(&(key, serial), entry)| {
                entry.plan.mark_reused();
                PlanHandle { key, serial }
            })
    }


    fn make_room(&mut self) {
        let cap = match self.max_size {
            Some(cap) => cap,
            None => return,
        };

        if self.entries.len() < cap {
            return;
        }

        let mut stale = Vec::new();
        let mut size = self.entries.len();

        for (id, entry) in &self.entries {
            if size < cap {
                break;
            }
            if !entry.plan.reused() {
                stale.push(*id);
                size -= 1;
            }
        }

        for id in &stale {
            self.entries.remove(id);
        }
        debug!("{}: aging sweep dropped {} unused plans", self.name, stale.len());

        if self.entries.len() >= cap {
            if let Some(&front) = self.entries.keys().next() {
                self.entries.remove(&front);
                debug!("{}: evicted front plan with key {}", self.name, front.0);
            }
        }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::PlanCache;
    use crate::box_array::BoxArray;
    use crate::distribution_map::DistributionMap;
    use crate::index_space::ibox;
    use crate::plan::{CopyPlanDescriptor, FillBoundaryDescriptor, PlanDescriptor};

    fn layout(num_tiles: i64) -> (BoxArray<2>, DistributionMap) {
        let ba = BoxArray::decompose(ibox([0, 0], [4 * num_tiles - 1, 3]), 4);
        let dm = DistributionMap::new(vec![0; ba.len()]);
        (ba, dm)
    }

    fn fb(num_tiles: i64) -> FillBoundaryDescriptor<2> {
        let (ba, dm) = layout(num_tiles);
        FillBoundaryDescriptor::new(ba, dm, 1, false)
    }

    #[test]
    fn second_lookup_hits_and_marks_reused() {
        let mut cache = PlanCache::new("fb", true, 50);
        let desc = fb(3);
        let first = cache.lookup(&desc, 0).unwrap();
        assert!(!cache.get(first).unwrap().reused());

        let second = cache.lookup(&desc.clone(), 0).unwrap();
        assert_eq!(first, second);
        assert!(cache.get(second).unwrap().reused());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().reused, 1);
    }

    #[test]
    fn colliding_keys_are_told_apart_by_equality() {
        let mut cache = PlanCache::new("fb", true, 50);
        let (ba, dm) = layout(4);
        let cross = FillBoundaryDescriptor::new(ba.clone(), dm.clone(), 1, true);
        let wide = FillBoundaryDescriptor::new(ba, dm, 2, false);
        assert_eq!(cross.cache_key(), wide.cache_key());

        let a = cache.lookup(&cross, 0).unwrap();
        let b = cache.lookup(&wide, 0).unwrap();
        assert_ne!(a, b);
        assert_eq!(cache.len(), 2);
        assert!(!cache.get(b).unwrap().reused());
    }

    #[test]
    fn empty_plans_are_not_stored() {
        let mut cache = PlanCache::new("fb", true, 50);
        assert!(cache.lookup(&fb(3), 1).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn full_cache_of_unused_plans_stays_at_capacity() {
        let mut cache = PlanCache::new("fb", true, 50);
        let handles: Vec<_> = (2..52).map(|n| cache.lookup(&fb(n), 0).unwrap()).collect();
        assert_eq!(cache.len(), 50);

        let newest = cache.lookup(&fb(60), 0).unwrap();
        assert_eq!(cache.len(), 50);
        assert!(cache.get(newest).is_some());
        assert!(cache.get(handles[0]).is_none());
        assert!(handles[1..].iter().all(|&h| cache.get(h).is_some()));
    }

    #[test]
    fn sweep_spares_reused_plans() {
        let mut cache = PlanCache::new("fb", true, 3);
        let hot = cache.lookup(&fb(2), 0).unwrap();
        cache.lookup(&fb(2), 0);
        let cold = cache.lookup(&fb(3), 0).unwrap();
        cache.lookup(&fb(4), 0).unwrap();

        cache.lookup(&fb(5), 0).unwrap();
        assert_eq!(cache.len(), 3);
        assert!(cache.get(hot).is_some());
        assert!(cache.get(cold).is_none());
    }

    #[test]
    fn all_hot_cache_evicts_smallest_key() {
        let mut cache = PlanCache::new("fb", true, 2);
        let a = cache.lookup(&fb(2), 0).unwrap();
        let b = cache.lookup(&fb(3), 0).unwrap();
        cache.lookup(&fb(2), 0);
        cache.lookup(&fb(3), 0);

        let c = cache.lookup(&fb(4), 0).unwrap();
        assert!(cache.get(a).is_none());
        assert!(cache.get(b).is_some());
        assert!(cache.get(c).is_some());
    }

    #[test]
    fn disabled_cache_rebuilds_every_time() {
        let mut cache = PlanCache::new("fb", false, 50);
        let first = cache.lookup(&fb(3), 0).unwrap();
        let second = cache.lookup(&fb(3), 0).unwrap();
        assert_ne!(first, second);
        assert!(cache.get(first).is_none());
        assert!(!cache.get(second).unwrap().reused());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn unbounded_cache_grows() {
        let mut cache = PlanCache::new("copy", true, -1);

        for n in 2..70 {
            let (ba, dm) = layout(n);
            cache.lookup(&CopyPlanDescriptor::new(ba.clone(), ba, dm.clone(), dm), 0).unwrap();
        }
        assert_eq!(cache.len(), 68);
        assert!(cache.stats().bytes > 0);
    }
}
