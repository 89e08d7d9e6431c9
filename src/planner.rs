use log::info;
use crate::config::PlannerConfig;
use crate::error::Result;
use crate::message::Mailbox;
use crate::plan::{CommPlan, CopyPlanDescriptor, FillBoundaryDescriptor};
use crate::plan_cache::{CacheStats, PlanCache, PlanHandle};




/**
 * Owns the copy-plan and fill-boundary-plan caches of one process.
 *
 * Handles returned by `plan_copy` and `plan_fill_boundary` are valid until
 * the next lookup of the same kind; callers are expected to use a handle
 * right away and look the plan up again next time.
 */
pub struct Planner<const DIM: usize> {
    rank: usize,
    config: PlannerConfig,
    copy_cache: PlanCache<CopyPlanDescriptor<DIM>, DIM>,
    fb_cache: PlanCache<FillBoundaryDescriptor<DIM>, DIM>,
}




// ============================================================================
impl<const DIM: usize> Planner<DIM> {


    pub fn new(rank: usize, config: PlannerConfig) -> Self {
        let config = config.normalized();

        Self {
            rank,
            copy_cache: PlanCache::new("copy", config.use_copy_cache, config.copy_cache_max_size),
            fb_cache: PlanCache::new("fill-boundary", config.use_fb_cache, config.fb_cache_max_size),
            config,
        }
    }


    pub fn rank(&self) -> usize {
        self.rank
    }


    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }


    /**
     * Find or build the plan for copying between two layouts. `None` means
     * this process takes no part in the copy.
     */
    pub fn plan_copy(&mut self, descriptor: &CopyPlanDescriptor<DIM>) -> Option<PlanHandle> {
        self.copy_cache.lookup(descriptor, self.rank)
    }


    /**
     * Find or build the plan for filling guard zones. `None` means this
     * process has no guard zones to fill and nothing to send.
     */
    pub fn plan_fill_boundary(&mut self, descriptor: &FillBoundaryDescriptor<DIM>) -> Option<PlanHandle> {
        self.fb_cache.lookup(descriptor, self.rank)
    }


    pub fn copy_plan(&self, handle: PlanHandle) -> Option<&CommPlan<DIM>> {
        self.copy_cache.get(handle)
    }


    pub fn fb_plan(&self, handle: PlanHandle) -> Option<&CommPlan<DIM>> {
        self.fb_cache.get(handle)
    }


    /**
     * Statistics of the copy and fill-boundary caches on this process.
     */
    pub fn stats(&self) -> (CacheStats, CacheStats) {
        (self.copy_cache.stats(), self.fb_cache.stats())
    }


    /**
     * Drop every cached plan. When verbose, first reduce the cache
     * statistics to rank 0, log them there, and return them; other ranks
     * get `None`. This is collective whenever verbose is set.
     */
    pub fn flush(&mut self, mailbox: &Mailbox) -> Result<Option<(CacheStats, CacheStats)>> {
        let mut reduced = None;

        if self.config.verbose {
            let (copy, fb) = self.stats();
            let stats = vec![copy.size, copy.reused, copy.bytes, fb.size, fb.reused, fb.bytes];

            if let Some(max) = mailbox.reduce_max_u64(stats)? {
                let copy = CacheStats { size: max[0], reused: max[1], bytes: max[2] };
                let fb = CacheStats { size: max[3], reused: max[4], bytes: max[5] };

                for line in [summary("copy", &copy), summary("fill-boundary", &fb)].into_iter().flatten() {
                    info!("{}", line);
                }
                reduced = Some((copy, fb));
            }
        }
        self.copy_cache.clear();
        self.fb_cache.clear();
        Ok(reduced)
    }
}




/**
 * The log line for a cache's max-reduced statistics, or `None` if the cache
 * was empty on every rank.
 */
fn summary(name: &str, max: &CacheStats) -> Option<String> {
    if max.size == 0 {
        return None;
    }
    Some(format!(
        "{} cache: max size: {}, max # reused: {}, max bytes used: {}",
        name, max.size, max.reused, max.bytes))
}
