use std::collections::BTreeMap;
use std::sync::Arc;
use log::trace;
use rayon::prelude::*;
use crate::box_array::BoxArray;
use crate::context::Context;
use crate::distribution_map::DistributionMap;
use crate::error::Result;
use crate::message::{Mailbox, Tag};
use crate::plan::{CommPlan, CopyComTag, CopyPlanDescriptor, FillBoundaryDescriptor};
use crate::patch::Patch;




/**
 * A field distributed over the tiles of a box array. Each rank stores the
 * patches of the tiles the distribution map assigns to it. Operations that
 * move data or reduce over tiles are collective: every rank must call them
 * in the same order.
 */
pub struct PatchArray<const DIM: usize> {
    context: Arc<Context<DIM>>,
    ba: BoxArray<DIM>,
    dm: DistributionMap,
    n_grow: i64,
    patches: BTreeMap<usize, Patch<DIM>>,
}




// ============================================================================
impl<const DIM: usize> PatchArray<DIM> {


    /**
     * Create a zero-filled array.
     */
    pub fn new(context: Arc<Context<DIM>>, ba: BoxArray<DIM>, dm: DistributionMap, n_grow: i64) -> Self {
        assert_eq!(ba.len(), dm.len(), "box array and distribution map differ in length");
        assert!(n_grow >= 0, "patch array requested with negative grow {}", n_grow);

        let patches = dm
            .local_indices(context.rank())
            .into_iter()
            .map(|n| (n, Patch::new(ba[n], n_grow)))
            .collect();

        Self { context, ba, dm, n_grow, patches }
    }


    /**
     * Create a zero-filled array with the same layout as another one.
     */
    pub fn like(other: &Self, n_grow: i64) -> Self {
        Self::new(other.context.clone(), other.ba.clone(), other.dm.clone(), n_grow)
    }


    pub fn context(&self) -> &Arc<Context<DIM>> {
        &self.context
    }


    pub fn box_array(&self) -> &BoxArray<DIM> {
        &self.ba
    }


    pub fn distribution_map(&self) -> &DistributionMap {
        &self.dm
    }


    pub fn n_grow(&self) -> i64 {
        self.n_grow
    }


    /**
     * Return the number of tiles in the whole array.
     */
    pub fn size(&self) -> usize {
        self.ba.len()
    }


    pub fn local_indices(&self) -> Vec<usize> {
        self.patches.keys().copied().collect()
    }


    /**
     * Return the patch of a tile owned by this rank.
     */
    pub fn patch(&self, tile: usize) -> &Patch<DIM> {
        self.patches.get(&tile).unwrap_or_else(|| panic!("tile {} is not local to rank {}", tile, self.context.rank()))
    }


    pub fn patch_mut(&mut self, tile: usize) -> &mut Patch<DIM> {
        let rank = self.context.rank();
        self.patches.get_mut(&tile).unwrap_or_else(|| panic!("tile {} is not local to rank {}", tile, rank))
    }


    pub fn patches(&self) -> impl Iterator<Item = (usize, &Patch<DIM>)> {
        self.patches.iter().map(|(&n, p)| (n, p))
    }


    pub fn patches_mut(&mut self) -> impl Iterator<Item = (usize, &mut Patch<DIM>)> {
        self.patches.iter_mut().map(|(&n, p)| (n, p))
    }


    /**
     * Set every value, guard zones included.
     */
    pub fn set_val(&mut self, value: f64) {
        self.patches.par_iter_mut().for_each(|(_, p)| p.fill(value))
    }


    /**
     * Set every value from a function of the global index, guard zones
     * included.
     */
    pub fn set_from_function<F>(&mut self, f: F)
    where
        F: Fn([i64; DIM]) -> f64 + Sync
    {
        self.patches.par_iter_mut().for_each(|(_, p)| {
            *p = Patch::from_function(p.valid(), p.n_grow(), &f)
        })
    }


    /**
     * Fill the guard zones of every tile from the valid regions of
     * neighbouring tiles. With `cross` set only the face slabs are filled.
     * Guard cells that no tile covers are left alone.
     */
    pub fn fill_boundary(&mut self, cross: bool) -> Result<()> {
        let descriptor = FillBoundaryDescriptor::new(self.ba.clone(), self.dm.clone(), self.n_grow, cross);
        let context = self.context.clone();
        let tag = context.mailbox().next_tag();
        let mut planner = context.planner();
        let async_sends = planner.config().do_async_sends;

        let plan = match planner.plan_fill_boundary(&descriptor) {
            Some(handle) => planner.fb_plan(handle),
            None => None,
        };

        if let Some(plan) = plan {
            let outgoing = Outgoing::gather(plan, &self.patches);
            outgoing.deliver(plan, context.mailbox(), tag, async_sends, &mut self.patches)?;
        }
        Ok(())
    }


    /**
     * Copy the valid cells of another array onto the valid cells of this one
     * where they overlap. The two arrays may have any layouts over the same
     * context.
     */
    pub fn parallel_copy(&mut self, src: &Self) -> Result<()> {
        assert!(Arc::ptr_eq(&self.context, &src.context), "parallel copy between arrays on different contexts");

        let descriptor = CopyPlanDescriptor::new(self.ba.clone(), src.ba.clone(), self.dm.clone(), src.dm.clone());
        let context = self.context.clone();
        let tag = context.mailbox().next_tag();
        let mut planner = context.planner();
        let async_sends = planner.config().do_async_sends;

        let plan = match planner.plan_copy(&descriptor) {
            Some(handle) => planner.copy_plan(handle),
            None => None,
        };

        if let Some(plan) = plan {
            let outgoing = Outgoing::gather(plan, &src.patches);
            outgoing.deliver(plan, context.mailbox(), tag, async_sends, &mut self.patches)?;
        }
        Ok(())
    }


    /**
     * Copy the valid cells of an array with the same layout.
     */
    pub fn copy_valid(&mut self, src: &Self) {
        self.assert_same_layout(src);

        self.patches.par_iter_mut().for_each(|(n, p)| {
            p.copy_region(&src.patches[n], &p.valid())
        })
    }


    /**
     * Replace the valid cells with `self + a x`.
     */
    pub fn saxpy(&mut self, a: f64, x: &Self) {
        self.assert_same_layout(x);

        self.patches.par_iter_mut().for_each(|(n, p)| {
            let x = &x.patches[n];

            for index in p.valid().iter() {
                p[index] += a * x[index]
            }
        })
    }


    /**
     * Replace the valid cells with `a x + b y`.
     */
    pub fn lin_comb(&mut self, a: f64, x: &Self, b: f64, y: &Self) {
        self.assert_same_layout(x);
        self.assert_same_layout(y);

        self.patches.par_iter_mut().for_each(|(n, p)| {
            let x = &x.patches[n];
            let y = &y.patches[n];

            for index in p.valid().iter() {
                p[index] = a * x[index] + b * y[index]
            }
        })
    }


    /**
     * Multiply the valid cells by a constant.
     */
    pub fn scale(&mut self, a: f64) {
        self.patches.par_iter_mut().for_each(|(_, p)| {
            for index in p.valid().iter() {
                p[index] *= a
            }
        })
    }


    /**
     * Inner product over the valid cells of all ranks.
     */
    pub fn dot(&self, other: &Self) -> Result<f64> {
        self.assert_same_layout(other);

        let local: f64 = self.patches
            .par_iter()
            .map(|(n, p)| {
                let q = &other.patches[n];
                p.valid().iter().map(|index| p[index] * q[index]).sum::<f64>()
            })
            .sum();

        self.context.mailbox().all_reduce_sum_f64(local)
    }


    /**
     * Largest absolute value over the valid cells of all ranks.
     */
    pub fn norm_inf(&self) -> Result<f64> {
        let local = self.patches
            .par_iter()
            .map(|(_, p)| p.valid().iter().fold(0.0, |m: f64, index| m.max(p[index].abs())))
            .reduce(|| 0.0, f64::max);

        self.context.mailbox().all_reduce_max_f64(local)
    }


    pub fn norm_l2(&self) -> Result<f64> {
        Ok(self.dot(self)?.sqrt())
    }


    /**
     * Sum of the valid cells of all ranks.
     */
    pub fn sum(&self) -> Result<f64> {
        let local: f64 = self.patches
            .par_iter()
            .map(|(_, p)| p.valid().iter().map(|index| p[index]).sum::<f64>())
            .sum();

        self.context.mailbox().all_reduce_sum_f64(local)
    }


    fn assert_same_layout(&self, other: &Self) {
        assert!(
            self.ba == other.ba && self.dm == other.dm,
            "operation needs arrays with the same box array and distribution map");
    }
}




/**
 * The data leaving the source patches under a plan, read out before any
 * destination patch is written. This lets the source and destination be
 * the same set of patches.
 */
struct Outgoing<const DIM: usize> {
    sends: Vec<(usize, Vec<f64>)>,
    local: Vec<(CopyComTag<DIM>, Vec<f64>)>,
}

impl<const DIM: usize> Outgoing<DIM> {

    fn gather(plan: &CommPlan<DIM>, src: &BTreeMap<usize, Patch<DIM>>) -> Self {
        let sends = plan
            .send_tags()
            .iter()
            .map(|(&peer, tags)| {
                let mut buffer = Vec::with_capacity(plan.send_vols()[&peer]);

                for tag in tags {
                    src[&tag.src_index].pack_into(&tag.region, &mut buffer)
                }
                (peer, buffer)
            })
            .collect();

        let local = plan
            .local_tags()
            .iter()
            .map(|tag| (*tag, src[&tag.src_index].pack(&tag.region)))
            .collect();

        Self { sends, local }
    }

    fn deliver(
        self,
        plan: &CommPlan<DIM>,
        mailbox: &Mailbox,
        tag: Tag,
        async_sends: bool,
        dst: &mut BTreeMap<usize, Patch<DIM>>) -> Result<()>
    {
        let Self { sends, local } = self;

        if async_sends {
            Self::post(sends, mailbox, tag)?;
            Self::copy_local(local, dst);
        } else {
            Self::copy_local(local, dst);
            Self::post(sends, mailbox, tag)?;
        }

        for (&peer, tags) in plan.recv_tags() {
            let buffer: Vec<f64> = mailbox.recv_value(peer, tag)?;
            let mut offset = 0;

            for t in tags {
                let patch = dst.get_mut(&t.dst_index).unwrap_or_else(|| panic!("plan receives into non-local tile {}", t.dst_index));
                offset += patch.unpack(&t.region, &buffer[offset..]);
            }
            trace!("received {} values from rank {} under tag {}", offset, peer, tag);
        }
        Ok(())
    }

    fn post(sends: Vec<(usize, Vec<f64>)>, mailbox: &Mailbox, tag: Tag) -> Result<()> {
        for (peer, buffer) in sends {
            trace!("sending {} values to rank {} under tag {}", buffer.len(), peer, tag);
            mailbox.send_value(peer, tag, &buffer)?;
        }
        Ok(())
    }

    fn copy_local(local: Vec<(CopyComTag<DIM>, Vec<f64>)>, dst: &mut BTreeMap<usize, Patch<DIM>>) {
        for (tag, buffer) in local {
            if let Some(patch) = dst.get_mut(&tag.dst_index) {
                patch.unpack(&tag.region, &buffer);
            }
        }
    }
}
