//! Communication plans: which regions a process copies locally, sends to
//! each peer, and receives from each peer, to carry out either a copy
//! between two distributed arrays or a fill of the guard zones of one.
//!
//! Plan construction is a pure function of the descriptor and the calling
//! rank. Every process builds its own plan from the same descriptor, and
//! the send list on one rank mirrors the receive list on the peer, in both
//! content and order, because both are enumerated destination-tile-major
//! and then in tile-index order of the intersections.

use std::collections::BTreeMap;
use rayon::prelude::*;
use crate::box_array::BoxArray;
use crate::distribution_map::DistributionMap;
use crate::index_space::IndexSpace;




/// Hint used to bucket plans in a cache. Equal descriptors always have equal
/// keys; unequal descriptors may share one.
pub type CacheKey = i64;




/**
 * Copy the `region` from source tile `src_index` to destination tile
 * `dst_index`. Both indexes are filled in on every list, so a send tag on one
 * rank compares equal to the matching receive tag on the peer.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CopyComTag<const DIM: usize> {
    pub region: IndexSpace<DIM>,
    pub dst_index: usize,
    pub src_index: usize,
}




/**
 * The communication plan of one process for a single data motion.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct CommPlan<const DIM: usize> {
    local_tags: Vec<CopyComTag<DIM>>,
    send_tags: BTreeMap<usize, Vec<CopyComTag<DIM>>>,
    recv_tags: BTreeMap<usize, Vec<CopyComTag<DIM>>>,
    send_vols: BTreeMap<usize, usize>,
    recv_vols: BTreeMap<usize, usize>,
    reused: bool,
}




// ============================================================================
impl<const DIM: usize> CommPlan<DIM> {

    fn new() -> Self {
        Self {
            local_tags: Vec::new(),
            send_tags: BTreeMap::new(),
            recv_tags: BTreeMap::new(),
            send_vols: BTreeMap::new(),
            recv_vols: BTreeMap::new(),
            reused: false,
        }
    }

    /// Moves with both endpoints owned by this process.
    pub fn local_tags(&self) -> &[CopyComTag<DIM>] {
        &self.local_tags
    }

    /// Outgoing tags, by destination rank.
    pub fn send_tags(&self) -> &BTreeMap<usize, Vec<CopyComTag<DIM>>> {
        &self.send_tags
    }

    /// Incoming tags, by source rank.
    pub fn recv_tags(&self) -> &BTreeMap<usize, Vec<CopyComTag<DIM>>> {
        &self.recv_tags
    }

    /// Number of points sent to each peer.
    pub fn send_vols(&self) -> &BTreeMap<usize, usize> {
        &self.send_vols
    }

    /// Number of points received from each peer.
    pub fn recv_vols(&self) -> &BTreeMap<usize, usize> {
        &self.recv_vols
    }

    /// Whether a cache lookup has hit this plan since it was built.
    pub fn reused(&self) -> bool {
        self.reused
    }

    pub(crate) fn mark_reused(&mut self) {
        self.reused = true
    }

    /**
     * Determine whether this process has nothing to do under this plan.
     */
    pub fn is_empty(&self) -> bool {
        self.local_tags.is_empty() && self.send_tags.is_empty() && self.recv_tags.is_empty()
    }

    /**
     * Rough estimate of the memory held by the plan, for cache statistics.
     */
    pub fn bytes(&self) -> usize {
        let tag = std::mem::size_of::<CopyComTag<DIM>>();
        let vol = 2 * std::mem::size_of::<usize>();
        let num_tags = self.local_tags.len()
            + self.send_tags.values().map(Vec::len).sum::<usize>()
            + self.recv_tags.values().map(Vec::len).sum::<usize>();

        num_tags * tag + (self.send_vols.len() + self.recv_vols.len()) * vol
    }

    fn push(&mut self, route: Route<DIM>) {
        match route {
            Route::Local(tag) => {
                self.local_tags.push(tag)
            }
            Route::Send(peer, tag) => {
                *self.send_vols.entry(peer).or_insert(0) += tag.region.num_points();
                self.send_tags.entry(peer).or_default().push(tag);
            }
            Route::Recv(peer, tag) => {
                *self.recv_vols.entry(peer).or_insert(0) += tag.region.num_points();
                self.recv_tags.entry(peer).or_default().push(tag);
            }
        }
    }
}




/**
 * Where a single intersection ends up in the plan of this process.
 */
enum Route<const DIM: usize> {
    Local(CopyComTag<DIM>),
    Send(usize, CopyComTag<DIM>),
    Recv(usize, CopyComTag<DIM>),
}

fn route<const DIM: usize>(
    my_rank: usize,
    d_owner: usize,
    s_owner: usize,
    tag: CopyComTag<DIM>) -> Option<Route<DIM>>
{
    if d_owner == my_rank && s_owner == my_rank {
        Some(Route::Local(tag))
    } else if d_owner == my_rank {
        Some(Route::Recv(s_owner, tag))
    } else if s_owner == my_rank {
        Some(Route::Send(d_owner, tag))
    } else {
        None
    }
}

/**
 * Assemble a plan from per-destination-tile route lists. The lists are
 * computed in parallel but folded in tile order, so tag order does not
 * depend on scheduling.
 */
fn assemble<const DIM: usize>(per_tile: Vec<Vec<Route<DIM>>>) -> CommPlan<DIM> {
    let mut plan = CommPlan::new();

    for route in per_tile.into_iter().flatten() {
        plan.push(route)
    }
    plan
}




/**
 * A plan descriptor identifies a data motion. Two descriptors that compare
 * equal must produce identical plans.
 */
pub trait PlanDescriptor<const DIM: usize>: Clone + PartialEq {

    /// Return the cache bucket for this descriptor.
    fn cache_key(&self) -> CacheKey;

    /// Build the plan for the process with the given rank.
    fn build(&self, my_rank: usize) -> CommPlan<DIM>;
}




/**
 * Copy from the valid region of every source tile to the valid region of
 * every destination tile it overlaps.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct CopyPlanDescriptor<const DIM: usize> {
    pub dst_ba: BoxArray<DIM>,
    pub src_ba: BoxArray<DIM>,
    pub dst_dm: DistributionMap,
    pub src_dm: DistributionMap,
}

impl<const DIM: usize> CopyPlanDescriptor<DIM> {
    pub fn new(
        dst_ba: BoxArray<DIM>,
        src_ba: BoxArray<DIM>,
        dst_dm: DistributionMap,
        src_dm: DistributionMap) -> Self
    {
        assert_eq!(dst_ba.len(), dst_dm.len(), "destination box array and distribution map differ in length");
        assert_eq!(src_ba.len(), src_dm.len(), "source box array and distribution map differ in length");
        Self { dst_ba, src_ba, dst_dm, src_dm }
    }
}

impl<const DIM: usize> PlanDescriptor<DIM> for CopyPlanDescriptor<DIM> {

    fn cache_key(&self) -> CacheKey {
        (self.dst_ba.len() + self.src_ba.len()) as CacheKey
    }

    fn build(&self, my_rank: usize) -> CommPlan<DIM> {
        let per_tile = (0..self.dst_ba.len())
            .into_par_iter()
            .map(|i| {
                let d_owner = self.dst_dm[i];

                self.src_ba
                    .intersections(&self.dst_ba[i])
                    .into_iter()
                    .filter_map(|(k, region)| {
                        let tag = CopyComTag { region, dst_index: i, src_index: k };
                        route(my_rank, d_owner, self.src_dm[k], tag)
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        assemble(per_tile)
    }
}




/**
 * Fill the `n_grow` guard zones of every tile from the valid regions of its
 * neighbours in the same array. With `cross` set, only the 2 DIM face slabs
 * are filled, so corner zones are never exchanged.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct FillBoundaryDescriptor<const DIM: usize> {
    pub ba: BoxArray<DIM>,
    pub dm: DistributionMap,
    pub n_grow: i64,
    pub cross: bool,
}

impl<const DIM: usize> FillBoundaryDescriptor<DIM> {
    pub fn new(ba: BoxArray<DIM>, dm: DistributionMap, n_grow: i64, cross: bool) -> Self {
        assert!(n_grow >= 0, "fill-boundary plan requested with negative grow {}", n_grow);
        assert_eq!(ba.len(), dm.len(), "box array and distribution map differ in length");
        Self { ba, dm, n_grow, cross }
    }

    /**
     * Return the regions of the guard zone of a tile that are to be filled.
     */
    pub fn halo_queries(&self, vbx: &IndexSpace<DIM>) -> Vec<IndexSpace<DIM>> {
        let g = self.n_grow;

        if self.cross {
            (0..DIM)
                .flat_map(|d| {
                    let lo = vbx.set_small(d, vbx.lo()[d] - g).set_big(d, vbx.lo()[d] - 1);
                    let hi = vbx.set_small(d, vbx.hi()[d] + 1).set_big(d, vbx.hi()[d] + g);
                    vec![lo, hi]
                })
                .collect()
        } else {
            vec![vbx.grow(g)]
        }
    }
}

impl<const DIM: usize> PlanDescriptor<DIM> for FillBoundaryDescriptor<DIM> {

    fn cache_key(&self) -> CacheKey {
        self.ba.len() as CacheKey + self.n_grow + self.cross as CacheKey
    }

    fn build(&self, my_rank: usize) -> CommPlan<DIM> {
        let per_tile = (0..self.ba.len())
            .into_par_iter()
            .map(|i| {
                let d_owner = self.dm[i];

                self.halo_queries(&self.ba[i])
                    .iter()
                    .flat_map(|query| self.ba.intersections(query))
                    .filter(|(k, _)| *k != i)
                    .filter_map(|(k, region)| {
                        let tag = CopyComTag { region, dst_index: i, src_index: k };
                        route(my_rank, d_owner, self.dm[k], tag)
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        assemble(per_tile)
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::index_space::ibox;
    use proptest::prelude::*;

    fn two_tiles() -> BoxArray<2> {
        BoxArray::new(vec![ibox([0, 0], [3, 3]), ibox([4, 0], [7, 3])])
    }

    #[test]
    fn two_rank_cross_fill_boundary_exchanges_one_face() {
        let desc = FillBoundaryDescriptor::new(two_tiles(), DistributionMap::new(vec![0, 1]), 1, true);
        let p0 = desc.build(0);
        let p1 = desc.build(1);

        assert!(p0.local_tags().is_empty());
        assert_eq!(p0.recv_tags()[&1], vec![CopyComTag { region: ibox([4, 0], [4, 3]), dst_index: 0, src_index: 1 }]);
        assert_eq!(p0.send_tags()[&1], vec![CopyComTag { region: ibox([3, 0], [3, 3]), dst_index: 1, src_index: 0 }]);
        assert_eq!(p0.send_vols().get(&1), Some(&4));
        assert_eq!(p0.recv_vols().get(&1), Some(&4));

        assert_eq!(p1.recv_tags()[&0], p0.send_tags()[&1]);
        assert_eq!(p1.send_tags()[&0], p0.recv_tags()[&1]);
    }

    #[test]
    fn single_rank_copy_onto_itself_is_all_local() {
        let ba = BoxArray::decompose(ibox([0, 0], [15, 15]), 8);
        let dm = DistributionMap::new(vec![0; ba.len()]);
        let plan = CopyPlanDescriptor::new(ba.clone(), ba.clone(), dm.clone(), dm).build(0);

        assert_eq!(plan.local_tags().len(), ba.len());
        assert!(plan.local_tags().iter().all(|t| t.src_index == t.dst_index && t.region == ba[t.dst_index]));
        assert!(plan.send_vols().is_empty());
        assert!(plan.recv_vols().is_empty());
    }

    #[test]
    fn rank_without_tiles_gets_an_empty_plan() {
        let desc = FillBoundaryDescriptor::new(two_tiles(), DistributionMap::new(vec![0, 1]), 1, false);
        assert!(desc.build(2).is_empty());
    }

    #[test]
    fn zero_grow_fill_boundary_has_no_work() {
        let desc = FillBoundaryDescriptor::new(two_tiles(), DistributionMap::new(vec![0, 0]), 0, false);
        assert!(desc.build(0).is_empty());
    }

    #[test]
    fn full_grown_halo_includes_corners_and_cross_does_not() {
        let ba = BoxArray::decompose(ibox([0, 0], [7, 7]), 4);
        let dm = DistributionMap::new(vec![0; 4]);
        let full = FillBoundaryDescriptor::new(ba.clone(), dm.clone(), 1, false).build(0);
        let cross = FillBoundaryDescriptor::new(ba, dm, 1, true).build(0);

        // each tile touches two faces and one corner neighbour
        assert_eq!(full.local_tags().len(), 12);
        assert_eq!(cross.local_tags().len(), 8);
        assert!(full.local_tags().iter().any(|t| t.region == ibox([4, 4], [4, 4]) && t.dst_index == 0));
        assert!(!cross.local_tags().iter().any(|t| t.region.num_points() == 1));
    }

    #[test]
    fn cache_keys_follow_descriptor_sizes() {
        let ba = two_tiles();
        let dm = DistributionMap::new(vec![0, 1]);
        assert_eq!(FillBoundaryDescriptor::new(ba.clone(), dm.clone(), 2, true).cache_key(), 5);
        assert_eq!(FillBoundaryDescriptor::new(ba.clone(), dm.clone(), 2, false).cache_key(), 4);
        assert_eq!(CopyPlanDescriptor::new(ba.clone(), ba, dm.clone(), dm).cache_key(), 4);
    }

    #[test]
    #[should_panic]
    fn negative_grow_is_fatal() {
        FillBoundaryDescriptor::new(two_tiles(), DistributionMap::new(vec![0, 1]), -1, true);
    }

    fn arb_layout() -> impl Strategy<Value = (BoxArray<2>, DistributionMap, usize)> {
        (4i64..24, 4i64..24, 2usize..7, 1usize..5, any::<u64>()).prop_map(|(nx, ny, max_size, num_ranks, seed)| {
            let ba = BoxArray::decompose(ibox([0, 0], [nx - 1, ny - 1]), max_size);
            let owners = (0..ba.len()).map(|n| ((seed >> (n % 60)) as usize).wrapping_add(n) % num_ranks).collect();
            (ba, DistributionMap::new(owners), num_ranks)
        })
    }

    fn assert_paired<const DIM: usize>(plans: &[CommPlan<DIM>]) {
        for (r, plan) in plans.iter().enumerate() {
            for (p, tags) in plan.send_tags() {
                assert_eq!(&plans[*p].recv_tags()[&r], tags);
                assert_eq!(plan.send_vols()[p], tags.iter().map(|t| t.region.num_points()).sum::<usize>());
            }
            for (p, tags) in plan.recv_tags() {
                assert_eq!(&plans[*p].send_tags()[&r], tags);
                assert_eq!(plan.recv_vols()[p], tags.iter().map(|t| t.region.num_points()).sum::<usize>());
            }
        }
    }

    proptest! {
        #[test]
        fn fill_boundary_plans_pair_up_across_ranks(
            (ba, dm, num_ranks) in arb_layout(),
            n_grow in 0i64..3,
            cross in any::<bool>(),
        ) {
            let desc = FillBoundaryDescriptor::new(ba.clone(), dm.clone(), n_grow, cross);
            let plans: Vec<_> = (0..num_ranks).map(|r| desc.build(r)).collect();
            assert_paired(&plans);

            for (r, plan) in plans.iter().enumerate() {
                let all = plan.local_tags().iter()
                    .chain(plan.send_tags().values().flatten())
                    .chain(plan.recv_tags().values().flatten());

                for tag in all {
                    prop_assert!(!tag.region.is_empty());
                    prop_assert!(tag.dst_index != tag.src_index);
                    prop_assert!(ba[tag.dst_index].grow(n_grow).contains_space(&tag.region));
                    prop_assert!(ba[tag.src_index].contains_space(&tag.region));
                    prop_assert!(dm[tag.dst_index] == r || dm[tag.src_index] == r);

                    if cross {
                        // a face slab differs from the valid box on exactly one axis
                        let outside = (0..2).filter(|&d| {
                            let lo = ba[tag.dst_index].lo()[d];
                            let hi = ba[tag.dst_index].hi()[d];
                            tag.region.lo()[d] < lo || tag.region.hi()[d] > hi
                        }).count();
                        prop_assert_eq!(outside, 1);
                    }
                }
                for tag in plan.local_tags() {
                    prop_assert!(dm[tag.dst_index] == r && dm[tag.src_index] == r);
                }
            }
        }

        #[test]
        fn copy_plans_pair_up_across_ranks(
            (dst_ba, dst_dm, num_ranks) in arb_layout(),
            src_max_size in 2usize..9,
            shift in 0usize..3,
        ) {
            let domain = dst_ba.minimal_box().unwrap();
            let src_ba = BoxArray::decompose(domain, src_max_size);
            let src_dm = DistributionMap::new((0..src_ba.len()).map(|n| (n + shift) % num_ranks).collect());
            let desc = CopyPlanDescriptor::new(dst_ba.clone(), src_ba.clone(), dst_dm, src_dm);
            let plans: Vec<_> = (0..num_ranks).map(|r| desc.build(r)).collect();
            assert_paired(&plans);

            // every destination point is covered exactly once across all ranks
            let covered: usize = plans.iter().map(|p| {
                p.local_tags().iter().map(|t| t.region.num_points()).sum::<usize>()
                    + p.recv_vols().values().sum::<usize>()
            }).sum();
            prop_assert_eq!(covered, dst_ba.num_points());

            for plan in &plans {
                for tag in plan.send_tags().values().flatten() {
                    prop_assert!(dst_ba[tag.dst_index].contains_space(&tag.region));
                    prop_assert!(src_ba[tag.src_index].contains_space(&tag.region));
                }
            }
        }
    }
}
