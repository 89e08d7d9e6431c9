use std::ops::Index;
use std::sync::Arc;
use crate::box_array::BoxArray;




/**
 * Assignment of each tile in a box array to the rank of the process that
 * owns it. Equality is structural; clones share storage.
 */
#[derive(Clone, Debug)]
pub struct DistributionMap {
    owners: Arc<Vec<usize>>,
}




// ============================================================================
impl DistributionMap {

    pub fn new(owners: Vec<usize>) -> Self {
        Self { owners: Arc::new(owners) }
    }

    /**
     * Deal `num_tiles` tiles to `num_ranks` ranks like cards.
     */
    pub fn round_robin(num_tiles: usize, num_ranks: usize) -> Self {
        assert!(num_ranks > 0, "need at least one rank");
        Self::new((0..num_tiles).map(|n| n % num_ranks).collect())
    }

    /**
     * Greedy load balance: visit tiles from the largest to the smallest and
     * give each one to the rank currently holding the fewest points. Ties
     * go to the lower rank and the lower tile index, so the result is the
     * same on every process.
     */
    pub fn knapsack<const DIM: usize>(ba: &BoxArray<DIM>, num_ranks: usize) -> Self {
        assert!(num_ranks > 0, "need at least one rank");

        let mut order: Vec<usize> = (0..ba.len()).collect();
        order.sort_by_key(|&n| (std::cmp::Reverse(ba[n].num_points()), n));

        let mut load = vec![0; num_ranks];
        let mut owners = vec![0; ba.len()];

        for n in order {
            let rank = (0..num_ranks).min_by_key(|&r| (load[r], r)).unwrap_or(0);
            load[rank] += ba[n].num_points();
            owners[n] = rank;
        }
        Self::new(owners)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn owner(&self, tile: usize) -> usize {
        self.owners[tile]
    }

    /**
     * Return the indexes of the tiles owned by the given rank, in order.
     */
    pub fn local_indices(&self, rank: usize) -> Vec<usize> {
        self.owners
            .iter()
            .enumerate()
            .filter(|(_, owner)| **owner == rank)
            .map(|(n, _)| n)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &usize> {
        self.owners.iter()
    }
}

impl Index<usize> for DistributionMap {
    type Output = usize;

    fn index(&self, tile: usize) -> &usize {
        &self.owners[tile]
    }
}

impl PartialEq for DistributionMap {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.owners, &other.owners) || self.owners == other.owners
    }
}

impl Eq for DistributionMap {}
