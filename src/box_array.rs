use std::collections::HashMap;
use std::ops::Index;
use std::sync::Arc;
use crate::index_space::IndexSpace;




/**
 * An ordered sequence of index spaces (tiles). The position of a tile in the
 * sequence is its identity, and is the same on every process. Clones share
 * the underlying storage, so box arrays are cheap to keep in plan
 * descriptors.
 *
 * Intersection queries go through a hash of bins, each one as wide as the
 * widest tile on that axis. A tile is filed under the bin containing its
 * lower corner, so a query only has to visit the bins between
 * `query.lo - bin_size` and `query.hi`.
 */
#[derive(Clone, Debug)]
pub struct BoxArray<const DIM: usize> {
    boxes: Arc<Vec<IndexSpace<DIM>>>,
    bins: Arc<HashMap<[i64; DIM], Vec<usize>>>,
    bin_size: [i64; DIM],
}




// ============================================================================
impl<const DIM: usize> BoxArray<DIM> {


    pub fn new(boxes: Vec<IndexSpace<DIM>>) -> Self {
        assert!(
            boxes.iter().all(|b| !b.is_empty()),
            "box array members must be non-empty");

        let mut bin_size = [1; DIM];

        for b in &boxes {
            for (d, size) in bin_size.iter_mut().enumerate() {
                *size = (*size).max(b.length(d) as i64);
            }
        }

        let mut bins: HashMap<[i64; DIM], Vec<usize>> = HashMap::new();

        for (n, b) in boxes.iter().enumerate() {
            bins.entry(Self::bin_of(b.lo(), bin_size)).or_default().push(n);
        }

        Self {
            boxes: Arc::new(boxes),
            bins: Arc::new(bins),
            bin_size,
        }
    }


    /**
     * Chop a domain into tiles no wider than `max_size` on any axis. The
     * tiles are listed in row-major order of their lower corners.
     */
    pub fn decompose(domain: IndexSpace<DIM>, max_size: usize) -> Self {
        assert!(max_size > 0, "max_size must be positive");

        let mut counts = [0; DIM];

        for (d, count) in counts.iter_mut().enumerate() {
            *count = ((domain.length(d) + max_size - 1) / max_size) as i64;
        }
        let blocks = IndexSpace::new([0; DIM], counts.map(|n| n - 1));

        let boxes = blocks
            .iter()
            .map(|block| {
                let mut lo = [0; DIM];
                let mut hi = [0; DIM];

                for d in 0..DIM {
                    lo[d] = domain.lo()[d] + block[d] * max_size as i64;
                    hi[d] = (lo[d] + max_size as i64 - 1).min(domain.hi()[d]);
                }
                IndexSpace::new(lo, hi)
            })
            .collect();

        Self::new(boxes)
    }


    pub fn len(&self) -> usize {
        self.boxes.len()
    }


    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }


    pub fn get(&self, index: usize) -> Option<&IndexSpace<DIM>> {
        self.boxes.get(index)
    }


    pub fn iter(&self) -> impl Iterator<Item = &IndexSpace<DIM>> {
        self.boxes.iter()
    }


    /**
     * Return the total number of indexes covered by all the tiles.
     */
    pub fn num_points(&self) -> usize {
        self.boxes.iter().map(|b| b.num_points()).sum()
    }


    /**
     * Return the smallest index space containing every tile.
     */
    pub fn minimal_box(&self) -> Option<IndexSpace<DIM>> {
        let first = self.boxes.first()?;
        let mut lo = first.lo();
        let mut hi = first.hi();

        for b in self.boxes.iter() {
            for d in 0..DIM {
                lo[d] = lo[d].min(b.lo()[d]);
                hi[d] = hi[d].max(b.hi()[d]);
            }
        }
        Some(IndexSpace::new(lo, hi))
    }


    /**
     * Return a box array with every tile coarsened by the given ratio. Tile
     * identities are preserved.
     */
    pub fn coarsen(&self, ratio: i64) -> Self {
        Self::new(self.boxes.iter().map(|b| b.coarsen(ratio)).collect())
    }


    /**
     * Determine whether every tile can be coarsened exactly by `ratio` while
     * keeping at least `min_width` cells per axis.
     */
    pub fn coarsenable(&self, ratio: i64, min_width: usize) -> bool {
        self.boxes.iter().all(|b| b.coarsenable(ratio, min_width))
    }


    /**
     * Return every non-empty intersection of the query with a member tile,
     * as `(tile index, clipped region)` pairs in increasing tile index
     * order. The ordering is deterministic, so every process enumerates the
     * same sequence.
     */
    pub fn intersections(&self, query: &IndexSpace<DIM>) -> Vec<(usize, IndexSpace<DIM>)> {
        if query.is_empty() || self.boxes.is_empty() {
            return Vec::new();
        }

        let mut lo = query.lo();
        for d in 0..DIM {
            lo[d] -= self.bin_size[d];
        }
        let first = Self::bin_of(lo, self.bin_size);
        let last = Self::bin_of(query.hi(), self.bin_size);
        let bins = IndexSpace::new(first, last);

        let mut candidates: Vec<usize> = bins
            .iter()
            .filter_map(|bin| self.bins.get(&bin))
            .flatten()
            .copied()
            .collect();

        candidates.sort_unstable();
        candidates.dedup();
        candidates
            .into_iter()
            .filter_map(|n| self.boxes[n].intersect(query).map(|region| (n, region)))
            .collect()
    }


    fn bin_of(index: [i64; DIM], bin_size: [i64; DIM]) -> [i64; DIM] {
        let mut bin = [0; DIM];

        for d in 0..DIM {
            bin[d] = index[d].div_euclid(bin_size[d]);
        }
        bin
    }
}




// ============================================================================
impl<const DIM: usize> Index<usize> for BoxArray<DIM> {
    type Output = IndexSpace<DIM>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.boxes[index]
    }
}

impl<const DIM: usize> PartialEq for BoxArray<DIM> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.boxes, &other.boxes) || self.boxes == other.boxes
    }
}

impl<const DIM: usize> Eq for BoxArray<DIM> {}

impl<const DIM: usize> From<Vec<IndexSpace<DIM>>> for BoxArray<DIM> {
    fn from(boxes: Vec<IndexSpace<DIM>>) -> Self {
        Self::new(boxes)
    }
}
