// THEORY:
// The `BlobDetector` is the spatial grouping stage. It walks one class's label
// grid at the current sampling phase and clusters same-label samples into blobs.
//
// Algorithm:
// 1.  **Phase-aligned scan**: only cells at (phase + i*S, phase + j*S) carry a
//     label this frame, so the scan steps by the stride S from the phase offset.
// 2.  **Flood fill**: an unclaimed sample with the class's label seeds a
//     breadth-first fill. Neighbors are the four grid neighbors exactly S pixels
//     away (never diagonals, never in-between pixels). Every sample taken into a
//     blob is overwritten with `Cell::Claimed`, so no sample belongs to two blobs
//     and the scan never reseeds inside a finished blob.
// 3.  **Minimum size**: blobs with fewer points than the class's minimum are
//     dropped. Elongated objects get a larger minimum from the configuration.
// 4.  **Top-K**: when more blobs survive than the class allows, only the largest
//     are kept, chosen with a bounded min-heap.
//
// Cost is O(pixels / S^2) per class per frame.

use crate::core_modules::classifier::Label;
use crate::core_modules::grid_manager::{Cell, LabelGrid};
use crate::core_modules::smart_blob::{Blob, Point};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// What one class is looking for in its label grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobCriteria {
    pub class_id: u8,
    pub min_points: usize,
    pub max_blobs: usize,
}

pub mod blob_detector {
    use super::*;

    /// Finds, filters and caps the blobs of `criteria.class_id` in `grid`.
    /// Claimed cells are left marked in the grid.
    pub fn find_blobs(
        grid: &mut LabelGrid,
        phase: u32,
        stride: u32,
        criteria: &BlobCriteria,
    ) -> Vec<Blob> {
        let stride = stride.max(1);
        let target = Cell::Sampled(Label::Object(criteria.class_id));
        let mut blobs = Vec::new();

        for y in (phase..grid.height()).step_by(stride as usize) {
            for x in (phase..grid.width()).step_by(stride as usize) {
                if grid.get(x, y) != target {
                    continue;
                }
                let blob = flood_fill(grid, Point { x, y }, stride, criteria.class_id);
                if blob.len() >= criteria.min_points {
                    blobs.push(blob);
                }
            }
        }

        largest_blobs(blobs, criteria.max_blobs)
    }

    /// Breadth-first fill from `seed` over stride-spaced 4-neighbors.
    /// The point list doubles as the BFS queue.
    fn flood_fill(grid: &mut LabelGrid, seed: Point, stride: u32, class_id: u8) -> Blob {
        let target = Cell::Sampled(Label::Object(class_id));
        let mut points = vec![seed];
        grid.set(seed.x, seed.y, Cell::Claimed);

        let mut index = 0;
        while index < points.len() {
            let Point { x, y } = points[index];
            let neighbors = [
                y.checked_add(stride).map(|ny| Point { x, y: ny }),
                y.checked_sub(stride).map(|ny| Point { x, y: ny }),
                x.checked_add(stride).map(|nx| Point { x: nx, y }),
                x.checked_sub(stride).map(|nx| Point { x: nx, y }),
            ];
            for neighbor in neighbors.into_iter().flatten() {
                if grid.get(neighbor.x, neighbor.y) == target {
                    grid.set(neighbor.x, neighbor.y, Cell::Claimed);
                    points.push(neighbor);
                }
            }
            index += 1;
        }

        Blob { class_id, points }
    }

    /// Keeps the `k` blobs with the most points, largest first. Among equal sizes
    /// the blob discovered first wins.
    pub fn largest_blobs(mut blobs: Vec<Blob>, k: usize) -> Vec<Blob> {
        if blobs.len() <= k {
            // stable, so equal sizes keep scan order
            blobs.sort_by(|a, b| b.len().cmp(&a.len()));
            return blobs;
        }

        // min-heap on (size, earliest index); the root is the weakest survivor
        let mut heap: BinaryHeap<Reverse<(usize, Reverse<usize>)>> = BinaryHeap::with_capacity(k + 1);
        for (index, blob) in blobs.iter().enumerate() {
            heap.push(Reverse((blob.len(), Reverse(index))));
            if heap.len() > k {
                heap.pop();
            }
        }

        let mut keep: Vec<(usize, usize)> = heap
            .into_iter()
            .map(|Reverse((size, Reverse(index)))| (size, index))
            .collect();
        keep.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut slots: Vec<Option<Blob>> = blobs.into_iter().map(Some).collect();
        keep.into_iter()
            .filter_map(|(_, index)| slots[index].take())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::blob_detector::*;
    use super::*;
    use proptest::prelude::*;

    fn mark(grid: &mut LabelGrid, points: &[(u32, u32)], class_id: u8) {
        for &(x, y) in points {
            grid.set(x, y, Cell::Sampled(Label::Object(class_id)));
        }
    }

    fn square(x0: u32, y0: u32, side: u32, stride: u32) -> Vec<(u32, u32)> {
        let mut points = Vec::new();
        for j in 0..side {
            for i in 0..side {
                points.push((x0 + i * stride, y0 + j * stride));
            }
        }
        points
    }

    fn criteria(min_points: usize, max_blobs: usize) -> BlobCriteria {
        BlobCriteria {
            class_id: 3,
            min_points,
            max_blobs,
        }
    }

    #[test]
    fn separated_clusters_become_separate_blobs() {
        let mut grid = LabelGrid::new(64, 64);
        mark(&mut grid, &square(0, 0, 3, 4), 3);
        mark(&mut grid, &square(40, 40, 4, 4), 3);

        let blobs = find_blobs(&mut grid, 0, 4, &criteria(1, 10));
        let mut sizes: Vec<usize> = blobs.iter().map(Blob::len).collect();
        sizes.sort();
        assert_eq!(sizes, vec![9, 16]);
        assert!(blobs.iter().all(|b| b.class_id == 3));
    }

    #[test]
    fn diagonal_neighbors_do_not_connect() {
        let mut grid = LabelGrid::new(32, 32);
        mark(&mut grid, &[(0, 0), (4, 4), (8, 8)], 3);
        let blobs = find_blobs(&mut grid, 0, 4, &criteria(1, 10));
        assert_eq!(blobs.len(), 3);
    }

    #[test]
    fn other_labels_are_ignored() {
        let mut grid = LabelGrid::new(32, 32);
        mark(&mut grid, &[(0, 0), (4, 0)], 3);
        mark(&mut grid, &[(8, 0), (12, 0)], 5);
        let blobs = find_blobs(&mut grid, 0, 4, &criteria(1, 10));
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].len(), 2);
        assert_eq!(grid.get(8, 0), Cell::Sampled(Label::Object(5)));
    }

    #[test]
    fn scanning_respects_phase() {
        let mut grid = LabelGrid::new(32, 32);
        mark(&mut grid, &square(2, 2, 3, 4), 3);
        // phase 0 never looks at (2 + 4i, 2 + 4j)
        assert!(find_blobs(&mut grid, 0, 4, &criteria(1, 10)).is_empty());
        let blobs = find_blobs(&mut grid, 2, 4, &criteria(1, 10));
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].len(), 9);
    }

    #[test]
    fn claimed_samples_are_marked_done() {
        let mut grid = LabelGrid::new(16, 16);
        mark(&mut grid, &square(0, 0, 2, 4), 3);
        find_blobs(&mut grid, 0, 4, &criteria(1, 10));
        for (x, y) in square(0, 0, 2, 4) {
            assert_eq!(grid.get(x, y), Cell::Claimed);
        }
        // a second pass finds nothing left to claim
        assert!(find_blobs(&mut grid, 0, 4, &criteria(1, 10)).is_empty());
    }

    #[test]
    fn small_blobs_are_dropped() {
        let mut grid = LabelGrid::new(64, 64);
        mark(&mut grid, &square(0, 0, 2, 4), 3);
        mark(&mut grid, &square(32, 32, 5, 4), 3);
        let blobs = find_blobs(&mut grid, 0, 4, &criteria(10, 10));
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].len(), 25);
    }

    #[test]
    fn cap_keeps_largest_in_size_order() {
        let mut grid = LabelGrid::new(128, 128);
        mark(&mut grid, &square(0, 0, 2, 4), 3);
        mark(&mut grid, &square(40, 0, 4, 4), 3);
        mark(&mut grid, &square(0, 40, 3, 4), 3);
        mark(&mut grid, &square(80, 80, 5, 4), 3);

        let blobs = find_blobs(&mut grid, 0, 4, &criteria(1, 2));
        let sizes: Vec<usize> = blobs.iter().map(Blob::len).collect();
        assert_eq!(sizes, vec![25, 16]);
    }

    #[test]
    fn ties_favor_earlier_blobs() {
        let blob = |id: u32| Blob {
            class_id: 1,
            points: vec![Point { x: id, y: 0 }],
        };
        let kept = largest_blobs(vec![blob(0), blob(1), blob(2)], 2);
        let ids: Vec<u32> = kept.iter().map(|b| b.points[0].x).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn blobs_under_the_cap_are_still_ranked() {
        let blob = |id: u32, size: u32| Blob {
            class_id: 1,
            points: (0..size).map(|y| Point { x: id, y }).collect(),
        };
        let kept = largest_blobs(vec![blob(0, 2), blob(1, 9), blob(2, 2), blob(3, 5)], 4);
        let order: Vec<(u32, usize)> = kept.iter().map(|b| (b.points[0].x, b.len())).collect();
        assert_eq!(order, vec![(1, 9), (3, 5), (0, 2), (2, 2)]);
    }

    proptest! {
        #[test]
        fn retained_blobs_respect_minimum_and_cap(
            cells in prop::collection::vec(any::<bool>(), 16 * 16),
            min_points in 1usize..6,
            max_blobs in 1usize..5,
        ) {
            let stride = 4;
            let mut grid = LabelGrid::new(64, 64);
            for (i, &on) in cells.iter().enumerate() {
                if on {
                    let (x, y) = ((i % 16) as u32 * stride, (i / 16) as u32 * stride);
                    grid.set(x, y, Cell::Sampled(Label::Object(3)));
                }
            }

            // reference: every component above the minimum, uncapped
            let mut reference_grid = grid.clone();
            let all = find_blobs(&mut reference_grid, 0, stride, &criteria(min_points, usize::MAX));
            let kept = find_blobs(&mut grid, 0, stride, &criteria(min_points, max_blobs));

            prop_assert!(kept.iter().all(|b| b.len() >= min_points));
            prop_assert_eq!(kept.len(), all.len().min(max_blobs));

            let mut all_sizes: Vec<usize> = all.iter().map(Blob::len).collect();
            all_sizes.sort_unstable_by(|a, b| b.cmp(a));
            let kept_sizes: Vec<usize> = kept.iter().map(Blob::len).collect();
            prop_assert_eq!(&kept_sizes[..], &all_sizes[..kept.len()]);

            let total: usize = all.iter().map(Blob::len).sum();
            prop_assert!(total <= cells.iter().filter(|&&on| on).count());
        }
    }
}
