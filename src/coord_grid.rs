//! The process-local coordinate grid handed to the regridding engine.
//!
//! A [`CoordGrid`] is a logically rectangular 2-D grid in spherical degrees.
//! It always has a center stagger and may gain a corner stagger. Each rank
//! holds only its own block of coordinates: axis 0 is split into contiguous
//! blocks across ranks (the first `n % size` ranks get one extra row), axis 1
//! is never split.
use ndarray::Array2;

use crate::context::{all_gather, ProcessContext};
use crate::dimension::StaggerLocation;

/// Half-open index window `[lower, upper)` along each of the two array axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaggerBounds {
    pub lower: [usize; 2],
    pub upper: [usize; 2],
}

impl StaggerBounds {
    pub fn local_shape(&self) -> [usize; 2] {
        [
            self.upper[0] - self.lower[0],
            self.upper[1] - self.lower[1],
        ]
    }

    pub fn is_empty(&self) -> bool {
        let [n0, n1] = self.local_shape();
        n0 == 0 || n1 == 0
    }
}

/// Which of the two coordinate arrays to access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coordinate {
    /// Longitude
    X,
    /// Latitude
    Y,
}

#[derive(Debug, Clone)]
struct Stagger {
    global_shape: [usize; 2],
    bounds: StaggerBounds,
    x: Array2<f64>,
    y: Array2<f64>,
}

impl Stagger {
    fn new(global_shape: [usize; 2], bounds: StaggerBounds) -> Self {
        let local = bounds.local_shape();
        Self {
            global_shape,
            bounds,
            x: Array2::zeros(local),
            y: Array2::zeros(local),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordGrid {
    rank: usize,
    size: usize,
    center: Stagger,
    corner: Option<Stagger>,
}

/// Block decomposition of `n` indices over `size` ranks.
pub fn decompose(n: usize, size: usize, rank: usize) -> (usize, usize) {
    let size = size.max(1);
    let base = n / size;
    let rem = n % size;
    let lower = rank * base + rank.min(rem);
    let upper = lower + base + usize::from(rank < rem);
    (lower.min(n), upper.min(n))
}

impl CoordGrid {
    /// Allocate a grid of `shape` cell centers decomposed over the ranks of `ctx`.
    pub fn new<C: ProcessContext>(ctx: &C, shape: [usize; 2]) -> Self {
        let (lower, upper) = decompose(shape[0], ctx.size(), ctx.rank());
        let bounds = StaggerBounds {
            lower: [lower, 0],
            upper: [upper, shape[1]],
        };
        log::debug!(
            "rank {} owns rows [{lower}, {upper}) of a {}x{} grid",
            ctx.rank(),
            shape[0],
            shape[1]
        );
        Self {
            rank: ctx.rank(),
            size: ctx.size(),
            center: Stagger::new(shape, bounds),
            corner: None,
        }
    }

    /// Add corner coordinates. Corner windows line up with the center windows,
    /// and the rank holding the last row of centers also holds the closing
    /// row of corners. Calling this twice is a no-op.
    pub fn add_corner_stagger(&mut self) {
        if self.corner.is_some() {
            return;
        }

        let [n0, n1] = self.center.global_shape;
        let center = self.center.bounds;
        let owns_upper = center.upper[0] == n0 && (center.lower[0] < center.upper[0] || (n0 == 0 && self.rank == 0));
        let bounds = StaggerBounds {
            lower: [center.lower[0], 0],
            upper: [center.upper[0] + usize::from(owns_upper), n1 + 1],
        };
        self.corner = Some(Stagger::new([n0 + 1, n1 + 1], bounds));
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of cell centers along each axis.
    pub fn shape(&self) -> [usize; 2] {
        self.center.global_shape
    }

    pub fn has_corners(&self) -> bool {
        self.corner.is_some()
    }

    fn stagger(&self, stagger: StaggerLocation) -> Option<&Stagger> {
        match stagger {
            StaggerLocation::Center => Some(&self.center),
            StaggerLocation::Corner => self.corner.as_ref(),
        }
    }

    fn stagger_mut(&mut self, stagger: StaggerLocation) -> Option<&mut Stagger> {
        match stagger {
            StaggerLocation::Center => Some(&mut self.center),
            StaggerLocation::Corner => self.corner.as_mut(),
        }
    }

    /// Global shape of the given stagger, `None` if that stagger was never added.
    pub fn global_shape(&self, stagger: StaggerLocation) -> Option<[usize; 2]> {
        self.stagger(stagger).map(|s| s.global_shape)
    }

    pub fn bounds(&self, stagger: StaggerLocation) -> Option<StaggerBounds> {
        self.stagger(stagger).map(|s| s.bounds)
    }

    pub fn coords(&self, stagger: StaggerLocation, coord: Coordinate) -> Option<&Array2<f64>> {
        self.stagger(stagger).map(|s| match coord {
            Coordinate::X => &s.x,
            Coordinate::Y => &s.y,
        })
    }

    pub fn coords_mut(&mut self, stagger: StaggerLocation, coord: Coordinate) -> Option<&mut Array2<f64>> {
        self.stagger_mut(stagger).map(|s| match coord {
            Coordinate::X => &mut s.x,
            Coordinate::Y => &mut s.y,
        })
    }

    /// Assemble the full center coordinate arrays on every rank.
    pub fn gather_center<C: ProcessContext>(&self, ctx: &C) -> (Array2<f64>, Array2<f64>) {
        let mut x = Array2::zeros(self.center.global_shape);
        let mut y = Array2::zeros(self.center.global_shape);
        let blocks = all_gather(
            ctx,
            (self.center.bounds, self.center.x.clone(), self.center.y.clone()),
        );
        for (bounds, bx, by) in blocks {
            for ((i, j), v) in bx.indexed_iter() {
                x[[bounds.lower[0] + i, bounds.lower[1] + j]] = *v;
            }
            for ((i, j), v) in by.indexed_iter() {
                y[[bounds.lower[0] + i, bounds.lower[1] + j]] = *v;
            }
        }
        (x, y)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::context::{SerialContext, ThreadGroup};

    #[rstest]
    #[case(26, 1)]
    #[case(26, 3)]
    #[case(71, 4)]
    #[case(2, 4)]
    fn test_decompose_tiles_axis(#[case] n: usize, #[case] size: usize) {
        let mut windows: Vec<_> = (0..size).map(|r| decompose(n, size, r)).collect();
        windows.sort();
        let mut next = 0;
        for (lower, upper) in windows {
            assert_eq!(lower, next, "gap or overlap at {lower}");
            assert!(upper >= lower);
            next = upper;
        }
        assert_eq!(next, n);
    }

    #[test]
    fn test_serial_grid_owns_everything() {
        let mut grid = CoordGrid::new(&SerialContext, [71, 26]);
        grid.add_corner_stagger();
        assert_eq!(grid.bounds(StaggerLocation::Center).unwrap().local_shape(), [71, 26]);
        assert_eq!(grid.bounds(StaggerLocation::Corner).unwrap().local_shape(), [72, 27]);
        assert_eq!(grid.coords(StaggerLocation::Corner, Coordinate::Y).unwrap().dim(), (72, 27));
    }

    #[test]
    fn test_no_corners_until_added() {
        let grid = CoordGrid::new(&SerialContext, [4, 3]);
        assert!(!grid.has_corners());
        assert!(grid.bounds(StaggerLocation::Corner).is_none());
        assert!(grid.coords(StaggerLocation::Corner, Coordinate::X).is_none());
    }

    #[rstest]
    #[case(StaggerLocation::Center)]
    #[case(StaggerLocation::Corner)]
    fn test_local_windows_are_disjoint(#[case] stagger: StaggerLocation) {
        let bounds = ThreadGroup::run(3, |ctx| {
            let mut grid = CoordGrid::new(ctx, [26, 71]);
            grid.add_corner_stagger();
            grid.bounds(stagger).unwrap()
        });
        let (n0, n1) = match stagger {
            StaggerLocation::Center => (26, 71),
            StaggerLocation::Corner => (27, 72),
        };

        let mut covered = Array2::<u8>::zeros((n0, n1));
        for b in bounds {
            for i in b.lower[0]..b.upper[0] {
                for j in b.lower[1]..b.upper[1] {
                    covered[[i, j]] += 1;
                }
            }
        }
        assert!(covered.iter().all(|&c| c == 1));
    }

    #[test]
    fn test_gather_center() {
        let gathered = ThreadGroup::run(2, |ctx| {
            let mut grid = CoordGrid::new(ctx, [5, 2]);
            let b = grid.bounds(StaggerLocation::Center).unwrap();
            let x = grid.coords_mut(StaggerLocation::Center, Coordinate::X).unwrap();
            for ((i, j), v) in x.indexed_iter_mut() {
                *v = ((b.lower[0] + i) * 10 + j) as f64;
            }
            grid.gather_center(ctx).0
        });
        for x in gathered {
            assert_eq!(x.dim(), (5, 2));
            assert_eq!(x[[4, 1]], 41.0);
            assert_eq!(x[[0, 0]], 0.0);
        }
    }
}
