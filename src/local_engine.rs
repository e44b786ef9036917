//! An in-process regridding engine.
//!
//! Every method is served by nearest-source-to-destination weights: each
//! destination cell center takes the value of the closest source cell center
//! on the sphere. Bilinear and conservative requests are accepted and logged
//! as approximated. For those methods a destination cell outside the source
//! grid's longitude/latitude box counts as unmapped.
use std::path::Path;

use rayon::prelude::*;

use crate::context::{all_gather, ProcessContext};
use crate::coord_grid::Coordinate;
use crate::dimension::StaggerLocation;
use crate::engine::{
    cell_index, EngineError, EngineResult, OperatorOptions, RegridEngine, RegridMethod, SparseWeights, UnmappedAction,
};
use crate::grid::GridWrapper;

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalEngine;

/// Longitude unwrapped into `[0, 360)`.
fn unwrap_lon(lon: f64) -> f64 {
    lon.rem_euclid(360.0)
}

fn unit_vector(lon: f64, lat: f64) -> [f64; 3] {
    let (lon, lat) = (lon.to_radians(), lat.to_radians());
    [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()]
}

/// Squared chord length, monotonic in great-circle distance.
fn chord2(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
}

#[derive(Debug, Clone, Copy)]
struct LonLatBox {
    lon_min: f64,
    lon_max: f64,
    lat_min: f64,
    lat_max: f64,
}

impl LonLatBox {
    const TOLERANCE: f64 = 1e-9;

    fn contains(&self, lon: f64, lat: f64) -> bool {
        let lon = unwrap_lon(lon);
        lon >= self.lon_min - Self::TOLERANCE
            && lon <= self.lon_max + Self::TOLERANCE
            && lat >= self.lat_min - Self::TOLERANCE
            && lat <= self.lat_max + Self::TOLERANCE
    }
}

impl LocalEngine {
    fn check_corners(src: &GridWrapper, dst: &GridWrapper) -> EngineResult<()> {
        if src.coord_grid().has_corners() && dst.coord_grid().has_corners() {
            Ok(())
        } else {
            Err(EngineError::MissingCorners.into())
        }
    }
}

impl RegridEngine for LocalEngine {
    type Operator = SparseWeights;

    fn build_operator<C: ProcessContext>(
        &self,
        ctx: &C,
        src: &GridWrapper,
        dst: &GridWrapper,
        options: &OperatorOptions,
    ) -> EngineResult<SparseWeights> {
        match options.method {
            RegridMethod::NearestSourceToDestination => {}
            RegridMethod::Conserve => {
                Self::check_corners(src, dst)?;
                log::warn!("conservative weights are approximated by nearest source cell weights");
            }
            RegridMethod::Bilinear => {
                log::warn!("bilinear weights are approximated by nearest source cell weights");
            }
        }
        if options.ignore_degenerate {
            log::debug!("degenerate cells are ignored");
        }

        let src_shape = src.coord_grid().shape();
        let (src_x, src_y) = src.coord_grid().gather_center(ctx);
        let mut points = Vec::with_capacity(src_shape[0] * src_shape[1]);
        let mut bbox = LonLatBox {
            lon_min: f64::INFINITY,
            lon_max: f64::NEG_INFINITY,
            lat_min: f64::INFINITY,
            lat_max: f64::NEG_INFINITY,
        };
        for ((i, j), &lon) in src_x.indexed_iter() {
            let lat = src_y[[i, j]];
            points.push((cell_index(src_shape, i, j), unit_vector(lon, lat)));
            let lon = unwrap_lon(lon);
            bbox.lon_min = bbox.lon_min.min(lon);
            bbox.lon_max = bbox.lon_max.max(lon);
            bbox.lat_min = bbox.lat_min.min(lat);
            bbox.lat_max = bbox.lat_max.max(lat);
        }

        let dst_grid = dst.coord_grid();
        let dst_shape = dst_grid.shape();
        let bounds = dst_grid
            .bounds(StaggerLocation::Center)
            .expect("every grid has center coordinates (this is a bug)");
        let dst_x = dst_grid
            .coords(StaggerLocation::Center, Coordinate::X)
            .expect("every grid has center coordinates (this is a bug)");
        let dst_y = dst_grid
            .coords(StaggerLocation::Center, Coordinate::Y)
            .expect("every grid has center coordinates (this is a bug)");

        let cells: Vec<(usize, f64, f64)> = dst_x
            .indexed_iter()
            .map(|((i, j), &lon)| {
                let row = cell_index(dst_shape, bounds.lower[0] + i, bounds.lower[1] + j);
                (row, lon, dst_y[[i, j]])
            })
            .collect();

        let restrict_to_box = options.method != RegridMethod::NearestSourceToDestination;
        let matches: Vec<Option<(usize, usize, f64)>> = cells
            .par_iter()
            .map(|&(row, lon, lat)| {
                if restrict_to_box && !bbox.contains(lon, lat) {
                    return None;
                }
                let p = unit_vector(lon, lat);
                points
                    .iter()
                    .min_by(|a, b| chord2(&a.1, &p).total_cmp(&chord2(&b.1, &p)))
                    .map(|&(col, _)| (row, col, 1.0))
            })
            .collect();

        let local_unmapped = matches.iter().filter(|m| m.is_none()).count();
        let unmapped: usize = all_gather(ctx, local_unmapped).into_iter().sum();
        if unmapped > 0 {
            match options.unmapped_action {
                UnmappedAction::Ignore => log::info!("{unmapped} destination cells are unmapped and left untouched"),
                UnmappedAction::Error => return Err(EngineError::UnmappedDestination { count: unmapped }.into()),
            }
        }

        let weights = SparseWeights::new(options.method, src, dst, matches.into_iter().flatten().collect());
        log::debug!("rank {} holds {} weights", ctx.rank(), weights.local_len());
        if let Some(path) = &options.weight_file {
            weights.write_weight_file(ctx, path)?;
        }
        Ok(weights)
    }

    fn read_operator<C: ProcessContext>(
        &self,
        ctx: &C,
        path: &Path,
        src: &GridWrapper,
        dst: &GridWrapper,
    ) -> EngineResult<SparseWeights> {
        log::debug!("reading weights from {}", path.display());
        SparseWeights::read_weight_file(ctx, path, src, dst)
    }
}
