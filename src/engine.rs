//! The regridding engine seen from this crate: something that can build a
//! weight operator between two grids and apply it to fields.
//!
//! Operators are sparse matrices. Cells are numbered with a 0-based sequence
//! index in which array axis 0 varies fastest, so cell `(i, j)` of an
//! `n0 x n1` grid is `i + j * n0`. Each rank keeps only the rows (destination
//! cells) inside its own window.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use error_stack::ResultExt;
use netcdf::Extents;
use ndarray::Dimension;

use crate::context::{all_gather, ProcessContext};
use crate::coord_grid::StaggerBounds;
use crate::dimension::StaggerLocation;
use crate::field::FieldWrapper;
use crate::grid::GridWrapper;
use crate::nc_utils::agree_with;

pub type EngineResult<T> = error_stack::Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Unsupported regrid method '{0}'")]
    UnsupportedMethod(String),
    #[error("{count} destination cells are not mapped to any source cell")]
    UnmappedDestination { count: usize },
    #[error("Conservative regridding needs corner coordinates on both grids")]
    MissingCorners,
    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Weight file {}: {reason}", .path.display())]
    WeightFile { path: PathBuf, reason: String },
    #[error("Field '{field}' is on the {stagger:?} stagger, weights only apply to cell centers")]
    UnsupportedStagger { field: String, stagger: StaggerLocation },
}

impl EngineError {
    pub fn shape_mismatch<S: ToString>(what: S, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            what: what.to_string(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    pub fn weight_file<S: ToString>(path: &Path, reason: S) -> Self {
        Self::WeightFile {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum RegridMethod {
    Conserve,
    Bilinear,
    #[strum(serialize = "neareststod")]
    NearestSourceToDestination,
}

/// What to do with destination cells that receive no weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmappedAction {
    Ignore,
    Error,
}

/// Which destination cells are zeroed before an operator is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZeroRegion {
    /// Every destination cell.
    Total,
    /// Only cells that receive weights.
    Select,
    /// None, the weighted sum is added to the existing values.
    Empty,
}

#[derive(Debug, Clone)]
pub struct OperatorOptions {
    pub method: RegridMethod,
    pub unmapped_action: UnmappedAction,
    pub ignore_degenerate: bool,
    /// Where to persist the weights, if anywhere.
    pub weight_file: Option<PathBuf>,
}

impl OperatorOptions {
    pub fn new(method: RegridMethod, unmapped_action: UnmappedAction) -> Self {
        Self {
            method,
            unmapped_action,
            ignore_degenerate: false,
            weight_file: None,
        }
    }

    pub fn ignore_degenerate(mut self, ignore: bool) -> Self {
        self.ignore_degenerate = ignore;
        self
    }

    pub fn weight_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.weight_file = Some(path.into());
        self
    }
}

pub trait RegridEngine {
    type Operator: WeightOperator;

    /// Compute the operator mapping `src` onto `dst`. Collective.
    fn build_operator<C: ProcessContext>(
        &self,
        ctx: &C,
        src: &GridWrapper,
        dst: &GridWrapper,
        options: &OperatorOptions,
    ) -> EngineResult<Self::Operator>;

    /// Load an operator previously persisted with
    /// [`OperatorOptions::weight_file`]. Collective.
    fn read_operator<C: ProcessContext>(
        &self,
        ctx: &C,
        path: &Path,
        src: &GridWrapper,
        dst: &GridWrapper,
    ) -> EngineResult<Self::Operator>;
}

pub trait WeightOperator {
    /// Fill `dst` from `src`. Collective.
    fn apply<C: ProcessContext>(
        &self,
        ctx: &C,
        src: &FieldWrapper,
        dst: &mut FieldWrapper,
        zero_region: ZeroRegion,
    ) -> EngineResult<()>;
}

/// A sparse weight matrix restricted to this rank's destination rows.
#[derive(Debug, Clone)]
pub struct SparseWeights {
    method: RegridMethod,
    src_shape: [usize; 2],
    dst_shape: [usize; 2],
    dst_bounds: StaggerBounds,
    /// `(row, col, weight)` with 0-based destination row and source column.
    entries: Vec<(usize, usize, f64)>,
}

/// Sequence index of a cell, axis 0 fastest.
pub fn cell_index(shape: [usize; 2], i: usize, j: usize) -> usize {
    i + j * shape[0]
}

fn center_bounds(grid: &GridWrapper) -> StaggerBounds {
    grid.coord_grid()
        .bounds(StaggerLocation::Center)
        .expect("every grid has center coordinates (this is a bug)")
}

fn owns_row(bounds: &StaggerBounds, shape: [usize; 2], row: usize) -> bool {
    let (i, j) = (row % shape[0].max(1), row / shape[0].max(1));
    (bounds.lower[0]..bounds.upper[0]).contains(&i) && (bounds.lower[1]..bounds.upper[1]).contains(&j)
}

impl SparseWeights {
    /// Weights for the local rows of `dst`. Entries for rows outside this
    /// rank's window are dropped.
    pub fn new(
        method: RegridMethod,
        src: &GridWrapper,
        dst: &GridWrapper,
        entries: Vec<(usize, usize, f64)>,
    ) -> Self {
        let dst_shape = dst.coord_grid().shape();
        let dst_bounds = center_bounds(dst);
        let entries = entries
            .into_iter()
            .filter(|(row, _, _)| owns_row(&dst_bounds, dst_shape, *row))
            .collect();
        Self {
            method,
            src_shape: src.coord_grid().shape(),
            dst_shape,
            dst_bounds,
            entries,
        }
    }

    pub fn method(&self) -> RegridMethod {
        self.method
    }

    /// Number of weights held by this rank.
    pub fn local_len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[(usize, usize, f64)] {
        &self.entries
    }

    /// Write all ranks' weights to `path` in the ESMF offline weight file layout.
    /// Rank 0 writes, then everyone waits for it.
    pub fn write_weight_file<C: ProcessContext>(&self, ctx: &C, path: &Path) -> EngineResult<()> {
        let all: Vec<(usize, usize, f64)> = all_gather(ctx, self.entries.clone()).into_iter().flatten().collect();

        let res = if ctx.is_root() {
            log::info!("writing {} weights to {}", all.len(), path.display());
            self.write_entries(path, &all)
        } else {
            Ok(())
        };
        let res = agree_with(ctx, res, |rank| {
            EngineError::weight_file(path, format!("rank {rank} could not write it"))
        });
        ctx.barrier();
        res
    }

    fn write_entries(&self, path: &Path, all: &[(usize, usize, f64)]) -> EngineResult<()> {
        let wrap = |reason: &str| EngineError::weight_file(path, reason.to_string());
        let mut ds = netcdf::create(path).change_context_lazy(|| wrap("creating file"))?;
        let history = format!("created {}", chrono::Utc::now().to_rfc3339());
        for (name, value) in [
            ("title", "regrid weights".to_string()),
            ("map_method", self.method.to_string()),
            ("history", history),
        ] {
            ds.add_attribute(name, value)
                .change_context_lazy(|| wrap("writing global attributes"))?;
        }

        let n_a = self.src_shape[0] * self.src_shape[1];
        let n_b = self.dst_shape[0] * self.dst_shape[1];
        let dims = [
            ("n_a", n_a),
            ("n_b", n_b),
            ("n_s", all.len()),
            ("src_grid_rank", 2),
            ("dst_grid_rank", 2),
        ];
        for (name, len) in dims {
            ds.add_dimension(name, len)
                .change_context_lazy(|| wrap("creating dimensions"))?;
        }

        // ESMF stores 1-based indices
        let rows: Vec<i32> = all.iter().map(|(r, _, _)| *r as i32 + 1).collect();
        let cols: Vec<i32> = all.iter().map(|(_, c, _)| *c as i32 + 1).collect();
        let weights: Vec<f64> = all.iter().map(|(_, _, s)| *s).collect();
        let src_dims: Vec<i32> = self.src_shape.iter().map(|&n| n as i32).collect();
        let dst_dims: Vec<i32> = self.dst_shape.iter().map(|&n| n as i32).collect();

        for (name, dim, values) in [
            ("row", "n_s", &rows),
            ("col", "n_s", &cols),
            ("src_grid_dims", "src_grid_rank", &src_dims),
            ("dst_grid_dims", "dst_grid_rank", &dst_dims),
        ] {
            let mut var = ds
                .add_variable::<i32>(name, &[dim])
                .change_context_lazy(|| wrap("creating index variables"))?;
            if !values.is_empty() {
                var.put_values(values.as_slice(), Extents::All)
                    .change_context_lazy(|| wrap("writing index variables"))?;
            }
        }

        let mut var = ds
            .add_variable::<f64>("S", &["n_s"])
            .change_context_lazy(|| wrap("creating variable S"))?;
        if !weights.is_empty() {
            var.put_values(&weights, Extents::All)
                .change_context_lazy(|| wrap("writing variable S"))?;
        }
        Ok(())
    }

    /// Read the weights for this rank's rows of `dst` back from a weight file.
    pub fn read_weight_file<C: ProcessContext>(
        ctx: &C,
        path: &Path,
        src: &GridWrapper,
        dst: &GridWrapper,
    ) -> EngineResult<Self> {
        let res = Self::read_entries(path, src, dst);
        let (method, entries) = agree_with(ctx, res, |rank| {
            EngineError::weight_file(path, format!("rank {rank} could not read it"))
        })?;
        Ok(Self::new(method, src, dst, entries))
    }

    fn read_entries(
        path: &Path,
        src: &GridWrapper,
        dst: &GridWrapper,
    ) -> EngineResult<(RegridMethod, Vec<(usize, usize, f64)>)> {
        let wrap = |reason: String| EngineError::weight_file(path, reason);
        let ds = netcdf::open(path).change_context_lazy(|| wrap("opening file".to_string()))?;

        let method = match ds.attribute("map_method").map(|a| a.value()) {
            Some(Ok(netcdf::AttributeValue::Str(s))) => s
                .parse::<RegridMethod>()
                .map_err(|_| EngineError::UnsupportedMethod(s.clone()))?,
            _ => return Err(wrap("missing string attribute 'map_method'".to_string()).into()),
        };

        let dim_len = |name: &str| -> Result<usize, EngineError> {
            ds.dimension(name)
                .map(|d| d.len())
                .ok_or_else(|| wrap(format!("missing dimension '{name}'")))
        };
        let n_a = dim_len("n_a")?;
        let n_b = dim_len("n_b")?;
        let n_s = dim_len("n_s")?;
        let src_shape = src.coord_grid().shape();
        let dst_shape = dst.coord_grid().shape();
        if n_a != src_shape[0] * src_shape[1] || n_b != dst_shape[0] * dst_shape[1] {
            return Err(EngineError::shape_mismatch(
                "weight file grids",
                &[src_shape[0] * src_shape[1], dst_shape[0] * dst_shape[1]],
                &[n_a, n_b],
            )
            .into());
        }
        if n_s == 0 {
            return Ok((method, vec![]));
        }

        let get_i32 = |name: &str| -> EngineResult<Vec<i32>> {
            ds.variable(name)
                .ok_or_else(|| wrap(format!("missing variable '{name}'")))?
                .get_values::<i32, _>(Extents::All)
                .change_context_lazy(|| wrap(format!("reading variable '{name}'")))
        };
        let rows = get_i32("row")?;
        let cols = get_i32("col")?;
        let weights = ds
            .variable("S")
            .ok_or_else(|| wrap("missing variable 'S'".to_string()))?
            .get_values::<f64, _>(Extents::All)
            .change_context_lazy(|| wrap("reading variable 'S'".to_string()))?;

        if rows.len() != n_s || cols.len() != n_s || weights.len() != n_s {
            return Err(wrap(format!("'row', 'col' and 'S' must all have {n_s} values")).into());
        }

        // 1-based on disk
        let to_index = |name: &str, k: usize, value: i32, n: usize| -> Result<usize, EngineError> {
            usize::try_from(value)
                .ok()
                .and_then(|v| v.checked_sub(1))
                .filter(|&v| v < n)
                .ok_or_else(|| wrap(format!("{name}[{k}] = {value} is outside 1..={n}")))
        };
        let mut entries = Vec::with_capacity(n_s);
        for (k, ((r, c), s)) in rows.into_iter().zip(cols).zip(weights).enumerate() {
            entries.push((to_index("row", k, r, n_b)?, to_index("col", k, c, n_a)?, s));
        }
        Ok((method, entries))
    }
}

/// Check that a field holds center values over exactly its grid's local window.
fn check_field_layout(what: &str, field: &FieldWrapper) -> EngineResult<()> {
    if field.stagger() != StaggerLocation::Center {
        return Err(EngineError::UnsupportedStagger {
            field: field.name().to_string(),
            stagger: field.stagger(),
        }
        .into());
    }
    let window = center_bounds(field.grid()).local_shape();
    let shape = field.data().shape();
    if shape.len() < 2 || shape[..2] != window[..] {
        let what = format!("{what} field '{}'", field.name());
        return Err(EngineError::shape_mismatch(what, &window, shape).into());
    }
    Ok(())
}

/// Assemble the full source field on every rank, flattened as
/// `(i, j, t) -> (i * n1 + j) * nt + t`.
fn gather_field<C: ProcessContext>(ctx: &C, field: &FieldWrapper, shape: [usize; 2], nt: usize) -> Vec<f64> {
    let bounds = center_bounds(field.grid());
    let local: Vec<(usize, usize, usize, f64)> = field
        .data()
        .indexed_iter()
        .map(|(idx, v)| {
            let t = if idx.ndim() > 2 { idx[2] } else { 0 };
            (bounds.lower[0] + idx[0], bounds.lower[1] + idx[1], t, *v)
        })
        .collect();

    let mut global = vec![0.0; shape[0] * shape[1] * nt];
    for block in all_gather(ctx, local) {
        for (i, j, t, v) in block {
            global[(i * shape[1] + j) * nt + t] = v;
        }
    }
    global
}

impl WeightOperator for SparseWeights {
    fn apply<C: ProcessContext>(
        &self,
        ctx: &C,
        src: &FieldWrapper,
        dst: &mut FieldWrapper,
        zero_region: ZeroRegion,
    ) -> EngineResult<()> {
        let src_shape = src.grid().coord_grid().shape();
        if src_shape != self.src_shape {
            return Err(EngineError::shape_mismatch("source grid", &self.src_shape, &src_shape).into());
        }
        let dst_shape = dst.grid().coord_grid().shape();
        if dst_shape != self.dst_shape {
            return Err(EngineError::shape_mismatch("destination grid", &self.dst_shape, &dst_shape).into());
        }
        check_field_layout("source", src)?;
        check_field_layout("destination", dst)?;
        let nt = src.time_len();
        if dst.time_len() != nt {
            return Err(EngineError::shape_mismatch("time axis", &[nt], &[dst.time_len()]).into());
        }

        let src_values = gather_field(ctx, src, src_shape, nt);

        let mut by_row: HashMap<usize, Vec<(usize, f64)>> = HashMap::new();
        for &(row, col, s) in self.entries.iter() {
            by_row.entry(row).or_default().push((col, s));
        }

        let lower = self.dst_bounds.lower;
        let data = dst.data_mut();
        if zero_region == ZeroRegion::Total {
            data.fill(0.0);
        }
        for (idx, value) in data.indexed_iter_mut() {
            let (i, j) = (lower[0] + idx[0], lower[1] + idx[1]);
            let t = if idx.ndim() > 2 { idx[2] } else { 0 };
            let Some(weights) = by_row.get(&cell_index(dst_shape, i, j)) else {
                continue;
            };
            if zero_region == ZeroRegion::Select {
                *value = 0.0;
            }
            for &(col, s) in weights {
                let (si, sj) = (col % src_shape[0], col / src_shape[0]);
                *value += s * src_values[(si * src_shape[1] + sj) * nt + t];
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SerialContext;
    use crate::dimension::{AliasSet, CoordinateRole};
    use crate::local_engine::LocalEngine;
    use crate::test_utils::{
        create_analytic_grid_file, create_grid_file, full_dim, make_temp_dir, rrfs_grid_spec,
    };

    fn nearest_weights(grid: &GridWrapper, weight_path: &Path) -> SparseWeights {
        let options = OperatorOptions::new(RegridMethod::NearestSourceToDestination, UnmappedAction::Error)
            .weight_file(weight_path);
        LocalEngine.build_operator(&SerialContext, grid, grid, &options).unwrap()
    }

    #[test]
    fn test_corner_field_rejected() {
        let tmp = make_temp_dir();
        let path = tmp.path().join("grid.nc");
        create_analytic_grid_file(&path, true);
        let grid = GridWrapper::from_dataset(&SerialContext, &path, rrfs_grid_spec(true)).unwrap();
        let weights = nearest_weights(&grid, &tmp.path().join("weights.nc"));

        let corner_dims = grid.dims_for(StaggerLocation::Corner).unwrap().clone();
        let src = FieldWrapper::zeros("field", &grid, corner_dims, StaggerLocation::Corner);
        let mut dst = FieldWrapper::zeros("field", &grid, grid.dims().clone(), StaggerLocation::Center);
        let err = weights
            .apply(&SerialContext, &src, &mut dst, ZeroRegion::Total)
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            EngineError::UnsupportedStagger {
                stagger: StaggerLocation::Corner,
                ..
            }
        ));
    }

    #[test]
    fn test_time_length_mismatch() {
        let tmp = make_temp_dir();
        let path = tmp.path().join("grid.nc");
        create_analytic_grid_file(&path, false);
        let grid = GridWrapper::from_dataset(&SerialContext, &path, rrfs_grid_spec(false)).unwrap();
        let weights = nearest_weights(&grid, &tmp.path().join("weights.nc"));

        let time = full_dim(AliasSet::from("time"), 3, CoordinateRole::Time);
        let timed_dims = grid.dims().with_appended(time).unwrap();
        let src = FieldWrapper::zeros("field", &grid, grid.dims().clone(), StaggerLocation::Center);
        let mut dst = FieldWrapper::zeros("field", &grid, timed_dims, StaggerLocation::Center);
        let err = weights
            .apply(&SerialContext, &src, &mut dst, ZeroRegion::Total)
            .unwrap_err();
        match err.current_context() {
            EngineError::ShapeMismatch { what, expected, actual } => {
                assert_eq!(what, "time axis");
                assert_eq!(expected, &[1]);
                assert_eq!(actual, &[3]);
            }
            other => panic!("expected a shape mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_weight_file_index_out_of_range() {
        let tmp = make_temp_dir();
        let path = tmp.path().join("grid.nc");
        let weight_path = tmp.path().join("weights.nc");
        create_analytic_grid_file(&path, false);
        let grid = GridWrapper::from_dataset(&SerialContext, &path, rrfs_grid_spec(false)).unwrap();
        nearest_weights(&grid, &weight_path);

        for bad_col in [0, -4, 999_999] {
            {
                let mut ds = netcdf::append(&weight_path).unwrap();
                let mut var = ds.variable_mut("col").unwrap();
                let mut cols = var.get_values::<i32, _>(Extents::All).unwrap();
                cols[0] = bad_col;
                var.put_values(&cols, Extents::All).unwrap();
            }
            let err = LocalEngine
                .read_operator(&SerialContext, &weight_path, &grid, &grid)
                .unwrap_err();
            match err.current_context() {
                EngineError::WeightFile { reason, .. } => {
                    assert!(reason.contains("col[0]"), "{reason}")
                }
                other => panic!("expected a weight file error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_foreign_weight_file() {
        let tmp = make_temp_dir();
        let path = tmp.path().join("grid.nc");
        let small_path = tmp.path().join("small.nc");
        let weight_path = tmp.path().join("weights.nc");
        create_analytic_grid_file(&path, false);
        create_grid_file(&small_path, (230.0, 300.0, 8), (25.0, 50.0, 6), false);
        let grid = GridWrapper::from_dataset(&SerialContext, &path, rrfs_grid_spec(false)).unwrap();
        let small = GridWrapper::from_dataset(&SerialContext, &small_path, rrfs_grid_spec(false)).unwrap();
        nearest_weights(&small, &weight_path);

        let err = LocalEngine
            .read_operator(&SerialContext, &weight_path, &grid, &grid)
            .unwrap_err();
        match err.current_context() {
            EngineError::ShapeMismatch { expected, actual, .. } => {
                assert_eq!(expected, &[71 * 26, 71 * 26]);
                assert_eq!(actual, &[8 * 6, 8 * 6]);
            }
            other => panic!("expected a shape mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_weight_file_without_method() {
        let tmp = make_temp_dir();
        let path = tmp.path().join("grid.nc");
        let weight_path = tmp.path().join("weights.nc");
        create_analytic_grid_file(&path, false);
        let grid = GridWrapper::from_dataset(&SerialContext, &path, rrfs_grid_spec(false)).unwrap();
        netcdf::create(&weight_path).unwrap();

        let err = LocalEngine
            .read_operator(&SerialContext, &weight_path, &grid, &grid)
            .unwrap_err();
        assert!(matches!(err.current_context(), EngineError::WeightFile { .. }));
    }
}
