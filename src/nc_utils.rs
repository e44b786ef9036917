//! netCDF helpers: typed arrays, coordinated file access across ranks, and
//! the pair of functions that move data between an on-disk variable and an
//! array laid out in a grid's dimension order.
use std::path::Path;

use error_stack::ResultExt;
use ndarray::{ArrayD, ArrayViewD, IxDyn};
use netcdf::{
    types::{FloatType, IntType, NcVariableType},
    Extent, Extents,
};

use crate::context::{all_gather, ProcessContext};
use crate::dimension::{create_dimension_map, AliasSet, DimensionCollection};
use crate::error::{RegridError, RegridResult};

/// Values at or above this magnitude are netCDF default fill values
/// (`NC_FILL_FLOAT` is 9.96921e36).
pub const NC_FILL_THRESHOLD: f64 = 9.0e36;

/// `true` if `v` should be treated as missing data.
pub fn is_missing(v: f64) -> bool {
    !v.is_finite() || v.abs() >= NC_FILL_THRESHOLD
}

/// A numeric array in the on-disk type of the variable it came from.
/// It is best created by reading from a netCDF variable with its `get_from` method.
#[derive(Debug, Clone)]
pub enum NcArray {
    I8(ArrayD<i8>),
    I16(ArrayD<i16>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    U32(ArrayD<u32>),
    U64(ArrayD<u64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

fn unsupported_type(var_name: &str, vartype: &NcVariableType) -> RegridError {
    RegridError::context(format!(
        "variable '{var_name}' has type {vartype:?}, only numeric variables are supported"
    ))
}

impl NcArray {
    /// Read the `extents` window of a variable in its own type.
    pub fn get_from(var: &netcdf::Variable, extents: Extents) -> RegridResult<Self> {
        let name = var.name();
        let arr = match var.vartype() {
            NcVariableType::Int(IntType::I8) => var.get::<i8, _>(extents).map(Self::I8),
            NcVariableType::Int(IntType::I16) => var.get::<i16, _>(extents).map(Self::I16),
            NcVariableType::Int(IntType::I32) => var.get::<i32, _>(extents).map(Self::I32),
            NcVariableType::Int(IntType::I64) => var.get::<i64, _>(extents).map(Self::I64),
            NcVariableType::Int(IntType::U8) => var.get::<u8, _>(extents).map(Self::U8),
            NcVariableType::Int(IntType::U16) => var.get::<u16, _>(extents).map(Self::U16),
            NcVariableType::Int(IntType::U32) => var.get::<u32, _>(extents).map(Self::U32),
            NcVariableType::Int(IntType::U64) => var.get::<u64, _>(extents).map(Self::U64),
            NcVariableType::Float(FloatType::F32) => var.get::<f32, _>(extents).map(Self::F32),
            NcVariableType::Float(FloatType::F64) => var.get::<f64, _>(extents).map(Self::F64),
            other => return Err(unsupported_type(&name, &other).into()),
        };
        arr.change_context_lazy(|| RegridError::context(format!("reading variable '{name}'")))
    }

    /// Convert `data` to the on-disk type of `var`.
    pub fn from_f64_for(var: &netcdf::Variable, data: ArrayViewD<f64>) -> RegridResult<Self> {
        let arr = match var.vartype() {
            NcVariableType::Int(IntType::I8) => Self::I8(data.mapv(|v| v as i8)),
            NcVariableType::Int(IntType::I16) => Self::I16(data.mapv(|v| v as i16)),
            NcVariableType::Int(IntType::I32) => Self::I32(data.mapv(|v| v as i32)),
            NcVariableType::Int(IntType::I64) => Self::I64(data.mapv(|v| v as i64)),
            NcVariableType::Int(IntType::U8) => Self::U8(data.mapv(|v| v as u8)),
            NcVariableType::Int(IntType::U16) => Self::U16(data.mapv(|v| v as u16)),
            NcVariableType::Int(IntType::U32) => Self::U32(data.mapv(|v| v as u32)),
            NcVariableType::Int(IntType::U64) => Self::U64(data.mapv(|v| v as u64)),
            NcVariableType::Float(FloatType::F32) => Self::F32(data.mapv(|v| v as f32)),
            NcVariableType::Float(FloatType::F64) => Self::F64(data.to_owned()),
            other => return Err(unsupported_type(&var.name(), &other).into()),
        };
        Ok(arr)
    }

    /// Write this array into the `extents` window of an existing variable.
    pub fn put_into(&self, var: &mut netcdf::VariableMut, extents: Extents) -> RegridResult<()> {
        let res = match self {
            NcArray::I8(arr) => var.put(arr.view(), extents),
            NcArray::I16(arr) => var.put(arr.view(), extents),
            NcArray::I32(arr) => var.put(arr.view(), extents),
            NcArray::I64(arr) => var.put(arr.view(), extents),
            NcArray::U8(arr) => var.put(arr.view(), extents),
            NcArray::U16(arr) => var.put(arr.view(), extents),
            NcArray::U32(arr) => var.put(arr.view(), extents),
            NcArray::U64(arr) => var.put(arr.view(), extents),
            NcArray::F32(arr) => var.put(arr.view(), extents),
            NcArray::F64(arr) => var.put(arr.view(), extents),
        };
        res.change_context_lazy(|| RegridError::context(format!("writing variable '{}'", var.name())))
    }

    pub fn into_f64(self) -> ArrayD<f64> {
        match self {
            NcArray::I8(arr) => arr.mapv(f64::from),
            NcArray::I16(arr) => arr.mapv(f64::from),
            NcArray::I32(arr) => arr.mapv(f64::from),
            NcArray::I64(arr) => arr.mapv(|v| v as f64),
            NcArray::U8(arr) => arr.mapv(f64::from),
            NcArray::U16(arr) => arr.mapv(f64::from),
            NcArray::U32(arr) => arr.mapv(f64::from),
            NcArray::U64(arr) => arr.mapv(|v| v as f64),
            NcArray::F32(arr) => arr.mapv(f64::from),
            NcArray::F64(arr) => arr,
        }
    }
}

/// Size of the first dimension of `ds` matching any of `names`.
pub fn dimension_len(ds: &netcdf::File, names: &AliasSet) -> RegridResult<usize> {
    names
        .iter()
        .find_map(|n| ds.dimension(n))
        .map(|d| d.len())
        .ok_or_else(|| RegridError::dimension_not_found(names.iter()).into())
}

/// Make every rank agree on the outcome of a step each of them did locally.
/// A rank whose own step succeeded still fails, with the error built by
/// `peer_failed` from the lowest failing rank, if any other rank failed.
pub fn agree_with<C, T, E, F>(ctx: &C, result: error_stack::Result<T, E>, peer_failed: F) -> error_stack::Result<T, E>
where
    C: ProcessContext,
    E: error_stack::Context,
    F: FnOnce(usize) -> E,
{
    let oks = all_gather(ctx, result.is_ok());
    match result {
        Err(e) => Err(e),
        Ok(v) => match oks.iter().position(|ok| !ok) {
            None => Ok(v),
            Some(rank) => Err(peer_failed(rank).into()),
        },
    }
}

/// [`agree_with`] for the crate's own errors.
pub fn agree<C: ProcessContext, T>(ctx: &C, result: RegridResult<T>) -> RegridResult<T> {
    agree_with(ctx, result, |rank| {
        RegridError::context(format!("rank {rank} failed during a collective step"))
    })
}

/// Open a dataset for reading on every rank.
pub fn open_collective<C: ProcessContext>(ctx: &C, path: &Path) -> RegridResult<netcdf::File> {
    let res = netcdf::open(path)
        .change_context_lazy(|| RegridError::context(format!("opening {} for reading", path.display())));
    agree(ctx, res)
}

/// Create `path` on rank 0 and let `init` define its contents there. Fails on
/// every rank, before anything is written, if the file already exists.
pub fn create_collective<C, F>(ctx: &C, path: &Path, init: F) -> RegridResult<()>
where
    C: ProcessContext,
    F: FnOnce(&mut netcdf::FileMut) -> RegridResult<()>,
{
    let exists: RegridResult<()> = if path.exists() {
        Err(RegridError::OutputExists(path.to_path_buf()).into())
    } else {
        Ok(())
    };
    agree(ctx, exists)?;

    let res = if ctx.is_root() {
        log::debug!("creating {}", path.display());
        netcdf::create(path)
            .change_context_lazy(|| RegridError::context(format!("creating {}", path.display())))
            .and_then(|mut ds| init(&mut ds))
    } else {
        Ok(())
    };
    let res = agree(ctx, res);
    ctx.barrier();
    res
}

/// Open `path` for appending one rank at a time, in rank order, and run
/// `write` on it. Every rank passes every barrier even if its own write failed.
pub fn append_serialized<C, F>(ctx: &C, path: &Path, write: F) -> RegridResult<()>
where
    C: ProcessContext,
    F: FnOnce(&mut netcdf::FileMut) -> RegridResult<()>,
{
    let mut write = Some(write);
    let mut res = Ok(());
    for turn in 0..ctx.size() {
        if turn == ctx.rank() {
            if let Some(write) = write.take() {
                res = netcdf::append(path)
                    .change_context_lazy(|| RegridError::context(format!("opening {} for appending", path.display())))
                    .and_then(|mut ds| write(&mut ds));
            }
        }
        ctx.barrier();
    }
    agree(ctx, res)
}

/// For each of `var`'s dimensions, the position of the matching member of `target_dims`.
fn variable_axis_map(var: &netcdf::Variable, target_dims: &DimensionCollection) -> RegridResult<Vec<usize>> {
    let var_dims: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
    if var_dims.len() != target_dims.len() {
        return Err(RegridError::rank_mismatch(var.name(), target_dims.len(), var_dims.len()).into());
    }

    let dim_map = create_dimension_map(target_dims);
    let mut axes = Vec::with_capacity(var_dims.len());
    for name in var_dims.iter() {
        let idx = *dim_map
            .get(name)
            .ok_or_else(|| RegridError::dimension_not_found([name]))
            .attach_printable_lazy(|| format!("variable '{}' has dimensions {var_dims:?}", var.name()))?;
        if axes.contains(&idx) {
            return Err(RegridError::configuration(format!(
                "two dimensions of variable '{}' map to {}",
                var.name(),
                target_dims.iter().nth(idx).map(|d| d.name()).unwrap_or("?")
            ))
            .into());
        }
        axes.push(idx);
    }
    Ok(axes)
}

fn local_extents(axes: &[usize], target_dims: &DimensionCollection) -> (Extents, bool) {
    let dims: Vec<_> = target_dims.iter().collect();
    let mut empty = false;
    let extents: Vec<Extent> = axes
        .iter()
        .map(|&t| {
            let d = dims[t];
            empty |= d.local_len() == 0;
            Extent::from(d.lower()..d.upper())
        })
        .collect();
    (Extents::from(extents), empty)
}

/// Read the local window of `var` and return it with its axes in the order of
/// `target_dims`. Axes are matched by name, so the on-disk order is free.
pub fn load_variable_data(var: &netcdf::Variable, target_dims: &DimensionCollection) -> RegridResult<ArrayD<f64>> {
    let axes = variable_axis_map(var, target_dims)?;
    let (extents, empty) = local_extents(&axes, target_dims);
    if empty {
        return Ok(ArrayD::zeros(IxDyn(&target_dims.local_shape())));
    }

    let raw = NcArray::get_from(var, extents)?.into_f64();
    // Output axis k is the variable axis whose target position is k.
    let mut inverse = vec![0; axes.len()];
    for (var_axis, &target_axis) in axes.iter().enumerate() {
        inverse[target_axis] = var_axis;
    }
    Ok(raw.permuted_axes(inverse).as_standard_layout().into_owned())
}

/// Write `data`, laid out in the order of `target_dims`, into the local window
/// of `var`. This undoes exactly what [`load_variable_data`] does.
pub fn set_variable_data(
    var: &mut netcdf::VariableMut,
    target_dims: &DimensionCollection,
    data: ArrayViewD<f64>,
) -> RegridResult<()> {
    let axes = variable_axis_map(var, target_dims)?;
    if data.shape() != target_dims.local_shape().as_slice() {
        return Err(RegridError::context(format!(
            "data for '{}' has shape {:?}, but the local window is {:?}",
            var.name(),
            data.shape(),
            target_dims.local_shape()
        ))
        .into());
    }

    let (extents, empty) = local_extents(&axes, target_dims);
    if empty {
        return Ok(());
    }

    let on_disk_order = data.permuted_axes(axes);
    let on_disk_order = on_disk_order.as_standard_layout();
    NcArray::from_f64_for(var, on_disk_order.view())?.put_into(var, extents)
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, Array3};

    use super::*;
    use crate::context::{SerialContext, ThreadGroup};
    use crate::dimension::{CoordinateRole, Dimension, StaggerLocation};
    use crate::test_utils::make_temp_dir;

    fn dim(name: &str, size: usize, lower: usize, upper: usize, role: CoordinateRole) -> Dimension {
        Dimension::new(AliasSet::from(name), size, lower, upper, StaggerLocation::Center, role).unwrap()
    }

    fn write_test_file(path: &Path) {
        let mut ds = netcdf::create(path).unwrap();
        ds.add_dimension("time", 3).unwrap();
        ds.add_dimension("lat", 4).unwrap();
        ds.add_dimension("lon", 5).unwrap();
        let values = Array3::from_shape_fn((3, 4, 5), |(t, j, i)| (t * 100 + j * 10 + i) as f32);
        let mut var = ds.add_variable::<f32>("field", &["time", "lat", "lon"]).unwrap();
        var.put(values.view(), Extents::All).unwrap();
        let mut var = ds.add_variable::<i16>("mask", &["lat", "lon"]).unwrap();
        var.put(Array2::<i16>::ones((4, 5)).view(), Extents::All).unwrap();
    }

    #[test]
    fn test_load_permutes_into_target_order() {
        let tmp = make_temp_dir();
        let path = tmp.path().join("in.nc");
        write_test_file(&path);

        let target = DimensionCollection::new(vec![
            dim("lon", 5, 1, 4, CoordinateRole::X),
            dim("lat", 4, 0, 2, CoordinateRole::Y),
            dim("time", 3, 0, 3, CoordinateRole::Time),
        ])
        .unwrap();
        let ds = netcdf::open(&path).unwrap();
        let data = load_variable_data(&ds.variable("field").unwrap(), &target).unwrap();
        assert_eq!(data.shape(), &[3, 2, 3]);
        // data[i, j, t] = value at lon = 1 + i, lat = j, time = t
        assert_eq!(data[[0, 0, 0]], 1.0);
        assert_eq!(data[[2, 1, 2]], 213.0);
    }

    #[test]
    fn test_rank_mismatch() {
        let tmp = make_temp_dir();
        let path = tmp.path().join("in.nc");
        write_test_file(&path);

        let target = DimensionCollection::new(vec![
            dim("lon", 5, 0, 5, CoordinateRole::X),
            dim("lat", 4, 0, 4, CoordinateRole::Y),
        ])
        .unwrap();
        let ds = netcdf::open(&path).unwrap();
        let err = load_variable_data(&ds.variable("field").unwrap(), &target).unwrap_err();
        match err.current_context() {
            RegridError::RankMismatch { expected, actual, .. } => assert_eq!((*expected, *actual), (2, 3)),
            other => panic!("expected RankMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_write_then_read_is_identity() {
        let tmp = make_temp_dir();
        let path = tmp.path().join("in.nc");
        write_test_file(&path);

        let target = DimensionCollection::new(vec![
            dim("lon", 5, 2, 5, CoordinateRole::X),
            dim("lat", 4, 1, 3, CoordinateRole::Y),
        ])
        .unwrap();
        let data = ArrayD::from_shape_fn(IxDyn(&[3, 2]), |idx| (idx[0] * 7 + idx[1]) as f64);
        {
            let mut ds = netcdf::append(&path).unwrap();
            let mut var = ds.variable_mut("mask").unwrap();
            set_variable_data(&mut var, &target, data.view()).unwrap();
        }
        let ds = netcdf::open(&path).unwrap();
        let mask = ds.variable("mask").unwrap();
        assert_eq!(load_variable_data(&mask, &target).unwrap(), data);
        // Outside the window nothing changed
        let full = mask.get::<i16, _>(Extents::All).unwrap();
        assert_eq!(full[[0, 0]], 1);
        assert_eq!(full[[1, 2]], 0);
        assert_eq!(full[[2, 4]], 15);
    }

    #[test]
    fn test_create_collective_refuses_existing() {
        let tmp = make_temp_dir();
        let path = tmp.path().join("in.nc");
        write_test_file(&path);
        let before = std::fs::read(&path).unwrap();
        let err = create_collective(&SerialContext, &path, |_| Ok(())).unwrap_err();
        assert!(matches!(err.current_context(), RegridError::OutputExists(_)));
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_append_serialized_all_ranks_write() {
        let tmp = make_temp_dir();
        let path = tmp.path().join("out.nc");
        create_collective(&SerialContext, &path, |ds| {
            ds.add_dimension("rank", 3)
                .change_context(RegridError::context("test"))?;
            ds.add_variable::<i32>("who", &["rank"])
                .change_context(RegridError::context("test"))?;
            Ok(())
        })
        .unwrap();

        let results = ThreadGroup::run(3, |ctx| {
            append_serialized(ctx, &path, |ds| {
                let mut var = ds.variable_mut("who").unwrap();
                let r = ctx.rank();
                var.put_values(&[r as i32 + 1], Extents::from(vec![Extent::from(r..r + 1)]))
                    .change_context(RegridError::context("test"))
            })
        });
        assert!(results.iter().all(|r| r.is_ok()));

        let ds = netcdf::open(&path).unwrap();
        let who = ds.variable("who").unwrap().get_values::<i32, _>(Extents::All).unwrap();
        assert_eq!(who, vec![1, 2, 3]);
    }

    #[test]
    fn test_agree_propagates_failure() {
        let results = ThreadGroup::run(2, |ctx| {
            let res: RegridResult<()> = if ctx.rank() == 1 {
                Err(RegridError::context("boom").into())
            } else {
                Ok(())
            };
            agree(ctx, res)
        });
        assert!(results.iter().all(|r| r.is_err()));
    }

    #[test]
    fn test_is_missing() {
        assert!(is_missing(f64::NAN));
        assert!(is_missing(9.969209968386869e36));
        assert!(!is_missing(-1.0));
        assert!(!is_missing(999.0));
    }
}
