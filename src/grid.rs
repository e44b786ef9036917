//! Building grids from netCDF datasets and writing their coordinates back.
use std::path::Path;
use std::rc::Rc;

use error_stack::ResultExt;
use ndarray::Ix2;

use crate::context::ProcessContext;
use crate::coord_grid::{CoordGrid, Coordinate};
use crate::dimension::{DimensionCollection, StaggerLocation};
use crate::error::{RegridError, RegridResult};
use crate::grid_spec::GridSpec;
use crate::nc_utils::{append_serialized, load_variable_data, open_collective, set_variable_data};

/// A process-local grid together with the names its dataset uses for it.
///
/// The coordinate grid itself sits behind an `Rc` so that [`GridWrapper::rebind`]
/// can hand out views under different names without copying coordinates.
/// Fields built on a wrapper borrow it and cannot outlive it.
#[derive(Debug, Clone)]
pub struct GridWrapper {
    grid: Rc<CoordGrid>,
    dims: DimensionCollection,
    spec: GridSpec,
    corner_dims: Option<DimensionCollection>,
}

fn load_coordinate(
    ds: &netcdf::File,
    path: &Path,
    grid: &mut CoordGrid,
    varname: &str,
    dims: &DimensionCollection,
    stagger: StaggerLocation,
    coord: Coordinate,
) -> RegridResult<()> {
    let var = ds
        .variable(varname)
        .ok_or_else(|| RegridError::variable_not_found(varname, path))?;
    let values = load_variable_data(&var, dims)?
        .into_dimensionality::<Ix2>()
        .change_context_lazy(|| RegridError::context(format!("coordinate '{varname}' must be 2-D")))?;
    let target = grid
        .coords_mut(stagger, coord)
        .expect("the stagger location was added before its coordinates are loaded (this is a bug)");
    target.assign(&values);
    Ok(())
}

impl GridWrapper {
    /// Read the grid described by `spec` from the dataset at `path`. Every
    /// rank reads only the coordinates inside its own window.
    pub fn from_dataset<C: ProcessContext>(ctx: &C, path: &Path, spec: GridSpec) -> RegridResult<Self> {
        log::debug!("building grid from {}", path.display());
        let ds = open_collective(ctx, path)?;
        let shape = spec
            .grid_shape(&ds)
            .attach_printable_lazy(|| format!("reading grid shape from {}", path.display()))?;
        let mut grid = CoordGrid::new(ctx, shape);

        let dims = spec.create_grid_dims(&ds, &grid, StaggerLocation::Center)?;
        let names = spec.center().clone();
        load_coordinate(&ds, path, &mut grid, &names.x_var, &dims, StaggerLocation::Center, Coordinate::X)?;
        load_coordinate(&ds, path, &mut grid, &names.y_var, &dims, StaggerLocation::Center, Coordinate::Y)?;

        let corner_dims = if let Some(names) = spec.corner().cloned() {
            grid.add_corner_stagger();
            let corner_dims = spec.create_grid_dims(&ds, &grid, StaggerLocation::Corner)?;
            load_coordinate(&ds, path, &mut grid, &names.x_var, &corner_dims, StaggerLocation::Corner, Coordinate::X)?;
            load_coordinate(&ds, path, &mut grid, &names.y_var, &corner_dims, StaggerLocation::Corner, Coordinate::Y)?;
            Some(corner_dims)
        } else {
            None
        };

        Ok(Self {
            grid: Rc::new(grid),
            dims,
            spec,
            corner_dims,
        })
    }

    /// A view of the same coordinates under another spec and set of dimensions.
    /// The view carries no corner dimensions.
    pub fn rebind(&self, spec: GridSpec, dims: DimensionCollection) -> Self {
        Self {
            grid: Rc::clone(&self.grid),
            dims,
            spec,
            corner_dims: None,
        }
    }

    pub fn dims(&self) -> &DimensionCollection {
        &self.dims
    }

    pub fn corner_dims(&self) -> Option<&DimensionCollection> {
        self.corner_dims.as_ref()
    }

    /// Dimensions for a stagger location.
    pub fn dims_for(&self, stagger: StaggerLocation) -> RegridResult<&DimensionCollection> {
        match stagger {
            StaggerLocation::Center => Ok(&self.dims),
            StaggerLocation::Corner => self
                .corner_dims
                .as_ref()
                .ok_or_else(|| RegridError::configuration("grid has no corner dimensions").into()),
        }
    }

    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }

    pub fn coord_grid(&self) -> &CoordGrid {
        &self.grid
    }

    /// `true` if both wrappers refer to the same coordinate grid instance.
    pub fn shares_grid_with(&self, other: &GridWrapper) -> bool {
        Rc::ptr_eq(&self.grid, &other.grid)
    }

    /// Write the center coordinates into the spec's coordinate variables of
    /// the file at `path`, each rank writing its own window. Refused for
    /// wrappers that carry corner dimensions.
    pub fn fill_nc_variables<C: ProcessContext>(&self, ctx: &C, path: &Path) -> RegridResult<()> {
        if self.corner_dims.is_some() {
            return Err(RegridError::CornerWriteBack.into());
        }

        log::debug!("writing grid coordinates to {}", path.display());
        let names = self.spec.center();
        append_serialized(ctx, path, |ds| {
            for (varname, coord) in [(&names.x_var, Coordinate::X), (&names.y_var, Coordinate::Y)] {
                let values = match coord {
                    Coordinate::X => self.spec.get_x_data(&self.grid, StaggerLocation::Center),
                    Coordinate::Y => self.spec.get_y_data(&self.grid, StaggerLocation::Center),
                }
                .expect("every grid has center coordinates (this is a bug)");
                let mut var = ds
                    .variable_mut(varname)
                    .ok_or_else(|| RegridError::variable_not_found(varname, path))?;
                set_variable_data(&mut var, &self.dims, values.view().into_dyn())?;
            }
            Ok(())
        })
    }
}
