//! Fields: the values of one netCDF variable on a [`GridWrapper`].
use std::path::Path;

use error_stack::ResultExt;
use ndarray::{ArrayD, IxDyn};

use crate::context::ProcessContext;
use crate::dimension::{AliasSet, CoordinateRole, Dimension, DimensionCollection, StaggerLocation};
use crate::error::{RegridError, RegridResult};
use crate::grid::GridWrapper;
use crate::nc_utils::{append_serialized, dimension_len, load_variable_data, open_collective, set_variable_data};

/// One variable's local values on a grid, optionally with a trailing time axis.
///
/// The data array is laid out in the order of [`FieldWrapper::dims`]: the
/// grid's two axes first, then time if there is one.
#[derive(Debug, Clone)]
pub struct FieldWrapper<'g> {
    name: String,
    grid: &'g GridWrapper,
    dims: DimensionCollection,
    stagger: StaggerLocation,
    data: ArrayD<f64>,
}

impl<'g> FieldWrapper<'g> {
    /// Read variable `name` from the dataset at `path` onto `grid`.
    ///
    /// If `dim_time` is given, the field gets a trailing time dimension with
    /// the on-disk size of the first of those names present in the dataset.
    /// Each rank reads all time steps of its own spatial window.
    pub fn from_dataset<C: ProcessContext>(
        ctx: &C,
        path: &Path,
        name: &str,
        grid: &'g GridWrapper,
        dim_time: Option<&AliasSet>,
        stagger: StaggerLocation,
    ) -> RegridResult<Self> {
        log::debug!("reading field '{name}' from {}", path.display());
        let ds = open_collective(ctx, path)?;

        let grid_dims = grid.dims_for(stagger)?;
        let dims = match dim_time {
            None => grid_dims.clone(),
            Some(names) => {
                let size = dimension_len(&ds, names)
                    .attach_printable_lazy(|| format!("looking for the time dimension in {}", path.display()))?;
                let time = Dimension::new(names.clone(), size, 0, size, stagger, CoordinateRole::Time)?;
                grid_dims.with_appended(time)?
            }
        };

        let var = ds
            .variable(name)
            .ok_or_else(|| RegridError::variable_not_found(name, path))?;
        let data = load_variable_data(&var, &dims)
            .attach_printable_lazy(|| format!("loading field '{name}' from {}", path.display()))?;

        Ok(Self {
            name: name.to_string(),
            grid,
            dims,
            stagger,
            data,
        })
    }

    /// A field on `grid` with the given dims and all values zero.
    pub fn zeros(name: &str, grid: &'g GridWrapper, dims: DimensionCollection, stagger: StaggerLocation) -> Self {
        let data = ArrayD::zeros(IxDyn(&dims.local_shape()));
        Self {
            name: name.to_string(),
            grid,
            dims,
            stagger,
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn grid(&self) -> &'g GridWrapper {
        self.grid
    }

    pub fn dims(&self) -> &DimensionCollection {
        &self.dims
    }

    pub fn stagger(&self) -> StaggerLocation {
        self.stagger
    }

    /// Number of time steps, 1 for fields without a time axis.
    pub fn time_len(&self) -> usize {
        self.dims
            .iter()
            .find(|d| d.role() == CoordinateRole::Time)
            .map(|d| d.size())
            .unwrap_or(1)
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut ArrayD<f64> {
        &mut self.data
    }

    /// Write this field's values into its variable in the file at `path`.
    pub fn fill_nc_variable<C: ProcessContext>(&self, ctx: &C, path: &Path) -> RegridResult<()> {
        log::debug!("writing field '{}' to {}", self.name, path.display());
        append_serialized(ctx, path, |ds| {
            let mut var = ds
                .variable_mut(&self.name)
                .ok_or_else(|| RegridError::variable_not_found(&self.name, path))?;
            set_variable_data(&mut var, &self.dims, self.data.view())
        })
    }
}

/// Fields that all live on the very same grid instance.
#[derive(Debug)]
pub struct FieldWrapperCollection<'g>(Vec<FieldWrapper<'g>>);

impl<'g> FieldWrapperCollection<'g> {
    pub fn new(fields: Vec<FieldWrapper<'g>>) -> RegridResult<Self> {
        if let Some(first) = fields.first() {
            if let Some(other) = fields.iter().find(|f| !f.grid.shares_grid_with(first.grid)) {
                return Err(RegridError::configuration(format!(
                    "fields '{}' and '{}' are not on the same grid",
                    first.name, other.name
                ))
                .into());
            }
        }
        Ok(Self(fields))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldWrapper<'g>> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, FieldWrapper<'g>> {
        self.0.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&FieldWrapper<'g>> {
        self.0.iter().find(|f| f.name == name)
    }
}
