//! Declarative description of where a dataset keeps its grid coordinates.
use error_stack::ResultExt;

use crate::coord_grid::{CoordGrid, Coordinate};
use crate::dimension::{AliasSet, CoordinateRole, Dimension, DimensionCollection, StaggerLocation};
use crate::error::{RegridError, RegridResult};
use crate::nc_utils::dimension_len;

/// Variable and dimension names for one stagger location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaggerNames {
    pub x_var: String,
    pub y_var: String,
    pub x_dim: AliasSet,
    pub y_dim: AliasSet,
}

/// Which variables hold the grid coordinates in a dataset, which dimensions
/// back them, and which array axis is x.
///
/// Build one with [`GridSpec::builder`]. Corners are all-or-nothing: either
/// all four of the corner variable and dimension names are given or none are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridSpec {
    center: StaggerNames,
    corner: Option<StaggerNames>,
    x_index: usize,
    y_index: usize,
}

#[derive(Debug, Clone)]
pub struct GridSpecBuilder {
    center: StaggerNames,
    x_corner: Option<String>,
    y_corner: Option<String>,
    x_corner_dim: Option<AliasSet>,
    y_corner_dim: Option<AliasSet>,
    x_index: usize,
}

impl GridSpecBuilder {
    pub fn x_corner<S: ToString>(mut self, name: S) -> Self {
        self.x_corner = Some(name.to_string());
        self
    }

    pub fn y_corner<S: ToString>(mut self, name: S) -> Self {
        self.y_corner = Some(name.to_string());
        self
    }

    pub fn x_corner_dim(mut self, names: AliasSet) -> Self {
        self.x_corner_dim = Some(names);
        self
    }

    pub fn y_corner_dim(mut self, names: AliasSet) -> Self {
        self.y_corner_dim = Some(names);
        self
    }

    /// Array axis (0 or 1) that holds x. y takes the other one.
    pub fn x_index(mut self, x_index: usize) -> Self {
        self.x_index = x_index;
        self
    }

    pub fn build(self) -> RegridResult<GridSpec> {
        if self.x_index > 1 {
            return Err(RegridError::configuration(format!(
                "x_index must be 0 or 1, got {}",
                self.x_index
            ))
            .into());
        }

        let corner = match (self.x_corner, self.y_corner, self.x_corner_dim, self.y_corner_dim) {
            (None, None, None, None) => None,
            (Some(x_var), Some(y_var), Some(x_dim), Some(y_dim)) => Some(StaggerNames {
                x_var,
                y_var,
                x_dim,
                y_dim,
            }),
            (xc, yc, xcd, ycd) => {
                let missing: Vec<&str> = [
                    ("x_corner", xc.is_none()),
                    ("y_corner", yc.is_none()),
                    ("x_corner_dim", xcd.is_none()),
                    ("y_corner_dim", ycd.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, is_missing)| is_missing.then_some(name))
                .collect();
                return Err(RegridError::configuration(format!(
                    "if any corner field is set, all must be; missing {}",
                    missing.join(", ")
                ))
                .into());
            }
        };

        Ok(GridSpec {
            center: self.center,
            corner,
            x_index: self.x_index,
            y_index: 1 - self.x_index,
        })
    }
}

impl GridSpec {
    pub fn builder<X: ToString, Y: ToString>(x_center: X, y_center: Y, x_dim: AliasSet, y_dim: AliasSet) -> GridSpecBuilder {
        GridSpecBuilder {
            center: StaggerNames {
                x_var: x_center.to_string(),
                y_var: y_center.to_string(),
                x_dim,
                y_dim,
            },
            x_corner: None,
            y_corner: None,
            x_corner_dim: None,
            y_corner_dim: None,
            x_index: 0,
        }
    }

    pub fn has_corners(&self) -> bool {
        self.corner.is_some()
    }

    pub fn x_index(&self) -> usize {
        self.x_index
    }

    pub fn y_index(&self) -> usize {
        self.y_index
    }

    pub fn center(&self) -> &StaggerNames {
        &self.center
    }

    pub fn corner(&self) -> Option<&StaggerNames> {
        self.corner.as_ref()
    }

    /// Names for a stagger location; asking for corners on a spec without them
    /// is a configuration error.
    pub fn names(&self, stagger: StaggerLocation) -> RegridResult<&StaggerNames> {
        match stagger {
            StaggerLocation::Center => Ok(&self.center),
            StaggerLocation::Corner => self
                .corner
                .as_ref()
                .ok_or_else(|| RegridError::configuration("grid spec has no corner coordinates").into()),
        }
    }

    pub fn x_dim(&self) -> &AliasSet {
        &self.center.x_dim
    }

    pub fn y_dim(&self) -> &AliasSet {
        &self.center.y_dim
    }

    /// Order a pair of per-coordinate values the way the grid's array axes are laid out.
    pub fn order<T>(&self, x: T, y: T) -> [T; 2] {
        if self.x_index == 0 {
            [x, y]
        } else {
            [y, x]
        }
    }

    /// The local x coordinates of `grid` at `stagger`.
    pub fn get_x_data<'a>(&self, grid: &'a CoordGrid, stagger: StaggerLocation) -> Option<&'a ndarray::Array2<f64>> {
        grid.coords(stagger, Coordinate::X)
    }

    /// The local y coordinates of `grid` at `stagger`.
    pub fn get_y_data<'a>(&self, grid: &'a CoordGrid, stagger: StaggerLocation) -> Option<&'a ndarray::Array2<f64>> {
        grid.coords(stagger, Coordinate::Y)
    }

    /// Global grid shape as read from the dataset's center dimensions.
    pub fn grid_shape(&self, ds: &netcdf::File) -> RegridResult<[usize; 2]> {
        let x_size = dimension_len(ds, &self.center.x_dim)?;
        let y_size = dimension_len(ds, &self.center.y_dim)?;
        Ok(self.order(x_size, y_size))
    }

    /// Dimensions of `grid` at `stagger`, with sizes from the dataset and
    /// bounds from the grid's decomposition, ordered like the grid's axes.
    pub fn create_grid_dims(
        &self,
        ds: &netcdf::File,
        grid: &CoordGrid,
        stagger: StaggerLocation,
    ) -> RegridResult<DimensionCollection> {
        let names = self.names(stagger)?;
        let bounds = grid.bounds(stagger).ok_or_else(|| {
            RegridError::configuration(format!("grid has no {stagger:?} stagger location"))
        })?;

        let make_dim = |aliases: &AliasSet, axis: usize, role: CoordinateRole| -> RegridResult<Dimension> {
            let size = dimension_len(ds, aliases)?;
            Dimension::new(
                aliases.clone(),
                size,
                bounds.lower[axis],
                bounds.upper[axis],
                stagger,
                role,
            )
            .attach_printable_lazy(|| format!("while building the {stagger:?} dimensions of the grid"))
        };

        let x_dim = make_dim(&names.x_dim, self.x_index, CoordinateRole::X)?;
        let y_dim = make_dim(&names.y_dim, self.y_index, CoordinateRole::Y)?;
        let [first, second] = self.order(x_dim, y_dim);
        DimensionCollection::new(vec![first, second])
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn base() -> GridSpecBuilder {
        GridSpec::builder(
            "grid_lont",
            "grid_latt",
            AliasSet::from("grid_xt"),
            AliasSet::from("grid_yt"),
        )
    }

    #[rstest]
    #[case(true, false, false, false)]
    #[case(false, true, false, false)]
    #[case(false, false, true, false)]
    #[case(false, false, false, true)]
    #[case(true, true, true, false)]
    fn test_partial_corners_rejected(#[case] xc: bool, #[case] yc: bool, #[case] xcd: bool, #[case] ycd: bool) {
        let mut builder = base();
        if xc {
            builder = builder.x_corner("grid_lon");
        }
        if yc {
            builder = builder.y_corner("grid_lat");
        }
        if xcd {
            builder = builder.x_corner_dim(AliasSet::from("grid_x"));
        }
        if ycd {
            builder = builder.y_corner_dim(AliasSet::from("grid_y"));
        }
        let err = builder.build().unwrap_err();
        assert!(matches!(err.current_context(), RegridError::Configuration(_)));
    }

    #[test]
    fn test_no_corners() {
        let spec = base().build().unwrap();
        assert!(!spec.has_corners());
        assert!(spec.names(StaggerLocation::Corner).is_err());
        assert_eq!((spec.x_index(), spec.y_index()), (0, 1));
    }

    #[test]
    fn test_all_corners() {
        let spec = base()
            .x_corner("grid_lon")
            .y_corner("grid_lat")
            .x_corner_dim(AliasSet::from("grid_x"))
            .y_corner_dim(AliasSet::from("grid_y"))
            .build()
            .unwrap();
        assert!(spec.has_corners());
        assert_eq!(spec.names(StaggerLocation::Corner).unwrap().x_var, "grid_lon");
    }

    #[rstest]
    #[case(0, ["x", "y"])]
    #[case(1, ["y", "x"])]
    fn test_axis_order(#[case] x_index: usize, #[case] expected: [&str; 2]) {
        let spec = base().x_index(x_index).build().unwrap();
        assert_eq!(spec.order("x", "y"), expected);
        assert_eq!(spec.x_index() + spec.y_index(), 1);
    }

    #[test]
    fn test_bad_x_index() {
        assert!(base().x_index(2).build().is_err());
    }
}
