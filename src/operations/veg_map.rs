use crate::context::ProcessContext;
use crate::dimension::AliasSet;
use crate::engine::{OperatorOptions, RegridEngine, RegridMethod, UnmappedAction, ZeroRegion};
use crate::error::RegridResult;
use crate::grid_spec::GridSpec;
use crate::spec::GenerateWeightFileAndRegridFields;

use super::pipeline::FieldPipeline;
use super::RegridOperation;

pub const VEG_MAP_FIELDS: &[&str] = &["emiss_factor"];

/// Regrids the smoke/dust vegetation map onto an RRFS grid.
pub struct RrfsSmokeDustVegetationMap<'a, C, E> {
    spec: GenerateWeightFileAndRegridFields,
    ctx: &'a C,
    engine: &'a E,
}

impl<'a, C: ProcessContext, E: RegridEngine> RrfsSmokeDustVegetationMap<'a, C, E> {
    pub fn new(spec: GenerateWeightFileAndRegridFields, ctx: &'a C, engine: &'a E) -> Self {
        Self { spec, ctx, engine }
    }
}

impl<'a, C: ProcessContext, E: RegridEngine> RegridOperation for RrfsSmokeDustVegetationMap<'a, C, E> {
    fn name(&self) -> &str {
        self.spec.name()
    }

    fn run(&self) -> RegridResult<()> {
        // Source files name their axes either after the coordinates or lon/lat
        let src_grid = GridSpec::builder(
            "geolon",
            "geolat",
            AliasSet::new(["geolon", "lon"])?,
            AliasSet::new(["geolat", "lat"])?,
        )
        .build()?;
        let dst_grid =
            GridSpec::builder("grid_lont", "grid_latt", AliasSet::from("grid_xt"), AliasSet::from("grid_yt")).build()?;

        FieldPipeline {
            src_grid,
            dst_grid,
            dim_time: None,
            options: OperatorOptions::new(RegridMethod::Bilinear, UnmappedAction::Error),
            zero_region: ZeroRegion::Select,
            copy_values_for: &[],
        }
        .persist_weights(&self.spec)
        .run(self.ctx, self.engine, &self.spec, |_| Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use netcdf::Extents;

    use super::*;
    use crate::context::SerialContext;
    use crate::error::RegridError;
    use crate::local_engine::LocalEngine;
    use crate::operations::RegridProcessor;
    use crate::test_utils::{create_analytic_grid_file, create_grid_file, create_veg_map_file, make_temp_dir};

    fn veg_spec(tmp: &std::path::Path, dst: std::path::PathBuf) -> GenerateWeightFileAndRegridFields {
        let src = tmp.join("veg_map.nc");
        create_veg_map_file(&src);
        GenerateWeightFileAndRegridFields::new(
            "veg",
            src,
            dst,
            tmp.join("weights.nc"),
            tmp.join("veg_out.nc"),
            vec!["emiss_factor".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_veg_map() {
        let tmp = make_temp_dir();
        let dst = tmp.path().join("grid.nc");
        create_analytic_grid_file(&dst, false);
        let spec = veg_spec(tmp.path(), dst);
        let op = RrfsSmokeDustVegetationMap::new(spec.clone(), &SerialContext, &LocalEngine);
        RegridProcessor::new(&op).execute().unwrap();
        assert!(spec.is_complete());

        let out = netcdf::open(&spec.output_filename).unwrap();
        let lat = out.variable("geolat").unwrap().get_values::<f64, _>(Extents::All).unwrap();
        let emiss = out.variable("emiss_factor").unwrap().get_values::<f64, _>(Extents::All).unwrap();
        assert_eq!(emiss.len(), 71 * 26);
        // The source field is latitude / 100 on a 5 degree grid
        for (e, l) in emiss.iter().zip(lat.iter()) {
            assert_abs_diff_eq!(*e, l / 100.0, epsilon = 0.026);
        }
    }

    #[test]
    fn test_veg_map_unmapped_is_an_error() {
        let tmp = make_temp_dir();
        let dst = tmp.path().join("grid.nc");
        // Reaches north of the 55 degree edge of the vegetation map
        create_grid_file(&dst, (230.0, 240.0, 3), (50.0, 70.0, 3), false);
        let spec = veg_spec(tmp.path(), dst);
        let op = RrfsSmokeDustVegetationMap::new(spec.clone(), &SerialContext, &LocalEngine);
        let err = RegridProcessor::new(&op).execute().unwrap_err();
        assert!(matches!(err.current_context(), RegridError::Engine));
        assert!(!spec.is_complete());
    }
}
