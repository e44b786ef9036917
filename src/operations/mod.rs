//! Regrid operations and the registry mapping configured components onto them.
use std::path::PathBuf;

use crate::config::{ComponentKey, RrfsGridKey, SmokeDustRegridConfig};
use crate::context::ProcessContext;
use crate::engine::RegridEngine;
use crate::error::RegridResult;
use crate::spec::{GenerateWeightFileAndRegridFields, GenerateWeightFileSpec};

mod dust_data;
mod emi_data;
mod pipeline;
mod rave_to_rrfs;
mod veg_map;

pub use dust_data::{update_dust_mask, RrfsDustData, DUST_FIELDS};
pub use emi_data::{EmiData, EMI_FIELDS};
pub use rave_to_rrfs::RaveToRrfs;
pub use veg_map::{RrfsSmokeDustVegetationMap, VEG_MAP_FIELDS};

/// One unit of regridding work.
pub trait RegridOperation {
    fn name(&self) -> &str;

    fn initialize(&self) -> RegridResult<()> {
        log::info!("initializing {}", self.name());
        Ok(())
    }

    fn run(&self) -> RegridResult<()>;

    fn finalize(&self) -> RegridResult<()> {
        log::info!("finalizing {}", self.name());
        Ok(())
    }
}

/// Drives an operation through its life cycle.
pub struct RegridProcessor<'o> {
    operation: &'o dyn RegridOperation,
}

impl<'o> RegridProcessor<'o> {
    pub fn new(operation: &'o dyn RegridOperation) -> Self {
        Self { operation }
    }

    pub fn execute(&self) -> RegridResult<()> {
        let name = self.operation.name();
        log::info!("start {name}");
        self.operation.initialize()?;
        self.operation.run()?;
        self.operation.finalize()?;
        log::info!("end {name}");
        Ok(())
    }
}

fn build_operation<'a, C, E>(
    cfg: &SmokeDustRegridConfig,
    grid: RrfsGridKey,
    component: ComponentKey,
    ctx: &'a C,
    engine: &'a E,
) -> RegridResult<Box<dyn RegridOperation + 'a>>
where
    C: ProcessContext + 'a,
    E: RegridEngine + 'a,
{
    let name = format!("{grid}-{component}");
    log::debug!("creating operation: {name}");
    let output_directory = cfg.output_directory(grid);
    let model_grid_path = cfg.model_grid_path(grid);
    let src_path = cfg.component_grid(component)?.to_path_buf();
    let fields = |names: &[&str]| -> Vec<String> { names.iter().map(|s| s.to_string()).collect() };
    let in_output = |file: String| -> PathBuf { output_directory.join(file) };

    let op: Box<dyn RegridOperation + 'a> = match component {
        ComponentKey::VegMap => {
            let spec = GenerateWeightFileAndRegridFields::new(
                name,
                src_path,
                model_grid_path,
                in_output(format!("weights-veg_map-NA_3km-to-{grid}.nc")),
                in_output("veg_map.nc".to_string()),
                fields(VEG_MAP_FIELDS),
            )?;
            Box::new(RrfsSmokeDustVegetationMap::new(spec, ctx, engine))
        }
        ComponentKey::RaveGrid => {
            let spec =
                GenerateWeightFileSpec::new(name, src_path, model_grid_path, in_output("weight_file.nc".to_string()))?;
            Box::new(RaveToRrfs::new(spec, ctx, engine))
        }
        ComponentKey::Dust => {
            let spec = GenerateWeightFileAndRegridFields::new(
                name,
                src_path,
                model_grid_path,
                in_output(format!("weights-dust_data-to-{grid}.nc")),
                in_output("dust12m_data.nc".to_string()),
                fields(DUST_FIELDS),
            )?;
            Box::new(RrfsDustData::new(spec, ctx, engine))
        }
        ComponentKey::Emi => {
            let spec = GenerateWeightFileAndRegridFields::new(
                "emi-data",
                src_path,
                model_grid_path,
                in_output(format!("weights-dust_data-to-{grid}.nc")),
                in_output("emi_data.nc".to_string()),
                fields(EMI_FIELDS),
            )?;
            Box::new(EmiData::new(spec, ctx, engine))
        }
    };
    Ok(op)
}

/// One operation per configured (grid, component) pair, grids outermost.
///
/// Operations are built lazily, so input checks for later operations run
/// only after the earlier ones have been yielded.
pub fn iter_operations<'a, C, E>(
    cfg: &'a SmokeDustRegridConfig,
    ctx: &'a C,
    engine: &'a E,
) -> impl Iterator<Item = RegridResult<Box<dyn RegridOperation + 'a>>> + 'a
where
    C: ProcessContext + 'a,
    E: RegridEngine + 'a,
{
    cfg.target_grids.iter().flat_map(move |&grid| {
        cfg.target_components
            .iter()
            .map(move |&component| build_operation(cfg, grid, component, ctx, engine))
    })
}
