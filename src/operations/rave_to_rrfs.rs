use std::path::Path;

use error_stack::ResultExt;

use crate::context::ProcessContext;
use crate::dimension::AliasSet;
use crate::engine::{OperatorOptions, RegridEngine, RegridMethod, UnmappedAction};
use crate::error::{RegridError, RegridResult};
use crate::grid::GridWrapper;
use crate::grid_spec::GridSpec;
use crate::spec::GenerateWeightFileSpec;

use super::RegridOperation;

/// Generates conservative weights from the RAVE fire grid to an RRFS grid.
pub struct RaveToRrfs<'a, C, E> {
    spec: GenerateWeightFileSpec,
    ctx: &'a C,
    engine: &'a E,
}

impl<'a, C: ProcessContext, E: RegridEngine> RaveToRrfs<'a, C, E> {
    pub fn new(spec: GenerateWeightFileSpec, ctx: &'a C, engine: &'a E) -> Self {
        Self { spec, ctx, engine }
    }

    fn grid_wrapper(&self, path: &Path) -> RegridResult<GridWrapper> {
        let spec = GridSpec::builder("grid_lont", "grid_latt", AliasSet::from("grid_xt"), AliasSet::from("grid_yt"))
            .x_corner("grid_lon")
            .y_corner("grid_lat")
            .x_corner_dim(AliasSet::from("grid_x"))
            .y_corner_dim(AliasSet::from("grid_y"))
            .build()?;
        GridWrapper::from_dataset(self.ctx, path, spec)
    }
}

impl<'a, C: ProcessContext, E: RegridEngine> RegridOperation for RaveToRrfs<'a, C, E> {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn initialize(&self) -> RegridResult<()> {
        log::info!(
            "initializing {} (nproc={}, engine_debug={})",
            self.spec.name,
            self.spec.nproc,
            self.spec.engine_debug
        );
        Ok(())
    }

    fn run(&self) -> RegridResult<()> {
        let src = self.grid_wrapper(&self.spec.src_path)?;
        let dst = self.grid_wrapper(&self.spec.dst_path)?;
        let weight_file = &self.spec.output_weight_filename;

        log::info!("starting weight file generation");
        let options = OperatorOptions::new(RegridMethod::Conserve, UnmappedAction::Ignore)
            .ignore_degenerate(true)
            .weight_file(weight_file);
        self.engine
            .build_operator(self.ctx, &src, &dst, &options)
            .change_context(RegridError::Engine)?;

        // The persisted weights must be usable on their own
        self.engine
            .read_operator(self.ctx, weight_file, &src, &dst)
            .change_context(RegridError::Engine)
            .attach_printable_lazy(|| format!("re-reading {}", weight_file.display()))?;
        Ok(())
    }
}
