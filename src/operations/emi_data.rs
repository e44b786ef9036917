use crate::context::ProcessContext;
use crate::dimension::AliasSet;
use crate::engine::{OperatorOptions, RegridEngine, RegridMethod, UnmappedAction, ZeroRegion};
use crate::error::RegridResult;
use crate::grid_spec::GridSpec;
use crate::spec::GenerateWeightFileAndRegridFields;

use super::pipeline::FieldPipeline;
use super::RegridOperation;

pub const EMI_FIELDS: &[&str] = &["e_bc", "e_oc", "e_pm25"];

/// Regrids emissions that are already on an RRFS-convention grid.
///
/// Weights are never written to disk for this operation.
pub struct EmiData<'a, C, E> {
    spec: GenerateWeightFileAndRegridFields,
    ctx: &'a C,
    engine: &'a E,
}

impl<'a, C: ProcessContext, E: RegridEngine> EmiData<'a, C, E> {
    pub fn new(spec: GenerateWeightFileAndRegridFields, ctx: &'a C, engine: &'a E) -> Self {
        Self { spec, ctx, engine }
    }
}

fn rrfs_center_spec() -> RegridResult<GridSpec> {
    GridSpec::builder("grid_lont", "grid_latt", AliasSet::from("grid_xt"), AliasSet::from("grid_yt")).build()
}

impl<'a, C: ProcessContext, E: RegridEngine> RegridOperation for EmiData<'a, C, E> {
    fn name(&self) -> &str {
        self.spec.name()
    }

    fn run(&self) -> RegridResult<()> {
        FieldPipeline {
            src_grid: rrfs_center_spec()?,
            dst_grid: rrfs_center_spec()?,
            dim_time: Some(AliasSet::from("time")),
            options: OperatorOptions::new(RegridMethod::Bilinear, UnmappedAction::Ignore),
            zero_region: ZeroRegion::Total,
            copy_values_for: &[],
        }
        .run(self.ctx, self.engine, &self.spec, |_| Ok(()))
    }
}
