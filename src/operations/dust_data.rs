use crate::context::ProcessContext;
use crate::dimension::AliasSet;
use crate::engine::{OperatorOptions, RegridEngine, RegridMethod, UnmappedAction, ZeroRegion};
use crate::error::{RegridError, RegridResult};
use crate::field::FieldWrapper;
use crate::grid_spec::GridSpec;
use crate::nc_utils::is_missing;
use crate::spec::GenerateWeightFileAndRegridFields;

use super::pipeline::FieldPipeline;
use super::RegridOperation;

pub const DUST_FIELDS: &[&str] = &["uthr", "sand", "clay", "rdrag", "ssm"];
const DIM_TIME: &str = "time";

/// Regrids the monthly dust climatology onto an RRFS grid.
pub struct RrfsDustData<'a, C, E> {
    spec: GenerateWeightFileAndRegridFields,
    ctx: &'a C,
    engine: &'a E,
}

impl<'a, C: ProcessContext, E: RegridEngine> RrfsDustData<'a, C, E> {
    pub fn new(spec: GenerateWeightFileAndRegridFields, ctx: &'a C, engine: &'a E) -> Self {
        Self { spec, ctx, engine }
    }

    fn pipeline(&self) -> RegridResult<FieldPipeline<'static>> {
        let src_grid = GridSpec::builder("geolon", "geolat", AliasSet::from("lon"), AliasSet::from("lat")).build()?;
        let dst_grid =
            GridSpec::builder("grid_lont", "grid_latt", AliasSet::from("grid_xt"), AliasSet::from("grid_yt")).build()?;
        let pipeline = FieldPipeline {
            src_grid,
            dst_grid,
            dim_time: Some(AliasSet::from(DIM_TIME)),
            options: OperatorOptions::new(RegridMethod::Bilinear, UnmappedAction::Error),
            zero_region: ZeroRegion::Select,
            copy_values_for: &[DIM_TIME],
        };
        Ok(pipeline.persist_weights(&self.spec))
    }
}

impl<'a, C: ProcessContext, E: RegridEngine> RegridOperation for RrfsDustData<'a, C, E> {
    fn name(&self) -> &str {
        self.spec.name()
    }

    fn run(&self) -> RegridResult<()> {
        self.pipeline()?.run(self.ctx, self.engine, &self.spec, update_dust_mask)
    }
}

/// Overwrite missing values of a regridded dust field with its sentinel.
///
/// `uthr` gets 999, `rdrag` and `ssm` get -1, `sand` and `clay` are left as
/// they are. Any other field is an error.
pub fn update_dust_mask(field: &mut FieldWrapper) -> RegridResult<()> {
    let sentinel = match field.name() {
        "uthr" => Some(999.0),
        "rdrag" | "ssm" => Some(-1.0),
        "sand" | "clay" => None,
        other => return Err(RegridError::UnsupportedField(other.to_string()).into()),
    };

    if let Some(sentinel) = sentinel {
        let mut n = 0;
        field.data_mut().mapv_inplace(|v| {
            if is_missing(v) {
                n += 1;
                sentinel
            } else {
                v
            }
        });
        log::debug!("masked {n} cells of '{}' with {sentinel}", field.name());
    }
    Ok(())
}
