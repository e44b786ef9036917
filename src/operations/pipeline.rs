//! The pipeline shared by operations that regrid fields into a new file
//! shaped like the source file but sized like the destination grid.
use error_stack::ResultExt;
use indexmap::IndexMap;

use crate::context::ProcessContext;
use crate::dimension::{AliasSet, StaggerLocation};
use crate::engine::{OperatorOptions, RegridEngine, WeightOperator, ZeroRegion};
use crate::error::{RegridError, RegridResult};
use crate::field::FieldWrapper;
use crate::grid::GridWrapper;
use crate::grid_spec::GridSpec;
use crate::resize::resize_nc;
use crate::spec::GenerateWeightFileAndRegridFields;

pub(crate) struct FieldPipeline<'p> {
    pub(crate) src_grid: GridSpec,
    pub(crate) dst_grid: GridSpec,
    pub(crate) dim_time: Option<AliasSet>,
    pub(crate) options: OperatorOptions,
    pub(crate) zero_region: ZeroRegion,
    /// Variables whose values are copied verbatim into the output.
    pub(crate) copy_values_for: &'p [&'p str],
}

impl<'p> FieldPipeline<'p> {
    /// Persist the operator to the spec's weight file when built.
    pub(crate) fn persist_weights(mut self, spec: &GenerateWeightFileAndRegridFields) -> Self {
        self.options = self.options.weight_file(&spec.weights.output_weight_filename);
        self
    }

    pub(crate) fn run<C, E, F>(
        &self,
        ctx: &C,
        engine: &E,
        spec: &GenerateWeightFileAndRegridFields,
        mut post_process: F,
    ) -> RegridResult<()>
    where
        C: ProcessContext,
        E: RegridEngine,
        F: FnMut(&mut FieldWrapper) -> RegridResult<()>,
    {
        let src_path = &spec.weights.src_path;
        let output = &spec.output_filename;
        let dim_time = self.dim_time.as_ref();

        let src_gwrap = GridWrapper::from_dataset(ctx, src_path, self.src_grid.clone())?;
        let dst_gwrap = GridWrapper::from_dataset(ctx, &spec.weights.dst_path, self.dst_grid.clone())?;

        let archetype = spec
            .fields
            .first()
            .ok_or_else(|| RegridError::configuration("no fields to regrid"))?;
        let src_fwrap = FieldWrapper::from_dataset(ctx, src_path, archetype, &src_gwrap, dim_time, StaggerLocation::Center)?;

        let mut new_sizes = IndexMap::new();
        if let Some(names) = dim_time {
            let size = src_fwrap.dims().get(names)?.size();
            for name in names.iter() {
                new_sizes.insert(name.to_string(), size);
            }
        }
        for (src_names, dst_names) in [
            (src_gwrap.spec().x_dim(), dst_gwrap.spec().x_dim()),
            (src_gwrap.spec().y_dim(), dst_gwrap.spec().y_dim()),
        ] {
            let size = dst_gwrap.dims().get(dst_names)?.size();
            for name in src_names.iter() {
                new_sizes.insert(name.to_string(), size);
            }
        }
        log::info!("resizing netcdf. new_sizes={new_sizes:?}");
        resize_nc(ctx, src_path, output, &new_sizes, self.copy_values_for)?;

        // Destination coordinates under the source file's names
        let dst_output = dst_gwrap.rebind(src_gwrap.spec().clone(), dst_gwrap.dims().renamed_from(src_gwrap.dims())?);
        dst_output.fill_nc_variables(ctx, output)?;

        log::info!("starting weight generation");
        let operator = engine
            .build_operator(ctx, &src_gwrap, &dst_output, &self.options)
            .change_context(RegridError::Engine)
            .attach_printable_lazy(|| format!("building weights for {}", spec.name()))?;

        for name in spec.fields.iter() {
            log::info!("regridding field: {name}");
            let src_field = FieldWrapper::from_dataset(ctx, src_path, name, &src_gwrap, dim_time, StaggerLocation::Center)?;
            let mut dst_field =
                FieldWrapper::from_dataset(ctx, output, name, &dst_output, dim_time, StaggerLocation::Center)?;
            operator
                .apply(ctx, &src_field, &mut dst_field, self.zero_region)
                .change_context(RegridError::Engine)
                .attach_printable_lazy(|| format!("regridding field '{name}'"))?;
            post_process(&mut dst_field)?;
            dst_field.fill_nc_variable(ctx, output)?;
        }
        Ok(())
    }
}
