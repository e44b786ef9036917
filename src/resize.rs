//! Pre-allocating output files shaped like a source file but with new dimension sizes.
use std::path::Path;

use error_stack::ResultExt;
use indexmap::IndexMap;
use netcdf::Extents;

use crate::context::ProcessContext;
use crate::error::{RegridError, RegridResult};
use crate::nc_utils::{create_collective, NcArray};

/// Create `dst` with the global attributes, dimensions and variables of `src`.
///
/// Each dimension gets the size `new_sizes` gives for its name, or keeps its
/// source size if it is not listed. Variables keep their type, dimensions and
/// attributes (fill value included), but only those named in `copy_values_for`
/// get their values copied; the rest are left for the caller to fill.
///
/// `dst` must not exist. If it does, every rank fails and nothing is touched.
pub fn resize_nc<C: ProcessContext>(
    ctx: &C,
    src: &Path,
    dst: &Path,
    new_sizes: &IndexMap<String, usize>,
    copy_values_for: &[&str],
) -> RegridResult<()> {
    log::info!(
        "resizing {} into {} with new sizes {new_sizes:?}",
        src.display(),
        dst.display()
    );

    create_collective(ctx, dst, |out| {
        let input = netcdf::open(src)
            .change_context_lazy(|| RegridError::context(format!("opening {} for reading", src.display())))?;

        for att in input.attributes() {
            let name = att.name();
            let value = att
                .value()
                .change_context_lazy(|| RegridError::context(format!("reading global attribute '{name}'")))?;
            out.add_attribute(name, value)
                .change_context_lazy(|| RegridError::context(format!("writing global attribute '{name}'")))?;
        }

        for dim in input.dimensions() {
            let name = dim.name();
            let size = match new_sizes.get(&name) {
                Some(&size) => size,
                None => {
                    log::warn!("dimension '{name}' has no new size and keeps its source size {}", dim.len());
                    dim.len()
                }
            };
            out.add_dimension(&name, size)
                .change_context_lazy(|| RegridError::context(format!("creating dimension '{name}'")))?;
        }

        for var in input.variables() {
            let name = var.name();
            let dim_names: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
            let dim_refs: Vec<&str> = dim_names.iter().map(|d| d.as_str()).collect();
            let mut new_var = out
                .add_variable_with_type(&name, &dim_refs, &var.vartype())
                .change_context_lazy(|| RegridError::context(format!("creating variable '{name}'")))?;

            for att in var.attributes() {
                let att_name = att.name();
                let value = att.value().change_context_lazy(|| {
                    RegridError::context(format!("reading attribute '{att_name}' of variable '{name}'"))
                })?;
                new_var.put_attribute(att_name, value).change_context_lazy(|| {
                    RegridError::context(format!("writing attribute '{att_name}' of variable '{name}'"))
                })?;
            }

            if copy_values_for.contains(&name.as_str()) {
                log::debug!("copying values of '{name}'");
                NcArray::get_from(&var, Extents::All)?.put_into(&mut new_var, Extents::All)?;
            }
        }
        Ok(())
    })
    .attach_printable_lazy(|| format!("resizing {} into {}", src.display(), dst.display()))
}
