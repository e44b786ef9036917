//! Common errors across the regrid-rs crate
use std::path::{Path, PathBuf};

/// Convenience alias for the `error_stack` results returned throughout the crate.
pub type RegridResult<T> = error_stack::Result<T, RegridError>;

/// Errors raised while building grids and fields, resizing files, or running
/// a regrid operation. None of these are retried: the same inputs always fail
/// the same way.
#[derive(Debug, thiserror::Error)]
pub enum RegridError {
    /// A malformed declaration, e.g. a grid specification with only some of the
    /// corner fields set.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Problems with input or output paths, collected before any work begins.
    #[error("Input validation failed:\n  - {}", .0.join("\n  - "))]
    InputValidation(Vec<String>),

    /// None of the given names match a known dimension.
    #[error("Dimension not found for any of the names {0:?}")]
    DimensionNotFound(Vec<String>),

    /// A variable named in a grid specification or operation is absent from a dataset.
    #[error("Variable '{varname}' not found in {}", .path.display())]
    VariableNotFound { varname: String, path: PathBuf },

    /// The on-disk variable has a different number of dimensions than the target.
    #[error("Variable '{varname}' has {actual} dimensions, but the target has {expected}")]
    RankMismatch {
        varname: String,
        expected: usize,
        actual: usize,
    },

    /// A destination file that must be created already exists.
    #[error("Output file already exists: {}", .0.display())]
    OutputExists(PathBuf),

    /// Corner coordinates are read-only, they cannot be written back to a file.
    #[error("Writing corner coordinates back to a file is not supported")]
    CornerWriteBack,

    /// A field name without a defined behavior was requested.
    #[error("Unsupported field '{0}'")]
    UnsupportedField(String),

    /// The regridding engine failed, the engine's own error is the next frame
    /// down in the report.
    #[error("The regridding engine failed")]
    Engine,

    /// Wrapper used to add information to an inner error.
    #[error("{0}")]
    Context(String),
}

impl RegridError {
    pub fn configuration<S: ToString>(msg: S) -> Self {
        Self::Configuration(msg.to_string())
    }

    pub fn dimension_not_found<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Self::DimensionNotFound(names.into_iter().map(|n| n.to_string()).collect())
    }

    pub fn variable_not_found<S: ToString>(varname: S, path: &Path) -> Self {
        Self::VariableNotFound {
            varname: varname.to_string(),
            path: path.to_path_buf(),
        }
    }

    pub fn rank_mismatch<S: ToString>(varname: S, expected: usize, actual: usize) -> Self {
        Self::RankMismatch {
            varname: varname.to_string(),
            expected,
            actual,
        }
    }

    pub fn context<S: ToString>(ctx: S) -> Self {
        Self::Context(ctx.to_string())
    }
}
