//! Inputs and outputs of one regrid operation, validated up front.
use std::path::{Path, PathBuf};

use crate::error::{RegridError, RegridResult};

/// Collects every problem with a set of paths so they can be reported together.
#[derive(Debug, Default)]
struct PathChecks {
    problems: Vec<String>,
}

impl PathChecks {
    fn input(&mut self, label: &str, path: &Path) {
        if !path.exists() {
            self.problems.push(format!("{label} {} does not exist", path.display()));
        } else if !path.is_file() {
            self.problems.push(format!("{label} {} is not a regular file", path.display()));
        } else if let Err(e) = std::fs::File::open(path) {
            self.problems.push(format!("{label} {} is not readable: {e}", path.display()));
        }
    }

    fn output(&mut self, label: &str, path: &Path) {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        match std::fs::metadata(parent) {
            Err(_) => self.problems.push(format!(
                "parent directory {} of {label} does not exist",
                parent.display()
            )),
            Ok(meta) if !meta.is_dir() => self.problems.push(format!(
                "parent {} of {label} is not a directory",
                parent.display()
            )),
            Ok(_) => {
                // Writable for the effective user, not just by mode bits
                if let Err(e) = tempfile::NamedTempFile::new_in(parent) {
                    self.problems.push(format!(
                        "parent directory {} of {label} is not writable: {e}",
                        parent.display()
                    ));
                }
            }
        }
    }

    fn finish(self) -> RegridResult<()> {
        if self.problems.is_empty() {
            Ok(())
        } else {
            Err(RegridError::InputValidation(self.problems).into())
        }
    }
}

/// Generate a weight file from a source grid to a destination grid.
#[derive(Debug, Clone)]
pub struct GenerateWeightFileSpec {
    pub name: String,
    pub src_path: PathBuf,
    pub dst_path: PathBuf,
    pub output_weight_filename: PathBuf,
    pub nproc: usize,
    pub engine_debug: bool,
}

impl GenerateWeightFileSpec {
    pub const DEFAULT_NPROC: usize = 4;

    pub fn new<S: ToString>(
        name: S,
        src_path: PathBuf,
        dst_path: PathBuf,
        output_weight_filename: PathBuf,
    ) -> RegridResult<Self> {
        let spec = Self {
            name: name.to_string(),
            src_path,
            dst_path,
            output_weight_filename,
            nproc: Self::DEFAULT_NPROC,
            engine_debug: false,
        };
        let mut checks = PathChecks::default();
        spec.check(&mut checks);
        checks.finish()?;
        Ok(spec)
    }

    pub fn with_nproc(mut self, nproc: usize) -> Self {
        self.nproc = nproc;
        self
    }

    pub fn with_engine_debug(mut self, debug: bool) -> Self {
        self.engine_debug = debug;
        self
    }

    fn check(&self, checks: &mut PathChecks) {
        checks.input("source", &self.src_path);
        checks.input("destination", &self.dst_path);
        checks.output("output weight file", &self.output_weight_filename);
    }

    /// `true` once the weight file has been written.
    pub fn is_complete(&self) -> bool {
        self.output_weight_filename.exists()
    }
}

/// Generate a weight file and use it to regrid fields into a new file.
#[derive(Debug, Clone)]
pub struct GenerateWeightFileAndRegridFields {
    pub weights: GenerateWeightFileSpec,
    pub output_filename: PathBuf,
    pub fields: Vec<String>,
}

impl GenerateWeightFileAndRegridFields {
    pub fn new<S: ToString>(
        name: S,
        src_path: PathBuf,
        dst_path: PathBuf,
        output_weight_filename: PathBuf,
        output_filename: PathBuf,
        fields: Vec<String>,
    ) -> RegridResult<Self> {
        let spec = Self {
            weights: GenerateWeightFileSpec {
                name: name.to_string(),
                src_path,
                dst_path,
                output_weight_filename,
                nproc: GenerateWeightFileSpec::DEFAULT_NPROC,
                engine_debug: false,
            },
            output_filename,
            fields,
        };

        let mut checks = PathChecks::default();
        spec.weights.check(&mut checks);
        checks.output("output file", &spec.output_filename);
        if spec.fields.is_empty() {
            checks.problems.push("at least one field must be given".to_string());
        }
        checks.finish()?;
        Ok(spec)
    }

    pub fn name(&self) -> &str {
        &self.weights.name
    }

    pub fn is_complete(&self) -> bool {
        self.weights.is_complete()
    }
}
