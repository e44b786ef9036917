//! Summaries of netCDF variables for checking regridded output by eye.
use std::borrow::Cow;
use std::path::{Path, PathBuf};

use error_stack::ResultExt;
use netcdf::Extents;
use serde::Serialize;

use crate::error::{RegridError, RegridResult};
use crate::nc_utils::{is_missing, NcArray};

#[derive(Debug, Clone)]
pub struct DescribeParams {
    /// Free-form label copied into every row, e.g. the run that made the files.
    pub namespace: String,
    pub files: Vec<PathBuf>,
    pub varnames: Vec<String>,
    pub csv_out: PathBuf,
}

/// Statistics of the valid values of one variable in one file.
///
/// Every statistic is NaN when the variable has no valid values.
#[derive(Debug, Clone, Serialize)]
pub struct VariableSummary {
    pub file: PathBuf,
    pub namespace: String,
    pub varname: String,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    #[serde(rename = "25%")]
    pub q25: f64,
    #[serde(rename = "50%")]
    pub q50: f64,
    #[serde(rename = "75%")]
    pub q75: f64,
    pub sum: f64,
    pub n: usize,
    pub n_null: usize,
}

/// Quantile of sorted values with linear interpolation between neighbors.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

impl VariableSummary {
    pub fn from_values<I: IntoIterator<Item = f64>>(file: &Path, namespace: &str, varname: &str, values: I) -> Self {
        let mut n_null = 0;
        let mut valid: Vec<f64> = values
            .into_iter()
            .filter(|&v| {
                let missing = is_missing(v);
                n_null += missing as usize;
                !missing
            })
            .collect();
        valid.sort_by(f64::total_cmp);

        let n = valid.len();
        let sum: f64 = valid.iter().sum();
        let (mean, std) = if n == 0 {
            (f64::NAN, f64::NAN)
        } else {
            let mean = sum / n as f64;
            let var = valid.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
            (mean, var.sqrt())
        };

        Self {
            file: file.to_path_buf(),
            namespace: namespace.to_string(),
            varname: varname.to_string(),
            median: quantile(&valid, 0.5),
            min: valid.first().copied().unwrap_or(f64::NAN),
            max: valid.last().copied().unwrap_or(f64::NAN),
            mean,
            std,
            q25: quantile(&valid, 0.25),
            q50: quantile(&valid, 0.5),
            q75: quantile(&valid, 0.75),
            sum: if n == 0 { f64::NAN } else { sum },
            n,
            n_null,
        }
    }
}

impl tabled::Tabled for VariableSummary {
    const LENGTH: usize = 14;

    fn fields(&self) -> Vec<Cow<'_, str>> {
        vec![
            self.file.display().to_string().into(),
            self.namespace.as_str().into(),
            self.varname.as_str().into(),
            format!("{:.4}", self.median).into(),
            format!("{:.4}", self.min).into(),
            format!("{:.4}", self.max).into(),
            format!("{:.4}", self.mean).into(),
            format!("{:.4}", self.std).into(),
            format!("{:.4}", self.q25).into(),
            format!("{:.4}", self.q50).into(),
            format!("{:.4}", self.q75).into(),
            format!("{:.4}", self.sum).into(),
            format!("{}", self.n).into(),
            format!("{}", self.n_null).into(),
        ]
    }

    fn headers() -> Vec<Cow<'static, str>> {
        vec![
            "file".into(),
            "namespace".into(),
            "varname".into(),
            "median".into(),
            "min".into(),
            "max".into(),
            "mean".into(),
            "std".into(),
            "25%".into(),
            "50%".into(),
            "75%".into(),
            "sum".into(),
            "n".into(),
            "n_null".into(),
        ]
    }
}

/// Summarize every requested variable of every file and write the rows to
/// `params.csv_out`.
pub fn describe(params: &DescribeParams) -> RegridResult<Vec<VariableSummary>> {
    let mut summary = vec![];
    for (idx, file) in params.files.iter().enumerate() {
        log::info!("{} of {}: {}", idx + 1, params.files.len(), file.display());
        let ds = netcdf::open(file)
            .change_context_lazy(|| RegridError::context(format!("opening {}", file.display())))?;
        for varname in params.varnames.iter() {
            let var = ds
                .variable(varname)
                .ok_or_else(|| RegridError::variable_not_found(varname, file))?;
            let values = NcArray::get_from(&var, Extents::All)?.into_f64();
            summary.push(VariableSummary::from_values(file, &params.namespace, varname, values.iter().copied()));
        }
    }

    let mut writer = csv::Writer::from_path(&params.csv_out)
        .change_context_lazy(|| RegridError::context(format!("creating {}", params.csv_out.display())))?;
    for row in summary.iter() {
        writer
            .serialize(row)
            .change_context_lazy(|| RegridError::context(format!("writing {}", params.csv_out.display())))?;
    }
    writer
        .flush()
        .change_context_lazy(|| RegridError::context(format!("writing {}", params.csv_out.display())))?;
    Ok(summary)
}

pub fn summary_table(rows: &[VariableSummary]) -> tabled::Table {
    let mut table = tabled::Table::new(rows);
    table
        .with(tabled::settings::style::Style::blank())
        .with(tabled::settings::Alignment::left());
    table
}

/// Extent of a grid's valid coordinates in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridBoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl GridBoundingBox {
    pub fn from_dataset(path: &Path, lon: &str, lat: &str) -> RegridResult<Self> {
        let ds = netcdf::open(path)
            .change_context_lazy(|| RegridError::context(format!("opening {}", path.display())))?;
        let read = |name: &str| -> RegridResult<(f64, f64)> {
            let var = ds
                .variable(name)
                .ok_or_else(|| RegridError::variable_not_found(name, path))?;
            let values = NcArray::get_from(&var, Extents::All)?.into_f64();
            let (min, max) = values
                .iter()
                .filter(|v| !is_missing(**v))
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
            if min > max {
                return Err(RegridError::context(format!("'{name}' in {} has no valid values", path.display())).into());
            }
            Ok((min, max))
        };
        let (min_lon, max_lon) = read(lon)?;
        let (min_lat, max_lat) = read(lat)?;
        Ok(Self {
            min_lon,
            max_lon,
            min_lat,
            max_lat,
        })
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn lower_left(&self) -> (f64, f64) {
        (self.min_lon, self.min_lat)
    }

    /// `(min_lon, max_lon, min_lat, max_lat)` grown by `padding` on every side.
    pub fn padded_extent(&self, padding: f64) -> (f64, f64, f64, f64) {
        (
            self.min_lon - padding,
            self.max_lon + padding,
            self.min_lat - padding,
            self.max_lat + padding,
        )
    }
}
