//! Run configuration for regridding the smoke/dust inputs onto RRFS grids.
//!
//! The configuration is a TOML file naming the output root, which model grids
//! and components to produce, and where the source data live:
//!
//! ```toml
//! root_output_directory = "/scratch/run01"
//! target_grids = ["RRFS_CONUS_25KM"]
//! target_components = ["VEG_MAP", "DUST"]
//!
//! [source_definition.components.VEG_MAP]
//! grid = "/data/veg_map.nc"
//!
//! [source_definition.components.DUST]
//! grid = "/data/dust12m_data.nc"
//!
//! [source_definition.rrfs_grids.RRFS_CONUS_25KM]
//! grid = "/data/ds_out_base_25km.nc"
//! nodes = 1
//! tasks_per_node = 24
//! wall_time = "00:30:00"
//! ```
//!
//! Every target grid and component must have an entry in `source_definition`.
use std::io::Read;
use std::path::{Path, PathBuf};

use error_stack::ResultExt;
use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::{RegridError, RegridResult};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, strum::Display, strum::EnumString, strum::EnumIter,
)]
pub enum RrfsGridKey {
    #[serde(rename = "RRFS_NA_13KM")]
    #[strum(serialize = "RRFS_NA_13KM")]
    RrfsNa13km,
    #[serde(rename = "RRFS_CONUS_13KM")]
    #[strum(serialize = "RRFS_CONUS_13KM")]
    RrfsConus13km,
    #[serde(rename = "RRFS_CONUS_25KM")]
    #[strum(serialize = "RRFS_CONUS_25KM")]
    RrfsConus25km,
    #[serde(rename = "RRFS_CONUS_3KM")]
    #[strum(serialize = "RRFS_CONUS_3KM")]
    RrfsConus3km,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentKey {
    VegMap,
    RaveGrid,
    Dust,
    Emi,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RrfsGrid {
    pub grid: PathBuf,
    pub nodes: usize,
    pub tasks_per_node: usize,
    pub wall_time: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Component {
    pub grid: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceDefinition {
    pub components: IndexMap<ComponentKey, Component>,
    pub rrfs_grids: IndexMap<RrfsGridKey, RrfsGrid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmokeDustRegridConfig {
    pub root_output_directory: PathBuf,
    pub target_grids: Vec<RrfsGridKey>,
    pub target_components: Vec<ComponentKey>,
    pub source_definition: SourceDefinition,
}

impl SmokeDustRegridConfig {
    pub fn from_toml_str(s: &str) -> RegridResult<Self> {
        let config: Self = toml::from_str(s)
            .change_context_lazy(|| RegridError::configuration("could not parse the run configuration"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(p: &Path) -> RegridResult<Self> {
        let mut f = std::fs::File::open(p)
            .change_context_lazy(|| RegridError::configuration(format!("error opening TOML file {}", p.display())))?;
        let mut buf = String::new();
        f.read_to_string(&mut buf)
            .change_context_lazy(|| RegridError::configuration(format!("error reading TOML file {}", p.display())))?;
        Self::from_toml_str(&buf).attach_printable_lazy(|| format!("in file {}", p.display()))
    }

    fn validate(&self) -> RegridResult<()> {
        let mut problems = vec![];
        if self.target_grids.is_empty() {
            problems.push("target_grids must not be empty".to_string());
        }
        if self.target_components.is_empty() {
            problems.push("target_components must not be empty".to_string());
        }
        for grid in self.target_grids.iter() {
            if !self.source_definition.rrfs_grids.contains_key(grid) {
                problems.push(format!("target grid {grid} has no entry in source_definition.rrfs_grids"));
            }
        }
        for component in self.target_components.iter() {
            if !self.source_definition.components.contains_key(component) {
                problems.push(format!("target component {component} has no entry in source_definition.components"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(RegridError::configuration(problems.join("; ")).into())
        }
    }

    pub fn log_directory(&self) -> PathBuf {
        self.root_output_directory.join("logs")
    }

    pub fn output_directory(&self, grid: RrfsGridKey) -> PathBuf {
        self.root_output_directory.join(grid.to_string())
    }

    pub fn model_grid_path(&self, grid: RrfsGridKey) -> PathBuf {
        self.output_directory(grid).join("ds_out_base.nc")
    }

    pub fn rave_grid_path(&self, grid: RrfsGridKey) -> PathBuf {
        self.output_directory(grid).join("grid_in.nc")
    }

    pub fn component_grid(&self, component: ComponentKey) -> RegridResult<&Path> {
        self.source_definition
            .components
            .get(&component)
            .map(|c| c.grid.as_path())
            .ok_or_else(|| RegridError::configuration(format!("no source defined for component {component}")).into())
    }
}

/// Create the run directory tree and copy the model grids (and the RAVE grid,
/// if one is defined) into it. The root must not exist yet.
pub fn prepare_run_directories(cfg: &SmokeDustRegridConfig) -> RegridResult<()> {
    let root = &cfg.root_output_directory;
    if root.exists() {
        return Err(RegridError::OutputExists(root.clone()).into());
    }

    log::info!("creating run directories under {}", root.display());
    let mkdir = |p: &Path| {
        std::fs::create_dir_all(p)
            .change_context_lazy(|| RegridError::context(format!("creating directory {}", p.display())))
    };
    let copy = |from: &Path, to: &Path| {
        std::fs::copy(from, to)
            .map(|_| ())
            .change_context_lazy(|| RegridError::context(format!("copying {} to {}", from.display(), to.display())))
    };

    mkdir(root)?;
    mkdir(&cfg.log_directory())?;
    for &grid in cfg.target_grids.iter() {
        mkdir(&cfg.output_directory(grid))?;
        let rrfs_grid = &cfg.source_definition.rrfs_grids[&grid];
        log::info!("copying {grid} model grid");
        copy(&rrfs_grid.grid, &cfg.model_grid_path(grid))?;
        if let Some(rave) = cfg.source_definition.components.get(&ComponentKey::RaveGrid) {
            log::info!("copying RAVE grid for {grid}");
            copy(&rave.grid, &cfg.rave_grid_path(grid))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::test_utils::make_temp_dir;

    const CONFIG: &str = r#"
root_output_directory = "/tmp/regrid-run"
target_grids = ["RRFS_CONUS_25KM"]
target_components = ["VEG_MAP", "DUST", "EMI"]

[source_definition.components.VEG_MAP]
grid = "/data/veg_map.nc"

[source_definition.components.DUST]
grid = "/data/dust12m_data.nc"

[source_definition.components.EMI]
grid = "/data/emi_data.nc"

[source_definition.rrfs_grids.RRFS_CONUS_25KM]
grid = "/data/ds_out_base.nc"
nodes = 1
tasks_per_node = 24
wall_time = "00:30:00"
"#;

    #[test]
    fn test_parse_config() {
        let cfg = SmokeDustRegridConfig::from_toml_str(CONFIG).unwrap();
        assert_eq!(cfg.target_grids, vec![RrfsGridKey::RrfsConus25km]);
        assert_eq!(cfg.target_components.len(), 3);
        assert_eq!(
            cfg.model_grid_path(RrfsGridKey::RrfsConus25km),
            PathBuf::from("/tmp/regrid-run/RRFS_CONUS_25KM/ds_out_base.nc")
        );
        assert_eq!(cfg.log_directory(), PathBuf::from("/tmp/regrid-run/logs"));
        assert_eq!(
            cfg.component_grid(ComponentKey::Dust).unwrap(),
            Path::new("/data/dust12m_data.nc")
        );
    }

    #[rstest]
    #[case("RRFS_NA_13KM", RrfsGridKey::RrfsNa13km)]
    #[case("RRFS_CONUS_3KM", RrfsGridKey::RrfsConus3km)]
    fn test_grid_key_strings(#[case] s: &str, #[case] key: RrfsGridKey) {
        assert_eq!(key.to_string(), s);
        assert_eq!(s.parse::<RrfsGridKey>().unwrap(), key);
    }

    #[test]
    fn test_component_key_strings() {
        assert_eq!(ComponentKey::RaveGrid.to_string(), "RAVE_GRID");
        assert_eq!("VEG_MAP".parse::<ComponentKey>().unwrap(), ComponentKey::VegMap);
    }

    #[test]
    fn test_missing_source_definition() {
        let bad = CONFIG.replace(
            r#"target_components = ["VEG_MAP", "DUST", "EMI"]"#,
            r#"target_components = ["RAVE_GRID"]"#,
        );
        let err = SmokeDustRegridConfig::from_toml_str(&bad).unwrap_err();
        match err.current_context() {
            RegridError::Configuration(msg) => assert!(msg.contains("RAVE_GRID"), "{msg}"),
            other => panic!("expected Configuration, got {other:?}"),
        }
    }

    #[test]
    fn test_prepare_run_directories() {
        let tmp = make_temp_dir();
        let grid = tmp.path().join("ds_out_base_25km.nc");
        let rave = tmp.path().join("rave.nc");
        std::fs::write(&grid, b"grid").unwrap();
        std::fs::write(&rave, b"rave").unwrap();
        let root = tmp.path().join("run");

        let cfg_str = format!(
            r#"
root_output_directory = "{}"
target_grids = ["RRFS_CONUS_25KM"]
target_components = ["RAVE_GRID"]

[source_definition.components.RAVE_GRID]
grid = "{}"

[source_definition.rrfs_grids.RRFS_CONUS_25KM]
grid = "{}"
nodes = 1
tasks_per_node = 4
wall_time = "00:10:00"
"#,
            root.display(),
            rave.display(),
            grid.display()
        );
        let cfg = SmokeDustRegridConfig::from_toml_str(&cfg_str).unwrap();
        prepare_run_directories(&cfg).unwrap();
        assert!(cfg.log_directory().is_dir());
        assert_eq!(std::fs::read(cfg.model_grid_path(RrfsGridKey::RrfsConus25km)).unwrap(), b"grid");
        assert_eq!(std::fs::read(cfg.rave_grid_path(RrfsGridKey::RrfsConus25km)).unwrap(), b"rave");

        // A second preparation must not clobber the first
        let err = prepare_run_directories(&cfg).unwrap_err();
        assert!(matches!(err.current_context(), RegridError::OutputExists(_)));
    }
}
