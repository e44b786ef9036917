//! Synthetic datasets for the unit tests.
use std::path::Path;

use ndarray::{Array1, Array2, Array3};
use netcdf::Extents;

use crate::dimension::{AliasSet, CoordinateRole, Dimension, StaggerLocation};
use crate::grid_spec::GridSpec;

pub(crate) fn make_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Creating a temporary directory should not fail")
}

/// `2 + cos²(λ)·cos(2·(90−φ))` with λ, φ in degrees.
pub(crate) fn analytic_field(lon: f64, lat: f64) -> f64 {
    2.0 + lon.to_radians().cos().powi(2) * (2.0 * (90.0 - lat).to_radians()).cos()
}

/// A center dimension owned entirely by the current rank.
pub(crate) fn full_dim(aliases: AliasSet, size: usize, role: CoordinateRole) -> Dimension {
    Dimension::new(aliases, size, 0, size, StaggerLocation::Center, role).unwrap()
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    Array1::linspace(start, end, n).to_vec()
}

/// Meshes indexed `[lat, lon]`, the on-disk order of every test file.
fn meshgrid(lon: &[f64], lat: &[f64]) -> (Array2<f64>, Array2<f64>) {
    let lon_mesh = Array2::from_shape_fn((lat.len(), lon.len()), |(_, i)| lon[i]);
    let lat_mesh = Array2::from_shape_fn((lat.len(), lon.len()), |(j, _)| lat[j]);
    (lon_mesh, lat_mesh)
}

fn put_2d(ds: &mut netcdf::FileMut, name: &str, dims: [&str; 2], values: &Array2<f64>) {
    let mut var = ds.add_variable::<f64>(name, &dims).unwrap();
    var.put(values.view(), Extents::All).unwrap();
}

fn put_time(ds: &mut netcdf::FileMut, ntime: usize) {
    ds.add_dimension("time", ntime).unwrap();
    let mut var = ds.add_variable::<f64>("time", &["time"]).unwrap();
    var.put_attribute("units", "months since 2000-01-01").unwrap();
    let values: Vec<f64> = (0..ntime).map(|t| t as f64).collect();
    var.put_values(&values, Extents::All).unwrap();
}

/// A time-varying f32 field: the analytic field scaled per variable and time step.
fn put_timed_field(
    ds: &mut netcdf::FileMut,
    name: &str,
    dims: [&str; 3],
    lon_mesh: &Array2<f64>,
    lat_mesh: &Array2<f64>,
    ntime: usize,
    scale: f64,
) -> netcdf::Result<()> {
    let (ny, nx) = lon_mesh.dim();
    let values = Array3::from_shape_fn((ntime, ny, nx), |(t, j, i)| {
        (scale * analytic_field(lon_mesh[[j, i]], lat_mesh[[j, i]]) + t as f64) as f32
    });
    let mut var = ds.add_variable::<f32>(name, &dims)?;
    var.put(values.view(), Extents::All)
}

/// An RRFS-style grid file: `grid_lont`/`grid_latt` on `(grid_yt, grid_xt)`,
/// the analytic field as `field`, and optionally corners `grid_lon`/`grid_lat`
/// on `(grid_y, grid_x)` half a grid step outside the centers.
pub(crate) fn create_grid_file(path: &Path, lon: (f64, f64, usize), lat: (f64, f64, usize), corners: bool) {
    let lon_c = linspace(lon.0, lon.1, lon.2);
    let lat_c = linspace(lat.0, lat.1, lat.2);
    let (lon_mesh, lat_mesh) = meshgrid(&lon_c, &lat_c);

    let mut ds = netcdf::create(path).unwrap();
    ds.add_attribute("title", "synthetic RRFS grid").unwrap();
    ds.add_dimension("grid_xt", lon.2).unwrap();
    ds.add_dimension("grid_yt", lat.2).unwrap();
    put_2d(&mut ds, "grid_lont", ["grid_yt", "grid_xt"], &lon_mesh);
    put_2d(&mut ds, "grid_latt", ["grid_yt", "grid_xt"], &lat_mesh);
    let field = Array2::from_shape_fn(lon_mesh.dim(), |idx| analytic_field(lon_mesh[idx], lat_mesh[idx]));
    put_2d(&mut ds, "field", ["grid_yt", "grid_xt"], &field);

    if corners {
        let dlon = if lon.2 > 1 { (lon.1 - lon.0) / (lon.2 - 1) as f64 } else { 1.0 };
        let dlat = if lat.2 > 1 { (lat.1 - lat.0) / (lat.2 - 1) as f64 } else { 1.0 };
        let lon_e = linspace(lon.0 - dlon / 2.0, lon.1 + dlon / 2.0, lon.2 + 1);
        let lat_e = linspace(lat.0 - dlat / 2.0, lat.1 + dlat / 2.0, lat.2 + 1);
        let (lonc_mesh, latc_mesh) = meshgrid(&lon_e, &lat_e);
        ds.add_dimension("grid_x", lon.2 + 1).unwrap();
        ds.add_dimension("grid_y", lat.2 + 1).unwrap();
        put_2d(&mut ds, "grid_lon", ["grid_y", "grid_x"], &lonc_mesh);
        put_2d(&mut ds, "grid_lat", ["grid_y", "grid_x"], &latc_mesh);
    }
}

/// The 71 x 26 grid spanning 230-300 E, 25-50 N at 1 degree.
pub(crate) fn create_analytic_grid_file(path: &Path, corners: bool) {
    create_grid_file(path, (230.0, 300.0, 71), (25.0, 50.0, 26), corners);
}

pub(crate) fn rrfs_grid_spec(corners: bool) -> GridSpec {
    let builder = GridSpec::builder("grid_lont", "grid_latt", AliasSet::from("grid_xt"), AliasSet::from("grid_yt"));
    let builder = if corners {
        builder
            .x_corner("grid_lon")
            .y_corner("grid_lat")
            .x_corner_dim(AliasSet::from("grid_x"))
            .y_corner_dim(AliasSet::from("grid_y"))
    } else {
        builder
    };
    builder.build().unwrap()
}

/// A dust climatology: `geolon`/`geolat` on `(lat, lon)` covering 220-310 E,
/// 20-55 N, a `time` coordinate and the five dust fields on `(time, lat, lon)`.
pub(crate) fn create_dust_file(path: &Path, ntime: usize) {
    let lon = linspace(220.0, 310.0, 10);
    let lat = linspace(20.0, 55.0, 8);
    let (lon_mesh, lat_mesh) = meshgrid(&lon, &lat);

    let mut ds = netcdf::create(path).unwrap();
    ds.add_attribute("title", "synthetic dust data").unwrap();
    put_time(&mut ds, ntime);
    ds.add_dimension("lat", lat.len()).unwrap();
    ds.add_dimension("lon", lon.len()).unwrap();
    put_2d(&mut ds, "geolon", ["lat", "lon"], &lon_mesh);
    put_2d(&mut ds, "geolat", ["lat", "lon"], &lat_mesh);
    for (k, name) in ["uthr", "sand", "clay", "rdrag", "ssm"].into_iter().enumerate() {
        put_timed_field(&mut ds, name, ["time", "lat", "lon"], &lon_mesh, &lat_mesh, ntime, (k + 1) as f64).unwrap();
    }
    ds.variable_mut("uthr").unwrap().put_attribute("units", "m/s").unwrap();
}

/// Emissions on an RRFS-convention grid slightly larger than the analytic grid.
pub(crate) fn create_emi_file(path: &Path, ntime: usize) {
    create_grid_file(path, (225.0, 305.0, 17), (20.0, 55.0, 8), false);
    let ds = netcdf::open(path).unwrap();
    let lon_mesh = ds.variable("grid_lont").unwrap().get::<f64, _>(Extents::All).unwrap();
    let lat_mesh = ds.variable("grid_latt").unwrap().get::<f64, _>(Extents::All).unwrap();
    drop(ds);
    let lon_mesh: Array2<f64> = lon_mesh.into_dimensionality().unwrap();
    let lat_mesh: Array2<f64> = lat_mesh.into_dimensionality().unwrap();

    let mut ds = netcdf::append(path).unwrap();
    put_time(&mut ds, ntime);
    for (k, name) in ["e_bc", "e_oc", "e_pm25"].into_iter().enumerate() {
        put_timed_field(&mut ds, name, ["time", "grid_yt", "grid_xt"], &lon_mesh, &lat_mesh, ntime, (k + 1) as f64)
            .unwrap();
    }
}

/// A vegetation map: `geolon`/`geolat` on `(lat, lon)` with `emiss_factor`.
pub(crate) fn create_veg_map_file(path: &Path) {
    let lon = linspace(220.0, 310.0, 19);
    let lat = linspace(20.0, 55.0, 8);
    let (lon_mesh, lat_mesh) = meshgrid(&lon, &lat);

    let mut ds = netcdf::create(path).unwrap();
    ds.add_dimension("lat", lat.len()).unwrap();
    ds.add_dimension("lon", lon.len()).unwrap();
    put_2d(&mut ds, "geolon", ["lat", "lon"], &lon_mesh);
    put_2d(&mut ds, "geolat", ["lat", "lon"], &lat_mesh);
    let emiss = lat_mesh.mapv(|lat| lat / 100.0);
    put_2d(&mut ds, "emiss_factor", ["lat", "lon"], &emiss);
}
