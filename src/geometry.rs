//
// geometry.rs
// Dicom-Sort-rs
//
// Spatial metadata of image volumes and the reference/mask consistency check.
//

use std::collections::BTreeMap;
use std::fmt;

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

pub const DEFAULT_TOLERANCE: f64 = 1e-5;

const IDENTITY: [f64; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

/// How voxel indices map to patient space.
///
/// `direction` is a row-major 3x3 matrix whose columns are the x, y and z axis
/// directions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub origin: [f64; 3],
    pub spacing: [f64; 3],
    pub direction: [f64; 9],
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            origin: [0.0; 3],
            spacing: [1.0; 3],
            direction: IDENTITY,
        }
    }
}

impl Geometry {
    pub fn new(origin: [f64; 3], spacing: [f64; 3], direction: [f64; 9]) -> Self {
        Self {
            origin,
            spacing,
            direction,
        }
    }

    /// Names of the components that differ from `other` by more than `tolerance`.
    pub fn differences(&self, other: &Geometry, tolerance: f64) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if !all_close(&self.origin, &other.origin, tolerance) {
            fields.push("origin");
        }
        if !all_close(&self.spacing, &other.spacing, tolerance) {
            fields.push("spacing");
        }
        if !all_close(&self.direction, &other.direction, tolerance) {
            fields.push("direction");
        }
        fields
    }

    pub fn matches(&self, other: &Geometry, tolerance: f64) -> bool {
        self.differences(other, tolerance).is_empty()
    }

    pub fn keys(&self) -> [&'static str; 3] {
        ["origin", "spacing", "direction"]
    }

    pub fn items(&self) -> [(&'static str, &[f64]); 3] {
        [
            ("origin", &self.origin[..]),
            ("spacing", &self.spacing[..]),
            ("direction", &self.direction[..]),
        ]
    }

    pub fn to_dict(&self) -> BTreeMap<String, String> {
        self.items()
            .into_iter()
            .map(|(k, v)| (k.to_string(), format_values(v)))
            .collect()
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "origin=({}) spacing=({}) direction=({})",
            format_values(&self.origin),
            format_values(&self.spacing),
            format_values(&self.direction)
        )
    }
}

fn format_values(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn all_close(a: &[f64], b: &[f64], tolerance: f64) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= tolerance)
}

/// Image handle whose spatial header can be inspected and overwritten.
pub trait SpatialImage {
    fn geometry(&self) -> Geometry;
    fn set_geometry(&mut self, geometry: Geometry);
}

/// Pixel buffer indexed `[z, y, x]` plus its spatial header.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume<T> {
    pub data: Array3<T>,
    pub geometry: Geometry,
}

impl<T> Volume<T> {
    pub fn new(data: Array3<T>, geometry: Geometry) -> Self {
        Self { data, geometry }
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }
}

impl<T> SpatialImage for Volume<T> {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn set_geometry(&mut self, geometry: Geometry) {
        self.geometry = geometry;
    }
}

/// Make sure a mask lines up with the scan it was derived from.
///
/// Within `tolerance` both images come back untouched. Otherwise the mask's
/// header is forced to the reference's when `correct_if_different` is set
/// (pixels are left alone), or a [`Error::GeometryMismatch`] is returned.
pub fn check_geometry<R, M>(
    reference: R,
    mut mask: M,
    tolerance: f64,
    correct_if_different: bool,
) -> Result<(R, M)>
where
    R: SpatialImage,
    M: SpatialImage,
{
    let expected = reference.geometry();
    let actual = mask.geometry();
    let fields = actual.differences(&expected, tolerance);
    if fields.is_empty() {
        return Ok((reference, mask));
    }

    if !correct_if_different {
        return Err(Error::GeometryMismatch {
            reference: Box::new(expected),
            mask: Box::new(actual),
            fields,
        });
    }

    warn!(
        ?fields,
        tolerance,
        reference = %expected,
        mask = %actual,
        "mask geometry differs from reference, overwriting mask header"
    );
    mask.set_geometry(expected);
    Ok((reference, mask))
}
