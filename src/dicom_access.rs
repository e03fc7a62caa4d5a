//
// dicom_access.rs
// Dicom-Sort-rs
//
// Reads DICOM headers into typed records, checks keywords against the standard dictionary,
// and maps spatial tags to and from `Geometry`.
//

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use dicom::core::dictionary::DataDictionary;
use dicom::core::value::Value;
use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::{tags, StandardDataDictionary};
use dicom::object::{DefaultDicomObject, InMemDicomObject, OpenFileOptions};
use tracing::debug;

use crate::error::{Error, Result};
use crate::geometry::{Geometry, SpatialImage};
use crate::pattern::PatternResolver;
use crate::record::{DicomRecord, DicomValue};

const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";

/// Small helper trait to pull values from different DICOM object shapes.
pub trait ElementAccess {
    fn element_floats(&self, tag: Tag) -> Option<Vec<f64>>;
    fn transfer_syntax(&self) -> Option<String>;
}

impl ElementAccess for DefaultDicomObject {
    fn element_floats(&self, tag: Tag) -> Option<Vec<f64>> {
        self.element(tag).ok().and_then(|e| e.to_multi_float64().ok())
    }

    fn transfer_syntax(&self) -> Option<String> {
        Some(
            self.meta()
                .transfer_syntax()
                .trim_end_matches('\0')
                .to_string(),
        )
    }
}

impl ElementAccess for InMemDicomObject<StandardDataDictionary> {
    fn element_floats(&self, tag: Tag) -> Option<Vec<f64>> {
        self.element(tag).ok().and_then(|e| e.to_multi_float64().ok())
    }

    fn transfer_syntax(&self) -> Option<String> {
        None
    }
}

/// Tag registered for a standard keyword such as `PatientID`.
pub fn keyword_tag(keyword: &str) -> Option<Tag> {
    StandardDataDictionary
        .by_name(keyword)
        .map(|entry| entry.tag.inner())
}

/// Fail with `InvalidDicomKey` for the first placeholder that is not a standard keyword.
pub fn ensure_known_keys(resolver: &PatternResolver) -> Result<()> {
    match resolver.keys().into_iter().find(|k| keyword_tag(k).is_none()) {
        Some(unknown) => Err(Error::InvalidDicomKey {
            token: unknown.to_string(),
        }),
        None => Ok(()),
    }
}

/// Cheap preamble check for files that lack a `.dcm` extension.
pub fn is_dicom_file(path: &Path) -> bool {
    let mut header = [0u8; PREAMBLE_LEN + 4];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut header))
        .map(|_| &header[PREAMBLE_LEN..] == MAGIC)
        .unwrap_or(false)
}

/// Open a file without loading its pixel data.
pub fn open_header(path: &Path) -> Result<DefaultDicomObject> {
    OpenFileOptions::new()
        .read_until(tags::PIXEL_DATA)
        .open_file(path)
        .map_err(|e| Error::dicom(path, e))
}

pub fn read_record(path: &Path) -> Result<DicomRecord> {
    let obj = open_header(path)?;
    Ok(record_from_object(&obj))
}

/// Convert every standard attribute of `obj` into a typed record entry.
///
/// Sequences, binary payloads and private tags are left out.
pub fn record_from_object(obj: &DefaultDicomObject) -> DicomRecord {
    let mut record = DicomRecord::new();
    if let Some(ts) = obj.transfer_syntax() {
        record.insert("TransferSyntaxUID", ts);
    }

    for elem in obj.iter() {
        let tag = elem.header().tag;
        let Some(entry) = StandardDataDictionary.by_tag(tag) else {
            continue;
        };
        let Value::Primitive(primitive) = elem.value() else {
            continue;
        };
        match convert_primitive(elem.header().vr, primitive) {
            Some(value) => record.insert(entry.alias, value),
            None => debug!(keyword = entry.alias, vr = ?elem.header().vr, "skipping attribute"),
        }
    }
    record
}

fn convert_primitive(vr: VR, value: &PrimitiveValue) -> Option<DicomValue> {
    match vr {
        VR::OB | VR::OW | VR::OF | VR::OD | VR::OL | VR::OV | VR::UN | VR::SQ => return None,
        _ => {}
    }

    let text = value.to_str().trim_matches(|c: char| c == ' ' || c == '\0').to_string();
    if value.multiplicity() != 1 {
        return Some(DicomValue::Text(text));
    }

    let typed = match vr {
        VR::DA => parse_date(&text).map(DicomValue::Date),
        VR::TM => parse_time(&text).map(DicomValue::Time),
        VR::DT => parse_datetime(&text).map(DicomValue::DateTime),
        VR::IS | VR::SL | VR::SS | VR::UL | VR::US | VR::SV | VR::UV => {
            value.to_int::<i64>().ok().map(DicomValue::Int)
        }
        VR::DS | VR::FL | VR::FD => value.to_float64().ok().map(DicomValue::Float),
        _ => None,
    };
    Some(typed.unwrap_or(DicomValue::Text(text)))
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y.%m.%d"))
        .ok()
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    ["%H%M%S%.f", "%H%M%S", "%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(text, fmt).ok())
        .or_else(|| match text.len() {
            4 => NaiveTime::parse_from_str(&format!("{text}00"), "%H%M%S").ok(),
            2 => NaiveTime::parse_from_str(&format!("{text}0000"), "%H%M%S").ok(),
            _ => None,
        })
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    // Drop the optional UTC offset suffix (&ZZXX).
    let local = match text.get(8..).and_then(|t| t.find(['+', '-'])) {
        Some(idx) => &text[..8 + idx],
        None => text,
    };
    ["%Y%m%d%H%M%S%.f", "%Y%m%d%H%M%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(local, fmt).ok())
}

/// Spatial header of a single image, with neutral defaults for absent tags.
pub fn read_geometry<T: ElementAccess>(obj: &T) -> Geometry {
    let mut geometry = Geometry::default();

    if let Some([x, y, z]) = floats_n::<T, 3>(obj, tags::IMAGE_POSITION_PATIENT) {
        geometry.origin = [x, y, z];
    }
    if let Some([row, col]) = floats_n::<T, 2>(obj, tags::PIXEL_SPACING) {
        geometry.spacing[0] = col;
        geometry.spacing[1] = row;
    }
    if let Some([z]) = floats_n::<T, 1>(obj, tags::SPACING_BETWEEN_SLICES)
        .or_else(|| floats_n::<T, 1>(obj, tags::SLICE_THICKNESS))
    {
        geometry.spacing[2] = z;
    }
    if let Some([rx, ry, rz, cx, cy, cz]) = floats_n::<T, 6>(obj, tags::IMAGE_ORIENTATION_PATIENT) {
        let [nx, ny, nz] = cross([rx, ry, rz], [cx, cy, cz]);
        geometry.direction = [rx, cx, nx, ry, cy, ny, rz, cz, nz];
    }
    geometry
}

/// Overwrite the spatial tags of `obj` so that `read_geometry` yields `geometry`.
pub fn write_geometry(obj: &mut InMemDicomObject, geometry: &Geometry) {
    let [xx, yx, _, xy, yy, _, xz, yz, _] = geometry.direction;
    let [sx, sy, sz] = geometry.spacing;

    put_ds(obj, tags::IMAGE_POSITION_PATIENT, &geometry.origin);
    put_ds(obj, tags::PIXEL_SPACING, &[sy, sx]);
    put_ds(obj, tags::SLICE_THICKNESS, &[sz]);
    if obj.element(tags::SPACING_BETWEEN_SLICES).is_ok() {
        put_ds(obj, tags::SPACING_BETWEEN_SLICES, &[sz]);
    }
    put_ds(obj, tags::IMAGE_ORIENTATION_PATIENT, &[xx, xy, xz, yx, yy, yz]);
}

/// A whole DICOM file used as an image handle; its geometry lives in the header.
pub struct DicomImage {
    pub object: DefaultDicomObject,
}

impl DicomImage {
    pub fn open(path: &Path) -> Result<Self> {
        let object = dicom::object::open_file(path).map_err(|e| Error::dicom(path, e))?;
        Ok(Self { object })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.object
            .write_to_file(path)
            .map_err(|e| Error::dicom(path, e))
    }
}

impl SpatialImage for DicomImage {
    fn geometry(&self) -> Geometry {
        read_geometry(&self.object)
    }

    fn set_geometry(&mut self, geometry: Geometry) {
        write_geometry(&mut self.object, &geometry);
    }
}

fn put_ds(obj: &mut InMemDicomObject, tag: Tag, values: &[f64]) {
    let strs = values.iter().map(|v| format_ds(*v)).collect();
    obj.put(DataElement::new(tag, VR::DS, PrimitiveValue::Strs(strs)));
}

// DS values are capped at 16 characters.
fn format_ds(value: f64) -> String {
    let fixed = format!("{value:.6}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "" | "-" | "-0" => "0".to_string(),
        s if s.len() <= 16 => s.to_string(),
        _ => format!("{value:.6e}"),
    }
}

fn floats_n<T: ElementAccess, const N: usize>(obj: &T, tag: Tag) -> Option<[f64; N]> {
    obj.element_floats(tag)?.try_into().ok()
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}
