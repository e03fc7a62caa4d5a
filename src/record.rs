//
// record.rs
// Dicom-Sort-rs
//
// Typed key/value records produced from DICOM headers and consumed by the pattern resolver.
//

use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Serialize, Serializer};

/// Scalar value of a single DICOM attribute, as seen by the resolver.
#[derive(Debug, Clone, PartialEq)]
pub enum DicomValue {
    Text(String),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
}

impl fmt::Display for DicomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DicomValue::Text(s) => f.write_str(s),
            DicomValue::Int(i) => write!(f, "{i}"),
            DicomValue::Float(v) => write!(f, "{v}"),
            DicomValue::Date(d) => write!(f, "{}", d.format("%Y%m%d")),
            DicomValue::Time(t) => write!(f, "{}", t.format("%H%M%S")),
            DicomValue::DateTime(dt) => write!(f, "{}", dt.format("%Y%m%d%H%M%S")),
        }
    }
}

impl Serialize for DicomValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DicomValue::Int(i) => serializer.serialize_i64(*i),
            DicomValue::Float(v) => serializer.serialize_f64(*v),
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

impl From<&str> for DicomValue {
    fn from(value: &str) -> Self {
        DicomValue::Text(value.to_string())
    }
}

impl From<String> for DicomValue {
    fn from(value: String) -> Self {
        DicomValue::Text(value)
    }
}

impl From<i64> for DicomValue {
    fn from(value: i64) -> Self {
        DicomValue::Int(value)
    }
}

impl From<f64> for DicomValue {
    fn from(value: f64) -> Self {
        DicomValue::Float(value)
    }
}

impl From<NaiveDate> for DicomValue {
    fn from(value: NaiveDate) -> Self {
        DicomValue::Date(value)
    }
}

impl From<NaiveTime> for DicomValue {
    fn from(value: NaiveTime) -> Self {
        DicomValue::Time(value)
    }
}

/// Anything the resolver can pull placeholder values from.
pub trait KeyLookup {
    fn lookup(&self, key: &str) -> Option<DicomValue>;
}

impl KeyLookup for BTreeMap<String, DicomValue> {
    fn lookup(&self, key: &str) -> Option<DicomValue> {
        self.get(key).cloned()
    }
}

impl KeyLookup for BTreeMap<String, String> {
    fn lookup(&self, key: &str) -> Option<DicomValue> {
        self.get(key).map(|v| DicomValue::Text(v.clone()))
    }
}

/// Header fields of one DICOM file, keyed by standard keyword.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DicomRecord {
    values: BTreeMap<String, DicomValue>,
}

impl DicomRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<DicomValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&DicomValue> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn items(&self) -> impl Iterator<Item = (&str, &DicomValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Flattens every value to its canonical string form.
    pub fn to_dict(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }

    /// Keeps only the listed keys; unknown names are ignored.
    pub fn subset<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> DicomRecord {
        let values = keys
            .into_iter()
            .filter_map(|k| self.values.get(k).map(|v| (k.to_string(), v.clone())))
            .collect();
        DicomRecord { values }
    }
}

impl KeyLookup for DicomRecord {
    fn lookup(&self, key: &str) -> Option<DicomValue> {
        self.values.get(key).cloned()
    }
}

impl<K: Into<String>, V: Into<DicomValue>> FromIterator<(K, V)> for DicomRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let values = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        DicomRecord { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates_and_times_render_canonically() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let time = NaiveTime::from_hms_opt(7, 3, 9).unwrap();
        assert_eq!(DicomValue::Date(date).to_string(), "20240105");
        assert_eq!(DicomValue::Time(time).to_string(), "070309");
        assert_eq!(
            DicomValue::DateTime(date.and_time(time)).to_string(),
            "20240105070309"
        );
    }

    #[test]
    fn numbers_render_without_padding() {
        assert_eq!(DicomValue::Int(42).to_string(), "42");
        assert_eq!(DicomValue::Float(2.5).to_string(), "2.5");
        assert_eq!(DicomValue::Float(3.0).to_string(), "3");
    }

    #[test]
    fn record_exposes_keys_items_and_dict() {
        let record: DicomRecord = [("Modality", DicomValue::from("CT")), ("Rows", 512i64.into())]
            .into_iter()
            .collect();

        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["Modality", "Rows"]);
        assert_eq!(record.items().count(), 2);
        let dict = record.to_dict();
        assert_eq!(dict["Rows"], "512");
        assert_eq!(record.lookup("Modality"), Some(DicomValue::from("CT")));
        assert_eq!(record.lookup("PatientID"), None);
    }

    #[test]
    fn subset_skips_absent_keys() {
        let record: DicomRecord = [("Modality", "MR"), ("PatientID", "P7")].into_iter().collect();
        let subset = record.subset(["PatientID", "StudyDate"]);
        assert_eq!(subset.len(), 1);
        assert_eq!(subset.get("PatientID"), Some(&DicomValue::from("P7")));
    }

    #[test]
    fn record_serializes_as_flat_object() {
        let record: DicomRecord = [("Rows", DicomValue::Int(2)), ("Modality", "OT".into())]
            .into_iter()
            .collect();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json, serde_json::json!({"Modality": "OT", "Rows": 2}));
    }
}
