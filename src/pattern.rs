//
// pattern.rs
// Dicom-Sort-rs
//
// Parses destination templates with `%(Keyword)s` / `{Keyword}` placeholders and resolves them
// against a key/value record.
//

use std::fmt;

use crate::error::{Error, Result};
use crate::record::KeyLookup;
use crate::utils::{sanitize_component, truncate_uid};

const SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Key(String),
}

/// Per-call knobs that change how substituted values are rendered.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Tail length applied to keys ending in `UID`; zero disables truncation.
    pub truncate_uids: usize,
}

/// A validated destination template.
///
/// Construction checks the whole template once, so a bad pattern is reported
/// before any file is read. Resolution is a pure function of the pattern and
/// the record it is given.
#[derive(Debug, Clone)]
pub struct PatternResolver {
    template: String,
    segments: Vec<Vec<Part>>,
}

impl PatternResolver {
    pub fn new(template: &str) -> Result<Self> {
        let segments = parse_template(template)?;

        let has_key = segments
            .iter()
            .flatten()
            .any(|part| matches!(part, Part::Key(_)));
        if !has_key {
            return Err(Error::InvalidPattern {
                template: template.to_string(),
                reason: "no placeholders found; use %(Keyword)s or {Keyword}".to_string(),
            });
        }

        Ok(Self {
            template: template.to_string(),
            segments,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Placeholder names in template order, without repeats.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for part in self.segments.iter().flatten() {
            if let Part::Key(name) = part {
                if !keys.contains(&name.as_str()) {
                    keys.push(name);
                }
            }
        }
        keys
    }

    pub fn resolve<L: KeyLookup + ?Sized>(&self, record: &L) -> Result<String> {
        self.resolve_with(record, ResolveOptions::default())
    }

    pub fn resolve_with<L: KeyLookup + ?Sized>(
        &self,
        record: &L,
        options: ResolveOptions,
    ) -> Result<String> {
        let mut resolved = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            let mut component = String::new();
            for part in segment {
                match part {
                    Part::Literal(text) => component.push_str(text),
                    Part::Key(name) => {
                        let value = record.lookup(name).ok_or_else(|| Error::MissingKey {
                            key: name.clone(),
                            template: self.template.clone(),
                        })?;
                        let mut text = value.to_string();
                        if options.truncate_uids > 0 && name.ends_with("UID") {
                            text = truncate_uid(&text, options.truncate_uids);
                        }
                        component.push_str(&sanitize_component(&text));
                    }
                }
            }
            resolved.push(component);
        }
        Ok(resolved.join("/"))
    }
}

impl fmt::Display for PatternResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

impl std::str::FromStr for PatternResolver {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PatternResolver::new(s)
    }
}

/// Scans placeholders over the whole template first, so a bracketed name
/// containing `/` is still reported as a key; only literal text splits segments.
fn parse_template(template: &str) -> Result<Vec<Vec<Part>>> {
    let mut segments = Vec::new();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut rest = template;

    while !rest.is_empty() {
        let (name, consumed) = if let Some(after) = rest.strip_prefix("%(") {
            let close = after.find(")s").ok_or_else(|| unterminated(template, rest))?;
            (&after[..close], 2 + close + 2)
        } else if let Some(after) = rest.strip_prefix('{') {
            let close = after.find('}').ok_or_else(|| unterminated(template, rest))?;
            (&after[..close], 1 + close + 1)
        } else {
            let mut chars = rest.chars();
            match chars.next() {
                Some(SEPARATOR) => {
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(std::mem::take(&mut parts));
                }
                Some(c) => literal.push(c),
                None => {}
            }
            rest = chars.as_str();
            continue;
        };

        if !is_key_token(name) {
            return Err(Error::InvalidDicomKey {
                token: name.to_string(),
            });
        }
        if !literal.is_empty() {
            parts.push(Part::Literal(std::mem::take(&mut literal)));
        }
        parts.push(Part::Key(name.to_string()));
        rest = &rest[consumed..];
    }

    if !literal.is_empty() {
        parts.push(Part::Literal(literal));
    }
    segments.push(parts);
    Ok(segments)
}

fn unterminated(template: &str, at: &str) -> Error {
    Error::InvalidPattern {
        template: template.to_string(),
        reason: format!("unterminated placeholder at {at:?}"),
    }
}

fn is_key_token(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::record::{DicomRecord, DicomValue};

    fn record() -> DicomRecord {
        [
            ("PatientID", "P01"),
            ("Modality", "CT"),
            ("SeriesInstanceUID", "1.2.3.4.5"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn resolves_both_placeholder_styles() {
        let resolver =
            PatternResolver::new("%(PatientID)s/%(Modality)s/{SeriesInstanceUID}").unwrap();
        assert_eq!(resolver.resolve(&record()).unwrap(), "P01/CT/1.2.3.4.5");
    }

    #[test]
    fn resolution_is_deterministic() {
        let resolver = PatternResolver::new("{PatientID}_{Modality}/x").unwrap();
        let first = resolver.resolve(&record()).unwrap();
        let second = resolver.resolve(&record()).unwrap();
        assert_eq!(first, "P01_CT/x");
        assert_eq!(first, second);
    }

    #[test]
    fn literals_and_slashes_are_kept_verbatim() {
        let resolver = PatternResolver::new("/data/sorted/{PatientID}/scan-{Modality}.dcm/").unwrap();
        assert_eq!(
            resolver.resolve(&record()).unwrap(),
            "/data/sorted/P01/scan-CT.dcm/"
        );
    }

    #[test]
    fn template_without_placeholders_is_rejected() {
        for template in ["", "plain/path", "a/b/c.dcm", "%s/%d"] {
            let err = PatternResolver::new(template).unwrap_err();
            assert!(matches!(err, Error::InvalidPattern { .. }), "{template}: {err}");
        }
    }

    #[test]
    fn malformed_key_token_is_named() {
        let err = PatternResolver::new("%(Patient-ID)s/{Modality}").unwrap_err();
        match err {
            Error::InvalidDicomKey { token } => assert_eq!(token, "Patient-ID"),
            other => panic!("unexpected error: {other}"),
        }

        let err = PatternResolver::new("{Modality}/{Series Description}").unwrap_err();
        assert!(matches!(err, Error::InvalidDicomKey { token } if token == "Series Description"));

        let err = PatternResolver::new("{}").unwrap_err();
        assert!(matches!(err, Error::InvalidDicomKey { token } if token.is_empty()));

        let err = PatternResolver::new("out/%(Series/Description)s").unwrap_err();
        assert!(matches!(err, Error::InvalidDicomKey { token } if token == "Series/Description"));

        let err = PatternResolver::new("out/{Patient/ID}/x.dcm").unwrap_err();
        assert!(matches!(err, Error::InvalidDicomKey { token } if token == "Patient/ID"));
    }

    #[test]
    fn unterminated_placeholder_is_invalid_pattern() {
        assert!(matches!(
            PatternResolver::new("%(PatientID/x").unwrap_err(),
            Error::InvalidPattern { .. }
        ));
        assert!(matches!(
            PatternResolver::new("{PatientID").unwrap_err(),
            Error::InvalidPattern { .. }
        ));
    }

    #[test]
    fn missing_key_names_exactly_that_key() {
        let resolver = PatternResolver::new("{PatientID}/{StudyDate}/{Modality}").unwrap();
        match resolver.resolve(&record()).unwrap_err() {
            Error::MissingKey { key, template } => {
                assert_eq!(key, "StudyDate");
                assert_eq!(template, "{PatientID}/{StudyDate}/{Modality}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn keys_are_listed_once_in_order() {
        let resolver = PatternResolver::new("{Modality}/%(PatientID)s/{Modality}_{SeriesNumber}").unwrap();
        assert_eq!(resolver.keys(), vec!["Modality", "PatientID", "SeriesNumber"]);
    }

    #[test]
    fn substituted_values_are_sanitized_and_typed() {
        let mut values = BTreeMap::new();
        values.insert("SeriesDescription".to_string(), DicomValue::from("T1 post/contrast"));
        values.insert(
            "StudyDate".to_string(),
            DicomValue::Date(chrono::NaiveDate::from_ymd_opt(2023, 11, 2).unwrap()),
        );
        values.insert("SeriesNumber".to_string(), DicomValue::Int(3));

        let resolver = PatternResolver::new("{StudyDate}/{SeriesNumber}-{SeriesDescription}").unwrap();
        assert_eq!(resolver.resolve(&values).unwrap(), "20231102/3-T1_post_contrast");
    }

    #[test]
    fn uid_truncation_is_opt_in() {
        let mut record = record();
        record.insert("SOPInstanceUID", "1.2.840.10008.1.2.1");
        let resolver = PatternResolver::new("{Modality}/{SOPInstanceUID}.dcm").unwrap();

        assert_eq!(
            resolver.resolve(&record).unwrap(),
            "CT/1.2.840.10008.1.2.1.dcm"
        );
        let truncated = resolver
            .resolve_with(&record, ResolveOptions { truncate_uids: 5 })
            .unwrap();
        assert_eq!(truncated, "CT/.1.2.1.dcm");
    }

    #[test]
    fn plain_string_maps_work_as_records() {
        let mut values = BTreeMap::new();
        values.insert("PatientID".to_string(), "X9".to_string());
        let resolver: PatternResolver = "out/{PatientID}".parse().unwrap();
        assert_eq!(resolver.resolve(&values).unwrap(), "out/X9");
    }
}
