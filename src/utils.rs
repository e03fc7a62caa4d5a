//
// utils.rs
// Dicom-Sort-rs
//
// String helpers for turning DICOM values into safe path components.
//

pub const DEFAULT_UID_TAIL: usize = 5;

const UNKNOWN_COMPONENT: &str = "Unknown";

/// Keep only the tail of a long identifier such as a SOP Instance UID.
///
/// Returns the input unchanged when `last` is zero or not shorter than the
/// value. A separator sitting right before the tail stays attached to it, so
/// `truncate_uid("1.2.840.10008.1.2.1", 5)` yields `".1.2.1"`.
pub fn truncate_uid(uid: &str, last: usize) -> String {
    let chars: Vec<char> = uid.chars().collect();
    if last == 0 || last >= chars.len() {
        return uid.to_string();
    }

    let mut start = chars.len() - last;
    if matches!(chars[start - 1], '.' | '_') {
        start -= 1;
    }
    chars[start..].iter().collect()
}

/// Coerce an arbitrary value into a single filesystem-safe path component.
pub fn sanitize_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        let mapped = match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() || c.is_whitespace() => '_',
            c => c,
        };
        // Runs of '_' or '-' collapse into a single underscore.
        if matches!(mapped, '_' | '-') && out.ends_with(['_', '-']) {
            out.pop();
            out.push('_');
            continue;
        }
        out.push(mapped);
    }

    let trimmed = out.trim_matches(|c: char| c == '_' || c == ' ');
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        UNKNOWN_COMPONENT.to_string()
    } else {
        trimmed.to_string()
    }
}
