//! Normalisation of global identifiers (DOI, ORCID iD).
//!
//! Every identity key stored in the catalog passes through these functions,
//! so two spellings of the same identifier always compare equal.

use std::sync::OnceLock;

use regex::Regex;

const DOI_PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi.org/",
    "doi:",
];

const ORCID_PREFIXES: &[&str] = &[
    "https://orcid.org/",
    "http://orcid.org/",
    "orcid.org/",
];

fn doi_pattern() -> &'static Regex {
    static DOI_RE: OnceLock<Regex> = OnceLock::new();
    DOI_RE.get_or_init(|| Regex::new(r"^10\.\d{4,9}/\S+$").expect("static DOI pattern"))
}

/// Lowercase a DOI and strip resolver URLs and the `doi:` scheme.
/// Returns `None` when the remainder is not a DOI.
pub fn normalize_doi(raw: &str) -> Option<String> {
    let mut doi = raw.trim().to_lowercase();
    for prefix in DOI_PREFIXES {
        if let Some(rest) = doi.strip_prefix(prefix) {
            doi = rest.trim().to_string();
            break;
        }
    }
    doi_pattern().is_match(&doi).then_some(doi)
}

/// Normalise an ORCID iD to `0000-0000-0000-000X` form.
/// Returns `None` on a malformed value or a failed ISO 7064 checksum.
pub fn normalize_orcid(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let lowered = trimmed.to_lowercase();
    let bare = ORCID_PREFIXES
        .iter()
        .find(|p| lowered.starts_with(*p))
        .map(|p| &trimmed[p.len()..])
        .unwrap_or(trimmed);

    let compact: String = bare
        .chars()
        .filter(|c| *c != '-')
        .collect::<String>()
        .to_uppercase();
    if compact.len() != 16 {
        return None;
    }

    let (base, check) = compact.split_at(15);
    if !base.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if check.chars().next() != Some(orcid_check_digit(base)) {
        return None;
    }

    Some(format!(
        "{}-{}-{}-{}",
        &compact[0..4],
        &compact[4..8],
        &compact[8..12],
        &compact[12..16]
    ))
}

/// ISO 7064 MOD 11-2 check character over the first 15 digits.
fn orcid_check_digit(base: &str) -> char {
    let total = base
        .bytes()
        .fold(0u32, |acc, b| (acc + u32::from(b - b'0')) * 2);
    match (12 - total % 11) % 11 {
        10 => 'X',
        n => char::from_digit(n, 10).unwrap_or('0'),
    }
}
