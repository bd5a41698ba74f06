//! Seeded organization registry.
//!
//! Organizations are created once, outside the harvest pipeline. Jobs may only
//! target an organization present in this registry (or the configured
//! override list).

use crate::entities::Organization;

/// Austrian research institutions keyed by ROR id: (ror, name, city, website).
const AUSTRIAN_INSTITUTIONS: &[(&str, &str, &str, Option<&str>)] = &[
    ("03prydq77", "University of Vienna",             "Vienna",     Some("https://www.univie.ac.at")),
    ("05qghxh33", "TU Wien",                          "Vienna",     Some("https://www.tuwien.ac.at")),
    ("03ak46v85", "University of Innsbruck",          "Innsbruck",  Some("https://www.uibk.ac.at")),
    ("035xkbk20", "University of Graz",               "Graz",       Some("https://www.uni-graz.at")),
    ("00rbhpj83", "JKU Linz",                         "Linz",       Some("https://www.jku.at")),
    ("03ktj6r74", "Medical University of Vienna",     "Vienna",     None),
    ("0534sfd39", "TU Graz",                          "Graz",       None),
    ("02kgz0p91", "University of Salzburg",           "Salzburg",   None),
    ("0285gxx56", "Medical University of Graz",       "Graz",       None),
    ("04rbhpj83", "Medical University of Innsbruck",  "Innsbruck",  None),
    ("00h7cqc46", "BOKU Vienna",                      "Vienna",     None),
    ("013tf3c58", "WU Vienna",                        "Vienna",     None),
    ("03kfx5e42", "University of Klagenfurt",         "Klagenfurt", None),
    ("04r3pxg27", "Montanuniversität Leoben",         "Leoben",     None),
    ("03anc3s24", "Austrian Academy of Sciences",     "Vienna",     None),
];

/// The default organization seed.
pub fn seeded() -> Vec<Organization> {
    AUSTRIAN_INSTITUTIONS
        .iter()
        .map(|(id, name, city, website)| Organization {
            id: id.to_string(),
            name: name.to_string(),
            city: Some(city.to_string()),
            country: "AT".to_string(),
            website: website.map(String::from),
        })
        .collect()
}

/// Look up a seeded organization by ROR id. Accepts `https://ror.org/` URLs.
pub fn find_seeded(id: &str) -> Option<Organization> {
    let id = strip_ror_prefix(id);
    seeded().into_iter().find(|o| o.id == id)
}

/// Strip the resolver prefix from a ROR URL.
pub fn strip_ror_prefix(id: &str) -> &str {
    let id = id.trim();
    id.strip_prefix("https://ror.org/")
        .or_else(|| id.strip_prefix("http://ror.org/"))
        .unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_has_unique_ids() {
        let orgs = seeded();
        let mut ids: Vec<_> = orgs.iter().map(|o| o.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), orgs.len());
    }

    #[test]
    fn test_find_seeded_accepts_ror_url() {
        let org = find_seeded("https://ror.org/05qghxh33").unwrap();
        assert_eq!(org.name, "TU Wien");
        assert!(find_seeded("zzzzzzzzz").is_none());
    }
}
