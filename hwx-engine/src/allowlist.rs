//! Allowlisted data-source domains
//!
//! Only allowlisted hosts are ever fetched. The list also determines the
//! tier of a URL that was not reached through a configured source.

use url::Url;

use crate::types::SourceTier;

/// Manufacturer domains (official tier) and the brand each one belongs to
pub const OFFICIAL_DOMAINS: &[(&str, &str)] = &[
    ("intel.com", "Intel"),
    ("amd.com", "AMD"),
    ("apple.com", "Apple"),
    ("nvidia.com", "NVIDIA"),
    ("asus.com", "ASUS"),
    ("msi.com", "MSI"),
    ("gigabyte.com", "Gigabyte"),
    ("asrock.com", "ASRock"),
    ("supermicro.com", "Supermicro"),
    ("biostar.com", "Biostar"),
    ("kingston.com", "Kingston"),
    ("crucial.com", "Crucial"),
    ("micron.com", "Micron"),
    ("corsair.com", "Corsair"),
    ("gskill.com", "G.Skill"),
    ("teamgroupinc.com", "TeamGroup"),
    ("patriotmemory.com", "Patriot"),
    ("adata.com", "ADATA"),
    ("lexar.com", "Lexar"),
    ("samsung.com", "Samsung"),
    ("wdc.com", "Western Digital"),
    ("westerndigital.com", "Western Digital"),
    ("sandisk.com", "SanDisk"),
    ("seagate.com", "Seagate"),
    ("toshiba-storage.com", "Toshiba"),
    ("kioxia.com", "Kioxia"),
];

/// Reputable secondary databases (reference tier)
pub const REFERENCE_DOMAINS: &[&str] = &["techpowerup.com", "wikichip.org"];

/// Host of a URL, lower-cased, without a leading `www.`
pub fn host_of(target: &str) -> Option<String> {
    let url = Url::parse(target).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

/// True if `host` is `domain` or one of its subdomains
pub fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{}", domain))
}

/// Tier of an allowlisted URL, `None` if the host is not allowlisted
pub fn classify_tier(target: &str) -> Option<SourceTier> {
    let host = host_of(target)?;
    if OFFICIAL_DOMAINS.iter().any(|(d, _)| domain_matches(&host, d)) {
        return Some(SourceTier::Official);
    }
    if REFERENCE_DOMAINS.iter().any(|d| domain_matches(&host, d)) {
        return Some(SourceTier::Reference);
    }
    None
}

pub fn is_allowlisted(target: &str) -> bool {
    classify_tier(target).is_some()
}

/// Brand owning an official domain ("https://www.crucial.com/..." -> "Crucial")
pub fn brand_for_url(target: &str) -> Option<&'static str> {
    let host = host_of(target)?;
    OFFICIAL_DOMAINS
        .iter()
        .find(|(d, _)| domain_matches(&host, d))
        .map(|(_, brand)| *brand)
}
