//! Keyword tables and compiled patterns used by the detection heuristics.
//!
//! Matching is case-insensitive substring matching against lowercased
//! attribute values. Update these when new locales or site conventions show up.

use once_cell::sync::Lazy;
use regex::Regex;

// ═══════════════════════════════════════════════════════════════════════════════
// Field Attribute Keywords
// ═══════════════════════════════════════════════════════════════════════════════

pub const NAME_KEYWORDS: &[&str] = &[
    "otp",
    "code",
    "verification",
    "pin",
    "token",
    "2fa",
    "kode",
    "codigo",
    "código",
    "codice",
    "verifikasi",
];

pub const ID_KEYWORDS: &[&str] = &[
    "otp",
    "code",
    "verification",
    "pin",
    "kode",
    "codigo",
    "codice",
];

pub const PLACEHOLDER_KEYWORDS: &[&str] = &[
    "otp",
    "code",
    "verification",
    "kode",
    "código",
    "codice",
    "verifikasi",
];

pub const CLASS_KEYWORDS: &[&str] = &["otp", "code", "verification"];

pub const ARIA_LABEL_KEYWORDS: &[&str] = &["otp", "code", "verification", "kode", "código"];

/// Words that mark the surrounding text of a numeric field as OTP-related.
pub const CONTEXT_KEYWORDS: &[&str] = &[
    "otp",
    "code",
    "verification",
    "verify",
    "pin",
    "token",
    "kode",
    "código",
    "codice",
    "verifikasi",
];

/// Attribute values containing these look like a code field but are not one.
pub static RE_NOT_OTP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)zip|postal|post_?code|promo|coupon|voucher|gift|country|area_?code|captcha")
        .unwrap()
});

// ═══════════════════════════════════════════════════════════════════════════════
// Submit Control Patterns
// ═══════════════════════════════════════════════════════════════════════════════

pub static RE_SUBMIT_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(verify|submit|confirm|continue|next|verifikasi|kirim|lanjut|verificar|confirmar|bestätigen|weiter)\b",
    )
    .unwrap()
});

pub static RE_SUBMIT_CLASS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)submit|verify").unwrap());

pub fn contains_keyword(value: &str, keywords: &[&str]) -> bool {
    let lowered = value.to_lowercase();
    keywords.iter().any(|keyword| lowered.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_match_is_case_insensitive() {
        assert!(contains_keyword("Enter OTP", NAME_KEYWORDS));
        assert!(contains_keyword("Kode Verifikasi", PLACEHOLDER_KEYWORDS));
        assert!(!contains_keyword("email", NAME_KEYWORDS));
    }

    #[test]
    fn negative_pattern_catches_lookalikes() {
        assert!(RE_NOT_OTP.is_match("billing_zipcode"));
        assert!(RE_NOT_OTP.is_match("PromoCode"));
        assert!(!RE_NOT_OTP.is_match("otp_code"));
    }

    #[test]
    fn submit_text_matches_whole_words() {
        assert!(RE_SUBMIT_TEXT.is_match("Verify code"));
        assert!(RE_SUBMIT_TEXT.is_match("Kirim"));
        assert!(!RE_SUBMIT_TEXT.is_match("Nextcloud settings"));
    }
}
