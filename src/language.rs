//! LanguageTagger (spec §4.1): classifies a text fragment as `ar`, `en`, or
//! `mixed` via script-ratio analysis. Deterministic, pure, no external state.

use crate::models::Language;

/// Arabic script ranges from spec §4.1.
const ARABIC_RANGES: &[(u32, u32)] = &[
    (0x0600, 0x06FF),
    (0x0750, 0x077F),
    (0x08A0, 0x08FF),
    (0xFB50, 0xFDFF),
    (0xFE70, 0xFEFF),
];

fn is_arabic(c: char) -> bool {
    let cp = c as u32;
    ARABIC_RANGES.iter().any(|&(lo, hi)| cp >= lo && cp <= hi)
}

fn is_ascii_letter(c: char) -> bool {
    c.is_ascii_alphabetic()
}

/// Tags a fragment of text per the script-ratio rules of spec §4.1.
pub fn tag(text: &str) -> Language {
    let mut arabic_count: u64 = 0;
    let mut english_count: u64 = 0;

    for c in text.chars() {
        if is_arabic(c) {
            arabic_count += 1;
        } else if is_ascii_letter(c) {
            english_count += 1;
        }
    }

    let total = arabic_count + english_count;
    if total == 0 {
        return Language::En;
    }

    let ratio_arabic = arabic_count as f64 / total as f64;
    let ratio_english = english_count as f64 / total as f64;

    if ratio_arabic > 0.3 && ratio_english <= 0.2 {
        Language::Ar
    } else if ratio_arabic > 0.3 && ratio_english > 0.2 {
        Language::Mixed
    } else if ratio_english > 0.5 {
        Language::En
    } else {
        Language::Mixed
    }
}
