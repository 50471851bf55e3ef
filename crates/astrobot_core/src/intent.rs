//! crates/astrobot_core/src/intent.rs
//!
//! Pure classification of raw user text into an interaction branch.
//!
//! Precedence is evaluated top to bottom, first match wins: the exact card
//! trigger phrases are checked before the general astrology-domain filter so
//! a feature phrase is never misrouted into the catch-all AI path, and the
//! domain filter keeps unrelated chit-chat from spending AI-completion calls.

use once_cell::sync::Lazy;
use regex::Regex;

/// The interaction branch a submission is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    DailyRasiCard,
    BirthCard,
    RasiChartCard,
    GeneralQuery,
    OutOfDomainRefusal,
}

/// Trigger phrases, lowercase, matched as substrings of the lowercased input.
const DAILY_RASI_TRIGGERS: &[&str] = &[
    "daily rasi palan",
    "இன்றைய ராசி பலன்",
    "rasi palan",
    "ராசி பலன்",
];

const BIRTH_TRIGGERS: &[&str] = &["birth details", "பிறந்த விவரங்கள்"];

const RASI_CHART_TRIGGERS: &[&str] = &["rasi chart", "ராசி விளக்கப்படம்"];

/// Bilingual astrology-domain filter. The English pattern is word-bounded;
/// Tamil has no case and no word boundaries worth relying on, so it is a
/// plain alternation.
static DOMAIN_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(
            r"(?i)\b(astrology|horoscope|zodiac|nakshatra|rasi|raasi|kundli|birth|planet|graha|transit|muhur(t|th)a|compatibility|dosha|ayanamsa)\b",
        )
        .expect("english domain pattern"),
        Regex::new(
            "(ஜோதிடம்|இன்றைய பலன்|ஜாதகம்|நக்ஷத்திரம்|ராசி|சந்திர|சூர்ய|கிரக|சஞ்சாரம்|முஹூர்த்தம்|இணக்கம்|தோஷ)",
        )
        .expect("tamil domain pattern"),
    ]
});

fn matches_any(haystack: &str, triggers: &[&str]) -> bool {
    triggers.iter().any(|t| haystack.contains(t))
}

/// Classifies a trimmed user submission.
pub fn classify(text: &str) -> Intent {
    let lowered = text.to_lowercase();

    if matches_any(&lowered, DAILY_RASI_TRIGGERS) {
        return Intent::DailyRasiCard;
    }
    if matches_any(&lowered, BIRTH_TRIGGERS) {
        return Intent::BirthCard;
    }
    if matches_any(&lowered, RASI_CHART_TRIGGERS) {
        return Intent::RasiChartCard;
    }
    if DOMAIN_PATTERNS.iter().any(|re| re.is_match(text)) {
        return Intent::GeneralQuery;
    }
    Intent::OutOfDomainRefusal
}
