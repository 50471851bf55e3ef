//! crates/astrobot_core/src/text.rs
//!
//! The bilingual user-facing string catalog and the birth-details summary
//! formatter. All strings the assistant ever says in its own voice live
//! here; flow code never embeds literals.

use crate::domain::{BirthDetails, Language};

/// The greeting that seeds every new timeline.
pub fn welcome(lang: Language) -> &'static str {
    match lang {
        Language::Ta => "Vanakkam! நான் AstroBot. உங்கள் ராசி, நக்ஷத்திரம் அல்லது இன்று செய்ய வேண்டிய முக்கிய முடிவுகள் பற்றி கேட்டுக்கொள்ளலாம்.",
        Language::En => "Hello! I'm AstroBot. Ask me about your rasi, nakshatra, or today's important decisions.",
    }
}

/// Deterministic reply to input outside the astrology domain.
pub fn refusal(lang: Language) -> &'static str {
    match lang {
        Language::Ta => "நான் ஜோதிடம் தொடர்பான கேள்விகளுக்கு மட்டும் பதிலளிக்கிறேன்.",
        Language::En => "I only answer astrology-related questions.",
    }
}

/// System prompt for the general query completion.
pub fn system_prompt(lang: Language) -> &'static str {
    match lang {
        Language::Ta => "நீங்கள் AstroBot. கேள்விக்கு சுருக்கமாக பதில் அளிக்கவும்.",
        Language::En => "You are AstroBot. Reply briefly.",
    }
}

pub fn ai_failure(lang: Language) -> &'static str {
    match lang {
        Language::Ta => "AI பதில் பெற முடியவில்லை.",
        Language::En => "Failed to get AI response.",
    }
}

/// Generic one-word error detail used when a failure carries no message.
pub fn generic_error(lang: Language) -> &'static str {
    match lang {
        Language::Ta => "பிழை",
        Language::En => "error",
    }
}

pub fn birth_failure(lang: Language, detail: &str) -> String {
    match lang {
        Language::Ta => format!("பிறந்த விவரங்களை பெற முடியவில்லை: {detail}"),
        Language::En => format!("Failed to fetch birth details: {detail}"),
    }
}

pub fn chart_failure(lang: Language, detail: &str) -> String {
    match lang {
        Language::Ta => format!("விளக்கப்படத்தை பெற முடியவில்லை: {detail}"),
        Language::En => format!("Failed to fetch chart: {detail}"),
    }
}

pub fn waitlist_failure(lang: Language) -> &'static str {
    match lang {
        Language::Ta => "காத்திருப்புப் பட்டியலில் சேர முடியவில்லை.",
        Language::En => "Unable to join the waitlist.",
    }
}

/// The localized phrase a quick-intent shortcut expands to before it is fed
/// through the normal submission path.
pub fn quick_intent_phrase(lang: Language, intent: &str) -> Option<&'static str> {
    let phrase = match (intent, lang) {
        ("birth-details", Language::Ta) => "பிறந்த விவரங்கள்",
        ("birth-details", Language::En) => "Birth details",
        ("kundli" | "rasi-chart", Language::Ta) => "ராசி விளக்கப்படம்",
        ("kundli" | "rasi-chart", Language::En) => "Rasi Chart",
        ("daily-rasi", Language::Ta) => "இன்றைய ராசி பலன்",
        ("daily-rasi", Language::En) => "Daily Rasi Palan",
        _ => return None,
    };
    Some(phrase)
}

/// Formats the multi-line birth summary. Only the fields present in the
/// response produce lines; an entirely empty response yields the header
/// alone.
pub fn birth_summary(lang: Language, details: &BirthDetails) -> String {
    let ta = lang == Language::Ta;
    let mut lines: Vec<String> = Vec::new();

    if let Some(n) = &details.nakshatra {
        let pada = n
            .pada
            .map(|p| format!(" (pada {p})"))
            .unwrap_or_default();
        lines.push(format!(
            "{}: {}{pada}",
            if ta { "நக்ஷத்திரம்" } else { "Nakshatra" },
            n.name
        ));
    }
    if let Some(cr) = &details.chandra_rasi {
        lines.push(format!(
            "{}: {}",
            if ta { "சந்திர ராசி" } else { "Chandra rasi" },
            cr.name
        ));
    }
    if let Some(sr) = &details.soorya_rasi {
        lines.push(format!(
            "{}: {}",
            if ta { "சூர்ய ராசி" } else { "Soorya rasi" },
            sr.name
        ));
    }
    if let Some(z) = &details.zodiac {
        lines.push(format!(
            "{}: {}",
            if ta { "சயன ராசி" } else { "Zodiac" },
            z.name
        ));
    }
    if let Some(add) = &details.additional_info {
        let extras = [
            (if ta { "தெய்வம்" } else { "Deity" }, &add.deity),
            (if ta { "கணம்" } else { "Gana" }, &add.ganam),
            (
                if ta { "மிருக யோனி" } else { "Animal sign" },
                &add.animal_sign,
            ),
            (if ta { "நிறம்" } else { "Color" }, &add.color),
            (if ta { "அக்ஷரங்கள்" } else { "Syllables" }, &add.syllables),
        ];
        for (label, value) in extras {
            if let Some(value) = value {
                lines.push(format!("{label}: {value}"));
            }
        }
    }

    let header = if ta {
        "பிறந்த விவரங்கள்:\n"
    } else {
        "Birth details:\n"
    };
    format!("{header}{}", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Nakshatra, NakshatraExtras, NamedBody};

    #[test]
    fn summary_renders_only_present_fields() {
        let details = BirthDetails {
            nakshatra: Some(Nakshatra {
                name: "Bharani".into(),
                pada: Some(2),
            }),
            chandra_rasi: Some(NamedBody {
                name: "Mesha".into(),
            }),
            soorya_rasi: None,
            zodiac: None,
            additional_info: Some(NakshatraExtras {
                deity: Some("Yama".into()),
                ..Default::default()
            }),
        };

        let summary = birth_summary(Language::En, &details);
        assert_eq!(
            summary,
            "Birth details:\nNakshatra: Bharani (pada 2)\nChandra rasi: Mesha\nDeity: Yama"
        );
        assert!(!summary.contains("Zodiac"));
    }

    #[test]
    fn summary_omits_missing_pada() {
        let details = BirthDetails {
            nakshatra: Some(Nakshatra {
                name: "Rohini".into(),
                pada: None,
            }),
            ..Default::default()
        };
        assert_eq!(
            birth_summary(Language::En, &details),
            "Birth details:\nNakshatra: Rohini"
        );
    }

    #[test]
    fn quick_intents_expand_to_localized_triggers() {
        assert_eq!(
            quick_intent_phrase(Language::En, "daily-rasi"),
            Some("Daily Rasi Palan")
        );
        assert_eq!(
            quick_intent_phrase(Language::Ta, "kundli"),
            Some("ராசி விளக்கப்படம்")
        );
        assert_eq!(quick_intent_phrase(Language::En, "unknown"), None);
    }
}
