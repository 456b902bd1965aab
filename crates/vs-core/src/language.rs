//! ISO 639 language code humanising for manifest labels.

/// Return a human-readable language name for an ISO 639-1/-2 code.
///
/// Unknown codes are returned unchanged; `und` and empty input map to an
/// empty string so callers can omit the attribute.
pub fn humanize(code: &str) -> String {
    let lower = code.trim().to_ascii_lowercase();
    let name = match lower.as_str() {
        "" | "und" => return String::new(),
        "en" | "eng" => "English",
        "fr" | "fre" | "fra" => "French",
        "de" | "ger" | "deu" => "German",
        "es" | "spa" => "Spanish",
        "it" | "ita" => "Italian",
        "pt" | "por" => "Portuguese",
        "nl" | "dut" | "nld" => "Dutch",
        "sv" | "swe" => "Swedish",
        "no" | "nor" | "nob" => "Norwegian",
        "da" | "dan" => "Danish",
        "fi" | "fin" => "Finnish",
        "pl" | "pol" => "Polish",
        "cs" | "cze" | "ces" => "Czech",
        "hu" | "hun" => "Hungarian",
        "ru" | "rus" => "Russian",
        "uk" | "ukr" => "Ukrainian",
        "el" | "gre" | "ell" => "Greek",
        "tr" | "tur" => "Turkish",
        "ar" | "ara" => "Arabic",
        "he" | "heb" => "Hebrew",
        "hi" | "hin" => "Hindi",
        "ja" | "jpn" => "Japanese",
        "ko" | "kor" => "Korean",
        "zh" | "chi" | "zho" => "Chinese",
        _ => return code.to_string(),
    };
    name.to_string()
}
