/// Language codes accepted by the speech and translation services.
pub const ALLOWED_LANGUAGE_CODES: [&str; 12] = [
    "en-IN", "hi-IN", "bn-IN", "kn-IN", "ml-IN", "mr-IN", "od-IN", "pa-IN", "ta-IN", "te-IN",
    "gu-IN", "unknown",
];

pub const DEFAULT_LANGUAGE: &str = "en-IN";
/// Requests automatic detection when transcribing.
pub const UNKNOWN_LANGUAGE: &str = "unknown";

/// Map user or provider input onto an allowed code.
///
/// Case-insensitive; `_` is accepted in place of `-`, a bare two-letter
/// code gets the `-IN` region, and `auto` means `unknown`.
pub fn normalize_language_code(input: &str) -> Option<&'static str> {
    let candidate = input.trim().replace('_', "-").to_lowercase();
    if candidate.is_empty() {
        return None;
    }
    if candidate == "auto" {
        return Some(UNKNOWN_LANGUAGE);
    }

    let with_region = if candidate.len() == 2 {
        format!("{candidate}-in")
    } else {
        candidate
    };

    ALLOWED_LANGUAGE_CODES
        .iter()
        .copied()
        .find(|code| code.to_lowercase() == with_region)
}

/// Whether answers for `target` need translating from English.
pub fn needs_translation(target: &str) -> bool {
    target != DEFAULT_LANGUAGE && target != UNKNOWN_LANGUAGE
}
