use std::sync::OnceLock;

use regex::Regex;

pub const FINAL_RESULT_OPEN: &str = "<final_result>";
pub const FINAL_RESULT_CLOSE: &str = "</final_result>";

fn final_result_pattern() -> &'static Regex {
    static FINAL_RESULT_RE: OnceLock<Regex> = OnceLock::new();
    FINAL_RESULT_RE.get_or_init(|| {
        Regex::new(r"(?s)<final_result>(.*?)</final_result>")
            .expect("final_result regex should compile")
    })
}

/// Returns the trimmed, lowercased payload of the first `<final_result>` pair,
/// or an empty string when the model did not emit one.
pub fn extract_final_result(raw: &str) -> String {
    final_result_pattern()
        .captures(raw)
        .and_then(|captures| captures.get(1))
        .map(|payload| payload.as_str().trim().to_lowercase())
        .unwrap_or_default()
}
