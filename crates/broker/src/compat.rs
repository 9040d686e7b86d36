//! Per-provider request adaptation and response repair.
//!
//! One profile per provider class. The request direction normalizes
//! content shapes and tool arrays before anything reaches an upstream; the
//! response direction fixes the shape drift providers exhibit (missing
//! `choices`, tool calls embedded in text, finish reasons that contradict
//! the content).

pub(crate) mod request;
pub(crate) mod response;

/// Substrings marking a provider id or model as backed by a Gemini
/// service even when it speaks the OpenAI protocol.
const GEMINI_BACKEND_HINTS: [&str; 3] = ["shuaihong", "gemini", "google"];

/// Whether an OpenAI-protocol provider is suspected to proxy a Gemini
/// backend, in which case Gemini's tool-name rules apply.
pub fn is_gemini_backed(provider_id: &str, model: &str) -> bool {
    let provider_id = provider_id.to_ascii_lowercase();
    let model = model.to_ascii_lowercase();

    GEMINI_BACKEND_HINTS
        .iter()
        .any(|hint| provider_id.contains(hint) || model.contains(hint))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_gemini_backends_by_provider_and_model() {
        assert!(is_gemini_backed("shuaihong-openai", "gpt-4"));
        assert!(is_gemini_backed("generic", "gemini-2-pro"));
        assert!(is_gemini_backed("google-proxy", "whatever"));
        assert!(is_gemini_backed("relay", "Gemini-Flash"));
        assert!(!is_gemini_backed("modelscope", "glm-4"));
    }
}
