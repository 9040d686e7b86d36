//! Environment toggles.
//!
//! Every `RCC_*` switch is read exactly once at startup into a [`Toggles`]
//! value that is passed by handle. Request-time code never consults the
//! process environment.

/// Runtime feature switches read from `RCC_*` environment variables.
///
/// An absent variable means feature-default. A value of `false`, `0` or
/// `off` disables the switch; anything else enables it.
#[derive(Debug, Clone)]
pub struct Toggles {
    /// `RCC_DEBUG`: raise log verbosity to debug.
    pub debug: bool,
    /// `RCC_VERBOSE`: raise log verbosity to trace.
    pub verbose: bool,
    /// `RCC_UNIFIED_PREPROCESSING`: run the compatibility stage. On unless
    /// explicitly disabled with `false`.
    pub unified_preprocessing: bool,
    /// `RCC_PREPROCESSING_DEBUG`: log every compatibility repair.
    pub preprocessing_debug: bool,
    /// `RCC_FORCE_ALL_INPUTS`: run request adaptation even for bodies that
    /// already look well-formed.
    pub force_all_inputs: bool,
    /// `RCC_CACHE_PREPROCESSING`: enable the pipeline stage cache.
    pub cache_preprocessing: bool,
    /// `RCC_STRICT_FINISH_REASON`: treat an explicit `unknown` finish
    /// reason as an error instead of synthesizing one.
    pub strict_finish_reason: bool,
    /// `RCC_PARSER_DEBUG`: log format detection decisions.
    pub parser_debug: bool,
    /// Per-repair switches.
    pub patches: PatchToggles,
}

/// Per-repair switches of the form `RCC_PATCHES_*_FIX`. All default on.
#[derive(Debug, Clone)]
pub struct PatchToggles {
    /// `RCC_PATCHES_MISSING_CHOICES_FIX`: synthesize a `choices` array when
    /// an OpenAI-protocol upstream omits it.
    pub missing_choices: bool,
    /// `RCC_PATCHES_LMSTUDIO_FIX`: peel LM Studio channel markers into tool
    /// calls.
    pub lmstudio: bool,
    /// `RCC_PATCHES_TEXT_TOOL_CALL_FIX`: scan text blocks for embedded tool
    /// call syntax.
    pub text_tool_call: bool,
    /// `RCC_PATCHES_FINISH_REASON_FIX`: force the finish reason to tool use
    /// when tool calls are present.
    pub finish_reason: bool,
}

impl Toggles {
    /// Read all switches from the process environment.
    pub fn from_env() -> Self {
        Self {
            debug: flag("RCC_DEBUG", false),
            verbose: flag("RCC_VERBOSE", false),
            unified_preprocessing: flag("RCC_UNIFIED_PREPROCESSING", true),
            preprocessing_debug: flag("RCC_PREPROCESSING_DEBUG", false),
            force_all_inputs: flag("RCC_FORCE_ALL_INPUTS", false),
            cache_preprocessing: flag("RCC_CACHE_PREPROCESSING", false),
            strict_finish_reason: flag("RCC_STRICT_FINISH_REASON", false),
            parser_debug: flag("RCC_PARSER_DEBUG", false),
            patches: PatchToggles {
                missing_choices: flag("RCC_PATCHES_MISSING_CHOICES_FIX", true),
                lmstudio: flag("RCC_PATCHES_LMSTUDIO_FIX", true),
                text_tool_call: flag("RCC_PATCHES_TEXT_TOOL_CALL_FIX", true),
                finish_reason: flag("RCC_PATCHES_FINISH_REASON_FIX", true),
            },
        }
    }
}

impl Default for Toggles {
    fn default() -> Self {
        Self {
            debug: false,
            verbose: false,
            unified_preprocessing: true,
            preprocessing_debug: false,
            force_all_inputs: false,
            cache_preprocessing: false,
            strict_finish_reason: false,
            parser_debug: false,
            patches: PatchToggles {
                missing_choices: true,
                lmstudio: true,
                text_tool_call: true,
                finish_reason: true,
            },
        }
    }
}

fn flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => !matches!(value.trim().to_ascii_lowercase().as_str(), "false" | "0" | "off"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_feature_defaults() {
        let toggles = Toggles::default();

        assert!(toggles.unified_preprocessing);
        assert!(!toggles.strict_finish_reason);
        assert!(toggles.patches.missing_choices);
        assert!(toggles.patches.finish_reason);
    }
}
