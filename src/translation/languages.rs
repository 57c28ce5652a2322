//! Language tags, display names and the interpreter instruction.

/// Languages the interpreter prompt is tuned for, as (tag, display name).
///
/// Tags outside this table are still accepted: they are used verbatim as
/// their own display name.
pub const SUPPORTED_LANGUAGES: &[(&str, &str)] = &[
    ("en-US", "English (US)"),
    ("es-US", "Spanish (US)"),
    ("fr-FR", "French"),
    ("de-DE", "German"),
    ("it-IT", "Italian"),
    ("pt-BR", "Portuguese (Brazil)"),
    ("ja-JP", "Japanese"),
    ("ko-KR", "Korean"),
    ("zh-CN", "Chinese (Simplified)"),
];

/// Human-readable name for `tag`, or `tag` itself when it isn't in the table.
pub fn display_name(tag: &str) -> &str {
    SUPPORTED_LANGUAGES
        .iter()
        .find(|(code, _)| *code == tag)
        .map(|(_, name)| *name)
        .unwrap_or(tag)
}

/// System instruction sent as the first content block of every session.
pub fn translation_instruction(source: &str, target: &str) -> String {
    format!(
        "You are a professional UN-style simultaneous interpreter.\n\
         Your task is to translate speech from {} to {}.\n\
         \n\
         Translation guidelines:\n\
         - Translate naturally and fluently, maintaining the speaker's intent and tone\n\
         - Use professional, diplomatic language appropriate for international settings\n\
         - Preserve meaning over literal word-for-word translation\n\
         - Speak clearly and at a natural pace\n\
         - Handle pauses and incomplete sentences gracefully\n\
         - If unsure about a term, use the most contextually appropriate translation\n\
         \n\
         Begin translating the incoming speech immediately.",
        display_name(source),
        display_name(target),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tags_resolve() {
        assert_eq!(display_name("en-US"), "English (US)");
        assert_eq!(display_name("zh-CN"), "Chinese (Simplified)");
    }

    #[test]
    fn test_unknown_tag_is_its_own_name() {
        assert_eq!(display_name("sw-KE"), "sw-KE");
        assert_eq!(display_name(""), "");
    }

    #[test]
    fn test_instruction_names_each_language_once() {
        for (source, _) in SUPPORTED_LANGUAGES {
            for (target, _) in SUPPORTED_LANGUAGES {
                if source == target {
                    continue;
                }
                let text = translation_instruction(source, target);
                assert_eq!(text.matches(display_name(source)).count(), 1, "{source} -> {target}");
                assert_eq!(text.matches(display_name(target)).count(), 1, "{source} -> {target}");
            }
        }
    }

    #[test]
    fn test_instruction_with_unrecognized_tags() {
        let text = translation_instruction("sw-KE", "nl-NL");
        assert_eq!(text.matches("sw-KE").count(), 1);
        assert_eq!(text.matches("nl-NL").count(), 1);
        assert!(text.contains("from sw-KE to nl-NL"));
    }
}
