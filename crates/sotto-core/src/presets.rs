//! Prompt presets for the transcription model.
//!
//! The prompt decides what the model does with a recording: plain
//! transcription, transcription plus a plan, or following spoken
//! instructions. The config stores a preset id so the table can evolve
//! without breaking old config files.

/// A named prompt the transcription request is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptPreset {
    pub id: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub prompt: &'static str,
}

/// All built-in presets, in display order. The first entry is the default.
pub const PROMPT_PRESETS: [PromptPreset; 3] = [
    PromptPreset {
        id: "transcribe-autodetect",
        label: "Transcribe (Autodetect languages)",
        description: "Produce a verbatim transcription of the audio with automatic language \
                      detection and a single clean paragraph result.",
        prompt: "You are an expert transcription engine. Produce a verbatim transcription of \
                 the supplied audio. Detect the language automatically and output the result \
                 as a single clean paragraph without speaker labels.",
    },
    PromptPreset {
        id: "transcribe-plan",
        label: "Transcribe and Plan (Add summary/action)",
        description: "Transcribe the recording, then create a concise summary or action plan \
                      with 'Transcription' and 'Plan' sections.",
        prompt: "Transcribe the supplied audio verbatim. After the transcription, add a \
                 section titled 'Plan' with bullet points summarizing next actions or key \
                 takeaways.",
    },
    PromptPreset {
        id: "instruction-assistant",
        label: "Instruction Assistant (Follow spoken commands)",
        description: "Follow the spoken request exactly, such as drafting responses or \
                      explaining topics; provide transcription only if requested.",
        prompt: "Listen carefully to the audio. Follow the spoken instructions precisely. If \
                 the speaker explicitly asks for a transcription, provide it; otherwise focus \
                 on delivering the requested output.",
    },
];

/// The preset used when the config names none.
pub fn default_preset() -> &'static PromptPreset {
    &PROMPT_PRESETS[0]
}

/// Look up a preset by id.
pub fn preset_by_id(id: &str) -> Option<&'static PromptPreset> {
    PROMPT_PRESETS.iter().find(|preset| preset.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_lookup() {
        let preset = preset_by_id("transcribe-plan").unwrap();
        assert_eq!(preset.label, "Transcribe and Plan (Add summary/action)");
        assert!(preset_by_id("does-not-exist").is_none());
    }

    #[test]
    fn test_default_preset_is_first() {
        assert_eq!(default_preset().id, PROMPT_PRESETS[0].id);
        assert_eq!(default_preset().id, "transcribe-autodetect");
    }
}
