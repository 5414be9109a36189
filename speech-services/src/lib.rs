pub mod language;
pub mod transcript_answer;
pub mod transcription;
pub mod translation;

pub use transcript_answer::answer_from_transcript;
pub use transcription::{AudioClip, SarvamTranscriber, TranscriptionProvider, TranscriptionResponse};
pub use translation::{SarvamTranslator, TranslationProvider};
