//! Error types for loading and validating a sheet.
//!
//! The engraving passes themselves cannot fail; these errors only come out
//! of [`Sheet::validate`](crate::model::Sheet::validate) and the JSON helpers.

use thiserror::Error;

use crate::model::{StaffId, VoiceId};

#[derive(Debug, Error)]
pub enum EngraveError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bar {bar} references unknown staff {staff:?}")]
    UnknownStaff { bar: usize, staff: StaffId },

    #[error("bar {bar} holds chords for unknown voice {voice:?}")]
    UnknownVoice { bar: usize, voice: VoiceId },

    /// A chord sits on a staff that belongs to another part than its voice
    #[error("voice {voice:?} in bar {bar} places a chord on staff {staff:?} of another part")]
    ForeignStaff { bar: usize, voice: VoiceId, staff: StaffId },

    #[error("bar {bar} has an invalid time signature {beats}/{beat}")]
    InvalidTimeSignature { bar: usize, beats: i32, beat: i32 },

    #[error("chord {element} in bar {bar} has an accidental of {accidentals} (expected -2..=2)")]
    InvalidAccidental { bar: usize, element: usize, accidentals: i32 },

    #[error("chord {element} in bar {bar} has beam level {level} pointing outside its voice")]
    InvalidBeam { bar: usize, element: usize, level: usize },
}
