//! engraver: layout engine for music notation.
//!
//! Given a [`Sheet`] of bars, parts, staves and voices, the engraver decides
//! where everything goes: proportional spacing inside each bar, beam groups
//! along the meter, stem directions and beam slants, and how bars are packed
//! into staff systems on a page.
//!
//! # Example
//! ```
//! use engraver::*;
//!
//! let mut sheet = Sheet::new();
//! let part = sheet.add_part("Flute");
//! let staff = sheet.add_staff(part);
//! let voice = sheet.add_voice(part);
//! let bar = sheet.add_bar();
//! sheet.add_staff_element(bar, staff, StaffElement::clef(0, Clef::treble()));
//! sheet.add_staff_element(bar, staff, StaffElement::time_signature(0, TimeSignature::new(2, 4)));
//! for pitch in [0, 2, 4, 2] {
//!     sheet.add_chord(bar, voice, Chord::new(staff, Duration::Eighth).with_note(pitch, 0));
//! }
//!
//! let last_system = engrave_sheet(&mut sheet, 0, PageSize::unbounded(), true);
//! assert_eq!(last_system, 0);
//! assert!(sheet.bar(0).size >= 50.0);
//! ```

pub mod layout;
pub mod error;
pub mod model;

pub use layout::*;
pub use error::EngraveError;
pub use model::*;

/// Serialize a sheet, including any engraved layout, to pretty-printed JSON.
/// [`sheet_from_json`] reads the result back.
pub fn sheet_to_json(sheet: &Sheet) -> Result<String, EngraveError> {
    Ok(serde_json::to_string_pretty(sheet)?)
}

/// Load a sheet from JSON and check it with [`Sheet::validate`].
pub fn sheet_from_json(json: &str) -> Result<Sheet, EngraveError> {
    let sheet: Sheet = serde_json::from_str(json)?;
    sheet.validate()?;
    Ok(sheet)
}
