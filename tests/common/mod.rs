//! Shared sheet builders for the integration tests.

#![allow(dead_code)]

use engraver::*;

pub struct Fixture {
    pub sheet: Sheet,
    pub part: usize,
    pub staff: StaffId,
    pub voice: VoiceId,
}

/// One part with one treble staff and one voice over `bars` empty bars.
/// The time signature, if any, is set in the first bar.
pub fn single_staff(bars: usize, time: Option<(i32, i32)>) -> Fixture {
    let mut sheet = Sheet::new();
    let part = sheet.add_part("Flute");
    let staff = sheet.add_staff(part);
    let voice = sheet.add_voice(part);
    for _ in 0..bars {
        sheet.add_bar();
    }
    if bars > 0 {
        sheet.add_staff_element(0, staff, StaffElement::clef(0, Clef::treble()));
        if let Some((beats, beat)) = time {
            sheet.add_staff_element(0, staff, StaffElement::time_signature(0, TimeSignature::new(beats, beat)));
        }
    }
    Fixture { sheet, part, staff, voice }
}

/// Append `(duration, pitch)` chords to a voice; `None` pitches are rests.
pub fn add_notes(sheet: &mut Sheet, bar: usize, staff: StaffId, voice: VoiceId, notes: &[(Duration, Option<i32>)]) {
    for &(duration, pitch) in notes {
        let chord = match pitch {
            Some(p) => Chord::new(staff, duration).with_note(p, 0),
            None => Chord::rest(staff, duration),
        };
        sheet.add_chord(bar, voice, chord);
    }
}

pub fn eighths(pitches: &[i32]) -> Vec<(Duration, Option<i32>)> {
    pitches.iter().map(|&p| (Duration::Eighth, Some(p))).collect()
}

pub fn chords(sheet: &Sheet, bar: usize, voice: VoiceId) -> Vec<Chord> {
    sheet.bar(bar).voice_bar(voice).map(|vb| vb.elements.clone()).unwrap_or_default()
}

pub fn beam_types(sheet: &Sheet, bar: usize, voice: VoiceId, level: usize) -> Vec<BeamType> {
    chords(sheet, bar, voice).iter().map(|c| c.beam_type(level)).collect()
}

/// A treble staff in 4/4 with `bars` bars of eight eighths each.
pub fn eighth_note_bars(bars: usize) -> Fixture {
    let mut f = single_staff(bars, Some((4, 4)));
    for bar in 0..bars {
        add_notes(&mut f.sheet, bar, f.staff, f.voice, &eighths(&[6, 7, 8, 7, 6, 5, 4, 5]));
    }
    f
}
