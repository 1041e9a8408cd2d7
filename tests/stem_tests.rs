//! Stem tests: directions of chords and beam groups, lengths of slanted beams.

mod common;

use common::*;
use engraver::*;
use pretty_assertions::assert_eq;

fn directions(sheet: &Sheet, bar: usize, voice: VoiceId) -> Vec<StemDirection> {
    chords(sheet, bar, voice).iter().map(|c| c.stem_direction).collect()
}

#[test]
fn desired_direction_follows_the_middle_line() {
    let f = single_staff(1, None);
    let at = |pitches: &[i32]| {
        let mut chord = Chord::new(f.staff, Duration::Quarter);
        for &p in pitches {
            chord.add_note(p, 0);
        }
        desired_stem_direction(&f.sheet, 0, &chord, 0)
    };

    // treble staff: B4 sits on the middle line
    assert_eq!(at(&[6]), StemDirection::Down);
    assert_eq!(at(&[5]), StemDirection::Up);
    assert_eq!(at(&[10]), StemDirection::Down);
    assert_eq!(at(&[-2]), StemDirection::Up);
    // C4 with F5 centres below the middle line, E4 with A5 above it
    assert_eq!(at(&[0, 10]), StemDirection::Up);
    assert_eq!(at(&[2, 12]), StemDirection::Down);
}

#[test]
fn rests_and_missing_clefs_default_up() {
    let mut sheet = Sheet::new();
    let part = sheet.add_part("Voice");
    let staff = sheet.add_staff(part);
    sheet.add_bar();

    let high = Chord::new(staff, Duration::Quarter).with_note(12, 0);
    assert_eq!(desired_stem_direction(&sheet, 0, &high, 0), StemDirection::Up);

    sheet.add_staff_element(0, staff, StaffElement::clef(0, Clef::treble()));
    assert_eq!(desired_stem_direction(&sheet, 0, &high, 0), StemDirection::Down);
    let rest = Chord::rest(staff, Duration::Quarter);
    assert_eq!(desired_stem_direction(&sheet, 0, &rest, 0), StemDirection::Up);
}

#[test]
fn clef_change_inside_the_bar_applies_from_its_tick() {
    let mut f = single_staff(1, None);
    f.sheet
        .add_staff_element(0, f.staff, StaffElement::clef(HALF_LENGTH, Clef::bass()));
    // D4 is low on a treble staff and high on a bass staff
    let chord = Chord::new(f.staff, Duration::Quarter).with_note(1, 0);
    assert_eq!(desired_stem_direction(&f.sheet, 0, &chord, 0), StemDirection::Up);
    assert_eq!(desired_stem_direction(&f.sheet, 0, &chord, HALF_LENGTH), StemDirection::Down);
}

#[test]
fn beam_group_follows_the_majority() {
    let mut f = single_staff(1, Some((2, 4)));
    add_notes(&mut f.sheet, 0, f.staff, f.voice, &eighths(&[10, 10, -2, 10]));
    engrave_bar(&mut f.sheet, 0, 1.0);

    assert_eq!(directions(&f.sheet, 0, f.voice), vec![StemDirection::Down; 4]);
}

#[test]
fn beam_group_tie_keeps_the_first_chord_direction() {
    let mut f = single_staff(1, Some((2, 4)));
    add_notes(&mut f.sheet, 0, f.staff, f.voice, &eighths(&[-2, 10, 4, 10]));
    engrave_bar(&mut f.sheet, 0, 1.0);

    // 2/4 beams all four eighths; two want up, two want down
    assert_eq!(directions(&f.sheet, 0, f.voice), vec![StemDirection::Up; 4]);
}

#[test]
fn unbeamed_chords_keep_their_own_direction() {
    let mut f = single_staff(1, Some((4, 4)));
    add_notes(
        &mut f.sheet,
        0,
        f.staff,
        f.voice,
        &[
            (Duration::Quarter, Some(10)),
            (Duration::Quarter, Some(-2)),
            (Duration::Half, Some(8)),
        ],
    );
    engrave_bar(&mut f.sheet, 0, 1.0);

    use StemDirection::*;
    assert_eq!(directions(&f.sheet, 0, f.voice), vec![Down, Up, Down]);
}

#[test]
fn shared_staff_splits_voices_by_parity() {
    let mut f = single_staff(1, Some((4, 4)));
    let lower = f.sheet.add_voice(f.part);
    // the upper voice is low and the lower voice high, yet parity wins
    add_notes(&mut f.sheet, 0, f.staff, f.voice, &[(Duration::Whole, Some(-2))]);
    add_notes(&mut f.sheet, 0, f.staff, lower, &eighths(&[12, 12, 12, 12, 12, 12, 12, 12]));
    engrave_bar(&mut f.sheet, 0, 1.0);

    assert_eq!(directions(&f.sheet, 0, f.voice), vec![StemDirection::Up]);
    assert_eq!(directions(&f.sheet, 0, lower), vec![StemDirection::Down; 8]);
}

#[test]
fn voices_on_separate_staves_choose_freely() {
    let mut f = single_staff(1, Some((4, 4)));
    let bass = f.sheet.add_staff(f.part);
    let left = f.sheet.add_voice(f.part);
    f.sheet.add_staff_element(0, bass, StaffElement::clef(0, Clef::bass()));
    add_notes(&mut f.sheet, 0, f.staff, f.voice, &[(Duration::Whole, Some(12))]);
    add_notes(&mut f.sheet, 0, bass, left, &[(Duration::Whole, Some(-14))]);
    engrave_bar(&mut f.sheet, 0, 1.0);

    assert_eq!(directions(&f.sheet, 0, f.voice), vec![StemDirection::Down]);
    assert_eq!(directions(&f.sheet, 0, left), vec![StemDirection::Up]);
}

#[test]
fn outer_stems_reach_the_beam() {
    // C4 A4 F4 E4 in 2/4: all stems up, the beam runs from the A down to the E
    let mut f = single_staff(1, Some((2, 4)));
    add_notes(&mut f.sheet, 0, f.staff, f.voice, &eighths(&[0, 5, 3, 2]));
    engrave_bar(&mut f.sheet, 0, 1.0);

    assert_eq!(directions(&f.sheet, 0, f.voice), vec![StemDirection::Up; 4]);
    let lengths: Vec<f64> = chords(&f.sheet, 0, f.voice).iter().map(|c| c.stem_length).collect();
    let expected = [6.75, 3.5, 3.5, 3.5];
    for (got, want) in lengths.iter().zip(expected) {
        assert!((got - want).abs() < 1e-9, "{:?}", lengths);
    }
}

#[test]
fn beam_clears_every_stem_end() {
    let mut f = single_staff(1, Some((4, 4)));
    add_notes(&mut f.sheet, 0, f.staff, f.voice, &eighths(&[-3, 2, -1, 4, 3, -2, 1, 0]));
    engrave_bar(&mut f.sheet, 0, 1.0);

    let staff_top = f.sheet.staff_top(f.staff).unwrap_or_default();
    let spacing = DEFAULT_LINE_SPACING;
    let clef = Clef::treble();
    let chords = chords(&f.sheet, 0, f.voice);

    for group in [0..4, 4..8] {
        let (first, last) = (&chords[group.start], &chords[group.end - 1]);
        assert_eq!(first.stem_direction, StemDirection::Up);

        // beam line through the ends of the outer stems
        let end_y = |c: &Chord| {
            let top = c.notes.iter().map(|n| clef.pitch_to_line(n.pitch)).min().unwrap_or(4);
            staff_top + top as f64 * spacing / 2.0 - c.stem_length * spacing
        };
        let stem_x = |c: &Chord| c.x + c.beatline() + NOTE_HEAD_WIDTH;
        let slope = (end_y(last) - end_y(first)) / (stem_x(last) - stem_x(first));

        for c in &chords[group.clone()] {
            let beam_y = end_y(first) + slope * (stem_x(c) - stem_x(first));
            let needed = end_y(c);
            assert!(beam_y <= needed + 1e-6, "beam at {} misses stem end {}", beam_y, needed);
            assert!(c.stem_length >= c.desired_stem_length() - 1e-9);
        }
    }
}

#[test]
fn short_values_get_longer_stems() {
    let mut f = single_staff(1, None);
    add_notes(
        &mut f.sheet,
        0,
        f.staff,
        f.voice,
        &[(Duration::Sixteenth, Some(0)), (Duration::ThirtySecond, Some(0)), (Duration::SixtyFourth, Some(0))],
    );
    engrave_bar(&mut f.sheet, 0, 1.0);

    let lengths: Vec<f64> = chords(&f.sheet, 0, f.voice).iter().map(|c| c.stem_length).collect();
    assert_eq!(lengths, vec![3.5, 4.25, 5.0]);
}
