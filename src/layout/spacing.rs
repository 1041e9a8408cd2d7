//! Horizontal layout of a single bar.
//!
//! Engraving a bar runs, in order: beaming of every voice, accidental
//! display, stem directions, proportional spacing of the simultanities
//! (together with the bar's staff elements and prefix), and finally the
//! beam slants, which need the final chord positions.

use std::collections::BTreeMap;

use log::trace;

use crate::model::*;
use super::beaming::rebeam_bar;
use super::constants::*;
use super::simultanity::collect_simultanities;
use super::stems::{assign_stem_directions, fit_beam_slants};

/// Lay out one bar at the given scale (1.0 = natural width).
pub fn engrave_bar(sheet: &mut Sheet, bar_idx: usize, size_factor: f64) {
    for voice in sheet.voices() {
        rebeam_bar(sheet, voice.part, bar_idx, voice.id);
    }
    update_accidentals(sheet, bar_idx);
    assign_stem_directions(sheet, bar_idx);
    layout_bar(sheet, bar_idx, size_factor);
    fit_beam_slants(sheet, bar_idx);

    let bar = sheet.bar(bar_idx);
    trace!(
        "engraved bar {} at scale {:.4}: size {:.2}, prefix {:.2}",
        bar_idx,
        size_factor,
        bar.size,
        bar.prefix
    );
}

/// Engrave `first..=last` and return the summed `size + prefix`.
pub fn engrave_bars(sheet: &mut Sheet, first: usize, last: usize, size_factor: f64) -> f64 {
    let mut width = 0.0;
    for i in first..=last {
        engrave_bar(sheet, i, size_factor);
        let bar = sheet.bar(i);
        width += bar.size + bar.prefix;
    }
    width
}

// ═══════════════════════════════════════════════════════════════════════
// Accidentals
// ═══════════════════════════════════════════════════════════════════════

/// Decide per note whether its accidental is printed: it is when it differs
/// from what the key signature, or an earlier note of the same pitch on the
/// same staff in this bar, implies.
fn update_accidentals(sheet: &mut Sheet, bar_idx: usize) {
    // (staff, time, voice order, voice, element)
    let mut order: Vec<(StaffId, i32, usize, VoiceId, usize)> = Vec::new();
    let bar = sheet.bar(bar_idx);
    for (voice_order, v) in sheet.voices().iter().enumerate() {
        if let Some(vb) = bar.voice_bar(v.id) {
            let mut time = 0;
            for (element, chord) in vb.elements.iter().enumerate() {
                order.push((chord.staff, time, voice_order, v.id, element));
                time += chord.length();
            }
        }
    }
    order.sort_by_key(|&(staff, time, voice_order, _, element)| (staff, time, voice_order, element));

    let mut keys: BTreeMap<StaffId, Option<KeySignature>> = BTreeMap::new();
    let mut current: BTreeMap<(StaffId, i32), i32> = BTreeMap::new();
    let mut updates: Vec<(VoiceId, usize, Vec<bool>)> = Vec::with_capacity(order.len());

    for &(staff, _, _, voice, element) in &order {
        let key = keys
            .entry(staff)
            .or_insert_with(|| sheet.last_key_signature_change(staff, bar_idx, 0).cloned());
        let chord = match bar.voice_bar(voice) {
            Some(vb) => &vb.elements[element],
            None => continue,
        };
        let draw = chord
            .notes
            .iter()
            .map(|note| {
                let implied = current
                    .get(&(staff, note.pitch))
                    .copied()
                    .unwrap_or_else(|| key.as_ref().map_or(0, |k| k.accidentals_for(note.pitch)));
                current.insert((staff, note.pitch), note.accidentals);
                note.accidentals != implied
            })
            .collect();
        updates.push((voice, element, draw));
    }

    let bar = sheet.bar_mut(bar_idx);
    for (voice, element, draw) in updates {
        let chord = &mut bar.voice_bar_mut(voice).elements[element];
        for (note, draw) in chord.notes.iter_mut().zip(draw) {
            note.draw_accidentals = draw;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Spacing
// ═══════════════════════════════════════════════════════════════════════

/// Place the tick-0 staff elements in columns of equal priority and return
/// the prefix width (0 when there are none).
fn layout_prefix(bar: &mut Bar) -> f64 {
    let mut priorities: Vec<i32> = bar
        .staff_elements
        .values()
        .flatten()
        .filter(|e| e.start_time == 0)
        .map(StaffElement::priority)
        .collect();
    if priorities.is_empty() {
        return 0.0;
    }
    priorities.sort_unstable_by(|a, b| b.cmp(a));
    priorities.dedup();

    let mut x = 0.0;
    for priority in priorities {
        let column = x + STAFF_ELEMENT_GAP;
        let mut width: f64 = 0.0;
        for element in bar.staff_elements.values_mut().flatten() {
            if element.start_time == 0 && element.priority() == priority {
                element.x = column;
                width = width.max(element.width());
            }
        }
        x = column + width;
    }

    let prefix = x + PREFIX_PADDING;
    for element in bar.staff_elements.values_mut().flatten() {
        if element.start_time == 0 {
            element.x -= prefix;
        }
    }
    prefix
}

/// Proportional spacing of the bar's simultanities, interleaved with the
/// staff elements that start inside the bar.
fn layout_bar(sheet: &mut Sheet, bar_idx: usize, size_factor: f64) {
    let mut sims = collect_simultanities(sheet, bar_idx);
    let bar = sheet.bar_mut(bar_idx);

    bar.prefix = layout_prefix(bar);

    // staff elements inside the bar, in (tick, priority) order across staves
    let mut inner: Vec<(i32, i32, StaffId, usize)> = bar
        .staff_elements
        .iter()
        .flat_map(|(&staff, elements)| {
            elements
                .iter()
                .enumerate()
                .filter(|(_, e)| e.start_time > 0)
                .map(move |(i, e)| (e.start_time, -e.priority(), staff, i))
        })
        .collect();
    inner.sort();
    let mut inner = inner.into_iter().peekable();

    let shortest = sims.shortest_note.min(NOTE_8_LENGTH);
    let base_factor = bar.size_factor * size_factor - (shortest as f64 / WHOLE_LENGTH as f64).log2();

    let mut curx = CONTENT_START;
    for sim in &mut sims.list {
        while let Some((_, _, staff, i)) = inner.next_if(|e| e.0 <= sim.start_time) {
            if let Some(element) = bar.staff_elements.get_mut(&staff).and_then(|list| list.get_mut(i)) {
                element.x = curx;
                curx += element.width() + STAFF_ELEMENT_GAP;
            }
        }

        let scale = (sim.duration as f64 / sim.min_chord_duration as f64).min(1.0);
        let space = scale * ((sim.duration as f64 / WHOLE_LENGTH as f64).log2() + base_factor);
        // close onsets at small scales would otherwise step backwards
        sim.space = space.max(0.0);

        for r in &sim.elements {
            if let Some(chord) = bar.voice_bars.get_mut(&r.voice).and_then(|vb| vb.elements.get_mut(r.element)) {
                chord.x = curx - chord.beatline();
            }
        }
        curx += sim.space * SPACE_UNIT;
    }

    // elements after the last onset
    for (_, _, staff, i) in inner {
        if let Some(element) = bar.staff_elements.get_mut(&staff).and_then(|list| list.get_mut(i)) {
            element.x = curx;
            curx += element.width() + STAFF_ELEMENT_GAP;
        }
    }

    bar.size = curx.max(MIN_BAR_SIZE);
    bar.engraved_scale = Some(size_factor);
    if size_factor == 1.0 {
        bar.natural_size = bar.size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_staff() -> (Sheet, StaffId, VoiceId) {
        let mut sheet = Sheet::new();
        let part = sheet.add_part("Flute");
        let staff = sheet.add_staff(part);
        let voice = sheet.add_voice(part);
        sheet.add_bar();
        (sheet, staff, voice)
    }

    #[test]
    fn empty_bar_takes_minimum_width() {
        let (mut sheet, _, _) = single_staff();
        engrave_bar(&mut sheet, 0, 1.0);
        let bar = sheet.bar(0);
        assert_eq!(bar.size, MIN_BAR_SIZE);
        assert_eq!(bar.prefix, 0.0);
        assert_eq!(bar.natural_size, MIN_BAR_SIZE);
        assert_eq!(bar.engraved_scale, Some(1.0));
    }

    #[test]
    fn prefix_columns_follow_priority() {
        let (mut sheet, staff, _) = single_staff();
        sheet.add_staff_element(0, staff, StaffElement::time_signature(0, TimeSignature::new(3, 4)));
        sheet.add_staff_element(0, staff, StaffElement::clef(0, Clef::treble()));
        sheet.add_staff_element(0, staff, StaffElement::key_signature(0, KeySignature::new(2)));

        engrave_bar(&mut sheet, 0, 1.0);
        let bar = sheet.bar(0);

        // clef at 15, key at 15+13+15, time at 43+12+15; prefix ends 5 after
        let expected_prefix = 70.0 + 8.0 + PREFIX_PADDING;
        assert!((bar.prefix - expected_prefix).abs() < 1e-9);
        let xs: Vec<f64> = bar.staff_elements(staff).iter().map(|e| e.x).collect();
        assert_eq!(xs, vec![15.0 - expected_prefix, 43.0 - expected_prefix, 70.0 - expected_prefix]);
    }

    #[test]
    fn mid_bar_clef_pushes_following_chords() {
        let (mut sheet, staff, voice) = single_staff();
        sheet.add_staff_element(0, staff, StaffElement::clef(0, Clef::treble()));
        for _ in 0..2 {
            sheet.add_chord(0, voice, Chord::new(staff, Duration::Half).with_note(2, 0));
        }
        engrave_bar(&mut sheet, 0, 1.0);
        let plain_second = sheet.bar(0).voice_bar(voice).map(|vb| vb.elements[1].x);

        sheet.add_staff_element(0, staff, StaffElement::clef(HALF_LENGTH, Clef::bass()));
        engrave_bar(&mut sheet, 0, 1.0);
        let bar = sheet.bar(0);
        let clef_x = bar.staff_elements(staff)[1].x;
        let second = bar.voice_bar(voice).map(|vb| vb.elements[1].x);

        assert_eq!(second, plain_second.map(|x| x + CLEF_WIDTH + STAFF_ELEMENT_GAP));
        assert!(clef_x > bar.voice_bar(voice).map_or(0.0, |vb| vb.elements[0].x));
    }

    #[test]
    fn key_signature_and_bar_accidentals() {
        let (mut sheet, staff, voice) = single_staff();
        sheet.add_staff_element(0, staff, StaffElement::clef(0, Clef::treble()));
        sheet.add_staff_element(0, staff, StaffElement::key_signature(0, KeySignature::new(1)));
        // F# (in key), F natural, F natural again, F#
        for acc in [1, 0, 0, 1] {
            sheet.add_chord(0, voice, Chord::new(staff, Duration::Quarter).with_note(3, acc));
        }
        engrave_bar(&mut sheet, 0, 1.0);

        let drawn: Vec<bool> = sheet
            .bar(0)
            .voice_bar(voice)
            .map(|vb| vb.elements.iter().map(|c| c.notes[0].draw_accidentals).collect())
            .unwrap_or_default();
        assert_eq!(drawn, vec![false, true, false, true]);
    }

    #[test]
    fn shorter_notes_get_less_space() {
        let (mut sheet, staff, voice) = single_staff();
        sheet.add_chord(0, voice, Chord::new(staff, Duration::Sixteenth).with_note(0, 0));
        sheet.add_chord(0, voice, Chord::new(staff, Duration::Eighth).with_note(0, 0));
        sheet.add_chord(0, voice, Chord::new(staff, Duration::Quarter).with_note(0, 0));
        sheet.add_chord(0, voice, Chord::new(staff, Duration::Half).with_note(0, 0));
        engrave_bar(&mut sheet, 0, 1.0);

        let xs: Vec<f64> = sheet
            .bar(0)
            .voice_bar(voice)
            .map(|vb| vb.elements.iter().map(|c| c.x).collect())
            .unwrap_or_default();
        let gaps: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.windows(2).all(|g| g[0] < g[1]), "gaps {:?}", gaps);
    }

    #[test]
    fn close_onsets_never_move_backwards() {
        let mut sheet = Sheet::new();
        let part = sheet.add_part("Piano");
        let staff = sheet.add_staff(part);
        let upper = sheet.add_voice(part);
        let lower = sheet.add_voice(part);
        sheet.add_bar();
        // onsets 0, 8th (upper), dotted 8th (lower)
        sheet.add_chord(0, upper, Chord::new(staff, Duration::Eighth).with_note(4, 0));
        sheet.add_chord(0, upper, Chord::new(staff, Duration::Eighth).with_dots(1).with_note(4, 0));
        sheet.add_chord(0, lower, Chord::new(staff, Duration::Eighth).with_dots(1).with_note(-3, 0));
        sheet.add_chord(0, lower, Chord::new(staff, Duration::Eighth).with_note(-3, 0));

        let second_onsets = |sheet: &Sheet| {
            let x = |voice| sheet.bar(0).voice_bar(voice).map_or(f64::NAN, |vb| vb.elements[1].x);
            (x(upper), x(lower))
        };

        engrave_bar(&mut sheet, 0, 1.0);
        let (a, b) = second_onsets(&sheet);
        assert!((b - a - SPACE_UNIT / 3.0).abs() < 1e-9, "{} then {}", a, b);

        // at a quarter of the natural scale the formula goes negative
        engrave_bar(&mut sheet, 0, 0.25);
        let (a, b) = second_onsets(&sheet);
        assert_eq!(a, b);
    }
}
