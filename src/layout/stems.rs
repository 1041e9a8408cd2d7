//! Stem directions of chords and beam groups, and the slant of beams.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::*;
use super::constants::*;

// ═══════════════════════════════════════════════════════════════════════
// Directions
// ═══════════════════════════════════════════════════════════════════════

/// Stem direction a chord would take on its own: down when the middle of
/// its notes sits on or above the middle staff line, up otherwise.
///
/// Rests and chords without an active clef default to up.
pub fn desired_stem_direction(sheet: &Sheet, bar: usize, chord: &Chord, time: i32) -> StemDirection {
    match note_lines(sheet, bar, chord, time) {
        Some((top, bottom)) if (top + bottom) as f64 * 0.5 <= MIDDLE_LINE => StemDirection::Down,
        _ => StemDirection::Up,
    }
}

/// Topmost and bottommost staff line of a chord's notes.
fn note_lines(sheet: &Sheet, bar: usize, chord: &Chord, time: i32) -> Option<(i32, i32)> {
    let clef = sheet.last_clef_change(chord.staff, bar, time)?;
    let lines = chord.notes.iter().map(|n| clef.pitch_to_line(n.pitch));
    Some((lines.clone().min()?, lines.max()?))
}

fn majority(desired: &[StemDirection], fallback: StemDirection) -> StemDirection {
    let up = desired.iter().filter(|&&d| d == StemDirection::Up).count();
    let down = desired.len() - up;
    if up > down {
        StemDirection::Up
    } else if down > up {
        StemDirection::Down
    } else {
        fallback
    }
}

/// Chord start ticks of a voice bar.
fn onsets(elements: &[Chord]) -> Vec<i32> {
    elements
        .iter()
        .scan(0, |time, c| {
            let start = *time;
            *time += c.length();
            Some(start)
        })
        .collect()
}

/// Resolve the stem direction of every chord in a bar.
///
/// A staff shared by several voices alternates directions by voice index;
/// otherwise beamed chords follow the majority of their group and the rest
/// take their own desired direction.
pub(super) fn assign_stem_directions(sheet: &mut Sheet, bar_idx: usize) {
    let voices = sheet.voices();
    let bar = sheet.bar(bar_idx);

    let mut staff_voices: BTreeMap<StaffId, usize> = BTreeMap::new();
    for v in &voices {
        if let Some(vb) = bar.voice_bar(v.id) {
            let staves: BTreeSet<StaffId> = vb.elements.iter().map(|c| c.staff).collect();
            for staff in staves {
                *staff_voices.entry(staff).or_insert(0) += 1;
            }
        }
    }

    let mut updates: Vec<(VoiceId, Vec<StemDirection>)> = Vec::new();
    for v in &voices {
        let vb = match bar.voice_bar(v.id) {
            Some(vb) => vb,
            None => continue,
        };
        let desired: Vec<StemDirection> = vb
            .elements
            .iter()
            .zip(onsets(&vb.elements))
            .map(|(c, time)| desired_stem_direction(sheet, bar_idx, c, time))
            .collect();
        let by_voice = if v.index % 2 == 1 { StemDirection::Down } else { StemDirection::Up };

        let mut resolved: Vec<StemDirection> = Vec::with_capacity(desired.len());
        for (j, c) in vb.elements.iter().enumerate() {
            let shared = staff_voices.get(&c.staff).copied().unwrap_or(0) > 1;
            let direction = match c.beam_type(0) {
                BeamType::Continue | BeamType::End => {
                    resolved.get(c.beam_start(0, j)).copied().unwrap_or(desired[j])
                }
                _ if shared => by_voice,
                BeamType::Start => {
                    let end = c.beam_end(0, j).min(desired.len() - 1);
                    majority(&desired[j..=end], desired[j])
                }
                _ => desired[j],
            };
            resolved.push(direction);
        }
        updates.push((v.id, resolved));
    }

    let bar = sheet.bar_mut(bar_idx);
    for (voice, directions) in updates {
        for (chord, direction) in bar.voice_bar_mut(voice).elements.iter_mut().zip(directions) {
            chord.stem_direction = direction;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Beam slant
// ═══════════════════════════════════════════════════════════════════════

/// Vertical context of the staff a chord is drawn on.
struct StaffContext {
    top: f64,
    line_spacing: f64,
}

fn staff_context(sheet: &Sheet, staff: StaffId) -> StaffContext {
    StaffContext {
        top: sheet.staff_top(staff).unwrap_or(0.0),
        line_spacing: sheet.staff(staff).map_or(DEFAULT_LINE_SPACING, |s| s.line_spacing),
    }
}

fn stem_x(chord: &Chord) -> f64 {
    let head = chord.x + chord.beatline();
    match chord.stem_direction {
        StemDirection::Up => head + NOTE_HEAD_WIDTH,
        StemDirection::Down => head,
    }
}

/// Y of the free end of a stem of the given length (in line spacings).
fn stem_end_y(lines: Option<(i32, i32)>, direction: StemDirection, length: f64, staff: &StaffContext) -> f64 {
    let (top, bottom) = lines.unwrap_or((MIDDLE_LINE as i32, MIDDLE_LINE as i32));
    let half = staff.line_spacing / 2.0;
    match direction {
        StemDirection::Up => staff.top + top as f64 * half - length * staff.line_spacing,
        StemDirection::Down => staff.top + bottom as f64 * half + length * staff.line_spacing,
    }
}

/// The line through two of the points that lies on or above all points
/// with the least total distance to them, as `(slope, intercept)`.
/// Ties keep the first pair in index order.
fn best_beam_line(points: &[Point]) -> (f64, f64) {
    let mut best: Option<(f64, f64, f64)> = None;
    for a in 0..points.len() {
        for b in a + 1..points.len() {
            let dx = points[b].x - points[a].x;
            if dx.abs() < SLANT_EPSILON {
                continue;
            }
            let k = (points[b].y - points[a].y) / dx;
            let l = points[a].y - points[a].x * k;

            let mut error = 0.0;
            let mut valid = true;
            for p in points {
                let y = k * p.x + l;
                if y < p.y - SLANT_EPSILON {
                    valid = false;
                    break;
                }
                error += y - p.y;
            }
            if valid && best.map_or(true, |(e, _, _)| error < e) {
                best = Some((error, k, l));
            }
        }
    }

    match best {
        Some((_, k, l)) => (k, l),
        None => (0.0, points.iter().map(|p| p.y).fold(0.0, f64::max)),
    }
}

/// Reset stem lengths and lengthen the outer stems of every beam group so
/// that a straight beam clears all stem ends.
pub(super) fn fit_beam_slants(sheet: &mut Sheet, bar_idx: usize) {
    let mut updates: Vec<(VoiceId, usize, f64)> = Vec::new();

    for v in sheet.voices() {
        let vb = match sheet.bar(bar_idx).voice_bar(v.id) {
            Some(vb) => vb,
            None => continue,
        };
        let times = onsets(&vb.elements);

        for (i, c) in vb.elements.iter().enumerate() {
            updates.push((v.id, i, c.desired_stem_length()));
        }
        for (i, c) in vb.elements.iter().enumerate() {
            if c.beam_type(0) != BeamType::Start {
                continue;
            }

            let end = c.beam_end(0, i).min(vb.elements.len() - 1);
            let group: Vec<usize> = (i..=end)
                .filter(|&j| vb.elements[j].beam_start(0, j) == i)
                .collect();
            let last = match group.last() {
                Some(&last) if last != i => last,
                _ => continue,
            };

            let mut points: Vec<Point> = group
                .iter()
                .map(|&j| {
                    let chord = &vb.elements[j];
                    let staff = staff_context(sheet, chord.staff);
                    let lines = note_lines(sheet, bar_idx, chord, times[j]);
                    Point::new(
                        stem_x(chord),
                        stem_end_y(lines, chord.stem_direction, chord.desired_stem_length(), &staff),
                    )
                })
                .collect();

            // relative to the first stem end, with "more stem" pointing up
            let origin = points[0];
            for p in &mut points {
                p.x -= origin.x;
                p.y -= origin.y;
                if c.stem_direction == StemDirection::Up {
                    p.y = -p.y;
                }
            }
            let (k, l) = best_beam_line(&points);

            let start_spacing = staff_context(sheet, c.staff).line_spacing;
            updates.push((v.id, i, c.desired_stem_length() + l / start_spacing));

            let end_chord = &vb.elements[last];
            let end_point = points[points.len() - 1];
            let extra = k * end_point.x + l - end_point.y;
            let end_spacing = staff_context(sheet, end_chord.staff).line_spacing;
            updates.push((v.id, last, end_chord.desired_stem_length() + extra / end_spacing));
        }
    }

    // later entries for the same chord win
    let bar = sheet.bar_mut(bar_idx);
    for (voice, element, length) in updates {
        bar.voice_bar_mut(voice).elements[element].stem_length = length;
    }
}
