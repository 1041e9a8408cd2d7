//! Beam grouping of short notes along the beat structure of the meter.

use crate::model::*;

/// Regroup the beams of one voice in one bar.
///
/// Does nothing when no time signature is active on the part's first staff.
pub fn rebeam_bar(sheet: &mut Sheet, part: usize, bar: usize, voice: VoiceId) {
    let beats = {
        let first_staff = match sheet.part(part).staves.first() {
            Some(s) => s.id,
            None => return,
        };
        match sheet.last_time_signature_change(first_staff, bar, 0) {
            Some(ts) => ts.beat_lengths(),
            None => return,
        }
    };
    if beats.is_empty() {
        return;
    }

    let elements = &mut sheet.bar_mut(bar).voice_bar_mut(voice).elements;
    for (i, chord) in elements.iter_mut().enumerate() {
        chord.reset_beams(i);
    }

    let count = elements.len();
    let mut next_beat = 0;
    let mut passed_beats = 0;
    let mut cur_time = 0;
    let mut beam_start: Option<(usize, i32)> = None;

    for i in 0..count {
        let (length, duration, is_rest) = {
            let c = &elements[i];
            (c.length(), c.duration, c.is_rest())
        };
        cur_time += length;

        if duration <= Duration::Eighth && beam_start.is_none() {
            beam_start = Some((i, cur_time - length));
        }

        let mut beat_end = beats[next_beat] + passed_beats;
        if cur_time >= beat_end || is_rest || duration > Duration::Eighth || i == count - 1 {
            // the current chord closes the group unless it cannot be beamed itself
            let last = if duration > Duration::Eighth || is_rest { i.checked_sub(1) } else { Some(i) };
            if let (Some((start, start_time)), Some(end)) = (beam_start, last) {
                if end > start {
                    beam_group(elements, start, end, start_time);
                }
            }

            beam_start = None;
            while cur_time >= beat_end {
                passed_beats += beats[next_beat];
                next_beat = (next_beat + 1) % beats.len();
                beat_end = passed_beats + beats[next_beat];
            }
        }
    }
}

/// Tick grid that decides the direction of a hook at a sub-beam level.
fn hook_factor(level: usize) -> i32 {
    NOTE_8_LENGTH >> (level - 1)
}

/// Join `start..=end` with a primary beam and lay out the sub-beams.
fn beam_group(elements: &mut [Chord], start: usize, end: usize, start_time: i32) {
    let mut open: [Option<(usize, i32)>; MAX_BEAM_LEVELS] = [None; MAX_BEAM_LEVELS];
    let mut beam_time = start_time;

    for j in start..=end {
        let beams = elements[j].beam_count().min(MAX_BEAM_LEVELS);
        for run in open.iter_mut().take(beams).skip(1) {
            if run.is_none() {
                *run = Some((j, beam_time));
            }
        }
        for level in beams.max(1)..MAX_BEAM_LEVELS {
            if let Some(run) = open[level].take() {
                close_sub_beam(elements, level, run, j - 1);
            }
        }

        elements[j].set_beam(0, j, start, end);
        beam_time += elements[j].length();
    }

    for level in 1..MAX_BEAM_LEVELS {
        if let Some(run) = open[level].take() {
            close_sub_beam(elements, level, run, end);
        }
    }
}

/// Finish a run of chords sharing the beam at `level`. A run of one chord
/// gets a hook pointing to the nearer side of the coarser beat grid.
fn close_sub_beam(elements: &mut [Chord], level: usize, (start, start_time): (usize, i32), end: usize) {
    if start == end {
        let factor = hook_factor(level);
        let end_time = start_time + elements[start].length();
        let grid_before = (start_time / factor) * factor;
        let grid_after = ((end_time + factor - 1) / factor) * factor;
        let beam_type = if start_time - grid_before < grid_after - end_time {
            BeamType::ForwardHook
        } else {
            BeamType::BackwardHook
        };
        elements[start].set_beam_with_type(level, start, end, beam_type);
    } else {
        for k in start..=end {
            elements[k].set_beam(level, k, start, end);
        }
    }
}
