//! Merging the voices of a bar into one time-ordered list of onsets.

use crate::model::*;

/// A chord referenced by its voice and its index within the voice bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementRef {
    pub voice: VoiceId,
    pub element: usize,
}

/// Everything that starts at the same tick across all voices of a bar.
#[derive(Debug, Clone, PartialEq)]
pub struct Simultanity {
    pub start_time: i32,
    /// Ticks until the next simultanity (for the last one, its longest element)
    pub duration: i32,
    /// Length of the shortest chord still sounding right after `start_time`
    pub min_chord_duration: i32,
    /// Horizontal space in notehead widths (filled in by the spacing pass)
    pub space: f64,
    pub elements: Vec<ElementRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Simultanities {
    pub list: Vec<Simultanity>,
    /// Shortest element length in the bar, `i32::MAX` for an empty bar
    pub shortest_note: i32,
}

/// Walk every voice of a bar in parallel, grouping chords by onset.
pub fn collect_simultanities(sheet: &Sheet, bar_idx: usize) -> Simultanities {
    let bar = sheet.bar(bar_idx);
    let voices: Vec<(VoiceId, &[Chord])> = sheet
        .voices()
        .iter()
        .map(|v| {
            let elements = bar.voice_bar(v.id).map_or(&[][..], |vb| vb.elements.as_slice());
            (v.id, elements)
        })
        .collect();

    let mut next_time = vec![0i32; voices.len()];
    let mut next_index = vec![0usize; voices.len()];
    let mut shortest_note = i32::MAX;
    let mut list: Vec<Simultanity> = Vec::new();

    loop {
        let earliest = voices
            .iter()
            .enumerate()
            .filter(|(i, (_, elements))| next_index[*i] < elements.len())
            .map(|(i, _)| next_time[i])
            .min();
        let time = match earliest {
            Some(t) => t,
            None => break,
        };

        let mut sim = Simultanity {
            start_time: time,
            duration: 0,
            min_chord_duration: i32::MAX,
            space: 0.0,
            elements: Vec::new(),
        };
        for (i, (voice, elements)) in voices.iter().enumerate() {
            if next_index[i] < elements.len() && next_time[i] == time {
                let length = elements[next_index[i]].length();
                sim.elements.push(ElementRef { voice: *voice, element: next_index[i] });
                next_time[i] += length;
                shortest_note = shortest_note.min(length);
                next_index[i] += 1;
            }
        }

        // shortest chord that is still sounding at this instant
        for (i, (_, elements)) in voices.iter().enumerate() {
            if next_index[i] > 0 && next_time[i] > time {
                sim.min_chord_duration = sim.min_chord_duration.min(elements[next_index[i] - 1].length());
            }
        }

        list.push(sim);
    }

    for i in 1..list.len() {
        list[i - 1].duration = list[i].start_time - list[i - 1].start_time;
    }
    if let Some(last) = list.last_mut() {
        last.duration = last
            .elements
            .iter()
            .filter_map(|r| bar.voice_bar(r.voice).map(|vb| vb.elements[r.element].length()))
            .max()
            .unwrap_or(0);
    }

    Simultanities { list, shortest_note }
}
