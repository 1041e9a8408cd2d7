//! Data model for a score that is laid out by the engraver.
//!
//! A [`Sheet`] holds bars (sequential in time) and parts (concurrent).
//! Each part owns its staves and voices; each bar owns the staff elements
//! (clefs, key and time signatures) and the per-voice chords that fall in
//! it. Staves and voices are referred to by stable handles so that bars and
//! chords never hold pointers back into their parents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EngraveError;

// ═══════════════════════════════════════════════════════════════════════
// Time units
// ═══════════════════════════════════════════════════════════════════════

/// Ticks of a 128th note. Chosen so that 3..10-tuplets divide evenly.
pub const NOTE_128_LENGTH: i32 = 1 * 2 * 3 * 4 * 5 * 7;
pub const NOTE_64_LENGTH: i32 = NOTE_128_LENGTH * 2;
pub const NOTE_32_LENGTH: i32 = NOTE_64_LENGTH * 2;
pub const NOTE_16_LENGTH: i32 = NOTE_32_LENGTH * 2;
pub const NOTE_8_LENGTH: i32 = NOTE_16_LENGTH * 2;
pub const QUARTER_LENGTH: i32 = NOTE_8_LENGTH * 2;
pub const HALF_LENGTH: i32 = QUARTER_LENGTH * 2;
pub const WHOLE_LENGTH: i32 = HALF_LENGTH * 2;
pub const BREVE_LENGTH: i32 = WHOLE_LENGTH * 2;

/// Maximum number of beam levels a chord can carry (8th up to 128th + 1).
pub const MAX_BEAM_LEVELS: usize = 6;

// ── Layout defaults ─────────────────────────────────────────────────
pub const DEFAULT_BAR_SIZE_FACTOR: f64 = 2.0;
pub const DEFAULT_LINE_SPACING: f64 = 5.0;
pub const DEFAULT_LINE_COUNT: usize = 5;
pub const DEFAULT_STAFF_SPACING: f64 = 60.0; // space above each staff
pub const DEFAULT_STEM_LENGTH: f64 = 3.5; // in line spacings
pub const STEM_LENGTH_PER_BEAM: f64 = 0.75; // for each beam beyond two

// ── Glyph widths ────────────────────────────────────────────────────
pub const CLEF_WIDTH: f64 = 13.0;
pub const KEY_ACCIDENTAL_WIDTH: f64 = 6.0;
pub const TIME_DIGIT_WIDTH: f64 = 8.0;
pub const NOTE_HEAD_WIDTH: f64 = 7.0;

/// Note value of a chord or rest, ordered from shortest to longest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Duration {
    HundredTwentyEighth,
    SixtyFourth,
    ThirtySecond,
    Sixteenth,
    Eighth,
    Quarter,
    Half,
    Whole,
    Breve,
}

impl Duration {
    /// Length in ticks, without dots.
    pub fn ticks(self) -> i32 {
        match self {
            Duration::HundredTwentyEighth => NOTE_128_LENGTH,
            Duration::SixtyFourth => NOTE_64_LENGTH,
            Duration::ThirtySecond => NOTE_32_LENGTH,
            Duration::Sixteenth => NOTE_16_LENGTH,
            Duration::Eighth => NOTE_8_LENGTH,
            Duration::Quarter => QUARTER_LENGTH,
            Duration::Half => HALF_LENGTH,
            Duration::Whole => WHOLE_LENGTH,
            Duration::Breve => BREVE_LENGTH,
        }
    }

    /// Number of beams (or flags) a note of this value carries.
    pub fn beam_count(self) -> usize {
        match self {
            Duration::HundredTwentyEighth => 5,
            Duration::SixtyFourth => 4,
            Duration::ThirtySecond => 3,
            Duration::Sixteenth => 2,
            Duration::Eighth => 1,
            _ => 0,
        }
    }
}

/// Length in ticks of a note value with the given number of dots.
pub fn duration_to_ticks(duration: Duration, dots: u8) -> i32 {
    let base = duration.ticks();
    let mut length = base;
    let mut extra = base;
    for _ in 0..dots {
        extra /= 2;
        length += extra;
    }
    length
}

// ═══════════════════════════════════════════════════════════════════════
// Handles and geometry
// ═══════════════════════════════════════════════════════════════════════

/// Stable handle of a staff, unique within a sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaffId(pub u32);

/// Stable handle of a voice, unique within a sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoiceId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Space available to the system packer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    #[serde(with = "unbounded_length")]
    pub width: f64,
    #[serde(with = "unbounded_length")]
    pub height: f64,
}

impl PageSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// A page on which everything fits on one staff system.
    pub fn unbounded() -> Self {
        Self { width: f64::INFINITY, height: f64::INFINITY }
    }
}

/// Lengths that may be unbounded. JSON has no infinity, so a non-finite
/// length is written as `null` and `null` reads back as `f64::INFINITY`.
mod unbounded_length {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(length: &f64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        Some(*length).filter(|l| l.is_finite()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Staff elements
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClefShape {
    G,
    F,
    C,
}

/// Clef definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clef {
    pub shape: ClefShape,
    /// Staff line carrying the reference pitch, counted from the bottom (1-based)
    pub line: i32,
    /// Octave transposition (e.g., -1 for an octave-lower treble clef)
    pub octave_change: i32,
}

impl Clef {
    pub fn new(shape: ClefShape, line: i32, octave_change: i32) -> Self {
        Self { shape, line, octave_change }
    }

    pub fn treble() -> Self {
        Self::new(ClefShape::G, 2, 0)
    }

    pub fn bass() -> Self {
        Self::new(ClefShape::F, 4, 0)
    }

    pub fn alto() -> Self {
        Self::new(ClefShape::C, 3, 0)
    }

    fn reference_pitch(&self) -> i32 {
        match self.shape {
            ClefShape::G => 4,
            ClefShape::F => -4,
            ClefShape::C => 0,
        }
    }

    fn base_line(&self) -> i32 {
        match self.shape {
            ClefShape::G => 14,
            ClefShape::F => 6,
            ClefShape::C => 10,
        }
    }

    /// Pitch of a staff position. Lines are counted in half-spaces from the
    /// top staff line (0 = top line, 8 = bottom line of a five-line staff).
    pub fn line_to_pitch(&self, line: i32) -> i32 {
        self.reference_pitch() + 10 - 2 * self.line - line + 7 * self.octave_change
    }

    /// Staff position of a pitch; inverse of [`Clef::line_to_pitch`].
    pub fn pitch_to_line(&self, pitch: i32) -> i32 {
        self.base_line() - 2 * self.line - (pitch - 7 * self.octave_change)
    }

    pub fn width(&self) -> f64 {
        CLEF_WIDTH
    }
}

/// Key signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeySignature {
    /// Number of sharps (positive) or flats (negative)
    pub accidentals: i32,
}

/// Pitch classes (0 = C) in the order sharps are added to a key signature.
const SHARP_ORDER: [i32; 7] = [3, 0, 4, 1, 5, 2, 6];

impl KeySignature {
    pub fn new(accidentals: i32) -> Self {
        Self { accidentals }
    }

    /// Accidental the key applies to notes of the given pitch.
    pub fn accidentals_for(&self, pitch: i32) -> i32 {
        let class = pitch.rem_euclid(7);
        let count = self.accidentals.unsigned_abs().min(7) as usize;
        if self.accidentals > 0 && SHARP_ORDER[..count].contains(&class) {
            1
        } else if self.accidentals < 0 && SHARP_ORDER.iter().rev().take(count).any(|&c| c == class) {
            -1
        } else {
            0
        }
    }

    pub fn width(&self) -> f64 {
        self.accidentals.unsigned_abs() as f64 * KEY_ACCIDENTAL_WIDTH
    }
}

/// Time signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSignature {
    /// Numerator (e.g., 3 in 3/4)
    pub beats: i32,
    /// Denominator (e.g., 4 in 3/4)
    pub beat: i32,
}

impl TimeSignature {
    pub fn new(beats: i32, beat: i32) -> Self {
        Self { beats, beat }
    }

    pub fn beat_length(&self) -> i32 {
        WHOLE_LENGTH / self.beat.max(1)
    }

    pub fn bar_length(&self) -> i32 {
        self.beats * self.beat_length()
    }

    /// Lengths in ticks of the beat groups beams may not cross.
    pub fn beat_lengths(&self) -> Vec<i32> {
        if self.beats <= 0 {
            return Vec::new();
        }
        let group = if self.beats % 3 == 0 {
            3
        } else if self.beat >= 8 {
            4
        } else if self.beat == 4 && self.beats % 2 == 0 {
            2
        } else {
            1
        };

        let mut lengths = Vec::new();
        let mut remaining = self.beats;
        while remaining > 0 {
            let n = remaining.min(group);
            lengths.push(n * self.beat_length());
            remaining -= n;
        }
        lengths
    }

    pub fn width(&self) -> f64 {
        let digits = |n: i32| n.to_string().len().max(1);
        digits(self.beats).max(digits(self.beat)) as f64 * TIME_DIGIT_WIDTH
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StaffElementKind {
    Clef(Clef),
    KeySignature(KeySignature),
    TimeSignature(TimeSignature),
}

/// A clef, key or time signature placed on one staff at a tick in a bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffElement {
    pub start_time: i32,
    pub kind: StaffElementKind,
    /// Horizontal position relative to the bar (computed)
    pub x: f64,
}

impl StaffElement {
    pub fn new(start_time: i32, kind: StaffElementKind) -> Self {
        Self { start_time, kind, x: 0.0 }
    }

    pub fn clef(start_time: i32, clef: Clef) -> Self {
        Self::new(start_time, StaffElementKind::Clef(clef))
    }

    pub fn key_signature(start_time: i32, key: KeySignature) -> Self {
        Self::new(start_time, StaffElementKind::KeySignature(key))
    }

    pub fn time_signature(start_time: i32, time: TimeSignature) -> Self {
        Self::new(start_time, StaffElementKind::TimeSignature(time))
    }

    /// Tie-break between elements sharing a tick: higher goes first.
    pub fn priority(&self) -> i32 {
        match self.kind {
            StaffElementKind::Clef(_) => 100,
            StaffElementKind::KeySignature(_) => 50,
            StaffElementKind::TimeSignature(_) => 0,
        }
    }

    pub fn width(&self) -> f64 {
        match &self.kind {
            StaffElementKind::Clef(c) => c.width(),
            StaffElementKind::KeySignature(k) => k.width(),
            StaffElementKind::TimeSignature(t) => t.width(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Voice elements
// ═══════════════════════════════════════════════════════════════════════

/// A single notehead within a chord.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Diatonic scale step; 0 is middle C, independent of clef
    pub pitch: i32,
    /// Chromatic alteration: -2..=2
    pub accidentals: i32,
    pub start_tie: bool,
    /// Whether the accidental has to be printed (computed)
    pub draw_accidentals: bool,
}

impl Note {
    pub fn new(pitch: i32, accidentals: i32) -> Self {
        Self { pitch, accidentals, start_tie: false, draw_accidentals: false }
    }
}

/// Width of the glyph printed for an alteration.
pub fn accidental_width(accidentals: i32) -> f64 {
    match accidentals {
        -2 => 10.0,
        2 => 7.0,
        _ => 6.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StemDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeamType {
    Start,
    Continue,
    End,
    Flag,
    ForwardHook,
    BackwardHook,
}

/// One beam level of a chord. `start` and `end` are element indices
/// within the chord's voice bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beam {
    pub start: usize,
    pub end: usize,
    pub beam_type: BeamType,
}

/// A chord (or a rest when it has no notes) in one voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chord {
    pub staff: StaffId,
    pub duration: Duration,
    pub dots: u8,
    pub notes: Vec<Note>,
    /// Horizontal position relative to the bar (computed)
    pub x: f64,
    pub stem_direction: StemDirection,
    /// Stem length in staff line spacings (computed)
    pub stem_length: f64,
    /// One entry per beam level, `beam_count()` long once beamed (computed)
    pub beams: Vec<Beam>,
}

impl Chord {
    pub fn new(staff: StaffId, duration: Duration) -> Self {
        Self {
            staff,
            duration,
            dots: 0,
            notes: Vec::new(),
            x: 0.0,
            stem_direction: StemDirection::Up,
            stem_length: 0.0,
            beams: Vec::new(),
        }
    }

    pub fn rest(staff: StaffId, duration: Duration) -> Self {
        Self::new(staff, duration)
    }

    pub fn with_dots(mut self, dots: u8) -> Self {
        self.dots = dots;
        self
    }

    pub fn with_note(mut self, pitch: i32, accidentals: i32) -> Self {
        self.add_note(pitch, accidentals);
        self
    }

    /// Add a note, keeping notes sorted by pitch. Adding an existing pitch
    /// replaces its accidental.
    pub fn add_note(&mut self, pitch: i32, accidentals: i32) {
        match self.notes.binary_search_by_key(&pitch, |n| n.pitch) {
            Ok(i) => self.notes[i].accidentals = accidentals,
            Err(i) => self.notes.insert(i, Note::new(pitch, accidentals)),
        }
    }

    pub fn is_rest(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn length(&self) -> i32 {
        duration_to_ticks(self.duration, self.dots)
    }

    pub fn beam_count(&self) -> usize {
        self.duration.beam_count()
    }

    pub fn beam(&self, level: usize) -> Option<&Beam> {
        self.beams.get(level)
    }

    pub fn beam_type(&self, level: usize) -> BeamType {
        self.beam(level).map_or(BeamType::Flag, |b| b.beam_type)
    }

    /// Index of the chord starting the beam at `level`; `own_index` when
    /// the chord is not beamed at that level.
    pub fn beam_start(&self, level: usize, own_index: usize) -> usize {
        self.beam(level).map_or(own_index, |b| b.start)
    }

    pub fn beam_end(&self, level: usize, own_index: usize) -> usize {
        self.beam(level).map_or(own_index, |b| b.end)
    }

    /// Drop all beams and flag every beam level on its own.
    pub(crate) fn reset_beams(&mut self, own_index: usize) {
        self.beams = (0..self.beam_count().min(MAX_BEAM_LEVELS))
            .map(|_| Beam { start: own_index, end: own_index, beam_type: BeamType::Flag })
            .collect();
    }

    /// Join the beam at `level` to the run `start..=end`.
    pub(crate) fn set_beam(&mut self, level: usize, own_index: usize, start: usize, end: usize) {
        let beam_type = if start == end {
            BeamType::Flag
        } else if own_index == start {
            BeamType::Start
        } else if own_index == end {
            BeamType::End
        } else {
            BeamType::Continue
        };
        self.set_beam_with_type(level, start, end, beam_type);
    }

    pub(crate) fn set_beam_with_type(&mut self, level: usize, start: usize, end: usize, beam_type: BeamType) {
        if let Some(beam) = self.beams.get_mut(level) {
            *beam = Beam { start, end, beam_type };
        }
    }

    /// Two notes a scale step apart force one notehead to the other side of the stem.
    pub fn has_second(&self) -> bool {
        self.notes.windows(2).any(|w| w[1].pitch - w[0].pitch == 1)
    }

    /// Distance from the chord's left edge to its notehead column.
    pub fn beatline(&self) -> f64 {
        let mut offset = 0.0;
        let accidental = self
            .notes
            .iter()
            .filter(|n| n.draw_accidentals)
            .map(|n| accidental_width(n.accidentals))
            .fold(0.0_f64, f64::max);
        if accidental > 0.0 {
            offset += accidental + 2.0;
        }
        if self.has_second() && self.stem_direction == StemDirection::Down {
            offset += NOTE_HEAD_WIDTH;
        }
        offset
    }

    /// Stem length (in line spacings) of an unbeamed chord.
    pub fn desired_stem_length(&self) -> f64 {
        let beams = self.beam_count();
        DEFAULT_STEM_LENGTH + STEM_LENGTH_PER_BEAM * beams.saturating_sub(2) as f64
    }
}

/// The chords of one voice within one bar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceBar {
    pub elements: Vec<Chord>,
}

impl VoiceBar {
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn total_length(&self) -> i32 {
        self.elements.iter().map(Chord::length).sum()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Structure
// ═══════════════════════════════════════════════════════════════════════

/// A five-line staff belonging to one part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Staff {
    pub id: StaffId,
    /// Vertical space above this staff
    pub spacing: f64,
    pub line_count: usize,
    pub line_spacing: f64,
}

impl Staff {
    fn new(id: StaffId) -> Self {
        Self {
            id,
            spacing: DEFAULT_STAFF_SPACING,
            line_count: DEFAULT_LINE_COUNT,
            line_spacing: DEFAULT_LINE_SPACING,
        }
    }

    pub fn height(&self) -> f64 {
        self.line_count.saturating_sub(1) as f64 * self.line_spacing
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voice {
    pub id: VoiceId,
}

/// A musical part (one instrument or singer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub name: String,
    pub short_name: Option<String>,
    pub staves: Vec<Staff>,
    pub voices: Vec<Voice>,
}

impl Part {
    pub fn staff_count(&self) -> usize {
        self.staves.len()
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn staff(&self, idx: usize) -> &Staff {
        &self.staves[idx]
    }

    pub fn owns_staff(&self, staff: StaffId) -> bool {
        self.staves.iter().any(|s| s.id == staff)
    }
}

/// A single bar of music across all parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Staff elements per staff, sorted by (tick, descending priority)
    pub staff_elements: BTreeMap<StaffId, Vec<StaffElement>>,
    /// Chords per voice, created lazily
    pub voice_bars: BTreeMap<VoiceId, VoiceBar>,
    /// Notehead widths per shortest unit
    pub size_factor: f64,
    pub position: Point,
    /// Content width at the last engraving (computed)
    pub size: f64,
    /// Content width at scale 1 (computed)
    pub natural_size: f64,
    /// Width of the tick-0 staff elements (computed)
    pub prefix: f64,
    /// Where the prefix is drawn (computed)
    pub prefix_position: Point,
    /// Scale factor of the last engraving, `None` before the first one
    pub engraved_scale: Option<f64>,
}

impl Default for Bar {
    fn default() -> Self {
        Self {
            staff_elements: BTreeMap::new(),
            voice_bars: BTreeMap::new(),
            size_factor: DEFAULT_BAR_SIZE_FACTOR,
            position: Point::default(),
            size: 0.0,
            natural_size: 0.0,
            prefix: 0.0,
            prefix_position: Point::default(),
            engraved_scale: None,
        }
    }
}

impl Bar {
    pub fn staff_elements(&self, staff: StaffId) -> &[StaffElement] {
        self.staff_elements.get(&staff).map_or(&[], |v| v.as_slice())
    }

    pub fn voice_bar(&self, voice: VoiceId) -> Option<&VoiceBar> {
        self.voice_bars.get(&voice)
    }

    pub fn voice_bar_mut(&mut self, voice: VoiceId) -> &mut VoiceBar {
        self.voice_bars.entry(voice).or_default()
    }

    /// Insert a staff element, keeping the (tick, descending priority) order.
    /// Elements with equal keys keep their insertion order.
    pub fn add_staff_element(&mut self, staff: StaffId, element: StaffElement) {
        let list = self.staff_elements.entry(staff).or_default();
        let key = (element.start_time, -element.priority());
        let idx = list.partition_point(|e| (e.start_time, -e.priority()) <= key);
        list.insert(idx, element);
    }

    /// Move the bar; unless its prefix was already placed elsewhere the
    /// prefix moves along, directly before the content.
    pub fn set_position(&mut self, position: Point, move_prefix: bool) {
        self.position = position;
        if move_prefix {
            self.prefix_position = Point::new(position.x - self.prefix, position.y);
        }
    }
}

/// One horizontal line of all staves, holding a contiguous run of bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffSystem {
    pub top: f64,
    pub height: f64,
    pub first_bar: usize,
    pub indent: f64,
    /// Infinite when packed on an unbounded page
    #[serde(with = "unbounded_length")]
    pub line_width: f64,
    /// Clefs restated at the start of the system
    pub clefs: Vec<(StaffId, Clef)>,
}

/// Location of a voice: its part, its index within the part, and its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceSlot {
    pub part: usize,
    pub index: usize,
    pub id: VoiceId,
}

/// A complete sheet of music.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub parts: Vec<Part>,
    pub bars: Vec<Bar>,
    staff_systems: Vec<StaffSystem>,
    next_staff_id: u32,
    next_voice_id: u32,
}

impl Default for Sheet {
    fn default() -> Self {
        Self::new()
    }
}

impl Sheet {
    /// Create a new empty sheet.
    pub fn new() -> Self {
        Self {
            parts: Vec::new(),
            bars: Vec::new(),
            staff_systems: Vec::new(),
            next_staff_id: 0,
            next_voice_id: 0,
        }
    }

    // ── Parts, staves, voices ───────────────────────────────────────

    pub fn add_part(&mut self, name: impl Into<String>) -> usize {
        self.parts.push(Part {
            name: name.into(),
            short_name: None,
            staves: Vec::new(),
            voices: Vec::new(),
        });
        self.staff_systems.clear();
        self.parts.len() - 1
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn part(&self, idx: usize) -> &Part {
        &self.parts[idx]
    }

    pub fn part_mut(&mut self, idx: usize) -> &mut Part {
        &mut self.parts[idx]
    }

    /// Add a staff to a part. Invalidates the staff systems.
    pub fn add_staff(&mut self, part: usize) -> StaffId {
        let id = StaffId(self.next_staff_id);
        self.next_staff_id += 1;
        self.parts[part].staves.push(Staff::new(id));
        self.staff_systems.clear();
        id
    }

    /// Add a voice to a part. Invalidates the staff systems.
    pub fn add_voice(&mut self, part: usize) -> VoiceId {
        let id = VoiceId(self.next_voice_id);
        self.next_voice_id += 1;
        self.parts[part].voices.push(Voice { id });
        self.staff_systems.clear();
        id
    }

    /// All staves in vertical order.
    pub fn staves(&self) -> impl Iterator<Item = &Staff> {
        self.parts.iter().flat_map(|p| p.staves.iter())
    }

    pub fn staff(&self, id: StaffId) -> Option<&Staff> {
        self.staves().find(|s| s.id == id)
    }

    /// All voices in part order.
    pub fn voices(&self) -> Vec<VoiceSlot> {
        self.parts
            .iter()
            .enumerate()
            .flat_map(|(part, p)| {
                p.voices
                    .iter()
                    .enumerate()
                    .map(move |(index, v)| VoiceSlot { part, index, id: v.id })
            })
            .collect()
    }

    pub fn voice_part(&self, voice: VoiceId) -> Option<usize> {
        self.parts
            .iter()
            .position(|p| p.voices.iter().any(|v| v.id == voice))
    }

    /// Vertical offset of a staff's top line within a staff system.
    pub fn staff_top(&self, id: StaffId) -> Option<f64> {
        let mut top = 0.0;
        for staff in self.staves() {
            top += staff.spacing;
            if staff.id == id {
                return Some(top);
            }
            top += staff.height();
        }
        None
    }

    /// Height of all staves stacked, including the space above each.
    pub fn staves_height(&self) -> f64 {
        self.staves().map(|s| s.spacing + s.height()).sum()
    }

    // ── Bars ────────────────────────────────────────────────────────

    pub fn add_bar(&mut self) -> usize {
        self.bars.push(Bar::default());
        self.bars.len() - 1
    }

    pub fn bar_count(&self) -> usize {
        self.bars.len()
    }

    pub fn bar(&self, idx: usize) -> &Bar {
        &self.bars[idx]
    }

    pub fn bar_mut(&mut self, idx: usize) -> &mut Bar {
        &mut self.bars[idx]
    }

    pub fn add_staff_element(&mut self, bar: usize, staff: StaffId, element: StaffElement) {
        self.bars[bar].add_staff_element(staff, element);
    }

    /// Append a chord to a voice in a bar, returning its element index.
    pub fn add_chord(&mut self, bar: usize, voice: VoiceId, chord: Chord) -> usize {
        let vb = self.bars[bar].voice_bar_mut(voice);
        vb.elements.push(chord);
        vb.elements.len() - 1
    }

    // ── Staff context lookups ───────────────────────────────────────

    fn last_staff_element<'a, T>(
        &'a self,
        staff: StaffId,
        bar: usize,
        time: i32,
        select: impl Fn(&'a StaffElementKind) -> Option<&'a T>,
    ) -> Option<&'a T> {
        for b in (0..=bar.min(self.bars.len().saturating_sub(1))).rev() {
            for element in self.bars.get(b)?.staff_elements(staff).iter().rev() {
                if b == bar && element.start_time > time {
                    continue;
                }
                if let Some(found) = select(&element.kind) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Clef active on a staff at a tick of a bar.
    pub fn last_clef_change(&self, staff: StaffId, bar: usize, time: i32) -> Option<&Clef> {
        self.last_staff_element(staff, bar, time, |k| match k {
            StaffElementKind::Clef(c) => Some(c),
            _ => None,
        })
    }

    pub fn last_key_signature_change(&self, staff: StaffId, bar: usize, time: i32) -> Option<&KeySignature> {
        self.last_staff_element(staff, bar, time, |k| match k {
            StaffElementKind::KeySignature(ks) => Some(ks),
            _ => None,
        })
    }

    pub fn last_time_signature_change(&self, staff: StaffId, bar: usize, time: i32) -> Option<&TimeSignature> {
        self.last_staff_element(staff, bar, time, |k| match k {
            StaffElementKind::TimeSignature(ts) => Some(ts),
            _ => None,
        })
    }

    // ── Staff systems ───────────────────────────────────────────────

    pub fn staff_system_count(&self) -> usize {
        self.staff_systems.len()
    }

    /// Truncate (or, with 0, invalidate) the cached staff systems.
    pub fn set_staff_system_count(&mut self, count: usize) {
        self.staff_systems.truncate(count);
    }

    pub fn staff_system(&self, idx: usize) -> Option<&StaffSystem> {
        self.staff_systems.get(idx)
    }

    pub fn staff_systems(&self) -> &[StaffSystem] {
        &self.staff_systems
    }

    /// Staff system `idx`, creating it and any missing predecessors.
    pub fn staff_system_mut(&mut self, idx: usize) -> &mut StaffSystem {
        let height = self.staves_height();
        while self.staff_systems.len() <= idx {
            let top = self.staff_systems.last().map_or(0.0, |s| s.top + s.height);
            self.staff_systems.push(StaffSystem {
                top,
                height,
                first_bar: 0,
                indent: 0.0,
                line_width: 0.0,
                clefs: Vec::new(),
            });
        }
        &mut self.staff_systems[idx]
    }

    // ── Validation ──────────────────────────────────────────────────

    /// Check the invariants the engraver relies on.
    pub fn validate(&self) -> Result<(), EngraveError> {
        for (bar_idx, bar) in self.bars.iter().enumerate() {
            for (&staff, elements) in &bar.staff_elements {
                if self.staff(staff).is_none() {
                    return Err(EngraveError::UnknownStaff { bar: bar_idx, staff });
                }
                for element in elements {
                    if let StaffElementKind::TimeSignature(ts) = &element.kind {
                        if ts.beats <= 0 || ts.beat <= 0 || (ts.beat as u32).count_ones() != 1 {
                            return Err(EngraveError::InvalidTimeSignature {
                                bar: bar_idx,
                                beats: ts.beats,
                                beat: ts.beat,
                            });
                        }
                    }
                }
            }

            for (&voice, vb) in &bar.voice_bars {
                let part = self
                    .voice_part(voice)
                    .ok_or(EngraveError::UnknownVoice { bar: bar_idx, voice })?;
                for (element, chord) in vb.elements.iter().enumerate() {
                    if self.staff(chord.staff).is_none() {
                        return Err(EngraveError::UnknownStaff { bar: bar_idx, staff: chord.staff });
                    }
                    if !self.parts[part].owns_staff(chord.staff) {
                        return Err(EngraveError::ForeignStaff { bar: bar_idx, voice, staff: chord.staff });
                    }
                    if let Some(note) = chord.notes.iter().find(|n| !(-2..=2).contains(&n.accidentals)) {
                        return Err(EngraveError::InvalidAccidental {
                            bar: bar_idx,
                            element,
                            accidentals: note.accidentals,
                        });
                    }
                    for (level, beam) in chord.beams.iter().enumerate() {
                        if beam.start > beam.end || beam.end >= vb.elements.len() {
                            return Err(EngraveError::InvalidBeam { bar: bar_idx, element, level });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
