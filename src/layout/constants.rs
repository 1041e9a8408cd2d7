//! Shared constants for the engraver (all horizontal values in layout units).

// ── Bar spacing ─────────────────────────────────────────────────────
pub(super) const SPACE_UNIT: f64 = 7.0; // one notehead width per unit of space
pub(super) const CONTENT_START: f64 = 15.0; // x of the first simultanity
pub(super) const STAFF_ELEMENT_GAP: f64 = 15.0; // before each clef/key/time signature
pub(super) const PREFIX_PADDING: f64 = 5.0;
pub(super) const MIN_BAR_SIZE: f64 = 50.0;

// ── Stems ───────────────────────────────────────────────────────────
pub(super) const MIDDLE_LINE: f64 = 4.0; // half-spaces from the top line
pub(super) const SLANT_EPSILON: f64 = 1e-9;

// ── System packing ──────────────────────────────────────────────────
pub(super) const SYSTEM_INDENT_GAP: f64 = 15.0;
pub(super) const SCALE_TOLERANCE: f64 = 1e-4;
pub(super) const MAX_SEARCH_STEPS: usize = 32;
pub(super) const INITIAL_MAX_SCALE: f64 = 2.0;
