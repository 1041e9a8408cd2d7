//! Layout: computes the engraving of a [`Sheet`](crate::model::Sheet).
//!
//! All passes work in place on the model: chord and staff element
//! positions, beams, stem directions and lengths, bar sizes and prefixes,
//! and the staff systems bars are packed into. Nothing here draws.

mod constants;
mod simultanity;
mod spacing;
mod beaming;
mod stems;
mod systems;

pub use beaming::rebeam_bar;
pub use simultanity::{collect_simultanities, ElementRef, Simultanities, Simultanity};
pub use spacing::{engrave_bar, engrave_bars};
pub use stems::desired_stem_direction;
pub use systems::engrave_sheet;
