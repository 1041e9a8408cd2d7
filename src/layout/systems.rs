//! Breaking a sheet into staff systems.
//!
//! Bars are laid out at their natural width until the next one would
//! overflow the line. The run collected so far is then scaled so it fills
//! the line exactly, and the next system starts with an indent large enough
//! to restate the clefs and key signatures.

use log::debug;

use crate::model::*;
use super::constants::*;
use super::spacing::{engrave_bar, engrave_bars};

/// Indent needed to restate the clefs and key signatures active at the
/// start of `bar`, with the clefs to draw.
fn system_indent(sheet: &Sheet, bar: usize) -> (f64, Vec<(StaffId, Clef)>) {
    let mut indent: f64 = 0.0;
    let mut clefs = Vec::new();
    for staff in sheet.staves() {
        let mut width = 0.0;
        if let Some(clef) = sheet.last_clef_change(staff.id, bar, 0) {
            width += clef.width() + SYSTEM_INDENT_GAP;
            clefs.push((staff.id, clef.clone()));
        }
        if let Some(key) = sheet.last_key_signature_change(staff.id, bar, 0) {
            width += key.width() + SYSTEM_INDENT_GAP;
        }
        indent = indent.max(width);
    }
    (indent, clefs)
}

/// Width a run of bars takes on a line at the given scale: the bars and
/// their prefixes, without a prefix already drawn on the previous system,
/// plus the next bar's prefix drawn at the end of this one.
fn run_width(sheet: &mut Sheet, first: usize, last: usize, scale: f64, carried: f64, trailing: f64) -> f64 {
    engrave_bars(sheet, first, last, scale) - carried + trailing
}

/// Largest scale (within the search tolerance) at which the run still fits.
fn fit_scale(sheet: &mut Sheet, first: usize, last: usize, target: f64, carried: f64, trailing: f64) -> f64 {
    let width = |sheet: &mut Sheet, scale: f64| run_width(sheet, first, last, scale, carried, trailing);

    let mut min_factor = 1.0;
    let mut steps = 0;
    while width(sheet, min_factor) > target && steps < MAX_SEARCH_STEPS {
        min_factor /= 2.0;
        steps += 1;
    }

    let mut max_factor = if min_factor < 1.0 { min_factor * 2.0 } else { INITIAL_MAX_SCALE };
    steps = 0;
    while width(sheet, max_factor) <= target && steps < MAX_SEARCH_STEPS {
        min_factor = max_factor;
        max_factor *= 2.0;
        steps += 1;
    }

    while max_factor - min_factor > SCALE_TOLERANCE {
        let mid = (min_factor + max_factor) / 2.0;
        if width(sheet, mid) > target {
            max_factor = mid;
        } else {
            min_factor = mid;
        }
    }
    min_factor
}

/// Lay out all bars from the first bar of `first_system` onwards into staff
/// systems on a page of the given size.
///
/// With `do_engrave_bars` every bar is engraved afresh; otherwise only bars
/// not currently at their natural scale are. Bar positions are relative to
/// the page `first_system` opens. Returns the index of the last system that
/// fits on the page.
pub fn engrave_sheet(sheet: &mut Sheet, first_system: usize, page: PageSize, do_engrave_bars: bool) -> usize {
    let first_system = first_system.min(sheet.staff_system_count().saturating_sub(1));
    let first_bar = if first_system == 0 { 0 } else { sheet.staff_system_mut(first_system).first_bar };
    let bar_count = sheet.bar_count();

    for i in first_bar..bar_count {
        if do_engrave_bars || sheet.bar(i).engraved_scale != Some(1.0) {
            engrave_bar(sheet, i, 1.0);
        }
    }

    let page_top = sheet.staff_system_mut(0).top;
    let (mut indent, top) = {
        let system = sheet.staff_system_mut(first_system);
        system.first_bar = first_bar;
        system.line_width = page.width - system.indent;
        (system.indent, system.top)
    };
    let mut line_width = page.width - indent;
    // vertical positions are relative to the page `first_system` opens
    let delta_y = top - page_top;
    let mut p = Point::new(0.0, top - delta_y);

    let mut prev_prefix_placed = false;
    if first_bar > 0 && first_bar < bar_count {
        p.x = indent - sheet.bar(first_bar).prefix;
        prev_prefix_placed = true;
    }

    let mut cur_system = first_system;
    let mut last_start = first_bar;
    let mut run_carries_prefix = prev_prefix_placed;
    let mut last_system = None;

    for i in first_bar..bar_count {
        let mut prefix_placed = prev_prefix_placed;
        prev_prefix_placed = false;

        let (natural, prefix) = {
            let bar = sheet.bar(i);
            (bar.natural_size, bar.prefix)
        };

        if i > last_start && p.x + natural + prefix - indent > line_width {
            let carried = if run_carries_prefix { sheet.bar(last_start).prefix } else { 0.0 };
            let scale = fit_scale(sheet, last_start, i - 1, line_width, carried, prefix);
            let used = engrave_bars(sheet, last_start, i - 1, scale) - carried + prefix;
            debug!(
                "staff system {}: bars {}..={} at scale {:.4}, width {:.2} of {:.2}",
                cur_system,
                last_start,
                i - 1,
                scale,
                used,
                line_width
            );

            let mut sp = {
                let bar = sheet.bar(last_start);
                Point::new(bar.position.x - bar.prefix, bar.position.y)
            };
            for j in last_start..i {
                let bar = sheet.bar_mut(j);
                let move_prefix = !(j == last_start && run_carries_prefix);
                bar.set_position(Point::new(sp.x + bar.prefix, sp.y), move_prefix);
                sp.x += bar.size + bar.prefix;
            }
            // the next bar's prefix closes this line
            sheet.bar_mut(i).prefix_position = sp;
            prefix_placed = true;

            cur_system += 1;

            let (new_indent, clefs) = system_indent(sheet, i);
            indent = new_indent;
            line_width = page.width - indent;
            let (top, height) = {
                let system = sheet.staff_system_mut(cur_system);
                system.first_bar = i;
                system.indent = indent;
                system.line_width = line_width;
                system.clefs = clefs;
                (system.top, system.height)
            };
            p = Point::new(indent - prefix, top - delta_y);

            if p.y + height > page.height {
                debug!("page full after staff system {}", cur_system - 1);
                last_system = Some(cur_system - 1);
                sheet.bar_mut(i).set_position(Point::new(p.x + prefix, p.y), false);
                break;
            }
            last_start = i;
            run_carries_prefix = true;
        }

        let bar = sheet.bar_mut(i);
        bar.set_position(Point::new(p.x + bar.prefix, p.y), !prefix_placed);
        p.x += bar.size + bar.prefix;
    }

    sheet.set_staff_system_count(cur_system + 1);
    last_system.unwrap_or(cur_system)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indent_covers_widest_staff() {
        let mut sheet = Sheet::new();
        let part = sheet.add_part("Piano");
        let upper = sheet.add_staff(part);
        let lower = sheet.add_staff(part);
        sheet.add_bar();
        sheet.add_staff_element(0, upper, StaffElement::clef(0, Clef::treble()));
        sheet.add_staff_element(0, lower, StaffElement::clef(0, Clef::bass()));
        sheet.add_staff_element(0, lower, StaffElement::key_signature(0, KeySignature::new(-3)));

        let (indent, clefs) = system_indent(&sheet, 0);
        assert_eq!(indent, CLEF_WIDTH + 3.0 * KEY_ACCIDENTAL_WIDTH + 2.0 * SYSTEM_INDENT_GAP);
        assert_eq!(clefs, vec![(upper, Clef::treble()), (lower, Clef::bass())]);
    }

    #[test]
    fn indent_is_zero_without_context() {
        let mut sheet = Sheet::new();
        let part = sheet.add_part("Drums");
        sheet.add_staff(part);
        sheet.add_bar();
        let (indent, clefs) = system_indent(&sheet, 0);
        assert_eq!(indent, 0.0);
        assert!(clefs.is_empty());
    }
}
