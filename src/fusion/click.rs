//! Safe click point selection.
//!
//! Tapping the center of a container can land on a nested child with its own
//! behaviour (a "delete" icon inside a list row, for example). For targets
//! that contain other elements we tap the middle of the largest margin strip
//! that avoids every child.

use super::element::{Bounds, ElementRecord};

/// Pick a point inside `target` that avoids the elements nested in it.
///
/// Falls back to the largest strip even if it overlaps a child, then to the
/// target's own center.
pub fn safe_click_point(target: &ElementRecord, elements: &[ElementRecord]) -> (i32, i32) {
    let area = target.bounds;
    let children: Vec<Bounds> = elements
        .iter()
        .filter(|e| e.id != target.id)
        .map(|e| e.bounds)
        .filter(|b| !b.is_empty() && *b != area && area.contains(b))
        .collect();

    if children.is_empty() {
        return area.center();
    }

    let mut best_clear: Option<Bounds> = None;
    let mut best_any: Option<Bounds> = None;
    for child in &children {
        for strip in margin_strips(&area, child) {
            if strip.is_empty() {
                continue;
            }
            let clear = !children.iter().any(|c| c.intersects(&strip));
            if clear && best_clear.map_or(true, |b| strip.area() > b.area()) {
                best_clear = Some(strip);
            }
            if best_any.map_or(true, |b| strip.area() > b.area()) {
                best_any = Some(strip);
            }
        }
    }

    best_clear
        .or(best_any)
        .map(|strip| strip.center())
        .unwrap_or_else(|| area.center())
}

/// The four full-width/height strips of `area` lying outside `child`.
fn margin_strips(area: &Bounds, child: &Bounds) -> [Bounds; 4] {
    [
        Bounds::new(area.left, area.top, child.left, area.bottom),
        Bounds::new(child.right, area.top, area.right, area.bottom),
        Bounds::new(area.left, area.top, area.right, child.top),
        Bounds::new(area.left, child.bottom, area.right, area.bottom),
    ]
}
