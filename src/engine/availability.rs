use crate::model::*;

// ── Free-span computation ─────────────────────────────────────────

/// Gaps in `window` not covered by any booking on the resource.
///
/// A resource that is not offered for booking has no gaps at all.
pub fn free_spans(resource: &ResourceState, window: &Span) -> Vec<Span> {
    if !resource.resource.available {
        return Vec::new();
    }

    let taken: Vec<Span> = resource
        .overlapping(window)
        .map(|b| Span::new(b.span.start.max(window.start), b.span.end.min(window.end)))
        .collect();

    if taken.is_empty() {
        return vec![*window];
    }
    subtract_intervals(&[*window], &merge_overlapping(&taken))
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// Remove sorted, disjoint `to_remove` spans from sorted, disjoint `base` spans.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
