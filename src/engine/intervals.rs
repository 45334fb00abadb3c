use crate::model::*;

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut() {
            if span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`. Both inputs sorted by start; `to_remove` may overlap itself.
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

/// Grid points `origin + k * step` (k >= 0) whose `[t, t + duration)` fits in `free`.
pub fn grid_starts_within(origin: Ms, step: Ms, duration: Ms, free: &Span) -> Vec<Ms> {
    let mut out = Vec::new();
    if step <= 0 || duration <= 0 || free.duration_ms() < duration {
        return out;
    }
    let offset = (free.start - origin).max(0);
    // Round up to the next grid point.
    let mut t = origin + (offset + step - 1) / step * step;
    while t + duration <= free.end {
        out.push(t);
        t += step;
    }
    out
}
