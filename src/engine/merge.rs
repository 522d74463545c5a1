//! Stride-aware merging of overlapping inference windows.
//!
//! Each window overlaps its neighbours by the stride. A segment is owned by
//! the window whose non-overlapping region contains its anchor (midpoint, or
//! start when the segment is open). The newest window owns everything past
//! its left stride, since no later window exists yet to take over its right
//! edge. When a later window arrives it may revise that ownership, so callers
//! must re-merge the full chunk list each time.

use crate::engine::types::{DecodeAsrOptions, DecodedAsr, DecodedSegment, RawChunk};

/// Merge every chunk seen so far into absolute, ordered segments.
pub fn merge_chunks(chunks: &[RawChunk], options: &DecodeAsrOptions) -> DecodedAsr {
    let precision = options.time_precision;
    let mut merged: Vec<(String, f64, Option<f64>)> = Vec::new();
    let newest = chunks.len().saturating_sub(1);

    for (i, chunk) in chunks.iter().enumerate() {
        let window_end = chunk.offset_s + chunk.duration_s;
        let owned_from = if i == 0 {
            chunk.offset_s
        } else {
            chunk.offset_s + chunk.stride.left_s
        };
        let owned_until = if i == newest {
            f64::INFINITY
        } else {
            window_end - chunk.stride.right_s
        };

        for segment in &chunk.segments {
            let start = chunk.offset_s + segment.start as f64 * precision;
            let end = segment.end.map(|e| chunk.offset_s + e as f64 * precision);
            let anchor = match end {
                Some(end) if end > start => (start + end) / 2.0,
                _ => start,
            };
            if anchor < owned_from || anchor >= owned_until {
                continue;
            }

            // Newer context wins at the seam.
            if let Some(previous) = merged.last_mut()
                && !previous.2.is_some_and(|prev_end| prev_end <= start)
            {
                previous.2 = Some(start.max(previous.1));
            }
            merged.push((segment.text.clone(), start, end));
        }

        if i == newest && !chunk.is_last {
            let open_after = window_end - chunk.stride.right_s;
            if let Some(last) = merged.last_mut() {
                let runs_into_stride = last.2.is_none_or(|end| end > open_after);
                if runs_into_stride {
                    last.2 = if options.force_full_sequence {
                        Some(window_end)
                    } else {
                        None
                    };
                }
            }
        } else if i == newest
            && options.force_full_sequence
            && let Some(last) = merged.last_mut()
            && last.2.is_none()
        {
            last.2 = Some(window_end);
        }
    }

    let text = merged
        .iter()
        .map(|(text, _, _)| text.as_str())
        .collect::<String>()
        .trim()
        .to_string();

    let segments = merged
        .into_iter()
        .map(|(text, start, end)| DecodedSegment {
            text,
            timestamp: if options.return_timestamps {
                (Some(start), end)
            } else {
                (None, None)
            },
        })
        .collect();

    DecodedAsr { text, segments }
}
