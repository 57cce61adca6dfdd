//! Capture format negotiation

use super::types::FrameFormat;

/// Pick the supported format nearest to the request
///
/// - nothing supported: zero/unknown format
/// - single supported format: that format
/// - requested resolution: closest pixel count (absolute difference)
/// - no requested resolution: largest pixel count
///
/// Ties prefer the requested pixel encoding, then the highest fps.
pub fn negotiate_format(requested: &FrameFormat, supported: &[FrameFormat]) -> FrameFormat {
    match supported {
        [] => return FrameFormat::unknown(),
        [only] => return only.clone(),
        _ => {}
    }

    let score = |f: &FrameFormat| -> u64 {
        if requested.has_resolution() {
            f.pixel_count().abs_diff(requested.pixel_count())
        } else {
            u64::MAX - f.pixel_count()
        }
    };

    let best = supported.iter().map(score).min().unwrap_or(0);
    let mut candidates: Vec<&FrameFormat> =
        supported.iter().filter(|f| score(f) == best).collect();

    if !requested.pixel_format.is_empty() {
        let matching: Vec<&FrameFormat> = candidates
            .iter()
            .copied()
            .filter(|f| f.pixel_format.eq_ignore_ascii_case(&requested.pixel_format))
            .collect();
        if !matching.is_empty() {
            candidates = matching;
        }
    }

    candidates
        .into_iter()
        .max_by(|a, b| a.fps.total_cmp(&b.fps))
        .cloned()
        .unwrap_or_else(FrameFormat::unknown)
}
