//! Pure, state-machine-adjacent logic for a single thumbnail request. See spec.md §4.J.
//!
//! The orchestration itself (coalescing, rate-limited fetch, cache writes) lives in
//! [`crate::thumbnailer::Thumbnailer`]; this module holds the parts that are cleanly
//! testable without an event loop: the request's state enum, scaling-size rules, and
//! failure classification into a failure-cache TTL tier.
use std::time::Duration;

use thumb_cache::ErrorKind;

use crate::fingerprint::RequestedSize;

/// `New → ProbingCache → {Returning | NeedSource} → {Extracting | Downloading}
/// → Scaling → Writing → Returning | Failed`. See spec.md §4.J.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    New,
    ProbingCache,
    NeedSource,
    Extracting,
    Downloading,
    Scaling,
    Writing,
    Returning,
    Failed,
}

/// Which failure-cache TTL tier an error kind memoises into. `None` means the
/// error must never be memoised (only successes and genuine failures are).
pub fn failure_ttl_tier(kind: ErrorKind, cfg_retry_not_found_hours: u64, cfg_retry_error_hours: u64) -> Option<Duration> {
    match kind {
        ErrorKind::NotFound => Some(Duration::from_secs(cfg_retry_not_found_hours * 3600)),
        ErrorKind::TemporaryError | ErrorKind::Timeout => Some(Duration::from_secs(cfg_retry_error_hours * 3600)),
        ErrorKind::HardError => Some(Duration::from_secs(365 * 24 * 3600)),
        _ => None,
    }
}

/// Compute the output box for a decoded image of size `original`, applying the
/// rules in spec.md §4.J.3: `(0,0)` keeps the original; a single zero component
/// clamps to the other; `(w,h)` fits inside the box preserving aspect ratio;
/// the result never upscales past `original`.
pub fn target_dimensions(requested: RequestedSize, original: (u32, u32)) -> (u32, u32) {
    let (ow, oh) = original;
    if requested.width == 0 && requested.height == 0 {
        return (ow, oh);
    }
    let (bw, bh) = if requested.width == 0 {
        let scale = requested.height as f64 / oh as f64;
        ((ow as f64 * scale).round() as u32, requested.height)
    } else if requested.height == 0 {
        let scale = requested.width as f64 / ow as f64;
        (requested.width, (oh as f64 * scale).round() as u32)
    } else {
        let scale = (requested.width as f64 / ow as f64).min(requested.height as f64 / oh as f64);
        ((ow as f64 * scale).round() as u32, (oh as f64 * scale).round() as u32)
    };
    if bw >= ow && bh >= oh {
        (ow, oh)
    } else {
        (bw.max(1).min(ow), bh.max(1).min(oh))
    }
}

/// Clamp an overly large requested box to `max_px` per spec.md §6's
/// `max_thumbnail_size` knob, before `target_dimensions` is applied.
pub fn clamp_requested_size(requested: RequestedSize, max_px: u32) -> RequestedSize {
    RequestedSize { width: requested.width.min(max_px), height: requested.height.min(max_px) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_zero_keeps_original() {
        assert_eq!(target_dimensions(RequestedSize::ORIGINAL, (800, 600)), (800, 600));
    }

    #[test]
    fn single_dimension_clamps_and_preserves_aspect() {
        let box_ = RequestedSize { width: 400, height: 0 };
        assert_eq!(target_dimensions(box_, (800, 600)), (400, 300));
        let box_ = RequestedSize { width: 0, height: 300 };
        assert_eq!(target_dimensions(box_, (800, 600)), (400, 300));
    }

    #[test]
    fn both_dimensions_fit_inside_box() {
        let box_ = RequestedSize { width: 200, height: 200 };
        assert_eq!(target_dimensions(box_, (800, 400)), (200, 100));
    }

    #[test]
    fn never_upscales() {
        let box_ = RequestedSize { width: 2000, height: 2000 };
        assert_eq!(target_dimensions(box_, (400, 300)), (400, 300));
    }

    #[test]
    fn not_found_maps_to_retry_not_found_tier() {
        let ttl = failure_ttl_tier(ErrorKind::NotFound, 168, 2).unwrap();
        assert_eq!(ttl, Duration::from_secs(168 * 3600));
    }

    #[test]
    fn temporary_and_timeout_map_to_retry_error_tier() {
        assert_eq!(failure_ttl_tier(ErrorKind::TemporaryError, 168, 2), failure_ttl_tier(ErrorKind::Timeout, 168, 2));
        assert_eq!(failure_ttl_tier(ErrorKind::TemporaryError, 168, 2).unwrap(), Duration::from_secs(2 * 3600));
    }

    #[test]
    fn success_adjacent_kinds_are_never_memoised() {
        assert_eq!(failure_ttl_tier(ErrorKind::Cancelled, 168, 2), None);
        assert_eq!(failure_ttl_tier(ErrorKind::InvalidArg, 168, 2), None);
    }
}
