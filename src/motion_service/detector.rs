//! Frame differencing motion detector
//!
//! Grayscale at a fixed comparison size, absolute difference against the
//! previous processed frame, binary threshold, then 8-connected region
//! labelling. Motion is flagged when any region reaches `change_limit`
//! pixels. Processing is rate-limited by `delay_ms`; frames in between are
//! ignored.

use super::types::MotionParameters;
use crate::camera::Frame;
use crate::codec;
use image::{GrayImage, Luma};
use imageproc::map::{map_colors, map_colors2};
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::HashMap;
use std::time::Instant;

/// Outcome of feeding one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// First frame stored as the comparison baseline
    Baseline,
    /// Not due yet
    Skipped,
    /// Compared against the baseline
    Processed { motion: bool, largest_region: u32 },
}

impl Detection {
    pub fn is_motion(&self) -> bool {
        matches!(self, Detection::Processed { motion: true, .. })
    }
}

/// Per-task detector state
pub struct MotionDetector {
    params: MotionParameters,
    baseline: Option<GrayImage>,
    next_allowed: Option<Instant>,
}

impl MotionDetector {
    pub fn new(params: MotionParameters) -> Self {
        Self {
            params,
            baseline: None,
            next_allowed: None,
        }
    }

    pub fn parameters(&self) -> &MotionParameters {
        &self.params
    }

    /// Forget the baseline (after a camera restart)
    pub fn reset(&mut self) {
        self.baseline = None;
        self.next_allowed = None;
    }

    pub fn process(&mut self, frame: &Frame, now: Instant) -> Detection {
        let Some(baseline) = self.baseline.as_ref() else {
            self.baseline = Some(self.prepare(frame));
            return Detection::Baseline;
        };

        if let Some(next) = self.next_allowed {
            if now < next {
                return Detection::Skipped;
            }
        }

        let current = self.prepare(frame);
        let largest_region = largest_changed_region(baseline, &current, self.params.noise_threshold);

        self.baseline = Some(current);
        self.next_allowed = Some(now + self.params.delay());

        Detection::Processed {
            motion: largest_region >= self.params.change_limit,
            largest_region,
        }
    }

    fn prepare(&self, frame: &Frame) -> GrayImage {
        codec::resize_gray(&frame.image, self.params.width, self.params.height)
    }
}

/// Pixel count of the largest region whose difference exceeds `noise_threshold`
pub fn largest_changed_region(previous: &GrayImage, current: &GrayImage, noise_threshold: u8) -> u32 {
    if previous.dimensions() != current.dimensions() {
        return 0;
    }

    let diff: GrayImage = map_colors2(previous, current, |a: Luma<u8>, b: Luma<u8>| {
        Luma([a[0].abs_diff(b[0])])
    });
    let mask: GrayImage = map_colors(&diff, |p: Luma<u8>| {
        if p[0] > noise_threshold {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });

    let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));
    let mut sizes: HashMap<u32, u32> = HashMap::new();
    for label in labels.pixels().map(|p| p[0]).filter(|&l| l != 0) {
        *sizes.entry(label).or_insert(0) += 1;
    }
    sizes.into_values().max().unwrap_or(0)
}
