//! Time units and rate conversions
//!
//! Presentation time is counted in 100ns ticks. Frame positions are counted in
//! the unit of the stream's rate: video frames for the video topology, audio
//! sample frames for the audio topology.

use serde::{Deserialize, Serialize};

/// Presentation time in 100ns ticks.
pub type TimeUnit = i64;

/// Position in frames of a given rate.
pub type FrameUnit = i64;

pub const SECOND_IN_TIME_UNIT: TimeUnit = 10_000_000;

/// A rational rate, `num / den` frames per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    pub num: FrameUnit,
    pub den: FrameUnit,
}

impl FrameRate {
    pub const fn new(num: FrameUnit, den: FrameUnit) -> Self {
        Self { num, den }
    }

    /// Rate for audio sample frames.
    pub const fn sample_rate(hz: FrameUnit) -> Self {
        Self { num: hz, den: 1 }
    }

    /// Index of the frame slot that contains `time` (floor).
    pub fn to_frame_unit(&self, time: TimeUnit) -> FrameUnit {
        convert_to_frame_unit(time, self.num, self.den)
    }

    /// Start time of frame slot `frame`: the first tick that belongs to it
    /// (ceiling), so `to_frame_unit(to_time_unit(f)) == f`.
    pub fn to_time_unit(&self, frame: FrameUnit) -> TimeUnit {
        convert_to_time_unit(frame, self.num, self.den)
    }

    /// Duration of a single frame, rounded up.
    pub fn frame_duration(&self) -> TimeUnit {
        self.to_time_unit(1)
    }

    /// Start time of the first grid slot strictly after `time`.
    pub fn next_grid_time(&self, time: TimeUnit) -> TimeUnit {
        self.to_time_unit(self.to_frame_unit(time) + 1)
    }

    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }
}

impl std::fmt::Display for FrameRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

pub fn convert_to_frame_unit(time: TimeUnit, num: FrameUnit, den: FrameUnit) -> FrameUnit {
    let scaled = time as i128 * num as i128;
    let div = den as i128 * SECOND_IN_TIME_UNIT as i128;
    scaled.div_euclid(div) as FrameUnit
}

pub fn convert_to_time_unit(frame: FrameUnit, num: FrameUnit, den: FrameUnit) -> TimeUnit {
    let scaled = frame as i128 * den as i128 * SECOND_IN_TIME_UNIT as i128;
    // ceil(scaled / num) for num > 0
    -((-scaled).div_euclid(num as i128)) as TimeUnit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_grid_conversion() {
        let rate = FrameRate::new(10, 1);
        assert_eq!(rate.to_frame_unit(SECOND_IN_TIME_UNIT), 10);
        assert_eq!(rate.to_frame_unit(SECOND_IN_TIME_UNIT - 1), 9);
        assert_eq!(rate.to_time_unit(3), 3_000_000);
        assert_eq!(rate.frame_duration(), 1_000_000);
    }

    #[test]
    fn test_fractional_rate() {
        let rate = FrameRate::new(30000, 1001);
        let one_minute = 60 * SECOND_IN_TIME_UNIT;
        assert_eq!(rate.to_frame_unit(one_minute), 1798);
        assert!(rate.to_time_unit(rate.to_frame_unit(one_minute)) <= one_minute);
    }

    #[test]
    fn test_audio_rate() {
        let rate = FrameRate::sample_rate(48000);
        assert_eq!(rate.to_frame_unit(SECOND_IN_TIME_UNIT / 2), 24000);
        assert_eq!(rate.to_time_unit(48000), SECOND_IN_TIME_UNIT);
    }

    #[test]
    fn test_next_grid_time_is_strictly_later() {
        let rate = FrameRate::new(10, 1);
        assert_eq!(rate.next_grid_time(0), 1_000_000);
        assert_eq!(rate.next_grid_time(1_000_000), 2_000_000);
        assert_eq!(rate.next_grid_time(1_500_000), 2_000_000);
    }

    #[test]
    fn test_ntsc_grid_advances_every_frame() {
        let rate = FrameRate::new(30000, 1001);
        assert_eq!(rate.next_grid_time(0), 333_667);

        let mut t = 0;
        for frame in 1..=300 {
            let next = rate.next_grid_time(t);
            assert!(next > t, "grid stalled at {}", t);
            assert_eq!(rate.to_frame_unit(next), frame);
            t = next;
        }
        // 300 frames at 29.97 fps is 10.01 seconds.
        assert_eq!(t, 100_100_000);
    }

    #[test]
    fn test_grid_time_inside_slot() {
        let rate = FrameRate::new(30000, 1001);
        let start = rate.to_time_unit(7);
        assert_eq!(rate.to_frame_unit(start), 7);
        assert_eq!(rate.to_frame_unit(start - 1), 6);
        assert_eq!(rate.next_grid_time(start - 1), start);
    }

    #[test]
    fn test_negative_times_floor() {
        let rate = FrameRate::new(10, 1);
        assert_eq!(rate.to_frame_unit(-1), -1);
    }
}
