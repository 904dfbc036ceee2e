use serde::{Deserialize, Serialize};

/// A control point of a piecewise-linear channel: (position, value).
type Segment = &'static [(f32, f32)];

const JET_RED: Segment = &[(0.0, 0.0), (0.35, 0.0), (0.66, 1.0), (0.89, 1.0), (1.0, 0.5)];
const JET_GREEN: Segment = &[
    (0.0, 0.0),
    (0.125, 0.0),
    (0.375, 1.0),
    (0.64, 1.0),
    (0.91, 0.0),
    (1.0, 0.0),
];
const JET_BLUE: Segment = &[(0.0, 0.5), (0.11, 1.0), (0.34, 1.0), (0.65, 0.0), (1.0, 0.0)];

const HOT_RED: Segment = &[(0.0, 0.0416), (0.365079, 1.0), (1.0, 1.0)];
const HOT_GREEN: Segment = &[(0.0, 0.0), (0.365079, 0.0), (0.746032, 1.0), (1.0, 1.0)];
const HOT_BLUE: Segment = &[(0.0, 0.0), (0.746032, 0.0), (1.0, 1.0)];

const LINEAR: Segment = &[(0.0, 0.0), (1.0, 1.0)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colormap {
    Jet,
    Hot,
    Gray,
}

impl Colormap {
    fn channels(self) -> [Segment; 3] {
        match self {
            Colormap::Jet => [JET_RED, JET_GREEN, JET_BLUE],
            Colormap::Hot => [HOT_RED, HOT_GREEN, HOT_BLUE],
            Colormap::Gray => [LINEAR, LINEAR, LINEAR],
        }
    }

    /// Maps a value in [0, 1] to RGB. Out-of-range input is clamped, NaN maps to 0.
    pub fn rgb(self, value: f32) -> [u8; 3] {
        let v = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        self.channels()
            .map(|segment| (interpolate(segment, v) * 255.0).round() as u8)
    }
}

fn interpolate(segment: Segment, v: f32) -> f32 {
    for pair in segment.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if v <= x1 {
            if x1 <= x0 {
                return y1;
            }
            return y0 + (y1 - y0) * (v - x0) / (x1 - x0);
        }
    }
    segment.last().map(|(_, y)| *y).unwrap_or(0.0)
}
