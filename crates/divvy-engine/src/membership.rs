use crate::error::EngineError;

/// One linear piece of a piecewise satisfaction curve.
///
/// Evaluates to `slope * x + intercept`, clamped to `[0, cap]`. Segments in a
/// curve must be contiguous and non-decreasing in cap.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub lower: f64,
    pub upper: f64,
    pub slope: f64,
    pub intercept: f64,
    pub cap: f64,
}

impl Segment {
    pub fn value_at(&self, x: f64) -> f64 {
        (self.slope * x + self.intercept).clamp(0.0, self.cap)
    }

    pub fn midpoint(&self) -> f64 {
        (self.lower + self.upper) / 2.0
    }
}

/// A curve mapping an allocated amount to a satisfaction degree.
///
/// Degrees live in `[0, cap]`; caps above 1.0 model surplus tiers where
/// over-funding a goal still earns diminishing extra satisfaction.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum MembershipFunction {
    /// 0 below `lower`, rises linearly to 1 at `upper`, saturates above
    Linear { lower: f64, upper: f64 },
    /// 0 outside `[lower, upper]`, 1 at `peak`
    Triangular { lower: f64, peak: f64, upper: f64 },
    /// 0 outside `[lower, upper]`, plateau of 1 between the peaks
    Trapezoidal {
        lower: f64,
        left_peak: f64,
        right_peak: f64,
        upper: f64,
    },
    /// Arbitrary contiguous segments; values above the last segment keep
    /// its cap
    Piecewise(Vec<Segment>),
    /// Piecewise approximation of an S-curve, built by [`Self::s_curve`]
    SCurve(Vec<Segment>),
}

impl MembershipFunction {
    /// Build a checked piecewise curve
    pub fn piecewise(segments: Vec<Segment>) -> Result<Self, EngineError> {
        validate_segments(&segments)?;
        Ok(Self::Piecewise(segments))
    }

    /// Eight-segment approximation of an S-shaped satisfaction curve over
    /// `[lower, upper]`, with a surplus tier reaching 1.05 at 120% of the
    /// target. Degenerate peaks are replaced by 30% / 70% of the range.
    pub fn s_curve(lower: f64, left_peak: f64, right_peak: f64, upper: f64) -> Self {
        let range = (upper - lower).max(f64::EPSILON);
        let mut left = left_peak;
        let mut right = right_peak;
        if left <= lower || left >= upper {
            left = lower + 0.3 * range;
        }
        if right <= left || right >= upper {
            right = lower + 0.7 * range;
        }

        // Anchor memberships rise steeply through the middle of the range
        let anchors = [
            (lower, 0.0),
            (lower + 0.25 * (left - lower), 0.05),
            (lower + 0.5 * (left - lower), 0.15),
            (left, 0.35),
            ((left + right) / 2.0, 0.65),
            (right, 0.85),
            (right + 0.5 * (upper - right), 0.95),
            (upper, 1.0),
            // Surplus tier: diminishing returns up to 120% of the target
            (upper + 0.2 * range.max(upper.abs()), 1.05),
        ];

        let mut segments = Vec::with_capacity(anchors.len() - 1);
        for pair in anchors.windows(2) {
            let (x0, m0) = pair[0];
            let (x1, m1) = pair[1];
            let span = x1 - x0;
            let slope = if span.abs() < f64::EPSILON {
                0.0
            } else {
                (m1 - m0) / span
            };
            segments.push(Segment {
                lower: x0,
                upper: x1,
                slope,
                intercept: m0 - slope * x0,
                cap: m1,
            });
        }

        Self::SCurve(segments)
    }

    /// Map an allocated value to its satisfaction degree
    pub fn evaluate(&self, value: f64) -> f64 {
        match self {
            Self::Linear { lower, upper } => {
                if value <= *lower {
                    if value >= *upper { 1.0 } else { 0.0 }
                } else if value >= *upper {
                    1.0
                } else {
                    (value - lower) / (upper - lower)
                }
            }
            Self::Triangular { lower, peak, upper } => {
                if value < *lower || value > *upper {
                    0.0
                } else if value <= *peak {
                    ramp_up(value, *lower, *peak)
                } else {
                    ramp_down(value, *peak, *upper)
                }
            }
            Self::Trapezoidal {
                lower,
                left_peak,
                right_peak,
                upper,
            } => {
                if value < *lower || value > *upper {
                    0.0
                } else if value < *left_peak {
                    ramp_up(value, *lower, *left_peak)
                } else if value <= *right_peak {
                    1.0
                } else {
                    ramp_down(value, *right_peak, *upper)
                }
            }
            Self::Piecewise(segments) | Self::SCurve(segments) => {
                evaluate_segments(segments, value)
            }
        }
    }

    /// The largest satisfaction degree this curve can reach
    pub fn peak_degree(&self) -> f64 {
        match self {
            Self::Linear { .. } | Self::Triangular { .. } | Self::Trapezoidal { .. } => 1.0,
            Self::Piecewise(segments) | Self::SCurve(segments) => {
                segments.last().map_or(0.0, |s| s.cap)
            }
        }
    }

    /// Decompose the curve into contiguous linear segments for the MILP
    /// linearization layer
    pub fn segments(&self) -> Vec<Segment> {
        match self {
            Self::Linear { lower, upper } => {
                let span = upper - lower;
                if span <= f64::EPSILON {
                    return vec![Segment {
                        lower: *lower,
                        upper: *upper,
                        slope: 0.0,
                        intercept: 1.0,
                        cap: 1.0,
                    }];
                }
                let slope = 1.0 / span;
                vec![Segment {
                    lower: *lower,
                    upper: *upper,
                    slope,
                    intercept: -lower * slope,
                    cap: 1.0,
                }]
            }
            Self::Triangular { lower, peak, upper } => {
                let mut segments = Vec::with_capacity(2);
                segments.push(linear_piece(*lower, *peak, 0.0, 1.0));
                segments.push(linear_piece(*peak, *upper, 1.0, 0.0));
                segments
            }
            Self::Trapezoidal {
                lower,
                left_peak,
                right_peak,
                upper,
            } => {
                vec![
                    linear_piece(*lower, *left_peak, 0.0, 1.0),
                    linear_piece(*left_peak, *right_peak, 1.0, 1.0),
                    linear_piece(*right_peak, *upper, 1.0, 0.0),
                ]
            }
            Self::Piecewise(segments) | Self::SCurve(segments) => segments.clone(),
        }
    }
}

fn ramp_up(value: f64, from: f64, to: f64) -> f64 {
    let span = to - from;
    // A peak sitting on the boundary is full membership, not a zero division
    if span <= f64::EPSILON {
        1.0
    } else {
        (value - from) / span
    }
}

fn ramp_down(value: f64, from: f64, to: f64) -> f64 {
    let span = to - from;
    if span <= f64::EPSILON {
        1.0
    } else {
        (to - value) / span
    }
}

fn linear_piece(lower: f64, upper: f64, m0: f64, m1: f64) -> Segment {
    let span = upper - lower;
    let slope = if span.abs() <= f64::EPSILON {
        0.0
    } else {
        (m1 - m0) / span
    };
    Segment {
        lower,
        upper,
        slope,
        intercept: m0 - slope * lower,
        cap: m0.max(m1),
    }
}

fn evaluate_segments(segments: &[Segment], value: f64) -> f64 {
    let Some(first) = segments.first() else {
        return 0.0;
    };
    if value < first.lower {
        return 0.0;
    }
    for segment in segments {
        if value <= segment.upper {
            return segment.value_at(value);
        }
    }
    // Beyond the last segment the curve stays at its final cap
    segments.last().map_or(0.0, |s| s.cap)
}

fn validate_segments(segments: &[Segment]) -> Result<(), EngineError> {
    if segments.is_empty() {
        return Err(EngineError::InvalidModel(
            "piecewise curve needs at least one segment".to_string(),
        ));
    }
    for pair in segments.windows(2) {
        if (pair[0].upper - pair[1].lower).abs() > 1e-9 {
            return Err(EngineError::InvalidModel(
                "piecewise segments must be contiguous".to_string(),
            ));
        }
        if pair[1].cap < pair[0].cap {
            return Err(EngineError::InvalidModel(
                "piecewise segment caps must be non-decreasing".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_linear_boundaries() {
        let f = MembershipFunction::Linear {
            lower: 100.0,
            upper: 200.0,
        };
        assert_eq!(f.evaluate(0.0), 0.0);
        assert_eq!(f.evaluate(100.0), 0.0);
        assert!((f.evaluate(150.0) - 0.5).abs() < 1e-12);
        assert_eq!(f.evaluate(200.0), 1.0);
        assert_eq!(f.evaluate(1_000.0), 1.0);
    }

    #[test]
    fn test_triangular_peak_and_edges() {
        let f = MembershipFunction::Triangular {
            lower: 0.0,
            peak: 1_000.0,
            upper: 2_000.0,
        };
        assert_eq!(f.evaluate(-1.0), 0.0);
        assert!((f.evaluate(500.0) - 0.5).abs() < 1e-12);
        assert_eq!(f.evaluate(1_000.0), 1.0);
        assert!((f.evaluate(1_500.0) - 0.5).abs() < 1e-12);
        assert_eq!(f.evaluate(2_001.0), 0.0);
    }

    #[test]
    fn test_degenerate_triangular_peak_on_boundary() {
        let f = MembershipFunction::Triangular {
            lower: 0.0,
            peak: 0.0,
            upper: 100.0,
        };
        // Peak at the lower edge must not divide by zero
        assert_eq!(f.evaluate(0.0), 1.0);
        assert!((f.evaluate(50.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_trapezoidal_plateau() {
        let f = MembershipFunction::Trapezoidal {
            lower: 0.0,
            left_peak: 100.0,
            right_peak: 300.0,
            upper: 400.0,
        };
        assert_eq!(f.evaluate(100.0), 1.0);
        assert_eq!(f.evaluate(200.0), 1.0);
        assert_eq!(f.evaluate(300.0), 1.0);
        assert!((f.evaluate(350.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_piecewise_extrapolates_last_cap() {
        let f = MembershipFunction::piecewise(vec![
            Segment {
                lower: 0.0,
                upper: 100.0,
                slope: 0.01,
                intercept: 0.0,
                cap: 1.0,
            },
            Segment {
                lower: 100.0,
                upper: 120.0,
                slope: 0.0025,
                intercept: 0.75,
                cap: 1.05,
            },
        ])
        .unwrap();

        assert_eq!(f.evaluate(-5.0), 0.0);
        assert!((f.evaluate(50.0) - 0.5).abs() < 1e-12);
        assert!((f.evaluate(120.0) - 1.05).abs() < 1e-12);
        // Above the last segment the curve keeps the final cap
        assert!((f.evaluate(10_000.0) - 1.05).abs() < 1e-12);
    }

    #[test]
    fn test_piecewise_rejects_gaps() {
        let result = MembershipFunction::piecewise(vec![
            Segment {
                lower: 0.0,
                upper: 100.0,
                slope: 0.01,
                intercept: 0.0,
                cap: 1.0,
            },
            Segment {
                lower: 150.0,
                upper: 200.0,
                slope: 0.0,
                intercept: 1.0,
                cap: 1.0,
            },
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_s_curve_shape() {
        let f = MembershipFunction::s_curve(0.0, 300.0, 700.0, 1_000.0);

        assert_eq!(f.evaluate(0.0), 0.0);
        assert!((f.evaluate(300.0) - 0.35).abs() < 1e-9);
        assert!((f.evaluate(700.0) - 0.85).abs() < 1e-9);
        assert!((f.evaluate(1_000.0) - 1.0).abs() < 1e-9);
        // Surplus tier tops out at 1.05 by 120% of the target
        assert!((f.evaluate(1_200.0) - 1.05).abs() < 1e-9);
        assert!((f.evaluate(5_000.0) - 1.05).abs() < 1e-9);
    }

    #[test]
    fn test_s_curve_guard_rails() {
        // Degenerate peaks collapse to 30% / 70% of the range
        let f = MembershipFunction::s_curve(0.0, 0.0, 0.0, 1_000.0);
        assert!((f.evaluate(300.0) - 0.35).abs() < 1e-9);
        assert!((f.evaluate(700.0) - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_s_curve_segment_count() {
        let MembershipFunction::SCurve(segments) =
            MembershipFunction::s_curve(0.0, 300.0, 700.0, 1_000.0)
        else {
            panic!("expected an S-curve");
        };
        assert_eq!(segments.len(), 8);
    }

    proptest! {
        #[test]
        fn prop_linear_is_monotone(a in 0.0f64..1e6, span in 1.0f64..1e6, x in 0.0f64..2e6, dx in 0.0f64..1e5) {
            let f = MembershipFunction::Linear { lower: a, upper: a + span };
            prop_assert!(f.evaluate(x + dx) >= f.evaluate(x) - 1e-12);
        }

        #[test]
        fn prop_s_curve_is_monotone(target in 1.0f64..1e9, x in 0.0f64..2e9, dx in 0.0f64..1e8) {
            let f = MembershipFunction::s_curve(0.0, 0.3 * target, 0.7 * target, target);
            prop_assert!(f.evaluate(x + dx) >= f.evaluate(x) - 1e-9);
        }

        #[test]
        fn prop_degrees_stay_in_cap(target in 1.0f64..1e9, x in 0.0f64..2e9) {
            let f = MembershipFunction::s_curve(0.0, 0.3 * target, 0.7 * target, target);
            let degree = f.evaluate(x);
            prop_assert!(degree >= 0.0);
            prop_assert!(degree <= f.peak_degree() + 1e-9);
        }
    }
}
