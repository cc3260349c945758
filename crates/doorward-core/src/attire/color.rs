//! RGB → HSV conversion and the named color ranges used by attire checks.
//!
//! HSV follows the common 8-bit convention: hue in [0, 180), saturation and
//! value in [0, 255].

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hsv {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

impl Hsv {
    pub fn from_rgb([r, g, b]: [u8; 3]) -> Self {
        let (rf, gf, bf) = (r as f32, g as f32, b as f32);
        let max = rf.max(gf).max(bf);
        let min = rf.min(gf).min(bf);
        let delta = max - min;

        let s = if max > 0.0 { delta * 255.0 / max } else { 0.0 };

        let mut h = if delta == 0.0 {
            0.0
        } else if max == rf {
            60.0 * (gf - bf) / delta
        } else if max == gf {
            120.0 + 60.0 * (bf - rf) / delta
        } else {
            240.0 + 60.0 * (rf - gf) / delta
        };
        if h < 0.0 {
            h += 360.0;
        }

        Self {
            // 360° mapped onto 0..180; 359° rounds to 180 and wraps to 0.
            h: ((h / 2.0).round() as u32 % 180) as u8,
            s: s.round().clamp(0.0, 255.0) as u8,
            v: max as u8,
        }
    }
}

/// Named color range a pixel either falls inside or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorRule {
    /// White or light garment: low saturation, high value.
    Light,
    /// Dark garment: value ≤ 100, any hue or saturation.
    Dark,
    /// Navy/blue garment: blue hue band, saturated, dark to mid value.
    Blue,
    /// Anything with value strictly below the bound.
    ValueBelow(u8),
}

const LIGHT_MAX_SATURATION: u8 = 50;
const LIGHT_MIN_VALUE: u8 = 180;
const DARK_MAX_VALUE: u8 = 100;
const BLUE_HUE: (u8, u8) = (100, 140);
const BLUE_MIN_SATURATION: u8 = 50;
const BLUE_VALUE: (u8, u8) = (20, 100);

impl ColorRule {
    pub fn contains(&self, px: Hsv) -> bool {
        match *self {
            Self::Light => px.s <= LIGHT_MAX_SATURATION && px.v >= LIGHT_MIN_VALUE,
            Self::Dark => px.v <= DARK_MAX_VALUE,
            Self::Blue => {
                (BLUE_HUE.0..=BLUE_HUE.1).contains(&px.h)
                    && px.s >= BLUE_MIN_SATURATION
                    && (BLUE_VALUE.0..=BLUE_VALUE.1).contains(&px.v)
            }
            Self::ValueBelow(bound) => px.v < bound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hsv_primaries() {
        assert_eq!(Hsv::from_rgb([255, 0, 0]), Hsv { h: 0, s: 255, v: 255 });
        assert_eq!(Hsv::from_rgb([0, 255, 0]), Hsv { h: 60, s: 255, v: 255 });
        assert_eq!(Hsv::from_rgb([0, 0, 255]), Hsv { h: 120, s: 255, v: 255 });
    }

    #[test]
    fn test_hsv_grays() {
        assert_eq!(Hsv::from_rgb([0, 0, 0]), Hsv { h: 0, s: 0, v: 0 });
        assert_eq!(Hsv::from_rgb([128, 128, 128]), Hsv { h: 0, s: 0, v: 128 });
        assert_eq!(Hsv::from_rgb([255, 255, 255]), Hsv { h: 0, s: 0, v: 255 });
    }

    #[test]
    fn test_hsv_hue_wraps() {
        // Magenta-red just below 360° must not produce hue 180.
        let px = Hsv::from_rgb([255, 0, 1]);
        assert!(px.h < 180);
    }

    #[test]
    fn test_light_rule() {
        assert!(ColorRule::Light.contains(Hsv::from_rgb([240, 240, 235])));
        assert!(!ColorRule::Light.contains(Hsv::from_rgb([128, 128, 128])));
        assert!(!ColorRule::Light.contains(Hsv::from_rgb([255, 200, 0])));
    }

    #[test]
    fn test_dark_rule_inclusive_bound() {
        assert!(ColorRule::Dark.contains(Hsv::from_rgb([100, 100, 100])));
        assert!(!ColorRule::Dark.contains(Hsv::from_rgb([101, 101, 101])));
    }

    #[test]
    fn test_value_below_exclusive_bound() {
        assert!(ColorRule::ValueBelow(100).contains(Hsv::from_rgb([99, 99, 99])));
        assert!(!ColorRule::ValueBelow(100).contains(Hsv::from_rgb([100, 100, 100])));
    }

    #[test]
    fn test_blue_rule() {
        // Navy: hue 120, fully saturated, value 80.
        assert!(ColorRule::Blue.contains(Hsv::from_rgb([0, 0, 80])));
        // Bright blue is too light for trousers.
        assert!(!ColorRule::Blue.contains(Hsv::from_rgb([0, 0, 255])));
        // Dark red has the wrong hue.
        assert!(!ColorRule::Blue.contains(Hsv::from_rgb([80, 0, 0])));
    }
}
