//! Image bands and the fixed catalogue of attire checks.

use super::color::{ColorRule, Hsv};
use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};

/// Horizontal band of the image, by relative height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    /// Top eighth.
    Top,
    /// Top half.
    UpperHalf,
    /// Center half of the columns of the top half.
    UpperCenter,
    /// Middle third.
    Middle,
    /// Bottom half.
    LowerHalf,
    /// Bottom eighth.
    Bottom,
}

/// Pixel rectangle `[x0, x1) × [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x0: u32,
    pub x1: u32,
    pub y0: u32,
    pub y1: u32,
}

impl Region {
    pub fn area(&self) -> u64 {
        (self.x1.saturating_sub(self.x0)) as u64 * (self.y1.saturating_sub(self.y0)) as u64
    }
}

impl Band {
    pub fn region(&self, width: u32, height: u32) -> Region {
        let full = |y0, y1| Region { x0: 0, x1: width, y0, y1 };
        match self {
            Self::Top => full(0, height / 8),
            Self::UpperHalf => full(0, height / 2),
            Self::UpperCenter => Region {
                x0: width / 4,
                x1: 3 * width / 4,
                y0: 0,
                y1: height / 2,
            },
            Self::Middle => full(height / 3, 2 * height / 3),
            Self::LowerHalf => full(height / 2, height),
            Self::Bottom => full(7 * height / 8, height),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::UpperHalf => "upper-half",
            Self::UpperCenter => "upper-center",
            Self::Middle => "middle",
            Self::LowerHalf => "lower-half",
            Self::Bottom => "bottom",
        }
    }
}

/// Memoized coverage fractions for one snapshot.
///
/// Several checks read the same (band, color) pair; each pair is measured once.
pub(crate) struct Coverage<'a> {
    snapshot: &'a Snapshot,
    measured: Vec<((Band, ColorRule), f32)>,
}

impl<'a> Coverage<'a> {
    /// The snapshot must already be validated.
    pub(crate) fn new(snapshot: &'a Snapshot) -> Self {
        Self {
            snapshot,
            measured: Vec::new(),
        }
    }

    pub(crate) fn get(&mut self, band: Band, rule: ColorRule) -> f32 {
        if let Some((_, value)) = self.measured.iter().find(|(key, _)| *key == (band, rule)) {
            return *value;
        }
        let value = coverage(self.snapshot, band.region(self.snapshot.width(), self.snapshot.height()), rule);
        tracing::debug!(band = band.name(), ?rule, coverage = value, "measured band coverage");
        self.measured.push(((band, rule), value));
        value
    }
}

/// Fraction of pixels in `region` that fall inside `rule`.
fn coverage(snapshot: &Snapshot, region: Region, rule: ColorRule) -> f32 {
    let area = region.area();
    if area == 0 {
        return 0.0;
    }
    let mut hits = 0u64;
    for y in region.y0..region.y1 {
        for x in region.x0..region.x1 {
            if rule.contains(Hsv::from_rgb(snapshot.rgb_at(x, y))) {
                hits += 1;
            }
        }
    }
    hits as f32 / area as f32
}

// --- Coverage gates (fraction of band pixels) ---
const SHIRT_LIGHT_MIN: f32 = 0.15;
const TROUSERS_DARK_MIN: f32 = 0.20;
const TROUSERS_BLUE_MIN: f32 = 0.15;
const TIE_DARK_MIN: f32 = 0.10;
const BLAZER_LIGHT_MIN: f32 = 0.25;
const CAP_DARK_MIN: f32 = 0.20;
const BADGE_LIGHT_MIN: f32 = 0.30;
const SHOES_DARK_MIN: f32 = 0.30;
const BELT_DARK_MIN: f32 = 0.10;

/// One attire check. Band, color rule, gate and default weight are fixed per
/// check; a site policy only chooses which checks are required or optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttireCheck {
    /// Identity card. Not image-derived: always passes.
    IdCard,
    /// Light upper-body coverage.
    Shirt,
    /// Dark or blue lower-body coverage.
    Trousers,
    /// Dark vertical feature in the upper-center sub-region.
    Tie,
    /// Elevated light upper-body coverage, suggesting a layered garment.
    Blazer,
    /// Dark feature in the top band.
    Cap,
    /// High light upper-body coverage, suggesting an affixed badge.
    Badge,
    /// Dark feature in the bottom band.
    Shoes,
    /// Dark feature in the middle band.
    Belt,
}

impl AttireCheck {
    pub const ALL: [AttireCheck; 9] = [
        Self::IdCard,
        Self::Shirt,
        Self::Trousers,
        Self::Tie,
        Self::Blazer,
        Self::Cap,
        Self::Badge,
        Self::Shoes,
        Self::Belt,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::IdCard => "ID card",
            Self::Shirt => "Shirt",
            Self::Trousers => "Trousers",
            Self::Tie => "Tie",
            Self::Blazer => "Blazer or sweater",
            Self::Cap => "Cap",
            Self::Badge => "Badge",
            Self::Shoes => "Shoes",
            Self::Belt => "Belt",
        }
    }

    pub fn default_weight(&self) -> f32 {
        match self {
            Self::IdCard | Self::Shirt => 0.20,
            Self::Trousers => 0.15,
            Self::Tie | Self::Blazer => 0.10,
            Self::Cap | Self::Badge | Self::Shoes | Self::Belt => 0.05,
        }
    }

    /// Bands this check reads. Empty for checks that are not image-derived.
    pub fn bands(&self) -> &'static [Band] {
        match self {
            Self::IdCard => &[],
            Self::Shirt | Self::Blazer | Self::Badge => &[Band::UpperHalf],
            Self::Trousers => &[Band::LowerHalf],
            Self::Tie => &[Band::UpperCenter],
            Self::Cap => &[Band::Top],
            Self::Shoes => &[Band::Bottom],
            Self::Belt => &[Band::Middle],
        }
    }

    pub(crate) fn evaluate(&self, coverage: &mut Coverage<'_>) -> bool {
        use Band::*;
        match self {
            Self::IdCard => true,
            Self::Shirt => coverage.get(UpperHalf, ColorRule::Light) > SHIRT_LIGHT_MIN,
            Self::Trousers => {
                coverage.get(LowerHalf, ColorRule::Dark) > TROUSERS_DARK_MIN
                    || coverage.get(LowerHalf, ColorRule::Blue) > TROUSERS_BLUE_MIN
            }
            Self::Tie => coverage.get(UpperCenter, ColorRule::ValueBelow(100)) > TIE_DARK_MIN,
            Self::Blazer => coverage.get(UpperHalf, ColorRule::Light) > BLAZER_LIGHT_MIN,
            Self::Cap => coverage.get(Top, ColorRule::ValueBelow(80)) > CAP_DARK_MIN,
            Self::Badge => coverage.get(UpperHalf, ColorRule::Light) > BADGE_LIGHT_MIN,
            Self::Shoes => coverage.get(Bottom, ColorRule::ValueBelow(100)) > SHOES_DARK_MIN,
            Self::Belt => coverage.get(Middle, ColorRule::ValueBelow(80)) > BELT_DARK_MIN,
        }
    }
}

impl std::fmt::Display for AttireCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
