//! Damage classes and their visualisation colours.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::map::map_colors;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageClass {
    Background,
    NoDamage,
    MinorDamage,
    MajorDamage,
    Destroyed,
}

impl DamageClass {
    pub const ALL: [DamageClass; 5] = [
        DamageClass::Background,
        DamageClass::NoDamage,
        DamageClass::MinorDamage,
        DamageClass::MajorDamage,
        DamageClass::Destroyed,
    ];

    pub const fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Background),
            1 => Some(Self::NoDamage),
            2 => Some(Self::MinorDamage),
            3 => Some(Self::MajorDamage),
            4 => Some(Self::Destroyed),
            _ => None,
        }
    }

    pub const fn id(self) -> u8 {
        self as u8
    }

    pub const fn color(self) -> [u8; 3] {
        match self {
            Self::Background => [0, 0, 0],
            Self::NoDamage => [0, 255, 0],
            Self::MinorDamage => [255, 255, 0],
            Self::MajorDamage => [255, 128, 0],
            Self::Destroyed => [255, 0, 0],
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Background => "Background",
            Self::NoDamage => "No damage",
            Self::MinorDamage => "Minor damage",
            Self::MajorDamage => "Major damage",
            Self::Destroyed => "Destroyed",
        }
    }
}

pub const NUM_CLASSES: usize = DamageClass::ALL.len();

/// Maps a class-id mask to palette colours. Unknown ids render as background.
pub fn colorize(mask: &GrayImage) -> RgbImage {
    map_colors(mask, |Luma([id])| {
        Rgb(DamageClass::from_id(id)
            .unwrap_or(DamageClass::Background)
            .color())
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassSummary {
    pub id: u8,
    pub class: DamageClass,
    pub name: &'static str,
    pub color: [u8; 3],
    pub pixels: u64,
    pub fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DamageSummary {
    pub width: u32,
    pub height: u32,
    pub classes: Vec<ClassSummary>,
}

impl DamageSummary {
    /// Counts mask pixels per class. Ids outside the palette count as background.
    pub fn from_mask(mask: &GrayImage) -> Self {
        let mut counts = [0u64; NUM_CLASSES];
        for &Luma([id]) in mask.pixels() {
            let class = DamageClass::from_id(id).unwrap_or(DamageClass::Background);
            counts[class.id() as usize] += 1;
        }

        let total = u64::from(mask.width()) * u64::from(mask.height());
        let classes = DamageClass::ALL
            .iter()
            .zip(counts)
            .map(|(&class, pixels)| ClassSummary {
                id: class.id(),
                class,
                name: class.label(),
                color: class.color(),
                pixels,
                fraction: if total == 0 {
                    0.0
                } else {
                    pixels as f64 / total as f64
                },
            })
            .collect();

        Self {
            width: mask.width(),
            height: mask.height(),
            classes,
        }
    }

    /// Share of all pixels assessed as minor damage or worse.
    pub fn damaged_fraction(&self) -> f64 {
        self.classes
            .iter()
            .filter(|c| {
                matches!(
                    c.class,
                    DamageClass::MinorDamage | DamageClass::MajorDamage | DamageClass::Destroyed
                )
            })
            .map(|c| c.fraction)
            .sum()
    }
}
