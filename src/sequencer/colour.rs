/// HSL colour tags for grids and merged notes
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const SATURATION: u16 = 70;
pub const LIGHTNESS: u16 = 50;

lazy_static::lazy_static! {
    static ref HUE: Regex = Regex::new(r"hsl\(\s*(\d+)\s*,").unwrap();
}

/// A display colour in `hsl(H, S%, L%)` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Colour(String);

impl Colour {
    pub fn from_hue(hue: u16) -> Self {
        Self(format!("hsl({hue}, {SATURATION}%, {LIGHTNESS}%)"))
    }

    /// Colour for grid `index` out of `count`, hues spaced evenly around the wheel.
    pub fn for_position(index: usize, count: usize) -> Self {
        let count = count.max(1);
        Self::from_hue((index * 360 / count) as u16)
    }

    pub fn parse(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reads the hue out of `hsl(<hue>, ...`.
    pub fn hue(&self) -> Result<u16> {
        let malformed = || Error::MalformedColour(self.0.clone());

        let captures = HUE.captures(&self.0).ok_or_else(malformed)?;
        captures[1].parse().map_err(|_| malformed())
    }

    /// Averages the two hues, rounding halves up. Saturation and lightness
    /// are reset to the fixed constants.
    pub fn blend(&self, other: &Colour) -> Result<Colour> {
        let a = u32::from(self.hue()?);
        let b = u32::from(other.hue()?);
        Ok(Self::from_hue(((a + b + 1) / 2) as u16))
    }
}

impl fmt::Display for Colour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hues_evenly_spaced() {
        assert_eq!(Colour::for_position(0, 3).hue().unwrap(), 0);
        assert_eq!(Colour::for_position(1, 3).hue().unwrap(), 120);
        assert_eq!(Colour::for_position(2, 3).hue().unwrap(), 240);
        assert_eq!(Colour::for_position(1, 4).as_str(), "hsl(90, 70%, 50%)");
    }

    #[test]
    fn test_blend_rounds_half_up() {
        let blended = Colour::from_hue(0).blend(&Colour::from_hue(181)).unwrap();
        assert_eq!(blended.hue().unwrap(), 91);
    }

    #[test]
    fn test_blend_ignores_foreign_saturation() {
        let blended = Colour::parse("hsl( 100 , 10%, 90%)")
            .blend(&Colour::from_hue(200))
            .unwrap();
        assert_eq!(blended, Colour::from_hue(150));
    }

    #[test]
    fn test_hue_found_anywhere_in_string() {
        assert_eq!(Colour::parse("  hsl(40, 1%, 1%)").hue().unwrap(), 40);
        assert_eq!(Colour::parse("color: hsl(300,5%,5%);").hue().unwrap(), 300);
    }

    #[test]
    fn test_malformed_colour() {
        assert!(Colour::parse("blue").hue().is_err());
        assert!(Colour::parse("hsl(-4, 10%, 10%)").hue().is_err());
        assert!(Colour::parse("hsl(12)").hue().is_err());
        assert!(Colour::parse("hsl(99999, 1%, 1%)").hue().is_err());
    }
}
