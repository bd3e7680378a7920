use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Roofing material that steers the texture instructions sent with a sketch request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoofMaterial {
    #[default]
    AsphaltShingles,
    ClayTile,
    MetalStandingSeam,
}

impl RoofMaterial {
    pub const ALL: [RoofMaterial; 3] = [
        RoofMaterial::AsphaltShingles,
        RoofMaterial::ClayTile,
        RoofMaterial::MetalStandingSeam,
    ];

    /// Exact label substituted into the prompt.
    pub fn label(self) -> &'static str {
        match self {
            Self::AsphaltShingles => "Asphalt Shingles",
            Self::ClayTile => "Clay Tile",
            Self::MetalStandingSeam => "Metal Standing Seam",
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Self::AsphaltShingles => "Shingle",
            Self::ClayTile => "Tile",
            Self::MetalStandingSeam => "Metal",
        }
    }
}

impl fmt::Display for RoofMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RoofMaterial {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw
            .trim()
            .to_ascii_lowercase()
            .replace(['_', '-'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        match normalized.as_str() {
            "shingle" | "shingles" | "asphalt" | "asphalt shingles" | "asphaltshingles" => {
                Ok(Self::AsphaltShingles)
            }
            "tile" | "clay" | "clay tile" | "claytile" => Ok(Self::ClayTile),
            "metal" | "seam" | "metal standing seam" | "metalstandingseam" => {
                Ok(Self::MetalStandingSeam)
            }
            _ => Err(format!(
                "Unknown roof material '{}'. Use shingle, tile, or metal.",
                raw.trim()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RoofMaterial;

    #[test]
    fn default_is_asphalt_shingles() {
        assert_eq!(RoofMaterial::default(), RoofMaterial::AsphaltShingles);
    }

    #[test]
    fn labels_match_prompt_vocabulary() {
        assert_eq!(RoofMaterial::AsphaltShingles.label(), "Asphalt Shingles");
        assert_eq!(RoofMaterial::ClayTile.label(), "Clay Tile");
        assert_eq!(RoofMaterial::MetalStandingSeam.to_string(), "Metal Standing Seam");
    }

    #[test]
    fn parses_labels_short_names_and_variant_names() {
        assert_eq!("Shingle".parse(), Ok(RoofMaterial::AsphaltShingles));
        assert_eq!("  clay tile ".parse(), Ok(RoofMaterial::ClayTile));
        assert_eq!("ClayTile".parse(), Ok(RoofMaterial::ClayTile));
        assert_eq!("metal_standing_seam".parse(), Ok(RoofMaterial::MetalStandingSeam));
        for material in RoofMaterial::ALL {
            assert_eq!(material.label().parse(), Ok(material));
            assert_eq!(material.short_name().parse(), Ok(material));
        }
    }

    #[test]
    fn rejects_unknown_material() {
        let err = "slate".parse::<RoofMaterial>().err().unwrap_or_default();
        assert!(err.contains("slate"));
    }
}
