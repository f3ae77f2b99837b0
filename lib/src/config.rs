use crate::error::{CellExpError, Result};

/// Default maximum expansion distance, in pixels
pub const DEFAULT_MAX_PIXELS: u32 = 25;
/// By default cells left without cytoplasm are discarded
pub const DEFAULT_DISCARD_CELLS_WITHOUT_CYTOPLASM: bool = true;
/// Default index of the channel reported in the canonical intensity columns
pub const DEFAULT_NUCLEI_CHANNEL: usize = 0;

const TRUTHY: [&str; 5] = ["true", "1", "yes", "y", "on"];
const FALSY: [&str; 5] = ["false", "0", "no", "n", "off"];

/// Interpret a command line boolean, ignoring case and surrounding whitespace
pub fn parse_bool(value: &str) -> Result<bool> {
    let normalised = value.trim().to_lowercase();

    if TRUTHY.contains(&normalised.as_str()) {
        Ok(true)
    } else if FALSY.contains(&normalised.as_str()) {
        Ok(false)
    } else {
        Err(CellExpError::config(format!(
            "cannot interpret '{}' as a boolean",
            value
        )))
    }
}

/// Split a comma separated list of channel names. Returns `None` for a blank list.
pub fn parse_channel_names(value: &str) -> Option<Vec<String>> {
    if value.trim().is_empty() {
        return None;
    }

    Some(value.split(',').map(|name| name.trim().to_string()).collect())
}

/// Parameters of a run, as supplied on the command line. Unset values take their defaults.
#[derive(Debug, Clone, Default)]
pub struct RawParameters {
    /// Maximum expansion distance
    pub max_pixels: Option<u32>,
    /// Whether cells without cytoplasm are removed
    pub discard_cells_without_cytoplasm: Option<bool>,
    /// Index of the nuclei channel
    pub nuclei_channel: Option<usize>,
    /// Comma separated channel names
    pub channel_names: Option<String>,
    /// Process images in parallel
    pub parallel: bool,
}

/// Validated parameters of a run
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    /// Maximum distance, in pixels, a nucleus is grown into the background
    pub max_pixels: u32,
    /// Remove labels whose cytoplasm is empty after expansion
    pub discard_cells_without_cytoplasm: bool,
    /// Channel copied into the canonical intensity columns (clamped per image)
    pub nuclei_channel: usize,
    /// Names given to the channels of every intensity image
    pub channel_names: Option<Vec<String>>,
    /// Process images on the rayon thread pool
    pub parallel: bool,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters {
            max_pixels: DEFAULT_MAX_PIXELS,
            discard_cells_without_cytoplasm: DEFAULT_DISCARD_CELLS_WITHOUT_CYTOPLASM,
            nuclei_channel: DEFAULT_NUCLEI_CHANNEL,
            channel_names: None,
            parallel: false,
        }
    }
}

impl From<RawParameters> for Parameters {
    fn from(raw: RawParameters) -> Self {
        Parameters {
            max_pixels: raw.max_pixels.unwrap_or(DEFAULT_MAX_PIXELS),
            discard_cells_without_cytoplasm: raw
                .discard_cells_without_cytoplasm
                .unwrap_or(DEFAULT_DISCARD_CELLS_WITHOUT_CYTOPLASM),
            nuclei_channel: raw.nuclei_channel.unwrap_or(DEFAULT_NUCLEI_CHANNEL),
            channel_names: raw.channel_names.as_deref().and_then(parse_channel_names),
            parallel: raw.parallel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booleans() {
        for value in ["true", " YES ", "1", "y", "On"] {
            assert!(parse_bool(value).unwrap());
        }
        for value in ["false", "No", "0", "n", "OFF "] {
            assert!(!parse_bool(value).unwrap());
        }

        assert!(matches!(parse_bool("maybe"), Err(CellExpError::Config { .. })));
    }

    #[test]
    fn defaults() {
        let parameters = Parameters::from(RawParameters::default());

        assert_eq!(parameters, Parameters::default());
        assert_eq!(parameters.max_pixels, 25);
        assert!(parameters.discard_cells_without_cytoplasm);
        assert_eq!(parameters.nuclei_channel, 0);
    }

    #[test]
    fn overrides() {
        let parameters = Parameters::from(RawParameters {
            max_pixels: Some(10),
            discard_cells_without_cytoplasm: Some(false),
            nuclei_channel: Some(2),
            channel_names: Some("DAPI, GFP".to_string()),
            parallel: true,
        });

        assert_eq!(parameters.max_pixels, 10);
        assert!(!parameters.discard_cells_without_cytoplasm);
        assert_eq!(parameters.nuclei_channel, 2);
        assert_eq!(
            parameters.channel_names,
            Some(vec!["DAPI".to_string(), "GFP".to_string()])
        );
        assert!(parameters.parallel);
    }

    #[test]
    fn zero_distance_is_kept() {
        let parameters = Parameters::from(RawParameters {
            max_pixels: Some(0),
            channel_names: Some(" ".to_string()),
            ..Default::default()
        });

        assert_eq!(parameters.max_pixels, 0);
        assert_eq!(parameters.channel_names, None);
    }

    #[test]
    fn blank_channel_names() {
        assert_eq!(parse_channel_names("  "), None);
    }
}
