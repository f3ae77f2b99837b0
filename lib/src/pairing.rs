use std::collections::{HashMap, HashSet};

use log::warn;

use crate::{
    error::{CellExpError, Result},
    job::ImageRecord,
};

const MASK_SUFFIX: &str = "_mask";
const NUCLEI_MARKER: &str = "_nuclei";

/// Derive the key used to match a mask with its intensity image from a file name.
///
/// The extension is dropped and the stem lower-cased. For masks a trailing `_mask` is
/// removed. Everything from the first `_nuclei` onwards is then dropped, followed by any
/// trailing underscores. If nothing is left, the lower-cased stem is used instead.
pub fn pairing_key(filename: &str, is_mask: bool) -> String {
    let stem = match filename.rfind('.') {
        Some(index) if index > 0 => &filename[..index],
        _ => filename,
    };
    let stem = stem.to_lowercase();

    let mut key = stem.as_str();
    if is_mask {
        key = key.strip_suffix(MASK_SUFFIX).unwrap_or(key);
    }
    if let Some(index) = key.find(NUCLEI_MARKER) {
        key = &key[..index];
    }
    let key = key.trim_end_matches('_');

    if key.is_empty() {
        stem.clone()
    } else {
        key.to_string()
    }
}

/// The key of an intensity image with its trailing `_<channel>` token removed, e.g.
/// `sample_gfp` becomes `sample`. Returns `None` if the key has no such token.
pub fn channel_alias(key: &str) -> Option<String> {
    let index = key.rfind('_')?;
    let alias = key[..index].trim_end_matches('_');

    if alias.is_empty() {
        None
    } else {
        Some(alias.to_string())
    }
}

/// A mask matched to its intensity image
#[derive(Debug, Clone, PartialEq)]
pub struct PairingEntry {
    /// The key shared by the mask and intensity file names
    pub key: String,
    /// The nuclei mask
    pub mask: ImageRecord,
    /// The intensity image to measure, if one is available
    pub intensity: Option<ImageRecord>,
}

/// Two intensity images which produced the same key; only `kept` is used
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCollision {
    /// The shared key
    pub key: String,
    /// The record that was passed over
    pub replaced: ImageRecord,
    /// The record that is used for pairing
    pub kept: ImageRecord,
}

/// The outcome of pairing masks with intensity images
#[derive(Debug, Clone, Default)]
pub struct Pairing {
    /// One entry per mask, in the order the masks were given
    pub entries: Vec<PairingEntry>,
    /// Intensity images no mask was paired with
    pub unmatched_intensity: Vec<ImageRecord>,
    /// Intensity images that were superseded by a later image with the same key
    pub collisions: Vec<KeyCollision>,
}

fn collision(
    key: String,
    intensities: &[ImageRecord],
    replaced: usize,
    kept: usize,
) -> KeyCollision {
    warn!(
        "Intensity images {} and {} share key '{}'; using {}",
        intensities[replaced].filename,
        intensities[kept].filename,
        key,
        intensities[kept].filename
    );

    KeyCollision {
        key,
        replaced: intensities[replaced].clone(),
        kept: intensities[kept].clone(),
    }
}

/// Pair every mask with the intensity image sharing its key.
///
/// A mask key is looked up first among the intensity keys and then among their channel
/// aliases (see [`channel_alias`]). When several intensity images share the key the last one
/// wins and a warning is logged. It is an error for there to be no masks at all, or for a mask
/// to have no intensity counterpart. Intensity images without a mask are reported and
/// otherwise ignored.
pub fn resolve(masks: &[ImageRecord], intensities: &[ImageRecord]) -> Result<Pairing> {
    if masks.is_empty() {
        return Err(CellExpError::pairing("no nuclei masks were found"));
    }

    let mut by_key: HashMap<String, Vec<usize>> = HashMap::with_capacity(intensities.len());
    let mut by_alias: HashMap<String, Vec<usize>> = HashMap::new();

    for (index, record) in intensities.iter().enumerate() {
        let key = pairing_key(&record.filename, false);

        if let Some(alias) = channel_alias(&key) {
            by_alias.entry(alias).or_default().push(index);
        }
        by_key.entry(key).or_default().push(index);
    }

    let mut collisions = Vec::new();

    // Exact key collisions are reported whether or not a mask uses the key
    for (index, record) in intensities.iter().enumerate() {
        let key = pairing_key(&record.filename, false);
        if let Some((&kept, _)) = by_key.get(&key).and_then(|group| group.split_last()) {
            if kept != index {
                collisions.push(collision(key, intensities, index, kept));
            }
        }
    }

    let mut used = vec![false; intensities.len()];
    let mut reported_aliases = HashSet::new();
    let mut entries = Vec::with_capacity(masks.len());

    for mask in masks {
        let key = pairing_key(&mask.filename, true);

        let (group, is_alias) = match by_key.get(&key) {
            Some(group) => (Some(group), false),
            None => (by_alias.get(&key), true),
        };
        let (&kept, replaced) = match group.and_then(|group| group.split_last()) {
            Some(found) => found,
            None => {
                return Err(CellExpError::pairing(format!(
                    "no intensity image found for mask {} (key '{}')",
                    mask.filename, key
                )))
            }
        };

        // Alias groups are only known to collide once a mask falls back to them
        if is_alias && !replaced.is_empty() && reported_aliases.insert(key.clone()) {
            for &index in replaced {
                collisions.push(collision(key.clone(), intensities, index, kept));
            }
        }

        used[kept] = true;
        for &index in replaced {
            used[index] = true;
        }

        entries.push(PairingEntry {
            key,
            mask: mask.clone(),
            intensity: Some(intensities[kept].clone()),
        });
    }

    let mut unmatched_intensity = Vec::new();
    for (record, used) in intensities.iter().zip(used) {
        if !used {
            warn!(
                "Intensity image {} has no matching mask and will be ignored",
                record.filename
            );
            unmatched_intensity.push(record.clone());
        }
    }

    Ok(Pairing {
        entries,
        unmatched_intensity,
        collisions,
    })
}
