//! Maps raw filenames (or a QA-JSON `checks[]` list) to canonical
//! [`InputFileDetails`] (spec §4.3).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use gridqa_datatypes::{BandRef, BandType, CheckRequest, InputFileDetails};
use snafu::{ensure, ResultExt};

use crate::error::{self, Result};
use crate::qajson::{QaJsonCheck, FILE_TYPE_COVERAGE_AREA, FILE_TYPE_SURVEY_DTMS};
use crate::raster_io::RasterIo;

/// Structural validation (band count, duplicate band types) plus the
/// I/O-backed check `InputFileDetails::validate()` cannot do itself: every
/// referenced band must carry a nodata value (spec §3 Invariants, §4.3).
/// Opens each distinct band path at most once even when a BAG's depth and
/// uncertainty bands share a file.
fn validate_ifd(ifd: &InputFileDetails) -> Result<()> {
    ifd.validate().context(error::BadInputData)?;

    let mut opened: HashMap<&Path, RasterIo> = HashMap::new();
    for band in &ifd.bands {
        if !opened.contains_key(band.path.as_path()) {
            opened.insert(band.path.as_path(), RasterIo::open(&band.path)?);
        }
        let io = &opened[band.path.as_path()];
        if io.band_nodata(band.band_index)?.is_none() {
            return Err(error::Error::BadInputData {
                source: gridqa_datatypes::Error::MissingNoData {
                    path: band.path.display().to_string(),
                    band_index: band.band_index,
                },
            });
        }
    }
    Ok(())
}

fn resolve_path(path: &Path, relative_to: Option<&Path>) -> PathBuf {
    if path.is_absolute() || path.exists() {
        return path.to_path_buf();
    }
    match relative_to {
        Some(base) => base.join(path),
        None => path.to_path_buf(),
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

fn is_density_bag(path: &Path) -> bool {
    path.file_stem()
        .map(|s| {
            s.to_string_lossy()
                .to_ascii_lowercase()
                .ends_with("_density")
        })
        .unwrap_or(false)
        && has_extension(path, "bag")
}

fn stem_token_band_type(name: &str) -> Option<BandType> {
    let lower = name.to_ascii_lowercase();
    if lower.contains("depth") {
        Some(BandType::Depth)
    } else if lower.contains("density") {
        Some(BandType::Density)
    } else if lower.contains("uncertainty") {
        Some(BandType::Uncertainty)
    } else {
        None
    }
}

/// Resolves a flat list of grid file paths (GeoTIFF and/or BAG) into IFDs,
/// per the ordered rules of spec §4.3. All TIFFs passed in one call are
/// treated as one logical set and merged into a single IFD; every BAG
/// (other than a `_Density.bag` sibling, which is consumed rather than
/// read directly) becomes its own IFD.
pub fn resolve(paths: &[PathBuf], relative_to: Option<&Path>) -> Result<Vec<InputFileDetails>> {
    let resolved: Vec<PathBuf> = paths.iter().map(|p| resolve_path(p, relative_to)).collect();

    let density_bags: Vec<&PathBuf> = resolved.iter().filter(|p| is_density_bag(p)).collect();
    let bags: Vec<&PathBuf> = resolved
        .iter()
        .filter(|p| has_extension(p, "bag") && !is_density_bag(p))
        .collect();
    let tiffs: Vec<&PathBuf> = resolved
        .iter()
        .filter(|p| has_extension(p, "tif") || has_extension(p, "tiff"))
        .collect();

    let mut ifds = Vec::new();

    for bag in &bags {
        ifds.push(resolve_bag(bag, &density_bags)?);
    }

    if !tiffs.is_empty() {
        ifds.push(resolve_tiffs(&tiffs)?);
    }

    for ifd in &ifds {
        validate_ifd(ifd)?;
    }

    Ok(ifds)
}

fn resolve_bag(bag: &Path, density_bags: &[&PathBuf]) -> Result<InputFileDetails> {
    let stem = bag
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let expected_name = format!("{stem}_Density.bag");
    let sibling = density_bags
        .iter()
        .find(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().eq_ignore_ascii_case(&expected_name))
                .unwrap_or(false)
        })
        .ok_or_else(|| {
            error::Error::bad_input(format!(
                "sibling density file not found, expected {expected_name}"
            ))
        })?;

    let depth_io = RasterIo::open(bag)?;
    let density_io = RasterIo::open(sibling)?;

    let (depth_x, depth_y) = depth_io.size();
    let (density_x, density_y) = density_io.size();
    ensure!(
        depth_x == density_x && depth_y == density_y,
        error::BadInput {
            message: format!(
                "mismatch in data sizes across depth ({depth_x}x{depth_y}) and density \
                 ({density_x}x{density_y}) BAG inputs"
            )
        }
    );

    let geotransform = depth_io.geotransform()?;
    let projection = depth_io.projection();

    let bands = vec![
        BandRef::new(bag.to_path_buf(), 1, BandType::Depth),
        BandRef::new(bag.to_path_buf(), 2, BandType::Uncertainty),
        BandRef::new((*sibling).clone(), 1, BandType::Density),
    ];

    Ok(InputFileDetails::new(
        depth_x, depth_y, geotransform, projection, bands,
    ))
}

fn resolve_tiffs(tiffs: &[&PathBuf]) -> Result<InputFileDetails> {
    let mut bands = Vec::new();
    let mut any_labeled = false;

    for path in tiffs {
        let io = RasterIo::open(path)?;
        let band_count = io.band_count();
        let mut file_labeled = false;

        for band_index in 1..=band_count {
            let description = io.band_description(band_index)?;
            if let Some(band_type) = stem_token_band_type(&description) {
                bands.push(BandRef::new((*path).clone(), band_index, band_type));
                file_labeled = true;
                any_labeled = true;
            }
        }

        // Single-band file whose description didn't resolve: fall back to
        // the filename stem.
        if !file_labeled && band_count == 1 {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if let Some(band_type) = stem_token_band_type(&stem) {
                bands.push(BandRef::new((*path).clone(), 1, band_type));
                any_labeled = true;
            }
        }
    }

    if !any_labeled {
        // Legacy convention, first file only. The reference implementation
        // iterates `[1, band_count)`, excluding the last band — fixed here
        // to iterate inclusively so every band gets a chance at a type.
        let first = tiffs[0];
        let io = RasterIo::open(first)?;
        let band_count = io.band_count();
        for band_index in 1..=band_count.min(3) {
            let band_type = match band_index {
                1 => BandType::Depth,
                2 => BandType::Density,
                3 => BandType::Uncertainty,
                _ => unreachable!(),
            };
            bands.push(BandRef::new(first.to_path_buf(), band_index, band_type));
        }
    }

    let first = tiffs[0];
    let io = RasterIo::open(first)?;
    let (size_x, size_y) = io.size();
    let geotransform = io.geotransform()?;
    let projection = io.projection();

    Ok(InputFileDetails::new(
        size_x, size_y, geotransform, projection, bands,
    ))
}

/// Groups a QA-JSON `checks[]` list into IFDs: `"Survey DTMs"` files
/// contribute grid files, `"Coverage Area"` contributes (at most one)
/// coverage vector, and `inputs.params` become the check's `CheckParam`s.
/// Two checks that end up with identical band sets and coverage vector are
/// coalesced into one IFD so the same pixels aren't read twice.
pub fn inputs_from_checks(
    checks: &[QaJsonCheck],
    relative_to: Option<&Path>,
) -> Result<Vec<InputFileDetails>> {
    let mut per_check = Vec::new();

    for check in checks {
        let grid_paths: Vec<PathBuf> = check
            .inputs
            .files
            .iter()
            .filter(|f| f.file_type == FILE_TYPE_SURVEY_DTMS)
            .map(|f| f.path.clone())
            .collect();
        let coverage_path = check
            .inputs
            .files
            .iter()
            .find(|f| f.file_type == FILE_TYPE_COVERAGE_AREA)
            .map(|f| f.path.clone());

        if grid_paths.is_empty() {
            continue;
        }

        let mut ifds = resolve(&grid_paths, relative_to)?;
        let params = check
            .inputs
            .params
            .iter()
            .map(|p| param_to_check_param(p))
            .collect::<Vec<_>>();

        for ifd in &mut ifds {
            ifd.coverage_vector_path = coverage_path.clone();
            ifd.checks.push(CheckRequest {
                check_id: check.info.id,
                params: params.clone(),
            });
            ifd.qajson_checks.push(check.info.id);
        }

        per_check.extend(ifds);
    }

    Ok(coalesce(per_check))
}

fn param_to_check_param(param: &crate::qajson::QaJsonParam) -> gridqa_datatypes::CheckParam {
    use gridqa_datatypes::CheckParamValue;
    let value = match &param.value {
        serde_json::Value::Bool(b) => CheckParamValue::Bool(*b),
        serde_json::Value::Number(n) => CheckParamValue::Number(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => CheckParamValue::String(s.clone()),
        other => CheckParamValue::String(other.to_string()),
    };
    gridqa_datatypes::CheckParam {
        name: param.name.clone(),
        value,
    }
}

fn has_same_inputs(a: &InputFileDetails, b: &InputFileDetails) -> bool {
    if a.coverage_vector_path != b.coverage_vector_path {
        return false;
    }
    if a.bands.len() != b.bands.len() {
        return false;
    }
    let mut a_bands = a.bands.clone();
    let mut b_bands = b.bands.clone();
    let key = |band: &BandRef| (band.path.clone(), band.band_index, band.band_type);
    a_bands.sort_by_key(|b| key(b));
    b_bands.sort_by_key(|b| key(b));
    a_bands
        .iter()
        .zip(b_bands.iter())
        .all(|(x, y)| key(x) == key(y))
}

fn coalesce(ifds: Vec<InputFileDetails>) -> Vec<InputFileDetails> {
    let mut merged: Vec<InputFileDetails> = Vec::new();
    for ifd in ifds {
        if let Some(existing) = merged.iter_mut().find(|m| has_same_inputs(m, &ifd)) {
            existing.checks.extend(ifd.checks);
            existing.qajson_checks.extend(ifd.qajson_checks);
        } else {
            merged.push(ifd);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn density_bag_name_matching_is_case_insensitive() {
        assert!(is_density_bag(Path::new("survey_DENSITY.bag")));
        assert!(is_density_bag(Path::new("survey_Density.bag")));
        assert!(!is_density_bag(Path::new("survey.bag")));
    }

    #[test]
    fn stem_token_band_type_matches_known_tokens() {
        assert_eq!(stem_token_band_type("area_depth_final"), Some(BandType::Depth));
        assert_eq!(stem_token_band_type("area_density"), Some(BandType::Density));
        assert_eq!(stem_token_band_type("area_uncertainty"), Some(BandType::Uncertainty));
        assert_eq!(stem_token_band_type("area_misc"), None);
    }

    #[test]
    fn has_same_inputs_ignores_band_order() {
        let bands_a = vec![
            BandRef::new("a_depth.tif", 1, BandType::Depth),
            BandRef::new("a_density.tif", 1, BandType::Density),
        ];
        let bands_b = vec![
            BandRef::new("a_density.tif", 1, BandType::Density),
            BandRef::new("a_depth.tif", 1, BandType::Depth),
        ];
        let gt = gridqa_datatypes::GeoTransform::new(0.0, 1.0, 0.0, -1.0);
        let a = InputFileDetails::new(1, 1, gt, "EPSG:4326", bands_a);
        let b = InputFileDetails::new(1, 1, gt, "EPSG:4326", bands_b);
        assert!(has_same_inputs(&a, &b));
    }
}
