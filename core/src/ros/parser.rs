use std::fs;
use std::path::Path;

use super::record::{DisplayEntry, RosFile, Trajectory};
use super::token::{extract_sections, Section};
use crate::math::MatrixHelper;
use crate::prelude::{CoreError, CoreResult, Vec3};
use crate::telemetry::LogManager;

pub const TOKEN_DISPLAY_MATRIX: &str = "TRdicomRdisplay";
pub const TOKEN_VOLUME: &str = "VOLUME";
pub const TOKEN_IMAGERY_NAME: &str = "IMAGERY_NAME";
pub const TOKEN_SERIE_UID: &str = "SERIE_UID";
pub const TOKEN_IMAGERY_3DREF: &str = "IMAGERY_3DREF";
pub const TOKEN_TRAJECTORY: &str = "TRAJECTORY";
pub const TOKEN_ELLIPS: &str = "ELLIPS";

/// Fields in a trajectory record line: `name ? ? ? ex ey ez ? tx ty tz ...`.
const TRAJECTORY_MIN_FIELDS: usize = 11;

pub fn parse_ros_file<P: AsRef<Path>>(path: P) -> CoreResult<RosFile> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let mut parsed = parse_ros_bytes(&bytes)?;
    parsed.source = Some(path.to_path_buf());
    Ok(parsed)
}

pub fn parse_ros_bytes(bytes: &[u8]) -> CoreResult<RosFile> {
    let text = std::str::from_utf8(bytes).map_err(|err| {
        CoreError::malformed(
            "<stream>",
            format!("not valid UTF-8 at byte {}", err.valid_up_to()),
        )
    })?;
    parse_ros_text(text)
}

/// Parses `.ros` text into displays, trajectories and pass-through sections.
///
/// A display starts at each `TRdicomRdisplay` section, which must be followed directly by
/// its `VOLUME`. The n-th `IMAGERY_NAME`, `SERIE_UID` and `IMAGERY_3DREF` belong to the
/// n-th display.
pub fn parse_ros_text(text: &str) -> CoreResult<RosFile> {
    let logger = LogManager::new("ros");
    let sections = extract_sections(text);

    let mut displays = Vec::new();
    let mut imagery_names = Vec::new();
    let mut serie_uids = Vec::new();
    let mut imagery_refs = Vec::new();
    let mut trajectories = Vec::new();
    let mut passthrough = Vec::new();

    let mut i = 0;
    while i < sections.len() {
        let section = &sections[i];
        match section.token.as_str() {
            TOKEN_DISPLAY_MATRIX => {
                let volume = sections
                    .get(i + 1)
                    .filter(|next| next.token == TOKEN_VOLUME)
                    .ok_or_else(|| {
                        CoreError::malformed(TOKEN_DISPLAY_MATRIX, "not followed by [VOLUME]")
                    })?;
                let transform = parse_display_matrix(section)?;
                let volume_path = parse_volume_path(volume)?;
                let name = volume_path
                    .rsplit('/')
                    .find(|part| !part.is_empty())
                    .unwrap_or(volume_path.as_str())
                    .to_string();
                displays.push(DisplayEntry {
                    index: displays.len(),
                    name,
                    volume_path,
                    imagery_name: None,
                    serie_uid: None,
                    transform: MatrixHelper::from_row_major(&transform),
                    parent_index: None,
                });
                i += 2;
                continue;
            }
            TOKEN_IMAGERY_NAME => {
                if let Some(name) = section.first_line() {
                    imagery_names.push(name.to_string());
                }
            }
            TOKEN_SERIE_UID => {
                if let Some(uid) = section.first_line() {
                    serie_uids.push(uid.to_string());
                }
            }
            TOKEN_IMAGERY_3DREF => {
                imagery_refs.push(parse_index_field(section)?);
            }
            TOKEN_TRAJECTORY | TOKEN_ELLIPS => {
                trajectories.extend(parse_trajectory(section)?);
            }
            _ => passthrough.push(section.clone()),
        }
        i += 1;
    }

    for display in displays.iter_mut() {
        let idx = display.index;
        display.imagery_name = imagery_names.get(idx).cloned();
        display.serie_uid = serie_uids.get(idx).cloned();
        display.parent_index = imagery_refs.get(idx).copied();
    }
    if imagery_refs.len() > displays.len() {
        logger.detail(&format!(
            "{} IMAGERY_3DREF values for {} displays; extras ignored",
            imagery_refs.len(),
            displays.len()
        ));
    }

    logger.record(&format!(
        "parsed {} displays, {} trajectories, {} pass-through sections",
        displays.len(),
        trajectories.len(),
        passthrough.len()
    ));

    Ok(RosFile {
        displays,
        trajectories,
        passthrough,
        source: None,
    })
}

fn parse_f64(section: &str, field: &str) -> CoreResult<f64> {
    field
        .parse::<f64>()
        .map_err(|_| CoreError::malformed(section, format!("'{field}' is not a number")))
}

/// Reads the 16 row-major values of a display matrix.
///
/// Longer numeric payloads keep their trailing 16 values (leading values are a size prefix).
fn parse_display_matrix(section: &Section) -> CoreResult<[f64; 16]> {
    let values = section
        .content
        .split_whitespace()
        .map(|field| parse_f64(TOKEN_DISPLAY_MATRIX, field))
        .collect::<CoreResult<Vec<f64>>>()?;
    if values.len() < 16 {
        return Err(CoreError::malformed(
            TOKEN_DISPLAY_MATRIX,
            format!("expected 16 matrix values, found {}", values.len()),
        ));
    }
    let mut matrix = [0.0; 16];
    matrix.copy_from_slice(&values[values.len() - 16..]);
    Ok(matrix)
}

fn parse_volume_path(section: &Section) -> CoreResult<String> {
    section
        .first_line()
        .map(|line| line.replace('\\', "/"))
        .ok_or_else(|| CoreError::malformed(TOKEN_VOLUME, "empty volume path"))
}

fn parse_index_field(section: &Section) -> CoreResult<usize> {
    let value = section
        .first_line()
        .ok_or_else(|| CoreError::malformed(TOKEN_IMAGERY_3DREF, "missing display index"))?;
    value.parse::<usize>().map_err(|_| {
        CoreError::malformed(
            TOKEN_IMAGERY_3DREF,
            format!("'{value}' is not a display index"),
        )
    })
}

/// The first payload line is the record count; a block declaring zero records is skipped.
fn parse_trajectory(section: &Section) -> CoreResult<Option<Trajectory>> {
    let token = section.token.as_str();
    let mut lines = section.lines();
    let count = lines
        .next()
        .ok_or_else(|| CoreError::malformed(token, "missing trajectory count line"))?;
    let count: usize = count
        .split_whitespace()
        .next()
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| CoreError::malformed(token, format!("invalid trajectory count {count:?}")))?;
    if count == 0 {
        return Ok(None);
    }
    let record = lines
        .next()
        .ok_or_else(|| CoreError::malformed(token, "missing trajectory record line"))?;
    let fields: Vec<&str> = record.split_whitespace().collect();
    if fields.len() < TRAJECTORY_MIN_FIELDS {
        return Err(CoreError::malformed(
            token,
            format!(
                "expected at least {TRAJECTORY_MIN_FIELDS} fields, found {}",
                fields.len()
            ),
        ));
    }
    let point = |start: usize| -> CoreResult<Vec3> {
        Ok([
            parse_f64(token, fields[start])?,
            parse_f64(token, fields[start + 1])?,
            parse_f64(token, fields[start + 2])?,
        ])
    };
    Ok(Some(Trajectory::new(fields[0], point(4)?, point(8)?)))
}
