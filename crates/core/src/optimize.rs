//! Pure optimizer-contract helpers: submission bounds, vertex-probe output
//! parsing, simplification ratio, and error-detail truncation.

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Accepted model file extensions (lowercase, with dot).
pub const ALLOWED_EXTENSIONS: &[&str] = &[".glb", ".gltf", ".fbx"];

/// Maximum accepted upload size (100 MiB).
pub const MAX_FILE_SIZE_BYTES: usize = 100 * 1024 * 1024;

/// Lower bound on the caller-supplied target for full optimizations.
pub const MIN_TARGET_TRIANGLES: i64 = 1_000;

/// Upper bound on the caller-supplied target for full optimizations.
pub const MAX_TARGET_TRIANGLES: i64 = 100_000;

/// Target recorded on preview jobs when the caller supplies none.
pub const PREVIEW_TARGET_TRIANGLES: i64 = 10_000;

/// Preview jobs estimate their output size as this percentage of the input.
pub const PREVIEW_REDUCTION_PERCENT: i64 = 10;

/// Marker the optimizer prints in front of the vertex count in inspect mode.
pub const VERTEX_MARKER: &str = "vertices:";

/// Maximum characters of captured stderr kept in `error_detail`.
pub const MAX_ERROR_DETAIL_CHARS: usize = 2_000;

/// Suffix appended when stderr was cut.
const TRUNCATION_SUFFIX: &str = "... [truncated]";

// ---------------------------------------------------------------------------
// Submission validation
// ---------------------------------------------------------------------------

/// Normalise and validate a model file name's extension.
///
/// Returns the lowercase extension including the dot.
pub fn validate_extension(file_name: &str) -> Result<String, CoreError> {
    let ext = std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();
    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(CoreError::Validation(format!(
            "Invalid file type. Allowed types: {}",
            ALLOWED_EXTENSIONS.join(", ")
        )))
    }
}

/// Reject empty and oversized uploads.
pub fn validate_size(len: usize) -> Result<(), CoreError> {
    if len == 0 {
        return Err(CoreError::Validation("Uploaded file is empty".into()));
    }
    if len > MAX_FILE_SIZE_BYTES {
        return Err(CoreError::Validation(format!(
            "File too large. Maximum size: {}MB",
            MAX_FILE_SIZE_BYTES / 1024 / 1024
        )));
    }
    Ok(())
}

/// Resolve the effective target for a submission.
///
/// Preview jobs fall back to [`PREVIEW_TARGET_TRIANGLES`] when given 0;
/// full jobs must be within `MIN_TARGET_TRIANGLES..=MAX_TARGET_TRIANGLES`.
pub fn resolve_target(target: i64, preview_only: bool) -> Result<i64, CoreError> {
    if preview_only {
        return match target {
            0 => Ok(PREVIEW_TARGET_TRIANGLES),
            t if t > 0 => Ok(t),
            _ => Err(CoreError::Validation(
                "Target triangles must not be negative".into(),
            )),
        };
    }
    if (MIN_TARGET_TRIANGLES..=MAX_TARGET_TRIANGLES).contains(&target) {
        Ok(target)
    } else {
        Err(CoreError::Validation(format!(
            "Target triangles must be between {MIN_TARGET_TRIANGLES} and {MAX_TARGET_TRIANGLES}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Vertex probe parsing
// ---------------------------------------------------------------------------

/// Scan optimizer output for the first `vertices:` line carrying an integer.
///
/// Tokens after the marker are tried in order; trailing punctuation such as
/// `,` or `;` is ignored. Returns `None` when no line yields a count.
pub fn parse_vertex_count(output: &str) -> Option<i64> {
    output.lines().find_map(|line| {
        let (_, rest) = line.split_once(VERTEX_MARKER)?;
        rest.split_whitespace().find_map(|token| {
            token
                .trim_end_matches(|c: char| !c.is_ascii_digit())
                .parse::<i64>()
                .ok()
                .filter(|n| *n >= 0)
        })
    })
}

/// Estimated output vertex count for a preview job.
pub fn preview_vertex_estimate(vertex_count_before: i64) -> i64 {
    // Split before multiplying so counts near i64::MAX cannot overflow.
    let before = vertex_count_before.max(0);
    before / 100 * PREVIEW_REDUCTION_PERCENT + before % 100 * PREVIEW_REDUCTION_PERCENT / 100
}

// ---------------------------------------------------------------------------
// Simplification ratio
// ---------------------------------------------------------------------------

/// Ratio passed to the optimizer's `-si` flag.
///
/// Both counts are read in the optimizer's reported unit. The denominator
/// is clamped to at least 1 and the result to `(0, 1]`, so the value is
/// always finite.
pub fn simplification_ratio(target: i64, vertex_count_before: i64) -> f64 {
    let denominator = vertex_count_before.max(1) as f64;
    let ratio = target.max(1) as f64 / denominator;
    ratio.clamp(f64::MIN_POSITIVE, 1.0)
}

/// Render a ratio for the command line without scientific notation.
pub fn format_ratio(ratio: f64) -> String {
    let s = format!("{ratio:.6}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "0" || s.is_empty() {
        "0.000001".to_string()
    } else {
        s.to_string()
    }
}

// ---------------------------------------------------------------------------
// Error detail
// ---------------------------------------------------------------------------

/// Cut `text` to [`MAX_ERROR_DETAIL_CHARS`] characters on a char boundary.
pub fn truncate_detail(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(MAX_ERROR_DETAIL_CHARS) {
        Some((idx, _)) => format!("{}{TRUNCATION_SUFFIX}", &text[..idx]),
        None => text.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
