//! Mapping between release version strings and integer version codes.

const MAJOR_STEP: i64 = 1_000_000;
const MINOR_STEP: i64 = 1_000;

/// Policy converting version strings to codes and deciding compatibility.
pub trait VersionCodec: Send + Sync {
    /// Encode a version string; 0 when it cannot be parsed.
    fn to_code(&self, version: &str) -> i32;

    /// Render a version code.
    fn render(&self, code: i32) -> String;

    /// Whether content built for `target` can be applied on top of `local`.
    fn is_compatible(&self, local: i32, target: i32) -> bool;
}

/// `major.minor.patch` versions packed as `major * 1_000_000 + minor * 1_000 + patch`.
///
/// Missing trailing components count as zero and a bare integer is taken as
/// an already encoded code.
#[derive(Debug, Clone, Copy, Default)]
pub struct DottedVersionCodec;

impl DottedVersionCodec {
    /// Major component of a code.
    pub fn major(code: i32) -> i32 {
        (i64::from(code) / MAJOR_STEP) as i32
    }

    fn parse(version: &str) -> Option<semver::Version> {
        let trimmed = version.trim().trim_start_matches(['v', 'V']);
        let padded = match trimmed.matches('.').count() {
            0 => format!("{trimmed}.0.0"),
            1 => format!("{trimmed}.0"),
            _ => trimmed.to_string(),
        };
        semver::Version::parse(&padded).ok()
    }
}

impl VersionCodec for DottedVersionCodec {
    fn to_code(&self, version: &str) -> i32 {
        let trimmed = version.trim();
        if !trimmed.contains('.') {
            if let Ok(code) = trimmed.parse::<i32>() {
                return code.max(0);
            }
        }

        let Some(parsed) = Self::parse(trimmed) else {
            return 0;
        };
        if parsed.minor >= MINOR_STEP as u64 || parsed.patch >= MINOR_STEP as u64 {
            return 0;
        }
        let code = parsed.major as i64 * MAJOR_STEP
            + parsed.minor as i64 * MINOR_STEP
            + parsed.patch as i64;
        i32::try_from(code).unwrap_or(0)
    }

    fn render(&self, code: i32) -> String {
        let code = i64::from(code.max(0));
        format!(
            "{}.{}.{}",
            code / MAJOR_STEP,
            (code % MAJOR_STEP) / MINOR_STEP,
            code % MINOR_STEP
        )
    }

    fn is_compatible(&self, local: i32, target: i32) -> bool {
        Self::major(local) == Self::major(target)
    }
}
