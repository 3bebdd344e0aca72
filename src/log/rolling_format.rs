use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use super::LOG_FILE_SUFFIX;

/// Time resolution at which the active log file is switched to a new path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollingFormat {
    /// single file, never rotated
    Never,
    Monthly,
    Daily,
    #[default]
    Hourly,
    Minutely,
    Secondly,
}

impl RollingFormat {
    fn pattern(&self) -> &'static str {
        match self {
            RollingFormat::Never => "",
            RollingFormat::Monthly => "%Y%m",
            RollingFormat::Daily => "%Y%m%d",
            RollingFormat::Hourly => "%Y%m%d%H",
            RollingFormat::Minutely => "%Y%m%d%H%M",
            RollingFormat::Secondly => "%Y%m%d%H%M%S",
        }
    }

    /// Names the rotation interval containing `now`; empty for [`RollingFormat::Never`].
    pub fn fragment(&self, now: &NaiveDateTime) -> String {
        match self {
            RollingFormat::Never => String::new(),
            _ => now.format(self.pattern()).to_string(),
        }
    }
}

impl fmt::Display for RollingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RollingFormat::Never => "never",
            RollingFormat::Monthly => "monthly",
            RollingFormat::Daily => "daily",
            RollingFormat::Hourly => "hourly",
            RollingFormat::Minutely => "minutely",
            RollingFormat::Secondly => "secondly",
        };
        f.write_str(name)
    }
}

/// Destination of one rotation interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollingPath {
    /// directory holding the file, created on demand
    pub dir: PathBuf,
    /// full path of the log file
    pub file: PathBuf,
    /// fragment of the interval this path belongs to
    pub fragment: String,
}

/// Maps `base_path` (directory + file stem) to the file for the interval containing `now`.
///
/// Coarser time units become nested directories and the finest unit is
/// embedded in the file name, e.g. hourly rotation of `logs/app` at
/// 2024-01-15 10:xx gives `logs/202401/15/app_10.log`.
pub fn compute_path(base_path: &Path, format: RollingFormat, now: &NaiveDateTime) -> RollingPath {
    let base_dir = base_path.parent().unwrap_or_else(|| Path::new(""));
    let stem = base_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let year_month = format!("{:04}{:02}", now.year(), now.month());
    let (dir, finest) = match format {
        RollingFormat::Never => {
            return RollingPath {
                dir: base_dir.to_path_buf(),
                file: base_dir.join(format!("{}.{}", stem, LOG_FILE_SUFFIX)),
                fragment: String::new(),
            };
        }
        RollingFormat::Monthly => (base_dir.join(format!("{:04}", now.year())), now.month()),
        RollingFormat::Daily => (base_dir.join(&year_month), now.day()),
        RollingFormat::Hourly => (
            base_dir.join(&year_month).join(format!("{:02}", now.day())),
            now.hour(),
        ),
        RollingFormat::Minutely => (
            base_dir
                .join(&year_month)
                .join(format!("{:02}", now.day()))
                .join(format!("{:02}", now.hour())),
            now.minute(),
        ),
        RollingFormat::Secondly => (
            base_dir
                .join(&year_month)
                .join(format!("{:02}", now.day()))
                .join(format!("{:02}", now.hour()))
                .join(format!("{:02}", now.minute())),
            now.second(),
        ),
    };

    RollingPath {
        file: dir.join(format!("{}_{:02}.{}", stem, finest, LOG_FILE_SUFFIX)),
        dir,
        fragment: format.fragment(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rstest::rstest;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[rstest]
    #[case(RollingFormat::Never, "/logs/app.log", "")]
    #[case(RollingFormat::Monthly, "/logs/2024/app_01.log", "202401")]
    #[case(RollingFormat::Daily, "/logs/202401/app_15.log", "20240115")]
    #[case(RollingFormat::Hourly, "/logs/202401/15/app_10.log", "2024011510")]
    #[case(RollingFormat::Minutely, "/logs/202401/15/10/app_05.log", "202401151005")]
    #[case(RollingFormat::Secondly, "/logs/202401/15/10/05/app_09.log", "20240115100509")]
    fn test_layout(
        #[case] format: RollingFormat,
        #[case] expected_file: &str,
        #[case] expected_fragment: &str,
    ) {
        let path = compute_path(Path::new("/logs/app"), format, &at(2024, 1, 15, 10, 5, 9));
        assert_eq!(path.file, PathBuf::from(expected_file));
        assert_eq!(Some(path.dir.as_path()), path.file.parent());
        assert_eq!(path.fragment, expected_fragment);
    }

    #[rstest]
    #[case(RollingFormat::Monthly, at(2024, 1, 31, 23, 0, 0), at(2024, 2, 1, 0, 0, 0))]
    #[case(RollingFormat::Daily, at(2024, 1, 15, 23, 59, 59), at(2024, 1, 16, 0, 0, 0))]
    #[case(RollingFormat::Hourly, at(2024, 1, 15, 10, 0, 0), at(2024, 1, 15, 11, 0, 0))]
    #[case(RollingFormat::Minutely, at(2024, 1, 15, 10, 0, 59), at(2024, 1, 15, 10, 1, 0))]
    #[case(RollingFormat::Secondly, at(2024, 1, 15, 10, 0, 0), at(2024, 1, 15, 10, 0, 1))]
    fn test_distinct_intervals_get_distinct_files(
        #[case] format: RollingFormat,
        #[case] t1: NaiveDateTime,
        #[case] t2: NaiveDateTime,
    ) {
        let base = Path::new("logs/app");
        let first = compute_path(base, format, &t1);
        let second = compute_path(base, format, &t2);
        assert_ne!(first.fragment, second.fragment);
        assert_ne!(first.file, second.file);
    }

    #[test]
    fn test_same_interval_is_stable() {
        let base = Path::new("logs/app");
        let first = compute_path(base, RollingFormat::Hourly, &at(2024, 1, 15, 10, 0, 0));
        let second = compute_path(base, RollingFormat::Hourly, &at(2024, 1, 15, 10, 59, 59));
        assert_eq!(first, second);
    }

    #[test]
    fn test_never_ignores_time() {
        let base = Path::new("logs/app");
        let first = compute_path(base, RollingFormat::Never, &at(2020, 1, 1, 0, 0, 0));
        let second = compute_path(base, RollingFormat::Never, &at(2030, 6, 1, 12, 0, 0));
        assert_eq!(first, second);
        assert_eq!(first.file, PathBuf::from("logs/app.log"));
    }

    #[test]
    fn test_relative_stem_without_directory() {
        let path = compute_path(Path::new("app"), RollingFormat::Daily, &at(2024, 3, 7, 0, 0, 0));
        assert_eq!(path.file, PathBuf::from("202403/app_07.log"));
    }

    #[test]
    fn test_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            rolling: RollingFormat,
        }
        let wrapper: Wrapper = config::Config::builder()
            .set_override("rolling", "minutely")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(wrapper.rolling, RollingFormat::Minutely);
        assert_eq!(RollingFormat::Minutely.to_string(), "minutely");
    }
}
