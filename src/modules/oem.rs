//! `/etc/oem-release`

use super::PlacedFile;
use crate::config::OemConfig;
use std::fmt::Write;

pub const OEM_RELEASE: &str = "etc/oem-release";

/// Render the OEM release file, nothing when no id is given
pub fn compile(oem: &OemConfig) -> Option<PlacedFile> {
    if oem.id.is_empty() {
        return None;
    }

    let mut content = String::new();
    writeln!(content, "ID={}", oem.id).unwrap();
    writeln!(content, "VERSION_ID={}", oem.version_id).unwrap();
    writeln!(content, "NAME=\"{}\"", oem.name).unwrap();
    writeln!(content, "HOME_URL=\"{}\"", oem.home_url).unwrap();
    writeln!(content, "BUG_REPORT_URL=\"{}\"", oem.bug_report_url).unwrap();

    Some(PlacedFile::new(OEM_RELEASE, content, 0o644))
}
