// SPDX-License-Identifier: MIT

//! Advisory risk evaluation over unified patch text.
//!
//! Risk flags never block apply — they are surfaced through diff review
//! so the caller can decide how much scrutiny a patch deserves.

use serde::{Deserialize, Serialize};

use crate::diff::DiffStats;

/// Path fragments that mark a file as sensitive.
const SENSITIVE_FRAGMENTS: &[&str] = &[
    ".env",
    "secret",
    "credential",
    "password",
    "id_rsa",
    "id_ed25519",
    ".pem",
    ".keystore",
    "token",
];

/// Thresholds for the large-change flag.
const LARGE_FILES: u32 = 10;
const LARGE_LINES: u32 = 500;

/// Advisory flags computed from a patch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskFlags {
    /// The patch touches an environment/secret/credential-looking path.
    pub touches_sensitive_path: bool,
    /// More than 10 files or more than 500 changed lines.
    pub large_change: bool,
    /// The patch deletes lines or whole files.
    pub deletions_present: bool,
    /// The patch carries binary content.
    pub binary_present: bool,
}

impl RiskFlags {
    /// Pure evaluation over the patch text and its stats.
    pub fn evaluate(patch: &str, stats: &DiffStats) -> Self {
        let mut flags = RiskFlags {
            large_change: stats.files_changed > LARGE_FILES
                || stats.additions + stats.deletions > LARGE_LINES,
            deletions_present: stats.deletions > 0,
            ..RiskFlags::default()
        };

        for line in patch.lines() {
            if let Some(path) = header_path(line) {
                let lower = path.to_ascii_lowercase();
                if SENSITIVE_FRAGMENTS.iter().any(|frag| lower.contains(frag)) {
                    flags.touches_sensitive_path = true;
                }
            }
            if line.starts_with("deleted file mode") {
                flags.deletions_present = true;
            }
            if line.starts_with("Binary files ") || line == "GIT binary patch" {
                flags.binary_present = true;
            }
        }

        flags
    }

    pub fn any(&self) -> bool {
        self.touches_sensitive_path
            || self.large_change
            || self.deletions_present
            || self.binary_present
    }
}

/// Extract the touched path from a `diff --git a/x b/x` header line.
fn header_path(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("diff --git a/")?;
    // The b/ side reflects renames; take it when present.
    match rest.split(" b/").nth(1) {
        Some(b_side) => Some(b_side),
        None => rest.split(' ').next(),
    }
}

#[cfg(test)]
#[path = "risk_tests.rs"]
mod tests;
