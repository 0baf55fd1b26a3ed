//! Static severity label → numeric priority table.
//!
//! The lookup is total: unknown or absent labels map to [`LOWEST`], so every
//! comparison downstream is between two concrete integers.

/// Lowest priority, also the default for unrecognized labels.
pub const LOWEST: u8 = 1;

/// Label table in rank order. Earlier entries win ties at the same priority.
pub const TABLE: [(&str, u8); 7] = [
  ("critical", 4),
  ("high", 3),
  ("medium", 2),
  ("warning", 2),
  ("low", 1),
  ("info", 1),
  ("debug", 1),
];

/// Canonical label used when no recognized label is available for a priority.
pub fn canonical_label(priority: u8) -> &'static str {
  match priority {
    p if p >= 4 => "critical",
    3 => "high",
    2 => "medium",
    _ => "info",
  }
}

pub fn priority_of(label: Option<&str>) -> u8 {
  label
    .map(|l| l.trim().to_ascii_lowercase())
    .and_then(|l| TABLE.iter().find(|(name, _)| *name == l).map(|(_, p)| *p))
    .unwrap_or(LOWEST)
}

/// Position of a recognized label in [`TABLE`]; lower is higher ranked.
pub fn rank_of(label: &str) -> Option<usize> {
  let l = label.trim().to_ascii_lowercase();
  TABLE.iter().position(|(name, _)| *name == l)
}
