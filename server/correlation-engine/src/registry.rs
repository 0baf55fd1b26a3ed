//! Device registry lookup (host → ship_id), consulted by the normalizer before
//! the hostname heuristic.

use std::collections::HashMap;

pub trait DeviceRegistry: Send + Sync {
  fn ship_for_host(&self, host: &str) -> Option<String>;
}

/// Registry backed by a fixed map, usually loaded from the `[devices]` config table.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
  hosts: HashMap<String, String>,
}

impl StaticRegistry {
  pub fn new(hosts: HashMap<String, String>) -> Self {
    let hosts = hosts
      .into_iter()
      .map(|(host, ship)| (host.trim().to_ascii_lowercase(), ship.trim().to_string()))
      .filter(|(host, ship)| !host.is_empty() && !ship.is_empty())
      .collect();
    Self { hosts }
  }

  pub fn len(&self) -> usize {
    self.hosts.len()
  }

  pub fn is_empty(&self) -> bool {
    self.hosts.is_empty()
  }
}

impl DeviceRegistry for StaticRegistry {
  fn ship_for_host(&self, host: &str) -> Option<String> {
    self.hosts.get(&host.trim().to_ascii_lowercase()).cloned()
  }
}
