//! User decisions layered over catalog data.

use std::collections::BTreeMap;

use romrunner_catalog::Catalog;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideAction {
    Include,
    Exclude,
}

/// Per-item include/exclude decisions, keyed by content id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserOverrides {
    items: BTreeMap<String, OverrideAction>,
}

impl UserOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, content_id: &str) -> Option<OverrideAction> {
        self.items.get(content_id).copied()
    }

    pub fn set(&mut self, content_id: impl Into<String>, action: OverrideAction) {
        self.items.insert(content_id.into(), action);
    }

    pub fn remove(&mut self, content_id: &str) -> Option<OverrideAction> {
        self.items.remove(content_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<(String, OverrideAction)> for UserOverrides {
    fn from_iter<I: IntoIterator<Item = (String, OverrideAction)>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

/// Per-platform emulator choices that replace the OS defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmulatorOverrides {
    by_platform: BTreeMap<String, String>,
}

impl EmulatorOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, platform_id: impl Into<String>, emulator_id: impl Into<String>) {
        self.by_platform.insert(platform_id.into(), emulator_id.into());
    }

    pub fn get(&self, platform_id: &str) -> Option<&str> {
        self.by_platform.get(platform_id).map(String::as_str)
    }

    /// The emulator that will run `platform_id` content on `os_id`: the
    /// user's override, else the OS default.
    pub fn emulator_for<'a>(
        &'a self,
        catalog: &'a Catalog,
        os_id: &str,
        platform_id: &str,
    ) -> Option<&'a str> {
        self.get(platform_id).or_else(|| {
            catalog
                .operating_system(os_id)?
                .default_emulators
                .get(platform_id)
                .map(String::as_str)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_roundtrip_as_map() {
        let mut o = UserOverrides::new();
        o.set("gt4", OverrideAction::Include);
        o.set("ff7", OverrideAction::Exclude);
        let json = serde_json::to_string(&o).unwrap();
        assert_eq!(json, r#"{"ff7":"exclude","gt4":"include"}"#);
        let back: UserOverrides = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get("gt4"), Some(OverrideAction::Include));
        assert_eq!(back.len(), 2);
    }

    #[test]
    fn emulator_override_beats_os_default() {
        let catalog = Catalog::from_json(
            r#"{"version":"1","operatingSystems":[
                {"id":"muos","name":"muOS","defaultEmulators":{"gb":"gambatte","ps1":"pcsx"}}
            ]}"#,
        )
        .unwrap();
        let mut o = EmulatorOverrides::new();
        o.set("ps1", "duckstation");
        assert_eq!(o.emulator_for(&catalog, "muos", "gb"), Some("gambatte"));
        assert_eq!(o.emulator_for(&catalog, "muos", "ps1"), Some("duckstation"));
        assert_eq!(o.emulator_for(&catalog, "muos", "n64"), None);
        assert_eq!(o.emulator_for(&catalog, "unknown-os", "gb"), None);
    }
}
