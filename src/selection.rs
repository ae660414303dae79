use log::debug;

use crate::messages::DeviceSnapshot;

/// The device currently focused for detail viewing, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection(Option<String>);

impl Selection {
    pub fn get(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Select `name` if it is part of the live roster.
    pub fn select(&mut self, name: &str, roster: &[DeviceSnapshot]) -> bool {
        if roster.iter().any(|d| d.name == name) {
            self.0 = Some(name.to_string());
            true
        } else {
            false
        }
    }

    /// Drop the selection when its device left the roster.
    pub fn retain_live(&mut self, roster: &[DeviceSnapshot]) {
        if let Some(name) = &self.0 {
            if !roster.iter().any(|d| &d.name == name) {
                debug!("Selected device {} disappeared, clearing selection", name);
                self.0 = None;
            }
        }
    }

    pub fn clear(&mut self) {
        self.0 = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(names: &[&str]) -> Vec<DeviceSnapshot> {
        names
            .iter()
            .map(|n| DeviceSnapshot {
                name: n.to_string(),
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn test_select_requires_live_device() {
        let mut selection = Selection::default();
        assert!(!selection.select("dev9", &roster(&["dev1"])));
        assert_eq!(selection.get(), None);
        assert!(selection.select("dev1", &roster(&["dev1"])));
        assert_eq!(selection.get(), Some("dev1"));
    }

    #[test]
    fn test_retain_live() {
        let mut selection = Selection::default();
        selection.select("dev1", &roster(&["dev1", "dev2"]));

        selection.retain_live(&roster(&["dev1"]));
        assert_eq!(selection.get(), Some("dev1"));

        selection.retain_live(&roster(&["dev2"]));
        assert_eq!(selection.get(), None);

        selection.retain_live(&[]);
        assert_eq!(selection.get(), None);
    }
}
