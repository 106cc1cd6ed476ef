//! A single collected entity (volume, LUN, workload, shelf element, ...).
//!
//! Instances carry only labels; numeric values live in the matrix grid,
//! addressed by the instance's slot.

#[derive(Debug, Clone)]
pub struct Instance {
    slot: usize,
    labels: Vec<(String, String)>,
}

impl Instance {
    pub(crate) fn new(slot: usize) -> Self {
        Instance {
            slot,
            labels: Vec::new(),
        }
    }

    /// Position of this instance's cells in every metric column.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn set_label(&mut self, name: &str, value: &str) {
        if let Some(entry) = self.labels.iter_mut().find(|(n, _)| n == name) {
            entry.1 = value.to_string();
        } else {
            self.labels.push((name.to_string(), value.to_string()));
        }
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Labels in the order they were first set.
    pub fn labels(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}
