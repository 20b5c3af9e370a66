use std::collections::BTreeMap;

use crate::error::DetectorError;

use super::backends::{MotionDetector, StubDetector};
use super::detector::{Detector, DetectorSettings};

/// Builds a fresh detector instance from its settings.
pub type DetectorFactory = fn(&DetectorSettings) -> Box<dyn Detector>;

/// Name-keyed set of detector constructors.
///
/// Configuration names a detector; the registry turns the name into an
/// instance. Each dispatch loop gets its own instance, so detectors never
/// need to be shared or locked.
pub struct DetectorRegistry {
    factories: BTreeMap<String, DetectorFactory>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry holding the detectors shipped with the crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("stub", |_| Box::new(StubDetector::new()));
        registry.register("motion", |settings| {
            Box::new(MotionDetector::new(settings.clone()))
        });
        registry
    }

    /// Register a constructor. A later registration under the same name wins.
    pub fn register(&mut self, name: &str, factory: DetectorFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn create(
        &self,
        name: &str,
        settings: &DetectorSettings,
    ) -> Result<Box<dyn Detector>, DetectorError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| DetectorError::UnknownBackend(name.to_string()))?;
        Ok(factory(settings))
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_detectors_are_registered() {
        let registry = DetectorRegistry::with_builtin();
        assert_eq!(registry.list(), vec!["motion", "stub"]);
        let detector = registry
            .create("motion", &DetectorSettings::default())
            .unwrap();
        assert_eq!(detector.name(), "motion");
    }

    #[test]
    fn unknown_name_is_an_error() {
        let registry = DetectorRegistry::with_builtin();
        assert!(matches!(
            registry.create("opencv", &DetectorSettings::default()),
            Err(DetectorError::UnknownBackend(name)) if name == "opencv"
        ));
    }

    #[test]
    fn custom_detectors_can_replace_builtin() {
        let mut registry = DetectorRegistry::new();
        assert!(!registry.contains("stub"));
        registry.register("stub", |_| Box::new(MotionDetector::new(DetectorSettings::default())));
        let detector = registry.create("stub", &DetectorSettings::default()).unwrap();
        assert_eq!(detector.name(), "motion");
    }
}
