use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RawObjectsConfig {
    #[serde(default)]
    pub track: Option<Vec<String>>,
}

/// One entry under `cameras:`. Frigate allows a bare `cam: ~`, hence all the defaults.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RawCameraConfig {
    #[serde(default)]
    pub objects: Option<RawObjectsConfig>,
}

impl RawCameraConfig {
    pub fn tracked(&self) -> &[String] {
        self.objects
            .as_ref()
            .and_then(|o| o.track.as_deref())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraConfig {
    pub name: String,
    /// Global defaults followed by camera-specific labels, first occurrence wins.
    pub tracked_objects: Vec<String>,
}

impl CameraConfig {
    pub fn new(name: impl Into<String>, global: &[String], specific: &[String]) -> Self {
        let mut tracked_objects: Vec<String> = Vec::with_capacity(global.len() + specific.len());
        for label in global.iter().chain(specific) {
            if !tracked_objects.contains(label) {
                tracked_objects.push(label.clone());
            }
        }
        CameraConfig { name: name.into(), tracked_objects }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn merges_global_then_camera_labels() {
        let cam = CameraConfig::new("cam1", &labels(&["person"]), &labels(&["car", "dog"]));
        assert_eq!(cam.tracked_objects, labels(&["person", "car", "dog"]));
    }

    #[test]
    fn duplicate_labels_collapse() {
        let cam = CameraConfig::new("cam1", &labels(&["person", "car"]), &labels(&["car", "person"]));
        assert_eq!(cam.tracked_objects, labels(&["person", "car"]));
    }

    #[test]
    fn no_labels_anywhere_tracks_nothing() {
        let cam = CameraConfig::new("cam1", &[], &[]);
        assert!(cam.tracked_objects.is_empty());
    }
}
