//! The image currently shown for the preview.

use crate::image_fetch::ObjectUrl;

/// Tracks which image the preview wants and the object URL being shown.
///
/// Loads finish in any order; a result is kept only while its path is still
/// the wanted one, otherwise its URL is dropped and thereby revoked.
#[derive(Debug, Default)]
pub struct PreviewImage {
    wanted: Option<String>,
    shown: Option<(String, ObjectUrl)>,
}

impl PreviewImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the path the preview now points at.
    ///
    /// Returns the path to load, or `None` when nothing needs loading. A
    /// cleared preview releases the shown image.
    pub fn request(&mut self, path: Option<String>) -> Option<String> {
        self.wanted = path.clone();
        let Some(path) = path else {
            self.shown = None;
            return None;
        };

        match &self.shown {
            Some((shown, _)) if *shown == path => None,
            _ => Some(path),
        }
    }

    /// Offer a finished load; stale results are discarded
    pub fn complete(&mut self, path: &str, url: ObjectUrl) -> Option<&ObjectUrl> {
        if self.wanted.as_deref() != Some(path) {
            tracing::debug!("Discarding superseded image {}", path);
            return None;
        }
        self.shown = Some((path.to_string(), url));
        self.shown.as_ref().map(|(_, url)| url)
    }

    pub fn current(&self) -> Option<&ObjectUrl> {
        self.shown.as_ref().map(|(_, url)| url)
    }
}
