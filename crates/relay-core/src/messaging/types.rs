use std::path::PathBuf;

use crate::domain::MediaKind;

/// A downloaded payload ready to be re-sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaUpload {
    pub kind: MediaKind,
    pub path: PathBuf,
    /// Original caption as Telegram HTML. Ignored for kinds without captions.
    pub caption_html: Option<String>,
}

impl MediaUpload {
    /// Caption to attach, if the kind supports one and it is not blank.
    pub fn caption(&self) -> Option<&str> {
        match self.kind {
            MediaKind::Sticker | MediaKind::VideoNote => None,
            _ => self
                .caption_html
                .as_deref()
                .filter(|c| !c.trim().is_empty()),
        }
    }
}
