//! grammers message → core [`Item`] conversion.

use grammers_client::{
    grammers_tl_types as tl,
    types::{photo_sizes::VecExt, Media, Message},
};

use relay_core::{
    domain::{Item, MediaKind, MessageId},
    formatting::{entities_to_html, EntityKind, TextEntity},
};

/// Build an [`Item`] from a fetched message. Service messages and messages with
/// neither text nor transferable media yield `None`.
pub fn to_item(msg: &Message) -> Option<Item> {
    if msg.action().is_some() {
        return None;
    }

    let text = msg.text();
    let entities: Vec<TextEntity> = msg
        .fmt_entities()
        .map(|ents| ents.iter().filter_map(convert_entity).collect())
        .unwrap_or_default();

    let (media, size, file_name) = match msg.media() {
        Some(m) => describe_media(&m),
        None => (MediaKind::None, None, None),
    };

    if text.trim().is_empty() && !media.has_media() {
        return None;
    }

    Some(Item {
        id: MessageId(msg.id()),
        html: entities_to_html(text, &entities),
        media,
        size,
        file_name,
    })
}

fn describe_media(media: &Media) -> (MediaKind, Option<u64>, Option<String>) {
    match media {
        Media::Photo(photo) => {
            let size = photo.thumbs().largest().map(|t| t.size() as u64);
            (MediaKind::Photo, size, None)
        }
        Media::Sticker(sticker) => {
            let size = u64::try_from(sticker.document.size()).ok();
            (MediaKind::Sticker, size, None)
        }
        Media::Document(doc) => {
            let traits = match &doc.raw.document {
                Some(tl::enums::Document::Document(d)) => document_traits(&d.attributes),
                _ => DocumentTraits::default(),
            };
            let name = doc.name();
            let file_name = (!name.is_empty()).then(|| name.to_string());
            (
                classify(&traits),
                u64::try_from(doc.size()).ok(),
                file_name,
            )
        }
        // Link previews, polls, locations and the like travel as plain text.
        _ => (MediaKind::None, None, None),
    }
}

/// The document attributes that decide how a file is re-sent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentTraits {
    pub video: Option<VideoTraits>,
    pub audio: Option<AudioTraits>,
    pub sticker: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VideoTraits {
    pub round: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<u32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AudioTraits {
    pub voice: bool,
}

fn document_traits(attrs: &[tl::enums::DocumentAttribute]) -> DocumentTraits {
    let mut traits = DocumentTraits::default();
    for attr in attrs {
        match attr {
            tl::enums::DocumentAttribute::Video(v) => {
                traits.video = Some(VideoTraits {
                    round: v.round_message,
                    width: u32::try_from(v.w).ok().filter(|w| *w > 0),
                    height: u32::try_from(v.h).ok().filter(|h| *h > 0),
                    duration: Some(v.duration as u32).filter(|d| *d > 0),
                });
            }
            tl::enums::DocumentAttribute::Audio(a) => {
                traits.audio = Some(AudioTraits { voice: a.voice });
            }
            tl::enums::DocumentAttribute::Sticker(_) => traits.sticker = true,
            _ => {}
        }
    }
    traits
}

/// Pick the upload kind for a document.
pub fn classify(traits: &DocumentTraits) -> MediaKind {
    if traits.sticker {
        return MediaKind::Sticker;
    }
    if let Some(v) = traits.video {
        if v.round {
            return MediaKind::VideoNote;
        }
        return MediaKind::Video {
            width: v.width,
            height: v.height,
            duration: v.duration,
        };
    }
    match traits.audio {
        Some(AudioTraits { voice: true }) => MediaKind::Voice,
        Some(AudioTraits { voice: false }) => MediaKind::Audio,
        None => MediaKind::Document,
    }
}

pub fn convert_entity(entity: &tl::enums::MessageEntity) -> Option<TextEntity> {
    let (offset, length, kind) = match entity {
        tl::enums::MessageEntity::Bold(e) => (e.offset, e.length, EntityKind::Bold),
        tl::enums::MessageEntity::Italic(e) => (e.offset, e.length, EntityKind::Italic),
        tl::enums::MessageEntity::Underline(e) => (e.offset, e.length, EntityKind::Underline),
        tl::enums::MessageEntity::Strike(e) => (e.offset, e.length, EntityKind::Strikethrough),
        tl::enums::MessageEntity::Spoiler(e) => (e.offset, e.length, EntityKind::Spoiler),
        tl::enums::MessageEntity::Code(e) => (e.offset, e.length, EntityKind::Code),
        tl::enums::MessageEntity::Pre(e) => (
            e.offset,
            e.length,
            EntityKind::Pre {
                language: (!e.language.is_empty()).then(|| e.language.clone()),
            },
        ),
        tl::enums::MessageEntity::TextUrl(e) => (
            e.offset,
            e.length,
            EntityKind::TextUrl { url: e.url.clone() },
        ),
        tl::enums::MessageEntity::Blockquote(e) => (e.offset, e.length, EntityKind::Blockquote),
        _ => return None,
    };

    Some(TextEntity::new(
        usize::try_from(offset).ok()?,
        usize::try_from(length).ok()?,
        kind,
    ))
}
