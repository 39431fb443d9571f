//! Media-bearing block kinds
//!
//! Image and gallery markup is regenerated from attributes. The other kinds
//! keep their markup and get textual substitution.

use relink_blocks::{AttrValue, Block, JsonPath, CORE_NAMESPACE};

/// A block kind the engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Gallery,
    Cover,
    MediaText,
    Video,
    Audio,
    File,
}

/// A URL field of a media block with the identifier stored next to it
#[derive(Debug, Clone, PartialEq)]
pub struct DirectField<'a> {
    pub path: JsonPath,
    pub url: &'a str,
    pub id_path: JsonPath,
    pub id: Option<u64>,
}

impl MediaKind {
    /// Classify a block
    #[must_use]
    pub fn of(block: &Block) -> Option<Self> {
        let name = block.name()?;
        if name.namespace() != CORE_NAMESPACE {
            return None;
        }
        Some(match name.name() {
            "image" => Self::Image,
            "gallery" => Self::Gallery,
            "cover" => Self::Cover,
            "media-text" => Self::MediaText,
            "video" => Self::Video,
            "audio" => Self::Audio,
            "file" => Self::File,
            _ => return None,
        })
    }

    /// Attribute holding the asset identifier
    #[must_use]
    pub fn id_field(self) -> &'static str {
        match self {
            Self::Gallery => "ids",
            Self::MediaText => "mediaId",
            Self::Image | Self::Cover | Self::Video | Self::Audio | Self::File => "id",
        }
    }

    /// Attribute holding the asset URL (galleries keep theirs per image)
    #[must_use]
    pub fn url_field(self) -> Option<&'static str> {
        match self {
            Self::Image | Self::Cover => Some("url"),
            Self::MediaText => Some("mediaUrl"),
            Self::Video | Self::Audio => Some("src"),
            Self::File => Some("href"),
            Self::Gallery => None,
        }
    }

    /// Check whether markup is rebuilt from attributes
    #[inline]
    #[must_use]
    pub fn regenerates_markup(self) -> bool {
        matches!(self, Self::Image | Self::Gallery)
    }

    /// Tag attributes that carry the asset URL in markup
    #[must_use]
    pub fn markup_url_attributes(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::File => &[("a", "href"), ("object", "data")],
            Self::Video | Self::Audio => &[("video", "src"), ("audio", "src"), ("source", "src")],
            Self::Image | Self::Gallery | Self::Cover | Self::MediaText => &[("img", "src"), ("video", "src")],
        }
    }

    /// Structured URL fields of a block of this kind
    #[must_use]
    pub fn direct_fields(self, block: &Block) -> Vec<DirectField<'_>> {
        let attrs = &block.attributes;
        let id_of = |value: Option<&AttrValue>| value.and_then(AttrValue::as_i64).and_then(|i| u64::try_from(i).ok());
        if let Some(field) = self.url_field() {
            let id_path = JsonPath::root().key(self.id_field());
            return attrs
                .get(field)
                .and_then(AttrValue::as_str)
                .filter(|s| !s.is_empty())
                .map(|url| DirectField {
                    path: JsonPath::root().key(field),
                    url,
                    id: id_of(attrs.get(self.id_field())),
                    id_path,
                })
                .into_iter()
                .collect();
        }

        let Some(images) = attrs.get("images").and_then(AttrValue::as_list) else {
            return Vec::new();
        };
        let mut fields = Vec::new();
        for (i, image) in images.iter().enumerate() {
            let Some(map) = image.as_map() else { continue };
            let base = JsonPath::root().key("images").index(i);
            for key in ["url", "fullUrl"] {
                if let Some(url) = map.get(key).and_then(AttrValue::as_str).filter(|s| !s.is_empty()) {
                    fields.push(DirectField {
                        path: base.key(key),
                        url,
                        id_path: base.key("id"),
                        id: id_of(map.get("id")),
                    });
                }
            }
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relink_blocks::BlockName;
    use serde_json::json;

    #[test]
    fn classify_core_kinds_only() {
        assert_eq!(MediaKind::of(&Block::named(BlockName::core("image"))), Some(MediaKind::Image));
        assert_eq!(MediaKind::of(&Block::named(BlockName::core("media-text"))), Some(MediaKind::MediaText));
        assert_eq!(MediaKind::of(&Block::named(BlockName::new("acme", "image"))), None);
        assert_eq!(MediaKind::of(&Block::untyped("x")), None);
    }

    #[test]
    fn direct_fields_of_media_text() {
        let block = Block::named(BlockName::core("media-text"))
            .with_attribute("mediaId", 9_i64)
            .with_attribute("mediaUrl", "https://o/wp-content/uploads/m.jpg");
        let fields = MediaKind::MediaText.direct_fields(&block);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].path.to_string(), "mediaUrl");
        assert_eq!(fields[0].id, Some(9));
    }

    #[test]
    fn direct_fields_of_legacy_gallery() {
        let mut block = Block::named(BlockName::core("gallery"));
        block.attributes.insert(
            "images".into(),
            AttrValue::from(json!([{"url": "/u/a.jpg", "fullUrl": "/u/a-big.jpg", "id": 3}, {"url": ""}])),
        );
        let fields = MediaKind::Gallery.direct_fields(&block);
        let paths: Vec<String> = fields.iter().map(|f| f.path.to_string()).collect();
        assert_eq!(paths, vec!["images[0].url", "images[0].fullUrl"]);
        assert_eq!(fields[0].id, Some(3));
    }
}
