use std::path::Path;

use symphonia::core::codecs::CodecType;
use symphonia::core::formats::FormatReader;
use symphonia::core::meta::{MetadataRevision, StandardTagKey, Value, Visual};
use symphonia::core::probe::ProbedMetadata;

use crate::models::{AudioMetadata, CoverImage};

/// Metadata extractor for audio files using symphonia
pub struct MetadataExtractor;

impl MetadataExtractor {
    /// Collect tags and artwork from the probe result and the container.
    /// Container tags win over tags found while probing.
    pub fn extract(probed: &mut ProbedMetadata, format_reader: &mut dyn FormatReader) -> AudioMetadata {
        let mut metadata = AudioMetadata::new();

        if let Some(probed_meta) = probed.get() {
            if let Some(revision) = probed_meta.current() {
                Self::extract_from_revision(revision, &mut metadata);
            }
        }

        if let Some(revision) = format_reader.metadata().current() {
            Self::extract_from_revision(revision, &mut metadata);
        }

        metadata
    }

    /// Extract metadata from a metadata revision
    fn extract_from_revision(revision: &MetadataRevision, metadata: &mut AudioMetadata) {
        for tag in revision.tags() {
            let Value::String(text) = &tag.value else {
                continue;
            };

            match tag.std_key {
                Some(StandardTagKey::TrackTitle) => metadata.title = Some(text.clone()),
                Some(StandardTagKey::Artist) => metadata.artist = Some(text.clone()),
                Some(StandardTagKey::Album) => metadata.album = Some(text.clone()),
                Some(StandardTagKey::AlbumArtist) => {
                    if metadata.artist.is_none() {
                        metadata.artist = Some(text.clone());
                    }
                }
                Some(_) => {}
                None => Self::apply_raw_tag(&tag.key, text, metadata),
            }
        }

        if let Some(cover) = Self::pick_cover(revision.visuals()) {
            metadata.cover_image = Some(cover);
        }
    }

    /// Non-standard tags matched by key name
    fn apply_raw_tag(key: &str, text: &str, metadata: &mut AudioMetadata) {
        match key.to_lowercase().as_str() {
            "title" | "tit2" => metadata.title = Some(text.to_string()),
            "artist" | "tpe1" => metadata.artist = Some(text.to_string()),
            "album" | "talb" => metadata.album = Some(text.to_string()),
            _ => {}
        }
    }

    /// First image attached to the revision
    fn pick_cover(visuals: &[Visual]) -> Option<CoverImage> {
        visuals
            .iter()
            .find(|visual| !visual.data.is_empty())
            .map(|visual| CoverImage {
                media_type: visual.media_type.clone(),
                data: visual.data.to_vec(),
            })
    }

    /// Container name shown in the track subtitle
    pub fn container_name<P: AsRef<Path>>(path: P, codec_type: CodecType) -> String {
        if let Some(ext) = path.as_ref().extension().and_then(|e| e.to_str()) {
            match ext.to_lowercase().as_str() {
                "flac" => return "FLAC".to_string(),
                "wav" | "wave" => return "WAV".to_string(),
                "m4a" | "alac" => return "M4A".to_string(),
                "mp3" => return "MP3".to_string(),
                "ogg" | "oga" => return "OGG".to_string(),
                _ => {}
            }
        }

        use symphonia::core::codecs::*;
        match codec_type {
            CODEC_TYPE_FLAC => "FLAC",
            CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE |
            CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE |
            CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE |
            CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE |
            CODEC_TYPE_PCM_F64LE | CODEC_TYPE_PCM_F64BE => "WAV",
            CODEC_TYPE_ALAC | CODEC_TYPE_AAC => "M4A",
            CODEC_TYPE_MP3 => "MP3",
            CODEC_TYPE_VORBIS => "OGG",
            _ => "UNKNOWN",
        }
        .to_string()
    }
}
