//! Media kind classification by leading bytes.
//!
//! Files are classified by content signature, never by extension, so a
//! mislabeled `.jpg` holding an MP4 still routes to the video path and
//! arbitrary junk is rejected before it enters the pipeline.

use serde::{Deserialize, Serialize};

/// Closed set of content kinds the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Unsupported,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
            MediaKind::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Classify media content by magic bytes.
/// 16 bytes of head are enough for every recognized signature.
pub fn sniff_media_kind(data: &[u8]) -> MediaKind {
    if data.len() < 4 {
        return MediaKind::Unsupported;
    }

    // JPEG: FF D8 FF
    if data.len() >= 3 && data[0] == 0xFF && data[1] == 0xD8 && data[2] == 0xFF {
        return MediaKind::Image;
    }

    // PNG: 89 50 4E 47 0D 0A 1A 0A
    if data.len() >= 8 && data[0..8] == [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] {
        return MediaKind::Image;
    }

    // RIFF container: WebP image or AVI video
    if data.len() >= 12 && &data[0..4] == b"RIFF" {
        if &data[8..12] == b"WEBP" {
            return MediaKind::Image;
        }
        if &data[8..12] == b"AVI " {
            return MediaKind::Video;
        }
        return MediaKind::Unsupported;
    }

    // GIF: GIF87a or GIF89a
    if data.len() >= 6 && &data[0..3] == b"GIF" {
        return MediaKind::Image;
    }

    // BMP: BM
    if data.len() >= 2 && &data[0..2] == b"BM" {
        return MediaKind::Image;
    }

    // ISO BMFF (MP4/MOV/M4V): ftyp box after the 4-byte size field
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        // AVIF/HEIC stills share the container; check the major brand
        if &data[8..12] == b"avif" || &data[8..12] == b"avis" || &data[8..12] == b"heic" {
            return MediaKind::Image;
        }
        return MediaKind::Video;
    }

    // Matroska / WebM: EBML header 1A 45 DF A3
    if data[0..4] == [0x1A, 0x45, 0xDF, 0xA3] {
        return MediaKind::Video;
    }

    // MPEG-TS sync byte repeated at 188-byte packet boundaries; a single
    // leading 0x47 is too weak a signal, so require the second sync too
    if data.len() >= 189 && data[0] == 0x47 && data[188] == 0x47 {
        return MediaKind::Video;
    }

    MediaKind::Unsupported
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_jpeg() {
        let jpeg_header = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
        assert_eq!(sniff_media_kind(&jpeg_header), MediaKind::Image);
    }

    #[test]
    fn test_sniff_png() {
        let png_header = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(sniff_media_kind(&png_header), MediaKind::Image);
    }

    #[test]
    fn test_sniff_webp() {
        let mut webp = [0u8; 12];
        webp[0..4].copy_from_slice(b"RIFF");
        webp[8..12].copy_from_slice(b"WEBP");
        assert_eq!(sniff_media_kind(&webp), MediaKind::Image);
    }

    #[test]
    fn test_sniff_gif() {
        assert_eq!(sniff_media_kind(b"GIF89a"), MediaKind::Image);
    }

    #[test]
    fn test_sniff_mp4() {
        let mut mp4 = [0u8; 16];
        mp4[3] = 0x18; // box size
        mp4[4..8].copy_from_slice(b"ftyp");
        mp4[8..12].copy_from_slice(b"isom");
        assert_eq!(sniff_media_kind(&mp4), MediaKind::Video);
    }

    #[test]
    fn test_sniff_avif_is_image_despite_ftyp() {
        let mut avif = [0u8; 16];
        avif[4..8].copy_from_slice(b"ftyp");
        avif[8..12].copy_from_slice(b"avif");
        assert_eq!(sniff_media_kind(&avif), MediaKind::Image);
    }

    #[test]
    fn test_sniff_matroska() {
        let mkv = [0x1A, 0x45, 0xDF, 0xA3, 0x01, 0x02];
        assert_eq!(sniff_media_kind(&mkv), MediaKind::Video);
    }

    #[test]
    fn test_sniff_avi() {
        let mut avi = [0u8; 12];
        avi[0..4].copy_from_slice(b"RIFF");
        avi[8..12].copy_from_slice(b"AVI ");
        assert_eq!(sniff_media_kind(&avi), MediaKind::Video);
    }

    #[test]
    fn test_sniff_text_is_unsupported() {
        assert_eq!(sniff_media_kind(b"hello world, not media"), MediaKind::Unsupported);
    }

    #[test]
    fn test_sniff_too_small() {
        assert_eq!(sniff_media_kind(&[0xFF]), MediaKind::Unsupported);
    }

    #[test]
    fn test_extension_is_irrelevant() {
        // Classification reads bytes only; the caller never passes a name
        let mp4_named_jpg = {
            let mut data = [0u8; 16];
            data[4..8].copy_from_slice(b"ftyp");
            data[8..12].copy_from_slice(b"mp42");
            data
        };
        assert_eq!(sniff_media_kind(&mp4_named_jpg), MediaKind::Video);
    }
}
