use serde::{Deserialize, Serialize};

use crate::reference::FileReference;

/// Pure classification used by the surrounding command surface to decide
/// whether a freshly-uploaded file is worth a player page. The streaming
/// core itself never branches on this — it streams bytes the same way for
/// every mime type. Falls back to sniffing `filename`'s extension when the
/// upstream-reported mime type is the generic `application/octet-stream`.
pub fn is_video(mime: &str, filename: &str) -> bool {
    if mime.starts_with("video/") {
        return true;
    }

    mime_guess::from_path(filename)
        .first()
        .is_some_and(|guess| guess.type_() == mime_guess::mime::VIDEO)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicUrls {
    pub download_url: String,
    pub stream_url: String,
    pub player_url: Option<String>,
}

/// Builds the URLs the chat command surface hands back to the uploader.
/// Pure and synchronous: no network calls, no shortening. The caller
/// decides whether to pass these through a URL shortener based on `size`
/// versus its own `shorten_threshold_bytes` setting.
pub fn build_public_urls(
    base_url: &str,
    reference: &FileReference,
    size: u64,
    filename: &str,
    is_video: bool,
) -> PublicUrls {
    let base_url = base_url.trim_end_matches('/');

    let download_url = format!("{base_url}/dl/{reference}");
    let stream_url = format!("{base_url}/stream/{reference}");

    let player_url = if is_video && size > 0 {
        Some(format!("{base_url}/watch/{reference}"))
    } else {
        None
    };

    let _ = filename; // kept in the signature per the external contract; URLs don't embed it

    PublicUrls {
        download_url,
        stream_url,
        player_url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_mime_first() {
        assert!(is_video("video/mp4", "clip.bin"));
    }

    #[test]
    fn classifies_by_extension_fallback() {
        assert!(is_video("application/octet-stream", "movie.mkv"));
        assert!(!is_video("application/octet-stream", "document.pdf"));
    }

    #[test]
    fn player_url_only_for_nonempty_videos() {
        let urls = build_public_urls("https://dl.example", &"abc".to_string(), 0, "clip.mp4", true);
        assert!(urls.player_url.is_none());

        let urls = build_public_urls("https://dl.example/", &"abc".to_string(), 42, "clip.mp4", true);
        assert_eq!(urls.player_url.as_deref(), Some("https://dl.example/watch/abc"));
    }

    #[test]
    fn strips_trailing_slash_in_base_url() {
        let urls = build_public_urls("https://dl.example/", &"abc".to_string(), 42, "f.bin", false);
        assert_eq!(urls.download_url, "https://dl.example/dl/abc");
        assert_eq!(urls.stream_url, "https://dl.example/stream/abc");
        assert!(urls.player_url.is_none());
    }
}
