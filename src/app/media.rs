/// Upload classification for incident attachments. A file becomes an image
/// or video child of the report based on its content-type prefix; anything
/// else is rejected before the aggregate is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "mp4", "mov", "avi"];

pub fn classify(content_type: &str) -> Option<MediaKind> {
    if content_type.starts_with("image/") {
        Some(MediaKind::Image)
    } else if content_type.starts_with("video/") {
        Some(MediaKind::Video)
    } else {
        None
    }
}

/// Lower-cased file extension, if it is on the allow-list.
pub fn allowed_extension(filename: &str) -> Option<String> {
    let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        Some(ext)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_content_type_prefix() {
        assert_eq!(classify("image/png"), Some(MediaKind::Image));
        assert_eq!(classify("video/mp4"), Some(MediaKind::Video));
        assert_eq!(classify("application/pdf"), None);
        assert_eq!(classify(""), None);
    }

    #[test]
    fn extension_allow_list_is_case_insensitive() {
        assert_eq!(allowed_extension("photo.PNG"), Some("png".into()));
        assert_eq!(allowed_extension("clip.Mov"), Some("mov".into()));
        assert_eq!(allowed_extension("archive.tar.gz"), None);
        assert_eq!(allowed_extension("script.exe"), None);
        assert_eq!(allowed_extension("noextension"), None);
    }
}
