//! Local disk storage for user uploads.
//!
//! Files live under `<UPLOAD_DIR>/<kind dir>/<uuid><ext>` and are referenced from the
//! database by their public URL, `/uploads/<kind dir>/<file>`.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use axum::extract::Multipart;
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use uuid::Uuid;

const MIB: usize = 1024 * 1024;

const IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif"];
const DOCUMENT_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/zip",
    "text/plain",
    "application/javascript",
    "text/html",
    "text/css",
];
const VIDEO_TYPES: &[&str] = &["video/mp4", "video/webm", "video/ogg"];

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid file type. Allowed types: {}", .0.join(", "))]
    InvalidType(&'static [&'static str]),
    #[error("File size too large")]
    TooLarge,
    #[error("Malformed upload: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Avatar,
    Thumbnail,
    Assignment,
    Video,
}

impl UploadKind {
    pub const ALL: [UploadKind; 4] = [Self::Avatar, Self::Thumbnail, Self::Assignment, Self::Video];

    pub fn dir(self) -> &'static str {
        match self {
            Self::Avatar => "avatars",
            Self::Thumbnail => "thumbnails",
            Self::Assignment => "assignments",
            Self::Video => "videos",
        }
    }

    /// Multipart field names that carry this kind of file.
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            Self::Avatar => &["avatar"],
            Self::Thumbnail => &["courseThumbnail"],
            Self::Assignment => &["assignmentFile", "assignment"],
            Self::Video => &["lessonVideo"],
        }
    }

    pub fn max_bytes(self) -> usize {
        match self {
            Self::Avatar | Self::Thumbnail => 5 * MIB,
            Self::Assignment => 10 * MIB,
            Self::Video => 100 * MIB,
        }
    }

    pub fn allowed_types(self) -> &'static [&'static str] {
        match self {
            Self::Avatar | Self::Thumbnail => IMAGE_TYPES,
            Self::Assignment => DOCUMENT_TYPES,
            Self::Video => VIDEO_TYPES,
        }
    }

    /// Kinds that may be fetched through the download route.
    pub fn from_download_type(s: &str) -> Option<Self> {
        match s {
            "avatars" => Some(Self::Avatar),
            "thumbnails" => Some(Self::Thumbnail),
            "assignments" => Some(Self::Assignment),
            _ => None,
        }
    }

    pub fn check_type(self, content_type: Option<&str>) -> Result<(), UploadError> {
        let allowed = self.allowed_types();
        match content_type {
            Some(ct) if allowed.contains(&ct) => Ok(()),
            _ => Err(UploadError::InvalidType(allowed)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub kind: UploadKind,
    pub file_name: String,
    pub url: String,
}

/// Text fields plus at most one file from a multipart body.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub fields: HashMap<String, String>,
    pub file: Option<IncomingFile>,
}

impl UploadForm {
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// Reads a multipart body, keeping the first file sent under one of `kind`'s field
/// names. Type is checked from the part header before the body is read, and the size
/// limit is enforced while streaming.
pub async fn read_form(mut mp: Multipart, kind: UploadKind) -> Result<UploadForm, UploadError> {
    let mut form = UploadForm::default();

    while let Some(mut field) = mp
        .next_field()
        .await
        .map_err(|e| UploadError::Malformed(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();

        if field.file_name().is_none() {
            let text = field
                .text()
                .await
                .map_err(|e| UploadError::Malformed(e.to_string()))?;
            form.fields.insert(name, text);
            continue;
        }

        if !kind.fields().contains(&name.as_str()) || form.file.is_some() {
            continue;
        }

        let content_type = field.content_type().map(str::to_string);
        kind.check_type(content_type.as_deref())?;
        let file_name = field.file_name().map(str::to_string);

        let mut buf = BytesMut::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| UploadError::Malformed(e.to_string()))?
        {
            if buf.len() + chunk.len() > kind.max_bytes() {
                return Err(UploadError::TooLarge);
            }
            buf.extend_from_slice(&chunk);
        }

        form.file = Some(IncomingFile {
            file_name,
            content_type,
            bytes: buf.freeze(),
        });
    }

    Ok(form)
}

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, kind: UploadKind) -> PathBuf {
        self.root.join(kind.dir())
    }

    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        for kind in UploadKind::ALL {
            tokio::fs::create_dir_all(self.dir(kind)).await?;
        }
        Ok(())
    }

    pub async fn save(&self, kind: UploadKind, file: &IncomingFile) -> Result<StoredFile, UploadError> {
        kind.check_type(file.content_type.as_deref())?;
        if file.bytes.len() > kind.max_bytes() {
            return Err(UploadError::TooLarge);
        }

        let file_name = generated_name(file.file_name.as_deref());
        let dir = self.dir(kind);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(&file_name), &file.bytes).await?;

        Ok(StoredFile {
            kind,
            url: format!("/uploads/{}/{}", kind.dir(), file_name),
            file_name,
        })
    }

    /// Disk path for a bare file name, `None` if the name tries to leave the kind dir.
    pub fn path_for(&self, kind: UploadKind, file_name: &str) -> Option<PathBuf> {
        if file_name.is_empty()
            || file_name.contains('/')
            || file_name.contains('\\')
            || file_name.starts_with('.')
        {
            return None;
        }
        Some(self.dir(kind).join(file_name))
    }

    /// Maps a stored `/uploads/<dir>/<file>` URL back to disk.
    pub fn path_for_url(&self, url: &str) -> Option<PathBuf> {
        let rest = url.strip_prefix("/uploads/")?;
        let (dir, name) = rest.split_once('/')?;
        let kind = UploadKind::ALL.into_iter().find(|k| k.dir() == dir)?;
        self.path_for(kind, name)
    }

    /// Best-effort delete of a previously stored file. Errors are logged and ignored.
    pub async fn remove_url(&self, url: &str) {
        let Some(path) = self.path_for_url(url) else {
            return;
        };
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!(path = %path.display(), error = %e, "could not delete old upload");
        }
    }
}

fn generated_name(original: Option<&str>) -> String {
    let ext = original
        .and_then(|n| Path::new(n).extension())
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 10 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();
    format!("{}{}", Uuid::new_v4(), ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(prefix: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{}-{}", prefix, Uuid::new_v4()))
    }

    fn file(name: &str, ct: &str, len: usize) -> IncomingFile {
        IncomingFile {
            file_name: Some(name.to_string()),
            content_type: Some(ct.to_string()),
            bytes: Bytes::from(vec![7u8; len]),
        }
    }

    #[test]
    fn type_gate_per_kind() {
        assert!(UploadKind::Avatar.check_type(Some("image/png")).is_ok());
        assert!(UploadKind::Avatar.check_type(Some("application/pdf")).is_err());
        assert!(UploadKind::Assignment.check_type(Some("application/pdf")).is_ok());
        assert!(UploadKind::Video.check_type(Some("video/webm")).is_ok());
        assert!(UploadKind::Video.check_type(None).is_err());

        let msg = UploadKind::Video.check_type(Some("video/avi")).unwrap_err().to_string();
        assert_eq!(msg, "Invalid file type. Allowed types: video/mp4, video/webm, video/ogg");
    }

    #[test]
    fn generated_names_keep_a_sane_extension() {
        assert!(generated_name(Some("Essay.PDF")).ends_with(".pdf"));
        assert!(!generated_name(Some("noext")).contains('.'));
        assert!(!generated_name(Some("x.p$f")).contains('$'));
        assert_ne!(generated_name(Some("a.png")), generated_name(Some("a.png")));
    }

    #[test]
    fn paths_cannot_escape_the_kind_dir() {
        let s = Storage::new("/srv/uploads");
        assert_eq!(
            s.path_for(UploadKind::Avatar, "a.png"),
            Some(PathBuf::from("/srv/uploads/avatars/a.png"))
        );
        assert_eq!(s.path_for(UploadKind::Avatar, "../secret"), None);
        assert_eq!(s.path_for(UploadKind::Avatar, "..\\secret"), None);
        assert_eq!(s.path_for_url("/uploads/misc/a.png"), None);
        assert_eq!(s.path_for_url("https://cdn.example.com/a.png"), None);
        assert_eq!(
            s.path_for_url("/uploads/thumbnails/t.gif"),
            Some(PathBuf::from("/srv/uploads/thumbnails/t.gif"))
        );
    }

    #[tokio::test]
    async fn save_writes_under_kind_dir_and_remove_is_best_effort() {
        let root = temp_root("lms-uploads");
        let storage = Storage::new(&root);
        storage.ensure_dirs().await.unwrap();

        let stored = storage
            .save(UploadKind::Avatar, &file("me.png", "image/png", 16))
            .await
            .unwrap();
        assert!(stored.url.starts_with("/uploads/avatars/"));
        let on_disk = root.join("avatars").join(&stored.file_name);
        assert_eq!(tokio::fs::read(&on_disk).await.unwrap().len(), 16);

        storage.remove_url(&stored.url).await;
        assert!(!on_disk.exists());
        // second delete only logs
        storage.remove_url(&stored.url).await;

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn save_rejects_oversize_and_wrong_type() {
        let storage = Storage::new(temp_root("lms-uploads"));
        let big = file("big.png", "image/png", UploadKind::Avatar.max_bytes() + 1);
        assert!(matches!(
            storage.save(UploadKind::Avatar, &big).await,
            Err(UploadError::TooLarge)
        ));
        let exe = file("run.exe", "application/octet-stream", 4);
        assert!(matches!(
            storage.save(UploadKind::Assignment, &exe).await,
            Err(UploadError::InvalidType(_))
        ));
    }
}
