//! Root-contained path resolution and the on-disk library layout
//!
//! Every path handed out by this module is absolute, canonical and lies inside
//! the directory it was resolved against. Segments coming from requests are
//! percent-decoded first; segments derived from paths already on disk are not.

use crate::error::PreviewError;
use crate::{MediaKind, PreviewConfig};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Resolve raw, possibly percent-encoded request segments below `root`
///
/// Rejects traversal (`..`, `%2e%2e%2f`), absolute segments and symlinks that
/// leave `root`, all with [`PreviewError::ContainmentViolation`].
pub fn resolve<S: AsRef<str>>(root: &Path, segments: &[S]) -> Result<PathBuf, PreviewError> {
    let base = fs::canonicalize(root).map_err(|_| reject(root.display()))?;

    let mut joined = base.clone();
    for segment in segments {
        let raw = segment.as_ref();
        let decoded = urlencoding::decode(raw).map_err(|_| reject(raw))?;
        if decoded.contains('\0') {
            return Err(reject(raw));
        }
        joined.push(decoded.as_ref());
    }

    contain(&base, &joined)
}

/// Canonicalize `candidate` and require it to be `base` or a descendant of it
fn contain(base: &Path, candidate: &Path) -> Result<PathBuf, PreviewError> {
    let resolved = soft_canonicalize(candidate).map_err(|_| reject(candidate.display()))?;
    if resolved.starts_with(base) {
        Ok(resolved)
    } else {
        Err(reject(candidate.display()))
    }
}

fn reject(what: impl ToString) -> PreviewError {
    PreviewError::ContainmentViolation(what.to_string())
}

/// Canonicalize `path` one component at a time, following symlinks for as
/// long as the prefix exists, then normalize the missing remainder lexically
///
/// Unlike [`fs::canonicalize`] this accepts paths that do not exist yet, which
/// is the normal state of a preview that has not been generated. A `..` that
/// climbs back out of the missing remainder resumes resolution through the
/// filesystem, so a symlink named after it is still followed.
fn soft_canonicalize(path: &Path) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut resolved = PathBuf::new();
    let mut exists = true;
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
                if !exists {
                    exists = fs::symlink_metadata(&resolved).is_ok();
                }
            }
            Component::Normal(name) => {
                resolved.push(name);
                if !exists {
                    continue;
                }
                match fs::canonicalize(&resolved) {
                    Ok(canonical) => resolved = canonical,
                    // Dangling or looping symlinks cannot be checked against the root
                    Err(e) if fs::symlink_metadata(&resolved).is_ok() => return Err(e),
                    Err(_) => exists = false,
                }
            }
        }
    }

    Ok(resolved)
}

/// One media file inside an album
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Photo {
    /// Album-relative path with `/` separators
    pub filename: String,
    pub kind: MediaKind,
}

impl Photo {
    pub fn is_raw(&self) -> bool {
        self.kind == MediaKind::Raw
    }
}

/// Layout of one shared photo root: albums plus the reserved preview and
/// marked directories at its top level
#[derive(Debug, Clone)]
pub struct Library {
    root: PathBuf,
    preview_root: PathBuf,
    marked_root: PathBuf,
    reserved: [String; 2],
}

impl Library {
    pub fn open(root: impl AsRef<Path>, config: &PreviewConfig) -> Result<Self, PreviewError> {
        let root = root.as_ref();
        let root = fs::canonicalize(root).map_err(|_| PreviewError::NotFound(root.to_path_buf()))?;
        if !root.is_dir() {
            return Err(PreviewError::NotFound(root));
        }

        let preview_root = Self::reserved_dir(&root, &config.preview_dir)?;
        let marked_root = Self::reserved_dir(&root, &config.marked_dir)?;

        Ok(Self {
            root,
            preview_root,
            marked_root,
            reserved: [config.preview_dir.clone(), config.marked_dir.clone()],
        })
    }

    /// Reserved names must be a single plain directory name directly below root
    fn reserved_dir(root: &Path, name: &str) -> Result<PathBuf, PreviewError> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => contain(root, &root.join(name)),
            _ => Err(reject(name)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn preview_root(&self) -> &Path {
        &self.preview_root
    }

    pub fn marked_root(&self) -> &Path {
        &self.marked_root
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved.iter().any(|r| r == name)
    }

    /// True when any component of a root-relative path is a reserved name
    pub fn contains_reserved(&self, relative: &Path) -> bool {
        relative.components().any(|c| match c {
            Component::Normal(name) => name.to_str().is_some_and(|n| self.is_reserved(n)),
            _ => false,
        })
    }

    /// Resolve a requested original from raw `album` and `filename` segments
    pub fn original(&self, album: &str, filename: &str) -> Result<PathBuf, PreviewError> {
        let path = resolve(&self.root, &[album, filename])?;
        let relative = self.relative(&path)?;
        if let Some(name) = self.first_reserved(relative) {
            return Err(PreviewError::Reserved(name));
        }
        Ok(path)
    }

    /// Where the preview of a canonical original lives
    ///
    /// The preview cache and the warmer both go through here, so the two
    /// always agree on the derived path for a given original.
    pub fn derived_path(&self, original: &Path) -> Result<PathBuf, PreviewError> {
        self.mirror(original, &self.preview_root)
    }

    /// Where the marked copy of a canonical original lives
    pub fn marked_path(&self, original: &Path) -> Result<PathBuf, PreviewError> {
        self.mirror(original, &self.marked_root)
    }

    fn mirror(&self, original: &Path, base: &Path) -> Result<PathBuf, PreviewError> {
        let relative = self.relative(original)?;
        if relative.as_os_str().is_empty() {
            return Err(reject(original.display()));
        }
        if let Some(name) = self.first_reserved(relative) {
            return Err(PreviewError::Reserved(name));
        }
        contain(base, &base.join(relative))
    }

    fn relative<'a>(&self, path: &'a Path) -> Result<&'a Path, PreviewError> {
        path.strip_prefix(&self.root).map_err(|_| reject(path.display()))
    }

    fn first_reserved(&self, relative: &Path) -> Option<String> {
        relative.components().find_map(|c| match c {
            Component::Normal(name) => name.to_str().filter(|n| self.is_reserved(n)).map(str::to_string),
            _ => None,
        })
    }

    /// Top-level album directories, sorted by name
    pub fn albums(&self) -> Result<Vec<String>, PreviewError> {
        let entries = fs::read_dir(&self.root).map_err(|e| PreviewError::io(&self.root, e))?;
        let mut albums: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !self.is_reserved(name))
            .collect();
        albums.sort();
        Ok(albums)
    }

    /// Every media file below an album, recursively, sorted by filename
    ///
    /// Files under reserved directories and files whose extension is not a
    /// media extension are left out.
    pub fn photos(&self, album: &str, config: &PreviewConfig) -> Result<Vec<Photo>, PreviewError> {
        let dir = resolve(&self.root, &[album])?;
        let relative = self.relative(&dir)?;
        if relative.as_os_str().is_empty() {
            return Err(reject(album));
        }
        if let Some(name) = self.first_reserved(relative) {
            return Err(PreviewError::Reserved(name));
        }
        if !dir.is_dir() {
            return Err(PreviewError::NotFound(dir));
        }

        let mut photos = Vec::new();
        for entry in WalkDir::new(&dir).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(inner) = entry.path().strip_prefix(&dir) else {
                continue;
            };
            if self.contains_reserved(inner) {
                continue;
            }
            let Some(kind) = config.kind_of(entry.path()) else {
                continue;
            };

            let filename = inner
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            photos.push(Photo { filename, kind });
        }

        photos.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(photos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    fn library(root: &Path) -> Result<Library> {
        Ok(Library::open(root, &PreviewConfig::default())?)
    }

    #[test]
    fn test_resolves_nested_file() -> Result<()> {
        let temp_dir = tempdir()?;
        fs::create_dir_all(temp_dir.path().join("album/sub"))?;
        fs::write(temp_dir.path().join("album/sub/a.jpg"), b"x")?;

        let root = fs::canonicalize(temp_dir.path())?;
        let resolved = resolve(&root, &["album", "sub/a.jpg"])?;
        assert_eq!(resolved, root.join("album").join("sub").join("a.jpg"));

        let encoded = resolve(&root, &["album", "sub%2Fa.jpg"])?;
        assert_eq!(encoded, resolved);
        Ok(())
    }

    #[test]
    fn test_root_itself_is_contained() -> Result<()> {
        let temp_dir = tempdir()?;
        let root = fs::canonicalize(temp_dir.path())?;
        assert_eq!(resolve::<&str>(&root, &[])?, root);
        assert_eq!(resolve(&root, &["album", ".."])?, root);
        Ok(())
    }

    #[test]
    fn test_rejects_traversal() -> Result<()> {
        let temp_dir = tempdir()?;
        let root = temp_dir.path().join("share");
        fs::create_dir_all(root.join("album"))?;
        fs::write(temp_dir.path().join("secret.txt"), b"secret")?;

        let attempts: &[&[&str]] = &[
            &["..", "secret.txt"],
            &["album", "../../secret.txt"],
            &["album", "%2e%2e%2f%2e%2e%2fsecret.txt"],
            &["album", "..%2F..%2Fsecret.txt"],
            &["%2E%2E", "secret.txt"],
            &["album", "missing/../../../secret.txt"],
        ];
        for segments in attempts {
            let result = resolve(&root, segments);
            assert!(
                matches!(result, Err(PreviewError::ContainmentViolation(_))),
                "{:?} resolved to {:?}",
                segments,
                result
            );
        }
        Ok(())
    }

    #[test]
    fn test_rejects_absolute_segments() -> Result<()> {
        let temp_dir = tempdir()?;
        let root = temp_dir.path().join("share");
        fs::create_dir_all(&root)?;

        let outside = temp_dir.path().join("elsewhere.jpg");
        let outside = outside.to_string_lossy().to_string();
        let encoded = urlencoding::encode(&outside).into_owned();

        assert!(resolve(&root, &["album", outside.as_str()]).is_err());
        assert!(resolve(&root, &["album", encoded.as_str()]).is_err());
        assert!(resolve(&root, &[outside.as_str()]).is_err());
        Ok(())
    }

    #[test]
    fn test_rejects_nul_and_invalid_utf8() -> Result<()> {
        let temp_dir = tempdir()?;
        let root = temp_dir.path();
        assert!(resolve(root, &["album", "a%00.jpg"]).is_err());
        assert!(resolve(root, &["album", "%ff%fe.jpg"]).is_err());
        Ok(())
    }

    #[test]
    fn test_double_encoding_stays_literal() -> Result<()> {
        let temp_dir = tempdir()?;
        let root = fs::canonicalize(temp_dir.path())?;
        // Only one decoding pass: `%252e%252e` names a directory called `%2e%2e`
        let resolved = resolve(&root, &["%252e%252e", "a.jpg"])?;
        assert_eq!(resolved, root.join("%2e%2e").join("a.jpg"));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_escape() -> Result<()> {
        let temp_dir = tempdir()?;
        let root = temp_dir.path().join("share");
        let outside = temp_dir.path().join("outside");
        fs::create_dir_all(root.join("album"))?;
        fs::create_dir_all(&outside)?;
        fs::write(outside.join("a.jpg"), b"x")?;
        std::os::unix::fs::symlink(&outside, root.join("album").join("link"))?;

        assert!(resolve(&root, &["album", "link/a.jpg"]).is_err());
        assert!(resolve(&root, &["album", "link/not-yet.jpg"]).is_err());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_reached_through_missing_directory() -> Result<()> {
        let temp_dir = tempdir()?;
        let root = temp_dir.path().join("share");
        let outside = temp_dir.path().join("outside");
        fs::create_dir_all(root.join("album"))?;
        fs::create_dir_all(&outside)?;
        fs::write(outside.join("secret.jpg"), b"x")?;
        std::os::unix::fs::symlink("../../outside", root.join("album").join("link"))?;

        for filename in [
            "missing/../link/secret.jpg",
            "missing%2F..%2Flink%2Fsecret.jpg",
            "a/b/../../link/secret.jpg",
            "./missing/./../link/new.jpg",
        ] {
            let result = resolve(&root, &["album", filename]);
            assert!(
                matches!(result, Err(PreviewError::ContainmentViolation(_))),
                "{} resolved to {:?}",
                filename,
                result
            );
        }

        // Climbing back out of a missing directory still lands on real paths
        fs::write(root.join("album").join("a.jpg"), b"x")?;
        let canonical = fs::canonicalize(&root)?;
        assert_eq!(
            resolve(&root, &["album", "missing/../a.jpg"])?,
            canonical.join("album").join("a.jpg")
        );
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_dangling_symlink() -> Result<()> {
        let temp_dir = tempdir()?;
        let root = temp_dir.path().join("share");
        fs::create_dir_all(root.join("album"))?;
        let target = temp_dir.path().join("not-created-yet");
        std::os::unix::fs::symlink(&target, root.join("album").join("later"))?;

        assert!(resolve(&root, &["album", "later/a.jpg"]).is_err());
        assert!(resolve(&root, &["album", "later"]).is_err());
        Ok(())
    }

    #[test]
    fn test_derived_path_mirrors_original() -> Result<()> {
        let temp_dir = tempdir()?;
        fs::create_dir_all(temp_dir.path().join("album/2024"))?;
        fs::write(temp_dir.path().join("album/2024/a.jpg"), b"x")?;
        let library = library(temp_dir.path())?;

        let original = library.original("album", "2024/a.jpg")?;
        let derived = library.derived_path(&original)?;
        assert_eq!(
            derived,
            library.root().join("._preview_cache").join("album").join("2024").join("a.jpg")
        );
        assert!(!derived.exists());

        let marked = library.marked_path(&original)?;
        assert_eq!(marked, library.root().join("marked").join("album").join("2024").join("a.jpg"));
        Ok(())
    }

    #[test]
    fn test_literal_percent_in_file_name_is_not_decoded_twice() -> Result<()> {
        let temp_dir = tempdir()?;
        fs::create_dir_all(temp_dir.path().join("album"))?;
        fs::write(temp_dir.path().join("album/100%.jpg"), b"x")?;
        let library = library(temp_dir.path())?;

        let original = library.original("album", "100%25.jpg")?;
        let derived = library.derived_path(&original)?;
        assert!(derived.ends_with("album/100%.jpg"));
        Ok(())
    }

    #[test]
    fn test_reserved_directories_are_not_originals() -> Result<()> {
        let temp_dir = tempdir()?;
        fs::create_dir_all(temp_dir.path().join("._preview_cache/album"))?;
        fs::create_dir_all(temp_dir.path().join("album/marked"))?;
        let library = library(temp_dir.path())?;

        assert!(matches!(
            library.original("._preview_cache", "album/a.jpg"),
            Err(PreviewError::Reserved(_))
        ));
        assert!(matches!(library.original("album", "marked/a.jpg"), Err(PreviewError::Reserved(_))));
        assert!(library.derived_path(library.root()).is_err());
        Ok(())
    }

    #[test]
    fn test_invalid_reserved_names() -> Result<()> {
        let temp_dir = tempdir()?;
        let config = PreviewConfig {
            preview_dir: "../previews".to_string(),
            ..PreviewConfig::default()
        };
        assert!(Library::open(temp_dir.path(), &config).is_err());
        assert!(matches!(
            Library::open(temp_dir.path().join("missing"), &PreviewConfig::default()),
            Err(PreviewError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_album_listing_skips_reserved() -> Result<()> {
        let temp_dir = tempdir()?;
        for dir in ["zoo", "beach", "._preview_cache", "marked"] {
            fs::create_dir_all(temp_dir.path().join(dir))?;
        }
        fs::write(temp_dir.path().join("loose.jpg"), b"x")?;
        let library = library(temp_dir.path())?;

        assert_eq!(library.albums()?, vec!["beach".to_string(), "zoo".to_string()]);
        Ok(())
    }

    #[test]
    fn test_photo_listing_is_recursive_and_flags_raw() -> Result<()> {
        let temp_dir = tempdir()?;
        let album = temp_dir.path().join("holiday");
        fs::create_dir_all(album.join("day2/evening"))?;
        fs::create_dir_all(album.join("marked"))?;
        for file in [
            "b.JPG",
            "a.cr2",
            "day2/evening/c.png",
            "day2/notes.txt",
            "marked/copy.jpg",
        ] {
            fs::write(album.join(file), b"x")?;
        }
        let config = PreviewConfig::default();
        let library = Library::open(temp_dir.path(), &config)?;

        let photos = library.photos("holiday", &config)?;
        let names: Vec<&str> = photos.iter().map(|p| p.filename.as_str()).collect();
        assert_eq!(names, vec!["a.cr2", "b.JPG", "day2/evening/c.png"]);
        assert!(photos[0].is_raw());
        assert_eq!(photos[1].kind, MediaKind::Standard);
        assert!(!photos[2].is_raw());
        Ok(())
    }

    #[test]
    fn test_photo_listing_rejects_non_albums() -> Result<()> {
        let temp_dir = tempdir()?;
        fs::create_dir_all(temp_dir.path().join("marked"))?;
        fs::write(temp_dir.path().join("loose.jpg"), b"x")?;
        let config = PreviewConfig::default();
        let library = Library::open(temp_dir.path(), &config)?;

        assert!(matches!(library.photos("marked", &config), Err(PreviewError::Reserved(_))));
        assert!(matches!(library.photos("missing", &config), Err(PreviewError::NotFound(_))));
        assert!(matches!(library.photos("loose.jpg", &config), Err(PreviewError::NotFound(_))));
        assert!(matches!(
            library.photos("..", &config),
            Err(PreviewError::ContainmentViolation(_))
        ));
        assert!(matches!(library.photos("", &config), Err(PreviewError::ContainmentViolation(_))));
        Ok(())
    }
}
