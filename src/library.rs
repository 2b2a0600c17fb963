use crate::model::{PlaybackItem, SourceDescriptor, SourceKind};
use anyhow::{Context, Result};
use lofty::prelude::{Accessor, TaggedFileExt};
use lofty::probe::Probe;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::{MetadataOptions, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::default::get_probe;
use tracing::{debug, warn};
use walkdir::WalkDir;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "ogg", "m4a", "aac", "opus"];
const PLAYLIST_EXTENSIONS: &[&str] = &["m3u", "m3u8"];

pub trait QueueSource {
    fn describe(&self) -> String;
    fn load(&self) -> Result<Vec<PlaybackItem>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderSource {
    root: PathBuf,
}

impl FolderSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl QueueSource for FolderSource {
    fn describe(&self) -> String {
        format!("folder {}", self.root.display())
    }

    fn load(&self) -> Result<Vec<PlaybackItem>> {
        if !self.root.is_dir() {
            anyhow::bail!("not a directory: {}", self.root.display());
        }
        Ok(scan_folder(&self.root))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistSource {
    path: PathBuf,
}

impl PlaylistSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl QueueSource for PlaylistSource {
    fn describe(&self) -> String {
        format!("playlist {}", self.path.display())
    }

    fn load(&self) -> Result<Vec<PlaybackItem>> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read playlist {}", self.path.display()))?;
        let base = self.path.parent().unwrap_or_else(|| Path::new("."));
        Ok(parse_m3u(&raw, base))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListSource {
    items: Vec<PlaybackItem>,
}

impl ListSource {
    pub fn new(items: Vec<PlaybackItem>) -> Self {
        Self { items }
    }
}

impl QueueSource for ListSource {
    fn describe(&self) -> String {
        format!("{} listed items", self.items.len())
    }

    fn load(&self) -> Result<Vec<PlaybackItem>> {
        Ok(self.items.clone())
    }
}

pub fn source_for(arg: &str) -> Box<dyn QueueSource> {
    let descriptor = SourceDescriptor::classify(arg);
    if descriptor.kind == SourceKind::Local {
        let path = Path::new(&descriptor.location);
        if path.is_dir() {
            return Box::new(FolderSource::new(path));
        }
        if has_extension(path, PLAYLIST_EXTENSIONS) {
            return Box::new(PlaylistSource::new(path));
        }
        return Box::new(ListSource::new(vec![item_for_path(path)]));
    }
    let title = stream_title(&descriptor.location);
    Box::new(ListSource::new(vec![PlaybackItem::new(descriptor, title)]))
}

pub fn load_all(args: &[String]) -> Vec<PlaybackItem> {
    let mut items = Vec::new();
    for arg in args {
        let source = source_for(arg);
        match source.load() {
            Ok(loaded) => {
                debug!(source = %source.describe(), items = loaded.len(), "source loaded");
                items.extend(loaded);
            }
            Err(err) => warn!(source = %source.describe(), error = %format!("{err:#}"), "source skipped"),
        }
    }
    items
}

pub fn scan_folder(root: &Path) -> Vec<PlaybackItem> {
    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && is_audio(entry.path()))
        .map(|entry| entry.into_path())
        .collect();

    paths.sort();
    paths.iter().map(|path| item_for_path(path)).collect()
}

pub fn parse_m3u(contents: &str, base: &Path) -> Vec<PlaybackItem> {
    let mut items = Vec::new();
    let mut pending: Option<(Option<String>, String)> = None;

    for line in contents.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if let Some(info) = line.strip_prefix("#EXTINF:") {
            pending = parse_extinf(info);
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let mut descriptor = SourceDescriptor::classify(line);
        let mut item = match descriptor.kind {
            SourceKind::Local => {
                let path = Path::new(&descriptor.location);
                let resolved = if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    base.join(path)
                };
                descriptor = SourceDescriptor::local(&resolved);
                let title = file_title(&resolved);
                PlaybackItem::new(descriptor, title)
            }
            SourceKind::Stream | SourceKind::Unknown => {
                let title = stream_title(&descriptor.location);
                PlaybackItem::new(descriptor, title)
            }
        };

        if let Some((author, title)) = pending.take() {
            item.title = title;
            item.author = author;
        }
        items.push(item);
    }

    items
}

/// `#EXTINF:<seconds>,<author> - <title>`; the author part is optional.
fn parse_extinf(info: &str) -> Option<(Option<String>, String)> {
    let (_, label) = info.split_once(',')?;
    let label = label.trim();
    if label.is_empty() {
        return None;
    }
    match label.split_once(" - ") {
        Some((author, title)) if !author.trim().is_empty() && !title.trim().is_empty() => {
            Some((Some(author.trim().to_string()), title.trim().to_string()))
        }
        _ => Some((None, label.to_string())),
    }
}

pub fn item_for_path(path: &Path) -> PlaybackItem {
    let metadata = metadata_for(path);
    let title = metadata
        .title
        .filter(|title| !title.trim().is_empty())
        .unwrap_or_else(|| file_title(path));

    let item = PlaybackItem::new(SourceDescriptor::local(path), title);
    match metadata.author {
        Some(author) => item.with_author(author),
        None => item,
    }
}

fn file_title(path: &Path) -> String {
    path.file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or("unknown")
        .to_string()
}

fn stream_title(location: &str) -> String {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(location)
        .to_string()
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ItemMetadata {
    title: Option<String>,
    author: Option<String>,
}

fn metadata_for(path: &Path) -> ItemMetadata {
    let from_symphonia = symphonia_metadata(path);
    if from_symphonia.title.is_some() || from_symphonia.author.is_some() {
        return from_symphonia;
    }
    lofty_metadata(path)
}

fn symphonia_metadata(path: &Path) -> ItemMetadata {
    let Ok(file) = File::open(path) else {
        return ItemMetadata::default();
    };
    let source = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(OsStr::to_str) {
        hint.with_extension(extension);
    }

    let Ok(mut probed) = get_probe().format(
        &hint,
        source,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) else {
        return ItemMetadata::default();
    };

    let metadata = probed.format.metadata();
    let Some(revision) = metadata.current() else {
        return ItemMetadata::default();
    };

    let tags = revision.tags();
    ItemMetadata {
        title: tag_value(tags, StandardTagKey::TrackTitle, &["title"]),
        author: tag_value(
            tags,
            StandardTagKey::Artist,
            &["artist", "albumartist", "album_artist"],
        ),
    }
}

fn lofty_metadata(path: &Path) -> ItemMetadata {
    let Ok(tagged) = Probe::open(path).and_then(|probe| probe.read()) else {
        return ItemMetadata::default();
    };
    let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) else {
        return ItemMetadata::default();
    };
    ItemMetadata {
        title: tag.title().and_then(|value| clean_value(&value)),
        author: tag.artist().and_then(|value| clean_value(&value)),
    }
}

fn tag_value(
    tags: &[symphonia::core::meta::Tag],
    standard_key: StandardTagKey,
    fallback_keys: &[&str],
) -> Option<String> {
    let from_standard = tags
        .iter()
        .find(|tag| tag.std_key == Some(standard_key))
        .map(|tag| tag.value.to_string());

    let from_fallback = || {
        tags.iter()
            .find(|tag| {
                fallback_keys
                    .iter()
                    .any(|key| tag.key.eq_ignore_ascii_case(key))
            })
            .map(|tag| tag.value.to_string())
    };

    from_standard
        .or_else(from_fallback)
        .and_then(|value| clean_value(&value))
}

fn clean_value(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn is_audio(path: &Path) -> bool {
    has_extension(path, AUDIO_EXTENSIONS)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    let ext = path.extension().and_then(OsStr::to_str).unwrap_or_default();
    extensions
        .iter()
        .any(|supported| ext.eq_ignore_ascii_case(supported))
}
