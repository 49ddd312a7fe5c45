//! Response cache keyed by (text, voice, speed).
//!
//! Entries live until [`ResponseCache::clear_all`] or
//! [`ResponseCache::clear_by_source_text`]. A cache opened with a path keeps
//! a small JSON index at that path and the audio of each entry in its own file
//! under a sibling `<name>.entries/` directory. A store writes the new audio
//! file and the index; audio already on disk is never rewritten.

use crate::splitter::split_sentences;
use crate::types::{AudioEncoding, AudioPayload, SynthesisRequest};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

const INDEX_VERSION: u32 = 2;

/// Cached synthesis result together with the request it answered.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub text: String,
    pub voice: String,
    pub speed: f32,
    pub payload: AudioPayload,
}

impl CacheEntry {
    fn key(&self) -> String {
        key_for(&self.text, &self.voice, self.speed)
    }
}

#[derive(Serialize, Deserialize)]
struct IndexRecord {
    text: String,
    voice: String,
    speed: f32,
    encoding: AudioEncoding,
    file: String,
}

#[derive(Serialize, Deserialize)]
struct CacheIndex {
    version: u32,
    entries: Vec<IndexRecord>,
}

/// Cache key for a request.
///
/// Text and voice are percent-encoded so that no separator can be forged by
/// their content; speed uses the shortest round-trip float representation.
pub fn cache_key(request: &SynthesisRequest) -> String {
    key_for(&request.text, &request.voice, request.speed)
}

fn key_for(text: &str, voice: &str, speed: f32) -> String {
    format!(
        "text={}&voice={}&speed={}",
        urlencoding::encode(text),
        urlencoding::encode(voice),
        speed
    )
}

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    // audio file name inside the entries directory, when on disk
    file: Option<String>,
}

/// On-disk layout of a file-backed cache
#[derive(Debug)]
struct Storage {
    index: PathBuf,
    dir: PathBuf,
}

impl Storage {
    fn new(index: PathBuf) -> Self {
        let dir = index.with_extension("entries");
        Self { index, dir }
    }

    fn load(&self) -> HashMap<String, Slot> {
        let content = match std::fs::read_to_string(&self.index) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                warn!("Failed to read cache index {}: {}", self.index.display(), e);
                return HashMap::new();
            }
        };

        let index = match serde_json::from_str::<CacheIndex>(&content) {
            Ok(index) if index.version == INDEX_VERSION => index,
            Ok(index) => {
                warn!(
                    "Ignoring cache index {} with unsupported version {}",
                    self.index.display(),
                    index.version
                );
                return HashMap::new();
            }
            Err(e) => {
                warn!("Ignoring unreadable cache index {}: {}", self.index.display(), e);
                return HashMap::new();
            }
        };

        let mut slots = HashMap::with_capacity(index.entries.len());
        for record in index.entries {
            let data = match std::fs::read(self.dir.join(&record.file)) {
                Ok(data) => data,
                Err(e) => {
                    warn!("Dropping cache entry {}: {}", record.file, e);
                    continue;
                }
            };
            let entry = CacheEntry {
                text: record.text,
                voice: record.voice,
                speed: record.speed,
                payload: AudioPayload::new(data, record.encoding),
            };
            slots.insert(
                entry.key(),
                Slot {
                    entry,
                    file: Some(record.file),
                },
            );
        }
        slots
    }

    /// Write one payload to a fresh file; returns its name.
    fn write_audio(&self, payload: &AudioPayload) -> std::io::Result<String> {
        std::fs::create_dir_all(&self.dir)?;
        let extension = match payload.encoding {
            AudioEncoding::Pcm16 { .. } => "pcm",
            AudioEncoding::Mp3 => "mp3",
        };
        let file = format!("{}.{}", uuid::Uuid::new_v4().simple(), extension);
        std::fs::write(self.dir.join(&file), &payload.data)?;
        Ok(file)
    }

    fn remove_audio(&self, file: &str) {
        if let Err(e) = std::fs::remove_file(self.dir.join(file)) {
            debug!("Failed to remove cached audio {}: {}", file, e);
        }
    }

    fn write_index(&self, slots: &HashMap<String, Slot>) -> std::io::Result<()> {
        if let Some(parent) = self.index.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let index = CacheIndex {
            version: INDEX_VERSION,
            entries: slots
                .values()
                .filter_map(|slot| {
                    let file = slot.file.clone()?;
                    Some(IndexRecord {
                        text: slot.entry.text.clone(),
                        voice: slot.entry.voice.clone(),
                        speed: slot.entry.speed,
                        encoding: slot.entry.payload.encoding,
                        file,
                    })
                })
                .collect(),
        };
        let json = serde_json::to_vec(&index)?;
        let tmp = self.index.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.index)
    }

    fn save_index(&self, slots: &HashMap<String, Slot>) {
        if let Err(e) = self.write_index(slots) {
            warn!(
                "Failed to persist cache index to {}: {}",
                self.index.display(),
                e
            );
        }
    }
}

/// Thread-safe map from request key to synthesized audio
#[derive(Debug, Default)]
pub struct ResponseCache {
    slots: RwLock<HashMap<String, Slot>>,
    storage: Option<Storage>,
}

impl ResponseCache {
    /// A cache that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a file-backed cache. A missing index starts empty; an unreadable
    /// one is logged and replaced on the next write.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let storage = Storage::new(path.as_ref().to_path_buf());
        let slots = storage.load();

        info!(
            "Opened response cache at {} with {} entries",
            storage.index.display(),
            slots.len()
        );

        Self {
            slots: RwLock::new(slots),
            storage: Some(storage),
        }
    }

    /// Index file of a file-backed cache.
    pub fn path(&self) -> Option<&Path> {
        self.storage.as_ref().map(|storage| storage.index.as_path())
    }

    pub fn lookup(&self, request: &SynthesisRequest) -> Option<AudioPayload> {
        let key = cache_key(request);
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let hit = slots.get(&key).map(|slot| slot.entry.payload.clone());
        debug!(
            "Cache {} for {}",
            if hit.is_some() { "hit" } else { "miss" },
            key
        );
        hit
    }

    /// Insert or replace the entry for `request`.
    ///
    /// File-backed caches write to disk here; call it off the async workers.
    pub fn store(&self, request: &SynthesisRequest, payload: AudioPayload) {
        let file = self.storage.as_ref().and_then(|storage| {
            storage
                .write_audio(&payload)
                .map_err(|e| warn!("Failed to write cached audio: {}", e))
                .ok()
        });
        let entry = CacheEntry {
            text: request.text.clone(),
            voice: request.voice.clone(),
            speed: request.speed,
            payload,
        };

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let replaced = slots.insert(entry.key(), Slot { entry, file });
        if let Some(storage) = &self.storage {
            storage.save_index(&slots);
            if let Some(old) = replaced.and_then(|slot| slot.file) {
                storage.remove_audio(&old);
            }
        }
    }

    pub fn clear_all(&self) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.clear();
        if let Some(storage) = &self.storage {
            storage.save_index(&slots);
            if let Err(e) = std::fs::remove_dir_all(&storage.dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", storage.dir.display(), e);
                }
            }
        }
        info!("Cleared response cache");
    }

    /// Remove every entry whose text is one of the sentences derived from
    /// `passage`, for any voice and speed. Returns the number removed.
    pub fn clear_by_source_text(&self, passage: &str) -> usize {
        let sentences: HashSet<String> = split_sentences(passage).into_iter().collect();
        if sentences.is_empty() {
            return 0;
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let stale: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| sentences.contains(&slot.entry.text))
            .map(|(key, _)| key.clone())
            .collect();
        let removed: Vec<Slot> = stale.iter().filter_map(|key| slots.remove(key)).collect();

        info!("Removed {} cached entries for passage", removed.len());
        if let Some(storage) = self.storage.as_ref().filter(|_| !removed.is_empty()) {
            storage.save_index(&slots);
            for file in removed.iter().filter_map(|slot| slot.file.as_deref()) {
                storage.remove_audio(file);
            }
        }
        removed.len()
    }

    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn payload(byte: u8) -> AudioPayload {
        AudioPayload::new(vec![byte; 8], AudioEncoding::Pcm16 { sample_rate: 24000 })
    }

    #[test]
    fn test_key_escapes_separators() {
        let a = SynthesisRequest::new("a&voice=b", "c", 1.0);
        let b = SynthesisRequest::new("a", "b&voice=c", 1.0);
        assert_ne!(cache_key(&a), cache_key(&b));
        assert_eq!(
            cache_key(&SynthesisRequest::new("Hi there.", "v", 1.25)),
            "text=Hi%20there.&voice=v&speed=1.25"
        );
    }

    #[test]
    fn test_key_distinguishes_speed_and_voice() {
        let cache = ResponseCache::in_memory();
        cache.store(&SynthesisRequest::new("Hello.", "amy", 1.0), payload(1));

        assert!(cache.lookup(&SynthesisRequest::new("Hello.", "amy", 1.0)).is_some());
        assert!(cache.lookup(&SynthesisRequest::new("Hello.", "amy", 1.1)).is_none());
        assert!(cache.lookup(&SynthesisRequest::new("Hello.", "bob", 1.0)).is_none());
    }

    #[test]
    fn test_store_is_last_write_wins() {
        let cache = ResponseCache::in_memory();
        let request = SynthesisRequest::new("Hello.", "amy", 1.0);
        cache.store(&request, payload(1));
        cache.store(&request, payload(2));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(&request), Some(payload(2)));
    }

    #[test]
    fn test_clear_by_source_text_is_scoped() {
        let cache = ResponseCache::in_memory();
        cache.store(&SynthesisRequest::new("Hello world.", "amy", 1.0), payload(1));
        cache.store(&SynthesisRequest::new("Hello world.", "bob", 0.8), payload(2));
        cache.store(&SynthesisRequest::new("How are you?", "amy", 1.0), payload(3));
        let unrelated = SynthesisRequest::new("Something else.", "amy", 1.0);
        cache.store(&unrelated, payload(4));

        let removed = cache.clear_by_source_text("Hello world. How are you?");

        assert_eq!(removed, 3);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(&unrelated), Some(payload(4)));
    }

    #[test]
    fn test_clear_all() {
        let cache = ResponseCache::in_memory();
        cache.store(&SynthesisRequest::new("One.", "amy", 1.0), payload(1));
        cache.store(&SynthesisRequest::new("Two.", "amy", 1.0), payload(2));
        cache.clear_all();
        assert!(cache.is_empty());
        assert_eq!(cache.clear_by_source_text(""), 0);
    }

    #[test]
    fn test_persistence_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cache.json");
        let request = SynthesisRequest::new("Persist me.", "amy", 1.0);

        {
            let cache = ResponseCache::open(&path);
            assert!(cache.is_empty());
            cache.store(&request, payload(7));
        }

        let reopened = ResponseCache::open(&path);
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.lookup(&request), Some(payload(7)));

        reopened.clear_by_source_text("Persist me.");
        assert!(ResponseCache::open(&path).is_empty());
    }

    fn audio_files(path: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(path.with_extension("entries"))
            .map(|dir| dir.map(|entry| entry.unwrap().path()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_store_leaves_existing_audio_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        let first = SynthesisRequest::new("First.", "amy", 1.0);
        let large = AudioPayload::new(vec![1u8; 4096], AudioEncoding::Pcm16 { sample_rate: 24000 });

        let cache = ResponseCache::open(&path);
        cache.store(&first, large);
        let files = audio_files(&path);
        assert_eq!(files.len(), 1);
        std::fs::write(&files[0], [9u8; 8]).unwrap();

        cache.store(&SynthesisRequest::new("Second.", "amy", 1.0), payload(2));

        // the first entry's audio was not written again
        assert_eq!(std::fs::read(&files[0]).unwrap(), vec![9u8; 8]);
        assert_eq!(audio_files(&path).len(), 2);
        assert!(std::fs::metadata(&path).unwrap().len() < 1024);

        let reopened = ResponseCache::open(&path);
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.lookup(&first).unwrap().data.as_ref(), &[9u8; 8]);
    }

    #[test]
    fn test_replaced_and_cleared_audio_leaves_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        let request = SynthesisRequest::new("Again.", "amy", 1.0);

        let cache = ResponseCache::open(&path);
        cache.store(&request, payload(1));
        cache.store(&request, payload(2));
        assert_eq!(audio_files(&path).len(), 1);
        assert_eq!(ResponseCache::open(&path).lookup(&request), Some(payload(2)));

        cache.store(&SynthesisRequest::new("Other.", "amy", 1.0), payload(3));
        assert_eq!(cache.clear_by_source_text("Again."), 1);
        assert_eq!(audio_files(&path).len(), 1);

        cache.clear_all();
        assert!(audio_files(&path).is_empty());
        assert!(ResponseCache::open(&path).is_empty());
    }

    #[test]
    fn test_missing_audio_file_drops_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        let cache = ResponseCache::open(&path);
        cache.store(&SynthesisRequest::new("Kept.", "amy", 1.0), payload(1));
        cache.store(&SynthesisRequest::new("Lost.", "amy", 1.0), payload(2));

        let lost = audio_files(&path)
            .into_iter()
            .find(|file| std::fs::read(file).unwrap() == vec![2u8; 8])
            .unwrap();
        std::fs::remove_file(lost).unwrap();

        let reopened = ResponseCache::open(&path);
        assert_eq!(reopened.len(), 1);
        assert!(reopened.lookup(&SynthesisRequest::new("Kept.", "amy", 1.0)).is_some());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{not json").unwrap();

        let cache = ResponseCache::open(&path);
        assert!(cache.is_empty());

        cache.store(&SynthesisRequest::new("Fresh.", "amy", 1.0), payload(1));
        assert_eq!(ResponseCache::open(&path).len(), 1);
    }
}
