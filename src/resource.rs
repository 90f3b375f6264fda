use crate::config::{PlaybackConfig, ResourceStoreKind};
use crate::error::{FlowError, FlowResult};
use anyhow::Context;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// 再生可能なバイトリソースを指すURL
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceUrl(String);

impl ResourceUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// バイト列を再生可能なリソースに変換し、不要になったら解放するプリミティブ
pub trait ResourceStore: Send + Sync {
    /// バイト列を登録してURLを発行
    fn create(&self, bytes: Vec<u8>, content_type: &str) -> FlowResult<ResourceUrl>;

    /// URLが指すバイト列を取得
    fn fetch(&self, url: &ResourceUrl) -> FlowResult<Vec<u8>>;

    /// URLを失効させてリソースを解放
    fn revoke(&self, url: &ResourceUrl);

    /// 解放されていないリソースの数
    fn live_count(&self) -> usize;
}

/// メモリ上にリソースを保持するストア
///
/// URLは `mem://<連番>` 形式。
#[derive(Default)]
pub struct MemoryResourceStore {
    next_id: AtomicU64,
    entries: Mutex<HashMap<ResourceUrl, Vec<u8>>>,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResourceStore for MemoryResourceStore {
    fn create(&self, bytes: Vec<u8>, content_type: &str) -> FlowResult<ResourceUrl> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let url = ResourceUrl(format!("mem://{}", id));
        log::debug!("リソース作成: {} ({}, {} バイト)", url, content_type, bytes.len());

        let mut entries = self
            .entries
            .lock()
            .map_err(|_| FlowError::Resource("リソーステーブルのロックに失敗".to_string()))?;
        entries.insert(url.clone(), bytes);
        Ok(url)
    }

    fn fetch(&self, url: &ResourceUrl) -> FlowResult<Vec<u8>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| FlowError::Resource("リソーステーブルのロックに失敗".to_string()))?;
        entries
            .get(url)
            .cloned()
            .ok_or_else(|| FlowError::Resource(format!("解放済みまたは不明なリソース: {}", url)))
    }

    fn revoke(&self, url: &ResourceUrl) {
        if let Ok(mut entries) = self.entries.lock() {
            if entries.remove(url).is_some() {
                log::debug!("リソース解放: {}", url);
            }
        }
    }

    fn live_count(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

/// セッションディレクトリにファイルとしてリソースを保持するストア
///
/// URLは `file://<パス>` 形式。失効時にファイルを削除する。
pub struct FileResourceStore {
    dir: PathBuf,
    next_id: AtomicU64,
    files: Mutex<HashMap<ResourceUrl, PathBuf>>,
}

impl FileResourceStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();

        if !dir.exists() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("リソースディレクトリの作成に失敗: {:?}", dir))?;
        }

        Ok(Self {
            dir,
            next_id: AtomicU64::new(0),
            files: Mutex::new(HashMap::new()),
        })
    }

    fn extension_for(content_type: &str) -> &'static str {
        let essence = content_type.split(';').next().unwrap_or("").trim();
        match essence {
            "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
            "audio/flac" | "audio/x-flac" => "flac",
            "audio/mpeg" | "audio/mp3" => "mp3",
            "audio/webm" => "webm",
            "audio/ogg" | "audio/opus" => "ogg",
            _ => "bin",
        }
    }
}

impl ResourceStore for FileResourceStore {
    fn create(&self, bytes: Vec<u8>, content_type: &str) -> FlowResult<ResourceUrl> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let filename = format!(
            "audio_{}_{}.{}",
            timestamp,
            id,
            Self::extension_for(content_type)
        );
        let path = self.dir.join(filename);

        fs::write(&path, &bytes)
            .map_err(|e| FlowError::Resource(format!("{:?} への書き込みに失敗: {}", path, e)))?;

        let url = ResourceUrl(format!("file://{}", path.display()));
        log::debug!("リソース作成: {} ({} バイト)", url, bytes.len());

        let mut files = self
            .files
            .lock()
            .map_err(|_| FlowError::Resource("リソーステーブルのロックに失敗".to_string()))?;
        files.insert(url.clone(), path);
        Ok(url)
    }

    fn fetch(&self, url: &ResourceUrl) -> FlowResult<Vec<u8>> {
        let path = {
            let files = self
                .files
                .lock()
                .map_err(|_| FlowError::Resource("リソーステーブルのロックに失敗".to_string()))?;
            files
                .get(url)
                .cloned()
                .ok_or_else(|| FlowError::Resource(format!("解放済みまたは不明なリソース: {}", url)))?
        };

        fs::read(&path).map_err(|e| FlowError::Resource(format!("{:?} の読み込みに失敗: {}", path, e)))
    }

    fn revoke(&self, url: &ResourceUrl) {
        let path = match self.files.lock() {
            Ok(mut files) => files.remove(url),
            Err(_) => None,
        };

        if let Some(path) = path {
            if let Err(e) = fs::remove_file(&path) {
                log::warn!("リソースファイルの削除に失敗: {:?}: {}", path, e);
            } else {
                log::debug!("リソース解放: {}", url);
            }
        }
    }

    fn live_count(&self) -> usize {
        self.files.lock().map(|f| f.len()).unwrap_or(0)
    }
}

impl Drop for FileResourceStore {
    fn drop(&mut self) {
        if let Ok(files) = self.files.get_mut() {
            for (url, path) in files.drain() {
                log::warn!("未解放のリソースを削除: {}", url);
                let _ = fs::remove_file(path);
            }
        }
    }
}

/// 設定に従ってリソースストアを作成
pub fn build_store(config: &PlaybackConfig) -> anyhow::Result<Arc<dyn ResourceStore>> {
    let store: Arc<dyn ResourceStore> = match config.store {
        ResourceStoreKind::Memory => {
            log::info!("再生リソース: メモリ");
            Arc::new(MemoryResourceStore::new())
        }
        ResourceStoreKind::File => {
            log::info!("再生リソース: {:?}", config.resource_dir);
            Arc::new(FileResourceStore::new(&config.resource_dir)?)
        }
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_create_fetch_revoke() {
        let store = MemoryResourceStore::new();
        let url = store.create(vec![1, 2, 3], "audio/mpeg").unwrap();

        assert!(url.as_str().starts_with("mem://"));
        assert_eq!(store.fetch(&url).unwrap(), vec![1, 2, 3]);
        assert_eq!(store.live_count(), 1);

        store.revoke(&url);
        assert_eq!(store.live_count(), 0);
        assert!(matches!(store.fetch(&url), Err(FlowError::Resource(_))));
    }

    #[test]
    fn test_memory_store_urls_are_unique() {
        let store = MemoryResourceStore::new();
        let a = store.create(vec![1], "audio/wav").unwrap();
        let b = store.create(vec![1], "audio/wav").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_file_store_writes_and_deletes() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileResourceStore::new(temp_dir.path())?;

        let url = store.create(vec![9u8; 64], "audio/wav")?;
        assert!(url.as_str().starts_with("file://"));
        assert!(url.as_str().ends_with(".wav"));
        assert_eq!(store.fetch(&url)?, vec![9u8; 64]);
        assert_eq!(fs::read_dir(temp_dir.path())?.count(), 1);

        store.revoke(&url);
        assert_eq!(store.live_count(), 0);
        assert_eq!(fs::read_dir(temp_dir.path())?.count(), 0);

        Ok(())
    }

    #[test]
    fn test_file_store_drop_removes_leftovers() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        {
            let store = FileResourceStore::new(temp_dir.path().join("session"))?;
            store.create(vec![0u8; 8], "audio/mpeg; codecs=mp3")?;
        }
        assert_eq!(fs::read_dir(temp_dir.path().join("session"))?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_build_store_from_config() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let config = PlaybackConfig {
            store: ResourceStoreKind::File,
            resource_dir: temp_dir.path().join("voices"),
            ..PlaybackConfig::default()
        };

        let store = build_store(&config)?;
        let url = store.create(vec![1, 2], "audio/wav")?;
        assert!(url.as_str().starts_with("file://"));
        assert!(temp_dir.path().join("voices").exists());

        let memory = build_store(&PlaybackConfig::default())?;
        assert!(memory.create(vec![1], "audio/wav")?.as_str().starts_with("mem://"));
        Ok(())
    }

    #[test]
    fn test_extension_for_content_type() {
        assert_eq!(FileResourceStore::extension_for("audio/flac"), "flac");
        assert_eq!(FileResourceStore::extension_for("audio/mpeg"), "mp3");
        assert_eq!(FileResourceStore::extension_for("audio/webm;codecs=opus"), "webm");
        assert_eq!(FileResourceStore::extension_for("application/octet-stream"), "bin");
    }
}
