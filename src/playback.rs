use crate::error::FlowResult;
use crate::resource::{ResourceStore, ResourceUrl};
use crate::types::AudioPayload;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 音声再生のプラットフォームプリミティブ
pub trait AudioSink {
    /// バイトリソースの再生を開始する
    fn play(&mut self, bytes: &[u8], content_type: &str) -> FlowResult<()>;
}

/// 置き換えられたハンドルの解放ポリシー
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReleasePolicy {
    /// 置き換え時に即座に解放する
    #[default]
    Revoke,

    /// セッション終了まで保持し、まとめて解放する
    Retain,
}

/// サーバー応答から得た音声リソースの所有ラッパー
///
/// ドロップ時にリソースを失効させる。
pub struct PlaybackHandle {
    url: ResourceUrl,
    content_type: String,
    store: Arc<dyn ResourceStore>,
}

impl PlaybackHandle {
    /// 音声データをストアに登録してハンドルを作成
    pub fn create(store: &Arc<dyn ResourceStore>, payload: AudioPayload) -> FlowResult<Self> {
        let url = store.create(payload.bytes, &payload.content_type)?;
        Ok(Self {
            url,
            content_type: payload.content_type,
            store: Arc::clone(store),
        })
    }

    pub fn url(&self) -> &ResourceUrl {
        &self.url
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// ラップしているリソースを再生
    pub fn play(&self, sink: &mut dyn AudioSink) -> FlowResult<()> {
        let bytes = self.store.fetch(&self.url)?;
        log::info!("再生: {} ({} バイト)", self.url, bytes.len());
        sink.play(&bytes, &self.content_type)
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.store.revoke(&self.url);
    }
}

impl std::fmt::Debug for PlaybackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackHandle")
            .field("url", &self.url)
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// フローごとに1つだけ生存するハンドルの置き場
pub struct HandleSlot {
    current: Option<PlaybackHandle>,
    retained: Vec<PlaybackHandle>,
    policy: ReleasePolicy,
}

impl HandleSlot {
    pub fn new(policy: ReleasePolicy) -> Self {
        Self {
            current: None,
            retained: Vec::new(),
            policy,
        }
    }

    /// 新しいハンドルに置き換える
    pub fn replace(&mut self, handle: PlaybackHandle) -> &PlaybackHandle {
        self.supersede();
        self.current.insert(handle)
    }

    /// 現在のハンドルを無効化する
    pub fn clear(&mut self) {
        self.supersede();
    }

    pub fn current(&self) -> Option<&PlaybackHandle> {
        self.current.as_ref()
    }

    /// 現在のハンドルを再生
    ///
    /// ハンドルがなければ何もしない。
    ///
    /// # Returns
    /// 再生を開始した場合は true
    pub fn play(&self, sink: &mut dyn AudioSink) -> FlowResult<bool> {
        match &self.current {
            Some(handle) => {
                handle.play(sink)?;
                Ok(true)
            }
            None => {
                log::debug!("再生するハンドルがありません");
                Ok(false)
            }
        }
    }

    /// `Retain` ポリシーで保持している古いハンドルの数
    pub fn retained_count(&self) -> usize {
        self.retained.len()
    }

    fn supersede(&mut self) {
        if let Some(old) = self.current.take() {
            match self.policy {
                ReleasePolicy::Revoke => {
                    log::debug!("古いハンドルを解放: {}", old.url());
                    drop(old);
                }
                ReleasePolicy::Retain => {
                    log::debug!("古いハンドルを保持: {}", old.url());
                    self.retained.push(old);
                }
            }
        }
    }
}

impl Drop for HandleSlot {
    fn drop(&mut self) {
        if !self.retained.is_empty() {
            log::info!("保持していた {} 個のハンドルを解放します", self.retained.len());
        }
    }
}


#[cfg(test)]
mod tests {
    use super::recording_sink::RecordingSink;
    use super::*;
    use crate::resource::MemoryResourceStore;

    fn payload(bytes: &[u8]) -> AudioPayload {
        AudioPayload {
            bytes: bytes.to_vec(),
            content_type: "audio/mpeg".to_string(),
        }
    }

    fn memory_store() -> (Arc<MemoryResourceStore>, Arc<dyn ResourceStore>) {
        let store = Arc::new(MemoryResourceStore::new());
        let dyn_store: Arc<dyn ResourceStore> = store.clone();
        (store, dyn_store)
    }

    #[test]
    fn test_handle_revokes_on_drop() {
        let (store, dyn_store) = memory_store();
        let handle = PlaybackHandle::create(&dyn_store, payload(&[1, 2])).unwrap();
        assert_eq!(store.live_count(), 1);
        assert_eq!(handle.content_type(), "audio/mpeg");

        drop(handle);
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn test_replace_releases_previous_handle() {
        let (store, dyn_store) = memory_store();
        let mut slot = HandleSlot::new(ReleasePolicy::Revoke);

        let first = PlaybackHandle::create(&dyn_store, payload(&[1])).unwrap();
        let first_url = first.url().clone();
        slot.replace(first);
        slot.replace(PlaybackHandle::create(&dyn_store, payload(&[2])).unwrap());

        assert_eq!(store.live_count(), 1);
        assert!(store.fetch(&first_url).is_err());
        assert_eq!(slot.retained_count(), 0);
    }

    #[test]
    fn test_retain_policy_keeps_superseded_until_drop() {
        let (store, dyn_store) = memory_store();
        let mut slot = HandleSlot::new(ReleasePolicy::Retain);

        slot.replace(PlaybackHandle::create(&dyn_store, payload(&[1])).unwrap());
        slot.replace(PlaybackHandle::create(&dyn_store, payload(&[2])).unwrap());
        slot.clear();

        assert!(slot.current().is_none());
        assert_eq!(slot.retained_count(), 2);
        assert_eq!(store.live_count(), 2);

        drop(slot);
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn test_play_without_handle_is_noop() {
        let slot = HandleSlot::new(ReleasePolicy::Revoke);
        let mut sink = RecordingSink::default();

        assert!(!slot.play(&mut sink).unwrap());
        assert!(sink.played.borrow().is_empty());
    }

    #[test]
    fn test_play_passes_bytes_and_content_type() {
        let (_store, dyn_store) = memory_store();
        let mut slot = HandleSlot::new(ReleasePolicy::Revoke);
        slot.replace(PlaybackHandle::create(&dyn_store, payload(&[5, 6, 7])).unwrap());

        let mut sink = RecordingSink::default();
        assert!(slot.play(&mut sink).unwrap());

        let played = sink.played.borrow();
        assert_eq!(played.len(), 1);
        assert_eq!(played[0].0, vec![5, 6, 7]);
        assert_eq!(played[0].1, "audio/mpeg");
    }

    #[test]
    fn test_release_policy_serialization() {
        let json = serde_json::to_string(&ReleasePolicy::Retain).unwrap();
        assert_eq!(json, r#""retain""#);
        let parsed: ReleasePolicy = serde_json::from_str(r#""revoke""#).unwrap();
        assert_eq!(parsed, ReleasePolicy::Revoke);
    }
}
