//! 録音フローと音声合成フロー
//!
//! どちらのフローもエラーをここで捕捉してログに残し、呼び出し元（UI）に返す。
//! 実行中フラグはどの終了経路でも必ず下ろされる。

use crate::busy::BusyFlag;
use crate::error::{FlowError, FlowResult};
use crate::playback::{AudioSink, HandleSlot, PlaybackHandle, ReleasePolicy};
use crate::recorder::RecorderController;
use crate::resource::ResourceStore;
use crate::speech_api::{SpeechToTextClient, TextToSpeechClient};
use crate::types::{CapturedRecording, IdentityPhrase, RecorderState};
use std::sync::Arc;

/// 音声合成の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// 空テキストのため何もしなかった
    Skipped,
    /// 合成音声の再生を開始した
    Played,
}

/// 録音フロー: マイク → レコーダー → 音声認識API → 再生ハンドル
pub struct CaptureFlow {
    recorder: RecorderController,
    uploader: SpeechToTextClient,
    store: Arc<dyn ResourceStore>,
    handles: HandleSlot,
    busy: BusyFlag,
    identity: Option<IdentityPhrase>,
}

impl CaptureFlow {
    pub fn new(
        recorder: RecorderController,
        uploader: SpeechToTextClient,
        store: Arc<dyn ResourceStore>,
        policy: ReleasePolicy,
    ) -> Self {
        Self {
            recorder,
            uploader,
            store,
            handles: HandleSlot::new(policy),
            busy: BusyFlag::new(),
            identity: None,
        }
    }

    /// 実行中フラグ（UIから監視するためのクローン）
    pub fn busy(&self) -> BusyFlag {
        self.busy.clone()
    }

    pub fn recorder_state(&self) -> RecorderState {
        self.recorder.state()
    }

    pub fn handle(&self) -> Option<&PlaybackHandle> {
        self.handles.current()
    }

    /// 録音を開始
    ///
    /// 開始に成功すると前回の応答ハンドルは無効化される。
    /// 送信中は `submit` がフローを可変借用しているため呼び出せない。
    pub async fn start(&mut self, identity: IdentityPhrase) -> FlowResult<()> {
        self.recorder.start(&identity).await?;
        self.handles.clear();
        self.identity = Some(identity);
        Ok(())
    }

    /// 届いている音声断片を取り込み、録音済みバイト数を返す
    pub fn poll(&mut self) -> usize {
        self.recorder.poll_chunks()
    }

    /// 録音を停止して送信
    pub async fn stop_and_submit(&mut self) -> FlowResult<()> {
        let recording = self.recorder.stop().await?;
        let identity = self.identity.take().ok_or(FlowError::InvalidState {
            operation: "submit",
            state: RecorderState::Idle,
        })?;

        self.submit(&recording, &identity).await
    }

    /// 録音データを送信し、成功すれば応答を新しいハンドルにする
    ///
    /// 失敗時は既存のハンドルに触れない。
    pub async fn submit(
        &mut self,
        recording: &CapturedRecording,
        identity: &IdentityPhrase,
    ) -> FlowResult<()> {
        let result = {
            let _busy = self.busy.acquire()?;
            self.uploader.submit(recording, identity).await
        };

        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("音声の送信に失敗: {}", e);
                return Err(e);
            }
        };

        let handle = PlaybackHandle::create(&self.store, payload)?;
        log::info!(
            "応答音声を受信しました: {} ({})",
            handle.url(),
            handle.content_type()
        );
        self.handles.replace(handle);
        Ok(())
    }

    /// 受信した音声を再生
    ///
    /// ハンドルがなければ何もせず false を返す。
    pub fn play(&self, sink: &mut dyn AudioSink) -> FlowResult<bool> {
        self.handles.play(sink)
    }
}

/// 音声合成フロー: テキスト → 音声合成API → 再生ハンドル（自動再生）
pub struct SynthesisFlow {
    client: TextToSpeechClient,
    store: Arc<dyn ResourceStore>,
    handles: HandleSlot,
    busy: BusyFlag,
}

impl SynthesisFlow {
    pub fn new(
        client: TextToSpeechClient,
        store: Arc<dyn ResourceStore>,
        policy: ReleasePolicy,
    ) -> Self {
        Self {
            client,
            store,
            handles: HandleSlot::new(policy),
            busy: BusyFlag::new(),
        }
    }

    pub fn busy(&self) -> BusyFlag {
        self.busy.clone()
    }

    pub fn handle(&self) -> Option<&PlaybackHandle> {
        self.handles.current()
    }

    /// テキストを音声に変換して即座に再生
    ///
    /// 空テキストはネットワークに送らず [`SpeakOutcome::Skipped`]。
    pub async fn speak(&mut self, text: &str, sink: &mut dyn AudioSink) -> FlowResult<SpeakOutcome> {
        if text.is_empty() {
            log::debug!("空テキストのため音声合成をスキップ");
            return Ok(SpeakOutcome::Skipped);
        }

        let result = {
            let _busy = self.busy.acquire()?;
            self.client.synthesize(text).await
        };

        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("音声合成に失敗: {}", e);
                return Err(e);
            }
        };

        let handle = self
            .handles
            .replace(PlaybackHandle::create(&self.store, payload)?);
        handle.play(sink)?;

        Ok(SpeakOutcome::Played)
    }
}
