use crate::capture::{CaptureControl, CaptureSource};
use crate::error::{FlowError, FlowResult};
use crate::types::{CaptureEvent, CaptureFormat, CapturedRecording, IdentityPhrase, RecorderState};
use tokio::sync::mpsc;

/// 録音中に届いた音声断片の列
///
/// 長さ0の断片は追加しない。
#[derive(Default, Debug)]
struct ChunkSequence {
    chunks: Vec<Vec<u8>>,
    total_bytes: usize,
}

impl ChunkSequence {
    fn push(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        self.total_bytes += chunk.len();
        self.chunks.push(chunk);
    }

    fn clear(&mut self) {
        self.chunks.clear();
        self.total_bytes = 0;
    }

    fn take(&mut self) -> Vec<Vec<u8>> {
        self.total_bytes = 0;
        std::mem::take(&mut self.chunks)
    }
}

/// 1回分の録音セッション
struct ActiveSession {
    events: mpsc::UnboundedReceiver<CaptureEvent>,
    control: Box<dyn CaptureControl>,
    format: CaptureFormat,
    /// 停止要求前に停止通知を受信済み
    stop_observed: bool,
}

/// 録音セッションの状態機械
///
/// キャプチャソースを所有し、`start` / `stop` で1セッションずつ録音する。
/// 同時に録音できるセッションは1つだけで、`Idle` 以外での `start` はエラーになる。
///
/// # 状態遷移
///
/// ```text
/// Idle --start--> Armed --許可--> Recording --stop--> Finalizing --停止通知--> Idle
///                   |
///                   +--拒否/障害--> Idle (DeviceUnavailable)
/// ```
pub struct RecorderController {
    source: Box<dyn CaptureSource>,
    state: RecorderState,
    session: Option<ActiveSession>,
    chunks: ChunkSequence,
}

impl RecorderController {
    pub fn new(source: Box<dyn CaptureSource>) -> Self {
        Self {
            source,
            state: RecorderState::Idle,
            session: None,
            chunks: ChunkSequence::default(),
        }
    }

    /// 現在の状態
    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// 録音を開始
    ///
    /// マイクの使用許可を待ち、許可されれば前回の断片列を破棄して録音状態に入る。
    /// 失敗時は `Idle` に戻り、途中の状態は保持しない。
    pub async fn start(&mut self, identity: &IdentityPhrase) -> FlowResult<()> {
        if self.state != RecorderState::Idle {
            log::warn!("録音開始を拒否: 現在の状態は {}", self.state);
            return Err(FlowError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }

        log::info!("録音開始要求: {}", identity);
        self.state = RecorderState::Armed;

        match self.source.open().await {
            Ok(stream) => {
                self.chunks.clear();
                self.session = Some(ActiveSession {
                    events: stream.events,
                    control: stream.control,
                    format: stream.format,
                    stop_observed: false,
                });
                self.state = RecorderState::Recording;
                log::info!("録音を開始しました ({})", stream.format.content_type);
                Ok(())
            }
            Err(e) => {
                self.session = None;
                self.chunks.clear();
                self.state = RecorderState::Idle;
                log::error!("録音を開始できません: {}", e);
                Err(e)
            }
        }
    }

    /// 届いている断片をブロックせずに取り込む
    ///
    /// # Returns
    /// これまでに取り込んだバイト数
    pub fn poll_chunks(&mut self) -> usize {
        if self.state != RecorderState::Recording {
            return self.chunks.total_bytes;
        }

        if let Some(session) = self.session.as_mut() {
            if !session.stop_observed {
                while let Ok(event) = session.events.try_recv() {
                    match event {
                        CaptureEvent::Data(chunk) => self.chunks.push(chunk),
                        CaptureEvent::Stopped => {
                            log::warn!("停止要求前にキャプチャが停止しました");
                            session.stop_observed = true;
                            break;
                        }
                    }
                }
            }
        }

        self.chunks.total_bytes
    }

    /// 録音を停止して録音データを組み立てる
    ///
    /// 停止要求後、停止通知を受け取るまで待機してから組み立てる。
    /// 通知前に届いた断片はすべて配信順に含まれる。
    pub async fn stop(&mut self) -> FlowResult<CapturedRecording> {
        if self.state != RecorderState::Recording {
            return Err(FlowError::InvalidState {
                operation: "stop",
                state: self.state,
            });
        }

        let Some(mut session) = self.session.take() else {
            self.state = RecorderState::Idle;
            return Err(FlowError::InvalidState {
                operation: "stop",
                state: RecorderState::Idle,
            });
        };

        self.state = RecorderState::Finalizing;
        session.control.request_stop();

        if !session.stop_observed {
            loop {
                match session.events.recv().await {
                    Some(CaptureEvent::Data(chunk)) => self.chunks.push(chunk),
                    Some(CaptureEvent::Stopped) => break,
                    None => {
                        log::warn!("停止通知を受信する前にキャプチャチャンネルが閉じました");
                        break;
                    }
                }
            }
        }

        let recording = CapturedRecording::assemble(self.chunks.take(), session.format);
        drop(session);
        self.state = RecorderState::Idle;

        if recording.is_empty() {
            log::warn!("録音データが空です");
        } else {
            log::info!("録音を停止しました: {} バイト", recording.len());
        }

        Ok(recording)
    }
}
