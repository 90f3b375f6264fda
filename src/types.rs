use crate::error::{FlowError, FlowResult};
use std::fmt;

/// 録音に紐付ける氏名フレーズ
///
/// 名と姓を半角スペース1つで連結し、前後の空白を取り除いたもの。
/// 名・姓のどちらかが空文字列の場合は生成できない。
///
/// # Examples
///
/// ```
/// # use phoneme_register::types::IdentityPhrase;
/// let phrase = IdentityPhrase::new("Ada", "Lovelace").unwrap();
/// assert_eq!(phrase.as_str(), "Ada Lovelace");
///
/// assert!(IdentityPhrase::new("", "Lovelace").is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityPhrase(String);

impl IdentityPhrase {
    pub fn new(first_name: &str, last_name: &str) -> FlowResult<Self> {
        if first_name.is_empty() || last_name.is_empty() {
            return Err(FlowError::IncompleteIdentity);
        }
        Ok(Self(format!("{} {}", first_name, last_name).trim().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 録音データの形式
///
/// キャプチャデバイスごとに固定で、録音完了時に [`CapturedRecording`] に付与される。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureFormat {
    /// MIMEタイプ
    pub content_type: &'static str,

    /// multipart送信時のファイル名
    pub file_name: &'static str,
}

impl CaptureFormat {
    /// ブラウザの MediaRecorder が生成する形式
    pub const WEBM: CaptureFormat = CaptureFormat {
        content_type: "audio/webm",
        file_name: "recording.webm",
    };

    /// cpal キャプチャが生成するストリーミングWAV
    pub const WAV: CaptureFormat = CaptureFormat {
        content_type: "audio/wav",
        file_name: "recording.wav",
    };
}

/// キャプチャプリミティブから届くイベント
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureEvent {
    /// 不透明なバイナリ断片（空の場合もある）
    Data(Vec<u8>),

    /// 停止通知。これ以降にデータは届かない
    Stopped,
}

/// 録音済みデータ
///
/// セッション停止時に一度だけ生成され、以後変更されない。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedRecording {
    bytes: Vec<u8>,
    format: CaptureFormat,
}

impl CapturedRecording {
    /// チャンク列を連結して録音データを組み立てる
    ///
    /// WAV の場合はストリーミング用ヘッダーの長さフィールドを実際の長さに書き換える。
    pub(crate) fn assemble(chunks: Vec<Vec<u8>>, format: CaptureFormat) -> Self {
        let total: usize = chunks.iter().map(Vec::len).sum();
        let mut bytes = Vec::with_capacity(total);
        for chunk in chunks {
            bytes.extend_from_slice(&chunk);
        }
        if format == CaptureFormat::WAV {
            finalize_wav_lengths(&mut bytes);
        }
        Self { bytes, format }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn format(&self) -> CaptureFormat {
        self.format
    }
}

/// RIFF長と data チャンク長をバッファの実際の長さに合わせる
///
/// RIFF/WAVE でないデータや data チャンクのないデータはそのまま。
fn finalize_wav_lengths(bytes: &mut [u8]) {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return;
    }
    let riff_len = (bytes.len() - 8) as u32;
    bytes[4..8].copy_from_slice(&riff_len.to_le_bytes());

    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        if &bytes[pos..pos + 4] == b"data" {
            let data_len = (bytes.len() - pos - 8) as u32;
            bytes[pos + 4..pos + 8].copy_from_slice(&data_len.to_le_bytes());
            return;
        }
        let size = u32::from_le_bytes([
            bytes[pos + 4],
            bytes[pos + 5],
            bytes[pos + 6],
            bytes[pos + 7],
        ]) as usize;
        // チャンクは偶数境界にパディングされる
        pos += 8 + size + (size & 1);
    }
}

/// サーバーから返された音声データ
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioPayload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// レコーダーの状態
///
/// `Idle → Armed → Recording → Finalizing → Idle` の順に遷移する。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RecorderState {
    /// セッションなし
    #[default]
    Idle,
    /// マイクの使用許可を待機中
    Armed,
    /// 録音中
    Recording,
    /// 停止通知を待機中
    Finalizing,
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderState::Idle => write!(f, "Idle"),
            RecorderState::Armed => write!(f, "Armed"),
            RecorderState::Recording => write!(f, "Recording"),
            RecorderState::Finalizing => write!(f, "Finalizing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_phrase_joins_with_single_space() {
        let phrase = IdentityPhrase::new("Ada", "Lovelace").unwrap();
        assert_eq!(phrase.as_str(), "Ada Lovelace");
        assert_eq!(phrase.to_string(), "Ada Lovelace");
    }

    #[test]
    fn test_identity_phrase_is_trimmed() {
        let phrase = IdentityPhrase::new("  Ada", "Lovelace ").unwrap();
        assert_eq!(phrase.as_str(), "Ada Lovelace");
    }

    #[test]
    fn test_identity_phrase_rejects_empty_component() {
        assert!(matches!(
            IdentityPhrase::new("", "Lovelace"),
            Err(FlowError::IncompleteIdentity)
        ));
        assert!(matches!(
            IdentityPhrase::new("Ada", ""),
            Err(FlowError::IncompleteIdentity)
        ));
        assert!(IdentityPhrase::new("", "").is_err());
    }

    #[test]
    fn test_identity_phrase_accepts_any_non_empty_pair() {
        let pairs = [("a", "b"), (" ", "x"), ("名", "姓"), ("Jean-Luc", "Picard")];
        for (first, last) in pairs {
            assert!(
                IdentityPhrase::new(first, last).is_ok(),
                "({:?}, {:?}) は許可されるべき",
                first,
                last
            );
        }
    }

    #[test]
    fn test_assemble_concatenates_in_order() {
        let recording =
            CapturedRecording::assemble(vec![vec![1, 2], vec![3], vec![4, 5, 6]], CaptureFormat::WEBM);
        assert_eq!(recording.bytes(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(recording.len(), 6);
        assert_eq!(recording.format().content_type, "audio/webm");
    }

    #[test]
    fn test_assemble_wav_writes_real_lengths() {
        let header = crate::audio_input::streaming_wav_header(8000).unwrap();
        let header_len = header.len();
        let pcm: Vec<u8> = [10i16, -10, 20, -20]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();

        let recording = CapturedRecording::assemble(vec![header, pcm], CaptureFormat::WAV);
        let bytes = recording.bytes();

        assert_eq!(recording.len(), header_len + 8);
        assert_eq!(&bytes[4..8], &((bytes.len() - 8) as u32).to_le_bytes());
        assert_eq!(&bytes[header_len - 4..header_len], &8u32.to_le_bytes());

        let mut reader = hound::WavReader::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
        assert_eq!(reader.len(), 4);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![10, -10, 20, -20]);
    }

    #[test]
    fn test_assemble_non_wav_is_untouched() {
        let recording =
            CapturedRecording::assemble(vec![b"RIFF".to_vec(), vec![0xFF; 4]], CaptureFormat::WEBM);
        assert_eq!(recording.bytes(), b"RIFF\xFF\xFF\xFF\xFF");
    }

    #[test]
    fn test_recorder_state_default_is_idle() {
        assert_eq!(RecorderState::default(), RecorderState::Idle);
    }
}
