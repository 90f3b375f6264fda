use thiserror::Error;

/// 録音・送信・再生フローで発生するエラー
///
/// いずれのエラーもその試行に対して終端的であり、リトライは行わない。
/// フロー境界（[`crate::flow`]）で捕捉され、ユーザーに通知される。
#[derive(Debug, Error)]
pub enum FlowError {
    /// マイクへのアクセスが拒否された、またはデバイスが利用できない
    #[error("マイクにアクセスできません: {0}")]
    DeviceUnavailable(String),

    /// サーバーが2xx以外のステータスを返した
    #[error("サーバーがリクエストを拒否しました: HTTP {status}")]
    ServerRejected { status: u16 },

    /// 接続失敗・DNS解決失敗・タイムアウトなどの通信エラー
    #[error("サーバーとの通信に失敗しました: {0}")]
    TransportError(String),

    /// 姓または名が空
    #[error("姓と名の両方を入力してください")]
    IncompleteIdentity,

    /// 現在の状態では許可されない操作
    #[error("{operation} は {state} 状態では実行できません")]
    InvalidState {
        operation: &'static str,
        state: crate::types::RecorderState,
    },

    /// 送信処理が既に実行中
    #[error("送信処理が実行中です")]
    Busy,

    /// リソースの作成・読み出し・解放に失敗
    #[error("音声リソースの操作に失敗しました: {0}")]
    Resource(String),

    /// 音声のデコードまたは出力に失敗
    #[error("音声の再生に失敗しました: {0}")]
    Playback(String),
}

impl FlowError {
    /// reqwest のエラーを通信エラーに変換
    pub fn transport(err: reqwest::Error) -> Self {
        FlowError::TransportError(err.to_string())
    }
}

pub type FlowResult<T> = std::result::Result<T, FlowError>;
