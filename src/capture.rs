use crate::error::FlowResult;
use crate::types::{CaptureEvent, CaptureFormat};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// 開始済みキャプチャの停止操作
pub trait CaptureControl {
    /// 停止を要求する
    ///
    /// 停止の完了はこの呼び出しの戻りではなく、
    /// イベントチャンネルに届く [`CaptureEvent::Stopped`] で通知される。
    fn request_stop(&mut self);
}

/// 開始済みのキャプチャ
pub struct CaptureStream {
    /// 音声断片と停止通知の受信チャンネル
    pub events: mpsc::UnboundedReceiver<CaptureEvent>,
    /// 停止操作
    pub control: Box<dyn CaptureControl>,
    /// このキャプチャが生成するデータ形式
    pub format: CaptureFormat,
}

/// マイクキャプチャのプラットフォームプリミティブ
///
/// `open` はマイク使用許可の取得を含むため非同期。
/// 許可が得られない場合やデバイス障害時は [`crate::error::FlowError::DeviceUnavailable`] を返す。
#[async_trait(?Send)]
pub trait CaptureSource {
    async fn open(&mut self) -> FlowResult<CaptureStream>;
}
