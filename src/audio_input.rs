use crate::capture::{CaptureControl, CaptureSource, CaptureStream};
use crate::config::AudioConfig;
use crate::error::{FlowError, FlowResult};
use crate::types::{CaptureEvent, CaptureFormat};
use anyhow::{Context, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SizedSample};
use regex_lite::Regex;
use std::io::Cursor;
use tokio::sync::mpsc;

/// データ長不定のストリーミングWAVで使うデータチャンク長（16bitモノラルのブロック境界）
const STREAMING_DATA_LEN: u32 = 0xFFFF_FFFE;

/// ストリーミング用のWAVヘッダーを生成
///
/// 録音終了時点の長さが分からないため、RIFF長とデータ長を最大値にしておく。
pub fn streaming_wav_header(sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    hound::WavWriter::new(&mut cursor, spec)
        .context("WAVライター作成失敗")?
        .finalize()
        .context("WAV finalize失敗")?;
    let mut header = cursor.into_inner();

    header[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
    let data_pos = header
        .windows(4)
        .position(|w| w == b"data")
        .context("WAVヘッダーにdataチャンクがありません")?;
    header[data_pos + 4..data_pos + 8].copy_from_slice(&STREAMING_DATA_LEN.to_le_bytes());

    Ok(header)
}

/// マイク入力（cpal）
///
/// 開始時にWAVヘッダーを1断片目として送り、以降はコールバックごとに
/// モノラル16bit PCMの断片を送る。
pub struct AudioInput {
    device_id: String,
    exclude_pattern: String,
}

impl AudioInput {
    pub fn new(config: &AudioConfig) -> Self {
        log::info!("設定: {:?}", config);
        Self {
            device_id: config.input_device.clone(),
            exclude_pattern: config.exclude_pattern.clone(),
        }
    }

    /// 設定されたデバイスを取得
    fn select_device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();

        let device = if self.device_id == "default" {
            host.default_input_device()
                .context("デフォルト入力デバイスが見つかりません")?
        } else {
            // デバイスIDが指定されている場合は、デバイス一覧から検索
            Self::input_devices(&self.exclude_pattern)?
                .into_iter()
                .find(|d| d.name().ok().as_deref() == Some(self.device_id.as_str()))
                .with_context(|| format!("デバイスが見つかりません: {}", self.device_id))?
        };

        log::info!("入力デバイス: {:?}", device.name());
        Ok(device)
    }

    /// デバイスを開いてキャプチャを開始
    fn open_stream(
        &self,
    ) -> Result<(
        cpal::Stream,
        mpsc::UnboundedSender<CaptureEvent>,
        mpsc::UnboundedReceiver<CaptureEvent>,
    )> {
        let device = self.select_device()?;

        let default_config = device
            .default_input_config()
            .context("デフォルト入力設定が取得できません")?;

        log::info!(
            "デバイス設定: {:?}, {}Hz, {}ch",
            default_config.sample_format(),
            default_config.sample_rate().0,
            default_config.channels()
        );

        let stream_config: cpal::StreamConfig = default_config.config();
        let (tx, rx) = mpsc::unbounded_channel();

        let header = streaming_wav_header(stream_config.sample_rate.0)?;
        let _ = tx.send(CaptureEvent::Data(header));

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => Self::build_stream::<f32>(&device, &stream_config, tx.clone())?,
            cpal::SampleFormat::I16 => Self::build_stream::<i16>(&device, &stream_config, tx.clone())?,
            cpal::SampleFormat::U16 => Self::build_stream::<u16>(&device, &stream_config, tx.clone())?,
            cpal::SampleFormat::I32 => Self::build_stream::<i32>(&device, &stream_config, tx.clone())?,
            _ => anyhow::bail!("サポートされていないサンプルフォーマット"),
        };

        stream.play().context("ストリームの再生開始に失敗")?;

        Ok((stream, tx, rx))
    }

    /// ストリームを構築
    fn build_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        tx: mpsc::UnboundedSender<CaptureEvent>,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + Sample + Send + 'static,
        <T as Sample>::Float: Into<f32>,
    {
        let num_channels = config.channels.max(1) as usize;

        let data_callback = move |data: &[T], _info: &cpal::InputCallbackInfo| {
            // インターリーブされたデータをモノラルに平均化
            let mut bytes = Vec::with_capacity(data.len() / num_channels * 2);
            for frame in data.chunks(num_channels) {
                let sum: f32 = frame
                    .iter()
                    .map(|s| -> f32 { s.to_float_sample().into() })
                    .sum();
                let mono = (sum / frame.len() as f32).clamp(-1.0, 1.0);
                let sample = (mono * i16::MAX as f32) as i16;
                bytes.extend_from_slice(&sample.to_le_bytes());
            }

            if tx.send(CaptureEvent::Data(bytes)).is_err() {
                log::warn!("音声断片の送信失敗: チャンネルクローズ");
            }
        };

        let error_callback = move |err| {
            log::error!("ストリームエラー: {}", err);
        };

        let stream = device
            .build_input_stream(config, data_callback, error_callback, None)
            .context("入力ストリームの構築に失敗")?;

        Ok(stream)
    }

    /// デバイス一覧を表示
    pub fn list_devices(exclude_pattern: &str) -> Result<()> {
        println!("利用可能な入力デバイス:");
        println!();

        for (idx, device) in Self::input_devices(exclude_pattern)?.into_iter().enumerate() {
            let name = device.name()?;
            println!("  [{}] {}", idx, name);

            device.supported_input_configs()?.for_each(|config_range| {
                println!(
                    "      フォーマット: {:?}, {}-{}Hz, {}ch",
                    config_range.sample_format(),
                    config_range.min_sample_rate().0,
                    config_range.max_sample_rate().0,
                    config_range.channels()
                );
            });
            println!();
        }

        Ok(())
    }

    /// 除外パターンに一致するデバイスを除いた入力デバイス一覧を取得
    fn input_devices(exclude_pattern: &str) -> Result<Vec<cpal::Device>> {
        let host = cpal::default_host();
        let excluded = if exclude_pattern.is_empty() {
            None
        } else {
            Some(
                Regex::new(exclude_pattern)
                    .with_context(|| format!("除外パターンが不正です: {}", exclude_pattern))?,
            )
        };

        let devices = host
            .input_devices()?
            .filter(|device| match (&excluded, device.name()) {
                (Some(re), Ok(name)) => !re.is_match(&name),
                _ => true,
            })
            .collect();
        Ok(devices)
    }
}

/// cpal ストリームの停止操作
///
/// ストリームを破棄してコールバックが止まった後に停止通知を送る。
struct CpalCaptureControl {
    stream: Option<cpal::Stream>,
    tx: Option<mpsc::UnboundedSender<CaptureEvent>>,
}

impl CaptureControl for CpalCaptureControl {
    fn request_stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            drop(stream);
            log::info!("音声入力ストリームを停止しました");
        }
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(CaptureEvent::Stopped);
        }
    }
}

impl Drop for CpalCaptureControl {
    fn drop(&mut self) {
        self.request_stop();
    }
}

#[async_trait(?Send)]
impl CaptureSource for AudioInput {
    async fn open(&mut self) -> FlowResult<CaptureStream> {
        let (stream, tx, rx) = self
            .open_stream()
            .map_err(|e| FlowError::DeviceUnavailable(format!("{:#}", e)))?;

        log::info!("音声入力ストリームを開始しました");

        Ok(CaptureStream {
            events: rx,
            control: Box::new(CpalCaptureControl {
                stream: Some(stream),
                tx: Some(tx),
            }),
            format: CaptureFormat::WAV,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_header_is_readable() {
        let header = streaming_wav_header(48000).unwrap();

        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[4..8], &u32::MAX.to_le_bytes());

        let reader = hound::WavReader::new(Cursor::new(header)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 48000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
    }

    #[test]
    fn test_streaming_header_with_pcm_decodes() {
        let mut bytes = streaming_wav_header(16000).unwrap();
        for sample in [100i16, -100, 2000] {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }

        let audio = crate::decode::decode(&bytes, "audio/wav").unwrap();
        assert_eq!(audio.sample_rate, 16000);
        assert_eq!(audio.samples, vec![100, -100, 2000]);
    }
}
