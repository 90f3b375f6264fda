use crate::decode::decode;
use crate::error::{FlowError, FlowResult};
use crate::playback::AudioSink;
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// cpal による音声出力
///
/// 再生のたびにデコード結果のサンプルレートで出力ストリームを作り直す。
/// 前の再生が残っていれば停止する。
pub struct AudioOutput {
    device: Device,
    stream: Option<Stream>,
    pending: Arc<Mutex<VecDeque<i16>>>,
}

impl AudioOutput {
    /// 新しいAudioOutputを作成
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        // デバイスを選択
        let device = if let Some(name) = device_name {
            host.output_devices()?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| anyhow::anyhow!("出力デバイス '{}' が見つかりません", name))?
        } else {
            host.default_output_device()
                .ok_or_else(|| anyhow::anyhow!("デフォルト出力デバイスが見つかりません"))?
        };

        log::info!("出力デバイス: {}", device.name()?);

        Ok(Self {
            device,
            stream: None,
            pending: Arc::new(Mutex::new(VecDeque::new())),
        })
    }

    /// デバイス一覧を表示
    pub fn list_devices() -> Result<()> {
        let host = cpal::default_host();
        println!("=== 利用可能な出力デバイス ===");

        for (idx, device) in host.output_devices()?.enumerate() {
            let name = device.name()?;
            let is_default = host
                .default_output_device()
                .and_then(|d| d.name().ok())
                .map(|default_name| default_name == name)
                .unwrap_or(false);

            let marker = if is_default { " (デフォルト)" } else { "" };
            println!("{}. {}{}", idx, name, marker);

            if let Ok(config) = device.default_output_config() {
                println!(
                    "   サンプルレート: {} Hz, チャンネル数: {}",
                    config.sample_rate().0,
                    config.channels()
                );
            }
        }

        Ok(())
    }

    /// 再生待ちのサンプルが残っているか
    pub fn is_playing(&self) -> bool {
        self.stream.is_some()
            && self
                .pending
                .lock()
                .map(|buffer| !buffer.is_empty())
                .unwrap_or(false)
    }

    fn start_stream(&mut self, samples: Vec<i16>, sample_rate: u32) -> Result<()> {
        self.stop();

        let default_config = self
            .device
            .default_output_config()
            .context("デフォルト出力設定が取得できません")?;

        let config = StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        log::info!(
            "出力ストリーム開始: サンプルレート={}Hz, {} サンプル",
            config.sample_rate.0,
            samples.len()
        );

        {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| anyhow::anyhow!("再生バッファのロックに失敗"))?;
            pending.clear();
            pending.extend(samples);
        }

        // デバイスのサンプルフォーマットに応じてストリームを構築
        let stream = match default_config.sample_format() {
            SampleFormat::F32 => self.build_stream::<f32>(config)?,
            SampleFormat::I16 => self.build_stream::<i16>(config)?,
            SampleFormat::U16 => self.build_stream::<u16>(config)?,
            _ => anyhow::bail!(
                "サポートされていないサンプルフォーマット: {:?}",
                default_config.sample_format()
            ),
        };

        stream.play().context("ストリームの再生開始に失敗")?;
        self.stream = Some(stream);

        Ok(())
    }

    /// 指定されたサンプルフォーマットで出力ストリームを構築
    fn build_stream<T>(&self, config: StreamConfig) -> Result<Stream>
    where
        T: SizedSample + Sample + FromSample<f32> + Send + 'static,
    {
        let pending = self.pending.clone();

        let stream = self
            .device
            .build_output_stream(
                &config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let mut buffer = match pending.lock() {
                        Ok(buffer) => buffer,
                        Err(_) => {
                            data.fill(T::EQUILIBRIUM);
                            return;
                        }
                    };

                    // バッファが不足したら残りは無音
                    for sample in data.iter_mut() {
                        *sample = match buffer.pop_front() {
                            Some(s) => Self::convert_sample::<T>(s),
                            None => T::EQUILIBRIUM,
                        };
                    }
                },
                move |err| {
                    log::error!("出力ストリームエラー: {}", err);
                },
                None,
            )
            .context("出力ストリームの構築に失敗")?;

        Ok(stream)
    }

    /// i16サンプルを指定されたフォーマットに変換
    fn convert_sample<T: Sample + FromSample<f32>>(sample: i16) -> T {
        let normalized = sample as f32 / i16::MAX as f32;
        T::from_sample(normalized)
    }

    /// 再生を停止
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            log::debug!("出力ストリームを停止しました");
        }
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }
}

impl AudioSink for AudioOutput {
    fn play(&mut self, bytes: &[u8], content_type: &str) -> FlowResult<()> {
        let audio = decode(bytes, content_type)?;
        log::info!(
            "再生開始: {:.2}秒 ({}Hz)",
            audio.duration_seconds(),
            audio.sample_rate
        );
        self.start_stream(audio.samples, audio.sample_rate)
            .map_err(|e| FlowError::Playback(format!("{:#}", e)))
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
