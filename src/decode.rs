use crate::error::{FlowError, FlowResult};
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// 再生用にデコードした音声（モノラル i16）
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// 再生時間（秒）
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// 音声データをデコード
///
/// WAV は hound で読む（データ長不定のストリーミングWAVも可）。
/// それ以外（MP3, AAC, Ogg Vorbis, FLAC など）は symphonia でコンテナを判別してデコードする。
/// 複数チャンネルはモノラルに平均化する。
pub fn decode(bytes: &[u8], content_type: &str) -> FlowResult<DecodedAudio> {
    if is_wav(bytes) {
        decode_wav(bytes)
    } else {
        decode_compressed(bytes, content_type)
    }
}

fn to_i16(sample: i32, bits_per_sample: u32) -> i16 {
    if bits_per_sample == 16 {
        sample as i16
    } else {
        let scale = (1i64 << (bits_per_sample - 1)) as f64;
        ((sample as f64 / scale) * 32767.0).clamp(i16::MIN as f64, i16::MAX as f64) as i16
    }
}

fn downmix(interleaved: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

fn decode_wav(bytes: &[u8]) -> FlowResult<DecodedAudio> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| FlowError::Playback(format!("WAVヘッダーの読み込みに失敗: {}", e)))?;
    let spec = reader.spec();

    let mut interleaved = Vec::new();
    match spec.sample_format {
        hound::SampleFormat::Int => {
            for sample in reader.into_samples::<i32>() {
                match sample {
                    Ok(s) => interleaved.push(to_i16(s, spec.bits_per_sample as u32)),
                    // ストリーミングWAVはデータ長が不定なので途中の終端を許容する
                    Err(hound::Error::IoError(_)) if !interleaved.is_empty() => break,
                    Err(e) => {
                        return Err(FlowError::Playback(format!("WAVサンプルの読み込みに失敗: {}", e)))
                    }
                }
            }
        }
        hound::SampleFormat::Float => {
            for sample in reader.into_samples::<f32>() {
                match sample {
                    Ok(s) => interleaved.push((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
                    Err(hound::Error::IoError(_)) if !interleaved.is_empty() => break,
                    Err(e) => {
                        return Err(FlowError::Playback(format!("WAVサンプルの読み込みに失敗: {}", e)))
                    }
                }
            }
        }
    }

    Ok(DecodedAudio {
        samples: downmix(&interleaved, spec.channels as usize),
        sample_rate: spec.sample_rate,
    })
}

fn decode_compressed(bytes: &[u8], content_type: &str) -> FlowResult<DecodedAudio> {
    let unsupported = |e: SymphoniaError| {
        FlowError::Playback(format!("サポートされていない音声形式 ({}): {}", content_type, e))
    };

    let mut hint = Hint::new();
    let essence = content_type.split(';').next().unwrap_or("").trim();
    if !essence.is_empty() {
        hint.mime_type(essence);
    }

    let source = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(unsupported)?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| FlowError::Playback(format!("音声トラックがありません: {}", content_type)))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(unsupported)?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(e) => {
                return Err(FlowError::Playback(format!("音声パケットの読み込みに失敗: {}", e)))
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate.get_or_insert(spec.rate);

                let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend(downmix(buffer.samples(), spec.channels.count()));
            }
            // 壊れたフレームは読み飛ばす
            Err(SymphoniaError::DecodeError(e)) => log::warn!("フレームのデコードに失敗: {}", e),
            Err(e) => return Err(FlowError::Playback(format!("音声のデコードに失敗: {}", e))),
        }
    }

    let sample_rate = sample_rate
        .ok_or_else(|| FlowError::Playback("サンプルレートが不明です".to_string()))?;

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}
