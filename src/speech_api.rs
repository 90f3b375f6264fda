use crate::error::{FlowError, FlowResult};
use crate::types::{AudioPayload, CapturedRecording, IdentityPhrase};
use anyhow::{Context, Result};
use reqwest::multipart;
use serde::Serialize;
use std::time::Duration;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// 音声合成リクエストのJSONボディ
#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("HTTPクライアント作成失敗")
}

/// 応答のステータスを確認して音声データを読み出す
///
/// 2xx以外はボディを読まずに [`FlowError::ServerRejected`]。
async fn read_audio(response: reqwest::Response) -> FlowResult<AudioPayload> {
    let status = response.status();
    if !status.is_success() {
        return Err(FlowError::ServerRejected {
            status: status.as_u16(),
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(FALLBACK_CONTENT_TYPE)
        .to_string();

    let bytes = response.bytes().await.map_err(FlowError::transport)?;

    Ok(AudioPayload {
        bytes: bytes.to_vec(),
        content_type,
    })
}

/// 音声認識エンドポイントのクライアント
///
/// 録音データと氏名フレーズを multipart で1回だけ送信する。リトライはしない。
pub struct SpeechToTextClient {
    client: reqwest::Client,
    url: String,
}

impl SpeechToTextClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
        })
    }

    /// 録音データを送信して応答の音声データを取得
    pub async fn submit(
        &self,
        recording: &CapturedRecording,
        phrase: &IdentityPhrase,
    ) -> FlowResult<AudioPayload> {
        let format = recording.format();
        let part = multipart::Part::bytes(recording.bytes().to_vec())
            .file_name(format.file_name)
            .mime_str(format.content_type)
            .map_err(FlowError::transport)?;

        let form = multipart::Form::new()
            .part("file", part)
            .text("phrase", phrase.as_str().to_string());

        log::debug!(
            "音声認識API: {} バイト送信 (phrase={})",
            recording.len(),
            phrase
        );

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(FlowError::transport)?;

        let payload = read_audio(response).await?;
        log::debug!("音声認識API: {} バイト受信", payload.bytes.len());

        Ok(payload)
    }
}

/// 音声合成エンドポイントのクライアント
pub struct TextToSpeechClient {
    client: reqwest::Client,
    url: String,
}

impl TextToSpeechClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
        })
    }

    /// テキストを送信して合成音声を取得
    pub async fn synthesize(&self, text: &str) -> FlowResult<AudioPayload> {
        log::debug!("音声合成API: {} 文字送信", text.chars().count());

        let response = self
            .client
            .post(&self.url)
            .json(&SynthesisRequest { text })
            .send()
            .await
            .map_err(FlowError::transport)?;

        let payload = read_audio(response).await?;
        log::debug!("音声合成API: {} バイト受信", payload.bytes.len());

        Ok(payload)
    }
}
