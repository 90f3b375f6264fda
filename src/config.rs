use crate::playback::ReleasePolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub endpoints: EndpointConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// オーディオデバイス設定
///
/// # デフォルト値
///
/// - `input_device`: "default" (システムのデフォルトデバイス)
/// - `output_device`: なし (システムのデフォルトデバイス)
/// - `exclude_pattern`: 仮想デバイス・会議ツールのデバイス名
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    #[serde(default = "default_input_device")]
    pub input_device: String,
    pub output_device: Option<String>,
    #[serde(default = "default_exclude_pattern")]
    pub exclude_pattern: String,
}

/// 音声認識・音声合成エンドポイント設定
///
/// # デフォルト値
///
/// - `speech_to_text_url`: ".../integrations/speech-to-text"
/// - `text_to_speech_url`: ".../integrations/text-to-speech"
/// - `timeout_seconds`: 60 秒
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    #[serde(default = "default_speech_to_text_url")]
    pub speech_to_text_url: String,
    #[serde(default = "default_text_to_speech_url")]
    pub text_to_speech_url: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// 再生リソースの保存先
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStoreKind {
    /// メモリ上に保持
    Memory,
    /// セッションディレクトリにファイルとして保持
    File,
}

/// 再生設定
///
/// # デフォルト値
///
/// - `release_policy`: revoke (置き換え時に即解放)
/// - `store`: memory
/// - `resource_dir`: 一時ディレクトリ配下の "phoneme-register"
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaybackConfig {
    #[serde(default)]
    pub release_policy: ReleasePolicy,
    #[serde(default = "default_store")]
    pub store: ResourceStoreKind,
    #[serde(default = "default_resource_dir")]
    pub resource_dir: PathBuf,
}

/// 出力設定
///
/// # デフォルト値
///
/// - `log_level`: "info"
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default functions
fn default_input_device() -> String {
    "default".to_string()
}

fn default_exclude_pattern() -> String {
    "Background|Microsoft Teams|ZoomAudioDevice".to_string()
}

fn default_speech_to_text_url() -> String {
    "https://redfish-internal-definitely.ngrok-free.app/integrations/speech-to-text".to_string()
}

fn default_text_to_speech_url() -> String {
    "https://redfish-internal-definitely.ngrok-free.app/integrations/text-to-speech".to_string()
}

fn default_timeout_seconds() -> u64 {
    60
}

fn default_store() -> ResourceStoreKind {
    ResourceStoreKind::Memory
}

fn default_resource_dir() -> PathBuf {
    std::env::temp_dir().join("phoneme-register")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: default_input_device(),
            output_device: None,
            exclude_pattern: default_exclude_pattern(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            speech_to_text_url: default_speech_to_text_url(),
            text_to_speech_url: default_text_to_speech_url(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl EndpointConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            release_policy: ReleasePolicy::default(),
            store: default_store(),
            resource_dir: default_resource_dir(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// 設定ファイルから読み込み
    ///
    /// # Errors
    ///
    /// ファイルの読み込みまたはパースに失敗した場合にエラーを返す。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use phoneme_register::config::Config;
    /// let config = Config::from_file("config.toml").unwrap();
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("設定ファイルの読み込みに失敗: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "設定ファイルのパースに失敗")?;
        Ok(config)
    }

    /// デフォルト設定をファイルに書き出し
    ///
    /// 既存のファイルは上書きされる。
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Config::default();
        let content =
            toml::to_string_pretty(&config).with_context(|| "設定のシリアライズに失敗")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("設定ファイルの書き込みに失敗: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// 設定ファイルがあれば読み込み、なければデフォルトを使用
    ///
    /// # Errors
    ///
    /// ファイルが存在するがパースに失敗した場合にエラーを返す。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            log::warn!(
                "設定ファイルが見つかりません。デフォルト設定を使用します: {:?}",
                path.as_ref()
            );
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.audio.input_device, "default");
        assert!(config.audio.output_device.is_none());
        assert!(config
            .endpoints
            .speech_to_text_url
            .ends_with("/integrations/speech-to-text"));
        assert!(config
            .endpoints
            .text_to_speech_url
            .ends_with("/integrations/text-to-speech"));
        assert_eq!(config.endpoints.timeout(), Duration::from_secs(60));
        assert_eq!(config.playback.release_policy, ReleasePolicy::Revoke);
        assert_eq!(config.playback.store, ResourceStoreKind::Memory);
        assert_eq!(config.output.log_level, "info");
    }

    #[test]
    fn test_write_and_read_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        Config::write_default(path).unwrap();

        let config = Config::from_file(path).unwrap();
        assert_eq!(config.audio.input_device, "default");
        assert_eq!(config.endpoints.timeout_seconds, 60);
        assert_eq!(config.playback.store, ResourceStoreKind::Memory);
    }

    #[test]
    fn test_custom_config() {
        let toml_content = r#"
[audio]
input_device = "USB Microphone"
output_device = "Speakers"
exclude_pattern = ""

[endpoints]
speech_to_text_url = "http://localhost:8000/stt"
text_to_speech_url = "http://localhost:8000/tts"
timeout_seconds = 5

[playback]
release_policy = "retain"
store = "file"
resource_dir = "/tmp/voices"

[output]
log_level = "debug"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.audio.input_device, "USB Microphone");
        assert_eq!(config.audio.output_device.as_deref(), Some("Speakers"));
        assert_eq!(config.audio.exclude_pattern, "");
        assert_eq!(config.endpoints.speech_to_text_url, "http://localhost:8000/stt");
        assert_eq!(config.endpoints.text_to_speech_url, "http://localhost:8000/tts");
        assert_eq!(config.endpoints.timeout(), Duration::from_secs(5));
        assert_eq!(config.playback.release_policy, ReleasePolicy::Retain);
        assert_eq!(config.playback.store, ResourceStoreKind::File);
        assert_eq!(config.playback.resource_dir, PathBuf::from("/tmp/voices"));
        assert_eq!(config.output.log_level, "debug");
    }

    #[test]
    fn test_load_or_default_nonexistent() {
        let config = Config::load_or_default("nonexistent_file.toml").unwrap();
        assert_eq!(config.audio.input_device, "default");
    }

    #[test]
    fn test_partial_config() {
        // 一部の設定のみ記述した場合、残りはデフォルト値が使われる
        let toml_content = r#"
[endpoints]
timeout_seconds = 15
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.endpoints.timeout_seconds, 15);
        assert!(config
            .endpoints
            .speech_to_text_url
            .ends_with("/integrations/speech-to-text"));
        assert_eq!(config.playback.release_policy, ReleasePolicy::Revoke);
        assert_eq!(config.output.log_level, "info");
    }

    #[test]
    fn test_invalid_config_is_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[playback]\nrelease_policy = \"forever\"\n")
            .unwrap();
        temp_file.flush().unwrap();

        assert!(Config::from_file(temp_file.path()).is_err());
    }
}
