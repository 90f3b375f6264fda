//! phoneme-register - 氏名の音声登録と音声合成のクライアント
//!
//! 姓名に紐付けた短い音声を録音して音声認識エンドポイントに送信し、
//! 応答の音声を再生する。また、テキストを音声合成エンドポイントに送り、
//! 合成された音声をその場で再生する。
//!
//! # 主な機能
//!
//! - **録音フロー**: マイク → レコーダー → 音声認識API → 再生ハンドル（明示的に再生）
//! - **音声合成フロー**: テキスト → 音声合成API → 再生ハンドル（自動再生）
//! - **再生ハンドル**: 置き換え時・終了時に必ず解放されるリソース
//!
//! # アーキテクチャ
//!
//! ```text
//! [AudioInput] → [RecorderController] → [SpeechToTextClient] ─┐
//!                                                              ├→ [HandleSlot] → [AudioOutput]
//!              [テキスト] → [TextToSpeechClient] ──────────────┘
//! ```
//!
//! # 使用例
//!
//! ```no_run
//! use phoneme_register::config::Config;
//!
//! // 設定ファイルを読み込み
//! let config = Config::load_or_default("config.toml").unwrap();
//!
//! // またはデフォルト設定を生成
//! Config::write_default("config.toml").unwrap();
//! ```

pub mod audio_input;
pub mod audio_output;
pub mod busy;
pub mod capture;
pub mod config;
pub mod decode;
pub mod error;
pub mod flow;
pub mod playback;
pub mod recorder;
pub mod resource;
pub mod speech_api;
pub mod types;
