use anyhow::{Context, Result};
use env_logger::Env;
use phoneme_register::audio_input::AudioInput;
use phoneme_register::audio_output::AudioOutput;
use phoneme_register::config::Config;
use phoneme_register::flow::{CaptureFlow, SpeakOutcome, SynthesisFlow};
use phoneme_register::recorder::RecorderController;
use phoneme_register::resource::build_store;
use phoneme_register::speech_api::{SpeechToTextClient, TextToSpeechClient};
use phoneme_register::types::IdentityPhrase;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{sleep, Duration};

const USAGE: &str = "\
使い方:
  phoneme-register --show-interfaces
  phoneme-register --generate-config [path]
  phoneme-register [--config path] enroll <名> <姓>
  phoneme-register [--config path] speak <テキスト...>";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // コマンドライン引数をパース
    let args: Vec<String> = std::env::args().skip(1).collect();

    // 設定ファイル生成モード
    if args.first().map(String::as_str) == Some("--generate-config") {
        let config_path = args.get(1).map(String::as_str).unwrap_or("config.toml");
        Config::write_default(config_path)?;
        println!("設定ファイルを生成しました: {}", config_path);
        return Ok(());
    }

    let (config_path, rest) = match args.as_slice() {
        [flag, path, rest @ ..] if flag == "--config" => (path.as_str(), rest),
        rest => ("config.toml", rest),
    };

    // 設定を読み込み
    let config = Config::load_or_default(config_path)?;

    // ロガーを初期化
    env_logger::Builder::from_env(Env::default().default_filter_or(config.output.log_level.as_str()))
        .format_timestamp(None)
        .init();

    log::debug!("設定: {:?}", config);

    match rest {
        [cmd] if cmd == "--show-interfaces" => {
            AudioInput::list_devices(&config.audio.exclude_pattern)?;
            AudioOutput::list_devices()?;
            Ok(())
        }
        [cmd, first, last] if cmd == "enroll" => enroll(&config, first, last).await,
        [cmd, words @ ..] if cmd == "speak" => speak(&config, &words.join(" ")).await,
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

/// Ctrl+C で立つフラグ
fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || {
        log::info!("停止シグナルを受信しました...");
        flag.store(true, Ordering::SeqCst);
    })?;
    Ok(interrupted)
}

/// Ctrl+C まで待機
async fn wait_for_interrupt(interrupted: &AtomicBool) {
    while !interrupted.load(Ordering::SeqCst) {
        sleep(Duration::from_millis(100)).await;
    }
}

/// 再生が終わるか Ctrl+C まで待機
async fn wait_for_playback(output: &AudioOutput, interrupted: &AtomicBool) {
    while output.is_playing() && !interrupted.load(Ordering::SeqCst) {
        sleep(Duration::from_millis(100)).await;
    }
}

async fn enroll(config: &Config, first_name: &str, last_name: &str) -> Result<()> {
    let interrupted = interrupt_flag()?;
    let identity = IdentityPhrase::new(first_name, last_name)?;

    let store = build_store(&config.playback)?;
    let uploader = SpeechToTextClient::new(
        config.endpoints.speech_to_text_url.clone(),
        config.endpoints.timeout(),
    )?;
    let recorder = RecorderController::new(Box::new(AudioInput::new(&config.audio)));
    let mut flow = CaptureFlow::new(recorder, uploader, store, config.playback.release_policy);

    if let Err(e) = flow.start(identity).await {
        eprintln!("録音を開始できませんでした: {}", e);
        return Err(e.into());
    }

    println!("録音中... Enter で停止して送信 (Ctrl+C でも停止)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = lines.next_line() => break,
            _ = sleep(Duration::from_millis(200)) => {
                let captured = flow.poll();
                log::debug!("録音済み: {} バイト", captured);
                if interrupted.swap(false, Ordering::SeqCst) {
                    break;
                }
            }
        }
    }

    println!("送信中...");
    let submitted = tokio::select! {
        result = flow.stop_and_submit() => result,
        _ = wait_for_interrupt(&interrupted) => {
            println!("中断しました");
            return Ok(());
        }
    };
    if let Err(e) = submitted {
        eprintln!("音声の処理に失敗しました: {}", e);
        return Err(e.into());
    }

    let mut output = AudioOutput::new(config.audio.output_device.as_deref())
        .context("出力デバイスを開けません")?;

    loop {
        println!("Enter で再生, q または Ctrl+C で終了");
        let line = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
            _ = wait_for_interrupt(&interrupted) => break,
        };
        if line.trim() == "q" {
            break;
        }

        match flow.play(&mut output) {
            Ok(true) => {
                wait_for_playback(&output, &interrupted).await;
                // 再生中の Ctrl+C は再生だけを止める
                if interrupted.swap(false, Ordering::SeqCst) {
                    output.stop();
                }
            }
            Ok(false) => println!("再生できる音声がありません"),
            Err(e) => eprintln!("再生に失敗しました: {}", e),
        }
    }

    log::info!("phoneme-register を終了しました");
    Ok(())
}

async fn speak(config: &Config, text: &str) -> Result<()> {
    let interrupted = interrupt_flag()?;

    let store = build_store(&config.playback)?;
    let client = TextToSpeechClient::new(
        config.endpoints.text_to_speech_url.clone(),
        config.endpoints.timeout(),
    )?;
    let mut flow = SynthesisFlow::new(client, store, config.playback.release_policy);
    let mut output = AudioOutput::new(config.audio.output_device.as_deref())
        .context("出力デバイスを開けません")?;

    let spoken = tokio::select! {
        result = flow.speak(text, &mut output) => result,
        _ = wait_for_interrupt(&interrupted) => {
            println!("中断しました");
            return Ok(());
        }
    };

    match spoken {
        Ok(SpeakOutcome::Played) => {
            wait_for_playback(&output, &interrupted).await;
            Ok(())
        }
        Ok(SpeakOutcome::Skipped) => {
            println!("テキストが空です");
            Ok(())
        }
        Err(e) => {
            eprintln!("音声合成に失敗しました: {}", e);
            Err(e.into())
        }
    }
}
