//! # Logging モジュール
//!
//! 捕獲訓練環境のログ管理機能を提供します。
//!
//! tracing-appender による非同期ファイル出力と、コンソール出力を
//! 切り替えて使えます。ファイル出力は JSON 形式で日次ローテーションします。
//!
//! ## 設定可能な出力先
//!
//! - `Console`: コンソールのみ
//! - `File`: ファイルのみ（logs/netdefsim.YYYY-MM-DD）
//! - `Both`: コンソールとファイルの両方
//!
//! `init_logging` が返すガードは、プロセス終了までドロップしないでください。
//! ドロップすると未書き込みのログが失われます。

use std::str::FromStr;

use thiserror::Error;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// ログ出力先の設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogOutput {
    Console,
    File,
    Both,
}

impl LogOutput {
    fn writes_file(&self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

impl FromStr for LogOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" | "all" => Ok(LogOutput::Both),
            _ => Err(format!("無効な出力先: {}. 利用可能: console, file, both", s)),
        }
    }
}

/// ログ設定構造体
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub output: LogOutput,
    /// ログファイルのディレクトリ（File または Both の場合）
    pub log_dir: String,
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            output: LogOutput::Console,
            log_dir: "logs".to_string(),
            file_prefix: "netdefsim".to_string(),
        }
    }
}

/// ログ初期化エラー
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("ログディレクトリを作成できません {dir}: {source}")]
    Directory {
        dir: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ログサブスクライバの登録に失敗しました: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// ログシステムを初期化
///
/// 環境変数 `RUST_LOG` があればそれを優先し、無ければ `config.level` を使います。
/// ファイル出力時は非同期ライターのガードを返します。
pub fn init_logging(config: LogConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.to_string()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = matches!(config.output, LogOutput::Console | LogOutput::Both).then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
    });

    let (file_layer, guard) = if config.output.writes_file() {
        ensure_log_directory(&config.log_dir)?;
        let file_appender = rolling::daily(&config.log_dir, &config.file_prefix);
        let (writer, guard) = non_blocking(file_appender);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(false)
            .with_line_number(false)
            .json();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

/// ログレベルを文字列から解析（無効な場合は INFO）
pub fn parse_log_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!("警告: 無効なログレベル '{}'. INFOを使用します", level_str);
            Level::INFO
        }
    }
}

/// `-v` の回数からログレベルを決める
pub fn level_for_verbosity(verbose_level: u8, base: Level) -> Level {
    match verbose_level {
        0 => base,
        1 => base.max(Level::DEBUG),
        _ => Level::TRACE,
    }
}

fn ensure_log_directory(log_dir: &str) -> Result<(), LoggingError> {
    std::fs::create_dir_all(log_dir).map_err(|source| LoggingError::Directory {
        dir: log_dir.to_string(),
        source,
    })
}
