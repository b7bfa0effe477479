use std::str::FromStr;

use clap::{Arg, ArgMatches, Command};
use tracing::{error, info};

use netdefsim::logging::{LogConfig, LogOutput, init_logging, level_for_verbosity, parse_log_level};
use netdefsim::scenario::ScenarioConfig;
use netdefsim::simulation::{RunReport, SimError, SimulationEngine};

fn main() {
    let matches = Command::new("netdefsim")
        .version("0.1.0")
        .about("網捕獲防衛訓練環境 (Net Capture Defense Environment)")
        .long_about("2隻の防御艇が網を張って侵入艇を捕獲し、母艦を守る強化学習環境\n\
                     スクリプト方策でエピソードを回し、終了要因と報酬を集計します。")
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("FILE")
                .help("シナリオファイル(.yaml)のパスを指定")
                .long_help("実行するシナリオファイル(.yaml)のパスを指定します。\n\
                           指定しない場合、組み込みの既定シナリオで実行されます。")
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(clap::ArgAction::SetTrue)
                .help("シナリオの情報のみ表示して終了")
        )
        .arg(
            Arg::new("episodes")
                .short('e')
                .long("episodes")
                .value_name("N")
                .value_parser(clap::value_parser!(u32).range(1..))
                .help("実行するエピソード数（シナリオの設定を上書き）")
        )
        .arg(
            Arg::new("parallel")
                .short('p')
                .long("parallel")
                .value_name("N")
                .value_parser(clap::value_parser!(u32).range(1..))
                .default_value("1")
                .help("独立した環境インスタンスを N 個並列実行（シード値 + i）")
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::Count)
                .help("詳細出力レベル (-v: 基本, -vv: 詳細, -vvv: デバッグ)")
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("TARGET")
                .default_value("console")
                .help("ログ出力先 (console, file, both)")
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .default_value("info")
                .help("ログレベル (trace, debug, info, warn, error)")
        )
        .get_matches();

    let verbose_level = matches.get_count("verbose");
    let _guard = match setup_logging(&matches, verbose_level) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("エラー: {}", e);
            std::process::exit(1);
        }
    };

    println!("網捕獲防衛訓練環境 - netdefsim v0.1.0");
    println!();

    if let Err(e) = run(&matches, verbose_level) {
        error!("{}", e);
        eprintln!("エラー: {}", e);
        std::process::exit(1);
    }
}

fn setup_logging(
    matches: &ArgMatches,
    verbose_level: u8,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, Box<dyn std::error::Error>> {
    let output = matches
        .get_one::<String>("log-output")
        .map(|s| LogOutput::from_str(s))
        .transpose()?
        .unwrap_or(LogOutput::Console);
    let base = matches
        .get_one::<String>("log-level")
        .map(|s| parse_log_level(s))
        .unwrap_or(tracing::Level::INFO);

    let config = LogConfig { level: level_for_verbosity(verbose_level, base), output, ..LogConfig::default() };
    Ok(init_logging(config)?)
}

fn run(matches: &ArgMatches, verbose_level: u8) -> Result<(), Box<dyn std::error::Error>> {
    let mut scenario = match matches.get_one::<String>("scenario") {
        Some(path) => {
            let scenario = ScenarioConfig::from_file(path)?;
            if verbose_level > 0 {
                println!("シナリオファイル読み込み完了: {}", path);
            }
            scenario
        }
        None => {
            println!("シナリオ未指定のため既定シナリオを使用します (-h でヘルプ)");
            ScenarioConfig::default()
        }
    };

    if let Some(&episodes) = matches.get_one::<u32>("episodes") {
        scenario.sim.episodes = episodes;
    }

    scenario.print_summary();
    println!();
    if matches.get_flag("info") {
        return Ok(());
    }

    let parallel = matches.get_one::<u32>("parallel").copied().unwrap_or(1);
    let report = if parallel > 1 {
        run_parallel(scenario, parallel, verbose_level)?
    } else {
        run_instance(scenario, verbose_level)?
    };

    println!();
    report.print_summary();
    Ok(())
}

fn run_instance(scenario: ScenarioConfig, verbose_level: u8) -> Result<RunReport, SimError> {
    let mut engine = SimulationEngine::new(scenario, verbose_level);
    engine.initialize()?;
    engine.run()
}

/// 独立した環境を複数スレッドで実行（各環境の内部は単一スレッド）
fn run_parallel(scenario: ScenarioConfig, parallel: u32, verbose_level: u8) -> Result<RunReport, Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread().build()?;
    info!("{}個の環境を並列実行", parallel);

    runtime.block_on(async move {
        let handles: Vec<_> = (0..parallel)
            .map(|i| {
                let mut instance = scenario.clone();
                instance.sim.seed = scenario.sim.seed.wrapping_add(u64::from(i));
                tokio::task::spawn_blocking(move || run_instance(instance, verbose_level))
            })
            .collect();

        let mut merged = RunReport { seed: scenario.sim.seed, ..RunReport::default() };
        for handle in handles {
            merged.merge(handle.await??);
        }
        Ok::<_, Box<dyn std::error::Error>>(merged)
    })
}
