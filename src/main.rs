use esg_memorag::cli::{Cli, Commands, ConfigAction, MemoryAction, ShellCommand, SHELL_HELP};
use esg_memorag::config::Config;
use esg_memorag::error::{MemoragError, Result};
use esg_memorag::lexicon::Lexicon;
use esg_memorag::pipeline::{Engine, QueryOutcome, QueryResponse};
use std::io::{BufRead, Write};
use std::path::PathBuf;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Ask {
            question,
            session,
            basic,
            debug,
            json,
        } => {
            let mut config = load_config(cli.config, cli.profile)?;
            if basic {
                config.response.mode = "extractive".to_string();
                config.llm.enabled = false;
            }
            cmd_ask(config, &session, &question, debug, json)?;
        }
        Commands::Shell { session } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_shell(config, session)?;
        }
        Commands::Memory { action } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_memory(config, action)?;
        }
        Commands::Import { file } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_import(config, &file)?;
        }
        Commands::Stats { json } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_stats(config, json)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose {
        "esg_memorag=debug"
    } else {
        "esg_memorag=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_ask(config: Config, session: &str, question: &str, debug: bool, json: bool) -> Result<()> {
    let mut engine = Engine::from_config(config)?;
    engine.set_debug(debug);

    let response = engine.submit_query(session, question)?;
    if json {
        println!("{}", to_json(&response, "query response")?);
    } else {
        print_response(&response);
    }

    engine.shutdown()
}

fn cmd_shell(config: Config, session: Option<String>) -> Result<()> {
    let mut engine = Engine::from_config(config)?;
    let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    println!("ESG analyst shell (session {})", session);
    println!("Answer mode: {}. Type 'help' for commands.", engine.mode());

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        std::io::stdout().flush().map_err(|e| MemoragError::Io {
            source: e,
            context: "Failed to flush stdout".to_string(),
        })?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line.map_err(|e| MemoragError::Io {
            source: e,
            context: "Failed to read input".to_string(),
        })?;

        match ShellCommand::parse(&line) {
            ShellCommand::Empty => {}
            ShellCommand::Help => println!("{}", SHELL_HELP),
            ShellCommand::Quit => break,
            ShellCommand::Memory => {
                println!("{}", engine.show_memory_report(&session)?.render());
            }
            ShellCommand::Clear => {
                engine.clear_memory(&session);
                println!("✓ Session history cleared");
            }
            ShellCommand::Mode => match engine.toggle_mode() {
                Ok(mode) => println!("Answer mode: {}", mode),
                Err(e) => println!("⚠ {}", e),
            },
            ShellCommand::Debug => {
                let on = engine.toggle_debug();
                println!("Debug output {}", if on { "on" } else { "off" });
            }
            ShellCommand::Query(text) => match engine.submit_query(&session, &text) {
                Ok(response) => print_response(&response),
                Err(e) => println!("⚠ {}", e),
            },
        }
    }

    engine.shutdown()
}

fn cmd_memory(config: Config, action: MemoryAction) -> Result<()> {
    let engine = Engine::from_config(config)?;

    match action {
        MemoryAction::Report { session, json } => {
            let report = engine.show_memory_report(&session)?;
            if json {
                println!("{}", to_json(&report, "memory report")?);
            } else {
                println!("{}", report.render());
            }
        }
        MemoryAction::Clear {
            session,
            reset_patterns,
        } => {
            engine.clear_memory(&session);
            println!("✓ Cleared session {}", session);
            if reset_patterns {
                engine.reset_patterns()?;
                println!("✓ Pattern counters reset");
            }
        }
    }

    engine.shutdown()
}

fn cmd_import(config: Config, file: &std::path::Path) -> Result<()> {
    let mut engine = Engine::from_config(config)?;
    let summary = engine.import_file(file)?;

    println!("✓ Imported {} observations", summary.inserted);
    if summary.skipped > 0 {
        println!("  Skipped {} already stored", summary.skipped);
    }

    engine.shutdown()
}

fn cmd_stats(config: Config, json: bool) -> Result<()> {
    let engine = Engine::from_config(config)?;
    let stats = engine.stats()?;

    if json {
        println!("{}", to_json(&stats, "stats")?);
    } else {
        println!("Observation Store");
        println!("=================");
        println!("Observations:   {}", stats.observation_count);
        println!("Embeddings:     {}", stats.embedding_count);
        println!("Companies:      {}", stats.company_count);
        println!("Indicators:     {}", stats.indicator_count);
        println!("Missing values: {}", stats.missing_value_count);
    }

    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, profile)?;
            let value = serde_json::to_value(&config).map_err(|e| MemoragError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            let shown = match section {
                Some(section) => value.get(&section).cloned().ok_or_else(|| {
                    MemoragError::Config(format!("Unknown config section: {}", section))
                })?,
                None => value,
            };
            println!("{}", to_json(&shown, "config")?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            let config_dir = path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            std::fs::create_dir_all(&config_dir).map_err(|e| MemoragError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", config_dir),
            })?;

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());

            let lexicon_path = config_dir.join("lexicon.toml");
            if force || !lexicon_path.exists() {
                std::fs::write(&lexicon_path, Lexicon::template()).map_err(|e| {
                    MemoragError::Io {
                        source: e,
                        context: format!("Failed to write lexicon.toml: {:?}", lexicon_path),
                    }
                })?;
                println!("✓ Lexicon installed at: {}", lexicon_path.display());
            }
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'memorag config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        return Ok(config);
    }

    match profile {
        Some(profile) => Config::load_with_profile(&path, &profile),
        None => Config::load(&path),
    }
}

fn print_response(response: &QueryResponse) {
    println!("{}", response.outcome.message());

    if let QueryOutcome::Answered {
        strategy,
        insights,
        fallback_reason,
        ..
    } = &response.outcome
    {
        if let Some(reason) = fallback_reason {
            println!("\n⚠ Generation unavailable ({}); showing {} answer", reason, strategy);
        }
        if !insights.is_empty() {
            println!("\nInsights:");
            for insight in insights {
                println!("  • {}", insight);
            }
        }
    }

    if let Some(trace) = &response.trace {
        let entities = &trace.extraction.resolved;
        println!("\n--- debug ---");
        println!("Entities:   {}", entities.describe());
        println!("Intent:     {}", trace.extraction.intent);
        println!("Confidence: {:.2}", trace.extraction.confidence);
        if !trace.extraction.carried.is_empty() {
            println!("Carried:    {:?}", trace.extraction.carried);
        }
        println!(
            "Retrieval:  \"{}\" (prefilter: {}, structural only: {})",
            trace.query_text, trace.prefilter_applied, trace.structural_only
        );
        println!("Candidates: {}", trace.candidates.len());
        for (i, result) in trace.ranked.iter().take(10).enumerate() {
            println!(
                "  {}. {} {} {} = {} [sim {:.3}, match {:.2}, validity {:.2}, score {:.3}]",
                i + 1,
                result.record.company,
                result.record.year,
                result.record.indicator_code,
                result.record.value,
                result.similarity,
                result.field_match,
                result.validity,
                result.composite
            );
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| MemoragError::Json {
        source: e,
        context: format!("Failed to serialize {}", what),
    })
}
