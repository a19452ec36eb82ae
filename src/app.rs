use std::path::Path;

use anyhow::{Context, Result};
use clap::CommandFactory;

use crate::{
    cli::{Cli, Command},
    domain,
    infra::{self, config::AppConfig, replay_script},
    realtime,
    usecases::{
        self, bootstrap,
        replay::{run_replay, ReplayReport},
    },
};

const REPLAY_FINISHED_WITH_FAILURES: &str = "REPLAY_FINISHED_WITH_FAILURES";

pub fn run(cli: Cli) -> Result<()> {
    let Some(command) = cli.resolved_command() else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let context = bootstrap::bootstrap(cli.config.as_deref())?;
    tracing::debug!(
        domain = domain::module_name(),
        realtime = realtime::module_name(),
        usecases = usecases::module_name(),
        infra = infra::module_name(),
        "module boundaries loaded"
    );

    match command {
        Command::Replay { script } => {
            let report = replay(&context.config, &script)?;
            for line in &report.lines {
                println!("{line}");
            }

            if report.failed_steps > 0 {
                tracing::warn!(
                    code = REPLAY_FINISHED_WITH_FAILURES,
                    failed_steps = report.failed_steps,
                    "replay finished with failed steps"
                );
                eprintln!("{} step(s) failed", report.failed_steps);
            }
        }
        Command::Config => {
            print!("{}", render_config(&context.config)?);
        }
    }

    Ok(())
}

fn replay(config: &AppConfig, script_path: &Path) -> Result<ReplayReport> {
    let script = replay_script::load(script_path)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    tracing::info!(
        script = %script_path.display(),
        steps = script.steps.len(),
        "replay started"
    );

    Ok(runtime.block_on(run_replay(script, &config.sync)))
}

fn render_config(config: &AppConfig) -> Result<String> {
    toml::to_string_pretty(config).context("failed to render config")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn replays_script_file() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("script.toml");
        fs::write(
            &path,
            r#"
viewer = "me"
start_at_ms = 1771059600000

[[messages]]
id = "m1"
conversation_id = "c1"
sender_id = "alice"
content = "hello"
created_at_ms = 1771059000000

[[steps]]
action = "open"
conversation_id = "c1"

[[steps]]
action = "load_older"
conversation_id = "c1"
"#,
        )
        .expect("script should be written");

        let report = replay(&AppConfig::default(), &path).expect("replay should run");

        assert_eq!(report.failed_steps, 0);
        assert_eq!(report.lines[1], "  2 load_older: 1 messages, has_more=false");
    }

    #[test]
    fn missing_script_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir should be created");

        let error = replay(&AppConfig::default(), &dir.path().join("missing.toml"))
            .expect_err("missing script must fail");

        assert!(error.to_string().contains("failed to read replay script"));
    }

    #[test]
    fn rendered_config_round_trips() {
        let config = AppConfig::default();

        let rendered = render_config(&config).expect("config should render");
        let parsed: AppConfig = toml::from_str(&rendered).expect("rendered config should parse");

        assert_eq!(parsed, config);
        assert!(rendered.contains("page_size = 50"));
    }
}
