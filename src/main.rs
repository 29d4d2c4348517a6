use anyhow::{Context, Result};

use stream_loadbench::bench::report::{
    render_summary, summary_title, summary_to_json, write_samples_csv,
};
use stream_loadbench::bench::{BenchmarkRunner, Comparison, MockGenerateServer};
use stream_loadbench::config::{CliArgs, Command, LoadArgs};
use stream_loadbench::prompts::PromptSet;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CliArgs::load();

    // Initialize logging with the configured level
    let log_level = cli.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    match cli.command {
        Command::Run(args) => {
            let prompts = PromptSet::load(&args.prompts).with_context(|| {
                format!("failed to load prompts from {}", args.prompts.display())
            })?;
            run_benchmark(&args.host, &args.load, &prompts).await?;
        }

        Command::Standalone(args) => {
            let prompts = match &args.prompts {
                Some(path) => PromptSet::load(path)
                    .with_context(|| format!("failed to load prompts from {}", path.display()))?,
                None => PromptSet::builtin(),
            };

            let mut mock_server = MockGenerateServer::new(args.mock_config()?);
            let port = mock_server.start().await?;
            tracing::info!("Mock generation server started on port {}", port);

            let result = run_benchmark(&mock_server.url(), &args.load, &prompts).await;
            mock_server.stop();
            result?;
        }

        Command::Compare(args) => {
            let comparison =
                Comparison::load(args.files.as_slice()).context("failed to load sample files")?;
            println!("{}", comparison.render());
        }
    }

    Ok(())
}

async fn run_benchmark(host: &str, load: &LoadArgs, prompts: &PromptSet) -> Result<()> {
    let config = load.benchmark_config(host);
    let runner = BenchmarkRunner::new(config).context("invalid benchmark configuration")?;

    if load.warmup > 0 {
        if let Err(e) = runner.warmup(prompts, load.warmup).await {
            tracing::error!("Warmup failed: {}", e);
            tracing::error!("Make sure the generation server is running and accessible.");
            return Err(e.into());
        }
    }

    let outcome = runner.run(prompts).await?;

    write_samples_csv(&load.out, &outcome.samples)
        .with_context(|| format!("failed to write samples to {}", load.out.display()))?;

    let summary = outcome.summary();
    if load.json {
        println!("{}", summary_to_json(&summary)?);
    } else {
        let title = summary_title(&load.model, load.duration, load.concurrency);
        print!("{}", render_summary(&title, &summary));
    }

    Ok(())
}
