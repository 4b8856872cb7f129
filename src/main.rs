mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

use mediasqueeze::{LocalEvent, LocalTransport};
use ms_av::{FfmpegEncoder, ToolRegistry};
use ms_core::config::Config;
use ms_core::{OwnerSession, Profile};
use ms_pipeline::Pipeline;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mediasqueeze=trace,ms_pipeline=trace,ms_av=debug,ms_core=debug".to_string()
        } else {
            "mediasqueeze=info,ms_pipeline=info,ms_av=warn,ms_core=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Compress {
            files,
            profile,
            out,
            owner,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(compress(files, &profile, out, owner, cli.config.as_deref()))
        }
        Commands::Profiles { json } => list_profiles(json),
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("mediasqueeze {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn compress(
    files: Vec<PathBuf>,
    profile_id: &str,
    out: PathBuf,
    owner: String,
    config_path: Option<&Path>,
) -> Result<()> {
    let profile: Profile = profile_id.parse()?;
    let config = Config::load_or_default(config_path);
    for warning in config.validate() {
        tracing::warn!("Config: {warning}");
    }

    let tools = ToolRegistry::discover(&config.encoder);
    let encoder = FfmpegEncoder::from_registry(&tools)?;
    let (transport, mut events) = LocalTransport::new(&out);
    let pipeline = Pipeline::new(config, Arc::new(encoder), Arc::new(transport));
    let owner = OwnerSession::from(owner);

    let mut failed = 0usize;
    for file in &files {
        if !file.exists() {
            eprintln!("✗ {}: file does not exist", file.display());
            failed += 1;
            continue;
        }

        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());
        let reference = LocalTransport::reference(file).await?;
        let job_id = match pipeline.submit(owner.clone(), reference, &name, None) {
            Ok(id) => id,
            Err(e) => {
                eprintln!("✗ {}: {e}", file.display());
                failed += 1;
                continue;
            }
        };

        while let Some(event) = events.recv().await {
            if event.job_id() != &job_id {
                continue;
            }
            match event {
                LocalEvent::ProfileRequested {
                    owner, offered, ..
                } => {
                    if let Err(e) = pipeline.choose_profile(&owner, &job_id, profile.id()) {
                        let offered: Vec<&str> = offered.iter().map(|p| p.id()).collect();
                        eprintln!(
                            "✗ {}: {e} (offered: {})",
                            file.display(),
                            offered.join(", ")
                        );
                        // The job reports back as cancelled and is counted then.
                        pipeline.cancel(&owner, &job_id)?;
                    }
                }
                LocalEvent::Delivered { path, report, .. } => {
                    println!("✓ {} -> {}", file.display(), path.display());
                    for line in report.summary().lines() {
                        println!("  {line}");
                    }
                    break;
                }
                LocalEvent::Failed { kind, message, .. } => {
                    eprintln!("✗ {}: [{kind}] {message}", file.display());
                    failed += 1;
                    break;
                }
            }
        }

        // The owner's slot frees up only once the job has cleaned up.
        while pipeline.job_state(&job_id).is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pipeline.shutdown().await;

    if failed > 0 {
        anyhow::bail!("{failed} of {} submissions failed", files.len());
    }
    Ok(())
}

fn list_profiles(json: bool) -> Result<()> {
    if json {
        let profiles: Vec<_> = Profile::ALL
            .iter()
            .map(|p| {
                serde_json::json!({
                    "id": p.id(),
                    "label": p.label(),
                    "extension": p.extension(),
                    "params": p.params(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&profiles)?);
        return Ok(());
    }

    for p in Profile::ALL {
        println!("{:<12} {}", p.id(), p.label());
    }
    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = Config::load_or_default(config_path);
    let tools = ToolRegistry::discover(&config.encoder).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install ffmpeg to compress files.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)?;
            let config = Config::from_json(&contents)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Scratch root: {}", config.storage.root.display());
    println!("  Max input: {} bytes", config.storage.max_input_bytes);
    println!("  Max extracted: {} bytes", config.storage.max_extracted_bytes);
    println!(
        "  Selection window: {}s ({:?} on conflict)",
        config.session.selection_timeout_secs, config.session.conflict_policy
    );
    println!(
        "  Encoder: {} workers, {}s timeout",
        config.encoder.workers, config.encoder.timeout_secs
    );
    println!("  Mixed archives: {:?}", config.archive.mixed_policy);

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for w in &warnings {
            println!("  - {w}");
        }
    }

    Ok(())
}
