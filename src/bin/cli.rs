use std::env;
use std::sync::Arc;

use anyhow::{bail, Context};
use peercam::media::ProfileLadder;
use peercam::rendezvous::Rendezvous;
use peercam::testing::{LinkScript, LoopbackNetwork, SyntheticDevices};
use peercam::{LinkPhase, PeerCamConfig, PeerLink, TraversalConfig};

const USAGE: &str = "Usage: peercam-cli [--config <path>] <command> [args]

Commands:
  profiles [--json]                  List capture quality tiers
  traversal <attempts> [--json]      Show the candidate set per attempt
  link <id>                          Print the viewer link for an id
  simulate [--profile <name>] [--fail <n>] [--remote <id>] [--backoff <ms>]
                                     Run a streamer against a loopback viewer";

fn main() -> anyhow::Result<()> {
    peercam::init_logging();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let config = take_config(&mut args)?;

    if args.is_empty() {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    let command = args.remove(0);
    match command.as_str() {
        "profiles" => cmd_profiles(&config, &args),
        "traversal" => cmd_traversal(&config, &args),
        "link" => cmd_link(&config, &args),
        "simulate" => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(cmd_simulate(config, &args))
        }
        "version" => {
            let info = peercam::get_info();
            println!("{} {}", info.name, info.version);
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}\n\n{}", command, USAGE);
            std::process::exit(1);
        }
    }
}

/// Strip `--config <path>` from the arguments and load it
fn take_config(args: &mut Vec<String>) -> anyhow::Result<PeerCamConfig> {
    let Some(pos) = args.iter().position(|a| a == "--config") else {
        return Ok(PeerCamConfig::load_or_default());
    };
    if pos + 1 >= args.len() {
        bail!("--config needs a path");
    }
    let path = args.remove(pos + 1);
    args.remove(pos);

    let config = PeerCamConfig::load_from_file(&path)
        .with_context(|| format!("loading config from {}", path))?;
    config.validate()?;
    Ok(config)
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> anyhow::Result<Option<&'a str>> {
    match args.iter().position(|a| a == flag) {
        Some(pos) => match args.get(pos + 1) {
            Some(value) => Ok(Some(value.as_str())),
            None => bail!("{} needs a value", flag),
        },
        None => Ok(None),
    }
}

fn cmd_profiles(config: &PeerCamConfig, args: &[String]) -> anyhow::Result<()> {
    let ladder = ProfileLadder::new(config.media.profiles.clone())?;
    if args.contains(&"--json".to_string()) {
        let profiles: Vec<_> = ladder.iter().collect();
        println!("{}", serde_json::to_string(&profiles)?);
    } else {
        for profile in ladder.iter() {
            let marker = if profile.name == config.media.default_profile {
                " (default)"
            } else {
                ""
            };
            println!(
                "{}: {}x{}@{} audio {}Hz/{}ch{}",
                profile.name,
                profile.video_width,
                profile.video_height,
                profile.frame_rate,
                profile.sample_rate,
                profile.channel_count,
                marker
            );
        }
    }
    Ok(())
}

fn cmd_traversal(config: &PeerCamConfig, args: &[String]) -> anyhow::Result<()> {
    let attempts: u32 = match args.first().filter(|a| !a.starts_with("--")) {
        Some(n) => n.parse().context("attempts must be a number")?,
        None => config.resilience.max_attempts + 1,
    };
    let traversal = TraversalConfig::from_config(&config.traversal)?;

    let sets: Vec<_> = (0..attempts).map(|attempt| traversal.build(attempt)).collect();
    if args.contains(&"--json".to_string()) {
        let out: Vec<_> = sets
            .iter()
            .map(|set| {
                serde_json::json!({
                    "attempt": set.attempt(),
                    "policy": set.policy(),
                    "servers": set.urls(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string(&out)?);
    } else {
        for set in &sets {
            println!("attempt {}: {}", set.attempt(), set.policy());
            for url in set.urls() {
                println!("  {}", url);
            }
        }
    }
    Ok(())
}

fn cmd_link(config: &PeerCamConfig, args: &[String]) -> anyhow::Result<()> {
    let Some(id) = args.first() else {
        eprintln!("Usage: peercam-cli link <id>");
        std::process::exit(1);
    };
    let rendezvous = Rendezvous::from_config(&config.rendezvous)?;
    println!("{}", rendezvous.viewer_link(id)?);
    Ok(())
}

async fn cmd_simulate(mut config: PeerCamConfig, args: &[String]) -> anyhow::Result<()> {
    let profile = flag_value(args, "--profile")?;
    let remote = flag_value(args, "--remote")?.unwrap_or("abc123");
    let failures: usize = match flag_value(args, "--fail")? {
        Some(n) => n.parse().context("--fail must be a number")?,
        None => 0,
    };
    if let Some(ms) = flag_value(args, "--backoff")? {
        config.resilience.backoff_ms = ms.parse().context("--backoff must be milliseconds")?;
    }

    let network = LoopbackNetwork::new();
    network.add_auto_answer_peer(remote);
    for _ in 0..failures {
        network.script(LinkScript::FailConnectivity);
    }

    let mut link = PeerLink::streamer(
        &config,
        Arc::new(SyntheticDevices::new()),
        Arc::new(network),
        remote,
    )?;

    let mut status = link.subscribe();
    let watcher = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let s = status.borrow_and_update().clone();
            println!("[{:?}] attempt {} {}", s.phase, s.attempt, s.message);
            if s.phase == LinkPhase::Connected || s.phase.is_terminal() {
                break;
            }
        }
    });

    link.start(profile, None).await?;
    while !link.status().phase.is_terminal() && link.status().phase != LinkPhase::Connected {
        if link.step().await.is_none() {
            break;
        }
    }
    let _ = watcher.await;

    let status = link.status();
    if let Some(plan) = &status.plan {
        println!(
            "encoding: {} bps, {} fps, codecs {:?}",
            plan.max_bitrate_bps, plan.max_framerate, plan.codec_priority
        );
    }
    println!("history: {:?}", status.history);
    link.teardown();

    match status.phase {
        LinkPhase::Connected => Ok(()),
        _ => bail!(status.error.unwrap_or_else(|| status.message.clone())),
    }
}
