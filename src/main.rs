use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use dom_bridge::{Bridge, BridgeConfig, DomInterface, HostRealm};
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: dom-bridge [--config <path>] [--json] <constructor[:parent]>...";

#[derive(Debug, Serialize)]
struct Resolution {
    requested: String,
    chain: Vec<String>,
    instantiated: Option<String>,
    fallback: bool,
    error: Option<String>,
}

struct Options {
    config: Option<PathBuf>,
    json: bool,
    names: Vec<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options> {
    let mut options = Options {
        config: None,
        json: false,
        names: Vec::new(),
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                options.config = Some(PathBuf::from(path));
            }
            "--json" => options.json = true,
            "-h" | "--help" => bail!(USAGE),
            other if other.starts_with("--") => bail!("unknown flag {other}\n{USAGE}"),
            _ => options.names.push(arg),
        }
    }
    if options.names.is_empty() {
        bail!(USAGE);
    }
    Ok(options)
}

/// `Name` resolves an existing constructor; `Name:Parent` defines it first.
/// Unknown names without a parent are defined under `HTMLElement`.
fn resolve(realm: &mut HostRealm, bridge: &Bridge, request: &str) -> Resolution {
    let (name, parent) = match request.split_once(':') {
        Some((name, parent)) => (name, Some(parent)),
        None => (request, None),
    };

    let mut resolution = Resolution {
        requested: name.to_string(),
        chain: Vec::new(),
        instantiated: None,
        fallback: false,
        error: None,
    };

    let class = match (realm.class(name), parent) {
        (Some(class), None) => Ok(class),
        (_, parent) => realm.define_class(
            name,
            Some(parent.unwrap_or(DomInterface::HtmlElement.name())),
        ),
    };
    let native = match class.and_then(|class| realm.create(class.name())) {
        Ok(native) => native,
        Err(err) => {
            resolution.error = Some(err.to_string());
            return resolution;
        }
    };

    resolution.chain = native
        .class()
        .chain()
        .map(|class| class.name().to_string())
        .collect();

    let before = bridge.fallback_stats();
    match bridge.wrap_object(&native) {
        Ok(proxy) => {
            resolution.instantiated = Some(proxy.interface_name().to_string());
            resolution.fallback = bridge.fallback_stats() != before;
        }
        Err(err) => resolution.error = Some(err.to_string()),
    }
    resolution
}

fn main() -> Result<()> {
    let subscriber_result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
    if subscriber_result.is_err() {
        // tracing was already initialised; continue silently
    }

    let options = parse_args(std::env::args().skip(1))?;
    let config = match options.config {
        Some(path) => BridgeConfig::load(Some(path)),
        None => BridgeConfig::from_env(),
    }
    .context("failed to load bridge config")?;

    let mut realm = HostRealm::dom();
    let bridge = Bridge::with_config(Rc::new(config.build_registry()), &config);

    let resolutions: Vec<_> = options
        .names
        .iter()
        .map(|request| resolve(&mut realm, &bridge, request))
        .collect();

    if options.json {
        let rendered =
            serde_json::to_string_pretty(&resolutions).context("failed to encode resolutions")?;
        println!("{rendered}");
    } else {
        for resolution in &resolutions {
            match (&resolution.instantiated, &resolution.error) {
                (Some(instantiated), _) => println!(
                    "{} -> {}{}",
                    resolution.requested,
                    instantiated,
                    if resolution.fallback { " (fallback)" } else { "" }
                ),
                (None, Some(error)) => println!("{} -> error: {error}", resolution.requested),
                (None, None) => println!("{} -> unresolved", resolution.requested),
            }
        }
    }

    let failures = resolutions
        .iter()
        .filter(|resolution| resolution.error.is_some())
        .count();
    if failures > 0 {
        warn!(failures, "some constructors could not be resolved");
        bail!("{failures} of {} constructors failed to resolve", resolutions.len());
    }
    Ok(())
}
