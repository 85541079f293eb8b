mod cli;
mod errors;
mod gendex;
mod process;
mod signals;
mod supervisor;
mod watcher;

use cli::Cli;
use cli::Command;
use cli::GenDexCfgArgs;
use cli::RunDexArgs;
use errors::Result;
use process::DexLauncher;
use process::ProcessSupervisor;
use supervisor::SupervisionLoop;

use argocd_dex::generate_dex_config_yaml;
use argocd_settings::SettingsManager;
use clap::Parser;
use log;
use std::io;
use tokio_util::sync::CancellationToken;

/*
 * rundex:
 *
 *  1. make sure dex can be found before touching the cluster
 *  2. read the Argo CD settings and start watching them
 *  3. run the supervision loop until a fatal error or a termination signal
 */
async fn rundex(args: RunDexArgs) -> Result<()> {
    let launcher = DexLauncher::lookup(&args.dex_binary)?;
    log::debug!("using dex at {}", launcher.program().display());

    let (kube_client, namespace) = args.cluster.connect().await?;
    let settings_mgr = SettingsManager::new(kube_client, &namespace);
    settings_mgr.get_settings().await?;

    let token = CancellationToken::new();
    let notifier = settings_mgr.start_notifier(token.clone());

    // handle termination signals as gracefully as we can.
    let shutdown = token.clone();
    tokio::spawn(async move {
	match signals::wait_for_shutdown_signal().await {
	    Ok(()) => shutdown.cancel(),
	    Err(err) => log::warn!("unable to listen for termination signals: {}", err),
	}
    });

    let process = ProcessSupervisor::new(launcher, &args.dex_config_path);
    let supervision = SupervisionLoop::new(settings_mgr, generate_dex_config_yaml, process);
    let result = supervision.run(token.clone()).await;

    token.cancel();
    if let Err(err) = notifier.await {
	log::error!("settings notifier failed: {}", err);
    }
    result
}

async fn gendexcfg(args: GenDexCfgArgs) -> Result<()> {
    let (kube_client, namespace) = args.cluster.connect().await?;
    let settings_mgr = SettingsManager::new(kube_client, &namespace);
    settings_mgr.get_settings().await?;

    gendex::generate(&settings_mgr, &generate_dex_config_yaml, args.out.as_deref(), &mut io::stdout())
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
	Command::Rundex(args) => rundex(args).await,
	Command::Gendexcfg(args) => gendexcfg(args).await,
	Command::Version => {
	    println!("{} v{}", cli::CLI_NAME, env!("CARGO_PKG_VERSION"));
	    Ok(())
	},
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.loglevel.as_str())).init();

    if let Err(err) = run(cli).await {
	println!("{}", err);
	std::process::exit(1);
    }
}
