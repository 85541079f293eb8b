use crate::errors::Result;
use crate::process::write_config;
use crate::watcher::Renderer;

use argocd_settings::SettingsSource;
use log;
use std::io::Write;
use std::path::Path;

/*
 * One-shot rendering: print the configuration to stdout, or write it to out
 * when given. Nothing is written at all when dex is not configured.
 */
pub fn generate<S, R, W>(source: &S, renderer: &R, out: Option<&Path>, stdout: &mut W) -> Result<()>
where
    S: SettingsSource,
    R: Renderer<S::Snapshot>,
    W: Write,
{
    let snapshot = source.snapshot()?;
    let rendered = renderer.render(&snapshot)?;

    if rendered.is_disabled() {
	log::info!("dex is not configured");
	return Ok(());
    }

    match out {
	Some(path) => write_config(path, rendered.as_bytes())?,
	None => {
	    stdout.write_all(rendered.as_bytes())?;
	    stdout.flush()?;
	},
    }
    Ok(())
}
