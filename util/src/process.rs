use crate::errors::Error;
use crate::errors::Result;

use log;
use std::env;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Child;
use tokio::process::Command;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProcessState {

    /* nothing launched, or the last process was reaped */
    NotRunning,

    /* config persisted, the child is being spawned */
    Starting,

    /* the child has been spawned and is tracked */
    Running,

    /* termination was requested, waiting for the child to exit */
    Stopping,
}

/*
 * A Launcher knows how to start the supervised program against a
 * configuration file, and how to take it down again.
 */
#[allow(async_fn_in_trait)]
pub trait Launcher {
    type Child;

    fn launch(&mut self, config_path: &Path) -> Result<Self::Child>;

    /*
     * Ask the child to terminate and block until it has exited.
     */
    async fn terminate(&mut self, child: Self::Child) -> Result<()>;
}

/*
 * DexLauncher runs `dex serve <config>` with our stdout/stderr.
 */
#[derive(Debug, Clone)]
pub struct DexLauncher {
    program: PathBuf,
}

impl DexLauncher {

    pub fn new(program: impl Into<PathBuf>) -> Self {
	Self{
	    program: program.into(),
	}
    }

    /*
     * Resolve program on $PATH before anything gets started, so a missing
     * binary fails right away. The launcher runs the resolved path.
     */
    pub fn lookup(program: impl Into<PathBuf>) -> Result<Self> {
	let unresolved = Self::new(program);
	let resolved = unresolved.resolve().ok_or_else(|| unresolved.not_found())?;

	Ok(Self::new(resolved))
    }

    fn resolve(&self) -> Option<PathBuf> {
	if self.program.components().count() > 1 {
	    return Some(self.program.clone()).filter(|program| is_executable(program));
	}

	let path = env::var_os("PATH").unwrap_or_default();
	env::split_paths(&path)
	    .map(|dir| dir.join(&self.program))
	    .find(|candidate| is_executable(candidate))
    }

    pub fn program(&self) -> &Path {
	&self.program
    }

    fn not_found(&self) -> Error {
	Error::Launch{
	    program: self.program.display().to_string(),
	    source: std::io::Error::new(std::io::ErrorKind::NotFound, "executable file not found in $PATH"),
	}
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    match fs::metadata(path) {
	Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
	Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

impl Launcher for DexLauncher {
    type Child = Child;

    fn launch(&mut self, config_path: &Path) -> Result<Child> {
	let child = Command::new(&self.program)
	    .arg("serve")
	    .arg(config_path)
	    .stdin(Stdio::null())
	    .stdout(Stdio::inherit())
	    .stderr(Stdio::inherit())
	    .kill_on_drop(true)
	    .spawn()
	    .map_err(|err| Error::Launch{ program: self.program.display().to_string(), source: err })?;

	log::info!("started dex (pid {})", child.id().unwrap_or_default());
	Ok(child)
    }

    async fn terminate(&mut self, mut child: Child) -> Result<()> {
	// id() is None once the child has been reaped
	if let Some(pid) = child.id() {
	    log::info!("sending SIGTERM to dex (pid {})", pid);
	    send_sigterm(&mut child, pid)?;
	}

	let status = child.wait().await.map_err(Error::Shutdown)?;
	log::info!("dex exited with {}", status);
	Ok(())
    }
}

#[cfg(unix)]
fn send_sigterm(_child: &mut Child, pid: u32) -> Result<()> {
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
	return Err(Error::Shutdown(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child, _pid: u32) -> Result<()> {
    child.start_kill().map_err(Error::Shutdown)
}

/*
 * ProcessSupervisor owns at most one instance of the supervised program and
 * the configuration file it was launched with.
 */
pub struct ProcessSupervisor<L: Launcher> {
    launcher: L,
    config_path: PathBuf,

    child: Option<L::Child>,
    state: ProcessState,
}

impl<L: Launcher> ProcessSupervisor<L> {

    pub fn new(launcher: L, config_path: impl Into<PathBuf>) -> Self {
	Self{
	    launcher: launcher,
	    config_path: config_path.into(),

	    child: None,
	    state: ProcessState::NotRunning,
	}
    }

    /*
     * Persist the configuration and launch a new instance against it.
     * Refuses to run a second instance.
     */
    pub fn start(&mut self, config: &[u8]) -> Result<()> {
	if self.child.is_some() {
	    return Err(Error::AlreadyRunning);
	}

	self.state = ProcessState::Starting;
	let launched = write_config(&self.config_path, config)
	    .and_then(|_| self.launcher.launch(&self.config_path));

	match launched {
	    Ok(child) => {
		self.child = Some(child);
		self.state = ProcessState::Running;
		Ok(())
	    },
	    Err(err) => {
		self.state = ProcessState::NotRunning;
		Err(err)
	    },
	}
    }

    /*
     * Terminate the running instance, if any, and wait for it to exit.
     */
    pub async fn stop_and_wait(&mut self) -> Result<()> {
	let child = match self.child.take() {
	    Some(child) => child,
	    None => return Ok(()),
	};

	self.state = ProcessState::Stopping;
	self.launcher.terminate(child).await?;
	self.state = ProcessState::NotRunning;
	Ok(())
    }

    pub fn is_running(&self) -> bool {
	self.child.is_some()
    }

    pub fn state(&self) -> ProcessState {
	self.state
    }

    pub fn config_path(&self) -> &Path {
	&self.config_path
    }
}

/*
 * Overwrite path with exactly config, readable and writable by the owner only.
 * A file left behind with a looser mode is tightened, a symlink is refused.
 */
pub fn write_config(path: &Path, config: &[u8]) -> Result<()> {
    let mut opts = fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    opts.mode(0o600).custom_flags(libc::O_NOFOLLOW);

    opts.open(path)
	.and_then(|mut file| {
	    #[cfg(unix)]
	    file.set_permissions(fs::Permissions::from_mode(0o600))?;
	    file.write_all(config)
	})
	.map_err(|err| Error::WriteConfig{ path: path.to_path_buf(), source: err })
}
