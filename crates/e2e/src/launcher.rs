//! VS Code process management
//!
//! Launching boots a real VS Code (Electron) with the extension under test
//! side-loaded, an isolated user data directory, and a DevTools port the
//! harness drives the workbench through.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ppds_common::{find_free_port, wait_for_endpoint, CdpClient, TargetInfo};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::activation::ActivationProbe;
use crate::download::{resolve_executable, ResolveOptions};
use crate::error::{E2eError, E2eResult};
use crate::manifest::ExtensionManifest;
use crate::wait::Poller;
use crate::window::{query_as, CdpWindow, DomQuery, Scope, Window, WORKBENCH_SELECTOR};

const LOCK_FILE: &str = ".ppds-e2e.lock";
/// A lock without a readable pid this young is still being written
const LOCK_CLAIM_GRACE: Duration = Duration::from_secs(5);

/// How to launch VS Code
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Directory holding the extension's `package.json`
    pub extension_path: PathBuf,
    /// Reused between runs when set; a fresh temp dir otherwise
    pub user_data_dir: Option<PathBuf>,
    pub headless: bool,
    /// Startup deadline, from spawn to a rendered workbench
    pub timeout: Duration,
    pub executable: Option<PathBuf>,
    pub version: String,
    pub cache_dir: PathBuf,
    /// Folder or `.code-workspace` to open
    pub workspace: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            extension_path: PathBuf::from("."),
            user_data_dir: None,
            headless: false,
            timeout: Duration::from_secs(30),
            executable: None,
            version: "stable".to_string(),
            cache_dir: PathBuf::from(".vscode-test"),
            workspace: None,
            extra_args: Vec::new(),
        }
    }
}

/// Exclusive claim on a user data directory
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
}

impl DirLock {
    pub fn acquire(dir: &Path) -> E2eResult<Self> {
        let path = dir.join(LOCK_FILE);

        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id())?;
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let holder = std::fs::read_to_string(&path)
                        .ok()
                        .and_then(|s| s.trim().parse::<i32>().ok());
                    match holder {
                        Some(pid) if process_alive(pid) => {
                            return Err(E2eError::Launch(format!(
                                "user data dir {} is in use by pid {}",
                                dir.display(),
                                pid
                            )));
                        }
                        Some(_) => {}
                        None => match lock_age(&path) {
                            // Released between the two calls
                            None => continue,
                            Some(age) if age < LOCK_CLAIM_GRACE => {
                                return Err(E2eError::Launch(format!(
                                    "user data dir {} is being claimed by another process",
                                    dir.display()
                                )));
                            }
                            Some(_) => {}
                        },
                    }
                    warn!("Reclaiming stale lock {}", path.display());
                    match std::fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => {
                    return Err(E2eError::Launch(format!(
                        "user data dir {} is not writable: {}",
                        dir.display(),
                        e
                    )));
                }
            }
        }

        Err(E2eError::Launch(format!("could not lock {}", dir.display())))
    }
}

fn lock_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    // A timestamp in the future counts as fresh
    Some(modified.elapsed().unwrap_or(Duration::ZERO))
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    true
}

/// The user data directory of one instance
#[derive(Debug)]
pub enum UserDataDir {
    Temp(TempDir),
    Provided { path: PathBuf, _lock: DirLock },
}

impl UserDataDir {
    pub fn prepare(requested: Option<&Path>) -> E2eResult<Self> {
        match requested {
            None => {
                let dir = tempfile::Builder::new()
                    .prefix("ppds-e2e-")
                    .tempdir()
                    .map_err(|e| E2eError::Launch(format!("cannot create user data dir: {}", e)))?;
                Ok(UserDataDir::Temp(dir))
            }
            Some(path) => {
                std::fs::create_dir_all(path).map_err(|e| {
                    E2eError::Launch(format!("cannot create user data dir {}: {}", path.display(), e))
                })?;
                let lock = DirLock::acquire(path)?;
                Ok(UserDataDir::Provided {
                    path: path.to_path_buf(),
                    _lock: lock,
                })
            }
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            UserDataDir::Temp(dir) => dir.path(),
            UserDataDir::Provided { path, .. } => path,
        }
    }
}

/// Program and arguments for one launch
#[derive(Debug, Clone, PartialEq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn build(
        executable: &Path,
        extension_path: &Path,
        user_data_dir: &Path,
        port: u16,
        options: &LaunchOptions,
        virtual_display: bool,
    ) -> Self {
        let mut args = vec![
            format!("--extensionDevelopmentPath={}", extension_path.display()),
            format!("--user-data-dir={}", user_data_dir.display()),
            format!("--extensions-dir={}", user_data_dir.join("extensions").display()),
            format!("--remote-debugging-port={}", port),
            "--disable-workspace-trust".to_string(),
            "--skip-welcome".to_string(),
            "--skip-release-notes".to_string(),
            "--disable-extensions".to_string(),
            "--new-window".to_string(),
        ];
        if options.headless {
            args.push("--disable-gpu".to_string());
        }
        args.extend(options.extra_args.iter().cloned());
        if let Some(workspace) = &options.workspace {
            args.push(workspace.display().to_string());
        }

        if virtual_display {
            let mut wrapped = vec!["-a".to_string(), executable.display().to_string()];
            wrapped.extend(args);
            Self {
                program: PathBuf::from("xvfb-run"),
                args: wrapped,
            }
        } else {
            Self {
                program: executable.to_path_buf(),
                args,
            }
        }
    }
}

fn needs_virtual_display(headless: bool) -> bool {
    headless
        && cfg!(target_os = "linux")
        && std::env::var_os("DISPLAY").is_none()
        && std::env::var_os("WAYLAND_DISPLAY").is_none()
}

/// A running VS Code with the extension loaded
#[async_trait]
pub trait Instance: Send + Sync {
    fn window(&self) -> &dyn Window;

    /// `publisher.name` from the extension manifest
    fn extension_id(&self) -> &str;

    async fn wait_for_extension_activation(&self, extension_id: &str, timeout: Duration) -> E2eResult<()>;

    async fn close(&mut self) -> E2eResult<()>;
}

/// Something that can start an [`Instance`]
#[async_trait]
pub trait Launch: Send + Sync {
    async fn launch(&self) -> E2eResult<Box<dyn Instance>>;
}

/// Launches real VS Code processes
#[derive(Debug, Clone)]
pub struct VsCodeLauncher {
    options: LaunchOptions,
}

impl VsCodeLauncher {
    pub fn new(options: LaunchOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &LaunchOptions {
        &self.options
    }
}

#[async_trait]
impl Launch for VsCodeLauncher {
    async fn launch(&self) -> E2eResult<Box<dyn Instance>> {
        let instance = VsCodeInstance::launch(self.options.clone()).await?;
        Ok(Box::new(instance))
    }
}

/// Handle to a running VS Code process
pub struct VsCodeInstance {
    child: Child,
    /// Recorded at spawn; `Child::id` is gone once the leader is reaped
    group: ProcessGroup,
    client: Arc<CdpClient>,
    window: CdpWindow,
    user_data: Option<UserDataDir>,
    manifest: ExtensionManifest,
    extension_id: String,
    user_data_path: PathBuf,
    closed: bool,
}

impl VsCodeInstance {
    /// Launch VS Code and wait until its workbench has rendered
    pub async fn launch(options: LaunchOptions) -> E2eResult<Self> {
        let manifest = ExtensionManifest::load(&options.extension_path)?;
        let extension_path = options.extension_path.canonicalize().map_err(|e| {
            E2eError::Launch(format!(
                "cannot resolve extension path {}: {}",
                options.extension_path.display(),
                e
            ))
        })?;

        let user_data = UserDataDir::prepare(options.user_data_dir.as_deref())?;

        let executable = resolve_executable(&ResolveOptions {
            executable: options.executable.clone(),
            version: options.version.clone(),
            cache_dir: options.cache_dir.clone(),
        })
        .await
        .map_err(|e| E2eError::Launch(format!("cannot resolve VS Code executable: {}", e)))?;

        let port = find_free_port()?;
        let command = CommandLine::build(
            &executable,
            &extension_path,
            user_data.path(),
            port,
            &options,
            needs_virtual_display(options.headless),
        );

        info!(
            "Launching VS Code {} for extension {} (DevTools port {})",
            executable.display(),
            manifest.id(),
            port
        );
        let (mut child, group) = spawn(&command)?;

        let startup = attach_workbench(port, options.timeout);
        let attached = tokio::select! {
            status = child.wait() => Err(E2eError::Launch(match status {
                Ok(status) => format!("VS Code exited during startup ({})", status),
                Err(e) => format!("VS Code exited during startup: {}", e),
            })),
            result = startup => result,
        };

        match attached {
            Ok((client, window)) => {
                info!("VS Code workbench ready");
                Ok(Self {
                    child,
                    group,
                    client,
                    window,
                    user_data_path: user_data.path().to_path_buf(),
                    user_data: Some(user_data),
                    extension_id: manifest.id(),
                    manifest,
                    closed: false,
                })
            }
            Err(e) => {
                terminate(&mut child, group).await;
                Err(match e {
                    E2eError::Launch(_) => e,
                    other => E2eError::Launch(other.to_string()),
                })
            }
        }
    }

    pub fn user_data_dir(&self) -> &Path {
        &self.user_data_path
    }

    pub fn manifest(&self) -> &ExtensionManifest {
        &self.manifest
    }

    pub fn pid(&self) -> Option<u32> {
        self.group.0
    }
}

#[async_trait]
impl Instance for VsCodeInstance {
    fn window(&self) -> &dyn Window {
        &self.window
    }

    fn extension_id(&self) -> &str {
        &self.extension_id
    }

    async fn wait_for_extension_activation(&self, extension_id: &str, timeout: Duration) -> E2eResult<()> {
        ActivationProbe::new(&self.user_data_path, extension_id)?
            .wait(timeout)
            .await
    }

    /// Close the browser, then make sure no process of the group survives
    async fn close(&mut self) -> E2eResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        info!("Closing VS Code (pid: {:?})", self.group.0);

        match timeout(Duration::from_secs(2), self.client.close_browser()).await {
            Ok(Ok(())) => {}
            // The socket usually drops before the reply arrives
            Ok(Err(e)) => debug!("Browser.close: {}", e),
            Err(_) => debug!("Browser.close did not answer"),
        }
        self.client.close().await;

        if timeout(Duration::from_secs(5), self.child.wait()).await.is_err() {
            warn!("VS Code did not exit after Browser.close; terminating");
        }
        terminate(&mut self.child, self.group).await;

        self.user_data.take();
        Ok(())
    }
}

impl Drop for VsCodeInstance {
    fn drop(&mut self) {
        if !self.closed {
            kill_group(self.group, true);
            let _ = self.child.start_kill();
        }
    }
}

/// Process group led by the spawned VS Code (or `xvfb-run`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProcessGroup(Option<u32>);

fn spawn(command: &CommandLine) -> E2eResult<(Child, ProcessGroup)> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .env_remove("ELECTRON_RUN_AS_NODE")
        .env_remove("VSCODE_IPC_HOOK_CLI")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| {
        E2eError::Launch(format!("failed to spawn {}: {}", command.program.display(), e))
    })?;
    let group = ProcessGroup(child.id());

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "vscode", "{}", line);
            }
        });
    }

    Ok((child, group))
}

async fn attach_workbench(port: u16, startup_timeout: Duration) -> E2eResult<(Arc<CdpClient>, CdpWindow)> {
    let deadline = Instant::now() + startup_timeout;
    let remaining = || deadline.saturating_duration_since(Instant::now());

    let version = wait_for_endpoint(port, startup_timeout)
        .await
        .map_err(|e| E2eError::Launch(format!("DevTools endpoint did not come up: {}", e)))?;
    debug!("DevTools: {} ({})", version.browser, version.web_socket_debugger_url);

    let client = Arc::new(CdpClient::connect(&version.web_socket_debugger_url).await?);
    client.set_discover_targets(true).await?;

    let client_ref = &client;
    let page = Poller::new(remaining())
        .poll(move || find_workbench(client_ref))
        .await?
        .ready_or(|elapsed| E2eError::Timeout {
            waiting_for: "the workbench window".to_string(),
            elapsed,
        })?;

    let window = CdpWindow::attach(Arc::clone(&client), &page.target_id).await?;
    window.bring_to_front().await?;

    let window_ref = &window;
    Poller::new(remaining())
        .poll(move || workbench_rendered(window_ref))
        .await?
        .ready_or(|elapsed| E2eError::Timeout {
            waiting_for: format!("'{}' to render", WORKBENCH_SELECTOR),
            elapsed,
        })?;

    Ok((client, window))
}

async fn find_workbench(client: &CdpClient) -> E2eResult<Option<TargetInfo>> {
    Ok(client
        .get_targets()
        .await?
        .into_iter()
        .find(|t| t.is_page() && t.url.contains("workbench")))
}

async fn workbench_rendered(window: &CdpWindow) -> E2eResult<Option<()>> {
    let count: u64 = query_as(window, Scope::Window, &DomQuery::Count(WORKBENCH_SELECTOR.to_string())).await?;
    Ok((count > 0).then_some(()))
}

/// Signal the whole process group so renderers and helpers go too
#[cfg(unix)]
fn kill_group(group: ProcessGroup, force: bool) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pgid) = group.0 {
        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        if let Err(e) = killpg(Pid::from_raw(pgid as i32), signal) {
            // ESRCH: every member already exited
            debug!("killpg({}, {:?}): {}", pgid, signal, e);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_group: ProcessGroup, _force: bool) {}

/// SIGTERM the group, give the leader 5s, then SIGKILL whatever is left.
/// Runs even when the leader has already been reaped.
async fn terminate(child: &mut Child, group: ProcessGroup) {
    kill_group(group, false);
    if timeout(Duration::from_secs(5), child.wait()).await.is_err() {
        warn!("VS Code ignored SIGTERM; killing");
    }
    kill_group(group, true);
    let _ = child.kill().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> LaunchOptions {
        LaunchOptions {
            extension_path: PathBuf::from("/work/extension"),
            ..Default::default()
        }
    }

    #[test]
    fn test_command_line_isolates_profile() {
        let cmd = CommandLine::build(
            Path::new("/opt/code/code"),
            Path::new("/work/extension"),
            Path::new("/tmp/udd"),
            9333,
            &options(),
            false,
        );

        assert_eq!(cmd.program, PathBuf::from("/opt/code/code"));
        assert!(cmd.args.contains(&"--extensionDevelopmentPath=/work/extension".to_string()));
        assert!(cmd.args.contains(&"--user-data-dir=/tmp/udd".to_string()));
        assert!(cmd.args.contains(&"--extensions-dir=/tmp/udd/extensions".to_string()));
        assert!(cmd.args.contains(&"--remote-debugging-port=9333".to_string()));
        assert!(cmd.args.contains(&"--disable-workspace-trust".to_string()));
        assert!(!cmd.args.contains(&"--disable-gpu".to_string()));
    }

    #[test]
    fn test_headless_wraps_with_xvfb() {
        let mut opts = options();
        opts.headless = true;
        opts.workspace = Some(PathBuf::from("/work/sample"));

        let cmd = CommandLine::build(
            Path::new("/opt/code/code"),
            Path::new("/work/extension"),
            Path::new("/tmp/udd"),
            9333,
            &opts,
            true,
        );

        assert_eq!(cmd.program, PathBuf::from("xvfb-run"));
        assert_eq!(cmd.args[0], "-a");
        assert_eq!(cmd.args[1], "/opt/code/code");
        assert!(cmd.args.contains(&"--disable-gpu".to_string()));
        assert_eq!(cmd.args.last().map(String::as_str), Some("/work/sample"));
    }

    #[test]
    fn test_provided_user_data_dir_is_exclusive() {
        let root = tempfile::tempdir().unwrap();
        let udd = root.path().join("profile");

        let first = UserDataDir::prepare(Some(&udd)).unwrap();
        assert!(udd.join(LOCK_FILE).exists());

        let err = UserDataDir::prepare(Some(&udd)).unwrap_err();
        assert!(matches!(err, E2eError::Launch(_)));

        drop(first);
        assert!(!udd.join(LOCK_FILE).exists());
        UserDataDir::prepare(Some(&udd)).unwrap();
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let root = tempfile::tempdir().unwrap();
        // pid far above any default pid_max
        std::fs::write(root.path().join(LOCK_FILE), "99999999\n").unwrap();

        let lock = DirLock::acquire(root.path()).unwrap();
        let holder = std::fs::read_to_string(root.path().join(LOCK_FILE)).unwrap();
        assert_eq!(holder.trim(), std::process::id().to_string());
        drop(lock);
    }

    #[test]
    fn test_lock_being_written_is_held() {
        let root = tempfile::tempdir().unwrap();
        let lock_path = root.path().join(LOCK_FILE);
        std::fs::write(&lock_path, "").unwrap();

        let err = DirLock::acquire(root.path()).unwrap_err();
        assert!(err.to_string().contains("being claimed"));
        assert!(lock_path.exists());
    }

    #[test]
    fn test_abandoned_empty_lock_is_reclaimed() {
        let root = tempfile::tempdir().unwrap();
        let lock_path = root.path().join(LOCK_FILE);
        std::fs::write(&lock_path, "").unwrap();
        let long_ago = std::time::SystemTime::now() - Duration::from_secs(60);
        std::fs::File::options()
            .write(true)
            .open(&lock_path)
            .unwrap()
            .set_modified(long_ago)
            .unwrap();

        let lock = DirLock::acquire(root.path()).unwrap();
        let holder = std::fs::read_to_string(&lock_path).unwrap();
        assert_eq!(holder.trim(), std::process::id().to_string());
        drop(lock);
    }

    #[test]
    fn test_temp_user_data_dir_is_removed() {
        let udd = UserDataDir::prepare(None).unwrap();
        let path = udd.path().to_path_buf();
        assert!(path.is_dir());
        drop(udd);
        assert!(!path.exists());
    }
}
