//! VS Code binary resolution and download

use std::io::Cursor;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Environment variable naming a VS Code executable to use as-is
pub const EXECUTABLE_ENV: &str = "VSCODE_EXECUTABLE";

const UPDATE_SERVER: &str = "https://update.code.visualstudio.com";

/// Download platforms published by the VS Code update server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    LinuxX64,
    LinuxArm64,
    Darwin,
    DarwinArm64,
    Win32X64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    TarGz,
    Zip,
}

impl Platform {
    pub fn current() -> E2eResult<Self> {
        let arch = std::env::consts::ARCH;
        match (std::env::consts::OS, arch) {
            ("linux", "x86_64") => Ok(Platform::LinuxX64),
            ("linux", "aarch64") => Ok(Platform::LinuxArm64),
            ("macos", "x86_64") => Ok(Platform::Darwin),
            ("macos", "aarch64") => Ok(Platform::DarwinArm64),
            ("windows", "x86_64") => Ok(Platform::Win32X64),
            (os, arch) => Err(E2eError::Download(format!(
                "no VS Code build for {}/{}",
                os, arch
            ))),
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Platform::LinuxX64 => "linux-x64",
            Platform::LinuxArm64 => "linux-arm64",
            Platform::Darwin => "darwin",
            Platform::DarwinArm64 => "darwin-arm64",
            Platform::Win32X64 => "win32-x64-archive",
        }
    }

    fn archive_kind(&self) -> ArchiveKind {
        match self {
            Platform::LinuxX64 | Platform::LinuxArm64 => ArchiveKind::TarGz,
            _ => ArchiveKind::Zip,
        }
    }

    /// Executable paths relative to the extracted archive
    fn executable_candidates(&self) -> &'static [&'static str] {
        match self {
            Platform::LinuxX64 => &["VSCode-linux-x64/code"],
            Platform::LinuxArm64 => &["VSCode-linux-arm64/code"],
            Platform::Darwin | Platform::DarwinArm64 => &[
                "Visual Studio Code.app/Contents/MacOS/Electron",
                "Visual Studio Code.app/Contents/MacOS/Code",
            ],
            Platform::Win32X64 => &["Code.exe"],
        }
    }
}

/// Where to look for, and where to put, VS Code
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub executable: Option<PathBuf>,
    /// `stable` or a pinned release such as `1.95.0`
    pub version: String,
    pub cache_dir: PathBuf,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            executable: None,
            version: "stable".to_string(),
            cache_dir: PathBuf::from(".vscode-test"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateInfo {
    url: String,
    #[serde(default)]
    product_version: Option<String>,
    #[serde(default, rename = "sha256hash")]
    sha256: Option<String>,
}

/// One downloadable VS Code build
#[derive(Debug, Clone, PartialEq)]
pub struct Release {
    /// Concrete version, also the cache key
    pub version: String,
    pub url: String,
    pub sha256: Option<String>,
}

impl Release {
    pub fn pinned(platform: Platform, version: &str) -> Self {
        Self {
            version: version.to_string(),
            url: format!("{}/{}/{}/stable", UPDATE_SERVER, version, platform.id()),
            sha256: None,
        }
    }

    fn from_update(info: UpdateInfo) -> E2eResult<Self> {
        let version = info
            .product_version
            .filter(|v| !v.is_empty())
            .ok_or_else(|| E2eError::Download("update server did not report a productVersion".to_string()))?;
        Ok(Self {
            version,
            url: info.url,
            sha256: info.sha256,
        })
    }
}

fn http_client() -> E2eResult<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(concat!("ppds-e2e/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Ask the update server which build `stable` currently points at
pub async fn latest_stable(platform: Platform) -> E2eResult<Release> {
    let api = format!("{}/api/update/{}/stable/latest", UPDATE_SERVER, platform.id());
    let info: UpdateInfo = http_client()?
        .get(&api)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let release = Release::from_update(info)?;
    info!("Latest stable VS Code for {} is {}", platform.id(), release.version);
    Ok(release)
}

/// Find a usable VS Code executable, downloading one when needed
pub async fn resolve_executable(options: &ResolveOptions) -> E2eResult<PathBuf> {
    resolve_for(Platform::current()?, options).await
}

async fn resolve_for(platform: Platform, options: &ResolveOptions) -> E2eResult<PathBuf> {
    if let Some(executable) = &options.executable {
        return existing(executable, "executable");
    }

    if let Ok(executable) = std::env::var(EXECUTABLE_ENV) {
        if !executable.is_empty() {
            return existing(Path::new(&executable), EXECUTABLE_ENV);
        }
    }

    let release = if options.version == "stable" {
        match latest_stable(platform).await {
            Ok(release) => release,
            Err(e) => match newest_cached(&options.cache_dir, platform) {
                Some(executable) => {
                    warn!(
                        "Cannot check for the latest VS Code ({}); using cached {}",
                        e,
                        executable.display()
                    );
                    return Ok(executable);
                }
                None => return Err(e),
            },
        }
    } else {
        Release::pinned(platform, &options.version)
    };

    let install_dir = install_dir(&options.cache_dir, platform, &release.version);
    if let Some(executable) = find_executable(&install_dir, platform) {
        debug!("Using cached VS Code: {}", executable.display());
        return Ok(executable);
    }

    download(platform, &release, &options.cache_dir).await?;

    find_executable(&install_dir, platform).ok_or_else(|| {
        E2eError::Download(format!(
            "downloaded archive has no executable under {}",
            install_dir.display()
        ))
    })
}

fn existing(path: &Path, source: &str) -> E2eResult<PathBuf> {
    if path.is_file() {
        Ok(path.to_path_buf())
    } else {
        Err(E2eError::Download(format!(
            "{} points to a missing file: {}",
            source,
            path.display()
        )))
    }
}

/// `<cache>/vscode-<platform>-<version>`
pub fn install_dir(cache_dir: &Path, platform: Platform, version: &str) -> PathBuf {
    cache_dir.join(format!("vscode-{}-{}", platform.id(), version))
}

fn parse_version(version: &str) -> Option<Vec<u64>> {
    version.split('.').map(|part| part.parse().ok()).collect()
}

/// Highest-versioned install in the cache that has an executable
fn newest_cached(cache_dir: &Path, platform: Platform) -> Option<PathBuf> {
    let prefix = format!("vscode-{}-", platform.id());
    std::fs::read_dir(cache_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let version = parse_version(name.strip_prefix(&prefix)?)?;
            let executable = find_executable(&entry.path(), platform)?;
            Some((version, executable))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, executable)| executable)
}

fn find_executable(install_dir: &Path, platform: Platform) -> Option<PathBuf> {
    platform
        .executable_candidates()
        .iter()
        .map(|candidate| install_dir.join(candidate))
        .find(|path| path.is_file())
}

/// Download and unpack VS Code into the cache, returning the install dir
pub async fn download(platform: Platform, release: &Release, cache_dir: &Path) -> E2eResult<PathBuf> {
    tokio::fs::create_dir_all(cache_dir).await?;

    let url = &release.url;
    info!("Downloading VS Code {} from {}", release.version, url);
    let mut response = http_client()?.get(url).send().await?.error_for_status()?;

    let archive_path = cache_dir.join(format!("vscode-{}-{}.download", platform.id(), release.version));
    let mut hasher = Sha256::new();
    {
        let mut file = tokio::fs::File::create(&archive_path).await?;
        while let Some(chunk) = response.chunk().await? {
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.sync_all().await?;
    }

    let actual_sha = hex::encode(hasher.finalize());
    match &release.sha256 {
        Some(expected) if !expected.eq_ignore_ascii_case(&actual_sha) => {
            let _ = tokio::fs::remove_file(&archive_path).await;
            return Err(E2eError::Download(format!(
                "checksum mismatch for {}: expected {}, got {}",
                url, expected, actual_sha
            )));
        }
        Some(_) => debug!("Checksum verified: {}", actual_sha),
        None => warn!("No checksum published for {}; skipping verification", url),
    }

    let install_dir = install_dir(cache_dir, platform, &release.version);
    let staging = tempfile::tempdir_in(cache_dir)?;
    let kind = platform.archive_kind();
    let bytes = tokio::fs::read(&archive_path).await?;
    let unpack_into = staging.path().to_path_buf();

    tokio::task::spawn_blocking(move || extract(&bytes, kind, &unpack_into))
        .await
        .map_err(|e| E2eError::Download(format!("extraction task failed: {}", e)))??;

    if install_dir.exists() {
        tokio::fs::remove_dir_all(&install_dir).await?;
    }
    tokio::fs::rename(staging.path(), &install_dir).await?;
    let _ = tokio::fs::remove_file(&archive_path).await;

    info!("VS Code installed at {}", install_dir.display());
    Ok(install_dir)
}

fn extract(bytes: &[u8], kind: ArchiveKind, dest: &Path) -> E2eResult<()> {
    match kind {
        ArchiveKind::TarGz => {
            let decoder = flate2::read::GzDecoder::new(Cursor::new(bytes));
            let mut archive = tar::Archive::new(decoder);
            archive.set_preserve_permissions(true);
            archive.unpack(dest)?;
        }
        ArchiveKind::Zip => {
            let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
            archive.extract(dest)?;
        }
    }
    Ok(())
}
