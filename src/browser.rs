//! Browser Launcher
//!
//! Handles Chrome discovery, launching with the flags that keep background
//! tabs running, and opening course pages.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Global counter for unique temporary profiles
static BROWSER_COUNTER: AtomicU64 = AtomicU64::new(0);

use crate::cdp::transport::launch_chrome;
use crate::cdp::{Connection, Transport};
use crate::error::{Error, Result};
use crate::page::CoursePage;
use crate::AgentConfig;

/// Find a Chrome/Chromium binary in the usual install locations
pub fn find_chrome() -> Result<PathBuf> {
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
        ]
    } else if cfg!(target_os = "linux") {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    } else {
        &[]
    };

    candidates
        .iter()
        .map(Path::new)
        .find(|path| path.exists())
        .map(Path::to_path_buf)
        .ok_or(Error::ChromeNotFound)
}

/// Chrome arguments for a course session
fn launch_args(config: &AgentConfig, profile_dir: &Path) -> Vec<String> {
    let mut args = vec![
        // Keep timers, rendering and media running in background tabs
        "--disable-background-timer-throttling".into(),
        "--disable-renderer-backgrounding".into(),
        "--disable-backgrounding-occluded-windows".into(),
        "--disable-features=CalculateNativeWinOcclusion,IntensiveWakeUpThrottling".into(),
        // Media should start without a gesture
        "--autoplay-policy=no-user-gesture-required".into(),
        "--no-first-run".into(),
        "--no-default-browser-check".into(),
        "--disable-default-apps".into(),
        "--disable-dev-shm-usage".into(),
        "--disable-hang-monitor".into(),
        "--disable-prompt-on-repost".into(),
        "--disable-sync".into(),
        "--disable-translate".into(),
        "--password-store=basic".into(),
        "--use-mock-keychain".into(),
        format!(
            "--window-size={},{}",
            config.viewport_width, config.viewport_height
        ),
        format!("--user-data-dir={}", profile_dir.display()),
    ];

    if config.headless {
        args.push("--headless=new".into());
    }

    args
}

/// A Chrome instance hosting course pages
pub struct Browser {
    connection: Connection,
    config: Arc<AgentConfig>,
    profile_dir: PathBuf,
    /// Temporary profile, removed on close
    owns_profile: bool,
}

impl Browser {
    /// Launch with default config
    pub async fn launch() -> Result<Self> {
        Self::launch_with_config(AgentConfig::default()).await
    }

    /// Launch with custom config
    pub async fn launch_with_config(config: AgentConfig) -> Result<Self> {
        let config = Arc::new(config);

        let (profile_dir, owns_profile) = match &config.profile_dir {
            Some(dir) => (dir.clone(), false),
            None => {
                let instance_id = BROWSER_COUNTER.fetch_add(1, Ordering::Relaxed);
                let dir = std::env::temp_dir().join(format!(
                    "courseplay-{}-{}",
                    std::process::id(),
                    instance_id
                ));
                // Clean up any stale data
                let _ = std::fs::remove_dir_all(&dir);
                (dir, true)
            }
        };
        std::fs::create_dir_all(&profile_dir)?;

        let chrome_path = match &config.chrome_path {
            Some(p) => PathBuf::from(p),
            None => find_chrome()?,
        };

        let args = launch_args(&config, &profile_dir);

        tracing::info!("Launching Chrome from {:?}", chrome_path);
        let (child, ws_url) = launch_chrome(&chrome_path, &args)?;

        let transport = Transport::new(child, &ws_url)?;
        let connection = Connection::new(transport);

        let version = connection.version().await?;
        tracing::info!("Connected to Chrome: {}", version.product);

        Ok(Self {
            connection,
            config,
            profile_dir,
            owns_profile,
        })
    }

    /// Config this browser was launched with
    pub fn config(&self) -> &Arc<AgentConfig> {
        &self.config
    }

    /// Open a blank tab with page events enabled; no scripts installed yet
    pub async fn new_page(&self) -> Result<CoursePage> {
        let target_id = self
            .connection
            .create_target("about:blank", None, None)
            .await?;
        let session = self.connection.attach_to_target(&target_id).await?;
        session.page_enable().await?;

        Ok(CoursePage::new(
            session,
            Arc::new(self.config.selectors.clone()),
        ))
    }

    /// Open a tab, install the page script, then navigate.
    ///
    /// `override_enabled` seeds the bridge for the first document.
    pub async fn open_course(&self, url: &str, override_enabled: bool) -> Result<CoursePage> {
        let mut page = self.new_page().await?;
        page.install_scripts(override_enabled).await?;
        page.goto(url).await?;
        tracing::info!("Opened {}", url);
        Ok(page)
    }

    /// Get the browser version
    pub async fn version(&self) -> Result<String> {
        let v = self.connection.version().await?;
        Ok(v.product)
    }

    /// Close a tab by target ID
    pub async fn close_page(&self, page: CoursePage) -> Result<()> {
        self.connection
            .close_target(page.session().target_id())
            .await?;
        Ok(())
    }

    /// Close the browser
    pub async fn close(self) -> Result<()> {
        self.connection.close().await?;
        if self.owns_profile {
            let _ = std::fs::remove_dir_all(&self.profile_dir);
        }
        Ok(())
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        // The Transport's Drop impl handles killing the Chrome process
        if self.owns_profile {
            let _ = std::fs::remove_dir_all(&self.profile_dir);
        }
    }
}
