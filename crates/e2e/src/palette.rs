//! Command palette automation

use std::time::Duration;

use ppds_common::{Key, KeyChord};
use tracing::{debug, info};

use crate::error::{E2eError, E2eResult};
use crate::wait::Poller;
use crate::window::{query_as, DomQuery, Scope, Window};

/// Default wait for the palette and its filtered results
pub const DEFAULT_PALETTE_TIMEOUT: Duration = Duration::from_secs(5);

/// Drives VS Code's command palette the way a user would
pub struct CommandPaletteHelper<'a> {
    window: &'a dyn Window,
    timeout: Duration,
}

impl<'a> CommandPaletteHelper<'a> {
    pub fn new(window: &'a dyn Window) -> Self {
        Self {
            window,
            timeout: DEFAULT_PALETTE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn is_open(&self) -> E2eResult<bool> {
        query_as(self.window, Scope::Window, &DomQuery::QuickInputOpen).await
    }

    /// Labels of the currently listed results
    pub async fn results(&self) -> E2eResult<Vec<String>> {
        query_as(self.window, Scope::Window, &DomQuery::QuickInputRows).await
    }

    /// Press the palette chord and wait for the quick input to show
    pub async fn open(&self) -> E2eResult<()> {
        self.window.press(&KeyChord::command_palette()).await?;

        let helper = self;
        Poller::new(self.timeout)
            .poll(move || async move { Ok::<_, E2eError>(helper.is_open().await?.then_some(())) })
            .await?
            .ready_or(|elapsed| E2eError::Timeout {
                waiting_for: "the command palette to open".to_string(),
                elapsed,
            })?;

        debug!("Command palette open");
        Ok(())
    }

    /// Type into the palette's filter input
    pub async fn search(&self, text: &str) -> E2eResult<()> {
        self.window.insert_text(text).await
    }

    /// Accept the result at `index` (0-based)
    pub async fn select_result(&self, index: usize) -> E2eResult<()> {
        if !self.is_open().await? {
            return Err(E2eError::PaletteNotOpen);
        }

        let available = self.results().await?.len();
        if index >= available {
            return Err(E2eError::ResultOutOfRange { index, available });
        }

        let down = KeyChord::new(Key::ArrowDown);
        for _ in 0..index {
            self.window.press(&down).await?;
        }
        self.window.press(&KeyChord::new(Key::Enter)).await
    }

    /// Open the palette, filter by `command`, and run the first match
    pub async fn execute_command(&self, command: &str) -> E2eResult<()> {
        info!("Executing command: {}", command);
        self.open().await?;
        self.search(command).await?;

        let needle = command.to_lowercase();
        let needle = needle.trim_start_matches('>').trim();
        let helper = self;
        let polled = Poller::new(self.timeout)
            .poll(move || async move {
                let rows = helper.results().await?;
                Ok::<_, E2eError>(rows
                    .iter()
                    .position(|label| label.to_lowercase().contains(needle)))
            })
            .await?;

        let index = match polled.ready_or(|elapsed| E2eError::Timeout {
            waiting_for: format!("command '{}' in the command palette", command),
            elapsed,
        }) {
            Ok(index) => index,
            Err(e) => {
                // Leave the workbench usable for the next step
                let _ = self.window.press(&KeyChord::new(Key::Escape)).await;
                return Err(e);
            }
        };

        self.select_result(index).await
    }
}
