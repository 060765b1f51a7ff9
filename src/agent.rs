//! Agent Loop
//!
//! Owns one course page and one engine and multiplexes everything that can
//! happen to them: page events, settings snapshots, the quiz backstop and
//! fired advance timers. Actions are executed in order; a failing action is
//! logged and the loop carries on.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::browser::Browser;
use crate::engine::{Action, Actions, Engine, PageEvent};
use crate::error::Result;
use crate::inject::MediaId;
use crate::page::CoursePage;
use crate::settings::SettingsAdapter;
use crate::AgentConfig;

/// Advance timer payload: document generation plus element
type AdvanceTimer = (u64, MediaId);

/// Engagement-override agent for one course tab
pub struct Agent {
    page: CoursePage,
    adapter: Arc<SettingsAdapter>,
    engine: Engine,
    config: Arc<AgentConfig>,
    /// Bumped on every new document so timers from an old one are dropped
    generation: u64,
}

impl Agent {
    /// Wrap an already prepared page. The engine starts from the adapter's
    /// current snapshot.
    pub fn new(page: CoursePage, adapter: Arc<SettingsAdapter>, config: Arc<AgentConfig>) -> Self {
        let engine = Engine::new(adapter.snapshot());
        Self {
            page,
            adapter,
            engine,
            config,
            generation: 0,
        }
    }

    /// Load settings, open `url` in a new tab with the page script installed
    pub async fn open(browser: &Browser, adapter: Arc<SettingsAdapter>, url: &str) -> Result<Self> {
        let settings = adapter.load().await;
        tracing::info!("{}", settings.status_line());

        let page = browser.open_course(url, settings.override_enabled).await?;
        Ok(Self::new(page, adapter, Arc::clone(browser.config())))
    }

    pub fn page(&self) -> &CoursePage {
        &self.page
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run until `shutdown` resolves or the browser goes away
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut settings_rx = self.adapter.subscribe();
        let listener = self.adapter.spawn_listener();
        let (advance_tx, mut advance_rx) = mpsc::unbounded_channel::<AdvanceTimer>();

        let mut quiz = tokio::time::interval(self.config.quiz_poll_interval);
        quiz.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Catch up with whatever happened before the loop started
        let startup = self.engine.update_settings(self.adapter.snapshot());
        self.execute(startup, &advance_tx).await;
        self.dispatch(PageEvent::DocumentReady, &advance_tx).await;

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutting down");
                    break;
                }
                event = self.page.next_event() => match event {
                    Some(event) => self.dispatch(event, &advance_tx).await,
                    None => {
                        tracing::warn!("Browser connection closed");
                        break;
                    }
                },
                changed = settings_rx.changed() => {
                    if changed.is_err() {
                        tracing::warn!("Settings publisher dropped");
                        break;
                    }
                    let settings = settings_rx.borrow_and_update().clone();
                    let actions = self.engine.update_settings(settings);
                    self.execute(actions, &advance_tx).await;
                }
                _ = quiz.tick() => {
                    self.dispatch(PageEvent::QuizTick, &advance_tx).await;
                }
                Some((generation, id)) = advance_rx.recv() => {
                    if generation == self.generation {
                        self.dispatch(PageEvent::AdvanceDue { id }, &advance_tx).await;
                    } else {
                        tracing::debug!("Dropping advance timer from a previous document");
                    }
                }
            }
        }

        listener.abort();
        Ok(())
    }

    async fn dispatch(&mut self, event: PageEvent, advance_tx: &mpsc::UnboundedSender<AdvanceTimer>) {
        if let PageEvent::DocumentReady = event {
            self.generation += 1;
            tracing::debug!("Document ready (generation {})", self.generation);
        }
        let actions = self.engine.handle(event);
        self.execute(actions, advance_tx).await;
    }

    /// Run actions in order; anything an action reports back is fed to the
    /// engine and its follow-ups are queued behind the current batch
    async fn execute(&mut self, actions: Actions, advance_tx: &mpsc::UnboundedSender<AdvanceTimer>) {
        let mut queue: VecDeque<Action> = actions.into_iter().collect();

        while let Some(action) = queue.pop_front() {
            tracing::trace!("Executing {:?}", action);
            match self.perform(action, advance_tx).await {
                Ok(Some(event)) => queue.extend(self.engine.handle(event)),
                Ok(None) => {}
                Err(e) if e.is_disconnected() => tracing::debug!("Action dropped: {}", e),
                Err(e) => tracing::warn!("Action failed: {}", e),
            }
        }
    }

    async fn perform(
        &mut self,
        action: Action,
        advance_tx: &mpsc::UnboundedSender<AdvanceTimer>,
    ) -> Result<Option<PageEvent>> {
        match action {
            Action::SyncBridge(enabled) => self.page.sync_bridge(enabled).await?,
            Action::Reload => {
                tracing::info!("Reloading page");
                self.page.reload().await?;
            }
            Action::Discover => {
                let discovery = self.page.discover().await?;
                return Ok(Some(PageEvent::Discovered(discovery)));
            }
            Action::AttachListeners(id) => {
                if self.page.attach_listeners(id).await? {
                    tracing::debug!("Listeners attached to media {}", id);
                }
            }
            Action::SetPlaybackRate { id, rate } => {
                if self.page.set_playback_rate(id, rate).await?.is_none() {
                    tracing::debug!("Media {} is gone, rate not set", id);
                }
            }
            Action::Seek { id, position } => {
                if self.page.seek(id, position).await? == Some(true) {
                    tracing::info!("Skipped intro of media {} to {}s", id, position);
                }
            }
            Action::TogglePlayback(id) => match self.page.toggle_playback(id).await? {
                Some(state) => tracing::info!("Media {} {}", id, state),
                None => tracing::debug!("Media {} is gone", id),
            },
            Action::ScheduleAdvance(id) => {
                let tx = advance_tx.clone();
                let delay = self.config.advance_delay;
                let generation = self.generation;
                tracing::info!("Advancing in {:?}", delay);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send((generation, id));
                });
            }
            Action::ClickNext => match self.page.click_next().await? {
                Some(matched) => tracing::info!("Clicked next item ({})", matched),
                None => tracing::info!("No next item control found"),
            },
            Action::DismissPrompts => {
                let clicked = self.page.dismiss_prompts().await?;
                if clicked > 0 {
                    tracing::info!("Dismissed {} quiz prompt(s)", clicked);
                }
            }
            Action::PersistSpeed(speed) => {
                if let Err(e) = self.adapter.set_playback_speed(speed).await {
                    self.engine.abandon_pending_speed();
                    return Err(e);
                }
            }
        }
        Ok(None)
    }
}
