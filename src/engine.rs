//! Action Engine
//!
//! A plain state machine. It never touches the page: events go in through
//! [`Engine::handle`] and [`Engine::update_settings`], and the actions the
//! agent should run come out. All per-element state lives in a side-table
//! keyed by [`MediaId`] and is dropped whenever a new document loads.

use std::collections::HashMap;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::inject::{ControlKind, Discovery, MediaId, PageReport};
use crate::settings::Settings;

/// Rates closer than this are treated as equal
const RATE_TOLERANCE: f64 = 1e-3;

/// Speed-cycle step and wraparound bounds
const SPEED_STEP: f64 = 0.25;
const SPEED_MAX: f64 = 2.0;
const SPEED_RESET: f64 = 1.0;

/// Something that happened on the page (or on one of the agent's timers)
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    /// A new document finished loading
    DocumentReady,
    /// A batch of structural changes
    Mutation { added_media: bool },
    /// Result of a discovery pass
    Discovered(Discovery),
    Play {
        id: MediaId,
        current_time: f64,
        playback_rate: f64,
    },
    RateChange {
        id: MediaId,
        playback_rate: f64,
    },
    TimeUpdate {
        id: MediaId,
        current_time: f64,
    },
    Ended {
        id: MediaId,
        next_available: bool,
    },
    Key(KeyPress),
    /// Quiz backstop interval fired
    QuizTick,
    /// A scheduled advance is due
    AdvanceDue { id: MediaId },
}

/// A page-wide keydown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPress {
    pub key: String,
    /// Focus was inside a text-input-capable element
    pub editable: bool,
    /// Ctrl, Alt or Meta was held
    pub modified: bool,
}

impl From<PageReport> for PageEvent {
    fn from(report: PageReport) -> Self {
        match report {
            PageReport::Mutation { added_media } => Self::Mutation { added_media },
            PageReport::Play {
                id,
                current_time,
                playback_rate,
            } => Self::Play {
                id,
                current_time,
                playback_rate,
            },
            PageReport::RateChange { id, playback_rate } => Self::RateChange { id, playback_rate },
            PageReport::TimeUpdate { id, current_time } => Self::TimeUpdate { id, current_time },
            PageReport::Ended { id, next_available } => Self::Ended { id, next_available },
            PageReport::Key {
                key,
                editable,
                modified,
            } => Self::Key(KeyPress {
                key,
                editable,
                modified,
            }),
        }
    }
}

/// Work for the agent to carry out against the page or the store
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Write the override flag through the bridge
    SyncBridge(bool),
    /// Full page reload (master switch turned off)
    Reload,
    /// Run discovery and feed the result back as `PageEvent::Discovered`
    Discover,
    AttachListeners(MediaId),
    SetPlaybackRate { id: MediaId, rate: f64 },
    Seek { id: MediaId, position: f64 },
    TogglePlayback(MediaId),
    /// Post `PageEvent::AdvanceDue` after the advance delay
    ScheduleAdvance(MediaId),
    ClickNext,
    DismissPrompts,
    /// Write a new playback speed back to the settings store
    PersistSpeed(f64),
}

/// Actions produced by one step; almost always a handful
pub type Actions = SmallVec<[Action; 4]>;

/// Side-table entry for one media element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaRecord {
    pub listeners_attached: bool,
    pub intro_skip_applied: bool,
    pub advance_pending: bool,
}

/// Next value of the keyboard speed cycle: 1 → 1.25 → … → 2 → 1
pub fn next_speed(current: f64) -> f64 {
    let steps = (current / SPEED_STEP).round() + 1.0;
    let next = steps * SPEED_STEP;
    if next > SPEED_MAX + RATE_TOLERANCE || next < SPEED_RESET {
        SPEED_RESET
    } else {
        next
    }
}

fn rate_differs(a: f64, b: f64) -> bool {
    (a - b).abs() > RATE_TOLERANCE
}

pub struct Engine {
    settings: Arc<Settings>,
    media: HashMap<MediaId, MediaRecord>,
    /// First element of the latest discovery, target of the `p` shortcut
    first_media: Option<MediaId>,
    /// A reload was requested; nothing runs until the next document
    reloading: bool,
    /// Speed chosen from the keyboard that the store has not echoed yet
    pending_speed: Option<f64>,
}

impl Engine {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            media: HashMap::new(),
            first_media: None,
            reloading: false,
            pending_speed: None,
        }
    }

    /// Snapshot the engine is currently acting on
    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn record(&self, id: MediaId) -> Option<&MediaRecord> {
        self.media.get(&id)
    }

    pub fn is_reloading(&self) -> bool {
        self.reloading
    }

    /// Speed written by a shortcut and not yet seen coming back from the store
    pub fn pending_speed(&self) -> Option<f64> {
        self.pending_speed
    }

    /// Forget a speed write that failed; the next snapshot wins again
    pub fn abandon_pending_speed(&mut self) {
        self.pending_speed = None;
    }

    /// Swap in a new configuration snapshot.
    ///
    /// The master switch going off produces exactly one reload and silences
    /// the engine until the next document.
    pub fn update_settings(&mut self, settings: Arc<Settings>) -> Actions {
        let settings = self.reconcile_speed(settings);
        let previous = std::mem::replace(&mut self.settings, settings);
        let current = Arc::clone(&self.settings);
        let mut actions = Actions::new();

        if self.reloading {
            return actions;
        }

        match (previous.override_enabled, current.override_enabled) {
            (true, false) => {
                tracing::info!("Override disabled, reloading page");
                self.reloading = true;
                actions.push(Action::SyncBridge(false));
                actions.push(Action::Reload);
            }
            (false, true) => {
                tracing::info!("Override enabled");
                actions.push(Action::SyncBridge(true));
                actions.push(Action::Discover);
            }
            (true, true) => {
                if rate_differs(previous.playback_speed, current.playback_speed) {
                    actions.push(Action::Discover);
                }
            }
            (false, false) => {}
        }
        actions
    }

    /// Hold the shortcut speed until the store echoes it back. Snapshots
    /// published before that carry an older speed.
    fn reconcile_speed(&mut self, incoming: Arc<Settings>) -> Arc<Settings> {
        let Some(pending) = self.pending_speed else {
            return incoming;
        };
        if !rate_differs(incoming.playback_speed, pending) {
            self.pending_speed = None;
            return incoming;
        }
        tracing::debug!(
            "Ignoring playback speed {} while {} is being written",
            incoming.playback_speed,
            pending
        );
        Arc::new(Settings {
            playback_speed: pending,
            ..(*incoming).clone()
        })
    }

    /// Advance the state machine by one event
    pub fn handle(&mut self, event: PageEvent) -> Actions {
        let mut actions = Actions::new();

        if let PageEvent::DocumentReady = event {
            self.media.clear();
            self.first_media = None;
            self.reloading = false;
            actions.push(Action::SyncBridge(self.settings.override_enabled));
            if self.settings.override_enabled {
                actions.push(Action::Discover);
            }
            return actions;
        }

        if self.reloading || !self.settings.override_enabled {
            return actions;
        }
        let settings = Arc::clone(&self.settings);

        match event {
            PageEvent::DocumentReady => {}
            PageEvent::Mutation { added_media } => {
                if added_media {
                    actions.push(Action::Discover);
                }
                if settings.quiz_skip_enabled {
                    actions.push(Action::DismissPrompts);
                }
            }
            PageEvent::Discovered(discovery) => self.on_discovered(&settings, discovery, &mut actions),
            PageEvent::Play {
                id,
                current_time,
                playback_rate,
            } => {
                if rate_differs(playback_rate, settings.playback_speed) {
                    actions.push(Action::SetPlaybackRate {
                        id,
                        rate: settings.playback_speed,
                    });
                }
                self.intro_skip(&settings, id, current_time, &mut actions);
            }
            PageEvent::RateChange { id, playback_rate } => {
                if rate_differs(playback_rate, settings.playback_speed) {
                    tracing::debug!(
                        "Rate of media {} moved to {}, restoring {}",
                        id,
                        playback_rate,
                        settings.playback_speed
                    );
                    actions.push(Action::SetPlaybackRate {
                        id,
                        rate: settings.playback_speed,
                    });
                }
            }
            PageEvent::TimeUpdate { id, current_time } => {
                self.intro_skip(&settings, id, current_time, &mut actions);
            }
            PageEvent::Ended { id, next_available } => {
                if !settings.auto_next_enabled {
                    return actions;
                }
                if !next_available {
                    tracing::debug!("Media {} ended but no next control was found", id);
                    return actions;
                }
                let record = self.media.entry(id).or_default();
                if record.advance_pending {
                    tracing::debug!("Advance already pending for media {}", id);
                    return actions;
                }
                record.advance_pending = true;
                actions.push(Action::ScheduleAdvance(id));
            }
            PageEvent::AdvanceDue { id } => {
                let Some(record) = self.media.get_mut(&id) else {
                    tracing::debug!("Dropping stale advance for media {}", id);
                    return actions;
                };
                if !record.advance_pending {
                    return actions;
                }
                record.advance_pending = false;
                if settings.auto_next_enabled {
                    actions.push(Action::ClickNext);
                }
            }
            PageEvent::QuizTick => {
                if settings.quiz_skip_enabled {
                    actions.push(Action::DismissPrompts);
                }
            }
            PageEvent::Key(press) => self.on_key(&settings, press, &mut actions),
        }
        actions
    }

    fn on_discovered(&mut self, settings: &Settings, discovery: Discovery, actions: &mut Actions) {
        self.first_media = discovery.media.first().map(|m| m.id);

        // Elements gone from the document; a pending advance still has to fire
        let before = self.media.len();
        self.media.retain(|id, record| {
            record.advance_pending || discovery.media.iter().any(|m| m.id == *id)
        });
        if self.media.len() < before {
            tracing::trace!("Pruned {} media records", before - self.media.len());
        }

        for media in &discovery.media {
            let record = self.media.entry(media.id).or_default();
            if !record.listeners_attached {
                record.listeners_attached = true;
                actions.push(Action::AttachListeners(media.id));
            }
            if rate_differs(media.playback_rate, settings.playback_speed) {
                actions.push(Action::SetPlaybackRate {
                    id: media.id,
                    rate: settings.playback_speed,
                });
            }
        }

        if discovery.visible(ControlKind::Quiz).next().is_some() && settings.quiz_skip_enabled {
            actions.push(Action::DismissPrompts);
        }

        tracing::trace!(
            "Discovered {} media, {} controls",
            discovery.media.len(),
            discovery.controls.len()
        );
    }

    /// Jump to the threshold the first time an element is seen inside the intro
    fn intro_skip(&mut self, settings: &Settings, id: MediaId, current_time: f64, actions: &mut Actions) {
        if !settings.smart_skip_enabled {
            return;
        }
        let record = self.media.entry(id).or_default();
        if record.intro_skip_applied {
            return;
        }

        if current_time < settings.skip_duration {
            record.intro_skip_applied = true;
            tracing::debug!(
                "Skipping intro of media {}: {} -> {}",
                id,
                current_time,
                settings.skip_duration
            );
            actions.push(Action::Seek {
                id,
                position: settings.skip_duration,
            });
        }
    }

    fn on_key(&mut self, settings: &Settings, press: KeyPress, actions: &mut Actions) {
        if press.editable || press.modified {
            return;
        }

        match press.key.to_ascii_lowercase().as_str() {
            "n" => actions.push(Action::ClickNext),
            "p" => match self.first_media {
                Some(id) => actions.push(Action::TogglePlayback(id)),
                None => tracing::debug!("No media to toggle"),
            },
            "s" => {
                let speed = next_speed(settings.playback_speed);
                tracing::info!("Playback speed: {}", speed);
                self.settings = Arc::new(Settings {
                    playback_speed: speed,
                    ..settings.clone()
                });
                self.pending_speed = Some(speed);
                actions.push(Action::PersistSpeed(speed));
                actions.push(Action::Discover);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::{ControlSnapshot, MediaSnapshot};

    fn engine(settings: Settings) -> Engine {
        let mut engine = Engine::new(Arc::new(settings));
        engine.handle(PageEvent::DocumentReady);
        engine
    }

    fn media(id: MediaId, rate: f64) -> MediaSnapshot {
        MediaSnapshot {
            id,
            current_time: 0.0,
            playback_rate: rate,
            paused: true,
            ended: false,
        }
    }

    fn discovered(media: Vec<MediaSnapshot>) -> PageEvent {
        PageEvent::Discovered(Discovery {
            media,
            controls: Vec::new(),
        })
    }

    fn key(key: &str) -> PageEvent {
        PageEvent::Key(KeyPress {
            key: key.to_string(),
            editable: false,
            modified: false,
        })
    }

    fn smart_skip() -> Settings {
        Settings {
            smart_skip_enabled: true,
            skip_duration: 10.0,
            ..Settings::default()
        }
    }

    fn auto_next() -> Settings {
        Settings {
            auto_next_enabled: true,
            ..Settings::default()
        }
    }

    #[test]
    fn test_document_ready_syncs_and_discovers() {
        let mut engine = Engine::new(Arc::new(Settings::default()));
        let actions = engine.handle(PageEvent::DocumentReady);
        assert_eq!(
            actions.as_slice(),
            &[Action::SyncBridge(true), Action::Discover]
        );

        let mut disabled = Engine::new(Arc::new(Settings {
            override_enabled: false,
            ..Settings::default()
        }));
        assert_eq!(
            disabled.handle(PageEvent::DocumentReady).as_slice(),
            &[Action::SyncBridge(false)]
        );
    }

    #[test]
    fn test_attach_is_idempotent() {
        let mut engine = engine(Settings::default());
        let first = engine.handle(discovered(vec![media(1, 1.0), media(2, 1.0)]));
        assert_eq!(
            first.as_slice(),
            &[Action::AttachListeners(1), Action::AttachListeners(2)]
        );

        let again = engine.handle(discovered(vec![media(1, 1.0), media(2, 1.0), media(3, 1.0)]));
        assert_eq!(again.as_slice(), &[Action::AttachListeners(3)]);
        assert!(engine.record(1).unwrap().listeners_attached);
    }

    #[test]
    fn test_discovery_enforces_speed_only_when_different() {
        let mut engine = engine(Settings {
            playback_speed: 1.5,
            ..Settings::default()
        });
        let actions = engine.handle(discovered(vec![media(1, 1.0), media(2, 1.5)]));
        assert!(actions.contains(&Action::SetPlaybackRate { id: 1, rate: 1.5 }));
        assert!(!actions.contains(&Action::SetPlaybackRate { id: 2, rate: 1.5 }));
    }

    #[test]
    fn test_speed_is_fixed_point() {
        let mut engine = engine(Settings {
            playback_speed: 1.5,
            ..Settings::default()
        });
        engine.handle(discovered(vec![media(1, 1.5)]));

        let actions = engine.handle(PageEvent::RateChange {
            id: 1,
            playback_rate: 1.0,
        });
        assert_eq!(
            actions.as_slice(),
            &[Action::SetPlaybackRate { id: 1, rate: 1.5 }]
        );

        // Our own write echoes back as a ratechange at the right rate
        let echo = engine.handle(PageEvent::RateChange {
            id: 1,
            playback_rate: 1.5,
        });
        assert!(echo.is_empty());
    }

    #[test]
    fn test_play_enforces_speed() {
        let mut engine = engine(Settings {
            playback_speed: 2.0,
            ..Settings::default()
        });
        let actions = engine.handle(PageEvent::Play {
            id: 4,
            current_time: 0.0,
            playback_rate: 1.0,
        });
        assert_eq!(
            actions.as_slice(),
            &[Action::SetPlaybackRate { id: 4, rate: 2.0 }]
        );
    }

    #[test]
    fn test_intro_skip_applies_once() {
        let mut engine = engine(smart_skip());

        let actions = engine.handle(PageEvent::TimeUpdate {
            id: 1,
            current_time: 3.0,
        });
        assert_eq!(
            actions.as_slice(),
            &[Action::Seek {
                id: 1,
                position: 10.0
            }]
        );

        let later = engine.handle(PageEvent::TimeUpdate {
            id: 1,
            current_time: 8.0,
        });
        assert!(later.is_empty());

        // User seeks back
        let back = engine.handle(PageEvent::TimeUpdate {
            id: 1,
            current_time: 5.0,
        });
        assert!(back.is_empty());
        assert!(engine.record(1).unwrap().intro_skip_applied);
    }

    #[test]
    fn test_intro_skip_on_play() {
        let mut engine = engine(smart_skip());
        let actions = engine.handle(PageEvent::Play {
            id: 1,
            current_time: 0.0,
            playback_rate: 1.0,
        });
        assert_eq!(
            actions.as_slice(),
            &[Action::Seek {
                id: 1,
                position: 10.0
            }]
        );
        let replay = engine.handle(PageEvent::Play {
            id: 1,
            current_time: 0.0,
            playback_rate: 1.0,
        });
        assert!(replay.is_empty());
    }

    #[test]
    fn test_intro_skip_waits_for_intro_position() {
        let mut engine = engine(smart_skip());
        let resumed = engine.handle(PageEvent::Play {
            id: 1,
            current_time: 42.0,
            playback_rate: 1.0,
        });
        assert!(resumed.is_empty());
        assert!(!engine.record(1).unwrap().intro_skip_applied);

        // Restarted from the beginning: the intro is skipped once
        let restarted = engine.handle(PageEvent::Play {
            id: 1,
            current_time: 0.0,
            playback_rate: 1.0,
        });
        assert_eq!(
            restarted.as_slice(),
            &[Action::Seek {
                id: 1,
                position: 10.0
            }]
        );
        assert!(engine
            .handle(PageEvent::TimeUpdate {
                id: 1,
                current_time: 2.0,
            })
            .is_empty());
    }

    #[test]
    fn test_intro_skip_disabled() {
        let mut engine = engine(Settings::default());
        let actions = engine.handle(PageEvent::TimeUpdate {
            id: 1,
            current_time: 3.0,
        });
        assert!(actions.is_empty());
        assert!(engine.record(1).is_none());
    }

    #[test]
    fn test_intro_skip_per_element() {
        let mut engine = engine(smart_skip());
        engine.handle(PageEvent::TimeUpdate {
            id: 1,
            current_time: 3.0,
        });
        let other = engine.handle(PageEvent::TimeUpdate {
            id: 2,
            current_time: 3.0,
        });
        assert_eq!(
            other.as_slice(),
            &[Action::Seek {
                id: 2,
                position: 10.0
            }]
        );
    }

    #[test]
    fn test_advance_is_debounced() {
        let mut engine = engine(auto_next());
        engine.handle(discovered(vec![media(1, 1.0)]));

        let ended = PageEvent::Ended {
            id: 1,
            next_available: true,
        };
        assert_eq!(
            engine.handle(ended.clone()).as_slice(),
            &[Action::ScheduleAdvance(1)]
        );
        assert!(engine.handle(ended.clone()).is_empty());

        assert_eq!(
            engine.handle(PageEvent::AdvanceDue { id: 1 }).as_slice(),
            &[Action::ClickNext]
        );
        // A duplicate timer firing clicks nothing
        assert!(engine.handle(PageEvent::AdvanceDue { id: 1 }).is_empty());

        // A later, real completion schedules again
        assert_eq!(
            engine.handle(ended).as_slice(),
            &[Action::ScheduleAdvance(1)]
        );
    }

    #[test]
    fn test_repeated_discovery_keeps_one_advance() {
        let mut engine = engine(auto_next());
        for _ in 0..3 {
            engine.handle(discovered(vec![media(1, 1.0)]));
        }
        let scheduled = engine.handle(PageEvent::Ended {
            id: 1,
            next_available: true,
        });
        assert_eq!(scheduled.len(), 1);
    }

    #[test]
    fn test_advance_requires_flag_and_control() {
        let mut off = engine(Settings::default());
        assert!(off
            .handle(PageEvent::Ended {
                id: 1,
                next_available: true
            })
            .is_empty());

        let mut missing = engine(auto_next());
        assert!(missing
            .handle(PageEvent::Ended {
                id: 1,
                next_available: false
            })
            .is_empty());
    }

    #[test]
    fn test_advance_cancelled_when_flag_drops() {
        let mut engine = engine(auto_next());
        engine.handle(PageEvent::Ended {
            id: 1,
            next_available: true,
        });
        engine.update_settings(Arc::new(Settings::default()));
        assert!(engine.handle(PageEvent::AdvanceDue { id: 1 }).is_empty());
    }

    #[test]
    fn test_stale_advance_after_navigation() {
        let mut engine = engine(auto_next());
        engine.handle(PageEvent::Ended {
            id: 1,
            next_available: true,
        });
        engine.handle(PageEvent::DocumentReady);
        assert!(engine.handle(PageEvent::AdvanceDue { id: 1 }).is_empty());
    }

    #[test]
    fn test_quiz_on_mutation_and_tick() {
        let mut engine = engine(Settings {
            quiz_skip_enabled: true,
            ..Settings::default()
        });
        assert_eq!(
            engine
                .handle(PageEvent::Mutation { added_media: false })
                .as_slice(),
            &[Action::DismissPrompts]
        );
        assert_eq!(
            engine
                .handle(PageEvent::Mutation { added_media: true })
                .as_slice(),
            &[Action::Discover, Action::DismissPrompts]
        );
        assert_eq!(
            engine.handle(PageEvent::QuizTick).as_slice(),
            &[Action::DismissPrompts]
        );

        let mut off = self::engine(Settings::default());
        assert!(off.handle(PageEvent::QuizTick).is_empty());
        assert_eq!(
            off.handle(PageEvent::Mutation { added_media: true })
                .as_slice(),
            &[Action::Discover]
        );
    }

    #[test]
    fn test_discovered_visible_quiz_dismissed() {
        let mut engine = engine(Settings {
            quiz_skip_enabled: true,
            ..Settings::default()
        });
        let actions = engine.handle(PageEvent::Discovered(Discovery {
            media: Vec::new(),
            controls: vec![ControlSnapshot {
                kind: ControlKind::Quiz,
                selector: "button".into(),
                visible: true,
            }],
        }));
        assert_eq!(actions.as_slice(), &[Action::DismissPrompts]);
    }

    #[test]
    fn test_speed_cycle() {
        let mut speed = 1.0;
        let mut seen = Vec::new();
        for _ in 0..5 {
            speed = next_speed(speed);
            seen.push(speed);
        }
        assert_eq!(seen, vec![1.25, 1.5, 1.75, 2.0, 1.0]);

        // Off-grid and out-of-range speeds land back on the cycle
        assert_eq!(next_speed(1.3), 1.5);
        assert_eq!(next_speed(3.0), 1.0);
        assert_eq!(next_speed(0.5), 1.0);
    }

    #[test]
    fn test_key_s_persists_and_enforces() {
        let mut engine = engine(Settings::default());
        let actions = engine.handle(key("s"));
        assert_eq!(
            actions.as_slice(),
            &[Action::PersistSpeed(1.25), Action::Discover]
        );
        assert_eq!(engine.settings().playback_speed, 1.25);

        let actions = engine.handle(key("s"));
        assert_eq!(actions[0], Action::PersistSpeed(1.5));
    }

    #[test]
    fn test_late_speed_echo_does_not_roll_back() {
        let mut engine = engine(Settings::default());
        engine.handle(key("s"));
        engine.handle(key("s"));
        assert_eq!(engine.pending_speed(), Some(1.5));

        // The store echoes the first write after the second press
        let echo = engine.update_settings(Arc::new(Settings {
            playback_speed: 1.25,
            ..Settings::default()
        }));
        assert!(echo.is_empty());
        assert_eq!(engine.settings().playback_speed, 1.5);

        assert_eq!(
            engine.handle(key("s")).as_slice(),
            &[Action::PersistSpeed(1.75), Action::Discover]
        );

        // Once our own value comes back, outside changes apply again
        engine.update_settings(Arc::new(Settings {
            playback_speed: 1.75,
            ..Settings::default()
        }));
        assert_eq!(engine.pending_speed(), None);
        let external = engine.update_settings(Arc::new(Settings {
            playback_speed: 1.0,
            ..Settings::default()
        }));
        assert_eq!(external.as_slice(), &[Action::Discover]);
        assert_eq!(engine.settings().playback_speed, 1.0);
    }

    #[test]
    fn test_abandoned_speed_write() {
        let mut engine = engine(Settings::default());
        engine.handle(key("s"));
        engine.abandon_pending_speed();

        let actions = engine.update_settings(Arc::new(Settings::default()));
        assert_eq!(actions.as_slice(), &[Action::Discover]);
        assert_eq!(engine.settings().playback_speed, 1.0);
    }

    #[test]
    fn test_discovery_prunes_removed_media() {
        let mut engine = engine(auto_next());
        engine.handle(discovered(vec![media(1, 1.0), media(2, 1.0), media(3, 1.0)]));
        engine.handle(PageEvent::Ended {
            id: 3,
            next_available: true,
        });

        engine.handle(discovered(vec![media(1, 1.0)]));
        assert!(engine.record(1).is_some());
        assert!(engine.record(2).is_none());

        // Still waiting to advance past 3
        assert!(engine.record(3).is_some());
        assert_eq!(
            engine.handle(PageEvent::AdvanceDue { id: 3 }).as_slice(),
            &[Action::ClickNext]
        );
    }

    #[test]
    fn test_keys_suppressed_in_text_input() {
        let mut engine = engine(Settings::default());
        for k in ["s", "n", "p"] {
            let actions = engine.handle(PageEvent::Key(KeyPress {
                key: k.to_string(),
                editable: true,
                modified: false,
            }));
            assert!(actions.is_empty(), "{k}");
        }
        let ctrl_s = engine.handle(PageEvent::Key(KeyPress {
            key: "s".into(),
            editable: false,
            modified: true,
        }));
        assert!(ctrl_s.is_empty());
        assert_eq!(engine.settings().playback_speed, 1.0);
    }

    #[test]
    fn test_key_n_and_p() {
        let mut engine = engine(Settings::default());
        assert_eq!(engine.handle(key("n")).as_slice(), &[Action::ClickNext]);

        assert!(engine.handle(key("p")).is_empty());
        engine.handle(discovered(vec![media(7, 1.0), media(8, 1.0)]));
        assert_eq!(
            engine.handle(key("P")).as_slice(),
            &[Action::TogglePlayback(7)]
        );
        assert!(engine.handle(key("x")).is_empty());
    }

    #[test]
    fn test_master_off_reloads_once_then_silent() {
        let mut engine = engine(Settings {
            auto_next_enabled: true,
            quiz_skip_enabled: true,
            smart_skip_enabled: true,
            ..Settings::default()
        });
        engine.handle(discovered(vec![media(1, 1.0)]));

        let off = Arc::new(Settings {
            override_enabled: false,
            ..(**engine.settings()).clone()
        });
        let actions = engine.update_settings(Arc::clone(&off));
        assert_eq!(
            actions.as_slice(),
            &[Action::SyncBridge(false), Action::Reload]
        );
        assert!(engine.is_reloading());

        // Repeated notifications and page activity do nothing until the new document
        assert!(engine.update_settings(Arc::clone(&off)).is_empty());
        assert!(engine
            .update_settings(Arc::new(Settings::default()))
            .is_empty());
        for event in [
            PageEvent::QuizTick,
            PageEvent::Mutation { added_media: true },
            PageEvent::Ended {
                id: 1,
                next_available: true,
            },
            PageEvent::TimeUpdate {
                id: 1,
                current_time: 0.0,
            },
            key("n"),
        ] {
            assert!(engine.handle(event).is_empty());
        }
    }

    #[test]
    fn test_disabled_master_suppresses_everything() {
        let mut engine = engine(Settings {
            override_enabled: false,
            auto_next_enabled: true,
            quiz_skip_enabled: true,
            smart_skip_enabled: true,
            playback_speed: 2.0,
            ..Settings::default()
        });
        assert!(engine.handle(discovered(vec![media(1, 1.0)])).is_empty());
        assert!(engine.handle(PageEvent::QuizTick).is_empty());
        assert!(engine.handle(key("s")).is_empty());
        assert!(engine
            .handle(PageEvent::RateChange {
                id: 1,
                playback_rate: 1.0
            })
            .is_empty());
    }

    #[test]
    fn test_reenable_syncs_and_discovers() {
        let mut engine = engine(Settings {
            override_enabled: false,
            ..Settings::default()
        });
        let actions = engine.update_settings(Arc::new(Settings::default()));
        assert_eq!(
            actions.as_slice(),
            &[Action::SyncBridge(true), Action::Discover]
        );
    }

    #[test]
    fn test_speed_change_rediscovers() {
        let mut engine = engine(Settings::default());
        let actions = engine.update_settings(Arc::new(Settings {
            playback_speed: 1.75,
            ..Settings::default()
        }));
        assert_eq!(actions.as_slice(), &[Action::Discover]);

        let unrelated = engine.update_settings(Arc::new(Settings {
            playback_speed: 1.75,
            quiz_skip_enabled: true,
            ..Settings::default()
        }));
        assert!(unrelated.is_empty());
    }

    #[test]
    fn test_from_report() {
        let event: PageEvent = PageReport::Ended {
            id: 2,
            next_available: true,
        }
        .into();
        assert_eq!(
            event,
            PageEvent::Ended {
                id: 2,
                next_available: true
            }
        );
    }
}
