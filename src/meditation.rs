//! Meditation session service.
//!
//! Explicitly constructed state container that owns the session timer, its
//! tick task and the recent-sessions cache, and is the only writer of session
//! and streak rows. Created once at startup and handed to whoever needs it.

use crate::auth::AuthSession;
use crate::clock::Clock;
use crate::error::{MindfulError, Result};
use crate::models::{NewSessionRecord, SessionRecord, StreakRow};
use crate::store::{SessionQuery, SessionStore, StreakStore};
use crate::streak::{self, StreakChange};
use crate::ticker::Ticker;
use crate::timer::{Session, SessionTimer, TickOutcome, TimerPhase, TimerSnapshot};
use std::ops::ControlFlow;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Called from the tick thread after every counted tick
pub type TickListener = Arc<dyn Fn(&TimerSnapshot) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub default_duration: u32,
    pub tick_interval: Duration,
    pub recent_limit: usize,
    pub journal_max_chars: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            default_duration: 1200,
            tick_interval: Duration::from_secs(1),
            recent_limit: 10,
            journal_max_chars: 500,
        }
    }
}

/// Most-recent-first, capped list of persisted sessions
#[derive(Debug, Clone, Default)]
pub struct RecentSessions {
    limit: usize,
    entries: Vec<SessionRecord>,
}

impl RecentSessions {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            entries: Vec::new(),
        }
    }

    pub fn replace(&mut self, mut rows: Vec<SessionRecord>) {
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(self.limit);
        self.entries = rows;
    }

    pub fn entries(&self) -> &[SessionRecord] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// What a successful completion wrote
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionReport {
    pub duration: u32,
    pub streak: StreakRow,
    pub change: StreakChange,
}

pub struct MeditationService<S> {
    store: Rc<S>,
    clock: Box<dyn Clock>,
    options: ServiceOptions,
    timer: Arc<Mutex<SessionTimer>>,
    ticker: Option<Ticker>,
    listener: Option<TickListener>,
    recent: RecentSessions,
}

impl<S> MeditationService<S>
where
    S: SessionStore + StreakStore,
{
    pub fn new(store: Rc<S>, clock: Box<dyn Clock>, options: ServiceOptions) -> Self {
        let timer = SessionTimer::new(options.default_duration);
        let recent = RecentSessions::new(options.recent_limit);
        Self {
            store,
            clock,
            options,
            timer: Arc::new(Mutex::new(timer)),
            ticker: None,
            listener: None,
            recent,
        }
    }

    pub fn set_tick_listener(&mut self, listener: Option<TickListener>) {
        self.listener = listener;
    }

    fn timer(&self) -> MutexGuard<'_, SessionTimer> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        self.timer().snapshot()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.timer().session().cloned()
    }

    pub fn recent_sessions(&self) -> &[SessionRecord] {
        self.recent.entries()
    }

    pub fn start(&mut self, duration: u32) -> Result<()> {
        {
            let mut timer = self.timer();
            let from = timer.phase();
            timer.start(duration)?;
            tracing::info!(from = %from, to = %timer.phase(), duration, "session started");
        }
        // Only a finished task can be left over here; release it before the new one
        self.cancel_ticker();
        self.spawn_ticker()
    }

    pub fn pause(&mut self) -> Result<()> {
        self.transition("pause", SessionTimer::pause)
    }

    pub fn resume(&mut self) -> Result<()> {
        self.transition("resume", SessionTimer::resume)
    }

    pub fn stop(&mut self) -> Result<()> {
        self.transition("stop", SessionTimer::stop)?;
        self.cancel_ticker();
        Ok(())
    }

    /// Abort or clear the current session from any phase
    pub fn reset(&mut self) {
        self.cancel_ticker();
        let mut timer = self.timer();
        let from = timer.phase();
        timer.reset();
        tracing::info!(from = %from, to = %timer.phase(), "session reset");
    }

    /// Release the tick task of a countdown that ran out.
    ///
    /// Returns true exactly once after the countdown expires, so the caller
    /// can react to natural completion. The decision rests on the timer
    /// phase alone: a completed timer's task is at most finishing its last
    /// callback, so it is joined here rather than polled.
    pub fn reap_ticker(&mut self) -> bool {
        if self.ticker.is_none() || self.timer().phase() != TimerPhase::Completed {
            return false;
        }
        self.cancel_ticker();
        true
    }

    #[cfg(test)]
    pub fn has_live_ticker(&self) -> bool {
        self.ticker.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Finalize the current session with its reflection, persist it and
    /// advance the user's streak.
    ///
    /// Steps run in order and stop at the first failure. Nothing is rolled
    /// back: if the insert succeeded but the streak write failed, the session
    /// row stays and is marked on the in-memory session, so a retry only
    /// redoes the streak. The in-memory session is only discarded once every
    /// write has gone through.
    pub fn complete_session(
        &mut self,
        auth: Option<&AuthSession>,
        mood: &str,
        rating: u8,
        journal_text: Option<&str>,
    ) -> Result<CompletionReport> {
        let auth = auth.ok_or(MindfulError::NotAuthenticated)?;

        let mood = mood.trim();
        if mood.is_empty() {
            return Err(MindfulError::validation("A mood is required"));
        }
        if !(1..=5).contains(&rating) {
            return Err(MindfulError::validation(format!(
                "Rating must be between 1 and 5, got {}",
                rating
            )));
        }
        let journal_text = journal_text.map(str::trim).filter(|j| !j.is_empty());
        if let Some(journal) = journal_text {
            let len = journal.chars().count();
            if len > self.options.journal_max_chars {
                return Err(MindfulError::validation(format!(
                    "Journal entry is {} characters; the limit is {}",
                    len, self.options.journal_max_chars
                )));
            }
        }

        let session = self
            .current_session()
            .ok_or_else(|| MindfulError::invalid_state("There is no session to complete"))?;

        if self.snapshot().is_active() {
            self.stop()?;
        }

        if session.persisted {
            tracing::debug!(duration = session.duration, "session row already written, retrying streak");
        } else {
            let record = NewSessionRecord {
                user_id: auth.user_id().to_string(),
                duration: session.duration,
                completed: true,
                mood: Some(mood.to_string()),
                rating: Some(rating),
                journal_text: journal_text.map(str::to_string),
            };
            self.store.insert_session(auth, &record)?;
            self.timer().mark_persisted();
            tracing::debug!(duration = session.duration, "session row inserted");
        }

        let previous = self.store.streak(auth)?;
        let (next, change) = streak::advance(
            previous.as_ref(),
            auth.user_id(),
            self.clock.today(),
            self.clock.yesterday(),
        );
        self.store.upsert_streak(auth, &next)?;
        tracing::info!(
            change = change.as_str(),
            current = next.current_streak,
            longest = next.longest_streak,
            "streak updated"
        );

        self.timer().take_completed();
        self.load_recent_sessions(Some(auth))?;

        Ok(CompletionReport {
            duration: session.duration,
            streak: next,
            change,
        })
    }

    /// Re-fetch the latest sessions into the bounded cache
    pub fn load_recent_sessions(&mut self, auth: Option<&AuthSession>) -> Result<&[SessionRecord]> {
        let auth = auth.ok_or(MindfulError::NotAuthenticated)?;
        let rows = self
            .store
            .sessions(auth, &SessionQuery::latest(self.options.recent_limit))?;
        self.recent.replace(rows);
        Ok(self.recent.entries())
    }

    /// Forget per-user state, e.g. on sign out
    pub fn clear_user_data(&mut self) {
        self.recent.clear();
    }

    /// Cancel any tick task. Called at teardown; also runs on drop.
    pub fn shutdown(&mut self) {
        self.cancel_ticker();
    }

    fn transition(
        &mut self,
        name: &'static str,
        op: fn(&mut SessionTimer) -> std::result::Result<(), crate::error::TimerError>,
    ) -> Result<()> {
        let mut timer = self.timer();
        let from = timer.phase();
        op(&mut timer)?;
        tracing::info!(from = %from, to = %timer.phase(), action = name, "timer transition");
        Ok(())
    }

    fn spawn_ticker(&mut self) -> Result<()> {
        let timer = Arc::clone(&self.timer);
        let listener = self.listener.clone();

        let ticker = Ticker::spawn(self.options.tick_interval, move || {
            let (outcome, snapshot) = {
                let mut timer = timer.lock().unwrap_or_else(PoisonError::into_inner);
                let outcome = timer.tick();
                (outcome, timer.snapshot())
            };
            if outcome != TickOutcome::Ignored {
                if let Some(listener) = &listener {
                    listener(&snapshot);
                }
            }
            match (outcome, snapshot.phase) {
                (TickOutcome::Expired, _) => {
                    tracing::info!(duration = snapshot.duration, "session expired");
                    ControlFlow::Break(())
                }
                // Nothing left to count down
                (_, TimerPhase::Idle | TimerPhase::Completed) => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            }
        })
        .map_err(|e| MindfulError::io("spawning tick task", e))?;

        self.ticker = Some(ticker);
        Ok(())
    }

    fn cancel_ticker(&mut self) {
        if let Some(mut ticker) = self.ticker.take() {
            ticker.cancel();
        }
    }
}

impl<S> Drop for MeditationService<S> {
    fn drop(&mut self) {
        if let Some(mut ticker) = self.ticker.take() {
            ticker.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_session;
    use crate::clock::FixedClock;
    use crate::store::memory::MemoryBackend;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn service_with(store: Rc<MemoryBackend>, tick_ms: u64) -> MeditationService<MemoryBackend> {
        MeditationService::new(
            store,
            Box::new(FixedClock::on(today())),
            ServiceOptions {
                tick_interval: Duration::from_millis(tick_ms),
                ..Default::default()
            },
        )
    }

    fn idle_service(store: Rc<MemoryBackend>) -> MeditationService<MemoryBackend> {
        // Ticks far in the future so tests drive state by hand
        service_with(store, 3_600_000)
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met in time");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_complete_without_prior_streak() {
        let store = Rc::new(MemoryBackend::new());
        let mut service = idle_service(Rc::clone(&store));
        let auth = test_session("u-1");

        service.start(1200).unwrap();
        service.stop().unwrap();
        let report = service
            .complete_session(Some(&auth), "Calm", 4, Some("felt good"))
            .unwrap();

        assert_eq!(report.change, StreakChange::Started);
        assert_eq!(
            store.streaks.borrow().get("u-1").unwrap(),
            &StreakRow {
                user_id: "u-1".to_string(),
                current_streak: 1,
                longest_streak: 1,
                last_meditation_date: Some(today()),
            }
        );
        let sessions = store.sessions.borrow();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].mood.as_deref(), Some("Calm"));
        assert_eq!(sessions[0].rating, Some(4));
        assert_eq!(sessions[0].journal_text.as_deref(), Some("felt good"));
        assert!(sessions[0].completed);
    }

    #[test]
    fn test_complete_extends_yesterdays_streak() {
        let store = Rc::new(MemoryBackend::new());
        store.seed_streak(StreakRow {
            user_id: "u-1".to_string(),
            current_streak: 5,
            longest_streak: 5,
            last_meditation_date: NaiveDate::from_ymd_opt(2024, 6, 14),
        });
        let mut service = idle_service(Rc::clone(&store));
        let auth = test_session("u-1");

        service.start(600).unwrap();
        service.stop().unwrap();
        let report = service.complete_session(Some(&auth), "Happy", 5, None).unwrap();

        assert_eq!(report.streak.current_streak, 6);
        assert_eq!(report.streak.longest_streak, 6);
        assert_eq!(report.change, StreakChange::Extended);
    }

    #[test]
    fn test_completion_discards_session_and_refreshes_cache() {
        let store = Rc::new(MemoryBackend::new());
        let mut service = idle_service(Rc::clone(&store));
        let auth = test_session("u-1");

        service.start(300).unwrap();
        service.stop().unwrap();
        service.complete_session(Some(&auth), "Calm", 3, None).unwrap();

        assert!(service.current_session().is_none());
        assert_eq!(service.snapshot().phase, TimerPhase::Idle);
        assert_eq!(service.recent_sessions().len(), 1);

        // A second submission has nothing to submit
        let err = service
            .complete_session(Some(&auth), "Calm", 3, None)
            .unwrap_err();
        assert!(matches!(err, MindfulError::InvalidState(_)));
        assert_eq!(store.sessions.borrow().len(), 1);
    }

    #[test]
    fn test_complete_requires_auth() {
        let store = Rc::new(MemoryBackend::new());
        let mut service = idle_service(Rc::clone(&store));
        service.start(300).unwrap();
        let err = service.complete_session(None, "Calm", 3, None).unwrap_err();
        assert!(matches!(err, MindfulError::NotAuthenticated));
        assert!(store.calls.borrow().is_empty());
    }

    #[test]
    fn test_complete_requires_session() {
        let store = Rc::new(MemoryBackend::new());
        let mut service = idle_service(Rc::clone(&store));
        let auth = test_session("u-1");
        let err = service
            .complete_session(Some(&auth), "Calm", 3, None)
            .unwrap_err();
        assert!(matches!(err, MindfulError::InvalidState(_)));
    }

    #[test]
    fn test_complete_validates_reflection() {
        let store = Rc::new(MemoryBackend::new());
        let mut service = idle_service(Rc::clone(&store));
        let auth = test_session("u-1");
        service.start(300).unwrap();

        for rating in [0, 6] {
            let err = service
                .complete_session(Some(&auth), "Calm", rating, None)
                .unwrap_err();
            assert!(matches!(err, MindfulError::Validation(_)));
        }
        let err = service.complete_session(Some(&auth), "  ", 3, None).unwrap_err();
        assert!(matches!(err, MindfulError::Validation(_)));

        let long = "x".repeat(501);
        let err = service
            .complete_session(Some(&auth), "Calm", 3, Some(&long))
            .unwrap_err();
        assert!(matches!(err, MindfulError::Validation(_)));
        assert!(store.sessions.borrow().is_empty());
    }

    #[test]
    fn test_complete_while_running_stops_first() {
        let store = Rc::new(MemoryBackend::new());
        let mut service = idle_service(Rc::clone(&store));
        let auth = test_session("u-1");

        service.start(900).unwrap();
        assert!(service.has_live_ticker());
        service.complete_session(Some(&auth), "Calm", 4, None).unwrap();
        assert!(!service.has_live_ticker());
        assert_eq!(store.sessions.borrow()[0].duration, 900);
    }

    #[test]
    fn test_failed_streak_write_keeps_session_for_retry() {
        let store = Rc::new(MemoryBackend::new());
        let mut service = idle_service(Rc::clone(&store));
        let auth = test_session("u-1");

        service.start(600).unwrap();
        service.stop().unwrap();
        store.fail_next("upsert_streak");
        let err = service
            .complete_session(Some(&auth), "Calm", 4, None)
            .unwrap_err();
        assert!(matches!(err, MindfulError::Store(_)));

        // The insert is not rolled back
        assert_eq!(store.sessions.borrow().len(), 1);
        assert!(store.streaks.borrow().is_empty());
        assert_eq!(service.snapshot().phase, TimerPhase::Completed);
        assert!(service.current_session().unwrap().persisted);

        store.calls.borrow_mut().clear();
        service.complete_session(Some(&auth), "Calm", 4, None).unwrap();
        assert_eq!(store.sessions.borrow().len(), 1);
        assert!(!store.calls.borrow().contains(&"insert_session"));
        assert_eq!(store.streaks.borrow()["u-1"].current_streak, 1);
        assert!(service.current_session().is_none());
    }

    #[test]
    fn test_failed_cache_refresh_after_both_writes() {
        let store = Rc::new(MemoryBackend::new());
        let mut service = idle_service(Rc::clone(&store));
        let auth = test_session("u-1");

        service.start(600).unwrap();
        service.stop().unwrap();
        store.fail_next("sessions");
        let err = service
            .complete_session(Some(&auth), "Calm", 4, None)
            .unwrap_err();
        assert!(matches!(err, MindfulError::Store(_)));

        // Both writes landed and the session was handed over
        assert_eq!(store.sessions.borrow().len(), 1);
        assert_eq!(store.streaks.borrow()["u-1"].current_streak, 1);
        assert!(service.current_session().is_none());
        assert_eq!(service.snapshot().phase, TimerPhase::Idle);
        assert!(service.recent_sessions().is_empty());
    }

    #[test]
    fn test_second_session_same_day_keeps_streak() {
        let store = Rc::new(MemoryBackend::new());
        store.seed_streak(StreakRow {
            user_id: "u-1".to_string(),
            current_streak: 3,
            longest_streak: 8,
            last_meditation_date: Some(today()),
        });
        let mut service = idle_service(Rc::clone(&store));
        let auth = test_session("u-1");

        service.start(300).unwrap();
        service.stop().unwrap();
        let report = service.complete_session(Some(&auth), "Focused", 3, None).unwrap();

        assert_eq!(report.change, StreakChange::Unchanged);
        assert_eq!(report.streak.current_streak, 3);
        assert_eq!(report.streak.longest_streak, 8);
        assert!(store.calls.borrow().contains(&"upsert_streak"));
        assert_eq!(store.streaks.borrow()["u-1"], report.streak);
        assert_eq!(store.sessions.borrow().len(), 1);
    }

    #[test]
    fn test_failed_insert_stops_before_streak() {
        let store = Rc::new(MemoryBackend::new());
        let mut service = idle_service(Rc::clone(&store));
        let auth = test_session("u-1");

        service.start(600).unwrap();
        service.stop().unwrap();
        store.fail_next("insert_session");
        assert!(service.complete_session(Some(&auth), "Calm", 4, None).is_err());
        assert_eq!(*store.calls.borrow(), vec!["insert_session"]);
    }

    #[test]
    fn test_load_recent_requires_auth_and_caps() {
        let store = Rc::new(MemoryBackend::new());
        let auth = test_session("u-1");
        for minute in 0..15 {
            store.seed_session(SessionRecord {
                id: Some(minute.to_string()),
                user_id: "u-1".to_string(),
                duration: 60,
                completed: true,
                mood: None,
                rating: None,
                journal_text: None,
                created_at: chrono::DateTime::from_timestamp(1_700_000_000 + minute * 60, 0),
            });
        }
        let mut service = idle_service(Rc::clone(&store));

        assert!(matches!(
            service.load_recent_sessions(None),
            Err(MindfulError::NotAuthenticated)
        ));

        let recent = service.load_recent_sessions(Some(&auth)).unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].id.as_deref(), Some("14"));
        assert_eq!(recent[9].id.as_deref(), Some("5"));
    }

    #[test]
    fn test_ticker_drives_session_to_completion() {
        let store = Rc::new(MemoryBackend::new());
        let mut service = service_with(store, 1);
        let ticks = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&ticks);
        service.set_tick_listener(Some(Arc::new(move |snap: &TimerSnapshot| {
            assert!((0.0..=100.0).contains(&snap.progress));
            seen.fetch_add(1, Ordering::SeqCst);
        })));

        service.start(5).unwrap();
        wait_for(|| service.snapshot().phase == TimerPhase::Completed);

        let snap = service.snapshot();
        assert_eq!(snap.remaining, 0);
        assert_eq!(snap.progress, 100.0);
        assert_eq!(snap.duration, 5);

        assert!(service.reap_ticker());
        assert!(!service.has_live_ticker());
        assert!(!service.reap_ticker());
        assert_eq!(ticks.load(Ordering::SeqCst), 5);
        assert!(service.current_session().unwrap().completed);
    }

    #[test]
    fn test_expiry_is_reaped_while_last_callback_runs() {
        let store = Rc::new(MemoryBackend::new());
        let mut service = service_with(store, 1);
        service.set_tick_listener(Some(Arc::new(|snap: &TimerSnapshot| {
            if snap.phase == TimerPhase::Completed {
                std::thread::sleep(Duration::from_millis(50));
            }
        })));

        service.start(2).unwrap();
        wait_for(|| service.snapshot().phase == TimerPhase::Completed);
        // The task is still inside its final callback
        assert!(service.reap_ticker());
        assert!(!service.has_live_ticker());
        assert!(!service.reap_ticker());
    }

    #[test]
    fn test_stop_and_reset_tear_down_ticker() {
        let store = Rc::new(MemoryBackend::new());
        let mut service = service_with(store, 1);

        service.start(3600).unwrap();
        assert!(service.has_live_ticker());
        service.stop().unwrap();
        assert!(!service.has_live_ticker());
        let remaining = service.snapshot().remaining;
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(service.snapshot().remaining, remaining);
        assert!(!service.reap_ticker());

        service.start(3600).unwrap();
        service.reset();
        assert!(!service.has_live_ticker());
        assert_eq!(service.snapshot().phase, TimerPhase::Idle);
        assert_eq!(service.snapshot().remaining, 3600);
    }

    #[test]
    fn test_pause_freezes_live_countdown() {
        let store = Rc::new(MemoryBackend::new());
        let mut service = service_with(store, 1);

        service.start(3600).unwrap();
        wait_for(|| service.snapshot().remaining < 3600);
        service.pause().unwrap();
        let frozen = service.snapshot().remaining;
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(service.snapshot().remaining, frozen);
        assert!(service.snapshot().is_paused());

        service.resume().unwrap();
        wait_for(|| service.snapshot().remaining < frozen);
        service.shutdown();
        assert!(!service.has_live_ticker());
    }

    #[test]
    fn test_restart_replaces_ticker() {
        let store = Rc::new(MemoryBackend::new());
        let mut service = idle_service(store);
        service.start(60).unwrap();
        assert!(service.start(60).is_err());
        service.stop().unwrap();
        service.start(120).unwrap();
        assert!(service.has_live_ticker());
        assert_eq!(service.snapshot().duration, 120);
    }
}
