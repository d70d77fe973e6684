use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time;

use crate::error::Result;
use crate::who::{self, SessionRoster, WhoList, DEV_ROOT};

/// Whatever ends the node once it is judged idle.
#[async_trait]
pub trait Terminator: Send + Sync {
    async fn terminate(&self) -> Result<()>;
}

pub struct IdleWatcher<R, T> {
    roster: R,
    terminator: T,
    threshold: Duration,
    dev_root: PathBuf,
    dry_run: bool,
    sessions: WhoList,
}

impl<R: SessionRoster, T: Terminator> IdleWatcher<R, T> {
    pub fn new(roster: R, terminator: T, threshold: Duration) -> Self {
        Self {
            roster,
            terminator,
            threshold,
            dev_root: PathBuf::from(DEV_ROOT),
            dry_run: false,
            sessions: WhoList::new(),
        }
    }

    pub fn dev_root(mut self, dev_root: PathBuf) -> Self {
        self.dev_root = dev_root;
        self
    }

    /// Log every decision and never actually terminate.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn sessions(&self) -> &WhoList {
        &self.sessions
    }

    /// Takes the first roster so sessions present at startup are tracked.
    pub async fn prime(&mut self) {
        if let Err(e) = who::update(&mut self.sessions, &self.roster, &self.dev_root).await {
            warn!("can't list sessions: {}", e);
        }
        if self.dry_run {
            info!("starting sessions {:?}", self.sessions);
        }
    }

    /// Refreshes the roster and decides whether the node is idle at `now`.
    /// A roster failure counts as not idle.
    pub async fn evaluate(&mut self, now: SystemTime) -> bool {
        if let Err(e) = who::update(&mut self.sessions, &self.roster, &self.dev_root).await {
            warn!("can't list sessions: {}", e);
            return false;
        }
        who::are_idle(&self.sessions, self.threshold, now)
    }

    /// Runs until the process exits. Every activity signal restarts the idle
    /// timer; a timer that fires unopposed triggers an evaluation.
    pub async fn run(mut self, mut activity: UnboundedReceiver<()>) {
        if self.dry_run {
            info!("waiting for {:?}", self.threshold);
        }
        loop {
            let timer = time::sleep(self.threshold);
            tokio::pin!(timer);

            tokio::select! {
                biased;
                Some(()) = activity.recv() => {
                    if self.dry_run {
                        info!("saw activity, resetting timer");
                    }
                    continue;
                }
                _ = &mut timer => {}
            }

            if !self.evaluate(SystemTime::now()).await {
                if self.dry_run {
                    info!("not idle");
                }
                continue;
            }

            // Activity that landed while we were evaluating wins.
            if drain(&mut activity) {
                debug!("activity during evaluation, staying up");
                continue;
            }

            if self.dry_run {
                info!("idle: would end the session now");
                continue;
            }
            info!("idle for {:?}, ending session", self.threshold);
            if let Err(e) = self.terminator.terminate().await {
                error!("failed to end session: {}", e);
            }
        }
    }
}

/// Empties the channel, reporting whether anything was in it.
fn drain(activity: &mut UnboundedReceiver<()>) -> bool {
    let mut seen = false;
    while activity.try_recv().is_ok() {
        seen = true;
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    use crate::error::Error;

    const THRESHOLD: Duration = Duration::from_secs(15 * 60);

    fn mins(m: u64) -> Duration {
        Duration::from_secs(60 * m)
    }

    struct Roster(Result<&'static str, ()>);

    #[async_trait]
    impl SessionRoster for Roster {
        async fn list_sessions(&self) -> Result<Vec<u8>> {
            match self.0 {
                Ok(out) => Ok(out.as_bytes().to_vec()),
                Err(()) => Err(Error::Metadata("who is broken".into())),
            }
        }
    }

    #[derive(Clone, Default)]
    struct Counter(Arc<AtomicUsize>);

    impl Counter {
        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Terminator for Counter {
        async fn terminate(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn tty_aged(dir: &std::path::Path, name: &str, age: Duration, now: SystemTime) {
        let path = dir.join("pts").join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let f = fs::File::create(&path).unwrap();
        f.set_modified(now - age).unwrap();
    }

    #[tokio::test]
    async fn old_session_is_idle_fresh_one_is_not() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        tty_aged(dir.path(), "0", mins(20), now);
        tty_aged(dir.path(), "1", mins(1), now);

        let mut watcher = IdleWatcher::new(
            Roster(Ok("dean pts/0 2022-11-20 18:02\n")),
            Counter::default(),
            THRESHOLD,
        )
        .dev_root(dir.path().to_path_buf());
        assert!(watcher.evaluate(now).await);

        let mut watcher = IdleWatcher::new(
            Roster(Ok("dean pts/0 2022-11-20 18:02\ndean pts/1 2022-11-20 18:40\n")),
            Counter::default(),
            THRESHOLD,
        )
        .dev_root(dir.path().to_path_buf());
        assert!(!watcher.evaluate(now).await);
        assert_eq!(watcher.sessions().len(), 2);
    }

    #[tokio::test]
    async fn roster_failure_is_not_idle() {
        let mut watcher = IdleWatcher::new(Roster(Err(())), Counter::default(), THRESHOLD);
        assert!(!watcher.evaluate(SystemTime::now()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_node_is_ended_once_per_window() {
        let counter = Counter::default();
        let (_tx, rx) = mpsc::unbounded_channel();
        let watcher = IdleWatcher::new(Roster(Ok("")), counter.clone(), THRESHOLD);
        let task = tokio::spawn(watcher.run(rx));

        time::sleep(THRESHOLD - mins(1)).await;
        assert_eq!(counter.count(), 0);
        time::sleep(mins(2)).await;
        assert_eq!(counter.count(), 1);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn busy_node_stays_up() {
        let dir = tempfile::tempdir().unwrap();
        let counter = Counter::default();
        let (_tx, rx) = mpsc::unbounded_channel();
        let watcher = IdleWatcher::new(
            Roster(Ok("dean pts/0 2022-11-20 18:02\n")),
            counter.clone(),
            THRESHOLD,
        )
        .dev_root(dir.path().to_path_buf());
        tty_aged(dir.path(), "0", Duration::ZERO, SystemTime::now());
        let task = tokio::spawn(watcher.run(rx));

        time::sleep(THRESHOLD * 3 + mins(1)).await;
        assert_eq!(counter.count(), 0);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn activity_restarts_the_timer() {
        let counter = Counter::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = IdleWatcher::new(Roster(Ok("")), counter.clone(), THRESHOLD);
        let task = tokio::spawn(watcher.run(rx));

        time::sleep(mins(10)).await;
        tx.send(()).unwrap();
        time::sleep(mins(6)).await;
        assert_eq!(counter.count(), 0);
        time::sleep(mins(10)).await;
        assert_eq!(counter.count(), 1);
        task.abort();
    }

    /// An empty roster that reports activity on the keep-alive channel
    /// each time it is listed.
    struct BusyWhileListing {
        activity: mpsc::UnboundedSender<()>,
        listed: Counter,
    }

    #[async_trait]
    impl SessionRoster for BusyWhileListing {
        async fn list_sessions(&self) -> Result<Vec<u8>> {
            self.listed.0.fetch_add(1, Ordering::SeqCst);
            let _ = self.activity.send(());
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn activity_during_evaluation_cancels_teardown() {
        let counter = Counter::default();
        let listed = Counter::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let roster = BusyWhileListing {
            activity: tx,
            listed: listed.clone(),
        };
        let watcher = IdleWatcher::new(roster, counter.clone(), Duration::from_secs(60));
        let task = tokio::spawn(watcher.run(rx));

        time::sleep(Duration::from_secs(61)).await;
        assert_eq!(listed.count(), 1);
        assert_eq!(counter.count(), 0);

        time::sleep(Duration::from_secs(120)).await;
        assert!(listed.count() >= 2);
        assert_eq!(counter.count(), 0);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn dry_run_never_terminates() {
        let counter = Counter::default();
        let (_tx, rx) = mpsc::unbounded_channel();
        let watcher = IdleWatcher::new(Roster(Ok("")), counter.clone(), THRESHOLD).dry_run(true);
        let task = tokio::spawn(watcher.run(rx));

        time::sleep(THRESHOLD * 2 + mins(1)).await;
        assert_eq!(counter.count(), 0);
        task.abort();
    }

    #[test]
    fn drain_reports_pending_activity() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(!drain(&mut rx));
        tx.send(()).unwrap();
        tx.send(()).unwrap();
        assert!(drain(&mut rx));
        assert!(!drain(&mut rx));
    }
}
