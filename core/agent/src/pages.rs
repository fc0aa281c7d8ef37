//! Page host: where the channel manager sends codes to be filled.
//!
//! Each page gets its own worker task owning a [`FillEngine`]. Commands to a
//! page are queued FIFO and handled one at a time, so at most one fill is in
//! flight per page and DOM writes never interleave. The channel manager only
//! ever talks to pages through this module's message queues.

use fill_core::{
    apply_best_effort, log_outcome, ElementId, FillEngine, FillOptions, FillOutcome, MissReason,
    MutationWatcher, PageContext,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::pending;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub u64);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page-{}", self.0)
    }
}

/// The channel manager's view of the pages.
pub trait PageHost: Send + Sync + 'static {
    /// Queues a fill on the active page. `None` means there is no active page,
    /// which is a no-op rather than an error.
    fn submit_fill(&self, code: String) -> Option<oneshot::Receiver<FillOutcome>>;

    fn active_page(&self) -> Option<PageId>;
}

enum PageCommand {
    Fill {
        code: String,
        reply: oneshot::Sender<FillOutcome>,
    },
    DomMutated {
        inserted_roots: Vec<ElementId>,
    },
}

#[derive(Clone)]
pub struct PageHandle {
    id: PageId,
    commands: mpsc::UnboundedSender<PageCommand>,
}

impl PageHandle {
    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn fill(&self, code: String) -> Option<oneshot::Receiver<FillOutcome>> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(PageCommand::Fill { code, reply })
            .ok()
            .map(|_| outcome)
    }

    /// Reports subtrees the page inserted after load.
    pub fn dom_mutated(&self, inserted_roots: Vec<ElementId>) -> bool {
        self.commands
            .send(PageCommand::DomMutated { inserted_roots })
            .is_ok()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Local Pages
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct Registry {
    pages: BTreeMap<PageId, PageHandle>,
    active: Option<PageId>,
    next_id: u64,
}

/// In-process pages, each driven by a tokio worker.
pub struct LocalPages {
    options: FillOptions,
    registry: Mutex<Registry>,
}

impl LocalPages {
    pub fn new(options: FillOptions) -> Self {
        Self {
            options,
            registry: Mutex::new(Registry::default()),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        match self.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Starts a worker for `page` and makes it the active page.
    pub fn open<P>(&self, page: P) -> PageHandle
    where
        P: PageContext + Send + 'static,
    {
        let mut registry = self.registry();
        let id = PageId(registry.next_id);
        registry.next_id += 1;

        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_page_worker(id, page, self.options.clone(), rx));

        let handle = PageHandle { id, commands };
        registry.pages.insert(id, handle.clone());
        registry.active = Some(id);
        debug!(page = %id, "Page opened");
        handle
    }

    /// Makes `id` the page that receives fills. `false` when it is not open.
    pub fn activate(&self, id: PageId) -> bool {
        let mut registry = self.registry();
        if registry.pages.contains_key(&id) {
            registry.active = Some(id);
            true
        } else {
            false
        }
    }

    /// Stops the page's worker once its queue drains.
    pub fn close(&self, id: PageId) {
        let mut registry = self.registry();
        registry.pages.remove(&id);
        if registry.active == Some(id) {
            registry.active = None;
        }
    }
}

impl PageHost for LocalPages {
    fn submit_fill(&self, code: String) -> Option<oneshot::Receiver<FillOutcome>> {
        let handle = {
            let registry = self.registry();
            registry.active.and_then(|id| registry.pages.get(&id).cloned())
        };
        match handle {
            Some(handle) => {
                let outcome = handle.fill(code);
                if outcome.is_none() {
                    warn!(page = %handle.id(), "Page worker stopped; fill dropped");
                }
                outcome
            }
            None => {
                info!("No active page; fill skipped");
                None
            }
        }
    }

    fn active_page(&self) -> Option<PageId> {
        self.registry().active
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Worker
// ═══════════════════════════════════════════════════════════════════════════════

async fn run_page_worker<P: PageContext + Send>(
    id: PageId,
    mut page: P,
    options: FillOptions,
    mut commands: mpsc::UnboundedReceiver<PageCommand>,
) {
    let refill_on_late_field = options.refill_on_late_field;
    let mut engine = FillEngine::new(options);
    let mut watcher = MutationWatcher::new();
    let mut effects_started = Instant::now();
    let mut last_failed: Option<String> = None;

    loop {
        let deadline = engine
            .next_deadline()
            .map(|delay| effects_started + delay);

        tokio::select! {
            command = commands.recv() => match command {
                Some(PageCommand::Fill { code, reply }) => {
                    let outcome = run_fill(&mut engine, &mut page, &code, &mut effects_started).await;
                    last_failed = outcome.needs_copy_fallback().then(|| code);
                    let _ = reply.send(outcome);
                }
                Some(PageCommand::DomMutated { inserted_roots }) => {
                    let snapshot = match page.snapshot() {
                        Ok(snapshot) => snapshot,
                        Err(e) => {
                            warn!(page = %id, error = %e, "Snapshot after mutation failed");
                            continue;
                        }
                    };
                    if watcher.observe(&snapshot, &inserted_roots).is_none() {
                        continue;
                    }
                    if !refill_on_late_field {
                        continue;
                    }
                    if let Some(code) = last_failed.take() {
                        info!(page = %id, "Retrying last code on late OTP field");
                        let outcome = run_fill(&mut engine, &mut page, &code, &mut effects_started).await;
                        if outcome.filled {
                            watcher.reset();
                        } else {
                            last_failed = Some(code);
                        }
                    }
                }
                None => break,
            },
            _ = wait_until(deadline) => {
                engine.advance(&mut page, effects_started.elapsed());
            }
        }
    }

    // Revert lingering effects before the worker exits.
    engine.advance(&mut page, Duration::MAX);
    debug!(page = %id, "Page worker stopped");
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

/// Plans a fill and runs the commit half on the clock: focus moves wait for
/// their stagger delay.
async fn run_fill<P: PageContext + Send>(
    engine: &mut FillEngine,
    page: &mut P,
    code: &str,
    effects_started: &mut Instant,
) -> FillOutcome {
    let snapshot = match page.snapshot() {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "Page snapshot unavailable, skipping fill");
            return FillOutcome::missed(MissReason::Delivery);
        }
    };

    // Detection is CPU-bound on large pages; keep it off the runtime threads.
    let planner = engine.planner();
    let planned_code = code.to_string();
    let plan = match task::spawn_blocking(move || planner.plan(&snapshot, &planned_code)).await {
        Ok(plan) => plan,
        Err(e) => {
            warn!(error = %e, "Fill planning task failed");
            return FillOutcome::missed(MissReason::Delivery);
        }
    };
    if plan.script.is_empty() {
        return plan.outcome;
    }

    apply_best_effort(page, engine.begin(&plan.script));
    let start = Instant::now();
    *effects_started = start;

    for timed in &plan.script.commit {
        if !timed.delay.is_zero() {
            sleep_until(start + timed.delay).await;
        }
        if let Err(e) = page.apply(&timed.op) {
            let outcome = engine.recover(page, code, e);
            *effects_started = Instant::now();
            return outcome;
        }
    }

    log_outcome(&plan.outcome, code);
    plan.outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use fill_core::{Element, MemoryPage, OverlayKind, PageSnapshot, Strategy};
    use std::sync::Arc;

    fn otp_page() -> Arc<Mutex<MemoryPage>> {
        let mut dom = PageSnapshot::default();
        let form = dom.push(None, Element::new("form"));
        for index in 0..6 {
            dom.push(
                Some(form),
                Element::new("input")
                    .with_attr("maxlength", "1")
                    .with_rect(index as f64 * 50.0, 200.0, 44.0, 44.0),
            );
        }
        Arc::new(Mutex::new(MemoryPage::new(dom)))
    }

    fn values(page: &Arc<Mutex<MemoryPage>>) -> String {
        let page = page.lock().unwrap();
        page.dom()
            .inputs()
            .map(|input| input.value.clone())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn no_active_page_is_a_noop() {
        let pages = LocalPages::new(FillOptions::default());
        assert!(pages.submit_fill("123456".to_string()).is_none());
        assert_eq!(pages.active_page(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn fills_active_page_and_reverts_effects() {
        let pages = LocalPages::new(FillOptions::default());
        let page = otp_page();
        pages.open(Arc::clone(&page));

        let outcome = pages
            .submit_fill("123456".to_string())
            .unwrap()
            .await
            .unwrap();
        assert!(outcome.filled);
        assert_eq!(values(&page), "123456");
        assert!(page.lock().unwrap().highlighted().count() > 0);

        tokio::time::sleep(Duration::from_secs(4)).await;
        let page = page.lock().unwrap();
        assert_eq!(page.highlighted().count(), 0);
        assert!(page.overlays().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fills_go_to_the_activated_page() {
        let pages = LocalPages::new(FillOptions::default());
        let background = otp_page();
        let first = pages.open(Arc::clone(&background));
        let foreground = otp_page();
        pages.open(Arc::clone(&foreground));

        assert!(pages.activate(first.id()));
        assert!(!pages.activate(PageId(99)));
        assert_eq!(pages.active_page(), Some(first.id()));

        pages
            .submit_fill("135790".to_string())
            .unwrap()
            .await
            .unwrap();
        assert_eq!(values(&background), "135790");
        assert_eq!(values(&foreground), "");
    }

    #[tokio::test(start_paused = true)]
    async fn focus_advance_is_staggered() {
        let pages = LocalPages::new(FillOptions::default());
        let page = otp_page();
        pages.open(Arc::clone(&page));

        let started = Instant::now();
        pages
            .submit_fill("123456".to_string())
            .unwrap()
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_fills_run_in_order() {
        let pages = LocalPages::new(FillOptions::default());
        let page = otp_page();
        pages.open(Arc::clone(&page));

        let first = pages.submit_fill("111111".to_string()).unwrap();
        let second = pages.submit_fill("222222".to_string()).unwrap();

        let first = first.await.unwrap();
        assert_eq!(first.strategy, Some(Strategy::SplitRow));
        // The filled row no longer qualifies as a split group, so the second
        // code lands through the last-resort rewrite.
        let second = second.await.unwrap();
        assert_eq!(second.strategy, Some(Strategy::LastResortSplit));
        assert_eq!(values(&page), "222222");
        let page = page.lock().unwrap();
        assert!(page
            .overlays()
            .iter()
            .all(|overlay| overlay.kind() == OverlayKind::SuccessBanner));
    }

    #[tokio::test(start_paused = true)]
    async fn late_field_refills_when_enabled() {
        let options = FillOptions {
            refill_on_late_field: true,
            ..FillOptions::default()
        };
        let pages = LocalPages::new(options);
        let page = Arc::new(Mutex::new(MemoryPage::new(PageSnapshot::default())));
        let handle = pages.open(Arc::clone(&page));

        let outcome = pages.submit_fill("424242".to_string()).unwrap().await.unwrap();
        assert!(!outcome.filled);

        let (dialog, field) = {
            let mut page = page.lock().unwrap();
            let dialog = page.insert(None, Element::new("div").with_text("Enter verification code"));
            let field = page.insert(
                Some(dialog),
                Element::new("input")
                    .with_attr("name", "otp")
                    .with_rect(0.0, 100.0, 200.0, 32.0),
            );
            (dialog, field)
        };
        assert!(handle.dom_mutated(vec![dialog]));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(page.lock().unwrap().value(field), Some("424242"));
    }
}
