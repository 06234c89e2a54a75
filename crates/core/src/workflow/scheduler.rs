//! Concurrent execution of a [`Dag`].
//!
//! A run owns a FIFO ready-queue, one [`CompletionSignal`] per vertex and a
//! fixed pool of `concurrency` workers. Each worker dequeues a ready vertex,
//! runs its work through [`run_bounded`] with the vertex timeout, records the
//! result and closes the vertex signal. A helper task then examines the
//! vertex's children: a child is enqueued once every other parent has been
//! picked up and its signal has closed, so the parent that finishes last
//! drives the child. The first failure halts the run: workers stop dequeuing,
//! in-flight vertices finish or time out on their own, and `execute` returns
//! that failure.

use super::dag::Dag;
use super::signal::CompletionSignal;
use super::waiter::{run_bounded, WaitError};
use crate::error::{DagError, DagResult};
use crate::types::{Results, VertexKey};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

impl Dag {
    /// Run the dag to completion.
    ///
    /// `initial` seeds the result accumulator (a nested dag receives its
    /// parent's results here) and is visible to every vertex. On success the
    /// returned map holds the initial entries plus one entry per vertex.
    pub async fn execute(self, initial: Results) -> DagResult<Results> {
        self.validate()?;

        let workers = self.concurrency().min(self.len()).max(1);
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let run = Arc::new(RunState::new(self, initial, ready_tx));
        // halts helpers even when this future is dropped mid-run
        let _halt_on_drop = run.halt.clone().drop_guard();

        for root in run.dag.roots() {
            run.enqueue(root.key.clone());
        }

        let queue = Arc::new(Mutex::new(ready_rx));
        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            pool.spawn(worker(run.clone(), queue.clone(), worker_id));
        }

        tokio::select! {
            _ = run.done.wait() => {}
            _ = run.halt.cancelled() => {}
        }
        // stop idle workers; busy ones exit after their current vertex
        run.halt.cancel();

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "scheduler worker aborted");
            }
        }
        let mut helpers = std::mem::take(&mut *run.helpers.lock().await);
        while helpers.join_next().await.is_some() {}

        if let Some(err) = run.failure.lock().await.take() {
            return Err(err);
        }

        let results = std::mem::take(&mut *run.results.write().await);
        Ok(results)
    }
}

/// Shared state of a single run
struct RunState {
    dag: Dag,
    signals: HashMap<VertexKey, CompletionSignal>,
    visited: Mutex<HashSet<VertexKey>>,
    results: RwLock<Results>,
    ready_tx: mpsc::UnboundedSender<VertexKey>,
    remaining: AtomicUsize,
    done: CompletionSignal,
    halt: CancellationToken,
    failure: Mutex<Option<DagError>>,
    helpers: Mutex<JoinSet<()>>,
}

impl RunState {
    fn new(dag: Dag, initial: Results, ready_tx: mpsc::UnboundedSender<VertexKey>) -> Self {
        let signals = dag
            .vertices()
            .map(|v| (v.key.clone(), CompletionSignal::new()))
            .collect();
        let remaining = AtomicUsize::new(dag.len());

        Self {
            dag,
            signals,
            visited: Mutex::new(HashSet::new()),
            results: RwLock::new(initial),
            ready_tx,
            remaining,
            done: CompletionSignal::new(),
            halt: CancellationToken::new(),
            failure: Mutex::new(None),
            helpers: Mutex::new(JoinSet::new()),
        }
    }

    fn enqueue(&self, key: VertexKey) {
        if self.halt.is_cancelled() {
            return;
        }
        // the receiver outlives every sender use; a failed send means the run is over
        let _ = self.ready_tx.send(key);
    }

    /// Mark a vertex as picked up. Returns `false` for a duplicate push.
    async fn mark_visited(&self, key: &VertexKey) -> bool {
        self.visited.lock().await.insert(key.clone())
    }

    async fn is_visited(&self, key: &VertexKey) -> bool {
        self.visited.lock().await.contains(key)
    }

    /// Record the first failure and halt the run.
    async fn fail(&self, err: DagError) {
        let mut failure = self.failure.lock().await;
        if failure.is_none() {
            tracing::error!(vertex = ?err.vertex(), error = %err, "dag run failed");
            *failure = Some(err);
        } else {
            tracing::debug!(error = %err, "ignoring failure after the run was halted");
        }
        self.halt.cancel();
    }

    async fn run_vertex(self: &Arc<Self>, key: VertexKey) {
        let Some(vertex) = self.dag.vertex(&key) else {
            tracing::warn!(vertex = %key, "dequeued unknown vertex");
            return;
        };

        let snapshot = self.results.read().await.clone();
        let work = vertex.work.clone();
        let started = Instant::now();
        tracing::debug!("running vertex");

        let outcome = run_bounded(async move { work.run(snapshot).await }, vertex.timeout).await;

        match outcome {
            Ok(value) => {
                self.results.write().await.insert(key.clone(), value);
                self.close_signal(&key);
                let elapsed_ms = started.elapsed().as_millis() as u64;
                tracing::debug!(elapsed_ms, "vertex completed");

                if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    self.done.close();
                    return;
                }
                self.schedule_children(key).await;
            }
            Err(WaitError::TimedOut(timeout)) => {
                tracing::warn!(?timeout, "vertex timed out");
                self.fail(DagError::Timeout {
                    vertex: key.clone(),
                    timeout,
                })
                .await;
                self.close_signal(&key);
            }
            Err(WaitError::Failed(source)) => {
                self.fail(DagError::Work {
                    vertex: key.clone(),
                    source,
                })
                .await;
                self.close_signal(&key);
            }
            Err(WaitError::Panicked(reason)) => {
                self.fail(DagError::Work {
                    vertex: key.clone(),
                    source: anyhow::anyhow!(reason),
                })
                .await;
                self.close_signal(&key);
            }
        }
    }

    fn close_signal(&self, key: &VertexKey) {
        if let Some(signal) = self.signals.get(key) {
            signal.close();
        }
    }

    /// Examine the children of a completed vertex on a helper task.
    async fn schedule_children(self: &Arc<Self>, parent: VertexKey) {
        let children = match self.dag.vertex(&parent) {
            Some(vertex) if !vertex.children().is_empty() => vertex.children().to_vec(),
            _ => return,
        };

        let run = self.clone();
        let span = tracing::info_span!("schedule_children", vertex = %parent);
        let mut helpers = self.helpers.lock().await;
        // drop finished helpers so the set does not grow with the dag
        while helpers.try_join_next().is_some() {}
        helpers.spawn(
            async move {
                for child in children {
                    if run.halt.is_cancelled() {
                        return;
                    }
                    if run.parents_settled(&parent, &child).await {
                        tracing::debug!(child = %child, "child ready");
                        run.enqueue(child);
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Whether every parent of `child` other than `finished` has completed.
    ///
    /// A parent that has not been picked up yet will schedule the child
    /// itself when it finishes. A parent that is running is waited for.
    async fn parents_settled(&self, finished: &VertexKey, child: &VertexKey) -> bool {
        let Some(vertex) = self.dag.vertex(child) else {
            return false;
        };

        for parent in vertex.parents() {
            if parent == finished {
                continue;
            }
            if !self.is_visited(parent).await {
                return false;
            }
            let Some(signal) = self.signals.get(parent) else {
                return false;
            };
            tokio::select! {
                _ = signal.wait() => {}
                _ = self.halt.cancelled() => return false,
            }
        }

        true
    }
}

async fn worker(
    run: Arc<RunState>,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<VertexKey>>>,
    worker_id: usize,
) {
    loop {
        let key = {
            let mut rx = queue.lock().await;
            tokio::select! {
                biased;
                _ = run.halt.cancelled() => return,
                key = rx.recv() => match key {
                    Some(key) => key,
                    None => return,
                },
            }
        };

        if run.halt.is_cancelled() {
            return;
        }
        if !run.mark_visited(&key).await {
            tracing::debug!(vertex = %key, "skipping already visited vertex");
            continue;
        }

        let span = tracing::info_span!("vertex", vertex = %key, worker = worker_id);
        run.run_vertex(key).instrument(span).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::vertex::{work_fn, Vertex};
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn key(k: &str) -> VertexKey {
        VertexKey::new(k)
    }

    fn int(results: &Results, k: &str) -> anyhow::Result<i64> {
        results
            .get(&key(k))
            .and_then(Value::as_i64)
            .ok_or_else(|| anyhow::anyhow!("missing result for {}", k))
    }

    /// Start/end instants recorded per vertex
    #[derive(Default, Clone)]
    struct Timeline(Arc<StdMutex<HashMap<String, (Instant, Instant)>>>);

    impl Timeline {
        fn record(&self, k: &str, start: Instant) {
            self.0
                .lock()
                .unwrap()
                .insert(k.to_string(), (start, Instant::now()));
        }

        fn get(&self, k: &str) -> (Instant, Instant) {
            self.0.lock().unwrap()[k]
        }

        fn contains(&self, k: &str) -> bool {
            self.0.lock().unwrap().contains_key(k)
        }
    }

    /// A(1) -> B(A+1), C(A+2) -> D(B+C), with an optional failing C
    fn diamond(timeline: &Timeline, fail_c: bool, delay: Duration) -> Dag {
        let mut dag = Dag::new();

        let t = timeline.clone();
        dag.add_vertex(Vertex::new(
            "A",
            work_fn(move |_| {
                let t = t.clone();
                async move {
                    let start = Instant::now();
                    tokio::time::sleep(delay).await;
                    t.record("A", start);
                    Ok(json!(1))
                }
            }),
            Duration::from_secs(5),
        ));

        let t = timeline.clone();
        dag.add_vertex(Vertex::new(
            "B",
            work_fn(move |results| {
                let t = t.clone();
                async move {
                    let start = Instant::now();
                    tokio::time::sleep(delay).await;
                    let value = int(&results, "A")? + 1;
                    t.record("B", start);
                    Ok(json!(value))
                }
            }),
            Duration::from_secs(5),
        ));

        let t = timeline.clone();
        dag.add_vertex(Vertex::new(
            "C",
            work_fn(move |results| {
                let t = t.clone();
                async move {
                    let start = Instant::now();
                    tokio::time::sleep(delay * 2).await;
                    if fail_c {
                        anyhow::bail!("c exploded");
                    }
                    let value = int(&results, "A")? + 2;
                    t.record("C", start);
                    Ok(json!(value))
                }
            }),
            Duration::from_secs(5),
        ));

        let t = timeline.clone();
        dag.add_vertex(Vertex::new(
            "D",
            work_fn(move |results| {
                let t = t.clone();
                async move {
                    let start = Instant::now();
                    let value = int(&results, "B")? + int(&results, "C")?;
                    t.record("D", start);
                    Ok(json!(value))
                }
            }),
            Duration::from_secs(5),
        ));

        dag.add_edge(&key("A"), &key("B")).unwrap();
        dag.add_edge(&key("A"), &key("C")).unwrap();
        dag.add_edge(&key("B"), &key("D")).unwrap();
        dag.add_edge(&key("C"), &key("D")).unwrap();
        dag
    }

    #[tokio::test]
    async fn test_diamond_results() {
        let timeline = Timeline::default();
        let dag = diamond(&timeline, false, Duration::from_millis(10));

        let results = dag.execute(Results::new()).await.unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(results[&key("A")], json!(1));
        assert_eq!(results[&key("B")], json!(2));
        assert_eq!(results[&key("C")], json!(3));
        assert_eq!(results[&key("D")], json!(5));

        // D starts only after both B and C finished
        let (d_start, _) = timeline.get("D");
        assert!(d_start >= timeline.get("B").1);
        assert!(d_start >= timeline.get("C").1);
        assert!(timeline.get("B").0 >= timeline.get("A").1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_stops_descendants() {
        let timeline = Timeline::default();
        let dag = diamond(&timeline, true, Duration::from_millis(10));

        let err = dag.execute(Results::new()).await.unwrap_err();

        match err {
            DagError::Work { vertex, source } => {
                assert_eq!(vertex, key("C"));
                assert!(source.to_string().contains("c exploded"));
            }
            other => panic!("expected work error, got {:?}", other),
        }
        assert!(timeline.contains("B"));
        assert!(!timeline.contains("D"));
    }

    #[tokio::test]
    async fn test_concurrency_limit_does_not_change_results() {
        let serial = diamond(&Timeline::default(), false, Duration::from_millis(5))
            .with_concurrency(1)
            .execute(Results::new())
            .await
            .unwrap();
        let parallel = diamond(&Timeline::default(), false, Duration::from_millis(5))
            .with_concurrency(10)
            .execute(Results::new())
            .await
            .unwrap();

        assert_eq!(serial, parallel);
    }

    /// Build `n` independent roots that track how many run at once.
    fn fan(n: usize, hold: Duration, running: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> Dag {
        let mut dag = Dag::new();
        for i in 0..n {
            let running = running.clone();
            let peak = peak.clone();
            dag.add_vertex(Vertex::new(
                format!("v{}", i),
                work_fn(move |_| {
                    let running = running.clone();
                    let peak = peak.clone();
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(hold).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(json!(i))
                    }
                }),
                Duration::from_secs(5),
            ));
        }
        dag
    }

    #[tokio::test]
    async fn test_independent_branches_overlap() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let dag = fan(4, Duration::from_millis(50), running, peak.clone()).with_concurrency(4);

        let results = dag.execute(Results::new()).await.unwrap();

        assert_eq!(results.len(), 4);
        assert!(peak.load(Ordering::SeqCst) > 1, "branches ran serially");
    }

    #[tokio::test]
    async fn test_concurrency_bound_is_respected() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let dag = fan(8, Duration::from_millis(20), running, peak.clone()).with_concurrency(3);

        let results = dag.execute(Results::new()).await.unwrap();

        assert_eq!(results.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_names_vertex() {
        let mut dag = Dag::new();
        dag.add_vertex(Vertex::new(
            "fast",
            work_fn(|_| async { Ok(json!("ok")) }),
            Duration::from_secs(1),
        ));
        dag.add_vertex(Vertex::new(
            "slow",
            work_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(json!("late"))
            }),
            Duration::from_millis(100),
        ));

        let err = dag.execute(Results::new()).await.unwrap_err();
        match err {
            DagError::Timeout { vertex, timeout } => {
                assert_eq!(vertex, key("slow"));
                assert_eq!(timeout, Duration::from_millis(100));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initial_results_visible_to_all_vertices() {
        let mut dag = Dag::new();
        dag.add_vertex(Vertex::new(
            "root",
            work_fn(|results| async move { Ok(json!(int(&results, "seed")? * 2)) }),
            Duration::from_secs(1),
        ));
        dag.add_vertex(Vertex::new(
            "leaf",
            work_fn(|results| async move {
                Ok(json!(int(&results, "seed")? + int(&results, "root")?))
            }),
            Duration::from_secs(1),
        ));
        dag.add_edge(&key("root"), &key("leaf")).unwrap();

        let initial = Results::from([(key("seed"), json!(10))]);
        let results = dag.execute(initial).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[&key("seed")], json!(10));
        assert_eq!(results[&key("root")], json!(20));
        assert_eq!(results[&key("leaf")], json!(30));
    }

    #[tokio::test]
    async fn test_nested_dag_receives_parent_results() {
        let mut dag = Dag::new();
        dag.add_vertex(Vertex::new(
            "outer",
            work_fn(|_| async { Ok(json!(4)) }),
            Duration::from_secs(1),
        ));
        dag.add_vertex(Vertex::new(
            "nested",
            work_fn(|results| async move {
                let mut inner = Dag::new();
                inner.add_vertex(Vertex::new(
                    "inner",
                    work_fn(|results| async move { Ok(json!(int(&results, "outer")? * 10)) }),
                    Duration::from_secs(1),
                ));
                let inner_results = inner.execute(results).await?;
                Ok(inner_results[&key("inner")].clone())
            }),
            Duration::from_secs(1),
        ));
        dag.add_edge(&key("outer"), &key("nested")).unwrap();

        let results = dag.execute(Results::new()).await.unwrap();
        assert_eq!(results[&key("nested")], json!(40));
    }

    #[tokio::test]
    async fn test_cycle_fails_fast() {
        let mut dag = Dag::new();
        for k in ["root", "x", "y"] {
            dag.add_vertex(Vertex::new(
                k,
                work_fn(|_| async { Ok(json!(null)) }),
                Duration::from_secs(1),
            ));
        }
        dag.add_edge(&key("root"), &key("x")).unwrap();
        dag.add_edge(&key("x"), &key("y")).unwrap();
        dag.add_edge(&key("y"), &key("x")).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), dag.execute(Results::new()))
            .await
            .expect("cyclic dag deadlocked");
        assert!(matches!(result, Err(DagError::Cycle { .. })));
    }

    #[tokio::test]
    async fn test_no_roots_runs_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut dag = Dag::new();
        for k in ["a", "b"] {
            let calls = calls.clone();
            dag.add_vertex(Vertex::new(
                k,
                work_fn(move |_| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(json!(null))
                    }
                }),
                Duration::from_secs(1),
            ));
        }
        dag.add_edge(&key("a"), &key("b")).unwrap();
        dag.add_edge(&key("b"), &key("a")).unwrap();

        let err = dag.execute(Results::new()).await.unwrap_err();
        assert!(matches!(err, DagError::NoRoots));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wide_join_runs_child_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut dag = Dag::new().with_concurrency(8);
        for i in 0..6 {
            dag.add_vertex(Vertex::new(
                format!("p{}", i),
                work_fn(move |_| async move {
                    tokio::time::sleep(Duration::from_millis(5 * (i % 3))).await;
                    Ok(json!(i))
                }),
                Duration::from_secs(1),
            ));
        }
        let counter = calls.clone();
        dag.add_vertex(Vertex::new(
            "join",
            work_fn(move |results| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let sum: i64 = (0..6)
                        .map(|i| int(&results, &format!("p{}", i)))
                        .sum::<anyhow::Result<i64>>()?;
                    Ok(json!(sum))
                }
            }),
            Duration::from_secs(1),
        ));
        for i in 0..6 {
            dag.add_edge(&key(&format!("p{}", i)), &key("join")).unwrap();
        }

        let results = dag.execute(Results::new()).await.unwrap();
        assert_eq!(results[&key("join")], json!(15));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Sets its flag when the owning closure is dropped
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_run_releases_dag() {
        let released = Arc::new(AtomicBool::new(false));
        let mut dag = Dag::new();
        dag.add_vertex(Vertex::new(
            "root",
            work_fn(|_| async { Ok(json!(0)) }),
            Duration::from_secs(5),
        ));
        dag.add_vertex(Vertex::new(
            "fast",
            work_fn(|_| async { Ok(json!(1)) }),
            Duration::from_secs(5),
        ));
        dag.add_vertex(Vertex::new(
            "slow",
            work_fn(|_| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(json!(2))
            }),
            Duration::from_secs(5),
        ));
        let flag = DropFlag(released.clone());
        dag.add_vertex(Vertex::new(
            "join",
            work_fn(move |_| {
                let _owner = &flag;
                async { Ok(json!(3)) }
            }),
            Duration::from_secs(5),
        ));
        dag.add_edge(&key("root"), &key("fast")).unwrap();
        dag.add_edge(&key("root"), &key("slow")).unwrap();
        dag.add_edge(&key("fast"), &key("join")).unwrap();
        dag.add_edge(&key("slow"), &key("join")).unwrap();

        // "fast" finishes and its helper waits on "slow" when the run is dropped
        let outcome =
            tokio::time::timeout(Duration::from_millis(100), dag.execute(Results::new())).await;
        assert!(outcome.is_err());

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(released.load(Ordering::SeqCst), "dag still alive after execute was dropped");
    }

    #[tokio::test]
    async fn test_finished_helpers_are_reaped() {
        let mut dag = Dag::new();
        for k in ["a", "b"] {
            dag.add_vertex(Vertex::new(
                k,
                work_fn(|_| async { Ok(json!(null)) }),
                Duration::from_secs(1),
            ));
        }
        dag.add_edge(&key("a"), &key("b")).unwrap();

        let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
        let run = Arc::new(RunState::new(dag, Results::new(), ready_tx));

        for _ in 0..5 {
            run.schedule_children(key("a")).await;
            assert_eq!(ready_rx.recv().await, Some(key("b")));
            tokio::task::yield_now().await;
        }

        assert!(run.helpers.lock().await.len() <= 1);
    }
}
