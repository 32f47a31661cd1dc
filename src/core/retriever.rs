use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::errors::FetchError;
use super::models::{Finding, Task};
use super::normalize::{collect_records, collect_with};
use super::session::{Scope, Session};
use crate::api::Backend;

/// Picks the endpoint variant for a scope and returns normalized entities.
///
/// Any retrieval failure aborts the whole call and no partial sequence is
/// returned. Records missing identity fields are dropped and logged.
pub struct ScopedRetriever<B: Backend> {
    backend: Arc<B>,
    fanout: usize,
}

/// Race a retrieval against the caller's cancellation token.
async fn guarded<T>(
    cancel: &CancellationToken,
    retrieval: impl Future<Output = Result<T, FetchError>>,
) -> Result<T, FetchError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        result = retrieval => result,
    }
}

impl<B: Backend + 'static> ScopedRetriever<B> {
    pub fn new(backend: Arc<B>, fanout: usize) -> Self {
        Self {
            backend,
            fanout: fanout.max(1),
        }
    }

    pub async fn fetch_tasks(
        &self,
        session: &Session,
        scope: Scope,
        cancel: &CancellationToken,
    ) -> Result<Vec<Task>, FetchError> {
        let records = match scope {
            Scope::All => guarded(cancel, self.backend.list_all_tasks(session)).await?,
            Scope::Own => guarded(cancel, self.backend.list_own_tasks(session)).await?,
        };

        let tasks: Vec<Task> = collect_records(&records);
        tracing::info!("Retrieved {} tasks ({} scope)", tasks.len(), scope.as_str());
        Ok(tasks)
    }

    pub async fn fetch_findings(
        &self,
        session: &Session,
        scope: Scope,
        tasks: &[Task],
        cancel: &CancellationToken,
    ) -> Result<Vec<Finding>, FetchError> {
        let findings = match scope {
            Scope::All => {
                let records = guarded(cancel, self.backend.list_all_findings(session)).await?;
                collect_records(&records)
            }
            Scope::Own => self.fan_out_findings(session, tasks, cancel).await?,
        };

        tracing::info!("Retrieved {} findings ({} scope)", findings.len(), scope.as_str());
        Ok(findings)
    }

    /// Tasks and findings for one dashboard activation. The two admin bulk
    /// calls are independent and run concurrently.
    pub async fn fetch_dashboard(
        &self,
        session: &Session,
        scope: Scope,
        cancel: &CancellationToken,
    ) -> Result<(Vec<Task>, Vec<Finding>), FetchError> {
        match scope {
            Scope::All => tokio::try_join!(
                self.fetch_tasks(session, scope, cancel),
                self.fetch_findings(session, scope, &[], cancel),
            ),
            Scope::Own => {
                let tasks = self.fetch_tasks(session, scope, cancel).await?;
                let findings = self.fetch_findings(session, scope, &tasks, cancel).await?;
                Ok((tasks, findings))
            }
        }
    }

    /// One retrieval per task, at most `fanout` in flight. Each response is
    /// tagged with its input index and slotted back by that index, so the
    /// output follows task order whatever order responses arrive in.
    async fn fan_out_findings(
        &self,
        session: &Session,
        tasks: &[Task],
        cancel: &CancellationToken,
    ) -> Result<Vec<Finding>, FetchError> {
        let semaphore = Arc::new(Semaphore::new(self.fanout));
        let abort = cancel.child_token();
        let mut set: JoinSet<Result<(usize, Vec<Value>), FetchError>> = JoinSet::new();

        for (index, task) in tasks.iter().enumerate() {
            let backend = Arc::clone(&self.backend);
            let semaphore = Arc::clone(&semaphore);
            let session = session.clone();
            let abort = abort.clone();
            let task_id = task.id;

            set.spawn(async move {
                let _permit = guarded(&abort, async move {
                    semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| FetchError::Network(format!("fan-out closed: {}", e)))
                })
                .await?;

                tracing::debug!("Fetching findings for task {}", task_id);
                let records = guarded(&abort, backend.list_task_findings(&session, task_id)).await?;
                Ok((index, records))
            });
        }

        let mut slots: Vec<Option<Vec<Value>>> = vec![None; tasks.len()];
        while let Some(joined) = set.join_next().await {
            let outcome = joined
                .map_err(|e| FetchError::Network(format!("retrieval task failed: {}", e)))
                .and_then(|result| result);

            match outcome {
                Ok((index, records)) => slots[index] = Some(records),
                Err(err) => {
                    tracing::warn!("Findings retrieval aborted: {}", err);
                    abort.cancel();
                    set.abort_all();
                    return Err(err);
                }
            }
        }

        let mut findings = Vec::new();
        for (task, records) in tasks.iter().zip(slots) {
            let records = records.unwrap_or_default();
            findings.extend(collect_with(&records, |raw| Finding::from_record_in_task(raw, task.id)));
        }
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{Role, TaskStatus};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory platform. Per-task responses can be delayed or failed.
    #[derive(Default)]
    struct FakeBackend {
        own_tasks: Vec<Value>,
        all_tasks: Vec<Value>,
        all_findings: Vec<Value>,
        task_findings: HashMap<u64, Vec<Value>>,
        delays_ms: HashMap<u64, u64>,
        failing: HashMap<u64, FetchError>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeBackend {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        async fn list_own_tasks(&self, _session: &Session) -> Result<Vec<Value>, FetchError> {
            self.record("own_tasks".to_string());
            Ok(self.own_tasks.clone())
        }

        async fn list_all_tasks(&self, _session: &Session) -> Result<Vec<Value>, FetchError> {
            self.record("all_tasks".to_string());
            Ok(self.all_tasks.clone())
        }

        async fn list_all_findings(&self, _session: &Session) -> Result<Vec<Value>, FetchError> {
            self.record("all_findings".to_string());
            Ok(self.all_findings.clone())
        }

        async fn list_task_findings(&self, _session: &Session, task_id: u64) -> Result<Vec<Value>, FetchError> {
            self.record(format!("task_findings:{}", task_id));
            if let Some(ms) = self.delays_ms.get(&task_id) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            if let Some(err) = self.failing.get(&task_id) {
                return Err(err.clone());
            }
            Ok(self.task_findings.get(&task_id).cloned().unwrap_or_default())
        }
    }

    fn session(role: Role) -> Session {
        Session {
            token: "tok".to_string(),
            username: "alice".to_string(),
            role,
        }
    }

    fn task(id: u64) -> Value {
        json!({ "ID": id, "Target": format!("host-{}", id), "Template": "cves/", "Status": "done", "UserID": 1 })
    }

    fn finding(id: u64, severity: &str) -> Value {
        json!({ "ID": id, "Vulnerability": format!("vuln-{}", id), "Severity": severity })
    }

    #[tokio::test]
    async fn test_scope_selects_endpoint() {
        let backend = Arc::new(FakeBackend {
            own_tasks: vec![task(1)],
            all_tasks: vec![task(1), task(2), task(3)],
            ..Default::default()
        });
        let retriever = ScopedRetriever::new(Arc::clone(&backend), 4);
        let cancel = CancellationToken::new();

        let own = retriever.fetch_tasks(&session(Role::User), Scope::Own, &cancel).await.unwrap();
        let all = retriever.fetch_tasks(&session(Role::Admin), Scope::All, &cancel).await.unwrap();

        assert_eq!(own.len(), 1);
        assert_eq!(own[0].status, TaskStatus::Done);
        assert_eq!(all.len(), 3);
        assert_eq!(backend.calls(), vec!["own_tasks", "all_tasks"]);
    }

    #[tokio::test]
    async fn test_admin_findings_single_bulk_call() {
        let backend = Arc::new(FakeBackend {
            all_findings: vec![
                json!({ "id": 1, "task_id": 3, "severity": "Low", "created_at": "2024-01-09" }),
                json!({ "id": 2, "task_id": 4, "severity": " HIGH" }),
            ],
            ..Default::default()
        });
        let retriever = ScopedRetriever::new(Arc::clone(&backend), 4);

        let tasks: Vec<Task> = collect_records(&[task(1), task(2)]);
        let findings = retriever
            .fetch_findings(&session(Role::Admin), Scope::All, &tasks, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(findings.len(), 2);
        assert_eq!(findings[1].severity, "high");
        assert_eq!(backend.calls(), vec!["all_findings"]);
    }

    #[tokio::test]
    async fn test_fan_out_preserves_task_order() {
        // Earlier tasks answer last.
        let backend = Arc::new(FakeBackend {
            task_findings: HashMap::from([
                (1, vec![finding(10, "low"), finding(11, "high")]),
                (2, vec![finding(20, "medium")]),
                (3, vec![finding(30, "critical")]),
            ]),
            delays_ms: HashMap::from([(1, 60), (2, 30), (3, 0)]),
            ..Default::default()
        });
        let retriever = ScopedRetriever::new(Arc::clone(&backend), 3);

        let tasks: Vec<Task> = collect_records(&[task(1), task(2), task(3)]);
        let findings = retriever
            .fetch_findings(&session(Role::User), Scope::Own, &tasks, &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<(u64, u64)> = findings.iter().map(|f| (f.task_id, f.id)).collect();
        assert_eq!(ids, vec![(1, 10), (1, 11), (2, 20), (3, 30)]);
        assert_eq!(backend.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_fan_out_failure_aborts_whole_call() {
        let backend = Arc::new(FakeBackend {
            task_findings: HashMap::from([(5, vec![finding(1, "low")]), (9, vec![finding(2, "low")])]),
            failing: HashMap::from([(7, FetchError::Network("connection reset".to_string()))]),
            delays_ms: HashMap::from([(9, 200)]),
            ..Default::default()
        });
        let retriever = ScopedRetriever::new(Arc::clone(&backend), 1);

        let tasks: Vec<Task> = collect_records(&[task(5), task(7), task(9)]);
        let result = retriever
            .fetch_findings(&session(Role::User), Scope::Own, &tasks, &CancellationToken::new())
            .await;

        assert_eq!(result, Err(FetchError::Network("connection reset".to_string())));
    }

    #[tokio::test]
    async fn test_authorization_failure_propagates() {
        let backend = Arc::new(FakeBackend {
            failing: HashMap::from([(1, FetchError::Authorization("token expired".to_string()))]),
            ..Default::default()
        });
        let retriever = ScopedRetriever::new(backend, 2);

        let tasks: Vec<Task> = collect_records(&[task(1)]);
        let err = retriever
            .fetch_findings(&session(Role::User), Scope::Own, &tasks, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_authorization());
    }

    #[tokio::test]
    async fn test_malformed_records_are_dropped() {
        let backend = Arc::new(FakeBackend {
            own_tasks: vec![task(1), json!({ "Target": "no id" }), json!("garbage")],
            task_findings: HashMap::from([(1, vec![finding(1, "low"), json!({ "Severity": "high" })])]),
            ..Default::default()
        });
        let retriever = ScopedRetriever::new(backend, 2);

        let (tasks, findings) = retriever
            .fetch_dashboard(&session(Role::User), Scope::Own, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(tasks.len(), 1);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].task_id, 1);
    }

    #[tokio::test]
    async fn test_admin_dashboard_skips_fan_out() {
        let backend = Arc::new(FakeBackend {
            all_tasks: vec![task(1), task(2)],
            all_findings: vec![json!({ "ID": 1, "TaskID": 2, "Severity": "low" })],
            ..Default::default()
        });
        let retriever = ScopedRetriever::new(Arc::clone(&backend), 2);

        let (tasks, findings) = retriever
            .fetch_dashboard(&session(Role::Admin), Scope::All, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!((tasks.len(), findings.len()), (2, 1));
        let mut calls = backend.calls();
        calls.sort();
        assert_eq!(calls, vec!["all_findings", "all_tasks"]);
    }

    #[tokio::test]
    async fn test_cancelled_token_yields_cancelled() {
        let backend = Arc::new(FakeBackend {
            task_findings: HashMap::from([(1, vec![finding(1, "low")])]),
            delays_ms: HashMap::from([(1, 5_000)]),
            ..Default::default()
        });
        let retriever = ScopedRetriever::new(backend, 1);
        let tasks: Vec<Task> = collect_records(&[task(1)]);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = retriever
            .fetch_findings(&session(Role::User), Scope::Own, &tasks, &cancel)
            .await;
        assert_eq!(result, Err(FetchError::Cancelled));
    }

    #[tokio::test]
    async fn test_empty_task_list_makes_no_calls() {
        let backend = Arc::new(FakeBackend::default());
        let retriever = ScopedRetriever::new(Arc::clone(&backend), 4);

        let findings = retriever
            .fetch_findings(&session(Role::User), Scope::Own, &[], &CancellationToken::new())
            .await
            .unwrap();

        assert!(findings.is_empty());
        assert!(backend.calls().is_empty());
    }
}
