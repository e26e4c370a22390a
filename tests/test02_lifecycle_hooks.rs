use std::sync::{Arc, Mutex};

use query_runner::prelude::*;
use query_runner::test_utils::RecordingPool;
use tokio::runtime::Runtime;

#[derive(Default)]
struct EventLog {
    seen: Mutex<Vec<(TransactionEvent, usize)>>,
}

impl EventLog {
    fn take(&self) -> Vec<(TransactionEvent, usize)> {
        std::mem::take(&mut *self.seen.lock().unwrap())
    }
}

impl TransactionListener for EventLog {
    fn on_event(&self, ctx: &HookContext) -> Result<(), QueryRunnerError> {
        self.seen.lock().unwrap().push((ctx.event, ctx.depth));
        Ok(())
    }
}

fn veto_on(event: TransactionEvent) -> Arc<dyn TransactionListener> {
    Arc::new(move |ctx: &HookContext| {
        if ctx.event == event {
            Err(QueryRunnerError::HookFailed(format!("{} vetoed", ctx.event)))
        } else {
            Ok(())
        }
    })
}

#[test]
fn events_bracket_every_boundary() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let pool = RecordingPool::new("primary");
        let driver = Arc::new(Driver::new(pool.shared(), RunnerConfig::default()));
        let log = Arc::new(EventLog::default());
        driver.subscribe(log.clone());

        let mut runner = driver.create_query_runner(ReplicationMode::Master);
        runner.start_transaction(None).await?;
        runner.start_transaction(None).await?;
        runner.rollback_transaction().await?;
        runner.commit_transaction().await?;

        use TransactionEvent::*;
        assert_eq!(
            log.take(),
            vec![
                (BeforeStart, 0),
                (AfterStart, 1),
                (BeforeStart, 1),
                (AfterStart, 2),
                (BeforeRollback, 2),
                (AfterRollback, 1),
                (BeforeCommit, 1),
                (AfterCommit, 0),
            ]
        );
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn before_hook_failure_aborts_without_statement() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let pool = RecordingPool::new("primary");
        let driver = Arc::new(Driver::new(pool.shared(), RunnerConfig::default()));
        let mut runner = driver.create_query_runner(ReplicationMode::Master);
        runner.start_transaction(None).await?;
        runner.subscribe(veto_on(TransactionEvent::BeforeCommit));

        let err = runner.commit_transaction().await.unwrap_err();
        assert!(matches!(err, QueryRunnerError::HookFailed(ref msg) if msg.contains("BeforeTransactionCommit")));
        assert_eq!(pool.statements(), vec!["BEGIN"]);
        assert_eq!(runner.transaction_depth(), 1);
        assert!(runner.is_transaction_active());

        runner.rollback_transaction().await?;
        assert_eq!(runner.transaction_depth(), 0);
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn vetoed_start_leaves_session_inactive() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let pool = RecordingPool::new("primary");
        let driver = Arc::new(Driver::new(pool.shared(), RunnerConfig::default()));
        let mut runner = driver.create_query_runner(ReplicationMode::Master);
        runner.subscribe(veto_on(TransactionEvent::BeforeStart));

        assert!(runner.start_transaction(None).await.is_err());
        assert!(!runner.is_transaction_active());
        assert_eq!(runner.transaction_depth(), 0);
        assert!(pool.statements().is_empty());
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn after_hook_failure_is_reported_but_transition_stands() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let pool = RecordingPool::new("primary");
        let driver = Arc::new(Driver::new(pool.shared(), RunnerConfig::default()));
        let mut runner = driver.create_query_runner(ReplicationMode::Master);
        runner.subscribe(veto_on(TransactionEvent::AfterStart));

        assert!(matches!(
            runner.start_transaction(None).await,
            Err(QueryRunnerError::HookFailed(_))
        ));
        assert_eq!(runner.transaction_depth(), 1);
        assert_eq!(pool.statements(), vec!["BEGIN"]);
        runner.commit_transaction().await?;
        assert_eq!(pool.statements(), vec!["BEGIN", "COMMIT"]);
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn listeners_run_in_registration_order_and_stop_at_first_error() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let pool = RecordingPool::new("primary");
        let driver = Arc::new(Driver::new(pool.shared(), RunnerConfig::default()));
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = order.clone();
        let first: Arc<dyn TransactionListener> = Arc::new(move |_: &HookContext| -> Result<(), QueryRunnerError> {
            first.lock().unwrap().push("first");
            Ok(())
        });
        let second = order.clone();
        let second: Arc<dyn TransactionListener> = Arc::new(move |_: &HookContext| -> Result<(), QueryRunnerError> {
            second.lock().unwrap().push("second");
            Err(QueryRunnerError::HookFailed("second".into()))
        });
        let third = order.clone();
        let third: Arc<dyn TransactionListener> = Arc::new(move |_: &HookContext| -> Result<(), QueryRunnerError> {
            third.lock().unwrap().push("third");
            Ok(())
        });
        driver.subscribe(first);
        driver.subscribe(second);
        driver.subscribe(third);

        let mut runner = driver.create_query_runner(ReplicationMode::Master);
        assert!(runner.start_transaction(None).await.is_err());
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}
