use std::sync::Arc;
use std::time::Duration;

use query_runner::prelude::*;
use query_runner::test_utils::RecordingPool;
use tokio::runtime::Runtime;

/// Route runner logs to the test harness; set `RUST_LOG=query_runner=debug` to see them.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_test_writer()
        .try_init();
}

#[test]
fn sessions_route_by_replication_mode() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let rt = Runtime::new()?;
    rt.block_on(async {
        let primary = RecordingPool::new("primary");
        let replicas = [RecordingPool::new("replica-1"), RecordingPool::new("replica-2")];
        let driver = Arc::new(
            Driver::new(primary.shared(), RunnerConfig::default())
                .with_slaves(replicas.iter().map(RecordingPool::shared).collect()),
        );

        let mut writer = driver.create_query_runner(ReplicationMode::Master);
        writer.query("INSERT INTO t VALUES (1)", &[]).await?;
        for _ in 0..8 {
            let mut reader = driver.create_query_runner(ReplicationMode::Slave);
            reader.query("SELECT * FROM t", &[]).await?;
            reader.release().await;
        }

        assert_eq!(primary.statements(), vec!["INSERT INTO t VALUES (1)"]);
        let replica_reads: usize = replicas.iter().map(|r| r.statements().len()).sum();
        assert_eq!(replica_reads, 8);
        assert_eq!(primary.connect_count(), 1);

        let fallback = RecordingPool::new("primary");
        let driver = Arc::new(Driver::new(fallback.shared(), RunnerConfig::default()));
        let mut reader = driver.create_query_runner(ReplicationMode::Slave);
        reader.query("SELECT 1", &[]).await?;
        assert_eq!(fallback.statements(), vec!["SELECT 1"]);
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn sessions_bind_lazily_and_keep_one_connection() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let pool = RecordingPool::new("primary");
        let driver = Arc::new(Driver::new(pool.shared(), RunnerConfig::default()));
        let mut runner = driver.create_query_runner(ReplicationMode::Master);
        assert_eq!(pool.connect_count(), 0);
        assert!(driver.live_sessions().is_empty());

        runner.start_transaction(None).await?;
        runner.query("SELECT 1", &[]).await?;
        runner.commit_transaction().await?;
        assert_eq!(pool.connect_count(), 1);
        assert!(pool.recorded().iter().all(|s| s.connection == 1));
        assert_eq!(driver.live_sessions(), vec![runner.id()]);

        runner.release().await;
        assert!(driver.live_sessions().is_empty());

        let mut eager = driver.create_query_runner(ReplicationMode::Master);
        eager.connect().await?;
        assert_eq!(pool.connect_count(), 2);
        drop(eager);
        assert!(driver.live_sessions().is_empty());
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn connect_failure_is_reported_and_not_registered() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let pool = RecordingPool::new("primary");
        pool.fail_connect(Some("too many clients already"));
        let driver = Arc::new(Driver::new(pool.shared(), RunnerConfig::default()));
        let mut runner = driver.create_query_runner(ReplicationMode::Master);

        assert!(matches!(
            runner.query("SELECT 1", &[]).await,
            Err(QueryRunnerError::ConnectionError(_))
        ));
        assert!(driver.live_sessions().is_empty());

        pool.fail_connect(None);
        runner.query("SELECT 1", &[]).await?;
        assert_eq!(driver.live_sessions().len(), 1);
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn shutdown_releases_every_live_session() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let rt = Runtime::new()?;
    rt.block_on(async {
        let primary = RecordingPool::new("primary");
        let replica = RecordingPool::new("replica");
        let config = RunnerConfig {
            shutdown_drain_timeout: Duration::from_secs(3),
            ..RunnerConfig::default()
        };
        let driver = Arc::new(
            Driver::new(primary.shared(), config).with_slaves(vec![replica.shared()]),
        );

        let mut writer = driver.create_query_runner(ReplicationMode::Master);
        let mut reader = driver.create_query_runner(ReplicationMode::Slave);
        writer.start_transaction(None).await?;
        reader.query("SELECT 1", &[]).await?;
        assert_eq!(driver.live_sessions().len(), 2);

        driver.shutdown().await;

        assert!(driver.is_closed());
        assert!(driver.live_sessions().is_empty());
        assert!(writer.is_released());
        assert!(reader.is_released());
        assert_eq!(writer.transaction_depth(), 0);
        assert!(matches!(
            writer.commit_transaction().await,
            Err(QueryRunnerError::SessionAlreadyReleased)
        ));
        assert_eq!(primary.shutdown_calls(), vec![Duration::from_secs(3)]);
        assert_eq!(replica.shutdown_calls(), vec![Duration::from_secs(3)]);

        let mut late = driver.create_query_runner(ReplicationMode::Master);
        assert!(matches!(
            late.query("SELECT 1", &[]).await,
            Err(QueryRunnerError::ConnectionError(_))
        ));
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn shutdown_waits_for_statement_in_flight() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let rt = Runtime::new()?;
    rt.block_on(async {
        let pool = RecordingPool::new("primary");
        let driver = Arc::new(Driver::new(pool.shared(), RunnerConfig::default()));
        let mut runner = driver.create_query_runner(ReplicationMode::Master);
        runner.connect().await?;
        pool.set_latency(Some(Duration::from_millis(100)));

        let in_flight = tokio::spawn(async move {
            let result = runner.query("SELECT pg_sleep(0.1)", &[]).await;
            (result, runner)
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        driver.shutdown().await;

        let (result, runner) = in_flight.await?;
        assert!(result.is_ok());
        assert!(runner.is_released());
        assert_eq!(pool.statements(), vec!["SELECT pg_sleep(0.1)"]);
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}
