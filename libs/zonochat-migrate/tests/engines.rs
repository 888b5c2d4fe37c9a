#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Full catalog runs against real server engines (Docker required).
//!
//! `cargo test -p zonochat-migrate --features integration,pg,mysql`

mod common;

#[cfg(all(feature = "integration", any(feature = "pg", feature = "mysql")))]
mod engine_tests {
    use super::common::{LEGACY_SCHEMA, count, exec, exec_all, int_column};
    use zonochat_db::{ConnectOpts, DbEngine, DbHandle};
    use zonochat_migrate::catalog::BACKFILL_USERS_TENANT_ID;
    use zonochat_migrate::{
        ChannelSeed, ChannelType, MigrationRunner, RunStatus, RunnerOptions, StepOutcome,
        TenancyConfig, builtin_steps,
    };

    async fn upgrade_twice(url: &str, expected: DbEngine) {
        let db = DbHandle::connect(url, ConnectOpts::default()).await.unwrap();
        assert_eq!(db.engine(), expected);
        exec_all(&db, LEGACY_SCHEMA).await;
        exec(&db, "INSERT INTO users (id, email) VALUES (1, 'a@x')").await;
        exec(&db, "INSERT INTO users (id, email) VALUES (2, 'b@x')").await;

        let seeds = [ChannelSeed {
            name: "Support mail".to_owned(),
            channel_type: ChannelType::Email,
            identifier: "support@example.com".to_owned(),
            access_token: None,
            webhook_verify_token: None,
            is_active: false,
        }];
        let runner = || {
            MigrationRunner::new(
                builtin_steps(&TenancyConfig::default(), &seeds),
                RunnerOptions::default(),
            )
            .unwrap()
        };

        let first = runner().run(&db).await.unwrap();
        assert_eq!(first.status, RunStatus::Success, "{}", first.render_text());
        assert_eq!(
            first.step(BACKFILL_USERS_TENANT_ID).unwrap().rows_affected,
            Some(2)
        );
        assert_eq!(
            int_column(&db, "users", "tenant_id").await,
            vec![(1, Some(1)), (2, Some(1))]
        );

        let second = runner().run(&db).await.unwrap();
        assert_eq!(second.count(StepOutcome::Skipped), second.steps.len());
        assert_eq!(count(&db, "channels").await, 1);

        db.close().await.unwrap();
    }

    #[cfg(feature = "pg")]
    #[tokio::test]
    async fn postgres_upgrade_is_idempotent() {
        let dut = super::common::bring_up_postgres().await.unwrap();
        upgrade_twice(&dut.url, DbEngine::Postgres).await;
    }

    #[cfg(feature = "mysql")]
    #[tokio::test]
    async fn mysql_upgrade_is_idempotent() {
        let dut = super::common::bring_up_mysql().await.unwrap();
        upgrade_twice(&dut.url, DbEngine::MySql).await;
    }
}
