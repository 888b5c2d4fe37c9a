#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

#[cfg(feature = "sqlite")]
mod runner_sqlite_tests {
    use super::common::{LEGACY_SCHEMA, count, exec, exec_all, int_column, memory_db};
    use async_trait::async_trait;
    use sea_orm::Value;
    use tokio_util::sync::CancellationToken;
    use zonochat_migrate::catalog::{
        ADD_CONTACTS_CHANNEL, ADD_TICKETS_CHANNEL, ADD_USERS_TENANT_ID, BACKFILL_USERS_TENANT_ID,
        CREATE_TENANTS, SEED_DEFAULT_TENANT,
    };
    use zonochat_migrate::{
        AddColumnStep, BackfillQuery, BackfillStep, ChannelSeed, ChannelType, CreateTableStep,
        DEFAULT_HISTORY_TABLE, DefaultValue, ErrorKind, Ident, MigrationRunner, MigrationStep,
        RunStatus, RunnerError, RunnerOptions, SchemaInspector, StepConn, StepContext, StepError,
        StepOutcome, StepState, TenancyConfig, TransactionMode, builtin_steps,
    };

    fn ident(name: &str) -> Ident {
        Ident::new(name).unwrap()
    }

    fn runner(steps: Vec<Box<dyn MigrationStep>>) -> MigrationRunner {
        MigrationRunner::new(steps, RunnerOptions::default()).unwrap()
    }

    fn users_backfill() -> BackfillStep {
        BackfillStep::new(
            BACKFILL_USERS_TENANT_ID,
            BackfillQuery::new(
                ident("users"),
                ident("tenant_id"),
                DefaultValue::Reference {
                    table: ident("tenants"),
                    column: Ident::id(),
                    value: Value::from(1),
                },
            )
            .with_guidance("run the prior migration first"),
        )
    }

    #[tokio::test]
    async fn legacy_database_is_upgraded_then_left_alone() {
        let db = memory_db().await;
        exec_all(&db, LEGACY_SCHEMA).await;
        exec(&db, "INSERT INTO users (id, email) VALUES (1, 'a@x'), (2, 'b@x')").await;

        let seeds = [ChannelSeed {
            name: "Support".to_owned(),
            channel_type: ChannelType::Whatsapp,
            identifier: "+15550100".to_owned(),
            access_token: None,
            webhook_verify_token: None,
            is_active: true,
        }];
        let steps = || builtin_steps(&TenancyConfig::default(), &seeds);

        let first = runner(steps()).run(&db).await.unwrap();
        assert_eq!(first.status, RunStatus::Success, "{}", first.render_text());
        assert_eq!(first.count(StepOutcome::Applied), first.steps.len());
        assert_eq!(
            first.step(BACKFILL_USERS_TENANT_ID).unwrap().rows_affected,
            Some(2)
        );
        assert_eq!(
            int_column(&db, "users", "tenant_id").await,
            vec![(1, Some(1)), (2, Some(1))]
        );
        assert_eq!(count(&db, "channels").await, 1);

        let second = runner(steps()).run(&db).await.unwrap();
        assert_eq!(second.status, RunStatus::Success);
        assert_eq!(second.count(StepOutcome::Skipped), second.steps.len());
        assert!(second.steps.iter().all(|s| s.rows_affected.is_none()));
        assert_eq!(count(&db, "tenants").await, 1);
        assert_eq!(count(&db, "channels").await, 1);
        assert_eq!(count(&db, DEFAULT_HISTORY_TABLE).await, 8);
    }

    #[tokio::test]
    async fn backfill_touches_only_null_rows() {
        let db = memory_db().await;
        exec_all(
            &db,
            &[
                "CREATE TABLE tenants (id INTEGER PRIMARY KEY, name VARCHAR(255) NOT NULL)",
                "INSERT INTO tenants (id, name) VALUES (1, 'Demo'), (5, 'Acme')",
                "CREATE TABLE users (id INTEGER PRIMARY KEY, tenant_id INTEGER NULL)",
                "INSERT INTO users (id, tenant_id) VALUES (1, NULL), (2, 5)",
            ],
        )
        .await;

        let report = runner(vec![Box::new(users_backfill())]).run(&db).await.unwrap();

        let step = report.step(BACKFILL_USERS_TENANT_ID).unwrap();
        assert_eq!(step.outcome, StepOutcome::Applied);
        assert_eq!(step.rows_affected, Some(1));
        assert_eq!(
            int_column(&db, "users", "tenant_id").await,
            vec![(1, Some(1)), (2, Some(5))]
        );
    }

    #[tokio::test]
    async fn backfill_with_nothing_missing_is_skipped() {
        let db = memory_db().await;
        exec_all(
            &db,
            &[
                "CREATE TABLE users (id INTEGER PRIMARY KEY, tenant_id INTEGER NULL)",
                "INSERT INTO users (id, tenant_id) VALUES (1, 7)",
            ],
        )
        .await;

        // Reference table is absent too: nothing to fill means nothing to validate.
        let report = runner(vec![Box::new(users_backfill())]).run(&db).await.unwrap();
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.steps[0].outcome, StepOutcome::Skipped);
    }

    #[tokio::test]
    async fn backfill_before_its_column_fails_with_guidance() {
        let db = memory_db().await;
        exec_all(&db, LEGACY_SCHEMA).await;

        let steps: Vec<Box<dyn MigrationStep>> = vec![
            Box::new(users_backfill()),
            Box::new(AddColumnStep::new(
                ADD_USERS_TENANT_ID,
                ident("users"),
                ident("tenant_id"),
                "INTEGER NULL",
            )),
        ];
        let report = runner(steps).run(&db).await.unwrap();

        assert_eq!(report.status, RunStatus::Failure);
        let failed = &report.steps[0];
        assert_eq!(failed.outcome, StepOutcome::Failed);
        let err = failed.error.as_ref().unwrap();
        assert_eq!(err.kind, ErrorKind::Precondition);
        assert!(err.message.contains("users.tenant_id"), "{}", err.message);
        assert_eq!(err.guidance.as_deref(), Some("run the prior migration first"));
        assert_eq!(report.steps[1].outcome, StepOutcome::NotRun);
    }

    #[tokio::test]
    async fn missing_default_reference_leaves_rows_untouched() {
        let db = memory_db().await;
        exec_all(
            &db,
            &[
                "CREATE TABLE tenants (id INTEGER PRIMARY KEY, name VARCHAR(255) NOT NULL)",
                "CREATE TABLE users (id INTEGER PRIMARY KEY, tenant_id INTEGER NULL)",
                "INSERT INTO users (id, tenant_id) VALUES (1, NULL), (2, NULL)",
            ],
        )
        .await;

        let report = runner(vec![Box::new(users_backfill())]).run(&db).await.unwrap();

        let err = report.steps[0].error.as_ref().unwrap();
        assert_eq!(err.kind, ErrorKind::Precondition);
        assert!(err.message.contains("tenants.id = 1"), "{}", err.message);
        assert_eq!(
            int_column(&db, "users", "tenant_id").await,
            vec![(1, None), (2, None)]
        );
    }

    #[tokio::test]
    async fn failure_halts_remaining_steps() {
        let db = memory_db().await;
        exec(&db, "CREATE TABLE contacts (id INTEGER PRIMARY KEY)").await;

        let steps: Vec<Box<dyn MigrationStep>> = vec![
            Box::new(CreateTableStep::new(
                CREATE_TENANTS,
                ident("tenants"),
                "CREATE TABLE tenants (id INTEGER PRIMARY KEY, name VARCHAR(255) NOT NULL)",
            )),
            Box::new(
                AddColumnStep::new(
                    ADD_USERS_TENANT_ID,
                    ident("users"),
                    ident("tenant_id"),
                    "INTEGER NULL",
                )
                .with_guidance("apply the base schema first"),
            ),
            Box::new(AddColumnStep::new(
                ADD_CONTACTS_CHANNEL,
                ident("contacts"),
                ident("channel"),
                "VARCHAR(32) NULL",
            )),
        ];
        let report = runner(steps).run(&db).await.unwrap();

        let outcomes: Vec<_> = report.steps.iter().map(|s| s.outcome).collect();
        assert_eq!(
            outcomes,
            vec![StepOutcome::Applied, StepOutcome::Failed, StepOutcome::NotRun]
        );
        assert_eq!(report.status, RunStatus::PartialFailure);

        let inspector = SchemaInspector::new(StepConn::Direct(db.conn()));
        assert!(inspector.table_exists(&ident("tenants")).await.unwrap());
        assert!(
            !inspector
                .column_exists(&ident("contacts"), &ident("channel"))
                .await
                .unwrap()
        );

        let text = report.render_text();
        assert!(text.contains("hint: apply the base schema first"), "{text}");
    }

    #[tokio::test]
    async fn ensure_row_does_not_overwrite_existing_rows() {
        let db = memory_db().await;
        exec_all(
            &db,
            &[
                "CREATE TABLE tenants (id INTEGER PRIMARY KEY, name VARCHAR(255) NOT NULL)",
                "INSERT INTO tenants (id, name) VALUES (1, 'Renamed')",
            ],
        )
        .await;

        let steps = builtin_steps(&TenancyConfig::default(), &[])
            .into_iter()
            .take(2)
            .collect();
        let report = runner(steps).run(&db).await.unwrap();
        assert_eq!(report.step(CREATE_TENANTS).unwrap().outcome, StepOutcome::Skipped);
        assert_eq!(
            report.step(SEED_DEFAULT_TENANT).unwrap().outcome,
            StepOutcome::Skipped
        );
        assert_eq!(count(&db, "tenants").await, 1);
    }

    #[tokio::test]
    async fn duplicate_step_names_are_rejected() {
        let steps: Vec<Box<dyn MigrationStep>> = vec![
            Box::new(users_backfill()),
            Box::new(users_backfill()),
        ];
        let err = MigrationRunner::new(steps, RunnerOptions::default()).unwrap_err();
        assert!(
            matches!(err, RunnerError::DuplicateStepName { ref name } if name == BACKFILL_USERS_TENANT_ID)
        );
    }

    #[tokio::test]
    async fn plan_reports_without_writing() {
        let db = memory_db().await;
        exec_all(&db, LEGACY_SCHEMA).await;

        let plan = runner(builtin_steps(&TenancyConfig::default(), &[]))
            .plan(&db)
            .await
            .unwrap();
        assert!(!plan.is_up_to_date());
        assert_eq!(
            plan.steps.iter().find(|s| s.name == ADD_TICKETS_CHANNEL).unwrap().state,
            zonochat_migrate::PlanState::Pending
        );
        // Seeding needs the tenants table, which is still pending.
        assert_eq!(
            plan.steps.iter().find(|s| s.name == SEED_DEFAULT_TENANT).unwrap().state,
            zonochat_migrate::PlanState::Blocked
        );

        let inspector = SchemaInspector::new(StepConn::Direct(db.conn()));
        assert!(
            !inspector
                .table_exists(&ident(DEFAULT_HISTORY_TABLE))
                .await
                .unwrap()
        );
        assert!(!inspector.table_exists(&ident("tenants")).await.unwrap());
    }

    #[tokio::test]
    async fn unreachable_database_is_a_connectivity_error() {
        let db = memory_db().await;
        let closed = db.clone();
        closed.close().await.unwrap();

        let err = runner(builtin_steps(&TenancyConfig::default(), &[]))
            .run(&db)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Connectivity { .. }), "{err}");
    }

    /// Cancels the run from inside its own apply.
    struct CancelDuringApply {
        token: CancellationToken,
    }

    #[async_trait]
    impl MigrationStep for CancelDuringApply {
        fn name(&self) -> &'static str {
            "cancel_during_apply"
        }

        async fn check(&self, ctx: &StepContext<'_>) -> Result<StepState, StepError> {
            let exists = ctx.inspector().table_exists(&ident("marker")).await?;
            Ok(if exists {
                StepState::AlreadyApplied
            } else {
                StepState::NeedsApply
            })
        }

        async fn apply(&self, ctx: &StepContext<'_>) -> Result<u64, StepError> {
            ctx.conn()
                .execute_unprepared("CREATE TABLE marker (id INTEGER)")
                .await?;
            self.token.cancel();
            Ok(0)
        }
    }

    #[tokio::test]
    async fn cancellation_stops_between_steps() {
        let db = memory_db().await;
        exec_all(&db, LEGACY_SCHEMA).await;
        let token = CancellationToken::new();

        let mut steps: Vec<Box<dyn MigrationStep>> = vec![Box::new(CancelDuringApply {
            token: token.clone(),
        })];
        steps.extend(builtin_steps(&TenancyConfig::default(), &[]));
        let options = RunnerOptions {
            cancel: token,
            ..RunnerOptions::default()
        };
        let report = MigrationRunner::new(steps, options)
            .unwrap()
            .run(&db)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.status, RunStatus::PartialFailure);
        assert_eq!(report.steps[0].outcome, StepOutcome::Applied);
        assert!(report.steps[1..].iter().all(|s| s.outcome == StepOutcome::NotRun));
        assert!(report.render_text().ends_with("(cancelled)\n"));
    }

    /// Inserts a row but never reports itself as applied.
    struct NeverSticks;

    #[async_trait]
    impl MigrationStep for NeverSticks {
        fn name(&self) -> &'static str {
            "never_sticks"
        }

        async fn check(&self, _ctx: &StepContext<'_>) -> Result<StepState, StepError> {
            Ok(StepState::NeedsApply)
        }

        async fn apply(&self, ctx: &StepContext<'_>) -> Result<u64, StepError> {
            ctx.conn()
                .execute_unprepared("INSERT INTO tenants (id, name) VALUES (9, 'ghost')")
                .await
        }
    }

    async fn run_never_sticks(mode: TransactionMode) -> i64 {
        let db = memory_db().await;
        exec(
            &db,
            "CREATE TABLE tenants (id INTEGER PRIMARY KEY, name VARCHAR(255) NOT NULL)",
        )
        .await;
        let options = RunnerOptions {
            transaction_mode: mode,
            ..RunnerOptions::default()
        };
        let report = MigrationRunner::new(vec![Box::new(NeverSticks)], options)
            .unwrap()
            .run(&db)
            .await
            .unwrap();
        let err = report.steps[0].error.as_ref().unwrap();
        assert_eq!(err.kind, ErrorKind::Verification);
        count(&db, "tenants").await
    }

    #[tokio::test]
    async fn failed_verification_rolls_back_in_transaction() {
        assert_eq!(run_never_sticks(TransactionMode::Auto).await, 0);
        assert_eq!(run_never_sticks(TransactionMode::Never).await, 1);
    }
}
