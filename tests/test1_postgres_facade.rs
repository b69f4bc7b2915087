#![cfg(feature = "test-utils")]

use pg_compat_middleware::prelude::*;
use pg_compat_middleware::test_utils::{setup_postgres_embedded, stop_postgres_embedded};

#[test]
fn test1_query_exec_and_statements_on_both_backends() -> Result<(), Box<dyn std::error::Error>> {
    let pg = setup_postgres_embedded("facade_db")?;

    let rt = tokio::runtime::Runtime::new()?;
    for driver in [Driver::Deadpool, Driver::Postgres] {
        let cfg = pg.config_for(driver);
        rt.block_on(async move {
            let ctx = Context::background();
            let db = Postgres::connect(&ctx, cfg).await?;
            assert_eq!(db.backend_kind(), driver);
            db.ping(&ctx).await?;

            let table = format!("people_{}", driver.as_str());
            db.exec_batch(
                &ctx,
                &format!(
                    "DROP TABLE IF EXISTS {table};
                     CREATE TABLE {table} (id BIGINT PRIMARY KEY, name TEXT NOT NULL, score DOUBLE PRECISION);"
                ),
            )
            .await?;

            let insert = format!("INSERT INTO {table} (id, name, score) VALUES ($1, $2, $3)");
            for (id, name) in [(1, "alice"), (2, "bob"), (3, "carol")] {
                let res = db
                    .exec(
                        &ctx,
                        &insert,
                        &[RowValues::Int(id), RowValues::Text(name.into()), RowValues::Null],
                    )
                    .await?;
                assert_eq!(res.rows_affected, 1);
            }

            // streaming query
            let mut rows = db
                .query(&ctx, &format!("SELECT id, name, score FROM {table} ORDER BY id"), &[])
                .await?;
            let mut seen = Vec::new();
            while let Some(row) = rows.next().await? {
                let values = row.values()?;
                assert_eq!(values.len(), 3);
                assert!(values[2].is_null());
                seen.push(row.get::<_, String>("name")?);
            }
            assert_eq!(seen, vec!["alice", "bob", "carol"]);
            assert!(rows.is_closed());
            assert_eq!(rows.rows_affected(), Some(3));

            // callback query stops at the first callback error
            let mut visited = 0;
            let err = db
                .run_query(
                    &ctx,
                    &format!("SELECT id FROM {table} ORDER BY id"),
                    |row| {
                        visited += 1;
                        if row.get::<_, i64>(0)? == 2 {
                            return Err(PgCompatError::Other("stop".into()));
                        }
                        Ok(())
                    },
                    &[],
                )
                .await
                .unwrap_err();
            assert_eq!(err.to_string(), "Other database error: stop");
            assert_eq!(visited, 2);

            // single row, and the deferred no-rows error
            let name: String = db
                .query_row(
                    &ctx,
                    &format!("SELECT name FROM {table} WHERE id = $1"),
                    &[RowValues::Int(3)],
                )
                .await
                .get(0)?;
            assert_eq!(name, "carol");

            let missing = db
                .query_row(
                    &ctx,
                    &format!("SELECT name FROM {table} WHERE id = $1"),
                    &[RowValues::Int(99)],
                )
                .await;
            assert!(matches!(missing.scan(), Err(PgCompatError::NoRows)));

            // prepared statements: logical on the pool backend, real on the standard one
            let stmt = db
                .prepare(&ctx, &format!("SELECT name FROM {table} WHERE id = $1"))
                .await?;
            assert_eq!(stmt.is_prepared(), driver == Driver::Postgres);
            let row = stmt.query_row(&ctx, &[RowValues::Int(1)]).await.scan()?;
            assert_eq!(row.value(0)?, RowValues::Text("alice".into()));

            let update = db
                .prepare(&ctx, &format!("UPDATE {table} SET score = $1 WHERE id = $2"))
                .await?;
            let res = update
                .exec(&ctx, &[RowValues::Float(9.5), RowValues::Int(2)])
                .await?;
            assert_eq!(res.rows_affected, 1);
            drop(stmt);
            drop(update);

            let score: f64 = db
                .query_row(
                    &ctx,
                    &format!("SELECT score FROM {table} WHERE id = 2"),
                    &[],
                )
                .await
                .get(0)?;
            assert!((score - 9.5).abs() < f64::EPSILON);

            // driver errors come back as postgres errors
            let err = db.exec(&ctx, "SELECT * FROM no_such_table", &[]).await.unwrap_err();
            assert!(matches!(err, PgCompatError::PostgresError(_)));

            db.close().await?;
            db.close().await?;
            assert!(db.is_closed().await);
            assert!(db.backend().is_closed());
            assert!(matches!(db.ping(&ctx).await, Err(PgCompatError::Closed)));
            assert!(matches!(
                db.query(&ctx, "SELECT 1", &[]).await,
                Err(PgCompatError::Closed)
            ));
            Ok::<(), PgCompatError>(())
        })?;
    }

    stop_postgres_embedded(pg);
    Ok(())
}

#[test]
fn test1_search_path_is_applied_and_validated() -> Result<(), Box<dyn std::error::Error>> {
    let pg = setup_postgres_embedded("search_path_db")?;

    let rt = tokio::runtime::Runtime::new()?;
    let base = pg.config_for(Driver::Postgres);
    rt.block_on(async move {
        let ctx = Context::background();

        let setup = Postgres::connect(&ctx, base.clone()).await?;
        setup
            .exec_batch(
                &ctx,
                "CREATE SCHEMA IF NOT EXISTS tenant_a;
                 CREATE TABLE IF NOT EXISTS tenant_a.marker (v TEXT);
                 INSERT INTO tenant_a.marker VALUES ('from tenant_a');",
            )
            .await?;
        assert_eq!(setup.search_path(), vec!["public"]);
        setup.close().await?;

        // configured search path reaches every pooled connection
        let mut cfg = base.clone();
        cfg.search_path = "tenant_a".into();
        cfg.max_open_conns = 2;
        let db = Postgres::connect(&ctx, cfg).await?;
        let v: String = db.query_row(&ctx, "SELECT v FROM marker", &[]).await.get(0)?;
        assert_eq!(v, "from tenant_a");

        let err = db
            .set_default_search_path(&ctx, "public; DROP SCHEMA tenant_a")
            .await
            .unwrap_err();
        assert!(matches!(err, PgCompatError::ConfigError(_)));
        assert_eq!(db.search_path(), vec!["tenant_a"]);

        db.set_default_search_path(&ctx, "tenant_a, public").await?;
        assert_eq!(db.search_path(), vec!["tenant_a", "public"]);

        db.close().await?;
        Ok::<(), PgCompatError>(())
    })?;

    // a spaced schema list still reaches the server as one startup option
    for driver in [Driver::Deadpool, Driver::Postgres] {
        let mut cfg = pg.config_for(driver);
        cfg.search_path = "tenant_a, public".into();
        rt.block_on(async move {
            let ctx = Context::background();
            let db = Postgres::connect(&ctx, cfg).await?;
            db.ping(&ctx).await?;
            assert_eq!(db.search_path(), vec!["tenant_a", "public"]);
            let path: String = db.query_row(&ctx, "SHOW search_path", &[]).await.get(0)?;
            assert_eq!(path, "tenant_a, public");
            let v: String = db.query_row(&ctx, "SELECT v FROM marker", &[]).await.get(0)?;
            assert_eq!(v, "from tenant_a");
            db.close().await?;
            Ok::<(), PgCompatError>(())
        })?;
    }

    stop_postgres_embedded(pg);
    Ok(())
}

#[test]
fn test1_connect_failures_surface_the_driver_error() -> Result<(), Box<dyn std::error::Error>> {
    let pg = setup_postgres_embedded("connect_error_db")?;

    let rt = tokio::runtime::Runtime::new()?;
    for driver in [Driver::Deadpool, Driver::Postgres] {
        let mut cfg = pg.config_for(driver);
        cfg.dbname = "no_such_db".into();
        rt.block_on(async move {
            let ctx = Context::background();
            let db = Postgres::connect(&ctx, cfg).await?;
            let started = std::time::Instant::now();
            let err = db.ping(&ctx).await.unwrap_err();
            assert!(
                started.elapsed() < std::time::Duration::from_secs(10),
                "{driver} took {:?} to fail",
                started.elapsed()
            );
            match driver {
                Driver::Postgres => {
                    assert!(matches!(err, PgCompatError::PostgresError(_)), "{err:?}");
                }
                _ => assert!(
                    matches!(err, PgCompatError::PoolError(_) | PgCompatError::PostgresError(_)),
                    "{err:?}"
                ),
            }
            assert!(err.to_string().contains("db error") || err.to_string().contains("no_such_db"));
            db.close().await?;
            Ok::<(), PgCompatError>(())
        })?;
    }

    stop_postgres_embedded(pg);
    Ok(())
}
