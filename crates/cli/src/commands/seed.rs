use crate::commands::{self, CommandResult, FailureKind};
use docflow_db::{connect_from_config, migrations, seed_demo, SeedSummary};

pub fn run() -> CommandResult {
    let config = match commands::load_config("seed") {
        Ok(config) => config,
        Err(result) => return *result,
    };
    let runtime = match commands::runtime("seed") {
        Ok(runtime) => runtime,
        Err(result) => return *result,
    };

    let outcome = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| (FailureKind::Database, error.to_string()))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| (FailureKind::Migration, error.to_string()))?;

        let summary =
            seed_demo(&pool).await.map_err(|error| (FailureKind::Seed, error.to_string()))?;

        pool.close().await;
        Ok::<SeedSummary, (FailureKind, String)>(summary)
    });

    match outcome {
        Ok(summary) => CommandResult::ok(
            "seed",
            format!(
                "demo fixtures loaded: {} employees, {} approval policy",
                summary.employees, summary.policies
            ),
        ),
        Err((kind, detail)) => CommandResult::failed("seed", kind, detail),
    }
}
